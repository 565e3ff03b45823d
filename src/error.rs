use thiserror::Error;
use uuid::Uuid;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 浏览器相关错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] BrowserError),
    /// 持久化存储错误
    #[error("存储错误: {0}")]
    Store(#[from] StoreError),
    /// 验证码打码服务错误
    #[error("打码服务错误: {0}")]
    Solver(#[from] SolverError),
    /// 表单填写错误
    #[error("表单错误: {0}")]
    Form(#[from] FormError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 外部通知失败
    #[error("通知发送失败: {0}")]
    Alert(String),
    /// 挂起点等待超时
    #[error("等待超时: {operation} (超过 {timeout_ms}ms)")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
    /// 被操作员取消
    #[error("操作已取消")]
    Cancelled,
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 浏览器相关错误
#[derive(Debug, Error)]
pub enum BrowserError {
    /// 连接浏览器失败
    #[error("无法连接到浏览器 (端口: {port}): {source}")]
    ConnectionFailed {
        port: u16,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 浏览器配置失败
    #[error("浏览器配置失败: {0}")]
    ConfigurationFailed(String),
    /// 导航失败
    #[error("导航到 {url} 失败: {reason}")]
    NavigationFailed { url: String, reason: String },
    /// 职位已下架（404 / 停止招聘）
    #[error("职位已下架: {url}")]
    ListingRemoved { url: String },
    /// 执行脚本失败
    #[error("执行脚本失败: {source}")]
    ScriptExecutionFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 找不到页面元素
    #[error("找不到元素: {selector}")]
    ElementNotFound { selector: String },
    /// 页面句柄已失效
    #[error("页面句柄不存在: {page_id}")]
    UnknownPage { page_id: String },
}

/// 存储层错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 数据库错误
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    /// 数据库迁移失败
    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    /// 职位不存在
    #[error("职位不存在: {0}")]
    JobNotFound(Uuid),
    /// 申请记录不存在
    #[error("申请记录不存在: {0}")]
    ApplicationNotFound(Uuid),
    /// 同一职位已有进行中的申请
    #[error("职位 {job_id} 已存在未结束的申请")]
    DuplicateApplication { job_id: Uuid },
    /// 非法状态迁移
    #[error("非法状态迁移: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    /// 数据库中的值无法解析
    #[error("无法解析字段 {field}: {value}")]
    Corrupt { field: &'static str, value: String },
}

/// 打码服务错误
#[derive(Debug, Error)]
pub enum SolverError {
    /// 网络请求失败
    #[error("请求 {provider} 失败: {source}")]
    RequestFailed {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
    /// 服务返回错误码
    #[error("{provider} 拒绝请求: {code}")]
    Rejected { provider: String, code: String },
    /// 验证码类型不支持
    #[error("{provider} 不支持该验证码类型: {kind}")]
    Unsupported { provider: String, kind: String },
    /// 缺少 site key 等必要参数
    #[error("验证码缺少必要参数: {0}")]
    MissingParameter(&'static str),
}

/// 表单错误
#[derive(Debug, Error)]
pub enum FormError {
    /// 表单中没有任何可识别的字段
    #[error("表单没有可识别的字段 (共 {total} 个字段)")]
    Unrecognized { total: usize },
    /// 填写完成率低于阈值
    #[error("表单完成率 {ratio:.2} 低于阈值 {threshold:.2}")]
    BelowThreshold { ratio: f64, threshold: f64 },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 配置值不合法
    #[error("配置项 {field} 不合法: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// JSON 解析失败
    #[error("JSON解析失败: {0}")]
    JsonParseFailed(#[from] serde_json::Error),
    /// 目录不存在
    #[error("目录不存在: {path}")]
    DirectoryNotFound { path: String },
}

/// 错误分类，决定失败后的路由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 临时错误：在策略范围内重试一次，否则升级
    Transient,
    /// 预算耗尽：不是错误，直接转人工
    BudgetExhausted,
    /// 结构性错误：终态失败，不重试
    Fatal,
    /// 部分成功：转人工完成，保留已完成的工作
    Partial,
}

impl AppError {
    /// 将错误归入失败分类
    pub fn class(&self) -> FailureClass {
        match self {
            AppError::Timeout { .. } => FailureClass::Transient,
            AppError::Browser(BrowserError::NavigationFailed { .. })
            | AppError::Browser(BrowserError::ScriptExecutionFailed { .. })
            | AppError::Browser(BrowserError::ConnectionFailed { .. }) => FailureClass::Transient,
            AppError::Solver(SolverError::RequestFailed { .. }) => FailureClass::Transient,
            AppError::Store(StoreError::Database(_)) => FailureClass::Transient,
            AppError::Form(FormError::BelowThreshold { .. }) => FailureClass::Partial,
            _ => FailureClass::Fatal,
        }
    }

    /// 职位是否已下架
    pub fn is_listing_removed(&self) -> bool {
        matches!(self, AppError::Browser(BrowserError::ListingRemoved { .. }))
    }

    /// 创建浏览器连接错误
    pub fn browser_connection_failed(
        port: u16,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Browser(BrowserError::ConnectionFailed {
            port,
            source: Box::new(source),
        })
    }

    /// 创建导航失败错误
    pub fn navigation_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Browser(BrowserError::NavigationFailed {
            url: url.into(),
            reason: reason.into(),
        })
    }

    /// 创建打码服务请求失败错误
    pub fn solver_request_failed(provider: impl Into<String>, source: reqwest::Error) -> Self {
        AppError::Solver(SolverError::RequestFailed {
            provider: provider.into(),
            source,
        })
    }
}

// ========== 从常见错误类型转换 ==========

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Browser(BrowserError::ScriptExecutionFailed {
            source: Box::new(err),
        })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::File(FileError::JsonParseFailed(err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Store(StoreError::Database(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: String::new(),
            source: err,
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
