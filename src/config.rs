use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ConfigError, FileError};

/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "AUTO_APPLY_CONFIG";

/// 低于完成率阈值时的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BelowThresholdRoute {
    /// 直接判定失败
    Failed,
    /// 保留进度，交给人工完成
    NeedsManual,
}

/// 单个招聘平台的频率上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCap {
    pub per_hour: u32,
    pub per_day: u32,
}

/// 程序配置文件
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 同时运行的申请 worker 数量
    pub worker_count: usize,
    /// 浏览器调试端口
    pub browser_debug_port: u16,
    /// 是否启动无头浏览器（否则连接已开启调试端口的浏览器）
    pub headless: bool,
    /// 无头模式下的浏览器可执行文件
    pub chrome_executable: Option<String>,
    /// PostgreSQL 连接串，为空时使用内存队列
    pub database_url: Option<String>,
    /// 待入队职位 TOML 文件目录
    pub jobs_folder: String,
    /// 用户资料 TOML 文件
    pub profile_path: String,
    /// 截图证据目录
    pub evidence_dir: String,
    /// 输出日志文件
    pub output_log_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,

    // --- 预算与频率 ---
    /// 每日打码花费上限（美元）
    pub daily_cost_ceiling_usd: f64,
    /// 每小时打码尝试上限
    pub hourly_attempt_ceiling: u32,
    /// 全局每小时申请上限
    pub global_hourly_application_cap: u32,
    /// 各平台频率上限
    pub platform_caps: HashMap<String, PlatformCap>,

    // --- 会话缓存 ---
    pub session_ttl_secs: u64,
    /// 会话缓存持久化文件，为空时仅保存在内存
    pub session_cache_path: Option<String>,

    // --- 超时 ---
    pub navigation_timeout_ms: u64,
    pub submit_timeout_ms: u64,
    /// 提交后等待成功标志的时长
    pub confirmation_wait_ms: u64,
    pub solver_poll_interval_ms: u64,
    pub solver_timeout_ms: u64,
    /// 等待人工处理验证码的时长
    pub human_wait_timeout_ms: u64,
    pub human_poll_interval_ms: u64,
    /// 队列为空时的轮询间隔
    pub idle_poll_interval_ms: u64,

    // --- 表单 ---
    pub fill_acceptance_threshold: f64,
    pub below_threshold_route: BelowThresholdRoute,
    pub typing_delay_min_ms: u64,
    pub typing_delay_max_ms: u64,

    // --- 重试 ---
    pub retry_max: u32,

    // --- 外部服务 ---
    pub primary_solver_api_key: Option<String>,
    pub primary_solver_base_url: String,
    pub secondary_solver_api_key: Option<String>,
    pub secondary_solver_base_url: String,
    /// Slack 兼容的 webhook，为空时只写日志
    pub alert_webhook_url: Option<String>,

    // --- 页面判定 ---
    pub success_indicators: Vec<String>,
    pub listing_closed_indicators: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let mut platform_caps = HashMap::new();
        platform_caps.insert(
            "linkedin".to_string(),
            PlatformCap {
                per_hour: 5,
                per_day: 25,
            },
        );
        platform_caps.insert(
            "indeed".to_string(),
            PlatformCap {
                per_hour: 8,
                per_day: 40,
            },
        );

        Self {
            worker_count: 2,
            browser_debug_port: 9222,
            headless: true,
            chrome_executable: None,
            database_url: None,
            jobs_folder: "jobs".to_string(),
            profile_path: "profile.toml".to_string(),
            evidence_dir: "evidence".to_string(),
            output_log_file: "output.txt".to_string(),
            verbose_logging: false,
            daily_cost_ceiling_usd: 1.0,
            hourly_attempt_ceiling: 20,
            global_hourly_application_cap: 30,
            platform_caps,
            session_ttl_secs: 24 * 60 * 60,
            session_cache_path: None,
            navigation_timeout_ms: 30_000,
            submit_timeout_ms: 30_000,
            confirmation_wait_ms: 15_000,
            solver_poll_interval_ms: 5_000,
            solver_timeout_ms: 120_000,
            human_wait_timeout_ms: 300_000,
            human_poll_interval_ms: 3_000,
            idle_poll_interval_ms: 10_000,
            fill_acceptance_threshold: 0.8,
            below_threshold_route: BelowThresholdRoute::Failed,
            typing_delay_min_ms: 40,
            typing_delay_max_ms: 160,
            retry_max: 1,
            primary_solver_api_key: None,
            primary_solver_base_url: "https://2captcha.com".to_string(),
            secondary_solver_api_key: None,
            secondary_solver_base_url: "https://api.anti-captcha.com".to_string(),
            alert_webhook_url: None,
            success_indicators: vec![
                "thank you".to_string(),
                "application received".to_string(),
                "successfully submitted".to_string(),
                "application has been submitted".to_string(),
            ],
            listing_closed_indicators: vec![
                "no longer accepting".to_string(),
                "position has been filled".to_string(),
                "job is no longer available".to_string(),
                "this job has expired".to_string(),
                "page not found".to_string(),
            ],
        }
    }
}

/// 读取并解析环境变量，未设置时返回 None
fn env_parse<T: std::str::FromStr>(var_name: &str) -> AppResult<Option<T>> {
    match std::env::var(var_name) {
        Ok(value) => value.trim().parse::<T>().map(Some).map_err(|_| {
            ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value,
                expected_type: std::any::type_name::<T>().to_string(),
            }
            .into()
        }),
        Err(_) => Ok(None),
    }
}

fn env_string(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// 从环境变量覆盖默认配置
    pub fn from_env() -> AppResult<Self> {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件加载（缺省字段取默认值）
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| FileError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| FileError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config)
    }

    /// 完整加载流程：配置文件（可选）→ 环境变量 → 校验
    pub fn load() -> AppResult<Self> {
        let base = match env_string(CONFIG_PATH_ENV) {
            Some(path) => Self::from_toml_file(Path::new(&path))?,
            None => Self::default(),
        };
        let config = base.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn with_env_overrides(mut self) -> AppResult<Self> {
        if let Some(v) = env_parse("WORKER_COUNT")? {
            self.worker_count = v;
        }
        if let Some(v) = env_parse("BROWSER_DEBUG_PORT")? {
            self.browser_debug_port = v;
        }
        if let Some(v) = env_parse("HEADLESS")? {
            self.headless = v;
        }
        if let Some(v) = env_string("CHROME_EXECUTABLE") {
            self.chrome_executable = Some(v);
        }
        if let Some(v) = env_string("DATABASE_URL") {
            self.database_url = Some(v);
        }
        if let Some(v) = env_string("JOBS_FOLDER") {
            self.jobs_folder = v;
        }
        if let Some(v) = env_string("PROFILE_PATH") {
            self.profile_path = v;
        }
        if let Some(v) = env_string("EVIDENCE_DIR") {
            self.evidence_dir = v;
        }
        if let Some(v) = env_string("OUTPUT_LOG_FILE") {
            self.output_log_file = v;
        }
        if let Some(v) = env_parse("VERBOSE_LOGGING")? {
            self.verbose_logging = v;
        }
        if let Some(v) = env_parse("CAPTCHA_DAILY_BUDGET")? {
            self.daily_cost_ceiling_usd = v;
        }
        if let Some(v) = env_parse("CAPTCHA_HOURLY_ATTEMPTS")? {
            self.hourly_attempt_ceiling = v;
        }
        if let Some(v) = env_parse("GLOBAL_HOURLY_APPLICATION_CAP")? {
            self.global_hourly_application_cap = v;
        }
        if let Some(v) = env_parse("SESSION_TTL_SECS")? {
            self.session_ttl_secs = v;
        }
        if let Some(v) = env_string("SESSION_CACHE_PATH") {
            self.session_cache_path = Some(v);
        }
        if let Some(v) = env_parse("HUMAN_WAIT_TIMEOUT_MS")? {
            self.human_wait_timeout_ms = v;
        }
        if let Some(v) = env_parse("FILL_ACCEPTANCE_THRESHOLD")? {
            self.fill_acceptance_threshold = v;
        }
        if let Some(v) = env_parse("RETRY_MAX")? {
            self.retry_max = v;
        }
        if let Some(v) = env_string("CAPTCHA_2CAPTCHA_KEY") {
            self.primary_solver_api_key = Some(v);
        }
        if let Some(v) = env_string("CAPTCHA_ANTICAPTCHA_KEY") {
            self.secondary_solver_api_key = Some(v);
        }
        if let Some(v) = env_string("ALERT_WEBHOOK_URL") {
            self.alert_webhook_url = Some(v);
        }
        Ok(self)
    }

    /// 校验配置取值
    pub fn validate(&self) -> AppResult<()> {
        if self.worker_count == 0 {
            return Err(invalid("worker_count", "至少需要 1 个 worker"));
        }
        if !(0.0..=1.0).contains(&self.fill_acceptance_threshold) {
            return Err(invalid(
                "fill_acceptance_threshold",
                format!("必须在 [0, 1] 之间, 当前 {}", self.fill_acceptance_threshold),
            ));
        }
        if self.daily_cost_ceiling_usd < 0.0 || !self.daily_cost_ceiling_usd.is_finite() {
            return Err(invalid("daily_cost_ceiling_usd", "必须为非负数"));
        }
        if self.typing_delay_min_ms > self.typing_delay_max_ms {
            return Err(invalid(
                "typing_delay_min_ms",
                "不能大于 typing_delay_max_ms",
            ));
        }
        if self.solver_poll_interval_ms == 0 || self.human_poll_interval_ms == 0 {
            return Err(invalid("poll_interval", "轮询间隔不能为 0"));
        }
        Ok(())
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn confirmation_wait(&self) -> Duration {
        Duration::from_millis(self.confirmation_wait_ms)
    }

    pub fn solver_poll_interval(&self) -> Duration {
        Duration::from_millis(self.solver_poll_interval_ms)
    }

    pub fn solver_timeout(&self) -> Duration {
        Duration::from_millis(self.solver_timeout_ms)
    }

    pub fn human_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.human_wait_timeout_ms)
    }

    pub fn human_poll_interval(&self) -> Duration {
        Duration::from_millis(self.human_poll_interval_ms)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_secs as i64)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> crate::error::AppError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.human_wait_timeout(), Duration::from_secs(300));
        assert_eq!(config.session_ttl(), chrono::Duration::hours(24));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            worker_count = 4
            fill_acceptance_threshold = 0.6
            below_threshold_route = "needs_manual"

            [platform_caps.greenhouse]
            per_hour = 10
            per_day = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.worker_count, 4);
        assert_eq!(config.below_threshold_route, BelowThresholdRoute::NeedsManual);
        assert_eq!(config.hourly_attempt_ceiling, 20);
        assert_eq!(config.platform_caps["greenhouse"].per_day, 50);
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let config = Config {
            fill_acceptance_threshold: 1.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_typing_delay() {
        let config = Config {
            typing_delay_min_ms: 200,
            typing_delay_max_ms: 100,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
