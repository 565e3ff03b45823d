//! 浏览器能力抽象
//!
//! 流程层只通过这个 trait 操作页面，测试中可以换成脚本化的假浏览器。

use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::{Challenge, FieldDescriptor, FieldInput};

/// 已打开页面的句柄
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageHandle {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// 打开新页面并导航到 URL
    async fn open(&self, url: &str) -> AppResult<PageHandle>;

    /// 页面可见文本
    async fn page_text(&self, page: &PageHandle) -> AppResult<String>;

    /// 列出页面上所有可填写的表单字段
    async fn list_fields(&self, page: &PageHandle) -> AppResult<Vec<FieldDescriptor>>;

    /// 对单个字段执行一次写入动作
    async fn set_field_value(
        &self,
        page: &PageHandle,
        field: &FieldDescriptor,
        input: &FieldInput,
    ) -> AppResult<()>;

    /// 检测当前页面上的验证码
    async fn detect_challenge(&self, page: &PageHandle) -> AppResult<Option<Challenge>>;

    /// 点击一次验证码确认框，返回点击后验证码是否消失
    async fn click_challenge_checkbox(
        &self,
        page: &PageHandle,
        challenge: &Challenge,
    ) -> AppResult<bool>;

    /// 把打码服务返回的 token 注入页面
    async fn inject_solution(
        &self,
        page: &PageHandle,
        challenge: &Challenge,
        token: &str,
    ) -> AppResult<()>;

    /// 导出当前会话（cookie 等）
    async fn export_session(&self, page: &PageHandle) -> AppResult<String>;

    /// 恢复缓存的会话并刷新页面
    async fn apply_session(&self, page: &PageHandle, state: &str) -> AppResult<()>;

    /// 提交表单
    async fn submit(&self, page: &PageHandle) -> AppResult<()>;

    /// 整页截图（PNG）
    async fn screenshot(&self, page: &PageHandle) -> AppResult<Vec<u8>>;

    /// 关闭页面
    async fn close(&self, page: &PageHandle) -> AppResult<()>;
}
