/// 人工介入通知
///
/// 第三层验证码处理时通知操作员去浏览器里手动完成。
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> AppResult<()>;
}

/// Slack 兼容的 webhook 通知
pub struct WebhookNotifier {
    http: Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) -> AppResult<()> {
        debug!("发送 webhook 通知");
        let response = self
            .http
            .post(&self.webhook_url)
            .json(&json!({ "text": message }))
            .send()
            .await
            .map_err(|e| AppError::Alert(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AppError::Alert(format!(
                "webhook 返回状态码 {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// 没有配置 webhook 时只写日志
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> AppResult<()> {
        warn!("🙋 需要人工处理: {}", message);
        Ok(())
    }
}
