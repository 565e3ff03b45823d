//! 重试策略
//!
//! 只有临时错误会在同一次认领内重试，且次数不超过上限。

use crate::config::Config;
use crate::error::{AppError, FailureClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.retry_max)
    }

    /// `retry_count` 为刚结束的那次尝试的重试序号
    pub fn should_retry(&self, error: &AppError, retry_count: u32) -> bool {
        error.class() == FailureClass::Transient && retry_count < self.max_retries
    }
}
