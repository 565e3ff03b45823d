//! 申请处理上下文
//!
//! 封装"哪个 worker 在处理哪个职位的第几次尝试"这一信息，只用于日志。

use std::fmt::Display;

use crate::models::{Job, JobId};

/// 申请处理上下文
#[derive(Debug, Clone)]
pub struct ApplicationCtx {
    /// worker 编号（从1开始）
    pub worker_id: usize,

    pub job_id: JobId,

    /// 职位标题（仅用于日志显示）
    pub title: String,

    pub company: String,

    /// 本次是第几次重试（0 表示首次）
    pub retry_count: u32,
}

impl ApplicationCtx {
    pub fn new(worker_id: usize, job: &Job, retry_count: u32) -> Self {
        Self {
            worker_id,
            job_id: job.id,
            title: job.title.clone(),
            company: job.company.clone(),
            retry_count,
        }
    }
}

impl Display for ApplicationCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[作业 {} {} @ {}", self.worker_id, self.title, self.company)?;
        if self.retry_count > 0 {
            write!(f, " 重试#{}", self.retry_count)?;
        }
        write!(f, "]")
    }
}
