//! 单个职位处理器 - 编排层
//!
//! ## 职责
//!
//! 对一个已认领的职位：
//! 1. 检查申请频率（超限则归还认领）
//! 2. 创建申请记录，交给 `ApplicationFlow` 执行
//! 3. 临时错误按重试策略新建一条申请记录再试
//! 4. 把最终结果落库：先写申请记录，再迁移职位状态
//! 5. 中途出错时尽力把当前申请记录标记为失败，不留下进行中的记录

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::{RateLimited, RateLimiter};
use crate::models::{Application, ApplicationStatus, Job, UserProfile};
use crate::services::{EvidenceWriter, QueueManager};
use crate::utils::logging::truncate_text;
use crate::workflow::{ApplicationCtx, ApplicationFlow, AttemptOutcome, RetryPolicy};

/// 一个职位的最终去向
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Applied,
    NeedsManual,
    Failed,
    /// 职位已下架
    Expired,
    /// 被取消，职位已归还队列
    Released,
    /// 超过申请频率，职位已归还队列
    Deferred(RateLimited),
}

pub struct JobProcessor {
    queue: Arc<QueueManager>,
    flow: Arc<ApplicationFlow>,
    rate_limiter: Arc<RateLimiter>,
    evidence: Arc<EvidenceWriter>,
    profile: Arc<UserProfile>,
    retry: RetryPolicy,
}

impl JobProcessor {
    pub fn new(
        queue: Arc<QueueManager>,
        flow: Arc<ApplicationFlow>,
        rate_limiter: Arc<RateLimiter>,
        evidence: Arc<EvidenceWriter>,
        profile: Arc<UserProfile>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            flow,
            rate_limiter,
            evidence,
            profile,
            retry,
        }
    }

    /// 处理一个已认领（`applying`）的职位
    pub async fn process(
        &self,
        job: &Job,
        worker_id: usize,
        cancel: &CancellationToken,
    ) -> AppResult<JobResult> {
        if let Err(limited) = self.rate_limiter.try_acquire(job.source) {
            info!(
                "[作业 {}] ⏳ 申请频率已达上限 ({:?})，{} 后再试",
                worker_id,
                limited.scope,
                limited.retry_at.format("%H:%M:%S")
            );
            self.queue.release(job.id).await?;
            return Ok(JobResult::Deferred(limited));
        }

        let mut application = Application::start(job.id, 0);
        self.queue.store().create_application(&application).await?;

        match self.run_attempts(job, &mut application, worker_id, cancel).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.abandon(&application, &e, worker_id).await;
                Err(e)
            }
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// 执行申请；`application` 始终指向当前这条记录
    async fn run_attempts(
        &self,
        job: &Job,
        application: &mut Application,
        worker_id: usize,
        cancel: &CancellationToken,
    ) -> AppResult<JobResult> {
        let store = self.queue.store();
        loop {
            let ctx = ApplicationCtx::new(worker_id, job, application.retry_count);
            let outcome = self
                .flow
                .run(job, application, &self.profile, &ctx, cancel)
                .await;

            match outcome {
                AttemptOutcome::Failed { error }
                    if self.retry.should_retry(&error, application.retry_count) =>
                {
                    warn!("{} 🔁 临时错误，重试: {}", ctx, error);
                    application.record_error(error.to_string());
                    application.finish(ApplicationStatus::Failed)?;
                    store.save_application(application).await?;

                    let next = Application::retry_of(application);
                    store.create_application(&next).await?;
                    *application = next;
                }
                other => return self.finalize(job, application, other, &ctx).await,
            }
        }
    }

    /// 出错后把仍在进行中的申请记录标记为失败（尽力而为）
    async fn abandon(&self, application: &Application, cause: &AppError, worker_id: usize) {
        let store = self.queue.store();
        let stored = match store.get_application(application.id).await {
            Ok(stored) if !stored.status.is_terminal() => stored,
            Ok(_) => return,
            Err(e) => {
                warn!("[作业 {}] ⚠️ 读取申请记录失败: {}", worker_id, e);
                return;
            }
        };

        // 内存中已迁移到终态但没写进去时，以库里的记录为准
        let mut record = if application.status.is_terminal() {
            stored
        } else {
            application.clone()
        };
        record.record_error(cause.to_string());
        if let Err(e) = record.finish(ApplicationStatus::Failed) {
            warn!("[作业 {}] ⚠️ 申请记录无法标记失败: {}", worker_id, e);
            return;
        }
        match store.save_application(&record).await {
            Ok(()) => warn!("[作业 {}] 🧹 申请记录已标记失败: {}", worker_id, record.id),
            Err(e) => warn!("[作业 {}] ⚠️ 申请记录标记失败未生效: {}", worker_id, e),
        }
    }

    /// 先写申请记录，再迁移职位状态
    async fn finalize(
        &self,
        job: &Job,
        application: &mut Application,
        outcome: AttemptOutcome,
        ctx: &ApplicationCtx,
    ) -> AppResult<JobResult> {
        let store = self.queue.store();
        let link = application
            .manual_url
            .clone()
            .unwrap_or_else(|| job.source_url.clone());

        match outcome {
            AttemptOutcome::Submitted => {
                application.finish(ApplicationStatus::Submitted)?;
                store.save_application(application).await?;
                self.queue.mark_applied(job.id).await?;
                info!("{} 🎉 申请成功", ctx);
                Ok(JobResult::Applied)
            }
            AttemptOutcome::NeedsManual { reason } => {
                application.record_error(reason.clone());
                application.finish(ApplicationStatus::NeedsManual)?;
                store.save_application(application).await?;
                self.write_followup(job, application, ctx).await;
                self.queue.mark_needs_manual(job.id, &reason, &link).await?;
                warn!("{} 🙋 转人工: {}", ctx, truncate_text(&reason, 120));
                Ok(JobResult::NeedsManual)
            }
            AttemptOutcome::Failed { error } if error.is_listing_removed() => {
                application.record_error(error.to_string());
                application.finish(ApplicationStatus::Failed)?;
                store.save_application(application).await?;
                self.queue.mark_expired(job.id).await?;
                info!("{} 🗑️ 职位已下架，标记为过期", ctx);
                Ok(JobResult::Expired)
            }
            AttemptOutcome::Failed { error } => {
                let reason = error.to_string();
                application.record_error(reason.clone());
                application.finish(ApplicationStatus::Failed)?;
                store.save_application(application).await?;
                self.write_followup(job, application, ctx).await;
                self.queue.mark_failed(job.id, &reason).await?;
                error!("{} ❌ 申请失败: {}", ctx, truncate_text(&reason, 120));
                Ok(JobResult::Failed)
            }
            AttemptOutcome::Cancelled => {
                application.record_error(AppError::Cancelled.to_string());
                application.finish(ApplicationStatus::Withdrawn)?;
                store.save_application(application).await?;
                self.queue.release(job.id).await?;
                warn!("{} ⛔ 已取消，职位归还队列", ctx);
                Ok(JobResult::Released)
            }
        }
    }

    async fn write_followup(&self, job: &Job, application: &Application, ctx: &ApplicationCtx) {
        if let Err(e) = self.evidence.write_followup(job, application).await {
            warn!("{} ⚠️ 写入人工待办失败: {}", ctx, e);
        }
    }
}
