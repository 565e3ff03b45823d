//! 队列管理 - 业务能力层
//!
//! 职位状态只通过这里迁移。失败不会自动重新入队。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::models::{Job, JobId, JobStatus, NewJob, Platform, QueueStats};
use crate::store::JobStore;

/// 队列管理服务
pub struct QueueManager {
    store: Arc<dyn JobStore>,
}

impl QueueManager {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// 入队（按 URL 去重）
    pub async fn enqueue(&self, new_job: NewJob) -> AppResult<JobId> {
        let outcome = self.store.upsert_job(&new_job, JobStatus::Queued).await?;
        if outcome.inserted {
            info!(
                "📥 入队: {} @ {} (优先级 {}, {})",
                outcome.job.title, outcome.job.company, outcome.job.priority, outcome.job.source
            );
        } else {
            debug!(
                "职位已存在，合并: {} (状态 {}, 优先级 {})",
                outcome.job.source_url, outcome.job.status, outcome.job.priority
            );
        }
        Ok(outcome.job.id)
    }

    /// 暂存为 pending，等待人工批准
    pub async fn stage(&self, new_job: NewJob) -> AppResult<JobId> {
        let outcome = self.store.upsert_job(&new_job, JobStatus::Pending).await?;
        Ok(outcome.job.id)
    }

    /// pending → queued
    pub async fn approve(&self, id: JobId) -> AppResult<Job> {
        self.store
            .transition(id, &[JobStatus::Pending], JobStatus::Queued, None)
            .await
    }

    pub async fn claim_next(&self) -> AppResult<Option<Job>> {
        self.claim_next_excluding(&[]).await
    }

    /// 认领时跳过已达申请上限的平台
    pub async fn claim_next_excluding(&self, capped: &[Platform]) -> AppResult<Option<Job>> {
        let claimed = self.store.claim_next(capped).await?;
        if let Some(job) = &claimed {
            debug!("🔒 认领: {} ({})", job.title, job.id);
        }
        Ok(claimed)
    }

    pub async fn mark_applied(&self, id: JobId) -> AppResult<Job> {
        self.store
            .transition(id, &[JobStatus::Applying], JobStatus::Applied, None)
            .await
    }

    /// 终态失败，原因追加到备注
    pub async fn mark_failed(&self, id: JobId, reason: &str) -> AppResult<Job> {
        self.store
            .transition(id, &[JobStatus::Applying], JobStatus::Failed, Some(reason))
            .await
    }

    pub async fn mark_expired(&self, id: JobId) -> AppResult<Job> {
        self.store
            .transition(
                id,
                &[JobStatus::Applying],
                JobStatus::Expired,
                Some("职位已下架"),
            )
            .await
    }

    /// 转人工，备注里留下人工完成的链接
    pub async fn mark_needs_manual(&self, id: JobId, reason: &str, link: &str) -> AppResult<Job> {
        let note = format!("{} ({})", reason, link);
        self.store
            .transition(
                id,
                &[JobStatus::Applying],
                JobStatus::NeedsManual,
                Some(&note),
            )
            .await
    }

    /// 归还认领（取消 / 限流）
    pub async fn release(&self, id: JobId) -> AppResult<Job> {
        let job = self
            .store
            .transition(id, &[JobStatus::Applying], JobStatus::Queued, None)
            .await?;
        debug!("🔓 归还认领: {}", job.id);
        Ok(job)
    }

    /// 操作员显式重新入队
    ///
    /// 从 `needs_manual` 重新入队时，先关闭操作员手上的申请记录。
    pub async fn requeue(&self, id: JobId) -> AppResult<Job> {
        let current = self.store.get_job(id).await?;
        if current.status == JobStatus::NeedsManual {
            let closed = self.store.withdraw_manual_applications(id).await?;
            debug!("关闭 {} 条转人工申请: {}", closed, id);
        }
        let job = self
            .store
            .transition(
                id,
                &[JobStatus::Failed, JobStatus::NeedsManual],
                JobStatus::Queued,
                Some("重新入队"),
            )
            .await?;
        info!("🔁 重新入队: {} @ {}", job.title, job.company);
        Ok(job)
    }

    pub async fn stats(&self) -> AppResult<QueueStats> {
        self.store.stats().await
    }

    pub async fn list_queued(&self, limit: usize) -> AppResult<Vec<Job>> {
        self.store.list_by_status(JobStatus::Queued, limit).await
    }

    /// 批量入队，单条失败只记录警告
    pub async fn enqueue_all(&self, jobs: Vec<NewJob>) -> usize {
        let mut count = 0;
        for new_job in jobs {
            let url = new_job.source_url.clone();
            match self.enqueue(new_job).await {
                Ok(_) => count += 1,
                Err(e) => warn!("⚠️ 入队失败 {}: {}", url, e),
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryJobStore;

    fn manager() -> QueueManager {
        QueueManager::new(Arc::new(InMemoryJobStore::new()))
    }

    #[tokio::test]
    async fn staged_job_is_not_claimable_until_approved() {
        let queue = manager();
        let id = queue
            .stage(NewJob::new("https://acme.com/jobs/1", "Designer", "Acme", 5))
            .await
            .unwrap();

        assert!(queue.claim_next().await.unwrap().is_none());
        queue.approve(id).await.unwrap();
        assert_eq!(queue.claim_next().await.unwrap().unwrap().id, id);
    }

    #[tokio::test]
    async fn requeue_only_from_failed_or_manual() {
        let queue = manager();
        let id = queue
            .enqueue(NewJob::new("https://acme.com/jobs/2", "Designer", "Acme", 5))
            .await
            .unwrap();
        assert!(queue.requeue(id).await.is_err());

        queue.claim_next().await.unwrap();
        queue.mark_failed(id, "form changed").await.unwrap();
        let job = queue.requeue(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.notes.contains("form changed"));
    }

    #[tokio::test]
    async fn restaging_an_expired_url_waits_for_approval() {
        let queue = manager();
        let job = NewJob::new("https://acme.com/jobs/3", "Designer", "Acme", 5);
        let id = queue.enqueue(job.clone()).await.unwrap();
        queue.claim_next().await.unwrap();
        queue.mark_expired(id).await.unwrap();

        assert_eq!(queue.stage(job).await.unwrap(), id);
        assert_eq!(
            queue.store().get_job(id).await.unwrap().status,
            JobStatus::Pending
        );
        assert!(queue.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn capped_platform_is_skipped_when_claiming() {
        let queue = manager();
        let linkedin = queue
            .enqueue(NewJob::new("https://www.linkedin.com/jobs/view/1", "Designer", "Acme", 9))
            .await
            .unwrap();
        let greenhouse = queue
            .enqueue(NewJob::new("https://boards.greenhouse.io/acme/jobs/2", "Designer", "Acme", 5))
            .await
            .unwrap();

        let claimed = queue
            .claim_next_excluding(&[Platform::Linkedin])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, greenhouse);
        assert!(queue
            .claim_next_excluding(&[Platform::Linkedin])
            .await
            .unwrap()
            .is_none());
        assert_eq!(queue.claim_next().await.unwrap().unwrap().id, linkedin);
    }
}
