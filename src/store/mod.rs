//! 持久化存储 - 基础设施层
//!
//! `JobStore` 是队列与申请记录的唯一入口。唯一需要跨 worker 互斥的操作是
//! `claim_next`，实现必须保证同一职位只会被认领一次。

pub mod memory;
pub mod postgres;

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::models::{
    Application, ApplicationId, ChallengeAttempt, Job, JobId, JobStatus, NewJob, Platform,
    QueueStats,
};

pub use memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;

/// upsert 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub job: Job,
    /// 是否为新插入
    pub inserted: bool,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// 按 source_url 插入或合并
    ///
    /// 已存在时：`expired` 复活为 `initial`（`stage` 传入 `pending`），其余状态保持不变，
    /// 优先级取较大值并刷新 last_checked_at。
    async fn upsert_job(&self, new_job: &NewJob, initial: JobStatus) -> AppResult<UpsertOutcome>;

    async fn get_job(&self, id: JobId) -> AppResult<Job>;

    /// 原子地认领下一个可申请的职位并置为 `applying`
    ///
    /// `exclude` 中平台的职位不参与认领（这些平台当前已达申请上限）。
    async fn claim_next(&self, exclude: &[Platform]) -> AppResult<Option<Job>>;

    /// 条件迁移：当前状态必须在 `from` 中且状态机允许
    async fn transition(
        &self,
        id: JobId,
        from: &[JobStatus],
        to: JobStatus,
        note: Option<&str>,
    ) -> AppResult<Job>;

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> AppResult<Vec<Job>>;

    async fn stats(&self) -> AppResult<QueueStats>;

    /// 新建申请；同一职位已有占用中的申请时返回 `DuplicateApplication`
    async fn create_application(&self, application: &Application) -> AppResult<()>;

    /// 检查点写回；终态记录不可再覆盖
    async fn save_application(&self, application: &Application) -> AppResult<()>;

    /// 操作员接手后关闭该职位所有 `needs_manual` 申请（置为 `withdrawn`），返回关闭条数
    async fn withdraw_manual_applications(&self, job_id: JobId) -> AppResult<usize>;

    async fn get_application(&self, id: ApplicationId) -> AppResult<Application>;

    async fn list_applications(&self, job_id: JobId) -> AppResult<Vec<Application>>;

    async fn record_challenge(&self, attempt: &ChallengeAttempt) -> AppResult<()>;
}

/// 认领顺序：优先级降序，匹配分降序（无分数排最后），创建时间升序
pub fn claim_order(a: &Job, b: &Job) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| match (a.match_score, b.match_score) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// 新职位记录
pub(crate) fn job_from_new(new_job: &NewJob, status: JobStatus, now: DateTime<Utc>) -> Job {
    Job {
        id: uuid::Uuid::new_v4(),
        source_url: new_job.source_url.trim().to_string(),
        title: new_job.title.clone(),
        company: new_job.company.clone(),
        source: new_job.platform(),
        priority: new_job.clamped_priority(),
        match_score: new_job.match_score,
        deadline: new_job.deadline,
        status,
        is_active: true,
        last_checked_at: now,
        notes: String::new(),
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn job(priority: i32, score: Option<f64>, age_secs: i64) -> Job {
        let mut new_job = NewJob::new("https://acme.com/jobs/1", "Designer", "Acme", priority);
        new_job.match_score = score;
        job_from_new(&new_job, JobStatus::Queued, Utc::now() - Duration::seconds(age_secs))
    }

    #[test]
    fn claim_order_ranks_priority_then_score_then_age() {
        let mut jobs = vec![
            job(5, None, 100),
            job(5, Some(0.4), 10),
            job(9, None, 1),
            job(5, Some(0.9), 5),
            job(5, Some(0.9), 50),
        ];
        jobs.sort_by(claim_order);

        assert_eq!(jobs[0].priority, 9);
        assert_eq!(jobs[1].match_score, Some(0.9));
        assert!(jobs[1].created_at < jobs[2].created_at);
        assert_eq!(jobs[3].match_score, Some(0.4));
        assert_eq!(jobs[4].match_score, None);
    }
}
