use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{AppResult, StoreError};
use crate::models::{
    Application, ApplicationId, ApplicationStatus, ChallengeAttempt, Job, JobId, JobStatus, NewJob,
    Platform, QueueStats,
};
use crate::store::{claim_order, job_from_new, JobStore, UpsertOutcome};

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    by_url: HashMap<String, JobId>,
    applications: HashMap<ApplicationId, Application>,
    challenge_attempts: Vec<ChallengeAttempt>,
}

/// 进程内存储，所有操作在同一把锁内完成
#[derive(Default)]
pub struct InMemoryJobStore {
    state: Mutex<State>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已记录的验证码处理尝试
    pub async fn challenge_attempts(&self) -> Vec<ChallengeAttempt> {
        self.state.lock().await.challenge_attempts.clone()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn upsert_job(&self, new_job: &NewJob, initial: JobStatus) -> AppResult<UpsertOutcome> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let url = new_job.source_url.trim();

        if let Some(id) = state.by_url.get(url).copied() {
            let job = state
                .jobs
                .get_mut(&id)
                .ok_or(StoreError::JobNotFound(id))?;
            if job.status == JobStatus::Expired {
                job.status = initial;
                job.is_active = true;
            }
            job.priority = job.priority.max(new_job.clamped_priority());
            job.last_checked_at = now;
            return Ok(UpsertOutcome {
                job: job.clone(),
                inserted: false,
            });
        }

        let job = job_from_new(new_job, initial, now);
        state.by_url.insert(job.source_url.clone(), job.id);
        state.jobs.insert(job.id, job.clone());
        Ok(UpsertOutcome {
            job,
            inserted: true,
        })
    }

    async fn get_job(&self, id: JobId) -> AppResult<Job> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::JobNotFound(id).into())
    }

    async fn claim_next(&self, exclude: &[Platform]) -> AppResult<Option<Job>> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let next_id = state
            .jobs
            .values()
            .filter(|job| job.is_claimable(now) && !exclude.contains(&job.source))
            .min_by(|a, b| claim_order(a, b))
            .map(|job| job.id);

        let Some(id) = next_id else {
            return Ok(None);
        };
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound(id))?;
        job.status = JobStatus::Applying;
        Ok(Some(job.clone()))
    }

    async fn transition(
        &self,
        id: JobId,
        from: &[JobStatus],
        to: JobStatus,
        note: Option<&str>,
    ) -> AppResult<Job> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound(id))?;

        if !from.contains(&job.status) || !job.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                from: job.status.to_string(),
                to: to.to_string(),
            }
            .into());
        }
        job.status = to;
        if let Some(note) = note {
            job.append_note(note);
        }
        Ok(job.clone())
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> AppResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by(claim_order);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn stats(&self) -> AppResult<QueueStats> {
        let state = self.state.lock().await;
        let mut stats = QueueStats::default();
        for job in state.jobs.values() {
            stats.add(job.status, 1);
        }
        Ok(stats)
    }

    async fn create_application(&self, application: &Application) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if !state.jobs.contains_key(&application.job_id) {
            return Err(StoreError::JobNotFound(application.job_id).into());
        }
        let occupied = state
            .applications
            .values()
            .any(|a| a.job_id == application.job_id && a.status.is_active());
        if occupied {
            return Err(StoreError::DuplicateApplication {
                job_id: application.job_id,
            }
            .into());
        }
        state
            .applications
            .insert(application.id, application.clone());
        Ok(())
    }

    async fn save_application(&self, application: &Application) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let stored = state
            .applications
            .get_mut(&application.id)
            .ok_or(StoreError::ApplicationNotFound(application.id))?;
        if stored.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                from: stored.status.to_string(),
                to: application.status.to_string(),
            }
            .into());
        }
        *stored = application.clone();
        Ok(())
    }

    async fn withdraw_manual_applications(&self, job_id: JobId) -> AppResult<usize> {
        let mut state = self.state.lock().await;
        let mut closed = 0;
        for application in state.applications.values_mut() {
            if application.job_id == job_id && application.status == ApplicationStatus::NeedsManual
            {
                application.status = ApplicationStatus::Withdrawn;
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn get_application(&self, id: ApplicationId) -> AppResult<Application> {
        let state = self.state.lock().await;
        state
            .applications
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::ApplicationNotFound(id).into())
    }

    async fn list_applications(&self, job_id: JobId) -> AppResult<Vec<Application>> {
        let state = self.state.lock().await;
        let mut applications: Vec<Application> = state
            .applications
            .values()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect();
        applications.sort_by_key(|a| (a.retry_count, a.started_at));
        Ok(applications)
    }

    async fn record_challenge(&self, attempt: &ChallengeAttempt) -> AppResult<()> {
        self.state
            .lock()
            .await
            .challenge_attempts
            .push(attempt.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::ApplicationStatus;

    #[tokio::test]
    async fn terminal_application_is_frozen() {
        let store = InMemoryJobStore::new();
        let outcome = store
            .upsert_job(
                &NewJob::new("https://acme.com/jobs/9", "Designer", "Acme", 5),
                JobStatus::Queued,
            )
            .await
            .unwrap();

        let mut app = Application::start(outcome.job.id, 0);
        store.create_application(&app).await.unwrap();

        let second = Application::start(outcome.job.id, 0);
        assert!(matches!(
            store.create_application(&second).await,
            Err(AppError::Store(StoreError::DuplicateApplication { .. }))
        ));

        app.record_error("form changed");
        app.finish(ApplicationStatus::Failed).unwrap();
        store.save_application(&app).await.unwrap();
        assert!(store.save_application(&app).await.is_err());

        // 失败后允许新的尝试
        let retry = Application::retry_of(&app);
        store.create_application(&retry).await.unwrap();
        assert_eq!(store.list_applications(outcome.job.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn transition_requires_expected_source_state() {
        let store = InMemoryJobStore::new();
        let job = store
            .upsert_job(
                &NewJob::new("https://acme.com/jobs/10", "Designer", "Acme", 5),
                JobStatus::Queued,
            )
            .await
            .unwrap()
            .job;

        let err = store
            .transition(job.id, &[JobStatus::Applying], JobStatus::Applied, None)
            .await;
        assert!(err.is_err());
        assert_eq!(store.get_job(job.id).await.unwrap().status, JobStatus::Queued);
    }
}
