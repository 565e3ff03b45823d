//! PostgreSQL 存储
//!
//! 认领使用 `FOR UPDATE SKIP LOCKED`，多个进程同时认领也不会拿到同一行。

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppResult, StoreError};
use crate::models::{
    Application, ApplicationId, ChallengeAttempt, Job, JobId, JobStatus, NewJob, Platform,
    QueueStats, ResolutionTier,
};
use crate::store::{JobStore, UpsertOutcome};

const JOB_COLUMNS: &str = "id, source_url, title, company, source, priority, match_score, \
     deadline, status, is_active, last_checked_at, notes, created_at";

const APPLICATION_COLUMNS: &str = "id, job_id, status, submission_method, started_at, \
     submitted_at, fields_filled, fields_total, failed_fields, retry_count, last_error, \
     manual_url, evidence_path, materials";

#[derive(FromRow)]
struct JobRow {
    id: Uuid,
    source_url: String,
    title: String,
    company: String,
    source: String,
    priority: i32,
    match_score: Option<f64>,
    deadline: Option<DateTime<Utc>>,
    status: String,
    is_active: bool,
    last_checked_at: DateTime<Utc>,
    notes: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            source_url: row.source_url,
            title: row.title,
            company: row.company,
            source: Platform::from_name(&row.source),
            priority: row.priority,
            match_score: row.match_score,
            deadline: row.deadline,
            status: row.status.parse()?,
            is_active: row.is_active,
            last_checked_at: row.last_checked_at,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct UpsertRow {
    #[sqlx(flatten)]
    job: JobRow,
    inserted: bool,
}

#[derive(FromRow)]
struct ApplicationRow {
    id: Uuid,
    job_id: Uuid,
    status: String,
    submission_method: String,
    started_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    fields_filled: i32,
    fields_total: i32,
    failed_fields: Vec<String>,
    retry_count: i32,
    last_error: Option<String>,
    manual_url: Option<String>,
    evidence_path: Option<String>,
    materials: Vec<String>,
}

impl TryFrom<ApplicationRow> for Application {
    type Error = StoreError;

    fn try_from(row: ApplicationRow) -> Result<Self, Self::Error> {
        Ok(Application {
            id: row.id,
            job_id: row.job_id,
            status: row.status.parse()?,
            submission_method: row.submission_method.parse()?,
            started_at: row.started_at,
            submitted_at: row.submitted_at,
            fields_filled: row.fields_filled.max(0) as u32,
            fields_total: row.fields_total.max(0) as u32,
            failed_fields: row.failed_fields,
            retry_count: row.retry_count.max(0) as u32,
            last_error: row.last_error,
            manual_url: row.manual_url,
            evidence_path: row.evidence_path.map(PathBuf::from),
            materials: row.materials.into_iter().map(PathBuf::from).collect(),
            challenge_attempts: Vec::new(),
        })
    }
}

#[derive(FromRow)]
struct ChallengeAttemptRow {
    id: Uuid,
    application_id: Option<Uuid>,
    kind: String,
    site: String,
    tier: i16,
    solved: bool,
    elapsed_ms: i64,
    cost_usd: f64,
    error: Option<String>,
}

impl TryFrom<ChallengeAttemptRow> for ChallengeAttempt {
    type Error = StoreError;

    fn try_from(row: ChallengeAttemptRow) -> Result<Self, Self::Error> {
        let tier = ResolutionTier::from_number(row.tier).ok_or_else(|| StoreError::Corrupt {
            field: "challenge_attempts.tier",
            value: row.tier.to_string(),
        })?;
        Ok(ChallengeAttempt {
            id: row.id,
            application_id: row.application_id,
            kind: row.kind.parse()?,
            site: row.site,
            tier,
            solved: row.solved,
            elapsed_ms: row.elapsed_ms.max(0) as u64,
            cost_usd: row.cost_usd,
            error: row.error,
        })
    }
}

fn path_strings(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.display().to_string()).collect()
}

/// PostgreSQL 实现
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 连接数据库并执行迁移
    pub async fn connect(database_url: &str, max_connections: u32) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(StoreError::from)?;
        info!("🗄️ 数据库已连接，迁移完成");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn job_exists(&self, id: JobId) -> AppResult<Option<JobStatus>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(status.map(|s| s.parse()).transpose()?)
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn upsert_job(&self, new_job: &NewJob, initial: JobStatus) -> AppResult<UpsertOutcome> {
        // xmax = 0 表示本次是插入而不是更新
        let sql = format!(
            r#"
            INSERT INTO jobs (id, source_url, title, company, source, priority, match_score,
                              deadline, status, is_active, last_checked_at, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE, NOW(), '', NOW())
            ON CONFLICT (source_url) DO UPDATE SET
                status = CASE WHEN jobs.status = 'expired' THEN EXCLUDED.status ELSE jobs.status END,
                is_active = CASE WHEN jobs.status = 'expired' THEN TRUE ELSE jobs.is_active END,
                priority = GREATEST(jobs.priority, EXCLUDED.priority),
                last_checked_at = NOW()
            RETURNING {JOB_COLUMNS}, (xmax = 0) AS inserted
            "#
        );
        let row = sqlx::query_as::<_, UpsertRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(new_job.source_url.trim())
            .bind(&new_job.title)
            .bind(&new_job.company)
            .bind(new_job.platform().as_str())
            .bind(new_job.clamped_priority())
            .bind(new_job.match_score)
            .bind(new_job.deadline)
            .bind(initial.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(UpsertOutcome {
            inserted: row.inserted,
            job: row.job.try_into()?,
        })
    }

    async fn get_job(&self, id: JobId) -> AppResult<Job> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::JobNotFound(id))?;
        Ok(row.try_into()?)
    }

    async fn claim_next(&self, exclude: &[Platform]) -> AppResult<Option<Job>> {
        let excluded: Vec<String> = exclude.iter().map(|p| p.as_str().to_string()).collect();
        let sql = format!(
            r#"
            WITH next_job AS (
                SELECT id
                FROM jobs
                WHERE status = 'queued'
                  AND is_active
                  AND (deadline IS NULL OR deadline > NOW())
                  AND source <> ALL($1::TEXT[])
                ORDER BY priority DESC, match_score DESC NULLS LAST, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'applying'
            WHERE id IN (SELECT id FROM next_job)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(&excluded)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Job::try_from).transpose()?)
    }

    async fn transition(
        &self,
        id: JobId,
        from: &[JobStatus],
        to: JobStatus,
        note: Option<&str>,
    ) -> AppResult<Job> {
        let allowed: Vec<String> = from
            .iter()
            .filter(|status| status.can_transition_to(to))
            .map(|status| status.as_str().to_string())
            .collect();

        let sql = format!(
            r#"
            UPDATE jobs
            SET status = $2,
                notes = CASE
                    WHEN $4::TEXT IS NULL OR $4 = '' THEN notes
                    WHEN notes = '' THEN $4
                    ELSE notes || E'\n' || $4
                END
            WHERE id = $1 AND status = ANY($3)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .bind(to.as_str())
            .bind(&allowed)
            .bind(note)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(row.try_into()?),
            None => match self.job_exists(id).await? {
                Some(current) => Err(StoreError::InvalidTransition {
                    from: current.to_string(),
                    to: to.to_string(),
                }
                .into()),
                None => Err(StoreError::JobNotFound(id).into()),
            },
        }
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> AppResult<Vec<Job>> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status = $1
            ORDER BY priority DESC, match_score DESC NULLS LAST, created_at ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(status.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| Job::try_from(row).map_err(Into::into))
            .collect()
    }

    async fn stats(&self) -> AppResult<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let mut stats = QueueStats::default();
        for (status, count) in rows {
            stats.add(status.parse()?, count.max(0) as usize);
        }
        Ok(stats)
    }

    async fn create_application(&self, application: &Application) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO applications (id, job_id, status, submission_method, started_at,
                                      submitted_at, fields_filled, fields_total, failed_fields,
                                      retry_count, last_error, manual_url, evidence_path, materials)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(application.id)
        .bind(application.job_id)
        .bind(application.status.as_str())
        .bind(application.submission_method.as_str())
        .bind(application.started_at)
        .bind(application.submitted_at)
        .bind(application.fields_filled as i32)
        .bind(application.fields_total as i32)
        .bind(&application.failed_fields)
        .bind(application.retry_count as i32)
        .bind(&application.last_error)
        .bind(&application.manual_url)
        .bind(
            application
                .evidence_path
                .as_ref()
                .map(|p| p.display().to_string()),
        )
        .bind(path_strings(&application.materials))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateApplication {
                    job_id: application.job_id,
                }
                .into())
            }
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                Err(StoreError::JobNotFound(application.job_id).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save_application(&self, application: &Application) -> AppResult<()> {
        // 只有进行中的记录可以被覆盖
        let result = sqlx::query(
            r#"
            UPDATE applications
            SET status = $2,
                submission_method = $3,
                submitted_at = $4,
                fields_filled = $5,
                fields_total = $6,
                failed_fields = $7,
                last_error = $8,
                manual_url = $9,
                evidence_path = $10,
                materials = $11
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(application.id)
        .bind(application.status.as_str())
        .bind(application.submission_method.as_str())
        .bind(application.submitted_at)
        .bind(application.fields_filled as i32)
        .bind(application.fields_total as i32)
        .bind(&application.failed_fields)
        .bind(&application.last_error)
        .bind(&application.manual_url)
        .bind(
            application
                .evidence_path
                .as_ref()
                .map(|p| p.display().to_string()),
        )
        .bind(path_strings(&application.materials))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        let stored = self.get_application(application.id).await?;
        Err(StoreError::InvalidTransition {
            from: stored.status.to_string(),
            to: application.status.to_string(),
        }
        .into())
    }

    async fn withdraw_manual_applications(&self, job_id: JobId) -> AppResult<usize> {
        let result = sqlx::query(
            "UPDATE applications SET status = 'withdrawn' WHERE job_id = $1 AND status = 'needs_manual'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn get_application(&self, id: ApplicationId) -> AppResult<Application> {
        let sql = format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = $1");
        let row = sqlx::query_as::<_, ApplicationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::ApplicationNotFound(id))?;
        let mut application = Application::try_from(row)?;

        let attempts = sqlx::query_as::<_, ChallengeAttemptRow>(
            r#"
            SELECT id, application_id, kind, site, tier, solved, elapsed_ms, cost_usd, error
            FROM challenge_attempts
            WHERE application_id = $1
            ORDER BY created_at ASC, tier ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        application.challenge_attempts = attempts
            .into_iter()
            .map(ChallengeAttempt::try_from)
            .collect::<Result<_, _>>()?;
        Ok(application)
    }

    async fn list_applications(&self, job_id: JobId) -> AppResult<Vec<Application>> {
        let sql = format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE job_id = $1 \
             ORDER BY retry_count ASC, started_at ASC"
        );
        let rows = sqlx::query_as::<_, ApplicationRow>(&sql)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| Application::try_from(row).map_err(Into::into))
            .collect()
    }

    async fn record_challenge(&self, attempt: &ChallengeAttempt) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO challenge_attempts (id, application_id, kind, site, tier, solved,
                                            elapsed_ms, cost_usd, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.application_id)
        .bind(attempt.kind.as_str())
        .bind(&attempt.site)
        .bind(attempt.tier.number())
        .bind(attempt.solved)
        .bind(attempt.elapsed_ms as i64)
        .bind(attempt.cost_usd)
        .bind(&attempt.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
