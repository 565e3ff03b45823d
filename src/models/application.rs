use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::challenge::ChallengeAttempt;
use crate::models::field::FillResult;
use crate::models::job::JobId;

/// 申请记录 ID
pub type ApplicationId = Uuid;

/// 申请状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    InProgress,
    Submitted,
    NeedsManual,
    Failed,
    /// 被操作员取消
    Withdrawn,
    Expired,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::InProgress => "in_progress",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::NeedsManual => "needs_manual",
            ApplicationStatus::Failed => "failed",
            ApplicationStatus::Withdrawn => "withdrawn",
            ApplicationStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ApplicationStatus::InProgress)
    }

    /// 是否仍占用职位（同一职位最多一个）
    ///
    /// 转人工的申请仍由操作员持有，重新入队时先关闭为 `withdrawn`。
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ApplicationStatus::InProgress
                | ApplicationStatus::Submitted
                | ApplicationStatus::NeedsManual
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(ApplicationStatus::InProgress),
            "submitted" => Ok(ApplicationStatus::Submitted),
            "needs_manual" => Ok(ApplicationStatus::NeedsManual),
            "failed" => Ok(ApplicationStatus::Failed),
            "withdrawn" => Ok(ApplicationStatus::Withdrawn),
            "expired" => Ok(ApplicationStatus::Expired),
            other => Err(StoreError::Corrupt {
                field: "applications.status",
                value: other.to_string(),
            }),
        }
    }
}

/// 提交方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMethod {
    Auto,
    Manual,
}

impl SubmissionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionMethod::Auto => "auto",
            SubmissionMethod::Manual => "manual",
        }
    }
}

impl FromStr for SubmissionMethod {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(SubmissionMethod::Auto),
            "manual" => Ok(SubmissionMethod::Manual),
            other => Err(StoreError::Corrupt {
                field: "applications.submission_method",
                value: other.to_string(),
            }),
        }
    }
}

/// 一次申请尝试
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub job_id: JobId,
    pub status: ApplicationStatus,
    pub submission_method: SubmissionMethod,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub fields_filled: u32,
    pub fields_total: u32,
    pub failed_fields: Vec<String>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// 人工完成入口（原始职位链接）
    pub manual_url: Option<String>,
    /// 截图证据
    pub evidence_path: Option<PathBuf>,
    /// 已生成的材料（简历 / 求职信）
    pub materials: Vec<PathBuf>,
    #[serde(default)]
    pub challenge_attempts: Vec<ChallengeAttempt>,
}

impl Application {
    /// 为已认领的职位创建申请
    pub fn start(job_id: JobId, retry_count: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            status: ApplicationStatus::InProgress,
            submission_method: SubmissionMethod::Auto,
            started_at: Utc::now(),
            submitted_at: None,
            fields_filled: 0,
            fields_total: 0,
            failed_fields: Vec::new(),
            retry_count,
            last_error: None,
            manual_url: None,
            evidence_path: None,
            materials: Vec::new(),
            challenge_attempts: Vec::new(),
        }
    }

    /// 基于已结束的申请创建重试
    pub fn retry_of(previous: &Application) -> Self {
        let mut next = Self::start(previous.job_id, previous.retry_count + 1);
        next.materials = previous.materials.clone();
        next
    }

    /// 记录填表进度
    pub fn record_fill(&mut self, result: &FillResult) {
        self.fields_total = result.total_count as u32;
        self.fields_filled = (result.filled_count as u32).min(self.fields_total);
        self.failed_fields = result.failed_field_names.clone();
    }

    /// 记录错误（须在状态迁移之前调用）
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// 迁移到终态；终态记录不可再修改
    pub fn finish(&mut self, status: ApplicationStatus) -> Result<(), StoreError> {
        if self.status.is_terminal() || !status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        if status == ApplicationStatus::Submitted {
            self.submitted_at = Some(Utc::now());
        }
        if status == ApplicationStatus::NeedsManual {
            self.submission_method = SubmissionMethod::Manual;
        }
        self.status = status;
        Ok(())
    }
}
