use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// 职位 ID
pub type JobId = Uuid;

/// 优先级取值范围
pub const MIN_PRIORITY: i32 = 1;
pub const MAX_PRIORITY: i32 = 10;
pub const DEFAULT_PRIORITY: i32 = 5;

/// 职位生命周期状态
///
/// `pending → queued → applying → {applied | failed | expired | needs_manual}`，
/// `failed` / `needs_manual` 可由外部重新入队。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Applying,
    Applied,
    Failed,
    Expired,
    NeedsManual,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Applying => "applying",
            JobStatus::Applied => "applied",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
            JobStatus::NeedsManual => "needs_manual",
        }
    }

    /// 是否允许迁移到目标状态
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Queued)
                | (Queued, Applying)
                | (Applying, Applied)
                | (Applying, Failed)
                | (Applying, Expired)
                | (Applying, NeedsManual)
                // 取消时释放认领
                | (Applying, Queued)
                | (Failed, Queued)
                | (NeedsManual, Queued)
                // 过期职位被重新发现
                | (Expired, Queued)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Applied | JobStatus::Failed | JobStatus::Expired | JobStatus::NeedsManual
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "queued" => Ok(JobStatus::Queued),
            "applying" => Ok(JobStatus::Applying),
            "applied" => Ok(JobStatus::Applied),
            "failed" => Ok(JobStatus::Failed),
            "expired" => Ok(JobStatus::Expired),
            "needs_manual" => Ok(JobStatus::NeedsManual),
            other => Err(StoreError::Corrupt {
                field: "jobs.status",
                value: other.to_string(),
            }),
        }
    }
}

/// 招聘平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linkedin,
    Indeed,
    Glassdoor,
    Greenhouse,
    Lever,
    Workday,
    CompanySite,
}

impl Platform {
    /// 按 URL 识别平台
    pub fn detect(url: &str) -> Self {
        let url_lower = url.to_lowercase();
        if url_lower.contains("linkedin.com") {
            Platform::Linkedin
        } else if url_lower.contains("indeed.com") {
            Platform::Indeed
        } else if url_lower.contains("glassdoor.com") {
            Platform::Glassdoor
        } else if url_lower.contains("greenhouse.io") {
            Platform::Greenhouse
        } else if url_lower.contains("lever.co") {
            Platform::Lever
        } else if url_lower.contains("workday.com") || url_lower.contains("myworkdayjobs") {
            Platform::Workday
        } else {
            Platform::CompanySite
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Linkedin => "linkedin",
            Platform::Indeed => "indeed",
            Platform::Glassdoor => "glassdoor",
            Platform::Greenhouse => "greenhouse",
            Platform::Lever => "lever",
            Platform::Workday => "workday",
            Platform::CompanySite => "company_site",
        }
    }

    /// 从名称解析，未知名称视为公司官网
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "linkedin" => Platform::Linkedin,
            "indeed" => Platform::Indeed,
            "glassdoor" => Platform::Glassdoor,
            "greenhouse" => Platform::Greenhouse,
            "lever" => Platform::Lever,
            "workday" => Platform::Workday,
            _ => Platform::CompanySite,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 已发现的职位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source_url: String,
    pub title: String,
    pub company: String,
    pub source: Platform,
    pub priority: i32,
    pub match_score: Option<f64>,
    pub deadline: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub is_active: bool,
    pub last_checked_at: DateTime<Utc>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// 是否可被认领
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Queued
            && self.is_active
            && self.deadline.map_or(true, |deadline| deadline > now)
    }

    /// 追加一条备注（不覆盖已有内容）
    pub fn append_note(&mut self, note: &str) {
        if note.is_empty() {
            return;
        }
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes.push_str(note);
    }
}

/// 入队请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub source_url: String,
    pub title: String,
    pub company: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub match_score: Option<f64>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl NewJob {
    pub fn new(
        source_url: impl Into<String>,
        title: impl Into<String>,
        company: impl Into<String>,
        priority: i32,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            title: title.into(),
            company: company.into(),
            source: None,
            priority,
            match_score: None,
            deadline: None,
        }
    }

    pub fn with_match_score(mut self, score: f64) -> Self {
        self.match_score = Some(score);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// 确定平台：URL 识别优先，否则使用调用方给出的名称
    pub fn platform(&self) -> Platform {
        match Platform::detect(&self.source_url) {
            Platform::CompanySite => self
                .source
                .as_deref()
                .map(Platform::from_name)
                .unwrap_or(Platform::CompanySite),
            detected => detected,
        }
    }

    pub fn clamped_priority(&self) -> i32 {
        self.priority.clamp(MIN_PRIORITY, MAX_PRIORITY)
    }
}

/// 各状态的职位数量
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub queued: usize,
    pub applying: usize,
    pub applied: usize,
    pub failed: usize,
    pub expired: usize,
    pub needs_manual: usize,
}

impl QueueStats {
    pub fn add(&mut self, status: JobStatus, count: usize) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Queued => self.queued += count,
            JobStatus::Applying => self.applying += count,
            JobStatus::Applied => self.applied += count,
            JobStatus::Failed => self.failed += count,
            JobStatus::Expired => self.expired += count,
            JobStatus::NeedsManual => self.needs_manual += count,
        }
    }

    pub fn total(&self) -> usize {
        self.pending
            + self.queued
            + self.applying
            + self.applied
            + self.failed
            + self.expired
            + self.needs_manual
    }
}
