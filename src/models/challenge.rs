use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::application::ApplicationId;

/// 验证码类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    /// 只需勾选一次的确认框
    CheckboxOnly,
    RecaptchaV2,
    RecaptchaV3,
    Hcaptcha,
    Funcaptcha,
    Turnstile,
    /// 图片选择 / 拼图
    Image,
    Text,
    Unknown,
}

impl ChallengeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeKind::CheckboxOnly => "checkbox_only",
            ChallengeKind::RecaptchaV2 => "recaptcha_v2",
            ChallengeKind::RecaptchaV3 => "recaptcha_v3",
            ChallengeKind::Hcaptcha => "hcaptcha",
            ChallengeKind::Funcaptcha => "funcaptcha",
            ChallengeKind::Turnstile => "turnstile",
            ChallengeKind::Image => "image",
            ChallengeKind::Text => "text",
            ChallengeKind::Unknown => "unknown",
        }
    }

    /// 第一层是否可以尝试一次勾选
    pub fn supports_checkbox(self) -> bool {
        matches!(self, ChallengeKind::CheckboxOnly | ChallengeKind::RecaptchaV2)
    }

    /// 打码服务是否需要页面截图而不是 site key
    pub fn needs_image(self) -> bool {
        matches!(self, ChallengeKind::Image | ChallengeKind::Text)
    }

    /// 是否可以交给打码服务
    pub fn is_service_solvable(self) -> bool {
        !matches!(self, ChallengeKind::CheckboxOnly | ChallengeKind::Unknown)
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            ChallengeKind::CheckboxOnly,
            ChallengeKind::RecaptchaV2,
            ChallengeKind::RecaptchaV3,
            ChallengeKind::Hcaptcha,
            ChallengeKind::Funcaptcha,
            ChallengeKind::Turnstile,
            ChallengeKind::Image,
            ChallengeKind::Text,
            ChallengeKind::Unknown,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == s)
        .ok_or_else(|| StoreError::Corrupt {
            field: "challenge_attempts.kind",
            value: s.to_string(),
        })
    }
}

/// 页面上检测到的验证码
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Uuid,
    pub kind: ChallengeKind,
    pub site_key: Option<String>,
    pub page_url: String,
    pub detected_at: DateTime<Utc>,
}

impl Challenge {
    pub fn new(kind: ChallengeKind, site_key: Option<String>, page_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            site_key,
            page_url: page_url.into(),
            detected_at: Utc::now(),
        }
    }

    /// 会话缓存使用的站点域名
    pub fn domain(&self) -> String {
        site_domain(&self.page_url)
    }

    /// 判断两次检测是否为同一个验证码界面
    pub fn same_surface(&self, other: &Challenge) -> bool {
        self.kind == other.kind && self.site_key == other.site_key
    }
}

/// 从 URL 中取出主机名，解析失败时原样返回
pub fn site_domain(page_url: &str) -> String {
    url::Url::parse(page_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_lowercase()))
        .unwrap_or_else(|| page_url.to_lowercase())
}

/// 处理层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    /// 自动处理，零成本
    Auto = 1,
    /// 付费打码服务
    Service = 2,
    /// 人工处理
    Human = 3,
}

impl ResolutionTier {
    pub fn number(self) -> i16 {
        self as i16
    }

    pub fn from_number(n: i16) -> Option<Self> {
        match n {
            1 => Some(ResolutionTier::Auto),
            2 => Some(ResolutionTier::Service),
            3 => Some(ResolutionTier::Human),
            _ => None,
        }
    }
}

/// 一次验证码处理记录（每个尝试过的层级一条）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeAttempt {
    pub id: Uuid,
    pub application_id: Option<ApplicationId>,
    pub kind: ChallengeKind,
    pub site: String,
    pub tier: ResolutionTier,
    pub solved: bool,
    pub elapsed_ms: u64,
    pub cost_usd: f64,
    pub error: Option<String>,
}

/// 验证码处理结果
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionOutcome {
    pub solved: bool,
    pub tier_used: ResolutionTier,
    pub elapsed_ms: u64,
    pub cost_usd: f64,
    pub error: Option<String>,
    /// 按顺序记录的每层尝试
    pub attempts: Vec<ChallengeAttempt>,
}

impl ResolutionOutcome {
    /// 尝试过的层级（按顺序）
    pub fn tiers_tried(&self) -> Vec<ResolutionTier> {
        self.attempts.iter().map(|a| a.tier).collect()
    }
}
