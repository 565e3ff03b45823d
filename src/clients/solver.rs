/// 打码服务客户端
///
/// 两个服务的协议不同，但对外都是"提交任务 → 轮询结果"两步。
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{AppError, AppResult, SolverError};
use crate::models::ChallengeKind;

/// 提交给打码服务的任务
#[derive(Debug, Clone, PartialEq)]
pub struct SolveTask {
    pub kind: ChallengeKind,
    pub site_key: Option<String>,
    pub page_url: String,
    /// 图片 / 文字验证码的截图
    pub image_base64: Option<String>,
}

/// 轮询结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// 已解出，附带 token（或识别出的文字）
    Ready(String),
    /// 还没有结果
    Pending,
}

#[async_trait]
pub trait SolvingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// 单次打码的预估花费（美元）
    fn estimated_cost(&self, kind: ChallengeKind) -> f64;

    /// 提交任务，返回任务编号
    async fn submit(&self, task: &SolveTask) -> AppResult<String>;

    /// 查询任务结果
    async fn poll(&self, ticket: &str) -> AppResult<PollStatus>;
}

/// 按类型的单价（美元 / 次）
pub fn price_for(kind: ChallengeKind) -> f64 {
    match kind {
        ChallengeKind::RecaptchaV2 => 0.003,
        ChallengeKind::RecaptchaV3 => 0.004,
        ChallengeKind::Hcaptcha => 0.003,
        ChallengeKind::Funcaptcha => 0.004,
        ChallengeKind::Turnstile => 0.003,
        ChallengeKind::Image | ChallengeKind::Text => 0.001,
        ChallengeKind::CheckboxOnly | ChallengeKind::Unknown => 0.005,
    }
}

fn require_site_key(task: &SolveTask) -> AppResult<&str> {
    task.site_key
        .as_deref()
        .ok_or(AppError::Solver(SolverError::MissingParameter("site_key")))
}

fn require_image(task: &SolveTask) -> AppResult<&str> {
    task.image_base64
        .as_deref()
        .ok_or(AppError::Solver(SolverError::MissingParameter("image")))
}

fn unsupported(provider: &str, kind: ChallengeKind) -> AppError {
    AppError::Solver(SolverError::Unsupported {
        provider: provider.to_string(),
        kind: kind.to_string(),
    })
}

// ========== 2captcha ==========

#[derive(Debug, Deserialize)]
struct TwoCaptchaResponse {
    status: i32,
    request: String,
}

/// 2captcha 客户端（in.php / res.php 接口）
pub struct TwoCaptchaClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl TwoCaptchaClient {
    pub const NAME: &'static str = "2captcha";

    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn submit_form(&self, task: &SolveTask) -> AppResult<Vec<(&'static str, String)>> {
        let mut form = vec![("key", self.api_key.clone()), ("json", "1".to_string())];
        match task.kind {
            ChallengeKind::RecaptchaV2 | ChallengeKind::RecaptchaV3 => {
                form.push(("method", "userrecaptcha".into()));
                form.push(("googlekey", require_site_key(task)?.to_string()));
                form.push(("pageurl", task.page_url.clone()));
                if task.kind == ChallengeKind::RecaptchaV3 {
                    form.push(("version", "v3".into()));
                    form.push(("action", "submit".into()));
                    form.push(("min_score", "0.3".into()));
                }
            }
            ChallengeKind::Hcaptcha => {
                form.push(("method", "hcaptcha".into()));
                form.push(("sitekey", require_site_key(task)?.to_string()));
                form.push(("pageurl", task.page_url.clone()));
            }
            ChallengeKind::Funcaptcha => {
                form.push(("method", "funcaptcha".into()));
                form.push(("publickey", require_site_key(task)?.to_string()));
                form.push(("pageurl", task.page_url.clone()));
            }
            ChallengeKind::Turnstile => {
                form.push(("method", "turnstile".into()));
                form.push(("sitekey", require_site_key(task)?.to_string()));
                form.push(("pageurl", task.page_url.clone()));
            }
            ChallengeKind::Image | ChallengeKind::Text => {
                form.push(("method", "base64".into()));
                form.push(("body", require_image(task)?.to_string()));
            }
            kind => return Err(unsupported(Self::NAME, kind)),
        }
        Ok(form)
    }
}

#[async_trait]
impl SolvingProvider for TwoCaptchaClient {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn estimated_cost(&self, kind: ChallengeKind) -> f64 {
        price_for(kind)
    }

    async fn submit(&self, task: &SolveTask) -> AppResult<String> {
        let form = self.submit_form(task)?;
        debug!("提交 {} 任务到 {}", task.kind, Self::NAME);

        let response: TwoCaptchaResponse = self
            .http
            .post(format!("{}/in.php", self.base_url))
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::solver_request_failed(Self::NAME, e))?
            .json()
            .await
            .map_err(|e| AppError::solver_request_failed(Self::NAME, e))?;

        if response.status == 1 {
            Ok(response.request)
        } else {
            Err(AppError::Solver(SolverError::Rejected {
                provider: Self::NAME.to_string(),
                code: response.request,
            }))
        }
    }

    async fn poll(&self, ticket: &str) -> AppResult<PollStatus> {
        let response: TwoCaptchaResponse = self
            .http
            .get(format!("{}/res.php", self.base_url))
            .query(&[
                ("key", self.api_key.as_str()),
                ("action", "get"),
                ("id", ticket),
                ("json", "1"),
            ])
            .send()
            .await
            .map_err(|e| AppError::solver_request_failed(Self::NAME, e))?
            .json()
            .await
            .map_err(|e| AppError::solver_request_failed(Self::NAME, e))?;

        match (response.status, response.request.as_str()) {
            (1, _) => Ok(PollStatus::Ready(response.request)),
            (_, "CAPCHA_NOT_READY") => Ok(PollStatus::Pending),
            _ => Err(AppError::Solver(SolverError::Rejected {
                provider: Self::NAME.to_string(),
                code: response.request,
            })),
        }
    }
}

// ========== anti-captcha ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AntiCaptchaResponse {
    #[serde(default)]
    error_id: i32,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    task_id: Option<u64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    solution: Option<Value>,
}

/// anti-captcha 客户端（createTask / getTaskResult 接口）
pub struct AntiCaptchaClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl AntiCaptchaClient {
    pub const NAME: &'static str = "anti-captcha";

    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn task_body(&self, task: &SolveTask) -> AppResult<Value> {
        let body = match task.kind {
            ChallengeKind::RecaptchaV2 => json!({
                "type": "RecaptchaV2TaskProxyless",
                "websiteURL": task.page_url,
                "websiteKey": require_site_key(task)?,
            }),
            ChallengeKind::RecaptchaV3 => json!({
                "type": "RecaptchaV3TaskProxyless",
                "websiteURL": task.page_url,
                "websiteKey": require_site_key(task)?,
                "minScore": 0.3,
            }),
            ChallengeKind::Hcaptcha => json!({
                "type": "HCaptchaTaskProxyless",
                "websiteURL": task.page_url,
                "websiteKey": require_site_key(task)?,
            }),
            ChallengeKind::Funcaptcha => json!({
                "type": "FunCaptchaTaskProxyless",
                "websiteURL": task.page_url,
                "websitePublicKey": require_site_key(task)?,
            }),
            ChallengeKind::Turnstile => json!({
                "type": "TurnstileTaskProxyless",
                "websiteURL": task.page_url,
                "websiteKey": require_site_key(task)?,
            }),
            ChallengeKind::Image | ChallengeKind::Text => json!({
                "type": "ImageToTextTask",
                "body": require_image(task)?,
            }),
            kind => return Err(unsupported(Self::NAME, kind)),
        };
        Ok(body)
    }

    async fn call(&self, endpoint: &str, body: Value) -> AppResult<AntiCaptchaResponse> {
        let response: AntiCaptchaResponse = self
            .http
            .post(format!("{}/{}", self.base_url, endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::solver_request_failed(Self::NAME, e))?
            .json()
            .await
            .map_err(|e| AppError::solver_request_failed(Self::NAME, e))?;
        if response.error_id != 0 {
            return Err(AppError::Solver(SolverError::Rejected {
                provider: Self::NAME.to_string(),
                code: response
                    .error_code
                    .clone()
                    .unwrap_or_else(|| format!("errorId={}", response.error_id)),
            }));
        }
        Ok(response)
    }
}

#[async_trait]
impl SolvingProvider for AntiCaptchaClient {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn estimated_cost(&self, kind: ChallengeKind) -> f64 {
        price_for(kind)
    }

    async fn submit(&self, task: &SolveTask) -> AppResult<String> {
        let body = json!({
            "clientKey": self.api_key,
            "task": self.task_body(task)?,
        });
        debug!("提交 {} 任务到 {}", task.kind, Self::NAME);
        let response = self.call("createTask", body).await?;
        response
            .task_id
            .map(|id| id.to_string())
            .ok_or_else(|| {
                AppError::Solver(SolverError::Rejected {
                    provider: Self::NAME.to_string(),
                    code: "missing taskId".to_string(),
                })
            })
    }

    async fn poll(&self, ticket: &str) -> AppResult<PollStatus> {
        let task_id: u64 = ticket.parse().map_err(|_| {
            AppError::Solver(SolverError::Rejected {
                provider: Self::NAME.to_string(),
                code: format!("invalid taskId {}", ticket),
            })
        })?;
        let response = self
            .call(
                "getTaskResult",
                json!({ "clientKey": self.api_key, "taskId": task_id }),
            )
            .await?;

        if response.status.as_deref() != Some("ready") {
            return Ok(PollStatus::Pending);
        }
        let token = response.solution.as_ref().and_then(|s| {
            ["gRecaptchaResponse", "token", "text"]
                .iter()
                .find_map(|k| s.get(*k).and_then(Value::as_str))
                .map(str::to_string)
        });
        token.map(PollStatus::Ready).ok_or_else(|| {
            AppError::Solver(SolverError::Rejected {
                provider: Self::NAME.to_string(),
                code: "empty solution".to_string(),
            })
        })
    }
}
