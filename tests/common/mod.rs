//! 集成测试共用的脚本化假组件
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use auto_apply::browser::{BrowserDriver, PageHandle};
use auto_apply::clients::{Notifier, PollStatus, SolveTask, SolvingProvider};
use auto_apply::config::Config;
use auto_apply::error::{AppError, AppResult, SolverError, StoreError};
use auto_apply::infrastructure::{BudgetTracker, RateLimiter, SessionCache};
use auto_apply::models::{
    Application, ApplicationId, ApplicationStatus, Challenge, ChallengeAttempt, ChallengeKind,
    FieldDescriptor, FieldInput, FieldKind, Job, JobId, JobStatus, NewJob, Platform, QueueStats,
    UserProfile,
};
use auto_apply::orchestrator::JobProcessor;
use auto_apply::services::{
    ChallengeResolver, EvidenceWriter, FormFiller, QueueManager, ResolverSettings, TypingPace,
};
use auto_apply::store::{InMemoryJobStore, JobStore, UpsertOutcome};
use auto_apply::workflow::{ApplicationFlow, FlowSettings, RetryPolicy};

// ========== 假浏览器 ==========

/// 假浏览器的页面脚本与调用记录
#[derive(Debug, Default)]
pub struct BrowserScript {
    pub page_text: String,
    /// 提交后页面文本
    pub after_submit_text: String,
    pub fields: Vec<FieldDescriptor>,
    /// 当前页面上的验证码
    pub challenge: Option<Challenge>,
    /// 第一次提交后才出现的验证码
    pub challenge_after_submit: Option<Challenge>,
    pub checkbox_clears: bool,
    pub inject_clears: bool,
    /// 检测这么多次以后验证码消失（模拟人工处理）
    pub human_clears_after_polls: Option<usize>,
    /// 恢复缓存会话后验证码是否消失
    pub session_bypasses: bool,
    /// 写入会失败的字段选择器
    pub failing_selectors: HashSet<String>,
    pub open_error: Option<String>,
    pub open_delay: Option<Duration>,

    // --- 调用记录 ---
    pub opened: Vec<String>,
    pub writes: Vec<(String, FieldInput)>,
    pub submits: usize,
    pub checkbox_clicks: usize,
    pub injected: Vec<String>,
    pub applied_sessions: Vec<String>,
    pub closed: usize,
}

impl BrowserScript {
    /// 某个字段最终被键入的文本
    pub fn typed_into(&self, selector: &str) -> String {
        self.writes
            .iter()
            .filter(|(s, _)| s == selector)
            .fold(String::new(), |mut acc, (_, input)| {
                match input {
                    FieldInput::Clear => acc.clear(),
                    FieldInput::Keys(k) => acc.push_str(k),
                    _ => {}
                }
                acc
            })
    }

    pub fn touched(&self, selector: &str) -> bool {
        self.writes.iter().any(|(s, _)| s == selector)
    }
}

#[derive(Default)]
pub struct FakeBrowser {
    script: Mutex<BrowserScript>,
}

impl FakeBrowser {
    pub fn new(script: BrowserScript) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
        })
    }

    pub fn script(&self) -> MutexGuard<'_, BrowserScript> {
        self.script.lock().unwrap()
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn open(&self, url: &str) -> AppResult<PageHandle> {
        let delay = {
            let mut s = self.script();
            s.opened.push(url.to_string());
            if let Some(reason) = &s.open_error {
                return Err(AppError::navigation_failed(url, reason.clone()));
            }
            s.open_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(PageHandle {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
        })
    }

    async fn page_text(&self, _page: &PageHandle) -> AppResult<String> {
        let s = self.script();
        Ok(if s.submits > 0 {
            s.after_submit_text.clone()
        } else {
            s.page_text.clone()
        })
    }

    async fn list_fields(&self, _page: &PageHandle) -> AppResult<Vec<FieldDescriptor>> {
        Ok(self.script().fields.clone())
    }

    async fn set_field_value(
        &self,
        _page: &PageHandle,
        field: &FieldDescriptor,
        input: &FieldInput,
    ) -> AppResult<()> {
        let mut s = self.script();
        if s.failing_selectors.contains(&field.selector) {
            return Err(AppError::Other(format!("cannot write {}", field.selector)));
        }
        s.writes.push((field.selector.clone(), input.clone()));
        Ok(())
    }

    async fn detect_challenge(&self, _page: &PageHandle) -> AppResult<Option<Challenge>> {
        let mut s = self.script();
        if s.challenge.is_some() {
            if let Some(remaining) = s.human_clears_after_polls {
                if remaining == 0 {
                    s.challenge = None;
                } else {
                    s.human_clears_after_polls = Some(remaining - 1);
                }
            }
        }
        Ok(s.challenge.clone())
    }

    async fn click_challenge_checkbox(
        &self,
        _page: &PageHandle,
        _challenge: &Challenge,
    ) -> AppResult<bool> {
        let mut s = self.script();
        s.checkbox_clicks += 1;
        if s.checkbox_clears {
            s.challenge = None;
        }
        Ok(s.challenge.is_none())
    }

    async fn inject_solution(
        &self,
        _page: &PageHandle,
        _challenge: &Challenge,
        token: &str,
    ) -> AppResult<()> {
        let mut s = self.script();
        s.injected.push(token.to_string());
        if s.inject_clears {
            s.challenge = None;
        }
        Ok(())
    }

    async fn export_session(&self, _page: &PageHandle) -> AppResult<String> {
        Ok("cookies=solved".to_string())
    }

    async fn apply_session(&self, _page: &PageHandle, state: &str) -> AppResult<()> {
        let mut s = self.script();
        s.applied_sessions.push(state.to_string());
        if s.session_bypasses {
            s.challenge = None;
        }
        Ok(())
    }

    async fn submit(&self, _page: &PageHandle) -> AppResult<()> {
        let mut s = self.script();
        s.submits += 1;
        if s.submits == 1 {
            if let Some(challenge) = s.challenge_after_submit.take() {
                s.challenge = Some(challenge);
            }
        }
        Ok(())
    }

    async fn screenshot(&self, _page: &PageHandle) -> AppResult<Vec<u8>> {
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn close(&self, _page: &PageHandle) -> AppResult<()> {
        self.script().closed += 1;
        Ok(())
    }
}

// ========== 假打码服务 ==========

#[derive(Debug, Clone)]
pub enum SolverScript {
    /// 轮询若干次后返回 token
    Solve { token: String, pending_polls: usize },
    /// 提交即报错
    Error,
    /// 永远没有结果
    NeverReady,
}

pub struct FakeSolver {
    name: String,
    cost: f64,
    script: SolverScript,
    pub submits: AtomicUsize,
    polls: Mutex<HashMap<String, usize>>,
}

impl FakeSolver {
    pub fn new(name: &str, cost: f64, script: SolverScript) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            cost,
            script,
            submits: AtomicUsize::new(0),
            polls: Mutex::new(HashMap::new()),
        })
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SolvingProvider for FakeSolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn estimated_cost(&self, _kind: ChallengeKind) -> f64 {
        self.cost
    }

    async fn submit(&self, _task: &SolveTask) -> AppResult<String> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        match self.script {
            SolverScript::Error => Err(AppError::Solver(SolverError::Rejected {
                provider: self.name.clone(),
                code: "ERROR_ZERO_BALANCE".into(),
            })),
            _ => Ok(Uuid::new_v4().to_string()),
        }
    }

    async fn poll(&self, ticket: &str) -> AppResult<PollStatus> {
        let mut polls = self.polls.lock().unwrap();
        let count = polls.entry(ticket.to_string()).or_insert(0);
        *count += 1;
        match &self.script {
            SolverScript::Solve {
                token,
                pending_polls,
            } if *count > *pending_polls => Ok(PollStatus::Ready(token.clone())),
            _ => Ok(PollStatus::Pending),
        }
    }
}

/// 按顺序组装打码服务列表（第一个为主服务商）
pub fn providers(solvers: &[&Arc<FakeSolver>]) -> Vec<Arc<dyn SolvingProvider>> {
    solvers
        .iter()
        .map(|s| Arc::clone(*s) as Arc<dyn SolvingProvider>)
        .collect()
}

// ========== 假通知 ==========

#[derive(Default)]
pub struct FakeNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl FakeNotifier {
    pub fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, message: &str) -> AppResult<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

// ========== 会出错的存储 ==========

/// 包一层内存存储，第一次写回 `submitted` 的申请时返回数据库错误
pub struct FlakyStore {
    inner: Arc<InMemoryJobStore>,
    fail_submitted_save: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryJobStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_submitted_save: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn upsert_job(&self, new_job: &NewJob, initial: JobStatus) -> AppResult<UpsertOutcome> {
        self.inner.upsert_job(new_job, initial).await
    }

    async fn get_job(&self, id: JobId) -> AppResult<Job> {
        self.inner.get_job(id).await
    }

    async fn claim_next(&self, exclude: &[Platform]) -> AppResult<Option<Job>> {
        self.inner.claim_next(exclude).await
    }

    async fn transition(
        &self,
        id: JobId,
        from: &[JobStatus],
        to: JobStatus,
        note: Option<&str>,
    ) -> AppResult<Job> {
        self.inner.transition(id, from, to, note).await
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> AppResult<Vec<Job>> {
        self.inner.list_by_status(status, limit).await
    }

    async fn stats(&self) -> AppResult<QueueStats> {
        self.inner.stats().await
    }

    async fn create_application(&self, application: &Application) -> AppResult<()> {
        self.inner.create_application(application).await
    }

    async fn save_application(&self, application: &Application) -> AppResult<()> {
        if application.status == ApplicationStatus::Submitted
            && self.fail_submitted_save.swap(false, Ordering::SeqCst)
        {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut).into());
        }
        self.inner.save_application(application).await
    }

    async fn withdraw_manual_applications(&self, job_id: JobId) -> AppResult<usize> {
        self.inner.withdraw_manual_applications(job_id).await
    }

    async fn get_application(&self, id: ApplicationId) -> AppResult<Application> {
        self.inner.get_application(id).await
    }

    async fn list_applications(&self, job_id: JobId) -> AppResult<Vec<Application>> {
        self.inner.list_applications(job_id).await
    }

    async fn record_challenge(&self, attempt: &ChallengeAttempt) -> AppResult<()> {
        self.inner.record_challenge(attempt).await
    }
}

// ========== 组装 ==========

pub fn temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{}_{}", prefix, Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// 所有等待都缩短到毫秒级的配置
pub fn fast_config() -> Config {
    Config {
        worker_count: 2,
        evidence_dir: temp_dir("auto_apply_evidence").display().to_string(),
        navigation_timeout_ms: 2_000,
        submit_timeout_ms: 2_000,
        confirmation_wait_ms: 150,
        solver_poll_interval_ms: 5,
        solver_timeout_ms: 200,
        human_wait_timeout_ms: 150,
        human_poll_interval_ms: 5,
        idle_poll_interval_ms: 20,
        typing_delay_min_ms: 0,
        typing_delay_max_ms: 0,
        retry_max: 1,
        ..Config::default()
    }
}

pub fn text_field(selector: &str, label: &str) -> FieldDescriptor {
    FieldDescriptor {
        selector: selector.into(),
        label: Some(label.into()),
        kind: FieldKind::Text,
        ..FieldDescriptor::default()
    }
}

pub fn file_field(selector: &str, label: &str) -> FieldDescriptor {
    FieldDescriptor {
        selector: selector.into(),
        label: Some(label.into()),
        kind: FieldKind::File,
        input_type: Some("file".into()),
        ..FieldDescriptor::default()
    }
}

/// 名 / 姓 / 邮箱 / 电话
pub fn basic_form() -> Vec<FieldDescriptor> {
    vec![
        text_field("#first", "First name"),
        text_field("#last", "Last name"),
        text_field("#email", "Email"),
        text_field("#phone", "Phone number"),
    ]
}

pub fn sample_profile() -> UserProfile {
    let resume = temp_dir("auto_apply_materials").join("resume.pdf");
    std::fs::write(&resume, b"%PDF-1.4").unwrap();
    UserProfile {
        first_name: Some("Ada".into()),
        last_name: Some("Lovelace".into()),
        email: Some("ada@example.com".into()),
        phone: Some("+1 555 0100".into()),
        resume_path: Some(resume),
        ..UserProfile::default()
    }
}

pub fn challenge(kind: ChallengeKind) -> Challenge {
    Challenge::new(
        kind,
        Some("6Lc-test-site-key".into()),
        "https://boards.greenhouse.io/acme/jobs/1",
    )
}

/// 一套完整的处理链路（内存存储 + 假浏览器）
pub struct Harness {
    pub config: Config,
    pub browser: Arc<FakeBrowser>,
    pub store: Arc<InMemoryJobStore>,
    pub queue: Arc<QueueManager>,
    pub budget: Arc<BudgetTracker>,
    pub sessions: Arc<SessionCache>,
    pub notifier: Arc<FakeNotifier>,
    pub resolver: Arc<ChallengeResolver>,
    pub processor: Arc<JobProcessor>,
}

impl Harness {
    pub fn new(
        config: Config,
        browser: Arc<FakeBrowser>,
        providers: Vec<Arc<dyn SolvingProvider>>,
        profile: UserProfile,
    ) -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        let store_dyn: Arc<dyn JobStore> = store.clone();
        Self::with_store(config, browser, providers, profile, store, store_dyn)
    }

    /// 处理链路走 `front`，`store` 是其背后的内存存储，供断言直接读取
    pub fn with_store(
        config: Config,
        browser: Arc<FakeBrowser>,
        providers: Vec<Arc<dyn SolvingProvider>>,
        profile: UserProfile,
        store: Arc<InMemoryJobStore>,
        store_dyn: Arc<dyn JobStore>,
    ) -> Self {
        let driver: Arc<dyn BrowserDriver> = browser.clone();
        let queue = Arc::new(QueueManager::new(Arc::clone(&store_dyn)));
        let budget = Arc::new(BudgetTracker::new(
            config.daily_cost_ceiling_usd,
            config.hourly_attempt_ceiling,
        ));
        let sessions = Arc::new(SessionCache::new(config.session_ttl()));
        let notifier = Arc::new(FakeNotifier::default());

        let resolver = Arc::new(ChallengeResolver::new(
            Arc::clone(&driver),
            Arc::clone(&budget),
            Arc::clone(&sessions),
            providers,
            notifier.clone(),
            ResolverSettings::from_config(&config),
        ));
        let evidence = Arc::new(EvidenceWriter::new(&config.evidence_dir));
        let flow = Arc::new(ApplicationFlow::new(
            Arc::clone(&driver),
            FormFiller::new(Arc::clone(&driver), TypingPace::from_config(&config)),
            Arc::clone(&resolver),
            store_dyn,
            Arc::clone(&evidence),
            FlowSettings::from_config(&config),
        ));
        let processor = Arc::new(JobProcessor::new(
            Arc::clone(&queue),
            flow,
            Arc::new(RateLimiter::from_config(&config)),
            evidence,
            Arc::new(profile),
            RetryPolicy::from_config(&config),
        ));

        Self {
            config,
            browser,
            store,
            queue,
            budget,
            sessions,
            notifier,
            resolver,
            processor,
        }
    }
}
