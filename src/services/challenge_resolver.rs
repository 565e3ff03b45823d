//! 验证码处理 - 业务能力层
//!
//! 三层逐级升级，前一层明确失败（或不适用）才进入下一层：
//! 1. 自动：复用缓存会话，或对简单确认框点击一次，零成本
//! 2. 打码服务：预算和频率允许时提交给服务商并限时轮询
//! 3. 人工：发送通知，等待页面上的验证码消失
//!
//! 每一层的尝试都会生成一条 `ChallengeAttempt`。

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::browser::{BrowserDriver, PageHandle};
use crate::clients::{Notifier, PollStatus, SolveTask, SolvingProvider};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{BudgetTracker, SessionCache};
use crate::models::{
    ApplicationId, Challenge, ChallengeAttempt, ResolutionOutcome, ResolutionTier,
};

/// 处理验证码时的调用方上下文
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub page: &'a PageHandle,
    pub application_id: Option<ApplicationId>,
    /// 通知中给操作员的链接
    pub job_url: &'a str,
}

/// 各层的时间参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverSettings {
    pub solver_poll_interval: Duration,
    pub solver_timeout: Duration,
    pub human_wait_timeout: Duration,
    pub human_poll_interval: Duration,
}

impl ResolverSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            solver_poll_interval: config.solver_poll_interval(),
            solver_timeout: config.solver_timeout(),
            human_wait_timeout: config.human_wait_timeout(),
            human_poll_interval: config.human_poll_interval(),
        }
    }
}

/// 单层的结果
struct TierResult {
    solved: bool,
    cost_usd: f64,
    error: Option<String>,
}

impl TierResult {
    fn solved(cost_usd: f64) -> Self {
        Self {
            solved: true,
            cost_usd,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            solved: false,
            cost_usd: 0.0,
            error: Some(error.into()),
        }
    }
}

fn record(
    attempts: &mut Vec<ChallengeAttempt>,
    challenge: &Challenge,
    ctx: &ResolveContext<'_>,
    tier: ResolutionTier,
    elapsed_ms: u64,
    result: TierResult,
) -> bool {
    attempts.push(ChallengeAttempt {
        id: Uuid::new_v4(),
        application_id: ctx.application_id,
        kind: challenge.kind,
        site: challenge.domain(),
        tier,
        solved: result.solved,
        elapsed_ms,
        cost_usd: result.cost_usd,
        error: result.error,
    });
    result.solved
}

/// 单个服务商的结果
enum ProviderResult {
    Solved(String),
    /// 限定时间内没有结果（不是错误）
    TimedOut,
    Errored(AppError),
}

pub struct ChallengeResolver {
    driver: Arc<dyn BrowserDriver>,
    budget: Arc<BudgetTracker>,
    sessions: Arc<SessionCache>,
    providers: Vec<Arc<dyn SolvingProvider>>,
    notifier: Arc<dyn Notifier>,
    settings: ResolverSettings,
}

impl ChallengeResolver {
    /// `providers` 按优先顺序排列：第一个为主服务商，第二个仅在主服务商出错时使用
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        budget: Arc<BudgetTracker>,
        sessions: Arc<SessionCache>,
        providers: Vec<Arc<dyn SolvingProvider>>,
        notifier: Arc<dyn Notifier>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            driver,
            budget,
            sessions,
            providers,
            notifier,
            settings,
        }
    }

    /// 处理一个验证码
    pub async fn resolve(
        &self,
        challenge: &Challenge,
        ctx: &ResolveContext<'_>,
    ) -> ResolutionOutcome {
        let started = Instant::now();
        let mut attempts = Vec::new();
        info!(
            "🧩 检测到验证码: {} @ {}",
            challenge.kind,
            challenge.domain()
        );

        // 第一层
        if let Some(result) = self.tier_auto(challenge, ctx).await {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let solved = record(&mut attempts, challenge, ctx, ResolutionTier::Auto, elapsed_ms, result);
            if solved {
                return self.finish(challenge, ctx, ResolutionTier::Auto, started, attempts).await;
            }
        }

        // 第二层
        for (elapsed_ms, result) in self.tier_service(challenge, ctx).await {
            let solved = record(
                &mut attempts,
                challenge,
                ctx,
                ResolutionTier::Service,
                elapsed_ms,
                result,
            );
            if solved {
                return self.finish(challenge, ctx, ResolutionTier::Service, started, attempts).await;
            }
        }

        // 第三层
        let human_started = Instant::now();
        let result = self.tier_human(challenge, ctx).await;
        let solved = record(
            &mut attempts,
            challenge,
            ctx,
            ResolutionTier::Human,
            human_started.elapsed().as_millis() as u64,
            result,
        );
        if solved {
            return self.finish(challenge, ctx, ResolutionTier::Human, started, attempts).await;
        }

        warn!("❌ 验证码未能解决: {}", challenge.kind);
        let error = attempts.last().and_then(|a| a.error.clone());
        ResolutionOutcome {
            solved: false,
            tier_used: ResolutionTier::Human,
            elapsed_ms: started.elapsed().as_millis() as u64,
            cost_usd: attempts.iter().map(|a| a.cost_usd).sum(),
            error,
            attempts,
        }
    }

    /// 成功后缓存会话并汇总结果
    async fn finish(
        &self,
        challenge: &Challenge,
        ctx: &ResolveContext<'_>,
        tier: ResolutionTier,
        started: Instant,
        attempts: Vec<ChallengeAttempt>,
    ) -> ResolutionOutcome {
        match self.driver.export_session(ctx.page).await {
            Ok(state) => {
                self.sessions.put(&challenge.domain(), state);
                debug!("会话已缓存: {}", challenge.domain());
            }
            Err(e) => warn!("⚠️ 导出会话失败，不缓存: {}", e),
        }
        info!("✅ 验证码已解决 (第 {} 层)", tier.number());
        ResolutionOutcome {
            solved: true,
            tier_used: tier,
            elapsed_ms: started.elapsed().as_millis() as u64,
            cost_usd: attempts.iter().map(|a| a.cost_usd).sum(),
            error: None,
            attempts,
        }
    }

    /// 第一层。没有任何可做的事情时返回 None（不记录尝试）
    async fn tier_auto(&self, challenge: &Challenge, ctx: &ResolveContext<'_>) -> Option<TierResult> {
        let domain = challenge.domain();
        let mut last_error = None;
        let mut tried = false;

        if let Some(entry) = self.sessions.get(&domain) {
            tried = true;
            debug!("复用 {} 的缓存会话", domain);
            match self.apply_cached_session(challenge, ctx, &entry.state).await {
                Ok(true) => return Some(TierResult::solved(0.0)),
                Ok(false) => {
                    self.sessions.invalidate(&domain);
                    last_error = Some("cached session did not bypass challenge".to_string());
                }
                Err(e) => {
                    self.sessions.invalidate(&domain);
                    last_error = Some(e.to_string());
                }
            }
        }

        if challenge.kind.supports_checkbox() {
            tried = true;
            match self.driver.click_challenge_checkbox(ctx.page, challenge).await {
                Ok(true) => return Some(TierResult::solved(0.0)),
                Ok(false) => last_error = Some("checkbox did not clear challenge".to_string()),
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        tried.then(|| TierResult::failed(last_error.unwrap_or_default()))
    }

    async fn apply_cached_session(
        &self,
        challenge: &Challenge,
        ctx: &ResolveContext<'_>,
        state: &str,
    ) -> AppResult<bool> {
        self.driver.apply_session(ctx.page, state).await?;
        let after = self.driver.detect_challenge(ctx.page).await?;
        Ok(!after.is_some_and(|c| c.same_surface(challenge)))
    }

    /// 第二层。返回每个被调用的服务商的结果；不满足进入条件时为空
    async fn tier_service(
        &self,
        challenge: &Challenge,
        ctx: &ResolveContext<'_>,
    ) -> Vec<(u64, TierResult)> {
        let mut results = Vec::new();

        if !challenge.kind.is_service_solvable() {
            debug!("{} 无法交给打码服务", challenge.kind);
            return results;
        }
        if self.providers.is_empty() {
            debug!("未配置打码服务");
            return results;
        }
        if !self.budget.can_attempt() {
            warn!("⏳ 本小时打码次数已达上限，直接转人工");
            return results;
        }

        let task = match self.build_task(challenge, ctx).await {
            Ok(task) => task,
            Err(e) => {
                warn!("⚠️ 无法构造打码任务: {}", e);
                return results;
            }
        };

        // 主服务商出错（不是"暂无结果"）时换下一个，最多两个
        for provider in self.providers.iter().take(2) {
            let estimate = provider.estimated_cost(challenge.kind);
            let Some(reservation) = self.budget.try_reserve(estimate) else {
                warn!(
                    "💰 今日打码预算不足 (已花费 ${:.3} / ${:.3})，跳过打码服务",
                    self.budget.spent_today_usd(),
                    self.budget.daily_ceiling_usd()
                );
                break;
            };
            if !self.budget.try_record_attempt() {
                self.budget.refund(reservation);
                warn!("⏳ 本小时打码次数已达上限，直接转人工");
                break;
            }

            let provider_started = Instant::now();
            info!("💳 提交到 {} (预估 ${:.3})", provider.name(), estimate);
            match self.run_provider(provider.as_ref(), &task).await {
                ProviderResult::Solved(token) => {
                    self.budget.settle(reservation, estimate);
                    let result = match self
                        .driver
                        .inject_solution(ctx.page, challenge, &token)
                        .await
                    {
                        Ok(()) => TierResult::solved(estimate),
                        Err(e) => TierResult {
                            solved: false,
                            cost_usd: estimate,
                            error: Some(format!("inject failed: {}", e)),
                        },
                    };
                    let solved = result.solved;
                    results.push((provider_started.elapsed().as_millis() as u64, result));
                    if solved {
                        return results;
                    }
                    break;
                }
                ProviderResult::TimedOut => {
                    self.budget.refund(reservation);
                    results.push((
                        provider_started.elapsed().as_millis() as u64,
                        TierResult::failed(format!("{} timed out", provider.name())),
                    ));
                    break;
                }
                ProviderResult::Errored(e) => {
                    self.budget.refund(reservation);
                    warn!("⚠️ {} 出错: {}", provider.name(), e);
                    results.push((
                        provider_started.elapsed().as_millis() as u64,
                        TierResult::failed(e.to_string()),
                    ));
                }
            }
        }

        results
    }

    async fn build_task(&self, challenge: &Challenge, ctx: &ResolveContext<'_>) -> AppResult<SolveTask> {
        let image_base64 = if challenge.kind.needs_image() {
            let png = self.driver.screenshot(ctx.page).await?;
            Some(STANDARD.encode(png))
        } else {
            None
        };
        Ok(SolveTask {
            kind: challenge.kind,
            site_key: challenge.site_key.clone(),
            page_url: challenge.page_url.clone(),
            image_base64,
        })
    }

    async fn run_provider(&self, provider: &dyn SolvingProvider, task: &SolveTask) -> ProviderResult {
        let ticket = match provider.submit(task).await {
            Ok(ticket) => ticket,
            Err(e) => return ProviderResult::Errored(e),
        };

        match tokio::time::timeout(
            self.settings.solver_timeout,
            self.poll_until_ready(provider, &ticket),
        )
        .await
        {
            Ok(Ok(token)) => ProviderResult::Solved(token),
            Ok(Err(e)) => ProviderResult::Errored(e),
            Err(_) => ProviderResult::TimedOut,
        }
    }

    async fn poll_until_ready(&self, provider: &dyn SolvingProvider, ticket: &str) -> AppResult<String> {
        loop {
            tokio::time::sleep(self.settings.solver_poll_interval).await;
            match provider.poll(ticket).await? {
                PollStatus::Ready(token) => return Ok(token),
                PollStatus::Pending => debug!("{} 暂无结果", provider.name()),
            }
        }
    }

    /// 第三层：通知并等待验证码界面变化
    async fn tier_human(&self, challenge: &Challenge, ctx: &ResolveContext<'_>) -> TierResult {
        let message = format!(
            "需要人工处理验证码 ({}): {} ，请在 {} 秒内完成",
            challenge.kind,
            ctx.job_url,
            self.settings.human_wait_timeout.as_secs()
        );
        if let Err(e) = self.notifier.notify(&message).await {
            warn!("⚠️ 通知发送失败，继续等待: {}", e);
        }

        let wait = async {
            loop {
                tokio::time::sleep(self.settings.human_poll_interval).await;
                match self.driver.detect_challenge(ctx.page).await {
                    Ok(None) => return,
                    Ok(Some(current)) if !current.same_surface(challenge) => return,
                    Ok(Some(_)) => {}
                    Err(e) => debug!("检测验证码失败，继续等待: {}", e),
                }
            }
        };

        match tokio::time::timeout(self.settings.human_wait_timeout, wait).await {
            Ok(()) => TierResult::solved(0.0),
            Err(_) => TierResult::failed(format!(
                "human wait timed out after {}s",
                self.settings.human_wait_timeout.as_secs()
            )),
        }
    }
}
