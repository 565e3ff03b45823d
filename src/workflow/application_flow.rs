//! 申请处理流程 - 流程层
//!
//! 核心职责：定义"一次申请尝试"的完整处理流程
//!
//! 流程顺序：
//! 1. navigating：打开职位页面，识别已下架的职位
//! 2. filling：列出字段 → 分类 → 填写，计算完成率
//! 3. resolving：提交前（以及提交后）出现验证码时逐层处理
//! 4. submitting：提交并等待成功标志
//!
//! 每个挂起点都有时间上限，并且可以被取消。流程本身不迁移职位状态，
//! 只返回 `AttemptOutcome`，由编排层落库。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::{BrowserDriver, PageHandle};
use crate::config::{BelowThresholdRoute, Config};
use crate::error::{AppError, AppResult, BrowserError, FormError};
use crate::models::{Application, Job, UserProfile};
use crate::services::{
    ChallengeResolver, EvidenceWriter, FormFiller, ResolveContext,
};
use crate::store::JobStore;
use crate::workflow::application_ctx::ApplicationCtx;

/// 确认成功标志时的轮询间隔上限
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

/// 一次尝试的结果
#[derive(Debug)]
pub enum AttemptOutcome {
    /// 已提交并看到成功标志
    Submitted,
    /// 需要人工完成，已完成的工作保留
    NeedsManual { reason: String },
    Failed { error: AppError },
    /// 操作员取消
    Cancelled,
}

impl AttemptOutcome {
    fn wants_evidence(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::NeedsManual { .. } | AttemptOutcome::Failed { .. }
        )
    }
}

/// 一次验证码检查的结果
enum ChallengeCheck {
    /// 页面上没有验证码
    Clear,
    Solved,
    Unsolved(String),
}

/// 流程参数
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub navigation_timeout: Duration,
    pub submit_timeout: Duration,
    pub confirmation_wait: Duration,
    pub fill_acceptance_threshold: f64,
    pub below_threshold_route: BelowThresholdRoute,
    pub success_indicators: Vec<String>,
    pub listing_closed_indicators: Vec<String>,
}

impl FlowSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            navigation_timeout: config.navigation_timeout(),
            submit_timeout: config.submit_timeout(),
            confirmation_wait: config.confirmation_wait(),
            fill_acceptance_threshold: config.fill_acceptance_threshold,
            below_threshold_route: config.below_threshold_route,
            success_indicators: lowercase_all(&config.success_indicators),
            listing_closed_indicators: lowercase_all(&config.listing_closed_indicators),
        }
    }
}

fn lowercase_all(phrases: &[String]) -> Vec<String> {
    phrases.iter().map(|p| p.to_lowercase()).collect()
}

fn contains_any(text: &str, phrases: &[String]) -> Option<String> {
    let lower = text.to_lowercase();
    phrases
        .iter()
        .find(|p| !p.is_empty() && lower.contains(p.as_str()))
        .cloned()
}

/// 带取消和超时的挂起点
async fn bounded<T>(
    cancel: &CancellationToken,
    limit: Duration,
    operation: &'static str,
    fut: impl Future<Output = AppResult<T>>,
) -> AppResult<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        result = tokio::time::timeout(limit, fut) => match result {
            Ok(inner) => inner,
            Err(_) => Err(AppError::Timeout {
                operation,
                timeout_ms: limit.as_millis() as u64,
            }),
        },
    }
}

/// 只带取消的挂起点（内部已有时间上限）
async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> AppResult<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        value = fut => Ok(value),
    }
}

/// 申请处理流程
///
/// - 编排一次尝试的完整流程
/// - 不迁移职位状态，只写申请记录的检查点
/// - 只依赖业务能力（services）和浏览器抽象
pub struct ApplicationFlow {
    driver: Arc<dyn BrowserDriver>,
    filler: FormFiller,
    resolver: Arc<ChallengeResolver>,
    store: Arc<dyn JobStore>,
    evidence: Arc<EvidenceWriter>,
    settings: FlowSettings,
}

impl ApplicationFlow {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        filler: FormFiller,
        resolver: Arc<ChallengeResolver>,
        store: Arc<dyn JobStore>,
        evidence: Arc<EvidenceWriter>,
        settings: FlowSettings,
    ) -> Self {
        Self {
            driver,
            filler,
            resolver,
            store,
            evidence,
            settings,
        }
    }

    /// 执行一次尝试
    ///
    /// `application` 是调用方持有的工作副本，流程中会更新填表进度、
    /// 验证码记录和证据路径，但不会迁移到终态。
    pub async fn run(
        &self,
        job: &Job,
        application: &mut Application,
        profile: &UserProfile,
        ctx: &ApplicationCtx,
        cancel: &CancellationToken,
    ) -> AttemptOutcome {
        application.manual_url = Some(job.source_url.clone());
        application.materials = profile.materials();

        // ========== navigating ==========
        info!("{} 🌐 打开职位页面: {}", ctx, job.source_url);
        let page = match bounded(
            cancel,
            self.settings.navigation_timeout,
            "navigate",
            self.driver.open(&job.source_url),
        )
        .await
        {
            Ok(page) => page,
            Err(AppError::Cancelled) => return AttemptOutcome::Cancelled,
            Err(error) => {
                warn!("{} ❌ 导航失败: {}", ctx, error);
                return AttemptOutcome::Failed { error };
            }
        };

        let outcome = match self.drive(&page, job, application, profile, ctx, cancel).await {
            Ok(outcome) => outcome,
            Err(AppError::Cancelled) => AttemptOutcome::Cancelled,
            Err(error) => AttemptOutcome::Failed { error },
        };

        if outcome.wants_evidence() {
            self.capture_evidence(&page, application, ctx).await;
        }
        if let Err(e) = self.driver.close(&page).await {
            debug!("{} 关闭页面失败: {}", ctx, e);
        }
        outcome
    }

    async fn drive(
        &self,
        page: &PageHandle,
        job: &Job,
        application: &mut Application,
        profile: &UserProfile,
        ctx: &ApplicationCtx,
        cancel: &CancellationToken,
    ) -> AppResult<AttemptOutcome> {
        let text = bounded(
            cancel,
            self.settings.navigation_timeout,
            "read page",
            self.driver.page_text(page),
        )
        .await?;
        if let Some(phrase) = contains_any(&text, &self.settings.listing_closed_indicators) {
            info!("{} 🚫 职位已下架 (\"{}\")", ctx, phrase);
            return Err(BrowserError::ListingRemoved {
                url: job.source_url.clone(),
            }
            .into());
        }

        // ========== filling ==========
        let fields = bounded(
            cancel,
            self.settings.navigation_timeout,
            "list fields",
            self.driver.list_fields(page),
        )
        .await?;
        info!("{} 📋 找到 {} 个字段", ctx, fields.len());

        let fill = cancellable(cancel, self.filler.fill(page, &fields, profile)).await?;
        application.record_fill(&fill);
        self.checkpoint(application, ctx).await;

        if fill.total_count > 0 && fill.classified_count() == 0 {
            return Err(FormError::Unrecognized {
                total: fill.total_count,
            }
            .into());
        }

        let ratio = fill.completion_ratio();
        if ratio < self.settings.fill_acceptance_threshold {
            let threshold = self.settings.fill_acceptance_threshold;
            warn!(
                "{} ⚠️ 完成率 {:.2} 低于阈值 {:.2}，未填: {:?}",
                ctx, ratio, threshold, fill.unfilled_field_names
            );
            return Ok(match self.settings.below_threshold_route {
                BelowThresholdRoute::Failed => AttemptOutcome::Failed {
                    error: FormError::BelowThreshold { ratio, threshold }.into(),
                },
                BelowThresholdRoute::NeedsManual => AttemptOutcome::NeedsManual {
                    reason: FormError::BelowThreshold { ratio, threshold }.to_string(),
                },
            });
        }

        // ========== resolving ==========
        if let ChallengeCheck::Unsolved(reason) =
            self.clear_challenge(page, job, application, ctx, cancel).await?
        {
            return Ok(AttemptOutcome::NeedsManual { reason });
        }

        // ========== submitting ==========
        self.submit(page, ctx, cancel).await?;

        // 提交后才弹出的验证码：处理后再提交一次
        match self.clear_challenge(page, job, application, ctx, cancel).await? {
            ChallengeCheck::Clear => {}
            ChallengeCheck::Solved => self.submit(page, ctx, cancel).await?,
            ChallengeCheck::Unsolved(reason) => {
                return Ok(AttemptOutcome::NeedsManual { reason });
            }
        }

        if self.await_confirmation(page, cancel).await? {
            info!("{} ✅ 已提交", ctx);
            Ok(AttemptOutcome::Submitted)
        } else {
            warn!("{} ⚠️ 提交后未检测到成功标志", ctx);
            Ok(AttemptOutcome::NeedsManual {
                reason: "提交后未检测到成功标志".to_string(),
            })
        }
    }

    async fn submit(
        &self,
        page: &PageHandle,
        ctx: &ApplicationCtx,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        info!("{} 📤 提交申请...", ctx);
        bounded(
            cancel,
            self.settings.submit_timeout,
            "submit",
            self.driver.submit(page),
        )
        .await
    }

    /// 检测并处理验证码
    async fn clear_challenge(
        &self,
        page: &PageHandle,
        job: &Job,
        application: &mut Application,
        ctx: &ApplicationCtx,
        cancel: &CancellationToken,
    ) -> AppResult<ChallengeCheck> {
        let detected = bounded(
            cancel,
            self.settings.navigation_timeout,
            "detect challenge",
            self.driver.detect_challenge(page),
        )
        .await?;
        let Some(challenge) = detected else {
            return Ok(ChallengeCheck::Clear);
        };

        info!("{} 🧩 出现验证码: {}", ctx, challenge.kind);
        let resolve_ctx = ResolveContext {
            page,
            application_id: Some(application.id),
            job_url: &job.source_url,
        };
        let outcome = cancellable(cancel, self.resolver.resolve(&challenge, &resolve_ctx)).await?;

        for attempt in &outcome.attempts {
            if let Err(e) = self.store.record_challenge(attempt).await {
                warn!("{} ⚠️ 验证码记录保存失败: {}", ctx, e);
            }
        }
        application
            .challenge_attempts
            .extend(outcome.attempts.iter().cloned());

        if outcome.solved {
            return Ok(ChallengeCheck::Solved);
        }
        Ok(ChallengeCheck::Unsolved(format!(
            "验证码未解决 ({}): {}",
            challenge.kind,
            outcome.error.unwrap_or_else(|| "unknown".to_string())
        )))
    }

    /// 在限定时间内轮询成功标志
    async fn await_confirmation(
        &self,
        page: &PageHandle,
        cancel: &CancellationToken,
    ) -> AppResult<bool> {
        let interval = self.settings.confirmation_wait.min(CONFIRM_POLL_INTERVAL);
        let poll = async {
            loop {
                match self.driver.page_text(page).await {
                    Ok(text) => {
                        if contains_any(&text, &self.settings.success_indicators).is_some() {
                            return;
                        }
                    }
                    Err(e) => debug!("读取页面失败，继续等待: {}", e),
                }
                tokio::time::sleep(interval).await;
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            result = tokio::time::timeout(self.settings.confirmation_wait, poll) => Ok(result.is_ok()),
        }
    }

    /// 填表进度检查点，写回失败不影响流程
    async fn checkpoint(&self, application: &Application, ctx: &ApplicationCtx) {
        if let Err(e) = self.store.save_application(application).await {
            warn!("{} ⚠️ 保存填表进度失败: {}", ctx, e);
        }
    }

    async fn capture_evidence(
        &self,
        page: &PageHandle,
        application: &mut Application,
        ctx: &ApplicationCtx,
    ) {
        let png = match self.driver.screenshot(page).await {
            Ok(png) => png,
            Err(e) => {
                debug!("{} 截图失败: {}", ctx, e);
                return;
            }
        };
        match self.evidence.save_screenshot(application, &png).await {
            Ok(path) => application.evidence_path = Some(path),
            Err(e) => warn!("{} ⚠️ 保存截图失败: {}", ctx, e),
        }
    }
}
