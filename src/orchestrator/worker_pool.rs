//! Worker 池与应用入口 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：日志、浏览器、队列存储、用户资料、打码服务、通知
//! 2. **并发控制**：N 个 worker 各自循环认领职位，认领本身由存储层保证互斥
//! 3. **取消**：Ctrl-C 触发 `CancellationToken`，进行中的申请归还队列
//! 4. **全局统计**：结束时保存会话缓存并输出队列统计

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::browser::{self, BrowserDriver, ChromiumDriver};
use crate::clients::{
    AntiCaptchaClient, LogNotifier, Notifier, SolvingProvider, TwoCaptchaClient, WebhookNotifier,
};
use crate::config::Config;
use crate::infrastructure::{BudgetTracker, RateLimiter, SessionCache};
use crate::models::{load_job_seeds, load_profile};
use crate::orchestrator::job_processor::{JobProcessor, JobResult};
use crate::services::{
    ChallengeResolver, EvidenceWriter, FormFiller, QueueManager, ResolverSettings, TypingPace,
};
use crate::store::{InMemoryJobStore, JobStore, PostgresJobStore};
use crate::utils::logging;
use crate::workflow::{ApplicationFlow, FlowSettings, RetryPolicy};

/// 运行统计（本次进程内处理的职位）
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub applied: usize,
    pub needs_manual: usize,
    pub failed: usize,
    pub expired: usize,
    pub released: usize,
    pub deferred: usize,
    pub errors: usize,
}

impl RunStats {
    fn record(&mut self, result: &JobResult) {
        match result {
            JobResult::Applied => self.applied += 1,
            JobResult::NeedsManual => self.needs_manual += 1,
            JobResult::Failed => self.failed += 1,
            JobResult::Expired => self.expired += 1,
            JobResult::Released => self.released += 1,
            JobResult::Deferred(_) => self.deferred += 1,
        }
    }

    fn merge(&mut self, other: &RunStats) {
        self.applied += other.applied;
        self.needs_manual += other.needs_manual;
        self.failed += other.failed;
        self.expired += other.expired;
        self.released += other.released;
        self.deferred += other.deferred;
        self.errors += other.errors;
    }

    pub fn processed(&self) -> usize {
        self.applied + self.needs_manual + self.failed + self.expired
    }
}

/// Worker 池
pub struct WorkerPool {
    queue: Arc<QueueManager>,
    processor: Arc<JobProcessor>,
    worker_count: usize,
    idle_poll_interval: Duration,
    /// 队列为空时退出，而不是继续轮询
    stop_when_idle: bool,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<QueueManager>,
        processor: Arc<JobProcessor>,
        worker_count: usize,
        idle_poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            processor,
            worker_count: worker_count.max(1),
            idle_poll_interval,
            stop_when_idle: false,
        }
    }

    pub fn stop_when_idle(mut self) -> Self {
        self.stop_when_idle = true;
        self
    }

    /// 启动所有 worker 并等待它们退出
    pub async fn run(&self, cancel: CancellationToken) -> RunStats {
        let mut handles = Vec::with_capacity(self.worker_count);

        for worker_id in 1..=self.worker_count {
            let queue = Arc::clone(&self.queue);
            let processor = Arc::clone(&self.processor);
            let cancel = cancel.clone();
            let idle = self.idle_poll_interval;
            let stop_when_idle = self.stop_when_idle;

            let handle = tokio::spawn(async move {
                worker_loop(worker_id, queue, processor, cancel, idle, stop_when_idle).await
            });
            handles.push((worker_id, handle));
        }

        let mut total = RunStats::default();
        for (worker_id, handle) in handles {
            match handle.await {
                Ok(stats) => total.merge(&stats),
                Err(e) => {
                    error!("[作业 {}] 任务执行失败: {}", worker_id, e);
                    total.errors += 1;
                }
            }
        }
        total
    }
}

/// 可取消的等待；返回 false 表示已取消
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<QueueManager>,
    processor: Arc<JobProcessor>,
    cancel: CancellationToken,
    idle: Duration,
    stop_when_idle: bool,
) -> RunStats {
    let mut stats = RunStats::default();
    debug!("[作业 {}] worker 启动", worker_id);

    while !cancel.is_cancelled() {
        let limiter = processor.rate_limiter();
        if let Some(retry_at) = limiter.global_retry_at(Utc::now()) {
            debug!(
                "[作业 {}] ⏳ 全局申请频率已满，{} 后再认领",
                worker_id,
                retry_at.format("%H:%M:%S")
            );
            let until_retry = (retry_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            if stop_when_idle
                || !pause(&cancel, until_retry.min(idle).max(Duration::from_millis(100))).await
            {
                break;
            }
            continue;
        }

        // 已满的平台不参与认领，其他平台照常推进
        let capped = limiter.capped_platforms();
        let job = match queue.claim_next_excluding(&capped).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                if stop_when_idle || !pause(&cancel, idle).await {
                    break;
                }
                continue;
            }
            Err(e) => {
                error!("[作业 {}] ❌ 认领失败: {}", worker_id, e);
                stats.errors += 1;
                if !pause(&cancel, idle).await {
                    break;
                }
                continue;
            }
        };

        match processor.process(&job, worker_id, &cancel).await {
            Ok(result) => stats.record(&result),
            Err(e) => {
                error!("[作业 {}] ❌ 处理职位时发生错误: {}", worker_id, e);
                stats.errors += 1;
                // 不让职位卡在 applying
                if let Err(mark_err) = queue.mark_failed(job.id, &e.to_string()).await {
                    debug!("[作业 {}] 标记失败未生效: {}", worker_id, mark_err);
                }
            }
        }
    }

    debug!("[作业 {}] worker 退出", worker_id);
    stats
}

/// 应用主结构
pub struct App {
    config: Config,
    queue: Arc<QueueManager>,
    sessions: Arc<SessionCache>,
    pool: WorkerPool,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        logging::init_log_file(&config.output_log_file)?;
        logging::log_startup(&config);

        // 浏览器
        let browser = if config.headless {
            browser::launch_headless_browser(config.chrome_executable.as_deref())
                .await
                .context("启动无头浏览器失败")?
        } else {
            browser::connect_to_browser(config.browser_debug_port)
                .await
                .context("连接浏览器失败")?
        };
        let driver: Arc<dyn BrowserDriver> = Arc::new(ChromiumDriver::new(browser));

        // 队列存储
        let store: Arc<dyn JobStore> = match &config.database_url {
            Some(url) => Arc::new(
                PostgresJobStore::connect(url, config.worker_count as u32 + 2)
                    .await
                    .context("连接数据库失败")?,
            ),
            None => {
                warn!("⚠️ 未配置 DATABASE_URL，使用内存队列（重启后丢失）");
                Arc::new(InMemoryJobStore::new())
            }
        };
        let queue = Arc::new(QueueManager::new(Arc::clone(&store)));

        // 职位种子
        if Path::new(&config.jobs_folder).exists() {
            info!("\n📁 正在扫描职位种子...");
            let seeds = load_job_seeds(&config.jobs_folder).await?;
            let count = queue.enqueue_all(seeds).await;
            info!("✓ 入队 {} 个职位", count);
        }

        let profile = Arc::new(
            load_profile(Path::new(&config.profile_path))
                .await
                .with_context(|| format!("加载用户资料失败: {}", config.profile_path))?,
        );

        let sessions = Arc::new(match &config.session_cache_path {
            Some(path) if Path::new(path).exists() => {
                SessionCache::load(Path::new(path), config.session_ttl()).await?
            }
            _ => SessionCache::new(config.session_ttl()),
        });
        let budget = Arc::new(BudgetTracker::new(
            config.daily_cost_ceiling_usd,
            config.hourly_attempt_ceiling,
        ));

        let resolver = Arc::new(ChallengeResolver::new(
            Arc::clone(&driver),
            budget,
            Arc::clone(&sessions),
            solving_providers(&config),
            notifier(&config),
            ResolverSettings::from_config(&config),
        ));
        let evidence = Arc::new(EvidenceWriter::new(&config.evidence_dir));
        let flow = Arc::new(ApplicationFlow::new(
            Arc::clone(&driver),
            FormFiller::new(Arc::clone(&driver), TypingPace::from_config(&config)),
            resolver,
            store,
            Arc::clone(&evidence),
            FlowSettings::from_config(&config),
        ));
        let processor = Arc::new(JobProcessor::new(
            Arc::clone(&queue),
            flow,
            Arc::new(RateLimiter::from_config(&config)),
            evidence,
            profile,
            RetryPolicy::from_config(&config),
        ));
        let pool = WorkerPool::new(
            Arc::clone(&queue),
            processor,
            config.worker_count,
            config.idle_poll_interval(),
        );

        Ok(Self {
            config,
            queue,
            sessions,
            pool,
        })
    }

    /// 运行应用主逻辑，直到 Ctrl-C
    pub async fn run(self) -> Result<()> {
        let cancel = CancellationToken::new();
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("⛔ 收到中断信号，正在停止...");
                signal_cancel.cancel();
            }
        });

        let queued = self.queue.list_queued(usize::MAX).await?;
        info!("✓ 队列中有 {} 个待申请职位", queued.len());

        let run_stats = self.pool.run(cancel).await;
        info!(
            "本次处理 {} 个职位 (归还 {}, 限流 {}, 错误 {})",
            run_stats.processed(),
            run_stats.released,
            run_stats.deferred,
            run_stats.errors
        );

        if let Some(path) = &self.config.session_cache_path {
            self.sessions.purge_expired();
            if let Err(e) = self.sessions.save(Path::new(path)).await {
                warn!("⚠️ 保存会话缓存失败: {}", e);
            }
        }

        let stats = self.queue.stats().await?;
        logging::print_final_stats(&stats, &self.config.output_log_file);
        Ok(())
    }
}

/// 按配置组装打码服务（主服务商在前）
fn solving_providers(config: &Config) -> Vec<Arc<dyn SolvingProvider>> {
    let mut providers: Vec<Arc<dyn SolvingProvider>> = Vec::new();
    if let Some(key) = &config.primary_solver_api_key {
        providers.push(Arc::new(TwoCaptchaClient::new(
            &config.primary_solver_base_url,
            key,
        )));
    }
    if let Some(key) = &config.secondary_solver_api_key {
        providers.push(Arc::new(AntiCaptchaClient::new(
            &config.secondary_solver_base_url,
            key,
        )));
    }
    if providers.is_empty() {
        warn!("⚠️ 未配置打码服务，验证码将直接转人工");
    }
    providers
}

fn notifier(config: &Config) -> Arc<dyn Notifier> {
    match &config.alert_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url)),
        None => Arc::new(LogNotifier),
    }
}
