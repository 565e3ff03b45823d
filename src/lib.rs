//! # Auto Apply
//!
//! 自动投递职位申请：从队列认领职位，填写申请表，处理验证码，提交并记录结果
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 基础设施层（Infrastructure / Browser / Store / Clients）
//! - `infrastructure/` - 进程内共享状态：打码预算、会话缓存、申请频率
//! - `browser/` - `BrowserDriver` 抽象与 chromiumoxide 实现
//! - `store/` - `JobStore`：PostgreSQL 与内存两种实现
//! - `clients/` - 打码服务和通知
//!
//! ### ② 业务能力层（Services）
//! - `QueueManager` - 职位入队、认领与状态迁移
//! - `field_classifier` / `FormFiller` - 字段分类与填写
//! - `ChallengeResolver` - 三层验证码处理
//! - `EvidenceWriter` - 截图与人工待办
//!
//! ### ③ 流程层（Workflow）
//! - `ApplicationFlow` - 一次尝试：navigating → filling → resolving → submitting
//! - `RetryPolicy` - 临时错误的重试策略
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/job_processor` - 单个职位的处理与落库
//! - `orchestrator/worker_pool` - 多 worker 认领循环与应用入口
//!
//! ## 模块结构

pub mod browser;
pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod store;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult, FailureClass};
pub use orchestrator::{App, JobProcessor, JobResult, RunStats, WorkerPool};
pub use services::{ChallengeResolver, FormFiller, QueueManager};
pub use store::{InMemoryJobStore, JobStore, PostgresJobStore};
pub use utils::logging as logger;
pub use workflow::{ApplicationCtx, ApplicationFlow, AttemptOutcome};
