//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `worker_pool` - Worker 池与应用入口
//! - 管理应用生命周期（初始化、运行、清理）
//! - N 个 worker 并发认领职位
//! - 持有浏览器、队列、会话缓存等共享资源
//! - 输出全局统计信息
//!
//! ### `job_processor` - 单个职位处理器
//! - 频率检查、创建申请记录、按策略重试
//! - 把 `AttemptOutcome` 落库为申请状态和职位状态
//!
//! ## 层次关系
//!
//! ```text
//! worker_pool (认领循环)
//!     ↓
//! job_processor (处理一个 Job)
//!     ↓
//! workflow::ApplicationFlow (一次尝试)
//!     ↓
//! services (能力层：填表 / 验证码 / 队列 / 证据)
//!     ↓
//! infrastructure + browser + store
//! ```

pub mod job_processor;
pub mod worker_pool;

pub use job_processor::{JobProcessor, JobResult};
pub use worker_pool::{App, RunStats, WorkerPool};
