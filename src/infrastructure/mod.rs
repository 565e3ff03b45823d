//! 基础设施层：持有共享资源，只暴露能力

pub mod budget;
pub mod js_executor;
pub mod rate_limiter;
pub mod session_cache;

pub use budget::{BudgetReservation, BudgetTracker};
pub use js_executor::JsExecutor;
pub use rate_limiter::{RateLimitScope, RateLimited, RateLimiter};
pub use session_cache::{SessionCache, SessionCacheEntry};
