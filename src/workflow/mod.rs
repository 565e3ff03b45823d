pub mod application_ctx;
pub mod application_flow;
pub mod retry_policy;

pub use application_ctx::ApplicationCtx;
pub use application_flow::{ApplicationFlow, AttemptOutcome, FlowSettings};
pub use retry_policy::RetryPolicy;
