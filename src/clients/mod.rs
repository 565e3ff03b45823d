pub mod notifier;
pub mod solver;

pub use notifier::{LogNotifier, Notifier, WebhookNotifier};
pub use solver::{
    price_for, AntiCaptchaClient, PollStatus, SolveTask, SolvingProvider, TwoCaptchaClient,
};
