mod common;

use std::sync::Arc;

use auto_apply::browser::PageHandle;
use auto_apply::clients::SolvingProvider;
use auto_apply::config::Config;
use auto_apply::models::{Challenge, ChallengeKind, ResolutionOutcome, ResolutionTier};
use auto_apply::services::ResolveContext;

use common::{
    challenge, fast_config, providers, sample_profile, BrowserScript, FakeBrowser, FakeSolver,
    Harness, SolverScript,
};

const JOB_URL: &str = "https://boards.greenhouse.io/acme/jobs/1";

fn harness_with(
    config: Config,
    script: BrowserScript,
    solvers: Vec<Arc<dyn SolvingProvider>>,
) -> Harness {
    Harness::new(config, FakeBrowser::new(script), solvers, sample_profile())
}

/// 页面上放一个验证码，然后交给处理器
async fn resolve(h: &Harness, found: &Challenge) -> ResolutionOutcome {
    h.browser.script().challenge = Some(found.clone());
    let page = PageHandle {
        id: "page-1".into(),
        url: JOB_URL.into(),
    };
    let ctx = ResolveContext {
        page: &page,
        application_id: None,
        job_url: JOB_URL,
    };
    h.resolver.resolve(found, &ctx).await
}

#[tokio::test]
async fn checkbox_click_solves_at_tier_one_for_free() {
    let solver = FakeSolver::new(
        "primary",
        0.003,
        SolverScript::Solve {
            token: "tok".into(),
            pending_polls: 0,
        },
    );
    let h = harness_with(
        fast_config(),
        BrowserScript {
            checkbox_clears: true,
            ..BrowserScript::default()
        },
        providers(&[&solver]),
    );

    let found = challenge(ChallengeKind::RecaptchaV2);
    let outcome = resolve(&h, &found).await;

    assert!(outcome.solved);
    assert_eq!(outcome.tier_used, ResolutionTier::Auto);
    assert_eq!(outcome.cost_usd, 0.0);
    assert_eq!(outcome.tiers_tried(), vec![ResolutionTier::Auto]);
    assert_eq!(solver.submit_count(), 0);
    assert_eq!(h.budget.spent_today_usd(), 0.0);
    // 成功后缓存会话
    assert!(h.sessions.get(&found.domain()).is_some());
}

#[tokio::test]
async fn service_solve_records_cost_and_injects_token() {
    let solver = FakeSolver::new(
        "primary",
        0.003,
        SolverScript::Solve {
            token: "03AGdBq2".into(),
            pending_polls: 2,
        },
    );
    let h = harness_with(
        fast_config(),
        BrowserScript {
            inject_clears: true,
            ..BrowserScript::default()
        },
        providers(&[&solver]),
    );

    let outcome = resolve(&h, &challenge(ChallengeKind::Hcaptcha)).await;

    assert!(outcome.solved);
    assert_eq!(outcome.tier_used, ResolutionTier::Service);
    assert!((outcome.cost_usd - 0.003).abs() < 1e-9);
    assert!(outcome.cost_usd <= h.config.daily_cost_ceiling_usd);
    assert_eq!(outcome.tiers_tried(), vec![ResolutionTier::Service]);
    assert_eq!(h.browser.script().injected, vec!["03AGdBq2".to_string()]);
    assert!((h.budget.spent_today_usd() - 0.003).abs() < 1e-9);
    assert_eq!(h.budget.attempts_this_hour(), 1);
    assert_eq!(h.notifier.count(), 0);
}

#[tokio::test]
async fn human_timeout_leaves_challenge_unsolved() {
    let h = harness_with(fast_config(), BrowserScript::default(), Vec::new());

    let outcome = resolve(&h, &challenge(ChallengeKind::Unknown)).await;

    assert!(!outcome.solved);
    assert_eq!(outcome.tier_used, ResolutionTier::Human);
    assert_eq!(outcome.tiers_tried(), vec![ResolutionTier::Human]);
    assert!(outcome.error.unwrap().contains("timed out"));
    assert_eq!(outcome.cost_usd, 0.0);
    // 通知已发送
    assert_eq!(h.notifier.count(), 1);
    let message = h.notifier.messages.lock().unwrap()[0].clone();
    assert!(message.contains(JOB_URL));
}

#[tokio::test]
async fn human_clearing_the_page_counts_as_solved() {
    let h = harness_with(
        fast_config(),
        BrowserScript {
            human_clears_after_polls: Some(3),
            ..BrowserScript::default()
        },
        Vec::new(),
    );

    let found = challenge(ChallengeKind::Funcaptcha);
    let outcome = resolve(&h, &found).await;

    assert!(outcome.solved);
    assert_eq!(outcome.tier_used, ResolutionTier::Human);
    assert!(h.sessions.get(&found.domain()).is_some());
}

#[tokio::test]
async fn hourly_ceiling_skips_service_tier() {
    let solver = FakeSolver::new(
        "primary",
        0.003,
        SolverScript::Solve {
            token: "tok".into(),
            pending_polls: 0,
        },
    );
    let config = Config {
        hourly_attempt_ceiling: 0,
        ..fast_config()
    };
    let h = harness_with(config, BrowserScript::default(), providers(&[&solver]));

    let outcome = resolve(&h, &challenge(ChallengeKind::Turnstile)).await;

    assert!(!outcome.solved);
    assert_eq!(solver.submit_count(), 0);
    assert_eq!(outcome.tiers_tried(), vec![ResolutionTier::Human]);
    assert_eq!(h.notifier.count(), 1);
}

#[tokio::test]
async fn daily_budget_ceiling_is_never_exceeded() {
    let solver = FakeSolver::new(
        "primary",
        0.003,
        SolverScript::Solve {
            token: "tok".into(),
            pending_polls: 0,
        },
    );
    let config = Config {
        daily_cost_ceiling_usd: 0.005,
        ..fast_config()
    };
    let h = harness_with(
        config,
        BrowserScript {
            inject_clears: true,
            ..BrowserScript::default()
        },
        providers(&[&solver]),
    );

    // 第一次花费 0.003，第二次会超出 0.005
    let first = resolve(&h, &challenge(ChallengeKind::Hcaptcha)).await;
    assert!(first.solved);
    h.sessions.invalidate("boards.greenhouse.io");

    let second = resolve(&h, &challenge(ChallengeKind::Hcaptcha)).await;
    assert!(!second.solved);
    assert_eq!(solver.submit_count(), 1);
    assert!(h.budget.spent_today_usd() <= 0.005);
}

#[tokio::test]
async fn secondary_provider_used_only_after_primary_error() {
    let primary = FakeSolver::new("primary", 0.003, SolverScript::Error);
    let secondary = FakeSolver::new(
        "secondary",
        0.002,
        SolverScript::Solve {
            token: "from-secondary".into(),
            pending_polls: 1,
        },
    );
    let h = harness_with(
        fast_config(),
        BrowserScript {
            inject_clears: true,
            ..BrowserScript::default()
        },
        providers(&[&primary, &secondary]),
    );

    let outcome = resolve(&h, &challenge(ChallengeKind::Hcaptcha)).await;

    assert!(outcome.solved);
    assert_eq!(primary.submit_count(), 1);
    assert_eq!(secondary.submit_count(), 1);
    assert_eq!(
        outcome.tiers_tried(),
        vec![ResolutionTier::Service, ResolutionTier::Service]
    );
    // 出错的服务商不计费
    assert_eq!(outcome.attempts[0].cost_usd, 0.0);
    assert!((outcome.cost_usd - 0.002).abs() < 1e-9);
    assert!((h.budget.spent_today_usd() - 0.002).abs() < 1e-9);
}

#[tokio::test]
async fn primary_timeout_goes_straight_to_human() {
    let primary = FakeSolver::new("primary", 0.003, SolverScript::NeverReady);
    let secondary = FakeSolver::new(
        "secondary",
        0.002,
        SolverScript::Solve {
            token: "unused".into(),
            pending_polls: 0,
        },
    );
    let h = harness_with(
        fast_config(),
        BrowserScript::default(),
        providers(&[&primary, &secondary]),
    );

    let outcome = resolve(&h, &challenge(ChallengeKind::Hcaptcha)).await;

    assert!(!outcome.solved);
    assert_eq!(secondary.submit_count(), 0);
    assert_eq!(
        outcome.tiers_tried(),
        vec![ResolutionTier::Service, ResolutionTier::Human]
    );
    // 超时的预留已退回
    assert_eq!(h.budget.spent_today_usd(), 0.0);
}

#[tokio::test]
async fn cached_session_is_reused_without_paying() {
    let solver = FakeSolver::new(
        "primary",
        0.003,
        SolverScript::Solve {
            token: "tok".into(),
            pending_polls: 0,
        },
    );
    let h = harness_with(
        fast_config(),
        BrowserScript {
            session_bypasses: true,
            ..BrowserScript::default()
        },
        providers(&[&solver]),
    );
    h.sessions.put("boards.greenhouse.io", "cookies=previous");

    let outcome = resolve(&h, &challenge(ChallengeKind::Hcaptcha)).await;

    assert!(outcome.solved);
    assert_eq!(outcome.tier_used, ResolutionTier::Auto);
    assert_eq!(solver.submit_count(), 0);
    assert_eq!(
        h.browser.script().applied_sessions,
        vec!["cookies=previous".to_string()]
    );
}

#[tokio::test]
async fn stale_session_is_replaced_after_service_solve() {
    let solver = FakeSolver::new(
        "primary",
        0.003,
        SolverScript::Solve {
            token: "tok".into(),
            pending_polls: 0,
        },
    );
    let h = harness_with(
        fast_config(),
        BrowserScript {
            inject_clears: true,
            ..BrowserScript::default()
        },
        providers(&[&solver]),
    );
    h.sessions.put("boards.greenhouse.io", "cookies=stale");

    let outcome = resolve(&h, &challenge(ChallengeKind::Hcaptcha)).await;

    assert!(outcome.solved);
    // 失败的第一层也留下记录，层级严格递增
    assert_eq!(
        outcome.tiers_tried(),
        vec![ResolutionTier::Auto, ResolutionTier::Service]
    );
    assert!(!outcome.attempts[0].solved);
    let cached = h.sessions.get("boards.greenhouse.io").unwrap();
    assert_eq!(cached.state, "cookies=solved");
}

#[tokio::test]
async fn checkbox_only_challenge_is_cleared_at_tier_one() {
    let solver = FakeSolver::new(
        "primary",
        0.003,
        SolverScript::Solve {
            token: "tok".into(),
            pending_polls: 0,
        },
    );
    let h = harness_with(
        fast_config(),
        BrowserScript {
            checkbox_clears: true,
            ..BrowserScript::default()
        },
        providers(&[&solver]),
    );

    let outcome = resolve(&h, &challenge(ChallengeKind::CheckboxOnly)).await;

    assert!(outcome.solved);
    assert_eq!(outcome.cost_usd, 0.0);
    assert_eq!(outcome.tiers_tried(), vec![ResolutionTier::Auto]);
    assert_eq!(h.browser.script().checkbox_clicks, 1);
    assert_eq!(solver.submit_count(), 0);
    assert_eq!(h.notifier.count(), 0);
}

#[tokio::test]
async fn image_challenge_over_daily_budget_goes_straight_to_human() {
    let solver = FakeSolver::new(
        "primary",
        0.003,
        SolverScript::Solve {
            token: "tok".into(),
            pending_polls: 0,
        },
    );
    let config = Config {
        daily_cost_ceiling_usd: 0.005,
        ..fast_config()
    };
    let h = harness_with(
        config,
        BrowserScript {
            inject_clears: true,
            ..BrowserScript::default()
        },
        providers(&[&solver]),
    );
    // 今天的预算已经用完
    h.budget.record_spend(0.005);

    let outcome = resolve(&h, &challenge(ChallengeKind::Image)).await;

    assert!(!outcome.solved);
    assert_eq!(solver.submit_count(), 0);
    assert_eq!(outcome.tiers_tried(), vec![ResolutionTier::Human]);
    assert_eq!(outcome.cost_usd, 0.0);
    assert_eq!(h.notifier.count(), 1);
    assert!((h.budget.spent_today_usd() - 0.005).abs() < 1e-9);
}
