//! Quote controller: request construction, supersession and route handling.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{intents_route, route_out, token, FakeRouter, FakeTokenService};
use rust_decimal::Decimal;
use swap_quoter::data_management::token_hub::{HubConfig, TokenHub};
use swap_quoter::engine::analytics::ImpactLevel;
use swap_quoter::engine::quoting::{QuoteConfig, QuoteController, QuoteStatus};
use swap_quoter::engine::router::{SlippageSetting, SwapAmount};
use swap_quoter::{QuoterError, SwapDirection};

async fn hub() -> Arc<TokenHub> {
    let service = FakeTokenService::new(vec![
        token("token-a.near", "AAA", 18, "1"),
        token("token-b.near", "BBB", 6, "2"),
    ]);
    let hub = TokenHub::new(service, HubConfig { prices_every: None, balances_every: None, ..HubConfig::default() });
    hub.refresh_tokens().await;
    hub
}

fn fill_form(controller: &QuoteController, amount: &str) {
    controller.set_token_in(Some("token-a.near".into()));
    controller.set_token_out(Some("token-b.near".into()));
    controller.set_amount(amount);
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(500)).await;
}

#[tokio::test(start_paused = true)]
async fn test_exact_in_estimate_is_formatted_with_output_decimals() {
    let router = FakeRouter::new(|_| (Duration::from_millis(20), Ok(vec![route_out("2000000")])));
    let controller = QuoteController::new(hub().await, router.clone(), QuoteConfig::default());

    fill_form(&controller, "5");
    settle().await;

    let view = controller.view();
    assert_eq!(view.status, QuoteStatus::Resolved);
    assert_eq!(view.form.amount_out, "2.0");
    assert_eq!(view.form.amount_in, "5");
    assert_eq!(view.route.unwrap().dex_id, "Rhea");

    let request = router.requests.lock().unwrap().last().cloned().unwrap();
    assert_eq!(request.amount, SwapAmount::ExactIn("5000000000000000000".into()));
    assert_eq!(request.max_wait_ms, 1500);
    assert!(request.trader_account_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_superseded_result_is_never_applied() {
    // The first amount gets a slow answer, the second a fast one.
    let router = FakeRouter::new(|request| match &request.amount {
        SwapAmount::ExactIn(raw) if raw == "5000000000000000000" => {
            (Duration::from_millis(300), Ok(vec![route_out("1000000")]))
        }
        _ => (Duration::from_millis(10), Ok(vec![route_out("3000000")])),
    });
    let controller = QuoteController::new(hub().await, router.clone(), QuoteConfig::default());

    fill_form(&controller, "5");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(controller.view().status, QuoteStatus::Fetching);

    controller.set_amount("6");
    tokio::time::sleep(Duration::from_secs(1)).await;

    let view = controller.view();
    assert_eq!(view.status, QuoteStatus::Resolved);
    assert_eq!(view.form.amount_out, "3.0");
}

#[tokio::test(start_paused = true)]
async fn test_empty_response_clears_computed_side_only() {
    let router = FakeRouter::new(|request| match &request.amount {
        SwapAmount::ExactIn(raw) if raw == "5000000000000000000" => (Duration::ZERO, Ok(vec![route_out("2000000")])),
        _ => (Duration::ZERO, Ok(Vec::new())),
    });
    let controller = QuoteController::new(hub().await, router, QuoteConfig::default());
    fill_form(&controller, "5");
    settle().await;
    assert_eq!(controller.view().form.amount_out, "2.0");

    controller.set_amount("7");
    settle().await;

    let view = controller.view();
    assert_eq!(view.status, QuoteStatus::NoRoute);
    assert_eq!(view.form.amount_in, "7");
    assert_eq!(view.form.amount_out, "");
    assert!(view.route.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_intents_only_routes_are_reported_as_unsupported() {
    let router = FakeRouter::new(|_| (Duration::ZERO, Ok(vec![intents_route()])));
    let controller = QuoteController::new(hub().await, router, QuoteConfig::default());

    fill_form(&controller, "5");
    settle().await;

    let view = controller.view();
    assert_eq!(view.status, QuoteStatus::UnsupportedRoute);
    assert!(view.route.is_none());
    assert_eq!(view.form.amount_out, "");
}

#[tokio::test(start_paused = true)]
async fn test_router_error_is_surfaced() {
    let router = FakeRouter::new(|_| (Duration::ZERO, Err(QuoterError::Http("router down".into()))));
    let controller = QuoteController::new(hub().await, router, QuoteConfig::default());

    fill_form(&controller, "5");
    settle().await;

    assert!(matches!(controller.view().status, QuoteStatus::Error(msg) if msg.contains("router down")));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_amount_never_reaches_the_router() {
    let router = FakeRouter::new(|_| (Duration::ZERO, Ok(vec![route_out("2000000")])));
    let controller = QuoteController::new(hub().await, router.clone(), QuoteConfig::default());

    fill_form(&controller, "0");
    settle().await;
    controller.set_amount("abc");
    settle().await;

    assert_eq!(router.calls(), 0);
    assert_eq!(controller.view().status, QuoteStatus::Idle);
    assert!(!controller.inputs_valid());
}

#[tokio::test(start_paused = true)]
async fn test_exact_out_requests_amount_out() {
    let router = FakeRouter::new(|_| {
        let mut route = route_out("0");
        route.estimated_amount.amount_in = Some("4000000000000000000".into());
        route.worst_case_amount.amount_in = Some("4100000000000000000".into());
        route.dex_id = "Veax".into();
        (Duration::ZERO, Ok(vec![route]))
    });
    let controller = QuoteController::new(hub().await, router.clone(), QuoteConfig::default());

    controller.set_direction(SwapDirection::ExactOut);
    controller.set_token_in(Some("token-a.near".into()));
    controller.set_token_out(Some("token-b.near".into()));
    controller.set_amount("2");
    settle().await;

    let view = controller.view();
    assert_eq!(view.form.amount_in, "4.0");
    assert_eq!(view.form.amount_out, "2");
    assert_eq!(view.worst_case.as_deref(), Some("4.1"));
    let request = router.requests.lock().unwrap().last().cloned().unwrap();
    assert_eq!(request.amount, SwapAmount::ExactOut("2000000".into()));
}

#[tokio::test(start_paused = true)]
async fn test_price_impact_and_worst_case_fallback() {
    let router = FakeRouter::new(|_| (Duration::ZERO, Ok(vec![route_out("2000000")])));
    let controller = QuoteController::new(hub().await, router, QuoteConfig::default());
    controller.set_slippage(SlippageSetting::Fixed(Decimal::new(5, 1)));

    fill_form(&controller, "5");
    settle().await;

    let view = controller.view();
    // $5 in, 2.0 BBB at $2 = $4 out.
    let impact = view.price_impact.unwrap();
    assert!((impact.percent - 20.0).abs() < 1e-9);
    assert_eq!(impact.level, ImpactLevel::Severe);
    // 0.5% below the estimate.
    assert_eq!(view.worst_case.as_deref(), Some("1.99"));
}

#[tokio::test(start_paused = true)]
async fn test_background_refresh_runs_only_with_valid_inputs() {
    let router = FakeRouter::new(|_| (Duration::ZERO, Ok(vec![route_out("2000000")])));
    let controller = QuoteController::new(hub().await, router.clone(), QuoteConfig::default());
    controller.start();

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(router.calls(), 0);

    fill_form(&controller, "5");
    settle().await;
    let after_fill = router.calls();
    assert!(after_fill >= 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(router.calls(), after_fill + 2);

    controller.stop();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(router.calls(), after_fill + 2);
}

#[tokio::test(start_paused = true)]
async fn test_trader_account_is_forwarded() {
    let router = FakeRouter::new(|_| (Duration::ZERO, Ok(vec![route_out("2000000")])));
    let controller = QuoteController::new(hub().await, router.clone(), QuoteConfig::default());

    controller.set_trader_account(Some("alice.near".into()));
    fill_form(&controller, "5");
    settle().await;

    let request = router.requests.lock().unwrap().last().cloned().unwrap();
    assert_eq!(request.trader_account_id.as_deref(), Some("alice.near"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refreshes_settle_on_the_newest() {
    let router = FakeRouter::new(|_| (Duration::from_millis(1), Ok(vec![route_out("2000000")])));
    let controller = QuoteController::new(hub().await, router, QuoteConfig::default());
    fill_form(&controller, "5");
    tokio::time::sleep(Duration::from_millis(50)).await;

    for _ in 0..20 {
        let refreshes: Vec<_> = (0..16)
            .map(|_| {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move { controller.refresh_quote().await })
            })
            .collect();
        for refresh in refreshes {
            refresh.await.unwrap();
        }
        assert_eq!(controller.view().status, QuoteStatus::Resolved);
    }
}
