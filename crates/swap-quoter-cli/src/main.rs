use std::sync::Arc;

use anyhow::Result;
use swap_quoter::config::AppConfig;
use swap_quoter::data_management::balance_events::WsEventConnector;
use swap_quoter::data_management::{HttpTokenService, TokenHub, TokenListFilter};
use swap_quoter::engine::analytics::ImpactLevel;
use swap_quoter::engine::{HttpRouteProvider, QuoteController, QuoteStatus, QuoteView};
use swap_quoter::SwapDirection;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_quote(view: &QuoteView, sell_symbol: &str, buy_symbol: &str, update: u64) {
    println!("\n--- Quote {} ---", update);
    match &view.status {
        QuoteStatus::Resolved => {
            println!("Selling: {} {}", view.form.amount_in, sell_symbol);
            println!("Receiving: {} {}", view.form.amount_out, buy_symbol);
            if let Some(route) = &view.route {
                println!("Venue: {}", route.dex_id);
                if route.needs_unwrap {
                    println!("Unwrap: required after swap");
                }
            }
            if let Some(bound) = &view.worst_case {
                match view.form.direction {
                    SwapDirection::ExactIn => println!("Minimum received: {} {}", bound, buy_symbol),
                    SwapDirection::ExactOut => println!("Maximum paid: {} {}", bound, sell_symbol),
                }
            }
            match view.price_impact {
                Some(impact) => {
                    let marker = match impact.level {
                        ImpactLevel::Normal => "",
                        ImpactLevel::Warning => " (warning)",
                        ImpactLevel::Severe => " (SEVERE)",
                    };
                    println!("Price impact: {:.2}%{}", impact.percent, marker);
                }
                None => println!("Price impact: N/A"),
            }
        }
        QuoteStatus::NoRoute => println!("No route available"),
        QuoteStatus::UnsupportedRoute => println!("Only routes this client cannot execute are available"),
        QuoteStatus::Error(e) => println!("Quote failed: {}", e),
        QuoteStatus::Idle | QuoteStatus::Fetching => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load_with_cli();
    let sell_token = config.sell_token.clone().ok_or_else(|| anyhow::anyhow!("--sell-token is required"))?;
    let buy_token = config.buy_token.clone().ok_or_else(|| anyhow::anyhow!("--buy-token is required"))?;
    let amount = config.amount.clone().ok_or_else(|| anyhow::anyhow!("--amount is required"))?;

    let service = Arc::new(HttpTokenService::new(config.token_api_url.clone()));
    let hub = match &config.events_ws_url {
        Some(url) => TokenHub::with_events(service, Arc::new(WsEventConnector::new(url.clone())), config.hub_config()),
        None => TokenHub::new(service, config.hub_config()),
    };
    let (_wallet_tx, wallet_rx) = watch::channel(config.wallet_account.clone());
    hub.start(wallet_rx);

    let sell = hub
        .ensure_token_by_id(&sell_token)
        .await
        .ok_or_else(|| anyhow::anyhow!("unknown token {}", sell_token))?;
    let buy = hub
        .ensure_token_by_id(&buy_token)
        .await
        .ok_or_else(|| anyhow::anyhow!("unknown token {}", buy_token))?;

    let router = Arc::new(HttpRouteProvider::new(config.router_url.clone()));
    let controller = QuoteController::new(Arc::clone(&hub), router, config.quote_config());
    let mut updates = controller.subscribe();
    controller.set_slippage(config.slippage());
    controller.set_trader_account(config.wallet_account.clone());
    controller.set_direction(config.direction);
    controller.set_token_in(Some(sell.account_id.clone()));
    controller.set_token_out(Some(buy.account_id.clone()));
    controller.set_amount(amount.clone());
    controller.start();

    println!(
        "Quoting {} {} {} continuously (Ctrl-C to stop)...",
        match config.direction {
            SwapDirection::ExactIn => "selling",
            SwapDirection::ExactOut => "buying",
        },
        amount,
        match config.direction {
            SwapDirection::ExactIn => &sell.metadata.symbol,
            SwapDirection::ExactOut => &buy.metadata.symbol,
        }
    );

    let mut update_count = 0;
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                if matches!(view.status, QuoteStatus::Idle | QuoteStatus::Fetching) {
                    continue;
                }
                update_count += 1;
                print_quote(&view, &sell.metadata.symbol, &buy.metadata.symbol, update_count);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    controller.stop();
    hub.stop();

    let held = hub.select_token_list(TokenListFilter { only_with_balance: true, ..Default::default() });
    if !held.is_empty() {
        println!("\n--- Balances ---");
        for token in held {
            println!(
                "{:>12} {}",
                token.balance_usd.map(|v| format!("${:.2}", v)).unwrap_or_default(),
                token.metadata.symbol
            );
        }
    }
    Ok(())
}
