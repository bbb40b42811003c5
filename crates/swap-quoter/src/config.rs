//! Configuration loading, env vars, CLI flags.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

use crate::data_management::token_hub::{HubConfig, DEFAULT_BALANCE_DEBOUNCE};
use crate::engine::quoting::{QuoteConfig, DEFAULT_MAX_WAIT_MS};
use crate::engine::router::SlippageSetting;
use crate::types::SwapDirection;

#[cfg(feature = "cli")]
use clap::Parser;

const DEFAULT_TOKEN_API_URL: &str = "https://prices.intear.tech";
const DEFAULT_ROUTER_URL: &str = "https://router.intear.tech";
const DEFAULT_EVENTS_WS_URL: &str = "wss://ws-events-v3.intear.tech/events";
const DEFAULT_EVENT_CATEGORIES: &str = "ft_transfer,near_transfer";
const DEFAULT_DEXES: &str = "Rhea,Veax,Aidols,GraFun,Jumpdefi,Wrap";
const DEFAULT_PRICES_REFRESH_SECS: u64 = 10;
const DEFAULT_BALANCES_REFRESH_SECS: u64 = 30;
const DEFAULT_QUOTE_REFRESH_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub token_api_url: String,
    pub router_url: String,
    /// `None` disables event-driven balance refresh.
    pub events_ws_url: Option<String>,
    pub event_categories: Vec<String>,
    /// 0 disables the periodic refresh.
    pub prices_refresh_secs: u64,
    pub balances_refresh_secs: u64,
    pub quote_refresh_secs: u64,
    pub quote_max_wait_ms: u64,
    pub dexes: Vec<String>,
    pub auto_slippage_min: Decimal,
    pub auto_slippage_max: Decimal,
    /// Fixed slippage percent; overrides the auto band when set.
    pub fixed_slippage: Option<Decimal>,
    pub wallet_account: Option<String>,
    pub sell_token: Option<String>,
    pub buy_token: Option<String>,
    pub amount: Option<String>,
    pub direction: SwapDirection,
}

#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub token_api_url: Option<String>,
    pub router_url: Option<String>,
    pub events_ws_url: Option<String>,
    pub event_categories: Option<Vec<String>>,
    pub prices_refresh_secs: Option<u64>,
    pub balances_refresh_secs: Option<u64>,
    pub quote_refresh_secs: Option<u64>,
    pub quote_max_wait_ms: Option<u64>,
    pub dexes: Option<Vec<String>>,
    pub auto_slippage_min: Option<String>,
    pub auto_slippage_max: Option<String>,
    pub fixed_slippage: Option<String>,
    pub wallet_account: Option<String>,
    pub sell_token: Option<String>,
    pub buy_token: Option<String>,
    pub amount: Option<String>,
    pub exact_out: Option<bool>,
}

#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliConfig {
    #[arg(long)]
    pub config: Option<String>,
    #[arg(long)]
    pub token_api_url: Option<String>,
    #[arg(long)]
    pub router_url: Option<String>,
    #[arg(long)]
    pub events_ws_url: Option<String>,
    #[arg(long, value_delimiter = ',')]
    pub event_categories: Option<Vec<String>>,
    #[arg(long)]
    pub prices_refresh_secs: Option<u64>,
    #[arg(long)]
    pub balances_refresh_secs: Option<u64>,
    #[arg(long)]
    pub quote_refresh_secs: Option<u64>,
    #[arg(long)]
    pub quote_max_wait_ms: Option<u64>,
    #[arg(long, value_delimiter = ',')]
    pub dexes: Option<Vec<String>>,
    #[arg(long)]
    pub auto_slippage_min: Option<String>,
    #[arg(long)]
    pub auto_slippage_max: Option<String>,
    #[arg(long)]
    pub slippage: Option<String>,
    #[arg(long)]
    pub account: Option<String>,
    #[arg(long)]
    pub sell_token: Option<String>,
    #[arg(long)]
    pub buy_token: Option<String>,
    #[arg(long)]
    pub amount: Option<String>,
    #[arg(long)]
    pub exact_out: bool,
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|s| split_list(&s))
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',').map(str::trim).filter(|p| !p.is_empty()).map(str::to_string).collect()
}

fn parse_percent(key: &str, value: Option<String>) -> Option<Decimal> {
    let value = value?;
    match Decimal::from_str(value.trim()) {
        Ok(d) if !d.is_sign_negative() => Some(d),
        _ => {
            warn!("ignoring invalid {} '{}'", key, value);
            None
        }
    }
}

fn secs(every: u64) -> Option<Duration> {
    (every > 0).then(|| Duration::from_secs(every))
}

impl AppConfig {
    pub fn load() -> Self {
        let events_ws_url = match env::var("EVENTS_WS_URL") {
            Ok(url) if url.is_empty() => None,
            Ok(url) => Some(url),
            Err(_) => Some(DEFAULT_EVENTS_WS_URL.to_string()),
        };
        let wallet_account = env::var("WALLET_ACCOUNT").ok();
        if wallet_account.is_none() {
            info!("WALLET_ACCOUNT not set. Balances will stay empty.");
        }

        Self {
            token_api_url: env::var("TOKEN_API_URL").unwrap_or_else(|_| DEFAULT_TOKEN_API_URL.to_string()),
            router_url: env::var("ROUTER_URL").unwrap_or_else(|_| DEFAULT_ROUTER_URL.to_string()),
            events_ws_url,
            event_categories: env_list("EVENT_CATEGORIES").unwrap_or_else(|| split_list(DEFAULT_EVENT_CATEGORIES)),
            prices_refresh_secs: env_u64("PRICES_REFRESH_SECS").unwrap_or(DEFAULT_PRICES_REFRESH_SECS),
            balances_refresh_secs: env_u64("BALANCES_REFRESH_SECS").unwrap_or(DEFAULT_BALANCES_REFRESH_SECS),
            quote_refresh_secs: env_u64("QUOTE_REFRESH_SECS").unwrap_or(DEFAULT_QUOTE_REFRESH_SECS),
            quote_max_wait_ms: env_u64("QUOTE_MAX_WAIT_MS").unwrap_or(DEFAULT_MAX_WAIT_MS),
            dexes: env_list("DEXES").unwrap_or_else(|| split_list(DEFAULT_DEXES)),
            auto_slippage_min: parse_percent("AUTO_SLIPPAGE_MIN", env::var("AUTO_SLIPPAGE_MIN").ok())
                .unwrap_or_else(|| QuoteConfig::default().auto_slippage.0),
            auto_slippage_max: parse_percent("AUTO_SLIPPAGE_MAX", env::var("AUTO_SLIPPAGE_MAX").ok())
                .unwrap_or_else(|| QuoteConfig::default().auto_slippage.1),
            fixed_slippage: parse_percent("SLIPPAGE", env::var("SLIPPAGE").ok()),
            wallet_account,
            sell_token: env::var("SELL_TOKEN").ok(),
            buy_token: env::var("BUY_TOKEN").ok(),
            amount: env::var("AMOUNT").ok(),
            direction: SwapDirection::ExactIn,
        }
    }

    #[cfg(feature = "cli")]
    pub fn load_with_cli() -> Self {
        let cli = CliConfig::parse();
        let mut file_config = FileConfig::default();
        if let Some(ref path) = cli.config {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str::<FileConfig>(&contents) {
                    Ok(cfg) => file_config = cfg,
                    Err(e) => warn!("ignoring config file {}: {}", path, e),
                },
                Err(e) => warn!("could not read config file {}: {}", path, e),
            }
        }
        let env_config = Self::load();

        let exact_out = cli.exact_out || file_config.exact_out.unwrap_or(false);
        Self {
            token_api_url: cli.token_api_url.or(file_config.token_api_url).unwrap_or(env_config.token_api_url),
            router_url: cli.router_url.or(file_config.router_url).unwrap_or(env_config.router_url),
            events_ws_url: cli.events_ws_url.or(file_config.events_ws_url).or(env_config.events_ws_url),
            event_categories: cli
                .event_categories
                .or(file_config.event_categories)
                .unwrap_or(env_config.event_categories),
            prices_refresh_secs: cli
                .prices_refresh_secs
                .or(file_config.prices_refresh_secs)
                .unwrap_or(env_config.prices_refresh_secs),
            balances_refresh_secs: cli
                .balances_refresh_secs
                .or(file_config.balances_refresh_secs)
                .unwrap_or(env_config.balances_refresh_secs),
            quote_refresh_secs: cli
                .quote_refresh_secs
                .or(file_config.quote_refresh_secs)
                .unwrap_or(env_config.quote_refresh_secs),
            quote_max_wait_ms: cli
                .quote_max_wait_ms
                .or(file_config.quote_max_wait_ms)
                .unwrap_or(env_config.quote_max_wait_ms),
            dexes: cli.dexes.or(file_config.dexes).unwrap_or(env_config.dexes),
            auto_slippage_min: parse_percent("auto_slippage_min", cli.auto_slippage_min.or(file_config.auto_slippage_min))
                .unwrap_or(env_config.auto_slippage_min),
            auto_slippage_max: parse_percent("auto_slippage_max", cli.auto_slippage_max.or(file_config.auto_slippage_max))
                .unwrap_or(env_config.auto_slippage_max),
            fixed_slippage: parse_percent("slippage", cli.slippage.or(file_config.fixed_slippage))
                .or(env_config.fixed_slippage),
            wallet_account: cli.account.or(file_config.wallet_account).or(env_config.wallet_account),
            sell_token: cli.sell_token.or(file_config.sell_token).or(env_config.sell_token),
            buy_token: cli.buy_token.or(file_config.buy_token).or(env_config.buy_token),
            amount: cli.amount.or(file_config.amount).or(env_config.amount),
            direction: if exact_out { SwapDirection::ExactOut } else { SwapDirection::ExactIn },
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            prices_every: secs(self.prices_refresh_secs),
            balances_every: secs(self.balances_refresh_secs),
            balance_debounce: DEFAULT_BALANCE_DEBOUNCE,
            event_categories: self.event_categories.clone(),
        }
    }

    pub fn quote_config(&self) -> QuoteConfig {
        QuoteConfig {
            max_wait_ms: self.quote_max_wait_ms,
            refresh_every: secs(self.quote_refresh_secs),
            dexes: self.dexes.clone(),
            auto_slippage: (self.auto_slippage_min, self.auto_slippage_max),
        }
    }

    /// Slippage the quote form starts with.
    pub fn slippage(&self) -> SlippageSetting {
        match self.fixed_slippage {
            Some(percent) => SlippageSetting::Fixed(percent),
            None => SlippageSetting::Auto { min: self.auto_slippage_min, max: self.auto_slippage_max },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_interval_disables_refresh() {
        assert_eq!(secs(0), None);
        assert_eq!(secs(5), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_list_and_percent_parsing() {
        assert_eq!(split_list(" Rhea, ,Veax "), vec!["Rhea", "Veax"]);
        assert_eq!(parse_percent("x", Some("0.5".into())), Some(Decimal::new(5, 1)));
        assert_eq!(parse_percent("x", Some("-1".into())), None);
        assert_eq!(parse_percent("x", Some("abc".into())), None);
    }

    #[test]
    fn test_file_config_parses_partial_toml() {
        let cfg: FileConfig = toml::from_str("router_url = \"http://localhost:3000\"\ndexes = [\"Rhea\"]\n").unwrap();
        assert_eq!(cfg.router_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(cfg.dexes, Some(vec!["Rhea".to_string()]));
        assert!(cfg.sell_token.is_none());
    }
}
