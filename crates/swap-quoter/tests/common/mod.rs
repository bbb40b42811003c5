//! In-memory collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use swap_quoter::data_management::api_client::{HeldToken, RegistrationService, TokenService};
use swap_quoter::data_management::token::{BalanceSource, Token};
use swap_quoter::engine::router::{Route, RouteProvider, RouteRequest};
use swap_quoter::{QuoterError, Result};

pub fn token(id: &str, symbol: &str, decimals: u32, price: &str) -> Token {
    serde_json::from_value(json!({
        "account_id": id,
        "metadata": { "name": symbol, "symbol": symbol, "decimals": decimals, "icon": format!("data:{}", id) },
        "price_usd": price,
        "liquidity_usd": 1000.0,
        "volume_usd_24h": 100.0,
        "reputation": "Reputable",
        "created_at": "2024-01-01T00:00:00Z",
    }))
    .unwrap()
}

pub fn held(token: Token, balance: &str) -> HeldToken {
    HeldToken { token, balance: balance.to_string(), source: BalanceSource::Indexer }
}

#[derive(Default)]
pub struct FakeTokenService {
    pub tokens: Mutex<Vec<Token>>,
    pub prices: Mutex<HashMap<String, String>>,
    pub balances: Mutex<HashMap<String, Vec<HeldToken>>>,
    pub search_results: Mutex<Vec<Token>>,
    pub unregistered: Mutex<Vec<String>>,
    pub fail_tokens: AtomicBool,
    pub delay: Mutex<Duration>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl FakeTokenService {
    pub fn new(tokens: Vec<Token>) -> Arc<Self> {
        let service = Self::default();
        *service.tokens.lock().unwrap() = tokens;
        Arc::new(service)
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        self.calls.lock().unwrap().get(endpoint).copied().unwrap_or(0)
    }

    async fn hit(&self, endpoint: &'static str) {
        *self.calls.lock().unwrap().entry(endpoint).or_default() += 1;
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl TokenService for FakeTokenService {
    async fn fetch_tokens(&self) -> Result<Vec<Token>> {
        self.hit("tokens").await;
        if self.fail_tokens.load(Ordering::SeqCst) {
            return Err(QuoterError::Http("tokens endpoint unavailable".into()));
        }
        Ok(self.tokens.lock().unwrap().clone())
    }

    async fn fetch_prices(&self) -> Result<HashMap<String, String>> {
        self.hit("prices").await;
        Ok(self.prices.lock().unwrap().clone())
    }

    async fn fetch_token(&self, account_id: &str) -> Result<Option<Token>> {
        self.hit("token").await;
        Ok(self.tokens.lock().unwrap().iter().find(|t| t.account_id == account_id).cloned())
    }

    async fn fetch_balances(&self, account_id: &str) -> Result<Vec<HeldToken>> {
        self.hit("balances").await;
        Ok(self.balances.lock().unwrap().get(account_id).cloned().unwrap_or_default())
    }

    async fn search_tokens(&self, _query: &str) -> Result<Vec<Token>> {
        self.hit("search").await;
        Ok(self.search_results.lock().unwrap().clone())
    }
}

#[async_trait]
impl RegistrationService for FakeTokenService {
    async fn unregistered_tokens(&self, _account_id: &str, token_ids: &[String]) -> Result<Vec<String>> {
        self.hit("storage").await;
        let unregistered = self.unregistered.lock().unwrap();
        Ok(token_ids.iter().filter(|id| unregistered.contains(id)).cloned().collect())
    }
}

type Responder = Box<dyn Fn(&RouteRequest) -> (Duration, Result<Vec<Route>>) + Send + Sync>;

/// Router whose answer and latency are chosen per request.
pub struct FakeRouter {
    respond: Responder,
    pub requests: Mutex<Vec<RouteRequest>>,
    calls: AtomicUsize,
}

impl FakeRouter {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&RouteRequest) -> (Duration, Result<Vec<Route>>) + Send + Sync + 'static,
    {
        Arc::new(Self { respond: Box::new(respond), requests: Mutex::new(Vec::new()), calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteProvider for FakeRouter {
    async fn fetch_routes(&self, request: &RouteRequest) -> Result<Vec<Route>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let (delay, result) = (self.respond)(request);
        tokio::time::sleep(delay).await;
        result
    }
}

/// An executable route whose estimate is `amount_out` raw units.
pub fn route_out(amount_out: &str) -> Route {
    serde_json::from_value(json!({
        "has_slippage": true,
        "estimated_amount": { "amount_out": amount_out },
        "worst_case_amount": {},
        "dex_id": "Rhea",
        "execution_instructions": [{ "NearTransaction": {
            "receiver_id": "v2.ref-finance.near",
            "actions": [{ "FunctionCall": {
                "method_name": "swap",
                "args": "eyJhY3Rpb25zIjpbXX0=",
                "gas": "300000000000000",
                "deposit": "1"
            }}]
        }}],
        "needs_unwrap": false
    }))
    .unwrap()
}

pub fn intents_route() -> Route {
    serde_json::from_value(json!({
        "estimated_amount": { "amount_out": "100" },
        "dex_id": "NearIntents",
        "execution_instructions": [{ "IntentsQuote": { "message_to_sign": "{}" } }]
    }))
    .unwrap()
}
