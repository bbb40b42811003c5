//! Router client: request construction, route model and the feasibility
//! filter applied to every response.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::data_management::token::NEAR_TOKEN_ID;
use crate::types::{QuoterError, Result, SwapDirection};

/// Router id of the native asset.
pub const ROUTER_NATIVE_ID: &str = "near";
/// Prefix the router expects on fungible token contract ids.
const FT_ROUTER_PREFIX: &str = "nep141:";

/// Map a hub token id to the id the router understands.
pub fn router_token_id(account_id: &str) -> String {
    if account_id == NEAR_TOKEN_ID {
        ROUTER_NATIVE_ID.to_string()
    } else {
        format!("{}{}", FT_ROUTER_PREFIX, account_id)
    }
}

/// Raw amounts on either side of a route. Which side is populated depends on
/// the swap direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteAmount {
    #[serde(default)]
    pub amount_in: Option<String>,
    #[serde(default)]
    pub amount_out: Option<String>,
}

impl RouteAmount {
    /// The side the router computed for `direction`.
    pub fn computed(&self, direction: SwapDirection) -> Option<&str> {
        match direction {
            SwapDirection::ExactIn => self.amount_out.as_deref(),
            SwapDirection::ExactOut => self.amount_in.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RouteAction {
    FunctionCall {
        method_name: String,
        /// Base64-encoded JSON arguments.
        args: String,
        gas: String,
        deposit: String,
    },
    Transfer {
        deposit: String,
    },
}

/// A transaction the route wants signed and sent on chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionPlan {
    pub receiver_id: String,
    pub actions: Vec<RouteAction>,
}

/// One step of a route's execution plan. Only on-chain transactions can be
/// executed by this client. Every other kind, and any step whose shape does
/// not decode, is kept as `Unsupported` so the route is filtered out instead
/// of failing the whole response.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionInstruction {
    OnChainTransaction(TransactionPlan),
    Unsupported { kind: String },
}

const ON_CHAIN_INSTRUCTION: &str = "NearTransaction";
const UNKNOWN_INSTRUCTION: &str = "Unknown";

impl From<Value> for ExecutionInstruction {
    fn from(value: Value) -> Self {
        let (kind, body) = match value {
            Value::String(kind) => (kind, Value::Null),
            Value::Object(map) if map.len() == 1 => match map.into_iter().next() {
                Some(entry) => entry,
                None => (UNKNOWN_INSTRUCTION.to_string(), Value::Null),
            },
            Value::Object(map) => {
                let kind = map.get("kind").and_then(Value::as_str).unwrap_or(UNKNOWN_INSTRUCTION);
                (kind.to_string(), Value::Object(map))
            }
            _ => (UNKNOWN_INSTRUCTION.to_string(), Value::Null),
        };
        if kind != ON_CHAIN_INSTRUCTION {
            return ExecutionInstruction::Unsupported { kind };
        }
        match serde_json::from_value::<TransactionPlan>(body) {
            Ok(plan) => ExecutionInstruction::OnChainTransaction(plan),
            Err(e) => {
                debug!("undecodable {} instruction: {}", ON_CHAIN_INSTRUCTION, e);
                ExecutionInstruction::Unsupported { kind }
            }
        }
    }
}

impl<'de> Deserialize<'de> for ExecutionInstruction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Value::deserialize(deserializer).map(ExecutionInstruction::from)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub has_slippage: bool,
    pub estimated_amount: RouteAmount,
    #[serde(default)]
    pub worst_case_amount: RouteAmount,
    pub dex_id: String,
    #[serde(default)]
    pub execution_instructions: Vec<ExecutionInstruction>,
    #[serde(default)]
    pub needs_unwrap: bool,
}

impl Route {
    /// True when the plan is non-empty and every instruction is an on-chain
    /// transaction.
    pub fn is_executable(&self) -> bool {
        !self.execution_instructions.is_empty()
            && self
                .execution_instructions
                .iter()
                .all(|i| matches!(i, ExecutionInstruction::OnChainTransaction(_)))
    }

    pub fn transactions(&self) -> impl Iterator<Item = &TransactionPlan> {
        self.execution_instructions.iter().filter_map(|i| match i {
            ExecutionInstruction::OnChainTransaction(plan) => Some(plan),
            ExecutionInstruction::Unsupported { .. } => None,
        })
    }
}

/// Outcome of filtering a router response.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteSelection {
    Best(Route),
    /// The router returned nothing.
    NoRoute,
    /// Routes existed but all needed instructions this client cannot run.
    Unsupported,
}

/// Drop infeasible routes and take the first remaining one; the router ranks
/// best-first.
pub fn select_route(routes: Vec<Route>) -> RouteSelection {
    if routes.is_empty() {
        return RouteSelection::NoRoute;
    }
    let total = routes.len();
    match routes.into_iter().find(Route::is_executable) {
        Some(best) => RouteSelection::Best(best),
        None => {
            debug!("all {} routes rely on unsupported instructions", total);
            RouteSelection::Unsupported
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapAmount {
    ExactIn(String),
    ExactOut(String),
}

/// Slippage tolerance in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlippageSetting {
    Auto { min: Decimal, max: Decimal },
    Fixed(Decimal),
}

impl SlippageSetting {
    /// Upper tolerance in basis points.
    pub fn max_bps(&self) -> u32 {
        use rust_decimal::prelude::ToPrimitive;
        let percent = match self {
            SlippageSetting::Auto { max, .. } => *max,
            SlippageSetting::Fixed(p) => *p,
        };
        (percent * Decimal::ONE_HUNDRED).round().to_u32().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub token_in: String,
    pub token_out: String,
    pub amount: SwapAmount,
    pub max_wait_ms: u64,
    pub dexes: Vec<String>,
    pub slippage: SlippageSetting,
    pub trader_account_id: Option<String>,
}

fn percent_to_fraction(percent: Decimal) -> String {
    (percent / Decimal::ONE_HUNDRED).normalize().to_string()
}

impl RouteRequest {
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("token_in", router_token_id(&self.token_in)),
            ("token_out", router_token_id(&self.token_out)),
        ];
        match &self.amount {
            SwapAmount::ExactIn(raw) => pairs.push(("amount_in", raw.clone())),
            SwapAmount::ExactOut(raw) => pairs.push(("amount_out", raw.clone())),
        }
        pairs.push(("max_wait_ms", self.max_wait_ms.to_string()));
        match self.slippage {
            SlippageSetting::Auto { min, max } => {
                pairs.push(("slippage_type", "Auto".to_string()));
                pairs.push(("min_slippage", percent_to_fraction(min)));
                pairs.push(("max_slippage", percent_to_fraction(max)));
            }
            SlippageSetting::Fixed(percent) => {
                pairs.push(("slippage_type", "Fixed".to_string()));
                pairs.push(("slippage", percent_to_fraction(percent)));
            }
        }
        if !self.dexes.is_empty() {
            pairs.push(("dexes", self.dexes.join(",")));
        }
        if let Some(trader) = &self.trader_account_id {
            pairs.push(("trader_account_id", trader.clone()));
        }
        pairs
    }
}

#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Ranked best-first.
    async fn fetch_routes(&self, request: &RouteRequest) -> Result<Vec<Route>>;
}

pub struct HttpRouteProvider {
    http_client: Client,
    base_url: String,
}

impl HttpRouteProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http_client: Client::new(), base_url: base_url.into().trim_end_matches('/').to_string() }
    }
}

#[async_trait]
impl RouteProvider for HttpRouteProvider {
    async fn fetch_routes(&self, request: &RouteRequest) -> Result<Vec<Route>> {
        let url = format!("{}/route", self.base_url);
        let response = self.http_client.get(&url).query(&request.to_query_pairs()).send().await?;
        if !response.status().is_success() {
            return Err(QuoterError::Http(format!("router returned status {}", response.status())));
        }
        Ok(response.json().await?)
    }
}
