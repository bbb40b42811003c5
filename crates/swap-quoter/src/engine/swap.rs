//! Swap orchestration: validation, storage registration, transaction
//! assembly, submission and outcome interpretation.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::router::{Route, RouteAction, TransactionPlan};
use super::transfers::{reconstruct_transfers, summarize_swap, SwapSummary};
use super::wallet::{FinalExecutionOutcome, WalletAction, WalletCapability, WalletTransaction};
use crate::data_management::api_client::RegistrationService;
use crate::data_management::token::{Token, NEAR_TOKEN_ID};
use crate::data_management::token_hub::TokenHub;
use crate::types::{QuoterError, Result, SwapDirection};
use crate::utils::amount::is_positive_amount;

/// Storage deposit attached to `storage_deposit` registrations (0.00125 NEAR).
pub const STORAGE_DEPOSIT_YOCTO: &str = "1250000000000000000000";
pub const STORAGE_DEPOSIT_GAS: &str = "30000000000000";

/// Contract panics that all mean the price moved past the tolerance.
const SLIPPAGE_PANICS: &[&str] = &[
    "E68: slippage error",
    "slippage error",
    "insufficient output amount",
    "amount out too low",
    "excessive input amount",
    "amount in too high",
];

const CANCEL_MARKERS: &[&str] = &["cancel", "reject", "denied", "user closed"];

/// Everything the user confirmed on the swap form.
#[derive(Debug, Clone, Default)]
pub struct SwapIntent {
    pub token_in: Option<Token>,
    pub token_out: Option<Token>,
    pub route: Option<Route>,
    pub direction: SwapDirection,
    /// The user-typed amount, human-readable.
    pub amount: String,
}

pub struct SwapExecutor {
    hub: Arc<TokenHub>,
    registration: Arc<dyn RegistrationService>,
    wallet: Arc<dyn WalletCapability>,
}

impl SwapExecutor {
    pub fn new(hub: Arc<TokenHub>, registration: Arc<dyn RegistrationService>, wallet: Arc<dyn WalletCapability>) -> Self {
        Self { hub, registration, wallet }
    }

    /// Execute the swap. A balance refresh is always scheduled afterwards,
    /// whatever the result.
    pub async fn execute(&self, intent: &SwapIntent) -> Result<SwapSummary> {
        let result = self.run(intent).await;
        let hub = Arc::clone(&self.hub);
        tokio::spawn(async move { hub.refresh_balances(None).await });
        if let Err(e) = &result {
            warn!("swap failed: {}", e);
        }
        result
    }

    async fn run(&self, intent: &SwapIntent) -> Result<SwapSummary> {
        let (token_in, token_out) = match (&intent.token_in, &intent.token_out) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(QuoterError::Validation("both tokens must be selected".into())),
        };
        let route = intent
            .route
            .as_ref()
            .ok_or_else(|| QuoterError::Validation("no route to execute".into()))?;
        if !route.is_executable() {
            return Err(QuoterError::Validation(format!("route via {} cannot be executed here", route.dex_id)));
        }
        let account_id = self
            .wallet
            .account_id()
            .ok_or_else(|| QuoterError::Validation("wallet is not connected".into()))?;
        let typed_decimals = match intent.direction {
            SwapDirection::ExactIn => token_in.metadata.decimals,
            SwapDirection::ExactOut => token_out.metadata.decimals,
        };
        if !is_positive_amount(&intent.amount, typed_decimals) {
            return Err(QuoterError::Validation(format!("amount '{}' must be positive", intent.amount)));
        }

        let mut transactions = self.registration_transactions(&account_id, [token_in, token_out]).await?;
        for plan in route.transactions() {
            transactions.push(to_wallet_transaction(plan)?);
        }
        info!(
            "submitting {} transactions for {} -> {} via {}",
            transactions.len(),
            token_in.account_id,
            token_out.account_id,
            route.dex_id
        );

        let outcomes = self
            .wallet
            .sign_and_send_transactions(transactions)
            .await
            .map_err(map_wallet_rejection)?;
        check_failures(&outcomes)?;

        let raw = reconstruct_transfers(&outcomes, &account_id)?;
        Ok(summarize_swap(&raw, [token_in, token_out], |id| self.hub.select_token(id)))
    }

    async fn registration_transactions(&self, account_id: &str, pair: [&Token; 2]) -> Result<Vec<WalletTransaction>> {
        let ids: Vec<String> = pair
            .iter()
            .map(|t| t.account_id.clone())
            .filter(|id| id != NEAR_TOKEN_ID)
            .collect();
        let missing = self.registration.unregistered_tokens(account_id, &ids).await?;
        Ok(missing
            .into_iter()
            .map(|token_id| {
                info!("registering {} on {}", account_id, token_id);
                WalletTransaction {
                    receiver_id: token_id,
                    actions: vec![WalletAction::FunctionCall {
                        method_name: "storage_deposit".to_string(),
                        args: json!({ "account_id": account_id, "registration_only": true }),
                        gas: STORAGE_DEPOSIT_GAS.to_string(),
                        deposit: STORAGE_DEPOSIT_YOCTO.to_string(),
                    }],
                }
            })
            .collect())
    }
}

/// Decode a route transaction's base64 call arguments into JSON.
pub fn to_wallet_transaction(plan: &TransactionPlan) -> Result<WalletTransaction> {
    let actions = plan
        .actions
        .iter()
        .map(|action| match action {
            RouteAction::FunctionCall { method_name, args, gas, deposit } => Ok(WalletAction::FunctionCall {
                method_name: method_name.clone(),
                args: decode_args(args)?,
                gas: gas.clone(),
                deposit: deposit.clone(),
            }),
            RouteAction::Transfer { deposit } => Ok(WalletAction::Transfer { deposit: deposit.clone() }),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(WalletTransaction { receiver_id: plan.receiver_id.clone(), actions })
}

fn decode_args(args: &str) -> Result<Value> {
    if args.is_empty() {
        return Ok(json!({}));
    }
    let bytes = BASE64
        .decode(args)
        .map_err(|e| QuoterError::Decode(format!("call arguments are not base64: {}", e)))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Slippage panics collapse into one friendly error; anything else keeps
/// the contract's message.
pub fn map_contract_failure(message: &str) -> QuoterError {
    let lower = message.to_lowercase();
    if SLIPPAGE_PANICS.iter().any(|p| lower.contains(&p.to_lowercase())) {
        QuoterError::Slippage
    } else {
        QuoterError::Contract(message.to_string())
    }
}

fn check_failures(outcomes: &[FinalExecutionOutcome]) -> Result<()> {
    match outcomes.iter().find_map(FinalExecutionOutcome::first_failure) {
        Some(message) => Err(map_contract_failure(&message)),
        None => Ok(()),
    }
}

fn map_wallet_rejection(err: QuoterError) -> QuoterError {
    match err {
        QuoterError::Wallet(message) => {
            let lower = message.to_lowercase();
            if CANCEL_MARKERS.iter().any(|m| lower.contains(m)) {
                QuoterError::UserCancelled
            } else {
                QuoterError::Wallet(message)
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slippage_panics_are_normalized() {
        assert!(matches!(
            map_contract_failure("Smart contract panicked: E68: slippage error"),
            QuoterError::Slippage
        ));
        assert!(matches!(
            map_contract_failure("Smart contract panicked: ERR_NO_POOL"),
            QuoterError::Contract(m) if m == "Smart contract panicked: ERR_NO_POOL"
        ));
    }

    #[test]
    fn test_wallet_rejection_detection() {
        assert!(matches!(
            map_wallet_rejection(QuoterError::Wallet("User rejected the request".into())),
            QuoterError::UserCancelled
        ));
        assert!(matches!(
            map_wallet_rejection(QuoterError::Wallet("network down".into())),
            QuoterError::Wallet(_)
        ));
    }

    #[test]
    fn test_route_args_are_decoded() {
        let plan = TransactionPlan {
            receiver_id: "wrap.near".into(),
            actions: vec![RouteAction::FunctionCall {
                method_name: "ft_transfer_call".into(),
                args: BASE64.encode(br#"{"receiver_id":"v2.ref-finance.near","amount":"10"}"#),
                gas: "100".into(),
                deposit: "1".into(),
            }],
        };
        let tx = to_wallet_transaction(&plan).unwrap();
        match &tx.actions[0] {
            WalletAction::FunctionCall { args, .. } => assert_eq!(args["amount"], "10"),
            other => panic!("unexpected action {:?}", other),
        }
    }
}
