//! Wallet capability seam and the execution-outcome shapes it returns.
//!
//! Outcomes mirror the chain RPC's final execution outcome JSON, so a wallet
//! adapter can deserialize responses straight into these types.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::types::Result;

/// A call or transfer inside a transaction submitted to the wallet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum WalletAction {
    FunctionCall {
        method_name: String,
        args: Value,
        gas: String,
        deposit: String,
    },
    Transfer {
        deposit: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletTransaction {
    pub receiver_id: String,
    pub actions: Vec<WalletAction>,
}

/// Signs and submits transactions. Rejections surface as
/// `QuoterError::Wallet` carrying the wallet's message.
#[async_trait]
pub trait WalletCapability: Send + Sync {
    /// The connected account, if any.
    fn account_id(&self) -> Option<String>;
    async fn sign_and_send_transactions(&self, transactions: Vec<WalletTransaction>) -> Result<Vec<FinalExecutionOutcome>>;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub enum ExecutionStatus {
    Unknown,
    Failure(Value),
    SuccessValue(String),
    SuccessReceiptId(String),
}

impl ExecutionStatus {
    /// The contract's own message for a failure, when it has one.
    pub fn failure_message(&self) -> Option<String> {
        match self {
            ExecutionStatus::Failure(detail) => {
                Some(find_execution_error(detail).unwrap_or_else(|| detail.to_string()))
            }
            _ => None,
        }
    }
}

fn find_execution_error(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map
            .get("ExecutionError")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| map.values().find_map(find_execution_error)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutionOutcome {
    #[serde(default)]
    pub logs: Vec<String>,
    pub executor_id: String,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReceiptOutcome {
    pub id: String,
    pub outcome: ExecutionOutcome,
}

/// Receipt actions relevant to native balance changes.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptAction {
    FunctionCall { method_name: String, deposit: String },
    Transfer { deposit: String },
    Other,
}

impl<'de> Deserialize<'de> for ReceiptAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Call {
            method_name: String,
            #[serde(default)]
            deposit: String,
        }
        #[derive(Deserialize)]
        struct Transfer {
            deposit: String,
        }

        let value = Value::deserialize(deserializer)?;
        let Value::Object(map) = value else {
            return Ok(ReceiptAction::Other);
        };
        if let Some(body) = map.get("FunctionCall") {
            let call: Call = serde_json::from_value(body.clone()).map_err(serde::de::Error::custom)?;
            return Ok(ReceiptAction::FunctionCall { method_name: call.method_name, deposit: call.deposit });
        }
        if let Some(body) = map.get("Transfer") {
            let transfer: Transfer = serde_json::from_value(body.clone()).map_err(serde::de::Error::custom)?;
            return Ok(ReceiptAction::Transfer { deposit: transfer.deposit });
        }
        Ok(ReceiptAction::Other)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActionReceipt {
    #[serde(default)]
    pub actions: Vec<ReceiptAction>,
}

/// `{"Action": {...}}` or `{"Data": {...}}`; only action receipts matter.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ReceiptBody {
    #[serde(rename = "Action", default)]
    pub action: Option<ActionReceipt>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Receipt {
    pub predecessor_id: String,
    pub receiver_id: String,
    pub receipt_id: String,
    #[serde(default)]
    pub receipt: ReceiptBody,
}

impl Receipt {
    pub fn actions(&self) -> &[ReceiptAction] {
        self.receipt.action.as_ref().map(|a| a.actions.as_slice()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FinalExecutionOutcome {
    #[serde(default)]
    pub receipts_outcome: Vec<ReceiptOutcome>,
    #[serde(default)]
    pub receipts: Vec<Receipt>,
}

impl FinalExecutionOutcome {
    /// First failure message across every receipt outcome.
    pub fn first_failure(&self) -> Option<String> {
        self.receipts_outcome.iter().find_map(|r| r.outcome.status.failure_message())
    }
}
