//! Reconstructs the net token movements of an executed transaction from its
//! receipt logs and actions.

use std::collections::HashMap;

use indexmap::IndexMap;
use itertools::Itertools;
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::wallet::{FinalExecutionOutcome, ReceiptAction};
use crate::data_management::token::{Token, NEAR_TOKEN_ID, WRAP_NEAR_TOKEN_ID};
use crate::types::{QuoterError, Result};
use crate::utils::amount::parse_raw_amount;

const EVENT_LOG_PREFIX: &str = "EVENT_JSON:";
const FT_STANDARD: &str = "nep141";
const SYSTEM_ACCOUNT: &str = "system";
/// The 1 yocto deposit many calls attach for confirmation, not a transfer.
const PLACEHOLDER_DEPOSIT: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub token_id: String,
    pub amount: BigUint,
    pub direction: TransferDirection,
    pub receipt_id: String,
}

impl Transfer {
    fn signed_amount(&self) -> BigInt {
        let sign = match self.direction {
            TransferDirection::In => Sign::Plus,
            TransferDirection::Out => Sign::Minus,
        };
        BigInt::from_biguint(sign, self.amount.clone())
    }
}

#[derive(Deserialize)]
struct EventEnvelope {
    standard: String,
    event: String,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Deserialize)]
struct FtTransferData {
    old_owner_id: String,
    new_owner_id: String,
    amount: String,
}

#[derive(Deserialize)]
struct FtSupplyData {
    owner_id: String,
    amount: String,
}

/// Scratch collector for one receipt.
struct ReceiptScan<'a> {
    account_id: &'a str,
    token_id: &'a str,
    receipt_id: &'a str,
    found: &'a mut Vec<Transfer>,
}

impl ReceiptScan<'_> {
    fn push(&mut self, token_id: &str, amount: &str, direction: TransferDirection) {
        match parse_raw_amount(amount) {
            Ok(amount) => self.found.push(Transfer {
                token_id: token_id.to_string(),
                amount,
                direction,
                receipt_id: self.receipt_id.to_string(),
            }),
            Err(e) => debug!("skipping transfer in {}: {}", self.receipt_id, e),
        }
    }

    fn directed(&mut self, amount: &str, from: &str, to: &str) {
        let token = self.token_id;
        if to == self.account_id {
            self.push(token, amount, TransferDirection::In);
        }
        if from == self.account_id {
            self.push(token, amount, TransferDirection::Out);
        }
    }

    fn event_log(&mut self, payload: &str) {
        let Ok(envelope) = serde_json::from_str::<EventEnvelope>(payload) else {
            debug!("unparseable event log in {}", self.receipt_id);
            return;
        };
        if envelope.standard != FT_STANDARD {
            return;
        }
        for entry in envelope.data {
            match envelope.event.as_str() {
                "ft_transfer" => {
                    if let Ok(d) = serde_json::from_value::<FtTransferData>(entry) {
                        self.directed(&d.amount, &d.old_owner_id, &d.new_owner_id);
                    }
                }
                "ft_mint" => {
                    if let Ok(d) = serde_json::from_value::<FtSupplyData>(entry) {
                        if d.owner_id == self.account_id {
                            self.push(self.token_id, &d.amount, TransferDirection::In);
                        }
                    }
                }
                "ft_burn" => {
                    if let Ok(d) = serde_json::from_value::<FtSupplyData>(entry) {
                        if d.owner_id == self.account_id {
                            self.push(self.token_id, &d.amount, TransferDirection::Out);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn text_log(&mut self, log: &str) {
        let words: Vec<&str> = log.split_whitespace().collect();
        match words.as_slice() {
            ["Transfer", amount, "from", from, "to", to] => self.directed(amount, from, to),
            ["Withdraw", amount, "NEAR", "from", account] if self.token_id == WRAP_NEAR_TOKEN_ID => {
                if *account == self.account_id {
                    self.push(WRAP_NEAR_TOKEN_ID, amount, TransferDirection::Out);
                }
            }
            ["Deposit", amount, "NEAR", "to", account] if self.token_id == WRAP_NEAR_TOKEN_ID => {
                if *account == self.account_id {
                    self.push(WRAP_NEAR_TOKEN_ID, amount, TransferDirection::In);
                }
            }
            _ => {}
        }
    }
}

/// Every transfer attributable to `account_id` across all outcomes.
///
/// Returns `QuoterError::Invariant` when a receipt's receiver disagrees with
/// the executor of its own outcome.
pub fn reconstruct_transfers(outcomes: &[FinalExecutionOutcome], account_id: &str) -> Result<Vec<Transfer>> {
    let mut found = Vec::new();
    for outcome in outcomes {
        let executors: HashMap<&str, &str> = outcome
            .receipts_outcome
            .iter()
            .map(|r| (r.id.as_str(), r.outcome.executor_id.as_str()))
            .collect();

        for receipt in &outcome.receipts_outcome {
            let mut scan = ReceiptScan {
                account_id,
                token_id: &receipt.outcome.executor_id,
                receipt_id: &receipt.id,
                found: &mut found,
            };
            for log in &receipt.outcome.logs {
                match log.strip_prefix(EVENT_LOG_PREFIX) {
                    Some(payload) => scan.event_log(payload),
                    None => scan.text_log(log),
                }
            }
        }

        for receipt in &outcome.receipts {
            if let Some(executor) = executors.get(receipt.receipt_id.as_str()) {
                if *executor != receipt.receiver_id {
                    return Err(QuoterError::Invariant(format!(
                        "receipt {} executed by {} but addressed to {}",
                        receipt.receipt_id, executor, receipt.receiver_id
                    )));
                }
            }
            if receipt.predecessor_id == SYSTEM_ACCOUNT {
                continue;
            }
            let mut scan = ReceiptScan {
                account_id,
                token_id: NEAR_TOKEN_ID,
                receipt_id: &receipt.receipt_id,
                found: &mut found,
            };
            for action in receipt.actions() {
                match action {
                    ReceiptAction::FunctionCall { deposit, .. }
                        if receipt.predecessor_id == account_id && is_real_deposit(deposit) =>
                    {
                        scan.push(NEAR_TOKEN_ID, deposit, TransferDirection::Out);
                    }
                    ReceiptAction::Transfer { deposit } if receipt.receiver_id == account_id => {
                        scan.push(NEAR_TOKEN_ID, deposit, TransferDirection::In);
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(found)
}

fn is_real_deposit(deposit: &str) -> bool {
    deposit != PLACEHOLDER_DEPOSIT && parse_raw_amount(deposit).is_ok_and(|d| !d.is_zero())
}

/// Net the transfers per token in first-seen order. Zero nets are dropped.
pub fn consolidate_transfers(transfers: &[Transfer]) -> Vec<Transfer> {
    let mut nets: IndexMap<&str, (BigInt, &str)> = IndexMap::new();
    for t in transfers {
        let entry = nets.entry(t.token_id.as_str()).or_insert_with(|| (BigInt::zero(), t.receipt_id.as_str()));
        entry.0 += t.signed_amount();
    }
    nets.into_iter()
        .filter(|(_, (net, _))| !net.is_zero())
        .map(|(token_id, (net, receipt_id))| Transfer {
            token_id: token_id.to_string(),
            direction: if net.is_positive() { TransferDirection::In } else { TransferDirection::Out },
            amount: net.magnitude().clone(),
            receipt_id: receipt_id.to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapSummary {
    Extracted(Vec<Transfer>),
    /// Fewer than two distinct pair tokens moved; the swap still succeeded.
    Unextractable,
}

/// Keep transfers of the swap pair, consolidate them and decide whether the
/// result describes a swap. `lookup` resolves token ids to cached metadata
/// so that tokens matching a pair member by symbol and decimals also count.
pub fn summarize_swap<F>(raw: &[Transfer], pair: [&Token; 2], lookup: F) -> SwapSummary
where
    F: Fn(&str) -> Option<Token>,
{
    debug!("raw transfers: {:?}", raw);
    let in_pair = |token_id: &str| {
        pair.iter().any(|p| p.account_id == token_id)
            || lookup(token_id).is_some_and(|t| {
                pair.iter().any(|p| p.metadata.symbol == t.metadata.symbol && p.metadata.decimals == t.metadata.decimals)
            })
    };
    let relevant: Vec<Transfer> = raw.iter().filter(|t| in_pair(&t.token_id)).cloned().collect();
    let consolidated = consolidate_transfers(&relevant);
    let distinct = consolidated.iter().map(|t| t.token_id.as_str()).unique().count();
    if distinct < 2 {
        warn!(
            "could not extract swap result for {} / {}: {} raw transfers {:?}",
            pair[0].account_id,
            pair[1].account_id,
            raw.len(),
            raw
        );
        return SwapSummary::Unextractable;
    }
    info!("swap moved {} tokens", distinct);
    SwapSummary::Extracted(consolidated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(token: &str, amount: u64, direction: TransferDirection) -> Transfer {
        Transfer { token_id: token.into(), amount: BigUint::from(amount), direction, receipt_id: "r".into() }
    }

    #[test]
    fn test_consolidation_drops_zero_nets() {
        let consolidated = consolidate_transfers(&[
            transfer("a.near", 5, TransferDirection::In),
            transfer("b.near", 8, TransferDirection::Out),
            transfer("a.near", 5, TransferDirection::Out),
            transfer("b.near", 3, TransferDirection::In),
        ]);
        assert_eq!(consolidated, vec![transfer("b.near", 5, TransferDirection::Out)]);
    }

    #[test]
    fn test_placeholder_deposit_is_not_a_transfer() {
        assert!(!is_real_deposit("1"));
        assert!(!is_real_deposit("0"));
        assert!(is_real_deposit("1000"));
    }
}
