//! Common error type and result alias shared across modules.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common error type for the swap-quoter pipeline.
#[derive(Debug, Clone, Error)]
pub enum QuoterError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid amount: {0}")]
    Amount(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Wallet error: {0}")]
    Wallet(String),
    #[error("Transaction was cancelled in the wallet")]
    UserCancelled,
    #[error("Slippage error: The price has changed since the quote was fetched. Please try again.")]
    Slippage,
    #[error("Contract error: {0}")]
    Contract(String),
    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl From<reqwest::Error> for QuoterError {
    fn from(e: reqwest::Error) -> Self {
        QuoterError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for QuoterError {
    fn from(e: serde_json::Error) -> Self {
        QuoterError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QuoterError>;

/// Which side of a swap the user fixed; the router estimates the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SwapDirection {
    #[default]
    ExactIn,
    ExactOut,
}
