// Library entry point for swap-quoter

pub mod config;
pub mod data_management;
pub mod engine;
pub mod types;
pub mod utils;

pub use types::{QuoterError, Result, SwapDirection};
