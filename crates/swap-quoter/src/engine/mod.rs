//! Quoting and execution: router client, quote controller, derived
//! analytics, transfer reconstruction and the swap orchestrator.

pub mod analytics;
pub mod quoting;
pub mod router;
pub mod swap;
pub mod transfers;
pub mod wallet;

pub use quoting::{QuoteConfig, QuoteController, QuoteStatus, QuoteView};
pub use router::{HttpRouteProvider, Route, RouteProvider, RouteRequest, SlippageSetting};
pub use swap::{SwapExecutor, SwapIntent};
pub use transfers::{consolidate_transfers, reconstruct_transfers, SwapSummary, Transfer, TransferDirection};
pub use wallet::{FinalExecutionOutcome, WalletCapability, WalletTransaction};
