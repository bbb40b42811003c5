//! Token data: the service clients, balance-event subscriptions and the
//! hub that caches it all.

pub mod api_client;
pub mod balance_events;
pub mod single_flight;
pub mod token;
pub mod token_hub;

pub use api_client::{HeldToken, HttpTokenService, RegistrationService, TokenService};
pub use token::{Token, TokenMetadata};
pub use token_hub::{HubConfig, HubState, TokenHub, TokenListFilter, TokenSort};
