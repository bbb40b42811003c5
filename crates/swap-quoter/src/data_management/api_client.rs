//! HTTP clients for the token/price/balance service and the storage
//! registration backend.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::token::{BalanceSource, Token};
use crate::types::{QuoterError, Result};

/// A token held by an account, as returned by the balance endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HeldToken {
    pub token: Token,
    pub balance: String,
    #[serde(default)]
    pub source: BalanceSource,
}

/// Token metadata, prices, balances and search.
#[async_trait]
pub trait TokenService: Send + Sync {
    async fn fetch_tokens(&self) -> Result<Vec<Token>>;
    /// Price deltas keyed by token account id.
    async fn fetch_prices(&self) -> Result<HashMap<String, String>>;
    /// `Ok(None)` when the service does not know the token.
    async fn fetch_token(&self, account_id: &str) -> Result<Option<Token>>;
    async fn fetch_balances(&self, account_id: &str) -> Result<Vec<HeldToken>>;
    /// Results in server ranking order.
    async fn search_tokens(&self, query: &str) -> Result<Vec<Token>>;
}

/// Storage registration prerequisites for fungible token contracts.
#[async_trait]
pub trait RegistrationService: Send + Sync {
    /// The subset of `token_ids` on which `account_id` is not yet registered.
    async fn unregistered_tokens(&self, account_id: &str, token_ids: &[String]) -> Result<Vec<String>>;
}

#[derive(Deserialize)]
struct StorageRequirements {
    #[serde(default)]
    unregistered: Vec<String>,
}

/// JSON-over-HTTP client for both services, which share one backend.
#[derive(Clone)]
pub struct HttpTokenService {
    http_client: Client,
    base_url: String,
}

impl HttpTokenService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn with_client(http_client: Client, base_url: impl Into<String>) -> Self {
        Self { http_client, base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<T>> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("GET {} {:?}", url, query);
        let response = self.http_client.get(&url).query(query).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(QuoterError::Http(format!("{} returned status {}", url, response.status())));
        }
        Ok(Some(response.json().await?))
    }

    async fn get_required<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        self.get_json(path, query)
            .await?
            .ok_or_else(|| QuoterError::Http(format!("{}/{} not found", self.base_url, path)))
    }
}

#[async_trait]
impl TokenService for HttpTokenService {
    async fn fetch_tokens(&self) -> Result<Vec<Token>> {
        self.get_required("tokens", &[]).await
    }

    async fn fetch_prices(&self) -> Result<HashMap<String, String>> {
        self.get_required("prices", &[]).await
    }

    async fn fetch_token(&self, account_id: &str) -> Result<Option<Token>> {
        self.get_json("token", &[("token_id", account_id)]).await
    }

    async fn fetch_balances(&self, account_id: &str) -> Result<Vec<HeldToken>> {
        self.get_required("balances", &[("account_id", account_id)]).await
    }

    async fn search_tokens(&self, query: &str) -> Result<Vec<Token>> {
        self.get_required("search", &[("q", query)]).await
    }
}

#[async_trait]
impl RegistrationService for HttpTokenService {
    async fn unregistered_tokens(&self, account_id: &str, token_ids: &[String]) -> Result<Vec<String>> {
        if token_ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = token_ids.join(",");
        let requirements: StorageRequirements = self
            .get_required("storage-requirements", &[("account_id", account_id), ("token_ids", &joined)])
            .await?;
        Ok(requirements.unregistered)
    }
}
