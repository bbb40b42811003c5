//! Token model as served by the token service, plus the cache-owned balance
//! fields and the merge/ordering rules the hub applies to it.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::utils::amount::raw_amount_to_f64;

/// Account id of the native pseudo-token.
pub const NEAR_TOKEN_ID: &str = "near";
/// Wrapped native token the `near` entry mirrors.
pub const WRAP_NEAR_TOKEN_ID: &str = "wrap.near";
pub const NEAR_DECIMALS: u32 = 24;
const NEAR_ICON: &str = "data:image/svg+xml,%3Csvg xmlns='http://www.w3.org/2000/svg' viewBox='0 0 32 32'%3E%3Ccircle cx='16' cy='16' r='16'/%3E%3Cpath fill='%23fff' d='M21.4 8.8l-3.3 4.9a.35.35 0 00.52.46l3.25-2.82a.13.13 0 01.21.1v8.83a.13.13 0 01-.23.08L12 8.4A1.7 1.7 0 0010.7 7.8h-.35A1.7 1.7 0 008.7 9.5v13a1.7 1.7 0 003.14.9l3.3-4.9a.35.35 0 00-.52-.46l-3.25 2.82a.13.13 0 01-.21-.1v-8.83a.13.13 0 01.23-.08L21.2 23.6a1.7 1.7 0 001.3.6h.35a1.7 1.7 0 001.7-1.7v-13a1.7 1.7 0 00-3.14-.9z'/%3E%3C/svg%3E";

/// Volume below which a token gets no liquidity score.
const MIN_SCORED_VOLUME_USD: f64 = 10.0;
/// Scores are compared in buckets of 0.001 so near-equal scores tie.
const SCORE_BUCKETS_PER_UNIT: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum Reputation {
    Reputable,
    NotFake,
    #[default]
    Unknown,
}

impl<'de> Deserialize<'de> for Reputation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = Option::<String>::deserialize(deserializer)?;
        Ok(match tag.as_deref() {
            Some("Reputable") => Reputation::Reputable,
            Some("NotFake") => Reputation::NotFake,
            _ => Reputation::Unknown,
        })
    }
}

/// Where a cached balance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BalanceSource {
    #[default]
    Indexer,
    Rpc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub account_id: String,
    pub metadata: TokenMetadata,
    #[serde(default = "zero_string")]
    pub price_usd: String,
    #[serde(default = "zero_string")]
    pub price_usd_raw_24h_ago: String,
    #[serde(default)]
    pub circulating_supply: String,
    #[serde(default)]
    pub total_supply: String,
    #[serde(default)]
    pub liquidity_usd: f64,
    #[serde(default)]
    pub volume_usd_24h: f64,
    #[serde(default)]
    pub reputation: Reputation,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    // Owned by the cache, never taken from the catalog.
    #[serde(default, skip_deserializing)]
    pub balance: Option<String>,
    #[serde(default, skip_deserializing)]
    pub balance_source: Option<BalanceSource>,
    #[serde(default, skip_deserializing)]
    pub balance_usd: Option<f64>,
}

fn zero_string() -> String {
    "0".to_string()
}

impl Token {
    /// The synthetic native entry the hub starts with.
    pub fn native_near() -> Self {
        Token {
            account_id: NEAR_TOKEN_ID.to_string(),
            metadata: TokenMetadata {
                name: "NEAR".to_string(),
                symbol: "NEAR".to_string(),
                decimals: NEAR_DECIMALS,
                icon: Some(NEAR_ICON.to_string()),
                reference: None,
            },
            price_usd: zero_string(),
            price_usd_raw_24h_ago: zero_string(),
            circulating_supply: String::new(),
            total_supply: String::new(),
            liquidity_usd: 0.0,
            volume_usd_24h: 0.0,
            reputation: Reputation::Reputable,
            created_at: None,
            balance: None,
            balance_source: None,
            balance_usd: None,
        }
    }

    pub fn price(&self) -> f64 {
        self.price_usd.parse().unwrap_or(0.0)
    }

    pub fn has_icon(&self) -> bool {
        self.metadata.icon.as_deref().is_some_and(|i| !i.is_empty())
    }

    /// Set a fresh raw balance and derive its USD value.
    pub fn set_balance(&mut self, raw: String, source: BalanceSource) {
        self.balance = Some(raw);
        self.balance_source = Some(source);
        self.recompute_balance_usd();
    }

    pub fn clear_balance(&mut self) {
        self.balance = None;
        self.balance_source = None;
        self.balance_usd = None;
    }

    pub fn recompute_balance_usd(&mut self) {
        self.balance_usd = self
            .balance
            .as_deref()
            .and_then(|raw| raw_amount_to_f64(raw, self.metadata.decimals))
            .map(|amount| amount * self.price());
    }

    /// Zero-balance ranking score: liquidity weighted by log2 of 24h volume.
    fn liquidity_score(&self) -> f64 {
        if self.volume_usd_24h > MIN_SCORED_VOLUME_USD {
            self.liquidity_usd * self.volume_usd_24h.log2()
        } else {
            0.0
        }
    }
}

/// Merge an incoming catalog entry over the cached one. Incoming fields win,
/// except the cache-owned balance fields, and an icon the incoming entry lacks.
pub fn merge_token(previous: Option<&Token>, mut incoming: Token) -> Token {
    if let Some(prev) = previous {
        incoming.balance = prev.balance.clone();
        incoming.balance_source = prev.balance_source;
        if !incoming.has_icon() && prev.has_icon() {
            incoming.metadata.icon = prev.metadata.icon.clone();
        }
    }
    incoming.recompute_balance_usd();
    incoming
}

/// Mirror market data from `wrap.near` onto the `near` entry. Returns whether
/// anything changed.
pub fn sync_native_near(tokens: &mut HashMap<String, Token>) -> bool {
    let Some(wrapped) = tokens.get(WRAP_NEAR_TOKEN_ID).cloned() else {
        return false;
    };
    let near = tokens
        .entry(NEAR_TOKEN_ID.to_string())
        .or_insert_with(Token::native_near);
    let before = near.clone();
    near.price_usd = wrapped.price_usd;
    near.price_usd_raw_24h_ago = wrapped.price_usd_raw_24h_ago;
    near.liquidity_usd = wrapped.liquidity_usd;
    near.volume_usd_24h = wrapped.volume_usd_24h;
    near.recompute_balance_usd();
    *near != before
}

/// Display ordering: held tokens by USD value, then liquidity score, then
/// newest first, then id.
pub fn sort_token_ids(tokens: &HashMap<String, Token>) -> Vec<String> {
    let mut ids: Vec<&Token> = tokens.values().collect();
    ids.sort_by(|a, b| compare_tokens(a, b));
    ids.into_iter().map(|t| t.account_id.clone()).collect()
}

fn compare_tokens(a: &Token, b: &Token) -> Ordering {
    let usd_a = a.balance_usd.filter(|v| *v > 0.0).unwrap_or(0.0);
    let usd_b = b.balance_usd.filter(|v| *v > 0.0).unwrap_or(0.0);
    usd_b
        .total_cmp(&usd_a)
        .then_with(|| score_bucket(b).total_cmp(&score_bucket(a)))
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.account_id.cmp(&b.account_id))
}

fn score_bucket(token: &Token) -> f64 {
    let score = token.liquidity_score();
    if score.is_finite() {
        (score * SCORE_BUCKETS_PER_UNIT).floor()
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(id: &str, liquidity: f64, volume: f64) -> Token {
        Token {
            account_id: id.to_string(),
            metadata: TokenMetadata { name: id.into(), symbol: id.to_uppercase(), decimals: 6, icon: None, reference: None },
            liquidity_usd: liquidity,
            volume_usd_24h: volume,
            ..Token::native_near()
        }
    }

    #[test]
    fn test_held_tokens_sort_first() {
        let mut map = HashMap::new();
        let mut held = token("held.near", 0.0, 0.0);
        held.price_usd = "2".into();
        held.set_balance("1000000".into(), BalanceSource::Indexer);
        map.insert(held.account_id.clone(), held);
        map.insert("liquid.near".into(), token("liquid.near", 1_000_000.0, 50_000.0));
        map.insert("dust.near".into(), token("dust.near", 5.0, 5.0));
        assert_eq!(sort_token_ids(&map), vec!["held.near", "liquid.near", "dust.near"]);
    }

    #[test]
    fn test_low_volume_scores_zero() {
        let a = token("a.near", 1_000_000.0, 10.0);
        assert_eq!(a.liquidity_score(), 0.0);
        let b = token("b.near", 100.0, 1024.0);
        assert_eq!(b.liquidity_score(), 1000.0);
    }

    #[test]
    fn test_near_score_tie_falls_back_to_creation_time() {
        let mut map = HashMap::new();
        let mut older = token("older.near", 100.0, 1024.0);
        older.created_at = DateTime::from_timestamp(1_000, 0);
        let mut newer = token("newer.near", 100.0000001, 1024.0);
        newer.created_at = DateTime::from_timestamp(2_000, 0);
        map.insert(older.account_id.clone(), older);
        map.insert(newer.account_id.clone(), newer);
        assert_eq!(sort_token_ids(&map), vec!["newer.near", "older.near"]);
    }

    #[test]
    fn test_unknown_reputation_tag() {
        let r: Reputation = serde_json::from_str("\"Spam\"").unwrap();
        assert_eq!(r, Reputation::Unknown);
        let r: Reputation = serde_json::from_str("\"NotFake\"").unwrap();
        assert_eq!(r, Reputation::NotFake);
    }
}
