//! The token hub: single source of truth for token metadata, prices and
//! wallet balances.
//!
//! State lives in an `Arc<HubState>` snapshot. Every mutation clones the
//! snapshot, edits the copy and swaps it in whole, so readers never observe a
//! map whose ordering was computed for different data. Registered callbacks
//! see each new snapshot right after the swap.
//!
//! Cache-layer failures never reach callers: the previous data stays in place
//! and the error string is recorded under its concern in [`HubErrors`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use futures::future::{AbortHandle, Abortable};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::api_client::{HeldToken, TokenService};
use super::balance_events::{BalanceSubscriptions, EventConnector};
use super::single_flight::SingleFlight;
use super::token::{merge_token, sort_token_ids, sync_native_near, Token, NEAR_TOKEN_ID, WRAP_NEAR_TOKEN_ID};
use crate::types::Result;
use crate::utils::amount::parse_raw_amount;
use crate::utils::timers::{Debouncer, PeriodicTask};

pub const DEFAULT_BALANCE_DEBOUNCE: Duration = Duration::from_millis(250);

/// One in-flight flag per concern.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HubStatus {
    pub tokens: bool,
    pub prices: bool,
    pub balances: bool,
    pub search: bool,
}

/// Last error per concern, cleared by the next success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HubErrors {
    pub tokens: Option<String>,
    pub prices: Option<String>,
    pub balances: Option<String>,
    pub search: Option<String>,
}

/// `None` disables the periodic refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshPolicy {
    pub prices_every: Option<Duration>,
    pub balances_every: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HubState {
    pub tokens: HashMap<String, Token>,
    /// Display order, see [`sort_token_ids`].
    pub sequence: Vec<String>,
    pub status: HubStatus,
    pub errors: HubErrors,
    pub wallet_account_id: Option<String>,
    pub refresh: RefreshPolicy,
}

impl Default for HubState {
    fn default() -> Self {
        let near = Token::native_near();
        let mut tokens = HashMap::new();
        tokens.insert(near.account_id.clone(), near);
        let sequence = sort_token_ids(&tokens);
        Self {
            tokens,
            sequence,
            status: HubStatus::default(),
            errors: HubErrors::default(),
            wallet_account_id: None,
            refresh: RefreshPolicy::default(),
        }
    }
}

impl HubState {
    fn resort(&mut self) {
        self.sequence = sort_token_ids(&self.tokens);
    }

    /// Merge a service entry into the map. The native entry is synthesized
    /// locally and never taken from the service.
    fn merge_incoming(&mut self, incoming: Token) {
        if incoming.account_id == NEAR_TOKEN_ID {
            return;
        }
        let merged = merge_token(self.tokens.get(&incoming.account_id), incoming);
        self.tokens.insert(merged.account_id.clone(), merged);
    }

    fn clear_balances(&mut self) {
        for token in self.tokens.values_mut() {
            token.clear_balance();
        }
    }

    fn apply_balances(&mut self, held: Vec<HeldToken>) {
        self.clear_balances();
        for entry in held {
            let id = entry.token.account_id.clone();
            if id != NEAR_TOKEN_ID {
                self.merge_incoming(entry.token);
            }
            if let Some(token) = self.tokens.get_mut(&id) {
                token.set_balance(entry.balance, entry.source);
            }
        }
        sync_native_near(&mut self.tokens);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenSort {
    /// The hub's display sequence.
    #[default]
    Sequence,
    /// Alphabetical by symbol, case-insensitive.
    Symbol,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenListFilter {
    pub only_with_balance: bool,
    pub sort: TokenSort,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub prices_every: Option<Duration>,
    pub balances_every: Option<Duration>,
    pub balance_debounce: Duration,
    /// Event categories to subscribe to for balance invalidation.
    pub event_categories: Vec<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            prices_every: Some(Duration::from_secs(10)),
            balances_every: Some(Duration::from_secs(30)),
            balance_debounce: DEFAULT_BALANCE_DEBOUNCE,
            event_categories: vec!["ft_transfer".to_string(), "near_transfer".to_string()],
        }
    }
}

pub type HubCallback = Box<dyn Fn(&Arc<HubState>) + Send + Sync>;

/// Process-lifetime token cache. Construct once, share through `Arc`.
pub struct TokenHub {
    state: RwLock<Arc<HubState>>,
    service: Arc<dyn TokenService>,
    subscriptions: Option<BalanceSubscriptions>,
    callbacks: Mutex<Vec<HubCallback>>,
    token_flights: SingleFlight<String, Option<Token>>,
    search_flights: SingleFlight<String, Result<Vec<Token>>>,
    active_search: Mutex<Option<(String, AbortHandle)>>,
    balance_generation: AtomicU64,
    price_timer: PeriodicTask,
    balance_timer: PeriodicTask,
    balance_debounce: Debouncer,
    wallet_watch: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    weak_self: Weak<TokenHub>,
}

impl TokenHub {
    /// Hub without event-driven balance invalidation.
    pub fn new(service: Arc<dyn TokenService>, config: HubConfig) -> Arc<Self> {
        Self::build(service, None, config)
    }

    pub fn with_events(
        service: Arc<dyn TokenService>,
        connector: Arc<dyn EventConnector>,
        config: HubConfig,
    ) -> Arc<Self> {
        let subscriptions = BalanceSubscriptions::new(connector, config.event_categories.clone());
        Self::build(service, Some(subscriptions), config)
    }

    fn build(service: Arc<dyn TokenService>, subscriptions: Option<BalanceSubscriptions>, config: HubConfig) -> Arc<Self> {
        let state = HubState {
            refresh: RefreshPolicy { prices_every: config.prices_every, balances_every: config.balances_every },
            ..HubState::default()
        };
        Arc::new_cyclic(|weak_self| Self {
            state: RwLock::new(Arc::new(state)),
            service,
            subscriptions,
            callbacks: Mutex::new(Vec::new()),
            token_flights: SingleFlight::new(),
            search_flights: SingleFlight::new(),
            active_search: Mutex::new(None),
            balance_generation: AtomicU64::new(0),
            price_timer: PeriodicTask::new(),
            balance_timer: PeriodicTask::new(),
            balance_debounce: Debouncer::new(config.balance_debounce),
            wallet_watch: Mutex::new(None),
            running: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        })
    }

    // --- State plumbing ---

    /// Current immutable snapshot.
    pub fn snapshot(&self) -> Arc<HubState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Register a callback run after every snapshot replacement. Callbacks
    /// may read the hub but must not mutate it or register further callbacks.
    pub fn register_callback<F>(&self, cb: F)
    where
        F: Fn(&Arc<HubState>) + Send + Sync + 'static,
    {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner).push(Box::new(cb));
    }

    /// Replace the snapshot and notify observers. The callback list lock is
    /// held across both steps so observers see snapshots in commit order.
    fn update<R>(&self, mutate: impl FnOnce(&mut HubState) -> R) -> R {
        let callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        let (result, snapshot) = {
            let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let result = mutate(Arc::make_mut(&mut guard));
            (result, Arc::clone(&guard))
        };
        for cb in callbacks.iter() {
            cb(&snapshot);
        }
        result
    }

    // --- Refresh operations ---

    /// Fetch the full catalog and merge it into the cache.
    pub async fn refresh_tokens(&self) {
        self.update(|s| s.status.tokens = true);
        let result = self.service.fetch_tokens().await;
        self.update(|s| {
            s.status.tokens = false;
            match result {
                Ok(tokens) => {
                    debug!("merging {} catalog tokens", tokens.len());
                    s.errors.tokens = None;
                    for token in tokens {
                        s.merge_incoming(token);
                    }
                    sync_native_near(&mut s.tokens);
                    s.resort();
                }
                Err(e) => {
                    warn!("token catalog refresh failed: {}", e);
                    s.errors.tokens = Some(e.to_string());
                }
            }
        });
    }

    /// Apply a price delta map. Ordering is only recomputed when a price
    /// actually changed.
    pub async fn refresh_prices(&self) {
        self.update(|s| s.status.prices = true);
        let result = self.service.fetch_prices().await;
        self.update(|s| {
            s.status.prices = false;
            let prices = match result {
                Ok(prices) => prices,
                Err(e) => {
                    warn!("price refresh failed: {}", e);
                    s.errors.prices = Some(e.to_string());
                    return;
                }
            };
            s.errors.prices = None;
            let mut changed = false;
            for (id, price) in prices {
                if id == NEAR_TOKEN_ID {
                    continue;
                }
                if let Some(token) = s.tokens.get_mut(&id) {
                    if token.price_usd != price {
                        token.price_usd = price;
                        token.recompute_balance_usd();
                        changed = true;
                    }
                }
            }
            if changed {
                sync_native_near(&mut s.tokens);
                s.resort();
            }
        });
    }

    /// Refresh balances for `account_id`, or the connected account when
    /// `None`. With no account at all every balance is cleared without a
    /// network call. A refresh overtaken by a newer one is dropped.
    pub async fn refresh_balances(&self, account_id: Option<&str>) {
        let generation = self.balance_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let account = account_id
            .map(str::to_string)
            .or_else(|| self.snapshot().wallet_account_id.clone());

        let Some(account) = account else {
            self.update(|s| {
                s.status.balances = false;
                s.clear_balances();
                s.wallet_account_id = None;
                s.resort();
            });
            return;
        };

        self.update(|s| s.status.balances = true);
        let result = self.service.fetch_balances(&account).await;
        if self.balance_generation.load(Ordering::SeqCst) != generation {
            debug!("dropping superseded balance refresh for {}", account);
            return;
        }
        self.update(|s| {
            s.status.balances = false;
            match result {
                Ok(held) => {
                    s.errors.balances = None;
                    s.wallet_account_id = Some(account);
                    s.apply_balances(held);
                    s.resort();
                }
                Err(e) => {
                    warn!("balance refresh for {} failed: {}", account, e);
                    s.errors.balances = Some(e.to_string());
                }
            }
        });
    }

    /// Catalog, then balances.
    pub async fn refresh_all(&self) {
        self.refresh_tokens().await;
        self.refresh_balances(None).await;
    }

    /// Schedule a balance refresh after the debounce delay; calls inside the
    /// window collapse into one refresh.
    pub fn request_balance_refresh(&self) {
        let weak = self.weak_self.clone();
        self.balance_debounce.call(async move {
            if let Some(hub) = weak.upgrade() {
                hub.refresh_balances(None).await;
            }
        });
    }

    // --- Lookups that may hit the network ---

    /// Cached token when it already has an icon, otherwise a shared
    /// fetch-and-merge. `None` when the service fails or does not know it.
    pub async fn ensure_token_by_id(&self, account_id: &str) -> Option<Token> {
        if account_id == NEAR_TOKEN_ID {
            let near = self.select_token(NEAR_TOKEN_ID)?;
            if near.price() != 0.0 {
                return Some(near);
            }
            self.fetch_and_merge(WRAP_NEAR_TOKEN_ID).await;
            return self.select_token(NEAR_TOKEN_ID);
        }
        if let Some(token) = self.select_token(account_id).filter(Token::has_icon) {
            return Some(token);
        }
        self.fetch_and_merge(account_id).await
    }

    async fn fetch_and_merge(&self, account_id: &str) -> Option<Token> {
        let service = Arc::clone(&self.service);
        let key = account_id.to_string();
        let fetched = self
            .token_flights
            .run(key.clone(), move || async move {
                match service.fetch_token(&key).await {
                    Ok(token) => token,
                    Err(e) => {
                        warn!("fetching token {} failed: {}", key, e);
                        None
                    }
                }
            })
            .await?;
        self.update(|s| {
            s.merge_incoming(fetched);
            sync_native_near(&mut s.tokens);
            s.resort();
        });
        self.select_token(account_id)
    }

    /// Search by trimmed query. Results are merged into the cache and
    /// returned as cached tokens in server ranking order. Starting a search
    /// for a different query drops the previous caller's result.
    pub async fn search_tokens(&self, query: &str) -> Vec<Token> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }

        let (abort, registration) = AbortHandle::new_pair();
        {
            let mut active = self.active_search.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((previous_query, previous)) = active.replace((query.to_string(), abort)) {
                if previous_query != query {
                    previous.abort();
                }
            }
        }

        self.update(|s| s.status.search = true);
        let service = Arc::clone(&self.service);
        let key = query.to_string();
        let search = self
            .search_flights
            .run(key.clone(), move || async move { service.search_tokens(&key).await });
        let Ok(result) = Abortable::new(search, registration).await else {
            debug!("search for '{}' superseded", query);
            return Vec::new();
        };

        let ids = self.update(|s| {
            s.status.search = false;
            match result {
                Ok(found) => {
                    s.errors.search = None;
                    let ids: Vec<String> = found.iter().map(|t| t.account_id.clone()).collect();
                    for token in found {
                        s.merge_incoming(token);
                    }
                    sync_native_near(&mut s.tokens);
                    s.resort();
                    ids
                }
                Err(e) => {
                    warn!("search for '{}' failed: {}", query, e);
                    s.errors.search = Some(e.to_string());
                    Vec::new()
                }
            }
        });
        let snapshot = self.snapshot();
        ids.iter().filter_map(|id| snapshot.tokens.get(id).cloned()).collect()
    }

    // --- Pure selectors ---

    pub fn select_token(&self, account_id: &str) -> Option<Token> {
        self.snapshot().tokens.get(account_id).cloned()
    }

    pub fn select_balance(&self, account_id: &str) -> Option<String> {
        self.snapshot().tokens.get(account_id).and_then(|t| t.balance.clone())
    }

    pub fn select_price(&self, account_id: &str) -> Option<String> {
        self.snapshot().tokens.get(account_id).map(|t| t.price_usd.clone())
    }

    pub fn select_token_list(&self, filter: TokenListFilter) -> Vec<Token> {
        let snapshot = self.snapshot();
        let mut list: Vec<Token> = snapshot
            .sequence
            .iter()
            .filter_map(|id| snapshot.tokens.get(id))
            .filter(|t| !filter.only_with_balance || has_positive_balance(t))
            .cloned()
            .collect();
        if filter.sort == TokenSort::Symbol {
            list.sort_by_cached_key(|t| t.metadata.symbol.to_lowercase());
        }
        list
    }

    // --- Lifecycle ---

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn update_prices_every(&self, every: Option<Duration>) {
        self.update(|s| s.refresh.prices_every = every);
        if self.is_running() {
            self.apply_price_timer();
        }
    }

    pub fn update_balances_every(&self, every: Option<Duration>) {
        self.update(|s| s.refresh.balances_every = every);
        if self.is_running() {
            self.apply_balance_timer();
        }
    }

    fn apply_price_timer(&self) {
        let weak = self.weak_self.clone();
        self.price_timer.schedule(self.snapshot().refresh.prices_every, move || {
            let weak = weak.clone();
            async move {
                if let Some(hub) = weak.upgrade() {
                    hub.refresh_prices().await;
                }
            }
        });
    }

    fn apply_balance_timer(&self) {
        let weak = self.weak_self.clone();
        self.balance_timer.schedule(self.snapshot().refresh.balances_every, move || {
            let weak = weak.clone();
            async move {
                if let Some(hub) = weak.upgrade() {
                    hub.refresh_balances(None).await;
                }
            }
        });
    }

    /// Begin following `wallet` account changes, install the refresh timers
    /// and kick off one full refresh. Calling it again is a no-op.
    pub fn start(&self, mut wallet: watch::Receiver<Option<String>>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let initial = wallet.borrow_and_update().clone();
        info!("starting token hub (account: {:?})", initial);
        self.update(|s| s.wallet_account_id = initial.clone());
        self.rebuild_subscriptions(initial.as_deref());

        let weak = self.weak_self.clone();
        let watcher = tokio::spawn(async move {
            let mut current = initial;
            while wallet.changed().await.is_ok() {
                let next = wallet.borrow_and_update().clone();
                if next == current {
                    continue;
                }
                current = next.clone();
                let Some(hub) = weak.upgrade() else {
                    break;
                };
                hub.on_account_changed(next).await;
            }
        });
        if let Some(prev) = self.wallet_watch.lock().unwrap_or_else(PoisonError::into_inner).replace(watcher) {
            prev.abort();
        }

        self.apply_price_timer();
        self.apply_balance_timer();

        let weak = self.weak_self.clone();
        tokio::spawn(async move {
            if let Some(hub) = weak.upgrade() {
                hub.refresh_all().await;
            }
        });
    }

    /// Cancel timers, pending debounces and live subscriptions. Cached data
    /// is kept. Safe to call repeatedly.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping token hub");
        self.teardown();
    }

    fn teardown(&self) {
        self.price_timer.cancel();
        self.balance_timer.cancel();
        self.balance_debounce.cancel();
        if let Some(watcher) = self.wallet_watch.lock().unwrap_or_else(PoisonError::into_inner).take() {
            watcher.abort();
        }
        if let Some(subscriptions) = &self.subscriptions {
            subscriptions.teardown();
        }
        if let Some((_, search)) = self.active_search.lock().unwrap_or_else(PoisonError::into_inner).take() {
            search.abort();
        }
    }

    async fn on_account_changed(&self, account: Option<String>) {
        info!("wallet account changed to {:?}", account);
        self.update(|s| s.wallet_account_id = account.clone());
        self.rebuild_subscriptions(account.as_deref());
        self.refresh_balances(account.as_deref()).await;
    }

    fn rebuild_subscriptions(&self, account_id: Option<&str>) {
        let Some(subscriptions) = &self.subscriptions else {
            return;
        };
        let weak = self.weak_self.clone();
        let is_active = Arc::new(move |account: &str| {
            weak.upgrade()
                .is_some_and(|hub| hub.snapshot().wallet_account_id.as_deref() == Some(account))
        });
        let weak = self.weak_self.clone();
        let on_event = Arc::new(move || {
            if let Some(hub) = weak.upgrade() {
                hub.request_balance_refresh();
            }
        });
        subscriptions.rebuild(account_id, is_active, on_event);
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.as_ref().map_or(0, BalanceSubscriptions::active_connections)
    }
}

impl Drop for TokenHub {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn has_positive_balance(token: &Token) -> bool {
    token
        .balance
        .as_deref()
        .and_then(|raw| parse_raw_amount(raw).ok())
        .is_some_and(|v| v > num_bigint::BigUint::default())
}
