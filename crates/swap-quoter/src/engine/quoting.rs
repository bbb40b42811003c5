//! Quote-fetch controller for one swap form.
//!
//! Every trigger (token, direction, typed amount, slippage or trader change)
//! aborts the request in flight and starts a new one under a fresh
//! generation. A result is applied only while its generation is still the
//! latest, so a slow response can never overwrite newer state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use futures::future::{AbortHandle, AbortRegistration, Abortable};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::analytics::{price_impact, usd_value, worst_case_bound, PriceImpact};
use super::router::{select_route, Route, RouteProvider, RouteRequest, RouteSelection, SlippageSetting, SwapAmount};
use crate::data_management::token::Token;
use crate::data_management::token_hub::{HubState, TokenHub};
use crate::types::{Result, SwapDirection};
use crate::utils::amount::{format_raw, human_to_raw, is_positive_amount, raw_amount_to_human_readable};
use crate::utils::timers::PeriodicTask;

/// Server-side wait budget sent with every route request.
pub const DEFAULT_MAX_WAIT_MS: u64 = 1500;
pub const DEFAULT_QUOTE_REFRESH: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct QuoteConfig {
    pub max_wait_ms: u64,
    /// `None` disables the background refresh.
    pub refresh_every: Option<Duration>,
    /// Venue allow-list; empty lets the router use everything.
    pub dexes: Vec<String>,
    /// Auto slippage band in percent.
    pub auto_slippage: (Decimal, Decimal),
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
            refresh_every: Some(DEFAULT_QUOTE_REFRESH),
            dexes: vec!["Rhea".into(), "Veax".into(), "Aidols".into(), "GraFun".into(), "Jumpdefi".into(), "Wrap".into()],
            auto_slippage: (Decimal::new(1, 1), Decimal::new(5, 0)),
        }
    }
}

impl QuoteConfig {
    pub fn auto_slippage(&self) -> SlippageSetting {
        SlippageSetting::Auto { min: self.auto_slippage.0, max: self.auto_slippage.1 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuoteStatus {
    Idle,
    Fetching,
    Resolved,
    NoRoute,
    /// Routes came back but none can be executed by this client.
    UnsupportedRoute,
    Error(String),
}

/// User-editable form inputs. Only the side selected by `direction` is
/// typed by the user; the other side is computed from the route.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteForm {
    pub token_in: Option<String>,
    pub token_out: Option<String>,
    pub direction: SwapDirection,
    pub amount_in: String,
    pub amount_out: String,
    pub slippage: SlippageSetting,
    pub trader_account_id: Option<String>,
}

impl QuoteForm {
    pub fn typed_amount(&self) -> &str {
        match self.direction {
            SwapDirection::ExactIn => &self.amount_in,
            SwapDirection::ExactOut => &self.amount_out,
        }
    }

    fn computed_amount_mut(&mut self) -> &mut String {
        match self.direction {
            SwapDirection::ExactIn => &mut self.amount_out,
            SwapDirection::ExactOut => &mut self.amount_in,
        }
    }
}

/// Everything a front end renders for the form.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteView {
    pub form: QuoteForm,
    pub status: QuoteStatus,
    pub route: Option<Route>,
    /// Minimum received (exact-in) or maximum paid (exact-out), formatted.
    pub worst_case: Option<String>,
    pub price_impact: Option<PriceImpact>,
}

impl QuoteView {
    fn clear_quote(&mut self) {
        self.route = None;
        self.worst_case = None;
        self.price_impact = None;
        self.form.computed_amount_mut().clear();
    }
}

pub struct QuoteController {
    hub: Arc<TokenHub>,
    router: Arc<dyn RouteProvider>,
    config: QuoteConfig,
    view: watch::Sender<QuoteView>,
    generation: AtomicU64,
    in_flight: Mutex<Option<AbortHandle>>,
    background: PeriodicTask,
    weak_self: Weak<QuoteController>,
}

impl QuoteController {
    pub fn new(hub: Arc<TokenHub>, router: Arc<dyn RouteProvider>, config: QuoteConfig) -> Arc<Self> {
        let form = QuoteForm {
            token_in: None,
            token_out: None,
            direction: SwapDirection::ExactIn,
            amount_in: String::new(),
            amount_out: String::new(),
            slippage: config.auto_slippage(),
            trader_account_id: None,
        };
        let (view, _) = watch::channel(QuoteView {
            form,
            status: QuoteStatus::Idle,
            route: None,
            worst_case: None,
            price_impact: None,
        });
        let controller = Arc::new_cyclic(|weak_self| Self {
            hub: Arc::clone(&hub),
            router,
            config,
            view,
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(None),
            background: PeriodicTask::new(),
            weak_self: weak_self.clone(),
        });

        let weak = Arc::downgrade(&controller);
        hub.register_callback(move |state| {
            if let Some(controller) = weak.upgrade() {
                controller.recompute_price_impact(state);
            }
        });
        controller
    }

    pub fn view(&self) -> QuoteView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every view change.
    pub fn subscribe(&self) -> watch::Receiver<QuoteView> {
        self.view.subscribe()
    }

    // --- Triggers ---

    pub fn set_token_in(&self, token_id: Option<String>) {
        self.edit_and_trigger(|f| f.token_in = token_id);
    }

    pub fn set_token_out(&self, token_id: Option<String>) {
        self.edit_and_trigger(|f| f.token_out = token_id);
    }

    /// Switching direction keeps the amount already shown on the newly
    /// typed side.
    pub fn set_direction(&self, direction: SwapDirection) {
        self.edit_and_trigger(|f| f.direction = direction);
    }

    /// Set the user-typed amount for the current direction.
    pub fn set_amount(&self, amount: impl Into<String>) {
        let amount = amount.into();
        self.edit_and_trigger(|f| match f.direction {
            SwapDirection::ExactIn => f.amount_in = amount,
            SwapDirection::ExactOut => f.amount_out = amount,
        });
    }

    pub fn set_slippage(&self, slippage: SlippageSetting) {
        self.edit_and_trigger(|f| f.slippage = slippage);
    }

    pub fn set_trader_account(&self, account_id: Option<String>) {
        self.edit_and_trigger(|f| f.trader_account_id = account_id);
    }

    fn edit_and_trigger(&self, edit: impl FnOnce(&mut QuoteForm)) {
        let changed = self.view.send_if_modified(|v| {
            let before = v.form.clone();
            edit(&mut v.form);
            v.form != before
        });
        if changed {
            self.trigger();
        }
    }

    /// Abort whatever is in flight and start a fresh request in the
    /// background. Results of earlier requests are invalid from here on.
    pub fn trigger(&self) {
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            self.generation.fetch_add(1, Ordering::SeqCst);
            if let Some(previous) = in_flight.take() {
                previous.abort();
            }
        }
        let weak = self.weak_self.clone();
        tokio::spawn(async move {
            if let Some(controller) = weak.upgrade() {
                controller.refresh_quote().await;
            }
        });
    }

    // --- Fetching ---

    /// Fetch a quote for the current form and apply it unless superseded.
    pub async fn refresh_quote(&self) {
        let (generation, registration) = self.begin_request();

        let form = self.view().form;
        let Some(tokens) = self.resolve_tokens(&form).await else {
            self.apply(generation, |v| {
                v.status = QuoteStatus::Idle;
                v.clear_quote();
            });
            return;
        };
        if !self.is_current(generation) {
            return;
        }
        let request = match self.build_request(&form, &tokens) {
            Ok(Some(request)) => request,
            Ok(None) => {
                self.apply(generation, |v| {
                    v.status = QuoteStatus::Idle;
                    v.clear_quote();
                });
                return;
            }
            Err(e) => {
                self.apply(generation, |v| {
                    v.status = QuoteStatus::Error(e.to_string());
                    v.clear_quote();
                });
                return;
            }
        };

        self.apply(generation, |v| {
            v.status = QuoteStatus::Fetching;
            v.price_impact = None;
        });
        debug!("requesting routes (generation {})", generation);
        let Ok(result) = Abortable::new(self.router.fetch_routes(&request), registration).await else {
            debug!("quote generation {} aborted", generation);
            return;
        };
        if !self.is_current(generation) {
            debug!("dropping stale quote generation {}", generation);
            return;
        }
        self.apply_routes(generation, &form, &tokens, result);
    }

    /// Claim the next generation and install its abort handle as one step,
    /// so the newest generation always owns the in-flight slot.
    fn begin_request(&self) -> (u64, AbortRegistration) {
        let (abort, registration) = AbortHandle::new_pair();
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = in_flight.replace(abort) {
            previous.abort();
        }
        (generation, registration)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Mutate the view only while `generation` is the latest.
    fn apply(&self, generation: u64, mutate: impl FnOnce(&mut QuoteView)) {
        self.view.send_if_modified(|v| {
            if !self.is_current(generation) {
                return false;
            }
            mutate(v);
            true
        });
    }

    async fn resolve_tokens(&self, form: &QuoteForm) -> Option<(Token, Token)> {
        let token_in = self.hub.ensure_token_by_id(form.token_in.as_deref()?).await?;
        let token_out = self.hub.ensure_token_by_id(form.token_out.as_deref()?).await?;
        Some((token_in, token_out))
    }

    /// `Ok(None)` when the typed amount is not a positive number.
    fn build_request(&self, form: &QuoteForm, tokens: &(Token, Token)) -> Result<Option<RouteRequest>> {
        let (token_in, token_out) = tokens;
        let typed_decimals = match form.direction {
            SwapDirection::ExactIn => token_in.metadata.decimals,
            SwapDirection::ExactOut => token_out.metadata.decimals,
        };
        if !is_positive_amount(form.typed_amount(), typed_decimals) {
            return Ok(None);
        }
        let raw = human_to_raw(form.typed_amount(), typed_decimals)?.to_string();
        let amount = match form.direction {
            SwapDirection::ExactIn => SwapAmount::ExactIn(raw),
            SwapDirection::ExactOut => SwapAmount::ExactOut(raw),
        };
        Ok(Some(RouteRequest {
            token_in: token_in.account_id.clone(),
            token_out: token_out.account_id.clone(),
            amount,
            max_wait_ms: self.config.max_wait_ms,
            dexes: self.config.dexes.clone(),
            slippage: form.slippage,
            trader_account_id: form.trader_account_id.clone(),
        }))
    }

    fn apply_routes(&self, generation: u64, form: &QuoteForm, tokens: &(Token, Token), result: Result<Vec<Route>>) {
        let routes = match result {
            Ok(routes) => routes,
            Err(e) => {
                warn!("route request failed: {}", e);
                self.apply(generation, |v| {
                    v.status = QuoteStatus::Error(e.to_string());
                    v.clear_quote();
                });
                return;
            }
        };

        let route = match select_route(routes) {
            RouteSelection::Best(route) => route,
            RouteSelection::NoRoute => {
                self.apply(generation, |v| {
                    v.status = QuoteStatus::NoRoute;
                    v.clear_quote();
                });
                return;
            }
            RouteSelection::Unsupported => {
                self.apply(generation, |v| {
                    v.status = QuoteStatus::UnsupportedRoute;
                    v.clear_quote();
                });
                return;
            }
        };

        let (token_in, token_out) = tokens;
        let computed_decimals = match form.direction {
            SwapDirection::ExactIn => token_out.metadata.decimals,
            SwapDirection::ExactOut => token_in.metadata.decimals,
        };
        let Some(estimate) = route
            .estimated_amount
            .computed(form.direction)
            .and_then(|raw| raw_amount_to_human_readable(raw, computed_decimals).ok())
        else {
            warn!("route from {} has no usable estimate", route.dex_id);
            self.apply(generation, |v| {
                v.status = QuoteStatus::NoRoute;
                v.clear_quote();
            });
            return;
        };
        let worst_case = route
            .worst_case_amount
            .computed(form.direction)
            .and_then(|raw| raw_amount_to_human_readable(raw, computed_decimals).ok())
            .or_else(|| {
                let raw = route.estimated_amount.computed(form.direction)?;
                let bound = worst_case_bound(raw, form.slippage.max_bps(), form.direction).ok()?;
                Some(format_raw(&bound, computed_decimals))
            });

        info!("quote via {}: {} {}", route.dex_id, estimate, token_out.metadata.symbol);
        let mut resolved_form = form.clone();
        *resolved_form.computed_amount_mut() = estimate.clone();
        let impact = impact_for(&resolved_form, token_in, token_out);
        self.apply(generation, |v| {
            *v.form.computed_amount_mut() = estimate;
            v.status = QuoteStatus::Resolved;
            v.route = Some(route);
            v.worst_case = worst_case;
            v.price_impact = impact;
        });
    }

    /// Re-derive price impact from fresh hub prices. Skipped mid-fetch.
    fn recompute_price_impact(&self, state: &HubState) {
        self.view.send_if_modified(|v| {
            if v.status != QuoteStatus::Resolved {
                return false;
            }
            let (Some(token_in), Some(token_out)) = (
                v.form.token_in.as_ref().and_then(|id| state.tokens.get(id)),
                v.form.token_out.as_ref().and_then(|id| state.tokens.get(id)),
            ) else {
                return false;
            };
            let impact = impact_for(&v.form, token_in, token_out);
            if impact == v.price_impact {
                return false;
            }
            v.price_impact = impact;
            true
        });
    }

    // --- Background refresh ---

    /// Re-quote every `refresh_every` while the inputs stay valid.
    pub fn start(&self) {
        let weak = self.weak_self.clone();
        self.background.schedule(self.config.refresh_every, move || {
            let weak = weak.clone();
            async move {
                let Some(controller) = weak.upgrade() else {
                    return;
                };
                if controller.inputs_valid() {
                    controller.refresh_quote().await;
                }
            }
        });
    }

    pub fn stop(&self) {
        self.background.cancel();
        if let Some(handle) = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }

    /// Both tokens chosen and a positive typed amount.
    pub fn inputs_valid(&self) -> bool {
        let form = self.view().form;
        let (Some(token_in), Some(token_out)) = (&form.token_in, &form.token_out) else {
            return false;
        };
        let typed_token = match form.direction {
            SwapDirection::ExactIn => token_in,
            SwapDirection::ExactOut => token_out,
        };
        let decimals = self.hub.select_token(typed_token).map_or(0, |t| t.metadata.decimals);
        is_positive_amount(form.typed_amount(), decimals)
    }
}

impl Drop for QuoteController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn impact_for(form: &QuoteForm, token_in: &Token, token_out: &Token) -> Option<PriceImpact> {
    let in_usd = usd_value(&form.amount_in, token_in.price())?;
    let out_usd = usd_value(&form.amount_out, token_out.price())?;
    price_impact(in_usd, out_usd)
}
