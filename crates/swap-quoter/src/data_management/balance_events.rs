//! Event-stream subscriptions that invalidate cached balances. Message
//! contents are ignored: any notification for the account means "refresh".

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::types::{QuoterError, Result};

pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// One item per inbound notification; an `Err` ends the connection.
pub type EventStream = BoxStream<'static, Result<()>>;

/// Opens a notification stream for one event category, filtered server-side
/// to one account.
#[async_trait]
pub trait EventConnector: Send + Sync {
    async fn connect(&self, category: &str, account_id: &str) -> Result<EventStream>;
}

/// WebSocket connector: `{base_url}/{category}`, filter sent as the first frame.
pub struct WsEventConnector {
    base_url: String,
}

impl WsEventConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into().trim_end_matches('/').to_string() }
    }
}

pub fn account_filter(account_id: &str) -> serde_json::Value {
    json!({
        "Or": [
            { "path": "account_id", "operator": { "Equals": account_id } },
            { "path": "old_owner_id", "operator": { "Equals": account_id } },
            { "path": "new_owner_id", "operator": { "Equals": account_id } }
        ]
    })
}

#[async_trait]
impl EventConnector for WsEventConnector {
    async fn connect(&self, category: &str, account_id: &str) -> Result<EventStream> {
        let url = format!("{}/{}", self.base_url, category);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| QuoterError::Http(format!("{}: {}", url, e)))?;
        let (mut write, read) = ws_stream.split();
        write
            .send(WsMessage::Text(account_filter(account_id).to_string()))
            .await
            .map_err(|e| QuoterError::Http(format!("{}: {}", url, e)))?;

        let events = read.filter_map(|msg| async move {
            match msg {
                Ok(WsMessage::Text(_)) | Ok(WsMessage::Binary(_)) => Some(Ok(())),
                Ok(WsMessage::Close(_)) => Some(Err(QuoterError::Http("event stream closed".into()))),
                Ok(_) => None,
                Err(e) => Some(Err(QuoterError::Http(e.to_string()))),
            }
        });
        Ok(events.boxed())
    }
}

/// Exponential reconnect delay: base, doubling, capped; reset on success.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(RECONNECT_BASE_DELAY, RECONNECT_MAX_DELAY)
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, current: base }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

pub type ActiveAccountCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;
pub type EventHandler = Arc<dyn Fn() + Send + Sync>;

/// Live subscriptions for the current account, one task per category.
pub struct BalanceSubscriptions {
    connector: Arc<dyn EventConnector>,
    categories: Vec<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BalanceSubscriptions {
    pub fn new(connector: Arc<dyn EventConnector>, categories: Vec<String>) -> Self {
        Self { connector, categories, tasks: Mutex::new(Vec::new()) }
    }

    /// Tear down every live connection and, if an account is given, open a
    /// fresh one per category for it.
    pub fn rebuild(&self, account_id: Option<&str>, is_active: ActiveAccountCheck, on_event: EventHandler) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
        let Some(account_id) = account_id else {
            return;
        };
        for category in &self.categories {
            tasks.push(tokio::spawn(run_subscription(
                Arc::clone(&self.connector),
                category.clone(),
                account_id.to_string(),
                Arc::clone(&is_active),
                Arc::clone(&on_event),
            )));
        }
    }

    pub fn teardown(&self) {
        for task in self.tasks.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            task.abort();
        }
    }

    pub fn active_connections(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| !t.is_finished())
            .count()
    }
}

impl Drop for BalanceSubscriptions {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn run_subscription(
    connector: Arc<dyn EventConnector>,
    category: String,
    account_id: String,
    is_active: ActiveAccountCheck,
    on_event: EventHandler,
) {
    let mut backoff = Backoff::default();
    loop {
        if !is_active(&account_id) {
            debug!("[events:{}] {} is no longer active, stopping", category, account_id);
            return;
        }
        match connector.connect(&category, &account_id).await {
            Ok(mut events) => {
                backoff.reset();
                info!("[events:{}] subscribed for {}", category, account_id);
                while let Some(event) = events.next().await {
                    match event {
                        Ok(()) => {
                            if !is_active(&account_id) {
                                return;
                            }
                            on_event();
                        }
                        Err(e) => {
                            warn!("[events:{}] stream error: {}", category, e);
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!("[events:{}] connect failed: {}", category, e),
        }
        let delay = backoff.next_delay();
        debug!("[events:{}] reconnecting in {:?}", category, delay);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::time::Instant;

    use super::*;

    /// Connects according to a script: `true` opens a stream that fails on
    /// its first poll, `false` (and an exhausted script) refuses to connect.
    struct FlakyConnector {
        script: Mutex<VecDeque<bool>>,
        connects: Mutex<Vec<Duration>>,
        started: Instant,
    }

    impl FlakyConnector {
        fn new(script: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                connects: Mutex::new(Vec::new()),
                started: Instant::now(),
            })
        }

        fn connect_secs(&self) -> Vec<u64> {
            self.connects.lock().unwrap().iter().map(Duration::as_secs).collect()
        }
    }

    #[async_trait]
    impl EventConnector for FlakyConnector {
        async fn connect(&self, _category: &str, _account_id: &str) -> Result<EventStream> {
            self.connects.lock().unwrap().push(self.started.elapsed());
            if self.script.lock().unwrap().pop_front().unwrap_or(false) {
                Ok(futures::stream::once(async { Err(QuoterError::Http("closed".into())) }).boxed())
            } else {
                Err(QuoterError::Http("refused".into()))
            }
        }
    }

    fn spawn_loop(connector: Arc<FlakyConnector>, active: Arc<AtomicBool>) -> JoinHandle<()> {
        let events = Arc::new(AtomicUsize::new(0));
        tokio::spawn(run_subscription(
            connector,
            "ft_transfer".to_string(),
            "alice.near".to_string(),
            Arc::new(move |_: &str| active.load(Ordering::SeqCst)),
            Arc::new(move || {
                events.fetch_add(1, Ordering::SeqCst);
            }),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connects_back_off_exponentially() {
        let connector = FlakyConnector::new(&[]);
        let task = spawn_loop(Arc::clone(&connector), Arc::new(AtomicBool::new(true)));

        tokio::time::sleep(Duration::from_millis(7500)).await;
        task.abort();

        assert_eq!(connector.connect_secs(), vec![0, 1, 3, 7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_connect_resets_backoff() {
        // refused, connected then dropped, refused, refused
        let connector = FlakyConnector::new(&[false, true]);
        let task = spawn_loop(Arc::clone(&connector), Arc::new(AtomicBool::new(true)));

        tokio::time::sleep(Duration::from_millis(4500)).await;
        task.abort();

        assert_eq!(connector.connect_secs(), vec![0, 1, 2, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_account_switch_during_backoff_ends_the_loop() {
        let connector = FlakyConnector::new(&[]);
        let active = Arc::new(AtomicBool::new(true));
        let task = spawn_loop(Arc::clone(&connector), Arc::clone(&active));

        tokio::time::sleep(Duration::from_millis(500)).await;
        active.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(connector.connect_secs(), vec![0]);
        assert!(task.is_finished());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), RECONNECT_BASE_DELAY);
    }
}
