//! Single-flight request sharing: concurrent callers asking for the same key
//! await one underlying future instead of issuing duplicate requests.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

type Flights<K, V> = Arc<Mutex<HashMap<K, Shared<BoxFuture<'static, V>>>>>;

pub struct SingleFlight<K, V>
where
    V: Clone,
{
    inflight: Flights<K, V>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    V: Clone,
{
    fn default() -> Self {
        Self { inflight: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight request for `key`, or start one with `start`.
    /// The entry is removed as soon as the request settles, success or not.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let shared = {
            let mut flights = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match flights.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let registry = Arc::clone(&self.inflight);
                    let settled_key = key.clone();
                    let request = start();
                    let shared = async move {
                        let value = request.await;
                        registry
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .remove(&settled_key);
                        value
                    }
                    .boxed()
                    .shared();
                    flights.insert(key, shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
