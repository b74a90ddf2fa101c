//! In-Flight Productions
//!
//! Registry of productions that have started but not yet settled. Concurrent
//! requests for the same key attach to one shared production instead of
//! starting their own.

use crate::cache::key::CacheKey;
use crate::error::{Error, Result};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle to a running production; every clone resolves to the same outcome
pub type Production = Shared<BoxFuture<'static, Result<Bytes>>>;

struct Flight {
    id: u64,
    production: Production,
}

type FlightMap<K> = Arc<Mutex<HashMap<K, Flight>>>;

/// Deregisters a flight when its task finishes, including by panic
struct FlightGuard<K: CacheKey> {
    flights: FlightMap<K>,
    key: K,
    id: u64,
}

impl<K: CacheKey> Drop for FlightGuard<K> {
    fn drop(&mut self) {
        let mut flights = self.flights.lock();
        // only remove our own registration
        if flights.get(&self.key).map(|f| f.id) == Some(self.id) {
            flights.remove(&self.key);
        }
    }
}

/// Registry of in-flight productions for one kind of key
pub struct InFlightRegistry<K: CacheKey> {
    flights: FlightMap<K>,
    next_id: AtomicU64,
}

impl<K: CacheKey> InFlightRegistry<K> {
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn has(&self, key: &K) -> bool {
        self.flights.lock().contains_key(key)
    }

    /// Handle of the production registered for `key`, if any
    pub fn get(&self, key: &K) -> Option<Production> {
        self.flights.lock().get(key).map(|f| f.production.clone())
    }

    pub fn len(&self) -> usize {
        self.flights.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.lock().is_empty()
    }

    /// Attach to the production for `key`, starting `producer` if none is running
    ///
    /// The producer runs on its own task and finishes even if every waiter
    /// goes away. The key is deregistered before the outcome becomes visible
    /// to waiters. Must be called from within a Tokio runtime.
    pub fn start<F>(&self, key: K, producer: F) -> Production
    where
        F: Future<Output = Result<Bytes>> + Send + 'static,
    {
        let mut flights = self.flights.lock();
        if let Some(flight) = flights.get(&key) {
            return flight.production.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = FlightGuard {
            flights: Arc::clone(&self.flights),
            key: key.clone(),
            id,
        };
        let task = tokio::spawn(async move {
            let outcome = producer.await;
            drop(guard);
            outcome
        });

        let production = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(Error::Internal(format!("production task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        flights.insert(
            key,
            Flight {
                id,
                production: production.clone(),
            },
        );
        production
    }
}

impl<K: CacheKey> Default for InFlightRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}
