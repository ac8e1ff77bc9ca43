//! Per-run packument memoization with request coalescing.
//!
//! Many branches of one resolver layer ask for the same package name at
//! once. The first request starts the registry fetch; later requests attach
//! to the pending future instead of issuing their own call. Successful
//! results are kept for the rest of the run; failures are not, so a later
//! request retries.

use super::error::SyncError;
use super::packument::Packument;
use super::registry::Registry;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

type PendingFetch = Shared<BoxFuture<'static, Result<Arc<Packument>, SyncError>>>;

#[derive(Default)]
struct CacheState {
    completed: HashMap<String, Arc<Packument>>,
    in_flight: HashMap<String, PendingFetch>,
}

/// Packument cache scoped to one resolution run.
pub struct MetadataCache {
    registry: Arc<dyn Registry>,
    state: Mutex<CacheState>,
    fetches: AtomicUsize,
}

impl MetadataCache {
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            state: Mutex::new(CacheState::default()),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Get the packument for `name`, or `None` if it could not be fetched.
    ///
    /// A failure is treated as "no data available"; it was already logged
    /// once by the fetch every waiter shared.
    pub async fn get(&self, name: &str) -> Option<Arc<Packument>> {
        self.fetch(name).await.ok()
    }

    /// Like [`MetadataCache::get`] but hands back the error.
    ///
    /// # Errors
    /// Returns the registry error of the (possibly shared) fetch.
    pub async fn fetch(&self, name: &str) -> Result<Arc<Packument>, SyncError> {
        let pending = {
            let mut state = self.state.lock().await;
            if let Some(packument) = state.completed.get(name) {
                return Ok(Arc::clone(packument));
            }
            match state.in_flight.get(name) {
                Some(pending) => {
                    debug!(name = %name, "joining in-flight packument fetch");
                    pending.clone()
                }
                None => {
                    let pending = self.start_fetch(name);
                    state.in_flight.insert(name.to_string(), pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;

        let mut state = self.state.lock().await;
        if state
            .in_flight
            .get(name)
            .is_some_and(|current| current.ptr_eq(&pending))
        {
            state.in_flight.remove(name);
        }
        if let Ok(packument) = &result {
            state
                .completed
                .entry(name.to_string())
                .or_insert_with(|| Arc::clone(packument));
        }
        result
    }

    fn start_fetch(&self, name: &str) -> PendingFetch {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.registry);
        let name = name.to_string();
        async move {
            debug!(name = %name, "fetching packument");
            match registry.fetch_packument(&name).await {
                Ok(packument) => Ok(Arc::new(packument)),
                Err(e) => {
                    warn!(name = %name, code = e.code(), error = %e, "packument fetch failed");
                    Err(SyncError::packument_fetch(&name, e))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Number of registry fetches started (coalesced requests count once).
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of cached packuments.
    pub async fn len(&self) -> usize {
        self.state.lock().await.completed.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Release both maps.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.completed.clear();
        state.in_flight.clear();
    }
}
