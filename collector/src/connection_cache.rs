//! Lazily opened, process-wide store connection shared by all requests.
use crate::metrics_defs::{
    STORE_CONNECTION_ATTEMPTS, STORE_CONNECTION_FAILURES, STORE_CONNECTION_REUSED,
};
use crate::store::{ConnectionError, Connector, FeedbackStore};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use shared::counter;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type PendingConnection = Shared<BoxFuture<'static, Result<Arc<dyn FeedbackStore>, ConnectionError>>>;

enum Slot {
    Empty,
    Connecting(PendingConnection),
    Ready(Arc<dyn FeedbackStore>),
    // Next acquire retries, same as Empty
    Failed(ConnectionError),
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Connecting,
    Ready,
    Failed,
    Closed,
}

/// Holds at most one live store handle.
///
/// Callers arriving while an attempt is in flight wait on that same attempt
/// and observe its outcome. A failed attempt is not cached; the next call
/// starts a fresh one.
pub struct ConnectionCache {
    connector: Arc<dyn Connector>,
    slot: Mutex<Slot>,
    attempts: AtomicU64,
}

impl ConnectionCache {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        ConnectionCache {
            connector,
            slot: Mutex::new(Slot::Empty),
            attempts: AtomicU64::new(0),
        }
    }

    pub async fn acquire(&self) -> Result<Arc<dyn FeedbackStore>, ConnectionError> {
        let pending = {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Ready(store) => {
                    tracing::debug!("Using cached store connection");
                    counter!(STORE_CONNECTION_REUSED).increment(1);
                    return Ok(store.clone());
                }
                Slot::Closed => return Err(ConnectionError::Closed),
                Slot::Connecting(pending) => pending.clone(),
                Slot::Empty | Slot::Failed(_) => {
                    let pending = self.start_attempt();
                    *slot = Slot::Connecting(pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;

        // Only the attempt that is still current may settle the slot, a close()
        // or a newer attempt must not be overwritten.
        let mut slot = self.slot.lock();
        if let Slot::Connecting(current) = &*slot
            && current.ptr_eq(&pending)
        {
            *slot = match &result {
                Ok(store) => Slot::Ready(store.clone()),
                Err(err) => Slot::Failed(err.clone()),
            };
        }

        result
    }

    fn start_attempt(&self) -> PendingConnection {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        counter!(STORE_CONNECTION_ATTEMPTS).increment(1);

        let connector = self.connector.clone();
        async move {
            let store_name = connector.describe();
            tracing::info!(store = %store_name, attempt, "Creating new store connection");

            match connector.connect().await {
                Ok(store) => {
                    tracing::info!(store = %store_name, "Connected to the document store");
                    Ok(store)
                }
                Err(err) => {
                    counter!(STORE_CONNECTION_FAILURES).increment(1);
                    tracing::error!(store = %store_name, error = %err, "Store connection failed");
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }

    pub fn state(&self) -> CacheState {
        match &*self.slot.lock() {
            Slot::Empty => CacheState::Empty,
            Slot::Connecting(_) => CacheState::Connecting,
            Slot::Ready(_) => CacheState::Ready,
            Slot::Failed(_) => CacheState::Failed,
            Slot::Closed => CacheState::Closed,
        }
    }

    /// Error of the last attempt, if that attempt failed.
    pub fn last_error(&self) -> Option<ConnectionError> {
        match &*self.slot.lock() {
            Slot::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Number of connection attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Used by the readiness probe.
    pub fn is_ready(&self) -> bool {
        !matches!(self.state(), CacheState::Failed | CacheState::Closed)
    }

    /// Drops the cached handle. Every later acquire fails with `Closed`.
    pub fn close(&self) {
        *self.slot.lock() = Slot::Closed;
    }
}
