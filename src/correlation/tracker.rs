//! Outstanding-call registry with timer driven expiry.
//!
//! Each entry is keyed by `"{id}@{method}"` and carries one of two
//! continuations:
//!
//! - [`Continuation::Blocking`] - a waiting caller, released with the
//!   response (real or synthesized).
//! - [`Continuation::Callback`] - run only on expiry with the synthesized
//!   failure response. A real response for a callback entry is handled by
//!   the command bus dispatching it, so resolving one just drops it.
//!
//! Lookups, inserts and removals happen under one lock; continuations run
//! after the lock is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{Result, TcpwireError};
use crate::handler::{bad_response, FAILURE_CODE, WAIT_TIMED_OUT};

/// Default lifetime of an outstanding call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between expiry scans.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// What happens when an entry completes.
pub enum Continuation {
    /// Wake the caller waiting on the receiver half.
    Blocking(oneshot::Sender<String>),
    /// Run with the synthesized failure response on expiry.
    Callback(Box<dyn FnOnce(String) + Send>),
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocking(_) => f.write_str("Blocking"),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

#[derive(Debug)]
struct PendingCall {
    request: Value,
    /// `None` when the timeout is too large to represent; never expires.
    expires_at: Option<Instant>,
    continuation: Continuation,
}

/// Registry of outstanding calls for one client or server.
#[derive(Debug, Default)]
pub struct CallTracker {
    calls: Mutex<HashMap<String, PendingCall>>,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn calls(&self) -> MutexGuard<'_, HashMap<String, PendingCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an outstanding call that expires after `timeout`.
    ///
    /// # Errors
    ///
    /// `DuplicateCall` if an entry with the same key is still outstanding.
    pub fn add(
        &self,
        key: String,
        request: Value,
        timeout: Duration,
        continuation: Continuation,
    ) -> Result<()> {
        let mut calls = self.calls();
        if calls.contains_key(&key) {
            return Err(TcpwireError::DuplicateCall(key));
        }
        calls.insert(
            key,
            PendingCall {
                request,
                expires_at: Instant::now().checked_add(timeout),
                continuation,
            },
        );
        Ok(())
    }

    /// Register a blocking call and return the receiver its response arrives on.
    pub fn add_blocking(
        &self,
        key: String,
        request: Value,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<String>> {
        let (tx, rx) = oneshot::channel();
        self.add(key, request, timeout, Continuation::Blocking(tx))?;
        Ok(rx)
    }

    /// Register a call whose expiry runs `on_timeout`.
    pub fn add_callback<F>(
        &self,
        key: String,
        request: Value,
        timeout: Duration,
        on_timeout: F,
    ) -> Result<()>
    where
        F: FnOnce(String) + Send + 'static,
    {
        self.add(key, request, timeout, Continuation::Callback(Box::new(on_timeout)))
    }

    /// Stop tracking `key` without running its continuation.
    pub fn remove(&self, key: &str) -> bool {
        self.calls().remove(key).is_some()
    }

    /// Complete the entry for `key` with `response`.
    ///
    /// Returns `true` if an entry was found (and removed).
    pub fn resolve(&self, key: &str, response: &str) -> bool {
        let Some(call) = self.calls().remove(key) else {
            return false;
        };

        if let Continuation::Blocking(tx) = call.continuation {
            // Receiver gone means the caller already gave up
            let _ = tx.send(response.to_string());
        }
        true
    }

    /// Expire every entry past its deadline. Returns the number expired.
    pub fn tick(&self) -> usize {
        self.expire(Instant::now())
    }

    fn expire(&self, now: Instant) -> usize {
        let expired: Vec<(String, PendingCall)> = {
            let mut calls = self.calls();
            let keys: Vec<String> = calls
                .iter()
                .filter(|(_, call)| call.expires_at.is_some_and(|at| at <= now))
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| calls.remove(&key).map(|call| (key, call)))
                .collect()
        };

        let count = expired.len();
        for (key, call) in expired {
            tracing::debug!("Call {} timed out", key);
            let response = bad_response(&call.request, FAILURE_CODE, WAIT_TIMED_OUT);
            match call.continuation {
                Continuation::Blocking(tx) => {
                    let _ = tx.send(response);
                }
                Continuation::Callback(on_timeout) => on_timeout(response),
            }
        }
        count
    }

    pub fn contains(&self, key: &str) -> bool {
        self.calls().contains_key(key)
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.calls().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls().is_empty()
    }

    /// Run [`CallTracker::tick`] every `interval` on the current runtime.
    ///
    /// The task holds only a weak reference and exits once the tracker is
    /// dropped.
    pub fn spawn_ticker(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let tracker: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                let Some(tracker) = tracker.upgrade() else {
                    return;
                };
                tracker.tick();
            }
        })
    }
}
