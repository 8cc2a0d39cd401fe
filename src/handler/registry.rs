//! Command bus: method-name keyed handler registry and dispatcher.
//!
//! Every inbound JSON command passes through [`CommandBus::dispatch`]:
//!
//! ```text
//! payload ─► parse ─► resolve "{id}@{method}" in CallTracker
//!                          │
//!                          └─► handler(method)? ─► Inline: run in read loop
//!                                               └─► Pooled: run on blocking pool
//!                                                       │
//!                                   response JSON ◄─────┘ sent on same connection
//! ```
//!
//! A payload that resolves an outstanding call is still offered to the
//! handler registered for its method, if any.
//!
//! # Example
//!
//! ```
//! use tcpwire::handler::{ok_response, CommandBus};
//!
//! let bus = CommandBus::default();
//! bus.register("Echo", |_session, request| {
//!     ok_response(request, request["params"].clone())
//! })
//! .unwrap();
//!
//! assert!(bus.is_registered("Echo"));
//! assert!(bus.register("Echo", |_, _| String::new()).is_err());
//! ```

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::Semaphore;

use super::envelope::CallId;
use crate::config::{DispatchMode, DEFAULT_MAX_CONCURRENT_HANDLERS};
use crate::connection::Connection;
use crate::correlation::CallTracker;
use crate::error::{Result, TcpwireError};
use crate::transport::SessionId;

/// JSON request handler: `(session, request) -> response JSON`.
///
/// An empty response string means "nothing to send back".
pub type Handler = Arc<dyn Fn(&SessionId, &Value) -> String + Send + Sync>;

/// Receiver for inbound binary commands.
pub type BinaryHandler = Arc<dyn Fn(&SessionId, Bytes) + Send + Sync>;

/// Registry of handlers shared by every connection of a client or server.
pub struct CommandBus {
    handlers: RwLock<HashMap<String, Handler>>,
    binary_handler: RwLock<Option<BinaryHandler>>,
    tracker: Arc<CallTracker>,
    mode: DispatchMode,
    permits: Arc<Semaphore>,
}

impl CommandBus {
    /// Create a bus with its own call tracker.
    pub fn new(mode: DispatchMode, max_concurrent_handlers: usize) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            binary_handler: RwLock::new(None),
            tracker: Arc::new(CallTracker::new()),
            mode,
            permits: Arc::new(Semaphore::new(max_concurrent_handlers)),
        }
    }

    /// Register the handler for `method`.
    ///
    /// # Errors
    ///
    /// `EmptyMethod` for a blank name, `DuplicateMethod` if the method already
    /// has a handler. The existing handler is left untouched.
    pub fn register<F>(&self, method: &str, handler: F) -> Result<()>
    where
        F: Fn(&SessionId, &Value) -> String + Send + Sync + 'static,
    {
        self.register_arc(method, Arc::new(handler))
    }

    pub(crate) fn register_arc(&self, method: &str, handler: Handler) -> Result<()> {
        if method.trim().is_empty() {
            tracing::warn!("Rejected handler registration with empty method name");
            return Err(TcpwireError::EmptyMethod);
        }

        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(method) {
            tracing::warn!("Rejected duplicate handler for method {}", method);
            return Err(TcpwireError::DuplicateMethod(method.to_string()));
        }
        handlers.insert(method.to_string(), handler);
        Ok(())
    }

    /// Install the receiver for binary commands, replacing any previous one.
    pub fn set_binary_handler<F>(&self, handler: F)
    where
        F: Fn(&SessionId, Bytes) + Send + Sync + 'static,
    {
        self.set_binary_handler_arc(Arc::new(handler));
    }

    pub(crate) fn set_binary_handler_arc(&self, handler: BinaryHandler) {
        *self
            .binary_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn is_registered(&self, method: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(method)
    }

    /// Tracker holding this bus's outstanding calls.
    pub fn tracker(&self) -> &Arc<CallTracker> {
        &self.tracker
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    fn handler(&self, method: &str) -> Option<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
    }

    /// Route one inbound JSON payload received on `conn`.
    ///
    /// Unparseable payloads are dropped. Handler results are sent back over
    /// `conn`; in pooled mode the send happens from the worker once the
    /// handler returns.
    pub async fn dispatch(&self, conn: &Arc<Connection>, payload: &str) {
        let value: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("Dropping unparseable payload from {}: {}", conn.id(), e);
                return;
            }
        };

        let call = CallId::from_value(&value);
        if self.tracker.resolve(&call.key(), payload) {
            tracing::trace!("Resolved call {}", call.key());
        }

        let Some(handler) = self.handler(&call.method) else {
            tracing::trace!("No handler for method {:?}", call.method);
            return;
        };

        match self.mode {
            DispatchMode::Inline => {
                let invoked =
                    panic::catch_unwind(AssertUnwindSafe(|| handler(conn.id(), &value)));
                match invoked {
                    Ok(response) => send_response(conn, &call.method, response).await,
                    Err(_) => tracing::error!("Handler for method {} panicked", call.method),
                }
            }
            DispatchMode::Pooled => {
                let permit = match self.permits.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        tracing::warn!(
                            "Handler capacity reached, dropping request {} from {}",
                            call.key(),
                            conn.id()
                        );
                        return;
                    }
                };

                let conn = Arc::clone(conn);
                tokio::spawn(async move {
                    // Permit is held until the response has been queued
                    let _permit = permit;
                    let session = conn.id().clone();
                    let joined =
                        tokio::task::spawn_blocking(move || handler(&session, &value)).await;

                    match joined {
                        Ok(response) => send_response(&conn, &call.method, response).await,
                        Err(e) => {
                            tracing::error!("Handler for method {} failed: {}", call.method, e);
                        }
                    }
                });
            }
        }
    }

    /// Route one inbound binary payload received on `conn`.
    pub fn dispatch_binary(&self, conn: &Connection, data: Bytes) {
        let handler = self
            .binary_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(handler) = handler else {
            tracing::debug!(
                "No binary handler, dropping {} bytes from {}",
                data.len(),
                conn.id()
            );
            return;
        };

        let invoked = panic::catch_unwind(AssertUnwindSafe(|| handler(conn.id(), data)));
        if invoked.is_err() {
            tracing::error!("Binary handler panicked on {}", conn.id());
        }
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new(DispatchMode::default(), DEFAULT_MAX_CONCURRENT_HANDLERS)
    }
}

async fn send_response(conn: &Connection, method: &str, response: String) {
    if response.is_empty() {
        return;
    }
    if let Err(e) = conn.send_json(&response).await {
        tracing::warn!(
            "Failed to send {} response to {}: {}",
            method,
            conn.id(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_method() {
        let bus = CommandBus::default();
        bus.register("Echo", |_, _| String::new()).unwrap();

        assert!(bus.is_registered("Echo"));
        assert!(!bus.is_registered("echo"));
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let bus = CommandBus::default();
        bus.register("Echo", |_, _| "first".to_string()).unwrap();

        let err = bus.register("Echo", |_, _| "second".to_string()).unwrap_err();
        assert!(matches!(err, TcpwireError::DuplicateMethod(ref m) if m == "Echo"));

        let handler = bus.handler("Echo").unwrap();
        let session = SessionId::from("s");
        assert_eq!(handler(&session, &Value::Null), "first");
    }

    #[test]
    fn test_empty_method_rejected() {
        let bus = CommandBus::default();

        assert!(matches!(
            bus.register("", |_, _| String::new()),
            Err(TcpwireError::EmptyMethod)
        ));
        assert!(matches!(
            bus.register("   ", |_, _| String::new()),
            Err(TcpwireError::EmptyMethod)
        ));
    }

    #[test]
    fn test_default_mode_is_pooled() {
        assert_eq!(CommandBus::default().mode(), DispatchMode::Pooled);
        assert_eq!(
            CommandBus::new(DispatchMode::Inline, 1).mode(),
            DispatchMode::Inline
        );
    }
}
