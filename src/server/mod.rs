//! Server: listener, accept loop and session fan-out.
//!
//! ```text
//! TcpListener ─► accept loop ─► Session ─┐
//!                            ─► Session ─┼─► shared CommandBus ─► CallTracker
//!                            ─► Session ─┘
//! ```
//!
//! Every accepted connection becomes a [`Session`] with a fresh
//! [`SessionId`], registered until the connection closes. All sessions share
//! one command bus and one call tracker.
//!
//! # Example
//!
//! ```no_run
//! use tcpwire::handler::ok_response;
//! use tcpwire::RpcServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RpcServer::builder()
//!         .handle("Echo", |_session, req| ok_response(req, req["params"].clone()))
//!         .build()?;
//!
//!     let addr = server.start("127.0.0.1", 9000).await?;
//!     println!("listening on {}", addr);
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop();
//!     Ok(())
//! }
//! ```

mod session;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::client::EndpointSetup;
use crate::config::{DispatchMode, RpcConfig};
use crate::connection::{CloseHook, Connection};
use crate::correlation;
use crate::error::{Result, TcpwireError};
use crate::handler::CommandBus;
use crate::transport::{parse_endpoint, SessionId};

pub use session::{Session, SessionRegistry};

/// Builder for configuring and creating an [`RpcServer`].
pub struct ServerBuilder {
    setup: EndpointSetup,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            setup: EndpointSetup::new(),
        }
    }

    /// Register a request handler shared by every session.
    pub fn handle<F>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(&SessionId, &Value) -> String + Send + Sync + 'static,
    {
        self.setup
            .handlers
            .push((method.to_string(), Arc::new(handler)));
        self
    }

    /// Receive binary commands from any session.
    pub fn on_binary<F>(mut self, handler: F) -> Self
    where
        F: Fn(&SessionId, Bytes) + Send + Sync + 'static,
    {
        self.setup.binary_handler = Some(Arc::new(handler));
        self
    }

    /// Run `hook` after a session closes and leaves the registry.
    pub fn on_session_closed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SessionId) + Send + Sync + 'static,
    {
        self.setup.on_closed = Some(Arc::new(hook));
        self
    }

    /// Default: `Pooled`
    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.setup.config.dispatch_mode = mode;
        self
    }

    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.setup.config.max_concurrent_handlers = limit;
        self
    }

    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.setup.config.writer.max_pending_frames = limit;
        self
    }

    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.setup.config.writer.channel_capacity = capacity;
        self
    }

    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.setup.config.writer.backpressure_timeout = timeout;
        self
    }

    /// Default: 1 GB
    pub fn max_body_size(mut self, size: u32) -> Self {
        self.setup.config.max_body_size = size;
        self
    }

    /// Default: 10 seconds
    pub fn default_call_timeout(mut self, timeout: Duration) -> Self {
        self.setup.config.default_call_timeout = timeout;
        self
    }

    /// Default: 1 second
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.setup.config.tick_interval = interval;
        self
    }

    pub fn config(mut self, config: RpcConfig) -> Self {
        self.setup.config = config;
        self
    }

    /// Build the server. It is not listening yet.
    pub fn build(mut self) -> Result<RpcServer> {
        let bus = self.setup.build_bus()?;
        Ok(RpcServer {
            bus,
            sessions: Arc::new(SessionRegistry::new()),
            config: self.setup.config,
            on_closed: self.setup.on_closed,
            listener: Mutex::new(None),
            ticker: Mutex::new(None),
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Listening {
    addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

/// An RPC server accepting any number of sessions.
pub struct RpcServer {
    bus: Arc<CommandBus>,
    sessions: Arc<SessionRegistry>,
    config: RpcConfig,
    on_closed: Option<CloseHook>,
    listener: Mutex<Option<Listening>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl RpcServer {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Listen on `ip:port`.
    ///
    /// Returns the bound address. Calling `start` on a running server is a
    /// no-op returning the existing address.
    ///
    /// # Errors
    ///
    /// `InvalidAddress`/`InvalidPort` for bad input, `Io` if binding fails.
    pub async fn start(&self, ip: &str, port: i64) -> Result<SocketAddr> {
        let addr = parse_endpoint(ip, port)?;
        self.start_at(addr).await
    }

    /// Listen on an already validated address. Port `0` picks a free port.
    pub async fn start_at(&self, addr: SocketAddr) -> Result<SocketAddr> {
        if let Some(bound) = self.local_addr() {
            return Ok(bound);
        }

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::warn!("Failed to bind {}: {}", addr, e);
            TcpwireError::Io(e)
        })?;
        let bound = listener.local_addr()?;

        let mut state = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = state.as_ref() {
            // Lost a race with a concurrent start
            return Ok(existing.addr);
        }

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.bus),
            Arc::downgrade(&self.sessions),
            self.config.clone(),
            self.on_closed.clone(),
        ));
        *state = Some(Listening {
            addr: bound,
            accept_task,
        });
        drop(state);

        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.is_none() {
            *ticker = Some(self.bus.tracker().spawn_ticker(self.config.tick_interval));
        }

        tracing::info!("RPC server listening on {}", bound);
        Ok(bound)
    }

    /// Stop listening and close every session.
    pub fn stop(&self) {
        let listening = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(listening) = listening else {
            return;
        };
        listening.accept_task.abort();

        for session in self.sessions.drain() {
            session.close();
        }
        tracing::info!("RPC server on {} stopped", listening.addr);
    }

    /// Address the server is listening on, if running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|l| l.addr)
    }

    pub fn is_running(&self) -> bool {
        self.local_addr().is_some()
    }

    /// Register a handler after the server was built.
    pub fn register<F>(&self, method: &str, handler: F) -> Result<()>
    where
        F: Fn(&SessionId, &Value) -> String + Send + Sync + 'static,
    {
        self.bus.register(method, handler)
    }

    pub fn set_binary_handler<F>(&self, handler: F)
    where
        F: Fn(&SessionId, Bytes) + Send + Sync + 'static,
    {
        self.bus.set_binary_handler(handler);
    }

    /// Send `json` to one session, or to every session when `session_id` is
    /// empty. Any other id that matches no session, blank ones included, is
    /// ignored.
    pub async fn reply(&self, session_id: &str, json: &str) {
        let targets = if session_id.is_empty() {
            self.sessions.snapshot()
        } else {
            self.sessions.get(session_id).into_iter().collect()
        };

        for session in targets {
            if let Err(e) = session.notify(json).await {
                tracing::warn!("Failed to reply to session {}: {}", session.id(), e);
            }
        }
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id)
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.snapshot()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Call one client and wait for its response.
    ///
    /// Unknown sessions yield a synthesized failure response.
    pub async fn sync_call<T: Serialize + ?Sized>(
        &self,
        session_id: &str,
        request: &T,
        timeout: Option<Duration>,
    ) -> String {
        let Some(session) = self.sessions.get(session_id) else {
            return correlation::failure_for(request, "unknown session");
        };
        let timeout = timeout.unwrap_or(self.config.default_call_timeout);
        session
            .sync_call(request, timeout, self.config.wait_limit(timeout))
            .await
    }

    /// Call one client without waiting for the response.
    pub async fn post_call<T: Serialize + ?Sized>(
        &self,
        session_id: &str,
        request: &T,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or(TcpwireError::NotConnected)?;
        let timeout = timeout.unwrap_or(self.config.default_call_timeout);
        session.post_call(request, timeout).await
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.stop();
        if let Some(ticker) = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            ticker.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    bus: Arc<CommandBus>,
    sessions: Weak<SessionRegistry>,
    config: RpcConfig,
    on_closed: Option<CloseHook>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let hook: CloseHook = {
            let sessions = sessions.clone();
            let on_closed = on_closed.clone();
            Arc::new(move |id: &SessionId| {
                if let Some(sessions) = sessions.upgrade() {
                    sessions.remove(id);
                }
                tracing::info!("Session {} closed", id);
                if let Some(hook) = &on_closed {
                    hook(id);
                }
            })
        };

        let conn = match Connection::spawn(
            stream,
            SessionId::generate(),
            Arc::clone(&bus),
            &config,
            Some(hook),
        ) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Failed to set up session for {}: {}", peer, e);
                continue;
            }
        };

        let Some(registry) = sessions.upgrade() else {
            conn.close();
            return;
        };
        registry.insert(Session::new(Arc::clone(&conn), Arc::clone(&bus)));
        if !conn.is_connected() {
            // Closed before it was registered; the hook already ran
            registry.remove(conn.id());
        }
        tracing::info!("Session {} connected from {}", conn.id(), peer);
    }
}
