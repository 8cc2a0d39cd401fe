//! Client builder and connection lifecycle.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring handlers and
//! limits. The [`RpcClient`] then manages the lifecycle:
//! 1. Validate the endpoint and open the TCP connection
//! 2. Start the read loop and writer task
//! 3. Issue calls and answer requests from the server
//! 4. Disconnect (or observe the server closing the connection)
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use serde_json::json;
//! use tcpwire::handler::{check_response, ok_response, request};
//! use tcpwire::RpcClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RpcClient::builder()
//!         .handle("Notify", |_session, req| ok_response(req, json!(null)))
//!         .build()?;
//!
//!     client.connect("127.0.0.1", 9000).await?;
//!
//!     let response = client
//!         .sync_call(&request(1, "Echo", json!({"text": "hi"})), None)
//!         .await;
//!     println!("{:?}", check_response(&response));
//!
//!     client.disconnect();
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::config::{DispatchMode, RpcConfig};
use crate::connection::{CloseHook, Connection};
use crate::correlation;
use crate::error::{Result, TcpwireError};
use crate::handler::{BinaryHandler, CommandBus, Handler};
use crate::transport::{parse_endpoint, SessionId};

/// Handlers and settings collected before a client or server is built.
pub(crate) struct EndpointSetup {
    pub(crate) handlers: Vec<(String, Handler)>,
    pub(crate) binary_handler: Option<BinaryHandler>,
    pub(crate) on_closed: Option<CloseHook>,
    pub(crate) config: RpcConfig,
}

impl EndpointSetup {
    pub(crate) fn new() -> Self {
        Self {
            handlers: Vec::new(),
            binary_handler: None,
            on_closed: None,
            config: RpcConfig::default(),
        }
    }

    /// Build the bus, registering every collected handler.
    pub(crate) fn build_bus(&mut self) -> Result<Arc<CommandBus>> {
        let bus = CommandBus::new(
            self.config.dispatch_mode,
            self.config.max_concurrent_handlers,
        );
        for (method, handler) in self.handlers.drain(..) {
            bus.register_arc(&method, handler)?;
        }
        if let Some(handler) = self.binary_handler.take() {
            bus.set_binary_handler_arc(handler);
        }
        Ok(Arc::new(bus))
    }
}

/// Builder for configuring and creating an [`RpcClient`].
pub struct ClientBuilder {
    setup: EndpointSetup,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            setup: EndpointSetup::new(),
        }
    }

    /// Register a handler for requests the server sends to this client.
    ///
    /// Registration errors (empty or duplicate method) surface from
    /// [`ClientBuilder::build`].
    pub fn handle<F>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(&SessionId, &Value) -> String + Send + Sync + 'static,
    {
        self.setup
            .handlers
            .push((method.to_string(), Arc::new(handler)));
        self
    }

    /// Receive binary commands from the server.
    pub fn on_binary<F>(mut self, handler: F) -> Self
    where
        F: Fn(&SessionId, Bytes) + Send + Sync + 'static,
    {
        self.setup.binary_handler = Some(Arc::new(handler));
        self
    }

    /// Run `hook` whenever the connection closes.
    pub fn on_session_closed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SessionId) + Send + Sync + 'static,
    {
        self.setup.on_closed = Some(Arc::new(hook));
        self
    }

    /// Run handlers inline or on the worker pool.
    ///
    /// Default: `Pooled`
    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.setup.config.dispatch_mode = mode;
        self
    }

    /// Set the maximum number of concurrent pooled handlers.
    ///
    /// When this limit is reached, new requests are dropped with a warning.
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.setup.config.max_concurrent_handlers = limit;
        self
    }

    /// Set the maximum pending frames for backpressure.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.setup.config.writer.max_pending_frames = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.setup.config.writer.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.setup.config.writer.backpressure_timeout = timeout;
        self
    }

    /// Largest frame body accepted from the server.
    ///
    /// Default: 1 GB
    pub fn max_body_size(mut self, size: u32) -> Self {
        self.setup.config.max_body_size = size;
        self
    }

    /// Lifetime of calls made without an explicit timeout.
    ///
    /// Default: 10 seconds
    pub fn default_call_timeout(mut self, timeout: Duration) -> Self {
        self.setup.config.default_call_timeout = timeout;
        self
    }

    /// Interval between expiry scans of outstanding calls.
    ///
    /// Default: 1 second
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.setup.config.tick_interval = interval;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: RpcConfig) -> Self {
        self.setup.config = config;
        self
    }

    /// Build the client. It is not connected yet.
    ///
    /// # Errors
    ///
    /// `EmptyMethod` or `DuplicateMethod` from handler registration.
    pub fn build(mut self) -> Result<RpcClient> {
        let bus = self.setup.build_bus()?;
        Ok(RpcClient {
            bus,
            config: self.setup.config,
            on_closed: self.setup.on_closed,
            connection: Mutex::new(None),
            ticker: Mutex::new(None),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An RPC client holding at most one connection at a time.
pub struct RpcClient {
    bus: Arc<CommandBus>,
    config: RpcConfig,
    on_closed: Option<CloseHook>,
    connection: Mutex<Option<Arc<Connection>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect to `ip:port`. Does nothing if already connected.
    ///
    /// # Errors
    ///
    /// `InvalidAddress`/`InvalidPort` for bad input, `Io` if the connection
    /// cannot be established.
    pub async fn connect(&self, ip: &str, port: i64) -> Result<()> {
        let addr = parse_endpoint(ip, port)?;
        self.connect_addr(addr).await
    }

    /// Connect to an already validated socket address.
    pub async fn connect_addr(&self, addr: SocketAddr) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let stream = TcpStream::connect(addr).await.map_err(|e| {
            tracing::warn!("Failed to connect to {}: {}", addr, e);
            TcpwireError::Io(e)
        })?;
        let conn = Connection::spawn(
            stream,
            SessionId::generate(),
            Arc::clone(&self.bus),
            &self.config,
            self.on_closed.clone(),
        )?;
        tracing::info!("Connected to {} as {}", addr, conn.id());

        self.ensure_ticker();
        let previous = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(conn);
        if let Some(previous) = previous {
            previous.close();
        }
        Ok(())
    }

    fn ensure_ticker(&self) {
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.is_none() {
            *ticker = Some(self.bus.tracker().spawn_ticker(self.config.tick_interval));
        }
    }

    /// Close the connection, if any. Outstanding calls still expire normally.
    pub fn disconnect(&self) {
        let conn = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = conn {
            conn.close();
            tracing::info!("Disconnected {}", conn.id());
        }
    }

    fn connection(&self) -> Option<Arc<Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|conn| conn.is_connected())
            .cloned()
    }

    pub fn is_connected(&self) -> bool {
        self.connection().is_some()
    }

    /// Identifier of the current connection.
    pub fn session_id(&self) -> Option<SessionId> {
        self.connection().map(|conn| conn.id().clone())
    }

    /// Register a handler after the client was built.
    pub fn register<F>(&self, method: &str, handler: F) -> Result<()>
    where
        F: Fn(&SessionId, &Value) -> String + Send + Sync + 'static,
    {
        self.bus.register(method, handler)
    }

    /// Receive binary commands from the server.
    pub fn set_binary_handler<F>(&self, handler: F)
    where
        F: Fn(&SessionId, Bytes) + Send + Sync + 'static,
    {
        self.bus.set_binary_handler(handler);
    }

    /// Call the server and wait for the response.
    ///
    /// `timeout` defaults to the configured call lifetime. The result is
    /// always a response document; failures (not connected, send failure,
    /// timeout) are synthesized with `errCode: -1`.
    pub async fn sync_call<T: Serialize + ?Sized>(
        &self,
        request: &T,
        timeout: Option<Duration>,
    ) -> String {
        let Some(conn) = self.connection() else {
            return correlation::failure_for(request, "not connected");
        };
        let timeout = timeout.unwrap_or(self.config.default_call_timeout);
        correlation::sync_call(
            &conn,
            self.bus.tracker(),
            request,
            timeout,
            self.config.wait_limit(timeout),
        )
        .await
    }

    /// Call the server without waiting. The response is dispatched to the
    /// handler registered for the request's method.
    pub async fn post_call<T: Serialize + ?Sized>(
        &self,
        request: &T,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let conn = self.connection().ok_or(TcpwireError::NotConnected)?;
        let timeout = timeout.unwrap_or(self.config.default_call_timeout);
        correlation::post_call(&conn, &self.bus, request, timeout).await
    }

    /// Send a JSON document without registering a call.
    pub async fn send_json(&self, json: &str) -> Result<()> {
        let conn = self.connection().ok_or(TcpwireError::NotConnected)?;
        conn.send_json(json).await
    }

    /// Send a binary command.
    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        let conn = self.connection().ok_or(TcpwireError::NotConnected)?;
        conn.send_binary(data).await
    }

    /// Wait until the current connection closes. Returns at once if there
    /// is none.
    pub async fn closed(&self) {
        let conn = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(conn) = conn {
            conn.closed().await;
        }
    }

    /// Number of calls awaiting a response.
    pub fn outstanding_calls(&self) -> usize {
        self.bus.tracker().len()
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.disconnect();
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
