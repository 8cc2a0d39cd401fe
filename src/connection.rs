//! A live TCP connection: read loop, writer task and close notification.
//!
//! ```text
//!             ┌────────────── Connection ───────────────┐
//! socket ───► │ read loop ─► FrameParser ─► CommandBus  │
//!             │                                  │      │
//! socket ◄─── │ writer task ◄── send_json ◄──────┘      │
//!             └─────────────────────────────────────────┘
//! ```
//!
//! Clients own one connection; servers own one per session. The read loop
//! runs as its own task and stops on end-of-stream, I/O error or
//! [`Connection::close`]. Closing fires the connection's close hook exactly
//! once.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::RpcConfig;
use crate::error::{Result, TcpwireError};
use crate::handler::CommandBus;
use crate::protocol::{Command, FrameParser};
use crate::transport::SessionId;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

/// Notification run once when a connection closes.
pub type CloseHook = Arc<dyn Fn(&SessionId) + Send + Sync>;

/// One framed TCP connection.
pub struct Connection {
    id: SessionId,
    peer: SocketAddr,
    writer: WriterHandle,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    on_close: Option<CloseHook>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Connection {
    /// Take ownership of `stream` and start its read loop and writer task.
    ///
    /// Inbound JSON commands are dispatched through `bus`, binary commands to
    /// the bus's binary handler.
    pub fn spawn(
        stream: TcpStream,
        id: SessionId,
        bus: Arc<CommandBus>,
        config: &RpcConfig,
        on_close: Option<CloseHook>,
    ) -> Result<Arc<Self>> {
        let peer = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let (reader, write_half) = stream.into_split();
        let (writer, writer_task) = spawn_writer_task(write_half, config.writer.clone());
        let (closed_tx, _) = watch::channel(false);

        let conn = Arc::new(Self {
            id,
            peer,
            writer,
            closed: AtomicBool::new(false),
            closed_tx,
            on_close,
            reader_task: Mutex::new(None),
            writer_task: Mutex::new(Some(writer_task)),
        });

        let task = tokio::spawn(Self::run(
            Arc::clone(&conn),
            reader,
            bus,
            config.read_buffer_size,
            config.max_body_size,
        ));
        *conn
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);

        Ok(conn)
    }

    async fn run(
        self: Arc<Self>,
        reader: OwnedReadHalf,
        bus: Arc<CommandBus>,
        read_buffer_size: usize,
        max_body_size: u32,
    ) {
        match self
            .read_loop(reader, &bus, read_buffer_size, max_body_size)
            .await
        {
            Ok(()) => tracing::debug!("Peer {} closed connection {}", self.peer, self.id),
            Err(e) => tracing::warn!("Read loop error on {}: {}", self.id, e),
        }
        self.shutdown();
    }

    /// Read, parse and dispatch until end-of-stream.
    async fn read_loop(
        self: &Arc<Self>,
        mut reader: OwnedReadHalf,
        bus: &CommandBus,
        read_buffer_size: usize,
        max_body_size: u32,
    ) -> Result<()> {
        let mut parser = FrameParser::with_max_body(max_body_size);
        let mut buf = vec![0u8; read_buffer_size.max(1)];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) => return Err(TcpwireError::Io(e)),
            };

            parser.push(&buf[..n]);
            for command in parser.drain() {
                match command {
                    Command::Json(json) => {
                        tracing::trace!("Dispatching {} bytes of JSON from {}", json.len(), self.id);
                        bus.dispatch(self, &json).await;
                    }
                    Command::Binary(data) => bus.dispatch_binary(self, data),
                }
            }
        }
    }

    /// Mark closed, stop both tasks and fire the close hook once.
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed_tx.send_replace(true);

        if let Some(task) = self
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        if let Some(task) = self
            .writer_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        if let Some(hook) = &self.on_close {
            hook(&self.id);
        }
    }

    #[inline]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Frame and queue a JSON command.
    ///
    /// # Errors
    ///
    /// `Protocol` for a blank payload, `ConnectionClosed` once closed, or a
    /// writer backpressure error.
    pub async fn send_json(&self, json: &str) -> Result<()> {
        if json.trim().is_empty() {
            return Err(TcpwireError::Protocol("empty JSON payload".to_string()));
        }
        self.send(&Command::json(json)).await
    }

    /// Frame and queue a binary command.
    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(&Command::binary(data)).await
    }

    async fn send(&self, command: &Command) -> Result<()> {
        if !self.is_connected() {
            return Err(TcpwireError::ConnectionClosed);
        }
        self.writer.send(OutboundFrame::from_command(command)?).await
    }

    /// Frames queued on this connection but not yet written.
    pub fn pending_frames(&self) -> usize {
        self.writer.pending_count()
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        if self.is_connected() {
            tracing::debug!("Closing connection {} to {}", self.id, self.peer);
        }
        self.shutdown();
    }

    /// Wait until the connection is closed, by either side.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        // The sender lives in self, so this only returns once the flag flips
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}
