//! Server-side sessions and the registry that addresses them.
//!
//! A [`Session`] pairs one accepted connection with the server's shared
//! command bus, so the server can answer, notify and also call a client.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use crate::connection::Connection;
use crate::correlation;
use crate::error::Result;
use crate::handler::CommandBus;
use crate::transport::SessionId;

/// One connected client as seen by the server.
#[derive(Clone)]
pub struct Session {
    connection: Arc<Connection>,
    bus: Arc<CommandBus>,
}

impl Session {
    pub(crate) fn new(connection: Arc<Connection>, bus: Arc<CommandBus>) -> Self {
        Self { connection, bus }
    }

    #[inline]
    pub fn id(&self) -> &SessionId {
        self.connection.id()
    }

    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.connection.peer_addr()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Send a JSON document to this client.
    pub async fn notify(&self, json: &str) -> Result<()> {
        self.connection.send_json(json).await
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.connection.send_binary(data).await
    }

    /// Call this client and wait for its response.
    pub async fn sync_call<T: Serialize + ?Sized>(
        &self,
        request: &T,
        timeout: Duration,
        wait_limit: Duration,
    ) -> String {
        correlation::sync_call(
            &self.connection,
            self.bus.tracker(),
            request,
            timeout,
            wait_limit,
        )
        .await
    }

    /// Call this client without waiting for the response.
    pub async fn post_call<T: Serialize + ?Sized>(
        &self,
        request: &T,
        timeout: Duration,
    ) -> Result<()> {
        correlation::post_call(&self.connection, &self.bus, request, timeout).await
    }

    /// Close the connection; the server drops the session from its registry.
    pub fn close(&self) {
        self.connection.close();
    }

    /// Wait until this session's connection closes.
    pub async fn closed(&self) {
        self.connection.closed().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", self.id())
            .field("peer", &self.peer_addr())
            .finish()
    }
}

/// Live sessions keyed by id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, session: Session) {
        self.sessions().insert(session.id().clone(), session);
    }

    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        self.sessions().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions().get(&SessionId::from(id)).cloned()
    }

    /// Copy of every live session, for work done outside the lock.
    pub fn snapshot(&self) -> Vec<Session> {
        self.sessions().values().cloned().collect()
    }

    /// Remove and return every session.
    pub fn drain(&self) -> Vec<Session> {
        self.sessions().drain().map(|(_, s)| s).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }
}
