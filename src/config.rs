//! Runtime configuration shared by clients and servers.

use std::time::Duration;

use crate::correlation::{DEFAULT_CALL_TIMEOUT, DEFAULT_TICK_INTERVAL};
use crate::protocol::DEFAULT_MAX_BODY_SIZE;
use crate::writer::WriterConfig;

/// Default maximum concurrent pooled handlers.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Default socket read buffer size (64 KB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default floor for how long a blocking call may wait.
pub const DEFAULT_WAIT_CEILING: Duration = Duration::from_secs(30);

/// Where request handlers run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// In the connection's read loop, before the next frame is dispatched.
    Inline,
    /// On the blocking worker pool, bounded by `max_concurrent_handlers`.
    #[default]
    Pooled,
}

/// Configuration for an [`RpcClient`](crate::RpcClient) or
/// [`RpcServer`](crate::RpcServer).
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub dispatch_mode: DispatchMode,
    /// Pooled handlers allowed in flight; further requests are dropped.
    pub max_concurrent_handlers: usize,
    pub read_buffer_size: usize,
    /// Largest frame body accepted from the peer.
    pub max_body_size: u32,
    /// Call lifetime used when a call does not specify one.
    pub default_call_timeout: Duration,
    /// Minimum bound on a blocking call's wait.
    pub wait_ceiling: Duration,
    /// Interval between expiry scans of outstanding calls.
    pub tick_interval: Duration,
    pub writer: WriterConfig,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            dispatch_mode: DispatchMode::default(),
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            default_call_timeout: DEFAULT_CALL_TIMEOUT,
            wait_ceiling: DEFAULT_WAIT_CEILING,
            tick_interval: DEFAULT_TICK_INTERVAL,
            writer: WriterConfig::default(),
        }
    }
}

impl RpcConfig {
    /// How long a blocking call with the given lifetime may wait.
    ///
    /// Always leaves at least two expiry scans after the call's own deadline
    /// so the synthesized timeout response arrives before the wait gives up.
    pub fn wait_limit(&self, timeout: Duration) -> Duration {
        self.wait_ceiling
            .max(timeout.saturating_add(self.tick_interval.saturating_mul(2)))
    }
}
