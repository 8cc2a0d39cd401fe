//! Correlation module - pairing responses with the calls awaiting them.
//!
//! - [`CallTracker`] - outstanding calls keyed by `"{id}@{method}"`, expired by a ticker
//! - [`sync_call`] / [`post_call`] - issue a call over a connection

mod call;
mod tracker;

pub use call::{failure_for, post_call, request_value, sync_call};
pub use tracker::{CallTracker, Continuation, DEFAULT_CALL_TIMEOUT, DEFAULT_TICK_INTERVAL};
