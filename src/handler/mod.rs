//! Handler module - command bus and envelope helpers.
//!
//! Provides:
//! - [`CommandBus`] - maps method names to handlers and dispatches inbound JSON
//! - envelope helpers - build and inspect `{id, method, result, ...}` documents
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tcpwire::handler::{bad_response, ok_response, CommandBus};
//!
//! let bus = CommandBus::default();
//!
//! bus.register("Sum", |_session, request| {
//!     match request["params"].as_array() {
//!         Some(items) => {
//!             let total: i64 = items.iter().filter_map(|v| v.as_i64()).sum();
//!             ok_response(request, json!(total))
//!         }
//!         None => bad_response(request, 400, "params must be an array"),
//!     }
//! })
//! .unwrap();
//! ```

mod envelope;
mod registry;

pub use envelope::{
    bad_response, check_response, correlation_key, error_code, ok_response, request, CallId,
    DEFAULT_FAILURE_MESSAGE, FAILURE_CODE, WAIT_TIMED_OUT,
};
pub use registry::{BinaryHandler, CommandBus, Handler};
