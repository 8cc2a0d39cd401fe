//! Request/response envelope helpers.
//!
//! Requests and responses share a conventional JSON shape:
//!
//! ```text
//! request : {"id": 7, "method": "Echo", "token": {...}, "params": {...}}
//! success : {"id": 7, "method": "Echo", "result": true,  "info": ...}
//! failure : {"id": 7, "method": "Echo", "result": false,
//!            "error": {"errCode": -1, "errMsg": "wait timed out"}}
//! ```
//!
//! `id` and `method` together form the correlation key `"{id}@{method}"`
//! that pairs a response with the call that is waiting for it.

use serde_json::{json, Value};

/// Error code used for synthesized failures (timeouts, send failures).
pub const FAILURE_CODE: i64 = -1;

/// Message of the synthesized response delivered when a call expires.
pub const WAIT_TIMED_OUT: &str = "wait timed out";

/// Message used by [`bad_response`] when the caller supplies none.
pub const DEFAULT_FAILURE_MESSAGE: &str = "request failed";

/// Identity of a call: the `id` and `method` fields of its envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId {
    pub id: i64,
    pub method: String,
}

impl CallId {
    pub fn new(id: i64, method: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
        }
    }

    /// Read `id` and `method` from an envelope.
    ///
    /// Missing or mistyped fields read as `0` and `""`, so every parsed
    /// document maps to some key.
    pub fn from_value(value: &Value) -> Self {
        let id = value.get("id").and_then(Value::as_i64).unwrap_or(0);
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Self::new(id, method)
    }

    /// Correlation key for this call.
    pub fn key(&self) -> String {
        correlation_key(self.id, &self.method)
    }
}

/// Build the correlation key `"{id}@{method}"`.
///
/// # Example
///
/// ```
/// use tcpwire::handler::correlation_key;
///
/// assert_eq!(correlation_key(7, "Echo"), "7@Echo");
/// ```
pub fn correlation_key(id: i64, method: &str) -> String {
    format!("{}@{}", id, method)
}

/// Build a request envelope with an empty token.
pub fn request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "id": id,
        "method": method,
        "token": {},
        "params": params,
    })
}

/// Build a success response for `request`.
pub fn ok_response(request: &Value, info: Value) -> String {
    let call = CallId::from_value(request);
    json!({
        "id": call.id,
        "method": call.method,
        "result": true,
        "info": info,
    })
    .to_string()
}

/// Build a failure response for `request`.
///
/// A code of `0` is not a failure code and is replaced by `-1`; a blank
/// message is replaced by [`DEFAULT_FAILURE_MESSAGE`].
pub fn bad_response(request: &Value, code: i64, message: &str) -> String {
    let call = CallId::from_value(request);
    let code = if code == 0 { FAILURE_CODE } else { code };
    let message = if message.trim().is_empty() {
        DEFAULT_FAILURE_MESSAGE
    } else {
        message
    };
    json!({
        "id": call.id,
        "method": call.method,
        "result": false,
        "error": {
            "errCode": code,
            "errMsg": message,
        },
    })
    .to_string()
}

/// Check whether a response reports success.
///
/// Returns the parsed document on success, or the error message carried by
/// a failure response.
pub fn check_response(response: &str) -> std::result::Result<Value, String> {
    let value: Value = serde_json::from_str(response)
        .map_err(|e| format!("response is not valid JSON: {}", e))?;

    if value.get("result").and_then(Value::as_bool) == Some(true) {
        return Ok(value);
    }

    let message = value
        .pointer("/error/errMsg")
        .and_then(Value::as_str)
        .unwrap_or("undefined error");
    Err(message.to_string())
}

/// Error code carried by a failure response, if any.
pub fn error_code(response: &Value) -> Option<i64> {
    response.pointer("/error/errCode").and_then(Value::as_i64)
}
