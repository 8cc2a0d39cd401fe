//! Issuing calls over a connection.
//!
//! Both call styles register a tracker entry under the request's
//! `"{id}@{method}"` key before the frame is queued, so a fast response can
//! never arrive ahead of its entry.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::connection::Connection;
use crate::error::{Result, TcpwireError};
use crate::handler::{bad_response, CallId, CommandBus, FAILURE_CODE, WAIT_TIMED_OUT};

use super::CallTracker;

/// Serialize a request and check that it is a JSON object.
pub fn request_value<T: Serialize + ?Sized>(request: &T) -> Result<Value> {
    let value = serde_json::to_value(request)?;
    if !value.is_object() {
        return Err(TcpwireError::Protocol(
            "request must serialize to a JSON object".to_string(),
        ));
    }
    Ok(value)
}

/// Synthesized failure response for a request that could not be issued.
pub fn failure_for<T: Serialize + ?Sized>(request: &T, message: &str) -> String {
    let value = serde_json::to_value(request).unwrap_or(Value::Null);
    bad_response(&value, FAILURE_CODE, message)
}

/// Send `request` and wait for its response.
///
/// Always yields a response document: the peer's reply, the synthesized
/// timeout response once `timeout` elapses, or a failure response if the
/// call could not be issued. `wait_limit` bounds the wait itself and should
/// exceed `timeout` so the tracker's expiry normally answers first.
pub async fn sync_call<T: Serialize + ?Sized>(
    conn: &Connection,
    tracker: &CallTracker,
    request: &T,
    timeout: Duration,
    wait_limit: Duration,
) -> String {
    let value = match request_value(request) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("Cannot issue call: {}", e);
            return failure_for(request, "serialize request failed");
        }
    };
    let text = value.to_string();
    let key = CallId::from_value(&value).key();

    let rx = match tracker.add_blocking(key.clone(), value.clone(), timeout) {
        Ok(rx) => rx,
        Err(e) => {
            tracing::warn!("Cannot issue call {}: {}", key, e);
            return bad_response(&value, FAILURE_CODE, &e.to_string());
        }
    };

    if let Err(e) = conn.send_json(&text).await {
        tracker.remove(&key);
        tracing::warn!("Failed to send call {} to {}: {}", key, conn.id(), e);
        return bad_response(&value, FAILURE_CODE, "send to peer failed");
    }

    match tokio::time::timeout(wait_limit, rx).await {
        Ok(Ok(response)) => response,
        Ok(Err(_)) => bad_response(&value, FAILURE_CODE, "call abandoned"),
        Err(_) => {
            tracker.remove(&key);
            tracing::warn!("Call {} exceeded wait limit {:?}", key, wait_limit);
            bad_response(&value, FAILURE_CODE, WAIT_TIMED_OUT)
        }
    }
}

/// Send `request` without waiting for its response.
///
/// The response, when it arrives, is dispatched like any inbound command.
/// If none arrives within `timeout`, the synthesized failure response is
/// dispatched through `bus` on `conn` instead, so handlers see both outcomes
/// on one path.
///
/// # Errors
///
/// Serialization failure, a duplicate outstanding key, or a failed send.
pub async fn post_call<T: Serialize + ?Sized>(
    conn: &Arc<Connection>,
    bus: &Arc<CommandBus>,
    request: &T,
    timeout: Duration,
) -> Result<()> {
    let value = request_value(request)?;
    let text = value.to_string();
    let key = CallId::from_value(&value).key();

    let runtime = tokio::runtime::Handle::current();
    let on_timeout = {
        let conn = Arc::clone(conn);
        let bus = Arc::clone(bus);
        move |response: String| {
            runtime.spawn(async move {
                bus.dispatch(&conn, &response).await;
            });
        }
    };
    bus.tracker().add_callback(key.clone(), value, timeout, on_timeout)?;

    if let Err(e) = conn.send_json(&text).await {
        bus.tracker().remove(&key);
        tracing::warn!("Failed to post call {} to {}: {}", key, conn.id(), e);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_value_requires_object() {
        assert!(request_value(&json!({"id": 1, "method": "Ping"})).is_ok());
        assert!(matches!(
            request_value(&json!([1, 2])),
            Err(TcpwireError::Protocol(_))
        ));
        assert!(request_value("text").is_err());
    }

    #[test]
    fn test_failure_for_keeps_identity() {
        let response = failure_for(&json!({"id": 5, "method": "Load"}), "not connected");
        let value: Value = serde_json::from_str(&response).unwrap();

        assert_eq!(value["id"], 5);
        assert_eq!(value["method"], "Load");
        assert_eq!(value["result"], false);
        assert_eq!(value["error"]["errMsg"], "not connected");
    }
}
