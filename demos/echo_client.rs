//! Echo client - calls the echo server and listens for its `Tick` notices.
//!
//! ```text
//! cargo run --example echo_client -- 127.0.0.1 9000
//! ```

use std::time::Duration;

use serde_json::json;
use tcpwire::handler::{check_response, request};
use tcpwire::RpcClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut args = std::env::args().skip(1);
    let ip = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: i64 = args.next().map(|p| p.parse()).transpose()?.unwrap_or(9000);

    let client = RpcClient::builder()
        .handle("Tick", |_session, notice| {
            tracing::info!("Tick from server: {}", notice["params"]);
            String::new()
        })
        // Responses to posted calls arrive here
        .handle("Sum", |_session, resp| {
            match check_response(&resp.to_string()) {
                Ok(value) => tracing::info!("Sum = {}", value["info"]),
                Err(msg) => tracing::warn!("Sum failed: {}", msg),
            }
            String::new()
        })
        .on_session_closed(|id| tracing::info!("Connection {} closed", id))
        .default_call_timeout(Duration::from_secs(3))
        .build()?;

    client.connect(&ip, port).await?;

    let response = client
        .sync_call(&request(1, "Echo", json!({"text": "hello"})), None)
        .await;
    match check_response(&response) {
        Ok(value) => tracing::info!("Echo replied {}", value["info"]),
        Err(msg) => tracing::warn!("Echo failed: {}", msg),
    }

    client
        .post_call(&request(2, "Sum", json!([1, 2, 3.5])), None)
        .await?;

    let response = client
        .sync_call(&request(3, "Missing", json!({})), Some(Duration::from_millis(500)))
        .await;
    tracing::info!("Call to unknown method: {}", response);

    tokio::select! {
        _ = client.closed() => tracing::info!("Server went away"),
        _ = tokio::signal::ctrl_c() => client.disconnect(),
    }
    Ok(())
}
