//! Echo server - answers `Echo` and `Sum` requests from any client.
//!
//! ```text
//! cargo run --example echo_server -- 127.0.0.1 9000
//! ```
//!
//! Every 5 seconds the server broadcasts a `Tick` notice to all sessions.

use std::time::Duration;

use serde_json::json;
use tcpwire::handler::{bad_response, ok_response, request};
use tcpwire::RpcServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut args = std::env::args().skip(1);
    let ip = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: i64 = args.next().map(|p| p.parse()).transpose()?.unwrap_or(9000);

    let server = RpcServer::builder()
        .handle("Echo", |_session, req| ok_response(req, req["params"].clone()))
        .handle("Sum", |_session, req| {
            match req["params"].as_array() {
                Some(values) => {
                    let total: f64 = values.iter().filter_map(|v| v.as_f64()).sum();
                    ok_response(req, json!(total))
                }
                None => bad_response(req, 2, "params must be an array of numbers"),
            }
        })
        .on_session_closed(|id| tracing::info!("Client {} left", id))
        .build()?;

    let addr = server.start(&ip, port).await?;
    tracing::info!("Echo server listening on {}", addr);

    let mut ticks = tokio::time::interval(Duration::from_secs(5));
    let mut seq = 0i64;
    loop {
        tokio::select! {
            _ = ticks.tick() => {
                seq += 1;
                let notice = request(seq, "Tick", json!({"sessions": server.session_count()}));
                server.reply("", &notice.to_string()).await;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    server.stop();
    Ok(())
}
