//! # tcpwire
//!
//! Lightweight bidirectional JSON/binary RPC over raw TCP.
//!
//! Messages travel in a self-describing frame (magic head, length, body,
//! CRC-32, magic tail). Each body carries a tagged command: a UTF-16 JSON
//! document or an opaque byte array. Calls are correlated by
//! `"{id}@{method}"` and expire with a synthesized failure response.
//!
//! ## Architecture
//!
//! - **Protocol**: frame codec and resynchronizing stream parser
//! - **Handler**: method-keyed [`CommandBus`](handler::CommandBus), inline or pooled dispatch
//! - **Correlation**: outstanding calls with timer driven expiry
//! - **Connection**: per-socket read loop plus dedicated writer task
//! - **Client / Server**: connection lifecycle and session fan-out
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::json;
//! use tcpwire::handler::{check_response, ok_response, request};
//! use tcpwire::{RpcClient, RpcServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RpcServer::builder()
//!         .handle("Echo", |_session, req| ok_response(req, req["params"].clone()))
//!         .build()?;
//!     server.start("127.0.0.1", 9000).await?;
//!
//!     let client = RpcClient::builder().build()?;
//!     client.connect("127.0.0.1", 9000).await?;
//!
//!     let response = client
//!         .sync_call(&request(1, "Echo", json!("hello")), None)
//!         .await;
//!     assert!(check_response(&response).is_ok());
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod writer;

mod client;

pub use client::{ClientBuilder, RpcClient};
pub use config::{DispatchMode, RpcConfig};
pub use error::{Result, TcpwireError};
pub use server::{RpcServer, ServerBuilder, Session};
pub use transport::SessionId;
