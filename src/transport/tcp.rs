//! TCP endpoint validation and session identity.
//!
//! # Example
//!
//! ```
//! use tcpwire::transport::parse_endpoint;
//!
//! let addr = parse_endpoint("127.0.0.1", 9000).unwrap();
//! assert_eq!(addr.port(), 9000);
//!
//! assert!(parse_endpoint("localhost", 9000).is_err());
//! assert!(parse_endpoint("127.0.0.1", 0).is_err());
//! ```

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use uuid::Uuid;

use crate::error::{Result, TcpwireError};

/// Validate an IP literal and port and combine them into a socket address.
///
/// Host names are not resolved. Ports must lie in `1..65535`.
///
/// # Errors
///
/// `InvalidPort` or `InvalidAddress` describing the rejected input.
pub fn parse_endpoint(ip: &str, port: i64) -> Result<SocketAddr> {
    if port <= 0 || port >= i64::from(u16::MAX) {
        tracing::warn!("Rejected endpoint with invalid port {}", port);
        return Err(TcpwireError::InvalidPort(port));
    }
    let addr: IpAddr = ip.trim().parse().map_err(|_| {
        tracing::warn!("Rejected endpoint with invalid IP {:?}", ip);
        TcpwireError::InvalidAddress(ip.to_string())
    })?;

    // Range checked above
    let port = port as u16;
    Ok(SocketAddr::new(addr, port))
}

/// Opaque identifier of one connection, assigned when it is established.
///
/// Used only to address replies; it carries no ordering or peer identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
