//! Transport layer - TCP endpoints and session identity.

mod tcp;

pub use tcp::{parse_endpoint, SessionId};
