//! Shared types and errors

pub mod errors;
pub mod types;

pub use errors::{ProxyError, Result};
pub use types::{Role, SipEndpoint, SipProtocol};
