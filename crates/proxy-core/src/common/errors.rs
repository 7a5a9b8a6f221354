//! Error types for the proxy-core library

use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid network range: {0}")]
    InvalidNetworkRange(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl From<config::ConfigError> for ProxyError {
    fn from(err: config::ConfigError) -> Self {
        ProxyError::ConfigError(err.to_string())
    }
}

impl From<regex::Error> for ProxyError {
    fn from(err: regex::Error) -> Self {
        ProxyError::ConfigError(format!("invalid blocklist pattern: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
