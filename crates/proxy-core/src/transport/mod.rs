//! Capability set the routing core needs from the SIP transport layer.
//!
//! The transport owns parsing, sockets, DNS and retransmission. The engine
//! only ever calls the operations of [`ProxyTransport`], each taking one
//! explicit instruction struct.

use async_trait::async_trait;
use std::net::IpAddr;
use thiserror::Error;

use crate::common::SipEndpoint;
use crate::message::{SipMessage, StatusCode};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Send to {destination} failed: {reason}")]
    SendFailed { destination: String, reason: String },

    #[error("Transport closed")]
    Closed,
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Outcome of resolving where a message should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(SipEndpoint),
    /// A lookup is in flight; the caller should defer, not fail
    Pending,
    Unresolvable,
}

/// Forward with headers exactly as the engine left them.
///
/// The transport adds a single Via of its own carrying `branch` (or a branch
/// of its choosing when `None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransparentSend {
    pub destination: SipEndpoint,
    pub message: SipMessage,
    pub branch: Option<String>,
    /// Proxy socket to send from; the transport's default for the protocol when `None`
    pub source: Option<SipEndpoint>,
    /// Address to advertise instead of the socket's own, for public destinations
    pub public_ip: Option<IpAddr>,
}

/// Forward to a backend over the proxy's internal socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalSend {
    /// Peer the message was received from
    pub remote: SipEndpoint,
    /// Proxy socket the message was received on
    pub local: SipEndpoint,
    pub destination: SipEndpoint,
    pub message: SipMessage,
    /// Branch for the proxy's Via; responses carry none
    pub branch: Option<String>,
    /// Proxy socket the backend sees the message arriving from
    pub via_channel: SipEndpoint,
}

/// Send towards an external user agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalSend {
    pub message: SipMessage,
    pub destination: SipEndpoint,
    pub source: Option<SipEndpoint>,
    pub branch: Option<String>,
    pub public_ip: Option<IpAddr>,
}

/// Answer a request directly from the proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectResponse {
    pub request: SipMessage,
    pub status: StatusCode,
    pub reason: Option<String>,
}

impl DirectResponse {
    pub fn new(request: SipMessage, status: StatusCode, reason: Option<String>) -> Self {
        Self { request, status, reason }
    }

    /// Reason phrase to put on the wire
    pub fn reason_phrase(&self) -> &str {
        self.reason.as_deref().unwrap_or(self.status.reason_phrase())
    }
}

#[async_trait]
pub trait ProxyTransport: Send + Sync {
    /// Resolve the next-hop socket: the request URI of a request, the top Via of a response
    async fn resolve(&self, message: &SipMessage) -> Resolution;

    async fn send_transparent(&self, send: TransparentSend) -> TransportResult<()>;

    async fn send_internal(&self, send: InternalSend) -> TransportResult<()>;

    async fn send_external(&self, send: ExternalSend) -> TransportResult<()>;

    async fn respond_direct(&self, response: DirectResponse) -> TransportResult<()>;
}
