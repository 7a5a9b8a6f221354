//! Common types used throughout the proxy-core library

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use super::errors::ProxyError;

/// Transport protocol of a SIP socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SipProtocol {
    Udp,
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl SipProtocol {
    /// Lower-case token used in endpoint strings and `transport=` URI parameters
    pub fn as_str(&self) -> &'static str {
        match self {
            SipProtocol::Udp => "udp",
            SipProtocol::Tcp => "tcp",
            SipProtocol::Tls => "tls",
            SipProtocol::Ws => "ws",
            SipProtocol::Wss => "wss",
        }
    }

    /// Port assumed when a URI or Via omits one
    pub fn default_port(&self) -> u16 {
        match self {
            SipProtocol::Udp | SipProtocol::Tcp => 5060,
            SipProtocol::Tls => 5061,
            SipProtocol::Ws => 80,
            SipProtocol::Wss => 443,
        }
    }
}

impl fmt::Display for SipProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SipProtocol {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(SipProtocol::Udp),
            "tcp" => Ok(SipProtocol::Tcp),
            "tls" => Ok(SipProtocol::Tls),
            "ws" => Ok(SipProtocol::Ws),
            "wss" => Ok(SipProtocol::Wss),
            other => Err(ProxyError::InvalidEndpoint(format!("unknown protocol '{}'", other))),
        }
    }
}

/// A SIP socket identity: protocol, IP address and port.
///
/// The canonical string form is `proto:addr:port`, e.g. `udp:127.0.0.1:5060`
/// or `tcp:[2001:db8::1]:5060`. Equality is an exact tuple match; subnet
/// membership is the network classifier's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SipEndpoint {
    pub protocol: SipProtocol,
    pub address: IpAddr,
    pub port: u16,
}

impl SipEndpoint {
    pub fn new(protocol: SipProtocol, address: IpAddr, port: u16) -> Self {
        Self { protocol, address, port }
    }

    pub fn udp(address: IpAddr, port: u16) -> Self {
        Self::new(SipProtocol::Udp, address, port)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Same socket seen under a different address (used for public IP aliases)
    pub fn with_address(&self, address: IpAddr) -> Self {
        Self { address, ..*self }
    }
}

impl fmt::Display for SipEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.protocol, self.socket_addr())
    }
}

impl FromStr for SipEndpoint {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (protocol, rest) = match s.split_once(':') {
            Some((prefix, rest)) if prefix.chars().all(|c| c.is_ascii_alphabetic()) && !prefix.is_empty() => {
                (prefix.parse::<SipProtocol>()?, rest)
            }
            _ => (SipProtocol::Udp, s),
        };

        if let Ok(addr) = rest.parse::<SocketAddr>() {
            return Ok(SipEndpoint::new(protocol, addr.ip(), addr.port()));
        }

        let bare = rest.trim_start_matches('[').trim_end_matches(']');
        bare.parse::<IpAddr>()
            .map(|address| SipEndpoint::new(protocol, address, protocol.default_port()))
            .map_err(|_| ProxyError::InvalidEndpoint(s.to_string()))
    }
}

impl TryFrom<String> for SipEndpoint {
    type Error = ProxyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SipEndpoint> for String {
    fn from(endpoint: SipEndpoint) -> Self {
        endpoint.to_string()
    }
}

/// Logical role of the peer a message was received from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The SIP registrar behind the proxy
    Registrar,
    /// Registers with external registrars on behalf of end systems
    RegistrationAgent,
    /// Notification (SUBSCRIBE/NOTIFY) server
    Notifier,
    /// One of the application-server instances
    ApplicationServer,
    /// Anything not configured as a backend
    ExternalUserAgent,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Registrar => "registrar",
            Role::RegistrationAgent => "registration-agent",
            Role::Notifier => "notifier",
            Role::ApplicationServer => "app-server",
            Role::ExternalUserAgent => "external-ua",
        };
        f.write_str(name)
    }
}
