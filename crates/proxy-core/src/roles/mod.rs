//! Backend role configuration and origin classification

use serde::Deserialize;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::common::{Role, SipEndpoint};
use crate::message::SipMessage;
use crate::transport::{ProxyTransport, Resolution};

/// Socket identities of the backends and of the proxy itself.
///
/// Loaded once at start-up and never mutated while routing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoleConfiguration {
    pub registrar: SipEndpoint,
    #[serde(default)]
    pub registration_agent: Option<SipEndpoint>,
    #[serde(default)]
    pub notifier: Option<SipEndpoint>,
    /// Application-server instances; the first is the default target
    #[serde(default)]
    pub app_servers: Vec<SipEndpoint>,
    /// Proxy socket facing the application servers and the outside
    pub proxy_internal: SipEndpoint,
    /// Proxy socket used to reach backends on the loopback interface
    #[serde(default)]
    pub proxy_loopback: Option<SipEndpoint>,
    /// Address external peers reach the proxy on when it sits behind NAT
    #[serde(default)]
    pub public_ip: Option<IpAddr>,
}

/// Maps observed endpoints to roles and picks backend sockets
#[derive(Debug)]
pub struct RoleResolver {
    roles: Arc<RoleConfiguration>,
    next_app_server: AtomicUsize,
}

impl RoleResolver {
    pub fn new(roles: Arc<RoleConfiguration>) -> Self {
        Self {
            roles,
            next_app_server: AtomicUsize::new(0),
        }
    }

    pub fn roles(&self) -> &RoleConfiguration {
        &self.roles
    }

    /// Role of the peer at `remote`; exact endpoint match, anything unknown is external
    pub fn classify_origin(&self, remote: &SipEndpoint) -> Role {
        if *remote == self.roles.registrar {
            Role::Registrar
        } else if self.roles.registration_agent.as_ref() == Some(remote) {
            Role::RegistrationAgent
        } else if self.roles.notifier.as_ref() == Some(remote) {
            Role::Notifier
        } else if self.is_app_server(remote) {
            Role::ApplicationServer
        } else {
            Role::ExternalUserAgent
        }
    }

    pub fn is_app_server(&self, endpoint: &SipEndpoint) -> bool {
        self.roles.app_servers.contains(endpoint)
    }

    pub fn default_app_server(&self) -> Option<SipEndpoint> {
        self.roles.app_servers.first().copied()
    }

    /// Next application server in rotation, for requests with no affinity yet
    pub fn select_app_server(&self) -> Option<SipEndpoint> {
        let servers = &self.roles.app_servers;
        if servers.is_empty() {
            return None;
        }
        let index = self.next_app_server.fetch_add(1, Ordering::Relaxed) % servers.len();
        Some(servers[index])
    }

    /// Whether a Via naming `endpoint` was added by this proxy.
    ///
    /// Besides the configured sockets and the socket the message arrived on,
    /// their aliases under the configured public IP and under `public_ip`
    /// (the address advertised for this message) count as ours.
    pub fn is_proxy_socket(&self, endpoint: &SipEndpoint, local: &SipEndpoint, public_ip: Option<IpAddr>) -> bool {
        let mut sockets = vec![self.roles.proxy_internal, *local];
        sockets.extend(self.roles.proxy_loopback);

        let aliases: Vec<SipEndpoint> = self
            .roles
            .public_ip
            .into_iter()
            .chain(public_ip)
            .flat_map(|ip| sockets.iter().map(move |socket| socket.with_address(ip)))
            .collect();
        sockets.extend(aliases);

        sockets.contains(endpoint)
    }

    /// Proxy socket to send from when talking to backend `destination`
    pub fn channel_for(&self, destination: &SipEndpoint) -> SipEndpoint {
        match self.roles.proxy_loopback {
            Some(loopback) if destination.address.is_loopback() => loopback,
            _ => self.roles.proxy_internal,
        }
    }

    /// Resolve where an outbound message goes, through the transport's resolver
    pub async fn resolve_destination(&self, msg: &SipMessage, transport: &dyn ProxyTransport) -> Resolution {
        let resolution = transport.resolve(msg).await;
        debug!("Resolved destination for {}: {:?}", msg.summary(), resolution);
        resolution
    }
}
