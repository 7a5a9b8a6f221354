//! Shared fixtures for routing tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rvoip_proxy_core::dispatcher::{AffinityTable, DispatcherTable};
use rvoip_proxy_core::message::{via_for, Method, SipMessage, Uri, UriExt, ViaHeaderExt};
use rvoip_proxy_core::network::NetworkClassifier;
use rvoip_proxy_core::policy::{BlocklistPolicy, PolicyFlags};
use rvoip_proxy_core::roles::RoleConfiguration;
use rvoip_proxy_core::transport::{
    DirectResponse, ExternalSend, InternalSend, ProxyTransport, Resolution, TransparentSend,
    TransportError, TransportResult,
};
use rvoip_proxy_core::{RoutingContext, RoutingEngine, SipEndpoint};

pub const REGISTRAR: &str = "udp:127.0.0.1:5001";
pub const AGENT: &str = "udp:127.0.0.1:5002";
pub const NOTIFIER: &str = "udp:127.0.0.1:5003";
pub const APP_SERVER_A: &str = "udp:10.1.1.5:5065";
pub const APP_SERVER_B: &str = "udp:10.1.1.6:5065";
pub const PROXY_INTERNAL: &str = "udp:10.1.1.5:5060";
pub const PROXY_LOOPBACK: &str = "udp:127.0.0.1:5060";
pub const PUBLIC_IP: &str = "124.177.23.142";
pub const EXTERNAL_UA: &str = "udp:203.0.113.9:5060";

pub fn ep(s: &str) -> SipEndpoint {
    s.parse().unwrap()
}

/// URI from test text; `<...>` around name-addr style values is accepted
pub fn uri(s: &str) -> Uri {
    s.trim_start_matches('<').trim_end_matches('>').parse().unwrap()
}

pub fn roles() -> RoleConfiguration {
    RoleConfiguration {
        registrar: ep(REGISTRAR),
        registration_agent: Some(ep(AGENT)),
        notifier: Some(ep(NOTIFIER)),
        app_servers: vec![ep(APP_SERVER_A), ep(APP_SERVER_B)],
        proxy_internal: ep(PROXY_INTERNAL),
        proxy_loopback: Some(ep(PROXY_LOOPBACK)),
        public_ip: Some(PUBLIC_IP.parse().unwrap()),
    }
}

/// One call made against the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Transparent(TransparentSend),
    Internal(InternalSend),
    External(ExternalSend),
    Direct(DirectResponse),
}

/// Transport double that records every call and resolves from a fixed table
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    hosts: Mutex<HashMap<String, Resolution>>,
    fail_sends: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    /// Fix the resolution of a host name; IP literals resolve on their own
    pub fn with_host(self, host: &str, resolution: Resolution) -> Self {
        self.hosts.lock().unwrap().insert(host.to_string(), resolution);
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn single(&self) -> Sent {
        let sent = self.sent();
        assert_eq!(sent.len(), 1, "expected exactly one transport call, got {:?}", sent);
        sent.into_iter().next().unwrap()
    }

    fn record(&self, sent: Sent) -> TransportResult<()> {
        if self.fail_sends {
            return Err(TransportError::SendFailed {
                destination: "test".to_string(),
                reason: "socket closed".to_string(),
            });
        }
        self.sent.lock().unwrap().push(sent);
        Ok(())
    }

    fn lookup(&self, host: &str, endpoint: Option<SipEndpoint>) -> Resolution {
        if let Some(resolution) = self.hosts.lock().unwrap().get(host) {
            return resolution.clone();
        }
        match endpoint {
            Some(endpoint) => Resolution::Resolved(endpoint),
            None => Resolution::Unresolvable,
        }
    }
}

#[async_trait]
impl ProxyTransport for RecordingTransport {
    async fn resolve(&self, message: &SipMessage) -> Resolution {
        match message.request_uri() {
            Some(uri) => self.lookup(&uri.host.to_string(), uri.to_endpoint()),
            None => match message.top_via() {
                Some(via) => self.lookup(&via.sent_by_host.to_string(), via.endpoint()),
                None => Resolution::Unresolvable,
            },
        }
    }

    async fn send_transparent(&self, send: TransparentSend) -> TransportResult<()> {
        self.record(Sent::Transparent(send))
    }

    async fn send_internal(&self, send: InternalSend) -> TransportResult<()> {
        self.record(Sent::Internal(send))
    }

    async fn send_external(&self, send: ExternalSend) -> TransportResult<()> {
        self.record(Sent::External(send))
    }

    async fn respond_direct(&self, response: DirectResponse) -> TransportResult<()> {
        self.record(Sent::Direct(response))
    }
}

/// Engine, transport and affinity table wired together
pub struct Harness {
    pub engine: RoutingEngine,
    pub transport: Arc<RecordingTransport>,
    pub table: Arc<AffinityTable>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(roles(), PolicyFlags::default(), None, RecordingTransport::new())
    }

    pub fn with_flags(flags: PolicyFlags) -> Self {
        Self::with(roles(), flags, None, RecordingTransport::new())
    }

    pub fn with_transport(transport: RecordingTransport) -> Self {
        Self::with(roles(), PolicyFlags::default(), None, transport)
    }

    pub fn with(
        roles: RoleConfiguration,
        flags: PolicyFlags,
        blocklist: Option<&str>,
        transport: RecordingTransport,
    ) -> Self {
        let transport = Arc::new(transport);
        let table = Arc::new(AffinityTable::default());
        let engine = RoutingEngine::new(
            Arc::new(roles),
            NetworkClassifier::default(),
            flags,
            Arc::new(BlocklistPolicy::from_optional(blocklist).unwrap()),
            Arc::clone(&table) as Arc<dyn DispatcherTable>,
            Arc::clone(&transport) as Arc<dyn ProxyTransport>,
        );
        Self { engine, transport, table }
    }
}

pub fn ctx_from(remote: &str) -> RoutingContext {
    RoutingContext::new(ep(remote), ep(PROXY_INTERNAL)).with_branch("z9hG4bK-proxy")
}

/// INVITE from the external user agent, as it arrives at the proxy
pub fn external_invite() -> SipMessage {
    SipMessage::request(Method::Invite, uri("sip:service@10.1.1.5:5060"))
        .with_call_id("call-ext-1")
        .with_via(via_for(&ep(EXTERNAL_UA), "z9hG4bK-ua"))
        .with_contact(uri("sip:alice@192.168.1.20:5060"))
}

/// INVITE an application server sends towards an external user agent
pub fn app_server_invite(target: &str) -> SipMessage {
    SipMessage::request(Method::Invite, uri(target))
        .with_call_id("call-as-1")
        .with_via(via_for(&ep(APP_SERVER_A), "z9hG4bK-as"))
        .with_contact(uri("sip:service@10.1.1.5:5065"))
}
