//! Socket-level helpers over sip-core's `ViaHeader` and `Uri`

use rvoip_sip_core::types::param::{GenericValue, Param};
use rvoip_sip_core::types::uri::{Host, Scheme, Uri};
use rvoip_sip_core::types::via::{SentProtocol, ViaHeader};
use std::net::IpAddr;

use crate::common::{SipEndpoint, SipProtocol};

/// RFC 3261 magic cookie every branch must start with
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// Fresh RFC 3261 branch token
pub fn generate_branch() -> String {
    format!("{}{}", BRANCH_MAGIC_COOKIE, uuid::Uuid::new_v4().simple())
}

/// `SIP/2.0/<PROTO> addr:port;branch=<branch>` for a proxy or backend socket
pub fn via_for(endpoint: &SipEndpoint, branch: impl Into<String>) -> ViaHeader {
    ViaHeader {
        sent_protocol: SentProtocol {
            name: "SIP".to_string(),
            version: "2.0".to_string(),
            transport: endpoint.protocol.as_str().to_ascii_uppercase(),
        },
        sent_by_host: Host::from(endpoint.address),
        sent_by_port: Some(endpoint.port),
        params: vec![Param::branch(branch)],
    }
}

/// URI addressing a socket; non-UDP protocols get a `transport` parameter
pub fn uri_for(endpoint: &SipEndpoint) -> Uri {
    let uri = Uri::new(Scheme::Sip, Host::from(endpoint.address)).with_port(endpoint.port);
    match endpoint.protocol {
        SipProtocol::Udp => uri,
        protocol => uri.with_parameter(Param::transport(protocol.as_str())),
    }
}

fn find_named<'a>(params: &'a [Param], name: &str) -> Option<&'a Param> {
    params.iter().find(|param| param.key().eq_ignore_ascii_case(name))
}

fn host_address(host: &Host) -> Option<IpAddr> {
    match host {
        Host::Address(address) => Some(*address),
        Host::Domain(_) => None,
    }
}

/// Parameter and socket access on a single Via entry.
///
/// Lookups go through [`Param::key`], so typed parameters such as `rport`
/// and `received` match by name the same way extension parameters do.
pub trait ViaHeaderExt {
    /// Sent-by socket, when the host is a literal IP address
    fn endpoint(&self) -> Option<SipEndpoint>;

    fn find_param(&self, name: &str) -> Option<&Param>;

    /// Value of a parameter; `None` for absent and flag parameters alike
    fn param(&self, name: &str) -> Option<String>;

    /// Replace or append a parameter, keeping the position of an existing one
    fn set_param(&mut self, name: &str, value: Option<String>);

    /// Remove a parameter, keeping the order of the rest; returns whether it was present
    fn remove_param(&mut self, name: &str) -> bool;
}

impl ViaHeaderExt for ViaHeader {
    fn endpoint(&self) -> Option<SipEndpoint> {
        let address = host_address(&self.sent_by_host)?;
        let protocol = self.sent_protocol.transport.parse::<SipProtocol>().ok()?;
        Some(SipEndpoint::new(
            protocol,
            address,
            self.sent_by_port.unwrap_or(protocol.default_port()),
        ))
    }

    fn find_param(&self, name: &str) -> Option<&Param> {
        find_named(&self.params, name)
    }

    fn param(&self, name: &str) -> Option<String> {
        self.find_param(name).and_then(Param::value)
    }

    fn set_param(&mut self, name: &str, value: Option<String>) {
        let param = Param::Other(name.to_string(), value.map(GenericValue::Token));
        match self.params.iter().position(|p| p.key().eq_ignore_ascii_case(name)) {
            Some(index) => self.params[index] = param,
            None => self.params.push(param),
        }
    }

    fn remove_param(&mut self, name: &str) -> bool {
        let before = self.params.len();
        self.params.retain(|param| !param.key().eq_ignore_ascii_case(name));
        self.params.len() != before
    }
}

/// Socket view of a URI
pub trait UriExt {
    /// Host as an IP address, if it is one
    fn ip_address(&self) -> Option<IpAddr>;

    /// Transport protocol implied by the `transport` parameter and scheme
    fn protocol(&self) -> SipProtocol;

    /// Socket this URI points at, when the host is a literal IP address.
    ///
    /// Hostnames need DNS, which belongs to the transport layer, so they
    /// yield `None` here.
    fn to_endpoint(&self) -> Option<SipEndpoint>;

    fn find_param(&self, name: &str) -> Option<&Param>;
}

impl UriExt for Uri {
    fn ip_address(&self) -> Option<IpAddr> {
        host_address(&self.host)
    }

    fn protocol(&self) -> SipProtocol {
        match self.transport().and_then(|t| t.parse::<SipProtocol>().ok()) {
            Some(protocol) => protocol,
            None if matches!(self.scheme, Scheme::Sips) => SipProtocol::Tls,
            None => SipProtocol::Udp,
        }
    }

    fn to_endpoint(&self) -> Option<SipEndpoint> {
        let address = self.ip_address()?;
        let protocol = self.protocol();
        Some(SipEndpoint::new(protocol, address, self.port.unwrap_or(protocol.default_port())))
    }

    fn find_param(&self, name: &str) -> Option<&Param> {
        find_named(&self.parameters, name)
    }
}
