//! Header transforms applied while a message transits the proxy.
//!
//! Every function here is pure: it mutates the message it is handed and does
//! no I/O. Whether a transform applies is decided by the routing engine; the
//! only rule enforced locally is that Record-Route is never added to an
//! in-dialog request.

use std::net::IpAddr;

use crate::common::SipEndpoint;
use crate::message::{via_for, Host, SipMessage, Uri, ViaHeader, ViaHeaderExt};

/// Via parameter recording the proxy socket a request was received on
pub const PROXY_VIA_PARAM: &str = "proxy";

/// Decrement Max-Forwards, stopping at zero
pub fn decrement_max_forwards(msg: &mut SipMessage) {
    msg.max_forwards = msg.max_forwards.saturating_sub(1);
}

/// Prepend `proxy_uri` to Record-Route if the request starts a new dialog.
///
/// Returns `true` when the entry was inserted. A request carrying a To-tag is
/// in-dialog and its route set is already fixed, so it is left untouched.
pub fn push_record_route(msg: &mut SipMessage, proxy_uri: Uri) -> bool {
    if msg.to_tag().is_some() {
        return false;
    }
    msg.record_route.insert(0, proxy_uri);
    true
}

pub fn pop_top_via(msg: &mut SipMessage) -> Option<ViaHeader> {
    if msg.via.is_empty() {
        None
    } else {
        Some(msg.via.remove(0))
    }
}

/// Prepend a Via naming `endpoint` with `branch`
pub fn push_via(msg: &mut SipMessage, endpoint: &SipEndpoint, branch: impl Into<String>) {
    msg.via.insert(0, via_for(endpoint, branch));
}

/// Remove and return the first Route entry
pub fn pop_route(msg: &mut SipMessage) -> Option<Uri> {
    if msg.route.is_empty() {
        None
    } else {
        Some(msg.route.remove(0))
    }
}

pub fn clear_routes(msg: &mut SipMessage) {
    msg.route.clear();
}

/// Set a parameter on the top Via; returns `false` when there is no Via
pub fn set_via_parameter(msg: &mut SipMessage, key: &str, value: impl Into<String>) -> bool {
    match msg.top_via_mut() {
        Some(via) => {
            via.set_param(key, Some(value.into()));
            true
        }
        None => false,
    }
}

/// Remove a parameter from the top Via; returns whether it was present
pub fn remove_via_parameter(msg: &mut SipMessage, key: &str) -> bool {
    msg.top_via_mut().map(|via| via.remove_param(key)).unwrap_or(false)
}

pub fn via_parameter(msg: &SipMessage, key: &str) -> Option<String> {
    msg.top_via().and_then(|via| via.param(key))
}

/// Remove `key` from the top Via when the User-Agent is one of `agents`.
///
/// Some phones mishandle responses routed by `rport`; their User-Agent strings
/// are matched exactly.
pub fn strip_via_parameter_for_agents(msg: &mut SipMessage, key: &str, agents: &[String]) -> bool {
    let matches = msg
        .user_agent
        .as_deref()
        .map(|ua| agents.iter().any(|agent| agent == ua))
        .unwrap_or(false);
    matches && remove_via_parameter(msg, key)
}

/// Rewrite the host (and optionally the port) of the first Contact URI.
///
/// Returns `false` when the message has no Contact.
pub fn mangle_contact(msg: &mut SipMessage, new_host: IpAddr, new_port: Option<u16>) -> bool {
    match msg.contact.first_mut() {
        Some(contact) => {
            contact.host = Host::from(new_host);
            if new_port.is_some() {
                contact.port = new_port;
            }
            true
        }
        None => false,
    }
}
