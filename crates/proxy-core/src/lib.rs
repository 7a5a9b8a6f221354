//! # RVoIP Proxy Core
//!
//! Routing policy core for a SIP proxy sitting between external user agents
//! and a set of internal backends: a registrar, a registration agent, a
//! presence notifier and one or more application-server instances.
//!
//! The crate decides where each message goes and how its routing headers are
//! rewritten. Parsing, sockets, DNS and retransmission belong to the transport
//! layer, which the engine drives through the [`ProxyTransport`] trait.
//!
//! ## Features
//!
//! - **Header algebra**: Via, Route and Record-Route stack operations and
//!   Contact rewriting for NAT traversal
//! - **Role classification**: exact endpoint matching of backends
//! - **NAT-aware addressing**: public IP substituted only for public destinations
//! - **Dispatcher affinity**: dialogs stick to one application-server instance
//! - **Policy flags**: subscribe handling, blocklist, hop limit and per-agent
//!   Via parameter stripping, all from configuration
//!
//! ## Architecture
//!
//! - `message`: the routing view of a SIP message, built on `rvoip-sip-core` header types
//! - `transform`: pure header transforms
//! - `network`: private/public classification
//! - `roles`: backend roles and origin classification
//! - `dispatcher`: dialog to application-server affinity
//! - `policy`: admission checks and routing toggles
//! - `routing`: the request and response state machines
//! - `transport`: capabilities the engine needs from the transport layer
//! - `config` / `logging`: process setup
//! - `api`: builder assembling an engine from configuration

pub mod api;
pub mod common;
pub mod config;
pub mod dispatcher;
pub mod logging;
pub mod message;
pub mod network;
pub mod policy;
pub mod roles;
pub mod routing;
pub mod transform;
pub mod transport;

// Re-export key types
pub use api::{ProxyRouter, ProxyRouterBuilder};
pub use common::{ProxyError, Result, Role, SipEndpoint, SipProtocol};
pub use config::ProxyConfig;
pub use dispatcher::{AffinityTable, CorrelationKey, DispatcherTable};
pub use message::{Method, SipMessage, StatusCode, Uri, ViaHeader};
pub use network::NetworkClassifier;
pub use policy::{AdmissionPolicy, BlocklistPolicy, PolicyAction, PolicyFlags, SubscribeHandling};
pub use roles::{RoleConfiguration, RoleResolver};
pub use routing::{RoutingContext, RoutingDecision, RoutingEngine, RoutingFailure, RoutingOutcome};
pub use transport::{ProxyTransport, Resolution, TransportError};
