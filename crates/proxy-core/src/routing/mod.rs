//! Routing policy engine.
//!
//! For every message the engine classifies the sender, rewrites routing
//! headers and produces a [`RoutingDecision`]: forward (transparently, to a
//! backend, or to an external peer), answer directly, defer, or drop.
//! [`RoutingEngine::route`] then executes the decision against the
//! [`ProxyTransport`].
//!
//! Messages are routed independently; the engine is `Send + Sync` and meant
//! to be shared behind an `Arc` by many concurrent tasks. The dispatcher
//! affinity table is the only state shared between them.

mod request;
mod response;

use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn, Instrument};

use crate::common::{Result, SipEndpoint};
use crate::dispatcher::{CorrelationKey, DispatcherTable};
use crate::message::{generate_branch, uri_for, Method, Param, SipMessage, StatusCode, Uri, ViaHeader};
use crate::network::NetworkClassifier;
use crate::policy::{AdmissionPolicy, PolicyFlags};
use crate::roles::{RoleConfiguration, RoleResolver};
use crate::transform;
use crate::transport::{
    DirectResponse, ExternalSend, InternalSend, ProxyTransport, Resolution, TransparentSend,
};

/// Per-message input built by the transport layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingContext {
    /// Peer the message arrived from
    pub remote: SipEndpoint,
    /// Proxy socket the message arrived on
    pub local: SipEndpoint,
    /// Branch for the Via the proxy adds when forwarding a request
    pub proxy_branch: String,
    /// Overrides the configured public IP for this message
    pub public_ip: Option<IpAddr>,
    /// Top Via of a response, when the transport already removed it
    pub top_via: Option<ViaHeader>,
}

impl RoutingContext {
    /// Context with a freshly generated proxy branch
    pub fn new(remote: SipEndpoint, local: SipEndpoint) -> Self {
        Self {
            remote,
            local,
            proxy_branch: generate_branch(),
            public_ip: None,
            top_via: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.proxy_branch = branch.into();
        self
    }

    pub fn with_public_ip(mut self, public_ip: IpAddr) -> Self {
        self.public_ip = Some(public_ip);
        self
    }

    pub fn with_top_via(mut self, via: ViaHeader) -> Self {
        self.top_via = Some(via);
        self
    }
}

/// Why a message was dropped without being forwarded or answered
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingFailure {
    #[error("message has no Via header")]
    MissingVia,

    #[error("registration agent request was missing its Route header")]
    MissingRoute,

    #[error("Route {0} does not name a socket")]
    InvalidRoute(String),

    #[error("top Via {0} was not added by this proxy")]
    ForeignVia(String),

    #[error("ACK destination {0} unresolvable")]
    UnresolvableAck(String),

    #[error("response destination could not be resolved")]
    UnresolvableResponse,

    #[error("top Via {0} carries no branch")]
    MissingBranch(String),

    #[error("no Via left to route the response to a backend")]
    NoBackendVia,

    #[error("no registration agent configured")]
    NoRegistrationAgent,

    #[error("no application server available")]
    NoAppServer,

    #[error("ACK arrived with Max-Forwards exhausted")]
    HopsExhausted,
}

/// What the engine decided to do with one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    Transparent(TransparentSend),
    Internal(InternalSend),
    External(ExternalSend),
    Respond(DirectResponse),
    /// Destination lookup still pending; the transport retries later
    Deferred { host: String },
    Drop(RoutingFailure),
}

/// Summary of an executed decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingOutcome {
    Forwarded { destination: SipEndpoint },
    Responded { status: StatusCode },
    Deferred,
    Dropped(RoutingFailure),
}

/// The orchestrator tying roles, transforms, classification and affinity together
pub struct RoutingEngine {
    roles: RoleResolver,
    network: NetworkClassifier,
    flags: PolicyFlags,
    admission: Arc<dyn AdmissionPolicy>,
    dispatcher: Arc<dyn DispatcherTable>,
    transport: Arc<dyn ProxyTransport>,
}

impl RoutingEngine {
    pub fn new(
        roles: Arc<RoleConfiguration>,
        network: NetworkClassifier,
        flags: PolicyFlags,
        admission: Arc<dyn AdmissionPolicy>,
        dispatcher: Arc<dyn DispatcherTable>,
        transport: Arc<dyn ProxyTransport>,
    ) -> Self {
        Self {
            roles: RoleResolver::new(roles),
            network,
            flags,
            admission,
            dispatcher,
            transport,
        }
    }

    pub fn roles(&self) -> &RoleResolver {
        &self.roles
    }

    pub fn dispatcher(&self) -> &Arc<dyn DispatcherTable> {
        &self.dispatcher
    }

    /// Decide and execute; transport failures are returned, everything else is an outcome
    pub async fn route(&self, msg: SipMessage, ctx: RoutingContext) -> Result<RoutingOutcome> {
        let span = tracing::debug_span!(
            "route",
            direction = if msg.is_request() { "request" } else { "response" },
            method = %msg.routing_method(),
            remote = %ctx.remote,
        );

        async move {
            let decision = self.decide(msg, &ctx).await;
            self.execute(decision).await
        }
        .instrument(span)
        .await
    }

    /// Compute the decision for one message without sending anything
    pub async fn decide(&self, msg: SipMessage, ctx: &RoutingContext) -> RoutingDecision {
        if msg.is_request() {
            self.decide_request(msg, ctx).await
        } else {
            self.decide_response(msg, ctx).await
        }
    }

    /// Carry out a decision against the transport
    pub async fn execute(&self, decision: RoutingDecision) -> Result<RoutingOutcome> {
        let outcome = match decision {
            RoutingDecision::Transparent(send) => {
                let destination = send.destination;
                debug!("Sending transparently to {}: {}", destination, send.message.summary());
                self.transport.send_transparent(send).await.map_err(|e| {
                    warn!("Transparent send to {} failed: {}", destination, e);
                    e
                })?;
                RoutingOutcome::Forwarded { destination }
            }
            RoutingDecision::Internal(send) => {
                let destination = send.destination;
                debug!("Sending internally to {} via {}: {}", destination, send.via_channel, send.message.summary());
                self.transport.send_internal(send).await.map_err(|e| {
                    warn!("Internal send to {} failed: {}", destination, e);
                    e
                })?;
                RoutingOutcome::Forwarded { destination }
            }
            RoutingDecision::External(send) => {
                let destination = send.destination;
                debug!("Sending externally to {}: {}", destination, send.message.summary());
                self.transport.send_external(send).await.map_err(|e| {
                    warn!("External send to {} failed: {}", destination, e);
                    e
                })?;
                RoutingOutcome::Forwarded { destination }
            }
            RoutingDecision::Respond(response) => {
                let status = response.status;
                debug!("Responding {} {} to {}", status.as_u16(), response.reason_phrase(), response.request.summary());
                self.transport.respond_direct(response).await?;
                RoutingOutcome::Responded { status }
            }
            RoutingDecision::Deferred { host } => {
                debug!("DNS lookup pending for {}", host);
                RoutingOutcome::Deferred
            }
            RoutingDecision::Drop(failure) => {
                warn!("Dropping message: {}", failure);
                RoutingOutcome::Dropped(failure)
            }
        };
        Ok(outcome)
    }

    fn public_ip(&self, ctx: &RoutingContext) -> Option<IpAddr> {
        ctx.public_ip.or(self.roles.roles().public_ip)
    }

    /// URI naming a proxy socket, with the public IP substituted when given
    fn proxy_uri(&self, socket: &SipEndpoint, public_ip: Option<IpAddr>) -> Uri {
        let socket = match public_ip {
            Some(ip) => socket.with_address(ip),
            None => *socket,
        };
        uri_for(&socket)
    }

    /// Record-Route entry for this proxy
    fn record_route_uri(&self, socket: &SipEndpoint, public_ip: Option<IpAddr>) -> Uri {
        self.proxy_uri(socket, public_ip).with_parameter(Param::Lr)
    }

    /// Resolve a request's destination or turn the failure into a decision
    async fn resolve_request(&self, req: SipMessage) -> std::result::Result<(SipMessage, SipEndpoint), RoutingDecision> {
        let host = req.request_uri().map(|uri| uri.host.to_string()).unwrap_or_default();
        match self.roles.resolve_destination(&req, self.transport.as_ref()).await {
            Resolution::Resolved(destination) => Ok((req, destination)),
            Resolution::Pending => Err(RoutingDecision::Deferred { host }),
            Resolution::Unresolvable if req.method() == Some(&Method::Ack) => {
                Err(RoutingDecision::Drop(RoutingFailure::UnresolvableAck(host)))
            }
            Resolution::Unresolvable => {
                warn!("Host {} unresolvable for {}", host, req.summary());
                Err(RoutingDecision::Respond(DirectResponse::new(
                    req,
                    StatusCode::DoesNotExistAnywhere,
                    Some(format!("Host {} unresolvable", host)),
                )))
            }
        }
    }

    /// Forward a request to an application-server instance.
    ///
    /// The instance comes from dispatcher affinity when one is recorded. A
    /// request that `establishes` a dialog without one takes the next instance
    /// in rotation and records it; anything else falls back to the default
    /// instance, the same one the response path uses.
    fn dispatch_to_app_server(&self, req: SipMessage, ctx: &RoutingContext, establishes: bool) -> RoutingDecision {
        let key = CorrelationKey::for_message(&req);
        let affinity = if self.flags.dispatcher {
            self.dispatcher.lookup(&key)
        } else {
            None
        };

        let target = match affinity {
            Some(instance) => Some(instance),
            None if self.flags.dispatcher && establishes => self.roles.select_app_server(),
            None => self.roles.default_app_server(),
        };

        let Some(target) = target else {
            warn!("No application server available for {}", req.summary());
            return RoutingDecision::Respond(DirectResponse::new(
                req,
                StatusCode::BadGateway,
                Some("No app servers available".to_string()),
            ));
        };

        if establishes && self.flags.dispatcher && affinity.is_none() {
            self.dispatcher.record(key, target);
        }

        RoutingDecision::Internal(InternalSend {
            remote: ctx.remote,
            local: ctx.local,
            destination: target,
            message: req,
            branch: Some(ctx.proxy_branch.clone()),
            via_channel: self.roles.channel_for(&target),
        })
    }

    /// Forward a request to a backend that is not an application server
    fn send_to_backend(&self, req: SipMessage, ctx: &RoutingContext, backend: SipEndpoint) -> RoutingDecision {
        RoutingDecision::Internal(InternalSend {
            remote: ctx.remote,
            local: ctx.local,
            destination: backend,
            message: req,
            branch: Some(ctx.proxy_branch.clone()),
            via_channel: self.roles.channel_for(&backend),
        })
    }

    /// Send a backend's request to an external user agent.
    ///
    /// Transparent sends reuse the backend's branch (its Via is removed, and
    /// the response path restores it); other sends stack the proxy's Via on
    /// top with the proxy branch.
    async fn send_external_request(&self, req: SipMessage, ctx: &RoutingContext, transparent: bool) -> RoutingDecision {
        let (mut req, destination) = match self.resolve_request(req).await {
            Ok(resolved) => resolved,
            Err(decision) => return decision,
        };
        let public_ip = self.network.public_ip_for(&destination, self.public_ip(ctx));

        if transparent {
            let branch = transform::pop_top_via(&mut req).and_then(|via| via.branch().map(str::to_string));
            RoutingDecision::Transparent(TransparentSend {
                destination,
                message: req,
                branch,
                source: Some(self.roles.roles().proxy_internal),
                public_ip,
            })
        } else {
            RoutingDecision::External(ExternalSend {
                message: req,
                destination,
                source: Some(ctx.local),
                branch: Some(ctx.proxy_branch.clone()),
                public_ip,
            })
        }
    }
}
