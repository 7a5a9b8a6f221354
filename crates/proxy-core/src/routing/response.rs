//! Response half of the routing engine

use tracing::{debug, warn};

use super::{RoutingContext, RoutingDecision, RoutingEngine, RoutingFailure};
use crate::common::{Role, SipEndpoint};
use crate::dispatcher::CorrelationKey;
use crate::message::{Method, SipMessage, ViaHeader, ViaHeaderExt};
use crate::transform::{self, PROXY_VIA_PARAM};
use crate::transport::{ExternalSend, InternalSend, Resolution, TransparentSend};

impl RoutingEngine {
    pub(super) async fn decide_response(&self, mut resp: SipMessage, ctx: &RoutingContext) -> RoutingDecision {
        let popped = match &ctx.top_via {
            Some(via) => Some(via.clone()),
            None => transform::pop_top_via(&mut resp),
        };
        let Some(via) = popped else {
            warn!("Response {} from {} has no Via", resp.summary(), ctx.remote);
            return RoutingDecision::Drop(RoutingFailure::MissingVia);
        };

        let ours = via
            .endpoint()
            .map(|endpoint| self.roles.is_proxy_socket(&endpoint, &ctx.local, self.public_ip(ctx)))
            .unwrap_or(false);
        if !ours {
            warn!("Response {} carries foreign top Via {}", resp.summary(), via);
            return RoutingDecision::Drop(RoutingFailure::ForeignVia(via.to_string()));
        }

        let origin = self.roles.classify_origin(&ctx.remote);
        let method = resp.cseq.method.clone();
        debug!("Routing {} from {} ({})", resp.summary(), ctx.remote, origin);

        match method {
            Method::Register if origin == Role::Registrar => self.send_external_response(resp, ctx, false).await,
            Method::Register => self.return_to_agent(resp, &via),
            Method::Notify | Method::Subscribe => {
                if matches!(origin, Role::Notifier | Role::ApplicationServer) {
                    self.send_external_response(resp, ctx, false).await
                } else {
                    self.send_internal_response(resp, ctx)
                }
            }
            _ if origin == Role::ApplicationServer => {
                let mangle = method == Method::Invite;
                self.send_external_response(resp, ctx, mangle).await
            }
            Method::Ack | Method::Cancel | Method::Invite => self.return_to_app_server(resp, ctx, &via),
            _ => self.send_internal_response(resp, ctx),
        }
    }

    /// Response to a REGISTER the registration agent sent transparently
    fn return_to_agent(&self, mut resp: SipMessage, via: &ViaHeader) -> RoutingDecision {
        let Some(agent) = self.roles.roles().registration_agent else {
            return RoutingDecision::Drop(RoutingFailure::NoRegistrationAgent);
        };
        let Some(branch) = via.branch().map(str::to_string) else {
            return RoutingDecision::Drop(RoutingFailure::MissingBranch(via.to_string()));
        };
        transform::push_via(&mut resp, &agent, branch);

        RoutingDecision::Transparent(TransparentSend {
            destination: agent,
            message: resp,
            branch: None,
            source: Some(self.roles.channel_for(&agent)),
            public_ip: None,
        })
    }

    /// Response from an external user agent to a request an application server
    /// sent transparently; the server's Via is restored from the popped branch.
    fn return_to_app_server(&self, mut resp: SipMessage, ctx: &RoutingContext, via: &ViaHeader) -> RoutingDecision {
        let affinity = if self.flags.dispatcher {
            self.dispatcher.lookup(&CorrelationKey::for_message(&resp))
        } else {
            None
        };
        let Some(instance) = affinity.or_else(|| self.roles.default_app_server()) else {
            return RoutingDecision::Drop(RoutingFailure::NoAppServer);
        };
        let Some(branch) = via.branch().map(str::to_string) else {
            return RoutingDecision::Drop(RoutingFailure::MissingBranch(via.to_string()));
        };

        if resp.cseq.method == Method::Invite {
            transform::mangle_contact(&mut resp, ctx.remote.address, Some(ctx.remote.port));
        }
        transform::push_via(&mut resp, &instance, branch);

        RoutingDecision::Transparent(TransparentSend {
            destination: instance,
            message: resp,
            branch: None,
            source: Some(self.roles.channel_for(&instance)),
            public_ip: None,
        })
    }

    /// Hand a response back to the backend named by the next Via
    fn send_internal_response(&self, resp: SipMessage, ctx: &RoutingContext) -> RoutingDecision {
        let Some(destination) = resp.top_via().and_then(|via| via.endpoint()) else {
            warn!("No backend Via left on {}", resp.summary());
            return RoutingDecision::Drop(RoutingFailure::NoBackendVia);
        };

        RoutingDecision::Internal(InternalSend {
            remote: ctx.remote,
            local: ctx.local,
            destination,
            message: resp,
            branch: None,
            via_channel: self.roles.channel_for(&destination),
        })
    }

    /// Send a backend's response out to the external peer named by the next Via.
    ///
    /// The `proxy` parameter left on that Via on the way in names the socket
    /// the request arrived on; the response leaves from the same socket.
    async fn send_external_response(&self, mut resp: SipMessage, ctx: &RoutingContext, mangle_contact: bool) -> RoutingDecision {
        let channel = transform::via_parameter(&resp, PROXY_VIA_PARAM).and_then(|value| value.parse::<SipEndpoint>().ok());
        transform::remove_via_parameter(&mut resp, PROXY_VIA_PARAM);
        let source = channel.unwrap_or(self.roles.roles().proxy_internal);

        let destination = match self.roles.resolve_destination(&resp, self.transport.as_ref()).await {
            Resolution::Resolved(destination) => destination,
            Resolution::Pending => {
                let host = resp.top_via().map(|via| via.sent_by_host.to_string()).unwrap_or_default();
                return RoutingDecision::Deferred { host };
            }
            Resolution::Unresolvable => {
                warn!("Could not resolve destination of {}", resp.summary());
                return RoutingDecision::Drop(RoutingFailure::UnresolvableResponse);
            }
        };
        let public_ip = self.network.public_ip_for(&destination, self.public_ip(ctx));

        if mangle_contact {
            transform::mangle_contact(&mut resp, public_ip.unwrap_or(source.address), Some(source.port));
        }

        RoutingDecision::External(ExternalSend {
            message: resp,
            destination,
            source: Some(source),
            branch: None,
            public_ip,
        })
    }
}
