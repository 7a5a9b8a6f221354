//! Request half of the routing engine

use tracing::{debug, warn};

use super::{RoutingContext, RoutingDecision, RoutingEngine, RoutingFailure};
use crate::common::Role;
use crate::dispatcher::CorrelationKey;
use crate::message::{Method, SipMessage, StatusCode, UriExt};
use crate::policy::{PolicyAction, SubscribeHandling};
use crate::transform::{self, PROXY_VIA_PARAM};
use crate::transport::{DirectResponse, TransparentSend};

impl RoutingEngine {
    pub(super) async fn decide_request(&self, mut req: SipMessage, ctx: &RoutingContext) -> RoutingDecision {
        if let PolicyAction::Reject { status, reason } = self.admission.evaluate(&ctx.remote, &req).await {
            warn!("Rejecting {} from {}: {} {}", req.summary(), ctx.remote, status.as_u16(), reason);
            return RoutingDecision::Respond(DirectResponse::new(req, status, Some(reason)));
        }

        if req.max_forwards == 0 && self.flags.reject_exhausted_hops {
            if req.method() == Some(&Method::Ack) {
                return RoutingDecision::Drop(RoutingFailure::HopsExhausted);
            }
            return RoutingDecision::Respond(DirectResponse::new(req, StatusCode::TooManyHops, None));
        }
        transform::decrement_max_forwards(&mut req);

        for strip in &self.flags.strip_via_params {
            if transform::strip_via_parameter_for_agents(&mut req, &strip.param, &strip.user_agents) {
                debug!("Removed Via parameter {} for {:?}", strip.param, req.user_agent);
            }
        }

        let origin = self.roles.classify_origin(&ctx.remote);
        let method = req.routing_method().clone();
        debug!("Routing {} from {} ({})", req.summary(), ctx.remote, origin);

        match method {
            Method::Register => self.route_register(req, ctx, origin),
            Method::Subscribe => self.route_subscribe(req, ctx, origin).await,
            Method::Notify => self.route_notify(req, ctx, origin).await,
            Method::Invite => self.route_invite(req, ctx, origin).await,
            _ if origin == Role::ApplicationServer => {
                let transparent = matches!(method, Method::Ack | Method::Cancel);
                self.send_external_request(req, ctx, transparent).await
            }
            _ => self.dispatch_to_app_server(req, ctx, false),
        }
    }

    fn route_register(&self, mut req: SipMessage, ctx: &RoutingContext, origin: Role) -> RoutingDecision {
        if origin != Role::RegistrationAgent {
            if !transform::set_via_parameter(&mut req, PROXY_VIA_PARAM, ctx.local.to_string()) {
                return RoutingDecision::Drop(RoutingFailure::MissingVia);
            }
            let registrar = self.roles.roles().registrar;
            return self.send_to_backend(req, ctx, registrar);
        }

        let Some(agent_via) = transform::pop_top_via(&mut req) else {
            return RoutingDecision::Drop(RoutingFailure::MissingVia);
        };
        let Some(route) = transform::pop_route(&mut req) else {
            warn!("REGISTER from registration agent {} has no Route", ctx.remote);
            return RoutingDecision::Drop(RoutingFailure::MissingRoute);
        };
        let Some(destination) = route.to_endpoint() else {
            return RoutingDecision::Drop(RoutingFailure::InvalidRoute(route.to_string()));
        };
        transform::clear_routes(&mut req);

        RoutingDecision::Transparent(TransparentSend {
            destination,
            message: req,
            branch: agent_via.branch().map(str::to_string),
            source: Some(self.roles.channel_for(&destination)),
            public_ip: self.network.public_ip_for(&destination, self.public_ip(ctx)),
        })
    }

    async fn route_subscribe(&self, req: SipMessage, ctx: &RoutingContext, origin: Role) -> RoutingDecision {
        if matches!(origin, Role::ApplicationServer | Role::Notifier) {
            return self.route_backend_request(req, ctx, origin).await;
        }

        match (self.flags.subscribe, self.roles.roles().notifier) {
            (SubscribeHandling::Notifier, Some(notifier)) => self.send_to_backend(req, ctx, notifier),
            _ => RoutingDecision::Respond(DirectResponse::new(req, StatusCode::MethodNotAllowed, None)),
        }
    }

    async fn route_notify(&self, req: SipMessage, ctx: &RoutingContext, origin: Role) -> RoutingDecision {
        if matches!(origin, Role::ApplicationServer | Role::Notifier) {
            return self.route_backend_request(req, ctx, origin).await;
        }

        let is_refer = req
            .event
            .as_deref()
            .map(|event| event.trim().to_ascii_lowercase().starts_with("refer"))
            .unwrap_or(false);
        if is_refer {
            let establishes = req.to_tag().is_none();
            return self.dispatch_to_app_server(req, ctx, establishes);
        }

        match self.roles.roles().notifier {
            Some(notifier) => self.send_to_backend(req, ctx, notifier),
            None => RoutingDecision::Respond(DirectResponse::new(req, StatusCode::MethodNotAllowed, None)),
        }
    }

    /// SUBSCRIBE or NOTIFY leaving a backend for an external user agent
    async fn route_backend_request(&self, req: SipMessage, ctx: &RoutingContext, origin: Role) -> RoutingDecision {
        let establishes = req.to_tag().is_none();
        let key = CorrelationKey::for_message(&req);
        let decision = self.send_external_request(req, ctx, false).await;
        let sent = matches!(decision, RoutingDecision::External(_));
        if sent && origin == Role::ApplicationServer && establishes && self.flags.dispatcher {
            self.dispatcher.record(key, ctx.remote);
        }
        decision
    }

    async fn route_invite(&self, req: SipMessage, ctx: &RoutingContext, origin: Role) -> RoutingDecision {
        if origin == Role::ApplicationServer {
            return self.route_app_server_invite(req, ctx).await;
        }

        let mut req = req;
        if !transform::set_via_parameter(&mut req, PROXY_VIA_PARAM, ctx.local.to_string()) {
            return RoutingDecision::Drop(RoutingFailure::MissingVia);
        }
        let caller_ip = self.network.public_ip_for(&ctx.remote, self.public_ip(ctx));
        let establishes = transform::push_record_route(&mut req, self.record_route_uri(&ctx.local, caller_ip));
        transform::mangle_contact(&mut req, ctx.remote.address, Some(ctx.remote.port));

        self.dispatch_to_app_server(req, ctx, establishes)
    }

    /// INVITE from an application server to an external user agent.
    ///
    /// Sent transparently: the server's Via is replaced by the proxy's with the
    /// same branch, and the Contact names the proxy so in-dialog requests come
    /// back through it.
    async fn route_app_server_invite(&self, req: SipMessage, ctx: &RoutingContext) -> RoutingDecision {
        let (mut req, destination) = match self.resolve_request(req).await {
            Ok(resolved) => resolved,
            Err(decision) => return decision,
        };
        let public_ip = self.network.public_ip_for(&destination, self.public_ip(ctx));
        let proxy = self.roles.roles().proxy_internal;

        let establishes = transform::push_record_route(&mut req, self.record_route_uri(&ctx.local, public_ip));
        if establishes && self.flags.dispatcher {
            self.dispatcher.record(CorrelationKey::for_message(&req), ctx.remote);
        }

        let branch = transform::pop_top_via(&mut req).and_then(|via| via.branch().map(str::to_string));
        transform::mangle_contact(&mut req, public_ip.unwrap_or(proxy.address), Some(proxy.port));

        RoutingDecision::Transparent(TransparentSend {
            destination,
            message: req,
            branch,
            source: Some(proxy),
            public_ip,
        })
    }
}
