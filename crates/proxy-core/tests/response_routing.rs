mod common;

use pretty_assertions::assert_eq;

use common::*;
use rvoip_proxy_core::dispatcher::{CorrelationKey, DispatcherTable};
use rvoip_proxy_core::message::{via_for, Host, Method, SipMessage, StatusCode, ViaHeader, ViaHeaderExt};
use rvoip_proxy_core::transform::PROXY_VIA_PARAM;
use rvoip_proxy_core::transport::Resolution;
use rvoip_proxy_core::policy::PolicyFlags;
use rvoip_proxy_core::{RoutingContext, RoutingFailure, RoutingOutcome};

fn proxy_via(socket: &str, branch: &str) -> ViaHeader {
    via_for(&ep(socket), branch)
}

/// External UA Via as the proxy left it when forwarding inward
fn tagged_ua_via() -> ViaHeader {
    let mut via = via_for(&ep(EXTERNAL_UA), "z9hG4bK-ua");
    via.set_param(PROXY_VIA_PARAM, Some(PROXY_INTERNAL.to_string()));
    via
}

fn response(method: Method, status: StatusCode, vias: Vec<ViaHeader>) -> SipMessage {
    let mut request = SipMessage::request(method.clone(), uri("sip:service@10.1.1.5"))
        .with_cseq(1, method)
        .with_call_id("call-resp");
    request.via = vias;
    SipMessage::response_to(&request, status)
}

#[tokio::test]
async fn test_foreign_via_is_dropped() {
    let harness = Harness::new();
    let resp = response(
        Method::Invite,
        StatusCode::Ok,
        vec![via_for(&ep("udp:198.51.100.7:5060"), "z9hG4bK-x")],
    );

    let outcome = harness.engine.route(resp, ctx_from(EXTERNAL_UA)).await.unwrap();
    assert!(matches!(outcome, RoutingOutcome::Dropped(RoutingFailure::ForeignVia(_))));
    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn test_response_without_via_is_dropped() {
    let harness = Harness::new();
    let resp = response(Method::Options, StatusCode::Ok, Vec::new());

    let outcome = harness.engine.route(resp, ctx_from(EXTERNAL_UA)).await.unwrap();
    assert_eq!(outcome, RoutingOutcome::Dropped(RoutingFailure::MissingVia));
    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn test_registrar_response_leaves_from_tagged_socket() {
    let harness = Harness::new();
    let resp = response(
        Method::Register,
        StatusCode::Ok,
        vec![proxy_via(PROXY_LOOPBACK, "z9hG4bK-proxy"), tagged_ua_via()],
    );

    let outcome = harness.engine.route(resp, ctx_from(REGISTRAR)).await.unwrap();
    assert_eq!(outcome, RoutingOutcome::Forwarded { destination: ep(EXTERNAL_UA) });

    let Sent::External(send) = harness.transport.single() else {
        panic!("expected an external send");
    };
    assert_eq!(send.source, Some(ep(PROXY_INTERNAL)));
    assert_eq!(send.public_ip, Some(PUBLIC_IP.parse().unwrap()));
    assert_eq!(send.message.via.len(), 1);
    assert!(send.message.via[0].find_param(PROXY_VIA_PARAM).is_none());
}

#[tokio::test]
async fn test_external_register_response_returns_to_agent() {
    let harness = Harness::new();
    let resp = response(
        Method::Register,
        StatusCode::Ok,
        vec![proxy_via(PROXY_LOOPBACK, "z9hG4bK-agent")],
    );

    let outcome = harness.engine.route(resp, ctx_from("udp:198.51.100.50:5060")).await.unwrap();
    assert_eq!(outcome, RoutingOutcome::Forwarded { destination: ep(AGENT) });

    let Sent::Transparent(send) = harness.transport.single() else {
        panic!("expected a transparent send");
    };
    assert_eq!(send.message.via, vec![via_for(&ep(AGENT), "z9hG4bK-agent")]);
    assert_eq!(send.source, Some(ep(PROXY_LOOPBACK)));
}

#[tokio::test]
async fn test_app_server_invite_response_names_proxy_in_contact() {
    let harness = Harness::new();
    let resp = response(
        Method::Invite,
        StatusCode::Ok,
        vec![proxy_via(PROXY_INTERNAL, "z9hG4bK-proxy"), tagged_ua_via()],
    )
    .with_contact(uri("sip:service@10.1.1.5:5065"));

    harness.engine.route(resp, ctx_from(APP_SERVER_A)).await.unwrap();

    let Sent::External(send) = harness.transport.single() else {
        panic!("expected an external send");
    };
    assert_eq!(send.destination, ep(EXTERNAL_UA));
    assert_eq!(send.message.contact[0].host.to_string(), PUBLIC_IP);
    assert_eq!(send.message.contact[0].port, Some(5060));
}

#[tokio::test]
async fn test_external_invite_response_returns_to_owning_instance() {
    let harness = Harness::new();
    harness.table.record(CorrelationKey::new("call-resp"), ep(APP_SERVER_B));

    // the transport advertised the public address in its Via
    let resp = response(
        Method::Invite,
        StatusCode::Ringing,
        vec![proxy_via("udp:124.177.23.142:5060", "z9hG4bK-as")],
    )
    .with_to_tag("bob")
    .with_contact(uri("sip:bob@192.168.1.30:5062"));

    let outcome = harness.engine.route(resp, ctx_from("udp:198.51.100.20:5060")).await.unwrap();
    assert_eq!(outcome, RoutingOutcome::Forwarded { destination: ep(APP_SERVER_B) });

    let Sent::Transparent(send) = harness.transport.single() else {
        panic!("expected a transparent send");
    };
    assert_eq!(send.message.via, vec![via_for(&ep(APP_SERVER_B), "z9hG4bK-as")]);
    assert_eq!(send.message.contact[0].host.to_string(), "198.51.100.20");
    assert_eq!(send.message.contact[0].port, Some(5060));
}

#[tokio::test]
async fn test_per_message_public_ip_marks_via_as_ours() {
    let mut config = roles();
    config.public_ip = None;
    let harness = Harness::with(config, PolicyFlags::default(), None, RecordingTransport::new());
    harness.table.record(CorrelationKey::new("call-resp"), ep(APP_SERVER_B));

    let resp = response(
        Method::Invite,
        StatusCode::Ringing,
        vec![proxy_via("udp:124.177.23.142:5060", "z9hG4bK-as")],
    )
    .with_to_tag("bob");
    let ctx = ctx_from("udp:198.51.100.20:5060").with_public_ip(PUBLIC_IP.parse().unwrap());

    let outcome = harness.engine.route(resp, ctx).await.unwrap();
    assert_eq!(outcome, RoutingOutcome::Forwarded { destination: ep(APP_SERVER_B) });

    let Sent::Transparent(send) = harness.transport.single() else {
        panic!("expected a transparent send");
    };
    assert_eq!(send.message.via, vec![via_for(&ep(APP_SERVER_B), "z9hG4bK-as")]);
}

#[tokio::test]
async fn test_external_cancel_response_falls_back_to_default_instance() {
    let harness = Harness::new();
    let resp = response(
        Method::Cancel,
        StatusCode::Ok,
        vec![proxy_via(PROXY_INTERNAL, "z9hG4bK-as-cancel")],
    );

    let outcome = harness.engine.route(resp, ctx_from("udp:198.51.100.20:5060")).await.unwrap();
    assert_eq!(outcome, RoutingOutcome::Forwarded { destination: ep(APP_SERVER_A) });
}

#[tokio::test]
async fn test_other_external_responses_go_back_to_next_via() {
    let harness = Harness::new();
    let resp = response(
        Method::Bye,
        StatusCode::Ok,
        vec![
            proxy_via(PROXY_INTERNAL, "z9hG4bK-proxy"),
            via_for(&ep(APP_SERVER_A), "z9hG4bK-as-bye"),
        ],
    );

    harness.engine.route(resp, ctx_from("udp:198.51.100.20:5060")).await.unwrap();

    let Sent::Internal(send) = harness.transport.single() else {
        panic!("expected an internal send");
    };
    assert_eq!(send.destination, ep(APP_SERVER_A));
    assert_eq!(send.branch, None);
    assert_eq!(send.message.via.len(), 1);
}

#[tokio::test]
async fn test_notify_response_from_ua_goes_to_notifier() {
    let harness = Harness::new();
    let resp = response(
        Method::Notify,
        StatusCode::Ok,
        vec![
            proxy_via(PROXY_INTERNAL, "z9hG4bK-proxy"),
            via_for(&ep(NOTIFIER), "z9hG4bK-notifier"),
        ],
    );

    harness.engine.route(resp, ctx_from(EXTERNAL_UA)).await.unwrap();

    let Sent::Internal(send) = harness.transport.single() else {
        panic!("expected an internal send");
    };
    assert_eq!(send.destination, ep(NOTIFIER));
    assert_eq!(send.via_channel, ep(PROXY_LOOPBACK));
}

#[tokio::test]
async fn test_subscribe_response_from_notifier_goes_out() {
    let harness = Harness::new();
    let resp = response(
        Method::Subscribe,
        StatusCode::Ok,
        vec![proxy_via(PROXY_LOOPBACK, "z9hG4bK-proxy"), tagged_ua_via()],
    );

    let outcome = harness.engine.route(resp, ctx_from(NOTIFIER)).await.unwrap();
    assert_eq!(outcome, RoutingOutcome::Forwarded { destination: ep(EXTERNAL_UA) });
}

#[tokio::test]
async fn test_backend_response_without_next_via_is_dropped() {
    let harness = Harness::new();
    let resp = response(Method::Bye, StatusCode::Ok, vec![proxy_via(PROXY_INTERNAL, "z9hG4bK-proxy")]);

    let outcome = harness.engine.route(resp, ctx_from("udp:198.51.100.20:5060")).await.unwrap();
    assert_eq!(outcome, RoutingOutcome::Dropped(RoutingFailure::NoBackendVia));
}

#[tokio::test]
async fn test_unresolvable_external_response_is_dropped() {
    let harness = Harness::with_transport(
        RecordingTransport::new().with_host("ua.example.net", Resolution::Unresolvable),
    );
    let mut ua_via = tagged_ua_via();
    ua_via.sent_by_host = Host::domain("ua.example.net");
    let resp = response(
        Method::Invite,
        StatusCode::Ok,
        vec![proxy_via(PROXY_INTERNAL, "z9hG4bK-proxy"), ua_via],
    );

    let outcome = harness.engine.route(resp, ctx_from(APP_SERVER_A)).await.unwrap();
    assert_eq!(outcome, RoutingOutcome::Dropped(RoutingFailure::UnresolvableResponse));
    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn test_via_already_removed_by_transport() {
    let harness = Harness::new();
    let resp = response(Method::Invite, StatusCode::Ok, vec![tagged_ua_via()]);
    let ctx = RoutingContext::new(ep(APP_SERVER_A), ep(PROXY_INTERNAL))
        .with_top_via(proxy_via(PROXY_INTERNAL, "z9hG4bK-proxy"));

    let outcome = harness.engine.route(resp, ctx).await.unwrap();
    assert_eq!(outcome, RoutingOutcome::Forwarded { destination: ep(EXTERNAL_UA) });
}
