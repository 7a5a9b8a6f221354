mod common;

use async_trait::async_trait;
use std::sync::Arc;

use common::*;
use rvoip_proxy_core::dispatcher::DispatcherTable;
use rvoip_proxy_core::message::{SipMessage, StatusCode};
use rvoip_proxy_core::policy::{AdmissionPolicy, PolicyAction};
use rvoip_proxy_core::{ProxyConfig, ProxyError, ProxyRouter, ProxyTransport, RoutingOutcome, SipEndpoint};

const CONFIG: &str = r#"
    [roles]
    registrar = "udp:127.0.0.1:5001"
    registration_agent = "udp:127.0.0.1:5002"
    notifier = "udp:127.0.0.1:5003"
    app_servers = ["udp:10.1.1.5:5065", "udp:10.1.1.6:5065"]
    proxy_internal = "udp:10.1.1.5:5060"
    proxy_loopback = "udp:127.0.0.1:5060"
    public_ip = "124.177.23.142"

    [policy]
    blocklist = '^203\.0\.113\.'
"#;

struct DenyAll;

#[async_trait]
impl AdmissionPolicy for DenyAll {
    async fn evaluate(&self, _remote: &SipEndpoint, _request: &SipMessage) -> PolicyAction {
        PolicyAction::Reject {
            status: StatusCode::Forbidden,
            reason: "Closed".to_string(),
        }
    }
}

#[tokio::test]
async fn test_builder_requires_config_and_transport() {
    let missing_config = ProxyRouter::builder()
        .transport(Arc::new(RecordingTransport::new()))
        .build()
        .await;
    assert!(matches!(missing_config, Err(ProxyError::ConfigError(_))));

    let missing_transport = ProxyRouter::builder()
        .config(ProxyConfig::from_toml_str(CONFIG).unwrap())
        .build()
        .await;
    assert!(matches!(missing_transport, Err(ProxyError::ConfigError(_))));
}

#[tokio::test]
async fn test_router_applies_configured_blocklist() {
    let transport = Arc::new(RecordingTransport::new());
    let router = ProxyRouter::builder()
        .config(ProxyConfig::from_toml_str(CONFIG).unwrap())
        .transport(Arc::clone(&transport) as Arc<dyn ProxyTransport>)
        .build()
        .await
        .unwrap();

    let outcome = router.route(external_invite(), ctx_from(EXTERNAL_UA)).await.unwrap();
    assert_eq!(outcome, RoutingOutcome::Responded { status: StatusCode::NotAcceptable });

    let outcome = router
        .route(external_invite(), ctx_from("udp:198.51.100.9:5060"))
        .await
        .unwrap();
    assert_eq!(outcome, RoutingOutcome::Forwarded { destination: ep(APP_SERVER_A) });
    assert_eq!(router.engine().dispatcher().len(), 1);
}

#[tokio::test]
async fn test_custom_admission_policy_overrides_blocklist() {
    let transport = Arc::new(RecordingTransport::new());
    let mut router = ProxyRouter::builder()
        .config(ProxyConfig::from_toml_str(CONFIG).unwrap())
        .transport(Arc::clone(&transport) as Arc<dyn ProxyTransport>)
        .admission_policy(Arc::new(DenyAll))
        .build()
        .await
        .unwrap();

    let outcome = router
        .route(external_invite(), ctx_from("udp:198.51.100.9:5060"))
        .await
        .unwrap();
    assert_eq!(outcome, RoutingOutcome::Responded { status: StatusCode::Forbidden });

    let Sent::Direct(response) = transport.single() else {
        panic!("expected a direct response");
    };
    assert_eq!(response.reason_phrase(), "Closed");

    router.shutdown();
}
