use std::time::{Duration, Instant};

use httpmock::prelude::*;
use portal_service::gateway::{CallbackStatus, FreemopayGateway, GatewayError, ProviderGateway};
use serde_json::json;
use uuid::Uuid;

fn gateway(base_url: String) -> FreemopayGateway {
    FreemopayGateway::new(base_url, "app".into(), "secret".into(), Duration::from_secs(5))
        .expect("build gateway")
}

#[tokio::test]
async fn initiate_payment_sends_basic_auth_and_parses_reference() {
    let server = MockServer::start();
    let external_id = Uuid::new_v4();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/v2/payment")
            // base64("app:secret")
            .header("authorization", "Basic YXBwOnNlY3JldA==")
            .json_body_partial(
                json!({
                    "amount": 500,
                    "externalId": external_id.to_string(),
                    "payer": "237699123456",
                })
                .to_string(),
            );
        then.status(200)
            .json_body(json!({ "reference": "fm-ref-1", "status": "PENDING" }));
    });

    let gw = gateway(server.base_url());
    let init = gw
        .initiate_payment(500, external_id, "https://portal.example/webhooks/freemopay", "237699123456")
        .await
        .expect("initiate");

    mock.assert();
    assert_eq!(init.reference.as_deref(), Some("fm-ref-1"));
    assert_eq!(init.status.as_deref(), Some("PENDING"));
    assert_eq!(init.raw["reference"], "fm-ref-1");
}

#[tokio::test]
async fn unauthorized_maps_to_configuration_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/v2/payment");
        then.status(401).body("bad credentials");
    });

    let gw = gateway(server.base_url());
    let err = gw
        .initiate_payment(500, Uuid::new_v4(), "https://cb", "237699123456")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Configuration), "got {err:?}");
}

#[tokio::test]
async fn client_error_maps_to_rejected() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/v2/payment");
        then.status(400).body("invalid payer");
    });

    let gw = gateway(server.base_url());
    let err = gw
        .initiate_payment(500, Uuid::new_v4(), "https://cb", "237699123456")
        .await
        .unwrap_err();
    match err {
        GatewayError::Rejected(msg) => assert!(msg.contains("invalid payer"), "msg={msg}"),
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn server_error_maps_to_transient() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/v2/payment");
        then.status(503);
    });

    let gw = gateway(server.base_url());
    let err = gw
        .initiate_payment(500, Uuid::new_v4(), "https://cb", "237699123456")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Transient(_)), "got {err:?}");
}

#[tokio::test]
async fn missing_credentials_short_circuit_without_a_call() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/api/v2/payment");
        then.status(200).json_body(json!({}));
    });

    let gw = FreemopayGateway::new(server.base_url(), String::new(), String::new(), Duration::from_secs(5))
        .expect("build gateway");
    assert!(matches!(gw.ensure_configured(), Err(GatewayError::Configuration)));
    let err = gw
        .initiate_payment(500, Uuid::new_v4(), "https://cb", "237699123456")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Configuration));
    mock.assert_hits(0);
}

#[tokio::test]
async fn query_status_normalizes_provider_statuses() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/payment/fm-ref-1");
        then.status(200)
            .json_body(json!({ "status": "SUCCESS", "message": "paid" }));
    });

    let gw = gateway(server.base_url());
    let status = gw.query_status("fm-ref-1").await.expect("query");
    assert_eq!(status.status, CallbackStatus::Success);
    assert_eq!(status.message.as_deref(), Some("paid"));
}

#[tokio::test]
async fn rate_limit_honors_retry_after_before_failing() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/payment/fm-ref-2");
        then.status(429).header("Retry-After", "1");
    });

    let gw = gateway(server.base_url());
    let started = Instant::now();
    let err = gw.query_status("fm-ref-2").await.unwrap_err();
    assert!(matches!(err, GatewayError::Transient(_)), "got {err:?}");
    assert!(started.elapsed() >= Duration::from_secs(1), "Retry-After pause was skipped");
}
