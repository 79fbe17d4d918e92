#![allow(missing_docs)]

mod common;

use cf_bootstrap::config::TokenCache;
use cf_bootstrap::connection::AUTHORIZATION;
use cf_bootstrap::error::ConnectionError;
use cf_bootstrap::wrapper;
use common::test_helpers::{bootstrap, config, healthy_platform, MemoryOutputs, API, UAA};
use serde_json::json;
use std::sync::Arc;

fn expired_then_ok(transport: &common::test_helpers::FakeTransport) {
    let apps = format!("{API}/v3/apps");
    transport.route(&apps, 401, json!({"error": "invalid_token", "error_description": "expired"}));
    transport.route(&apps, 200, json!({"resources": []}));
}

#[tokio::test]
async fn requests_carry_the_cached_token() {
    let transport = healthy_platform();
    transport.route(&format!("{API}/v3/apps"), 200, json!({"resources": []}));
    let outputs = Arc::new(MemoryOutputs::default());
    let clients = bootstrap(&config(API, None), &transport, &outputs).new_clients(true).await.unwrap();

    clients.cloud_controller.get("/apps").await.unwrap();
    let sent = transport.requests();
    assert_eq!(sent[2].header(AUTHORIZATION), Some("bearer old-access"));
    assert_eq!(sent[1].header(AUTHORIZATION), None, "identity discovery is sent before the wrappers are bound");
}

#[tokio::test]
async fn expired_token_is_refreshed_and_request_resent() {
    let transport = healthy_platform();
    expired_then_ok(&transport);
    transport.route(
        &format!("{UAA}/oauth/token"),
        200,
        json!({"access_token": "new-access", "refresh_token": "new-refresh", "token_type": "bearer"}),
    );
    let cfg = config(API, None);
    let outputs = Arc::new(MemoryOutputs::default());
    let clients = bootstrap(&cfg, &transport, &outputs).new_clients(true).await.unwrap();

    let resp = clients.cloud_controller.get("apps").await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(cfg.access_token(), "bearer new-access");
    assert_eq!(cfg.refresh_token(), "new-refresh");

    let sent = transport.requests();
    let tail: Vec<_> = sent[2..].iter().map(|r| (r.url.path().to_string(), r.header(AUTHORIZATION).map(String::from))).collect();
    assert_eq!(tail[0], ("/v3/apps".to_string(), Some("bearer old-access".to_string())));
    assert_eq!(tail[1].0, "/oauth/token");
    assert!(tail[1].1.as_deref().unwrap().starts_with("Basic "), "token request keeps client credentials");
    assert_eq!(tail[2], ("/v3/apps".to_string(), Some("bearer new-access".to_string())));
    assert_eq!(sent.len(), 5);
}

#[tokio::test]
async fn failed_refresh_surfaces_the_identity_error() {
    let transport = healthy_platform();
    expired_then_ok(&transport);
    transport.route(&format!("{UAA}/oauth/token"), 400, json!({"error": "invalid_grant"}));
    let cfg = config(API, None);
    let outputs = Arc::new(MemoryOutputs::default());
    let clients = bootstrap(&cfg, &transport, &outputs).new_clients(true).await.unwrap();

    let err = clients.cloud_controller.get("/apps").await.unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert_eq!(cfg.access_token(), "bearer old-access", "cache untouched on failure");
}

#[tokio::test]
async fn dropped_identity_client_leaves_the_wrapper_inert() {
    let transport = healthy_platform();
    expired_then_ok(&transport);
    let outputs = Arc::new(MemoryOutputs::default());
    let mut clients = bootstrap(&config(API, None), &transport, &outputs).new_clients(true).await.unwrap();

    drop(clients.identity.take());
    let auth = wrapper::find_authentication(clients.cloud_controller.wrappers()).unwrap();
    assert!(auth.is_bound());
    assert!(auth.client().is_none());

    let err = clients.cloud_controller.get("/apps").await.unwrap_err();
    assert!(matches!(err, ConnectionError::InvalidToken(_)));
}
