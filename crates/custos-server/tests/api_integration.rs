//! HTTP API integration tests: drive the router against an in-memory store and a mock vault.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use custos_config::CustosConfig;
use custos_core::Address;
use custos_config::schema::ServerConfig;
use custos_runtime::{MockVault, SystemClock, VaultService};
use custos_store::Store;
use std::sync::Arc;

const OWNER: &str = "0x1111111111111111111111111111111111111111";
const AGENT: &str = "0x2222222222222222222222222222222222222222";
const VAULT: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const STRANGER: &str = "0x9999999999999999999999999999999999999999";

async fn setup_with(server_config: ServerConfig) -> (axum::Router, MockVault) {
    let vault = MockVault::new();
    let service = VaultService::new(
        &CustosConfig::default(),
        Store::open_in_memory().unwrap(),
        Arc::new(vault.clone()),
        Arc::new(SystemClock),
    )
    .unwrap();
    let router = custos_server::build_router(server_config, Arc::new(service));
    (router, vault)
}

async fn setup() -> (axum::Router, MockVault) {
    setup_with(ServerConfig::default()).await
}

/// Helper to read the full body as JSON.
async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Open an account in `mode` with a live session key; returns its id.
async fn open_account(app: &axum::Router, mode: &str) -> String {
    let (status, account) = send(
        app,
        "POST",
        "/api/v1/accounts",
        Some(json!({ "vault": VAULT, "owner": OWNER, "agent": AGENT, "mode": mode })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = account["id"].as_str().unwrap().to_string();

    let (status, key) = send(
        app,
        "POST",
        &format!("/api/v1/accounts/{id}/session-key"),
        Some(json!({ "caller": OWNER })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(key["address"].as_str().unwrap().starts_with("0x"));
    id
}

fn trade_body(value_usd: f64) -> Value {
    json!({
        "details": {
            "type": "trade",
            "protocol": "uniswap",
            "pool": "eth-usdc",
            "call": { "target": "0x3333333333333333333333333333333333333333", "value": "0" }
        },
        "value_usd": value_usd
    })
}

// ── Health ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = setup().await;
    let req = Request::get("/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

// ── Accounts ───────────────────────────────────────────────────

#[tokio::test]
async fn test_open_account_and_status() {
    let (app, _) = setup().await;
    let id = open_account(&app, "copilot").await;

    let (status, body) = send(&app, "GET", &format!("/api/v1/accounts/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["account"]["mode"], "copilot");
    assert_eq!(body["credential_valid"], true);
    assert_eq!(body["pending_confirmations"], 0);
}

#[tokio::test]
async fn test_invalid_address_rejected() {
    let (app, _) = setup().await;
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/accounts",
        Some(json!({ "vault": "not-an-address", "owner": OWNER, "mode": "advisor" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_unknown_account_is_404() {
    let (app, _) = setup().await;
    let (status, body) = send(
        &app,
        "GET",
        "/api/v1/accounts/00000000-0000-4000-8000-000000000000",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "account_not_found");
}

#[tokio::test]
async fn test_mode_change_requires_owner() {
    let (app, _) = setup().await;
    let id = open_account(&app, "advisor").await;

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/v1/accounts/{id}/mode"),
        Some(json!({ "caller": STRANGER, "mode": "full_auto" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "unauthorized");

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/v1/accounts/{id}/mode"),
        Some(json!({ "caller": OWNER, "mode": "full_auto" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "full_auto");
}

#[tokio::test]
async fn test_verify_roles_against_vault() {
    let (app, vault) = setup().await;
    let id = open_account(&app, "advisor").await;

    let (status, body) = send(&app, "GET", &format!("/api/v1/accounts/{id}/roles"), None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "execution_reverted");

    let _ = vault.with_roles(
        VAULT.parse::<Address>().unwrap(),
        OWNER.parse::<Address>().unwrap(),
        Some(STRANGER.parse::<Address>().unwrap()),
    );
    let (status, body) = send(&app, "GET", &format!("/api/v1/accounts/{id}/roles"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["owner_matches"], true);
    assert_eq!(body["agent_matches"], false);
}

// ── Actions ────────────────────────────────────────────────────

#[tokio::test]
async fn test_observer_denial_is_403() {
    let (app, vault) = setup().await;
    let id = open_account(&app, "observer").await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/accounts/{id}/actions"),
        Some(trade_body(10.0)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "policy_denied");
    assert_eq!(vault.call_count(), 0);
}

#[tokio::test]
async fn test_gated_action_confirm_flow() {
    let (app, vault) = setup().await;
    let id = open_account(&app, "copilot").await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/accounts/{id}/actions"),
        Some(trade_body(1_000.0)),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "awaiting_confirmation");
    let action_id = body["action"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/actions/{action_id}/confirm"),
        Some(json!({ "caller": AGENT })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "unauthorized");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/actions/{action_id}/confirm"),
        Some(json!({ "caller": OWNER })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "executed");
    assert!(body["action"]["tx_hash"].is_string());

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/actions/{action_id}/confirm"),
        Some(json!({ "caller": OWNER })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "executed");
    assert_eq!(vault.call_count(), 1);
}

#[tokio::test]
async fn test_cancel_action() {
    let (app, _) = setup().await;
    let id = open_account(&app, "advisor").await;
    let (_, body) = send(
        &app,
        "POST",
        &format!("/api/v1/accounts/{id}/actions"),
        Some(trade_body(5.0)),
    )
    .await;
    let action_id = body["action"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/actions/{action_id}/cancel"),
        Some(json!({ "caller": OWNER })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = send(&app, "GET", &format!("/api/v1/actions/{action_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "cancelled");
}

#[tokio::test]
async fn test_negative_value_is_422() {
    let (app, _) = setup().await;
    let id = open_account(&app, "full_auto").await;
    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/accounts/{id}/actions"),
        Some(trade_body(-5.0)),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation");
}

// ── Session keys ───────────────────────────────────────────────

#[tokio::test]
async fn test_session_key_lifecycle() {
    let (app, _) = setup().await;
    let id = open_account(&app, "full_auto").await;
    let uri = format!("/api/v1/accounts/{id}/session-key");

    let (status, body) = send(&app, "POST", &uri, Some(json!({ "caller": OWNER }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_active");

    let (status, body) = send(&app, "DELETE", &uri, Some(json!({ "caller": OWNER }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"], true);

    let (_, body) = send(&app, "DELETE", &uri, Some(json!({ "caller": OWNER }))).await;
    assert_eq!(body["revoked"], false);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/accounts/{id}/actions"),
        Some(trade_body(1.0)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "credential_invalid");
}

// ── Subscriptions ──────────────────────────────────────────────

#[tokio::test]
async fn test_subscription_auto_renewal() {
    let (app, _) = setup().await;
    let id = open_account(&app, "advisor").await;

    let (status, sub) = send(
        &app,
        "POST",
        &format!("/api/v1/accounts/{id}/subscriptions"),
        Some(json!({
            "caller": OWNER,
            "plan": "pro-monthly",
            "payee": "0x7777777777777777777777777777777777777777",
            "renewal_cost_usd": 99.0,
            "payment_value": "99000000000000000",
            "expires_at": "2030-01-01T00:00:00Z"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sub["auto_renewal_enabled"], false);
    let sub_id = sub["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/v1/subscriptions/{sub_id}/auto-renewal"),
        Some(json!({ "caller": OWNER, "enabled": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["auto_renewal_enabled"], true);

    // Observer switches it back off.
    send(
        &app,
        "PUT",
        &format!("/api/v1/accounts/{id}/mode"),
        Some(json!({ "caller": OWNER, "mode": "observer" })),
    )
    .await;
    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/v1/subscriptions/{sub_id}/auto-renewal"),
        Some(json!({ "caller": OWNER, "enabled": true })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation");
}

// ── Audit ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_audit_endpoint() {
    let (app, _) = setup().await;
    let id = open_account(&app, "full_auto").await;
    send(
        &app,
        "POST",
        &format!("/api/v1/accounts/{id}/actions"),
        Some(trade_body(5.0)),
    )
    .await;

    let (status, body) = send(&app, "GET", &format!("/api/v1/audit?account={id}&limit=3"), None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2]["event_type"], "action_executed");

    let (status, body) = send(&app, "GET", "/api/v1/audit/verify", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert!(body["entries"].as_i64().unwrap() >= 6);
}

// ── Auth ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_api_key_required() {
    let (app, _) = setup_with(ServerConfig {
        api_key: Some("secret".into()),
        ..Default::default()
    })
    .await;

    let (status, _) = send(&app, "GET", "/api/v1/audit", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::get("/api/v1/audit")
        .header("authorization", "Bearer secret")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Health stays open.
    let (status, _) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}
