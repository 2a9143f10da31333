//! # custos-server
//!
//! HTTP JSON API over [`VaultService`]. Provides:
//!
//! - Account lifecycle: open, inspect, change mode/agent/pause
//! - Agent proposals and owner confirmation / cancellation
//! - Session-key create, revoke, rotate
//! - Subscriptions and the auto-renewal opt-in
//! - Audit log queries and chain verification
//!
//! Owner-only routes take the acting address as `caller` in the JSON body. The core
//! compares it with the account owner; proving control of that address (a wallet
//! signature) is the job of whatever sits in front of this API.

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use custos_config::schema::ServerConfig;
use custos_core::{
    Action, ActionDetails, Address, AutonomyMode, CustosError, SessionCredential, Subscription,
    VaultAccount,
};
use custos_runtime::{AccountStatus, ActionOutcome, NewSubscription, RoleCheck, VaultService};
use custos_store::{AuditEntry, AuditFilter};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared server state.
pub struct AppState {
    pub config: ServerConfig,
    pub service: Arc<VaultService>,
}

/// A [`CustosError`] rendered as `{ "error": kind, "message": ... }` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub CustosError);

impl From<CustosError> for ApiError {
    fn from(e: CustosError) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// Status code for each error kind.
pub fn status_for(error: &CustosError) -> StatusCode {
    match error {
        CustosError::PolicyDenied { .. }
        | CustosError::CredentialInvalid { .. }
        | CustosError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        CustosError::Validation(_) | CustosError::ConfigValidation { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        CustosError::AccountNotFound(_)
        | CustosError::ActionNotFound(_)
        | CustosError::SubscriptionNotFound(_) => StatusCode::NOT_FOUND,
        CustosError::AlreadyActive { .. } => StatusCode::CONFLICT,
        CustosError::ExecutionReverted { .. } => StatusCode::BAD_GATEWAY,
        CustosError::SchedulerTransient(_) => StatusCode::SERVICE_UNAVAILABLE,
        CustosError::Store(_)
        | CustosError::AuditChainBroken { .. }
        | CustosError::Config(_)
        | CustosError::Io(_)
        | CustosError::Serialization(_)
        | CustosError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(error = %self.0, kind = self.0.kind(), "request failed");
        }
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Request / response bodies ──────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Deserialize)]
struct OpenAccountRequest {
    vault: Address,
    owner: Address,
    #[serde(default)]
    agent: Option<Address>,
    mode: AutonomyMode,
}

#[derive(Deserialize)]
struct CallerRequest {
    caller: Address,
}

#[derive(Deserialize)]
struct ModeRequest {
    caller: Address,
    mode: AutonomyMode,
}

#[derive(Deserialize)]
struct AgentRequest {
    caller: Address,
    agent: Option<Address>,
}

#[derive(Deserialize)]
struct PausedRequest {
    caller: Address,
    paused: bool,
}

#[derive(Deserialize)]
struct ProposeRequest {
    details: ActionDetails,
    value_usd: f64,
}

#[derive(Deserialize)]
struct SubscriptionRequest {
    caller: Address,
    plan: String,
    payee: Address,
    renewal_cost_usd: f64,
    #[serde(with = "custos_core::executor::u128_string")]
    payment_value: u128,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    auto_renewal_enabled: bool,
}

#[derive(Deserialize)]
struct AutoRenewalRequest {
    caller: Address,
    enabled: bool,
}

#[derive(Deserialize)]
struct AuditParams {
    account: Option<Uuid>,
    action: Option<Uuid>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Serialize)]
struct ActionResponse {
    status: &'static str,
    action: Action,
}

impl From<ActionOutcome> for ActionResponse {
    fn from(outcome: ActionOutcome) -> Self {
        Self {
            status: outcome.status(),
            action: outcome.into_action(),
        }
    }
}

#[derive(Serialize)]
struct RevokeResponse {
    revoked: bool,
}

#[derive(Serialize)]
struct VerifyResponse {
    valid: bool,
    entries: i64,
}

/// Build the Axum router.
pub fn build_router(config: ServerConfig, service: Arc<VaultService>) -> Router {
    let state = Arc::new(AppState {
        config: config.clone(),
        service,
    });

    let api_routes = Router::new()
        .route("/api/v1/accounts", post(open_account_handler))
        .route("/api/v1/accounts/{id}", get(account_status_handler))
        .route("/api/v1/accounts/{id}/mode", put(set_mode_handler))
        .route("/api/v1/accounts/{id}/agent", put(set_agent_handler))
        .route("/api/v1/accounts/{id}/paused", put(set_paused_handler))
        .route("/api/v1/accounts/{id}/roles", get(verify_roles_handler))
        .route("/api/v1/accounts/{id}/actions", post(propose_handler))
        .route(
            "/api/v1/accounts/{id}/session-key",
            post(create_key_handler).delete(revoke_key_handler),
        )
        .route(
            "/api/v1/accounts/{id}/session-key/rotate",
            post(rotate_key_handler),
        )
        .route(
            "/api/v1/accounts/{id}/subscriptions",
            post(add_subscription_handler),
        )
        .route("/api/v1/actions/{id}", get(get_action_handler))
        .route("/api/v1/actions/{id}/confirm", post(confirm_handler))
        .route("/api/v1/actions/{id}/cancel", post(cancel_handler))
        .route(
            "/api/v1/subscriptions/{id}/auto-renewal",
            put(auto_renewal_handler),
        )
        .route("/api/v1/audit", get(audit_handler))
        .route("/api/v1/audit/verify", get(audit_verify_handler));

    // Apply API key auth if configured
    let api_routes = if config.api_key.is_some() {
        api_routes.layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
    } else {
        api_routes
    };

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .merge(api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

/// Middleware that checks the Authorization header against the configured API key.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(ref expected_key) = state.config.api_key {
        let provided = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match provided {
            Some(key) if key == expected_key => {}
            _ => {
                warn!("unauthorized API request: invalid or missing API key");
                return Err(StatusCode::UNAUTHORIZED);
            }
        }
    }
    Ok(next.run(request).await)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

// ── Accounts ───────────────────────────────────────────────────

async fn open_account_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpenAccountRequest>,
) -> ApiResult<(StatusCode, Json<VaultAccount>)> {
    let account = state
        .service
        .open_account(req.vault, req.owner, req.agent, req.mode)?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn account_status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AccountStatus>> {
    Ok(Json(state.service.get_account_status(id).await?))
}

/// Compare the stored owner/agent with what the vault contract reports.
async fn verify_roles_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RoleCheck>> {
    Ok(Json(state.service.verify_roles(id).await?))
}

async fn set_mode_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ModeRequest>,
) -> ApiResult<Json<VaultAccount>> {
    let account = state
        .service
        .set_autonomy_mode(&req.caller, id, req.mode)
        .await?;
    Ok(Json(account))
}

async fn set_agent_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AgentRequest>,
) -> ApiResult<Json<VaultAccount>> {
    Ok(Json(state.service.set_agent(&req.caller, id, req.agent).await?))
}

async fn set_paused_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<PausedRequest>,
) -> ApiResult<Json<VaultAccount>> {
    Ok(Json(state.service.set_paused(&req.caller, id, req.paused).await?))
}

// ── Actions ────────────────────────────────────────────────────

async fn propose_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ProposeRequest>,
) -> ApiResult<(StatusCode, Json<ActionResponse>)> {
    let outcome = state
        .service
        .propose_action(id, req.details, req.value_usd)
        .await?;
    let status = match outcome {
        ActionOutcome::AwaitingConfirmation(_) => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome.into())))
}

async fn get_action_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Action>> {
    Ok(Json(state.service.get_action(id)?))
}

async fn confirm_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CallerRequest>,
) -> ApiResult<Json<ActionResponse>> {
    let outcome = state.service.confirm_action(&req.caller, id).await?;
    Ok(Json(outcome.into()))
}

async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CallerRequest>,
) -> ApiResult<Json<ActionResponse>> {
    let outcome = state.service.cancel_action(&req.caller, id).await?;
    Ok(Json(outcome.into()))
}

// ── Session keys ───────────────────────────────────────────────

async fn create_key_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CallerRequest>,
) -> ApiResult<(StatusCode, Json<SessionCredential>)> {
    let credential = state.service.create_session_key(&req.caller, id)?;
    Ok((StatusCode::CREATED, Json(credential)))
}

async fn revoke_key_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CallerRequest>,
) -> ApiResult<Json<RevokeResponse>> {
    let revoked = state.service.revoke_session_key(&req.caller, id)?;
    Ok(Json(RevokeResponse { revoked }))
}

async fn rotate_key_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CallerRequest>,
) -> ApiResult<Json<SessionCredential>> {
    Ok(Json(state.service.rotate_session_key(&req.caller, id)?))
}

// ── Subscriptions ──────────────────────────────────────────────

async fn add_subscription_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<SubscriptionRequest>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    let new = NewSubscription {
        plan: req.plan,
        payee: req.payee,
        renewal_cost_usd: req.renewal_cost_usd,
        payment_value: req.payment_value,
        expires_at: req.expires_at,
        auto_renewal_enabled: req.auto_renewal_enabled,
    };
    let sub = state.service.add_subscription(&req.caller, id, new).await?;
    Ok((StatusCode::CREATED, Json(sub)))
}

async fn auto_renewal_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AutoRenewalRequest>,
) -> ApiResult<Json<Subscription>> {
    let sub = state
        .service
        .set_auto_renewal(&req.caller, id, req.enabled)
        .await?;
    Ok(Json(sub))
}

// ── Audit ──────────────────────────────────────────────────────

async fn audit_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditParams>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    let filter = AuditFilter {
        account_id: params.account,
        action_id: params.action,
        limit: Some(params.limit),
    };
    Ok(Json(state.service.audit_log(&filter)?))
}

async fn audit_verify_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<VerifyResponse>> {
    let entries = state.service.verify_audit()?;
    Ok(Json(VerifyResponse {
        valid: true,
        entries,
    }))
}

/// Start the HTTP server and serve until `shutdown` resolves.
pub async fn start_server(
    config: ServerConfig,
    service: Arc<VaultService>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> custos_core::Result<()> {
    let listen = config.listen.clone();
    let router = build_router(config, service);

    info!(listen = %listen, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| CustosError::Config(format!("failed to bind {listen}: {e}")))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
