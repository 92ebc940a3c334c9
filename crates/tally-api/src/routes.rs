use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tally_core::sync::{Envelope, SyncRequest};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AuthenticatedUser, StaticTokenVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::ledger::Ledger;
use crate::rate_limit::{user_fingerprint, RateLimitMetricsSnapshot, SyncBudget, SyncRateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    verifier: Arc<StaticTokenVerifier>,
    rate_limiter: Arc<SyncRateLimiter>,
    ledger: Arc<Ledger>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, ledger: Arc<Ledger>) -> Self {
        Self {
            verifier: Arc::new(StaticTokenVerifier::from_config(&config)),
            rate_limiter: Arc::new(SyncRateLimiter::from_config(&config)),
            ledger,
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync", post(sync))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.config.server_version.clone(),
        timestamp: Utc::now().timestamp(),
        rate_limit: state.rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.verifier.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn sync(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Bytes,
) -> Result<Json<Envelope<Value>>, AppError> {
    let request: SyncRequest = serde_json::from_slice(&body).map_err(|error| {
        tracing::debug!("Rejected sync request body: {error}");
        AppError::bad_request("Invalid action")
    })?;

    let budget = if request.is_push() {
        SyncBudget::Push
    } else {
        SyncBudget::Pull
    };
    state.rate_limiter.check(budget, &user.user_id).await?;

    let action = request.action();
    let data = state.ledger.handle(&user.user_id, request).await?;
    tracing::info!(
        action,
        user = user_fingerprint(&user.user_id),
        "Handled sync request"
    );
    Ok(Json(Envelope::ok(data)))
}
