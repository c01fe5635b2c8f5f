//!
//! credgate HTTP boundary
//! ----------------------
//! Axum surface over the resolver: per-request resolution, scope-guarded
//! routes, and the single place verification failures become transport
//! status codes (401 for authentication, 403 for scope, per the error model).
//!
//! Responsibilities:
//! - Resolve every inbound request through the `AuthResolver`.
//! - Diagnostics route exposing the resolved context.
//! - Push-based revocation endpoint driving cache invalidation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{extract::State, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::claims::AuthContext;
use crate::error::AuthError;
use crate::resolver::{AuthResolver, Resolution};
use crate::scope;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<AuthResolver>,
}

/// Map a terminal failure to its transport response. 401-class failures all
/// share a shape; the kind stays present for diagnostics-aware clients.
pub fn failure_response(err: &AuthError) -> (StatusCode, Json<serde_json::Value>) {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match err {
        AuthError::ScopeInsufficient { missing } => {
            json!({"status": "forbidden", "kind": err.kind_str(), "missing": missing})
        }
        _ => json!({"status": "unauthorized", "kind": err.kind_str()}),
    };
    (status, Json(body))
}

/// Resolve and gate a protected request in one step. `Unauthenticated` on a
/// protected route is a denial; present-but-invalid credentials carry their
/// specific kind through.
pub async fn require_capabilities(
    state: &AppState,
    headers: &HeaderMap,
    required: &[&str],
) -> Result<AuthContext, (StatusCode, Json<serde_json::Value>)> {
    match state.resolver.resolve(headers).await {
        Ok(Resolution::Resolved(ctx)) => match scope::authorize(&ctx, required) {
            Ok(()) => Ok(ctx),
            Err(err) => Err(failure_response(&err)),
        },
        Ok(Resolution::Unauthenticated) => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"status": "unauthorized", "kind": "no_credential"})),
        )),
        Err(err) => Err(failure_response(&err)),
    }
}

async fn whoami(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    // Anonymous-tolerant: only the absence of a credential passes through;
    // a present-but-invalid credential is still rejected.
    match state.resolver.resolve(&headers).await {
        Ok(Resolution::Unauthenticated) => {
            (StatusCode::OK, Json(json!({"status": "anonymous"})))
        }
        Ok(Resolution::Resolved(ctx)) => (
            StatusCode::OK,
            Json(json!({"status": "ok", "context": ctx})),
        ),
        Err(err) => failure_response(&err),
    }
}

#[derive(Debug, Deserialize)]
struct RevokePayload {
    subject_id: String,
}

async fn revoke_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RevokePayload>,
) -> impl IntoResponse {
    let ctx = match require_capabilities(&state, &headers, &["sessions:revoke"]).await {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };
    let dropped = state.resolver.revoke_subject(&payload.subject_id);
    info!(target: "auth", by = %ctx.subject_id, subject = %payload.subject_id, dropped, "session revoked");
    (
        StatusCode::OK,
        Json(json!({"status": "ok", "dropped": dropped})),
    )
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "credgate ok" }))
        .route("/whoami", get(whoami))
        .route("/session/revoke", post(revoke_session))
        .with_state(state)
}

/// Start the credgate HTTP server bound to the given port.
pub async fn run_with_port(port: u16, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    info!(target: "startup", %addr, "credgate listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
