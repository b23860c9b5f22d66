//! HTTP routes: health check, account registration, and the gateway mount.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use parley_common::id::prefix;
use parley_common::prefixed_ulid;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/auth/register", post(register))
        .merge(crate::gateway::server::router())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: String,
}

/// Create an account and issue its opaque gateway credential. Real
/// deployments front this with a proper identity provider; the gateway only
/// ever sees the credential through `AuthVerifier`.
async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let username = body.username.trim();
    if username.is_empty() || username.len() > 32 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": { "kind": "VALIDATION_ERROR", "message": "Username must be 1-32 characters" }
            })),
        ));
    }

    let token = prefixed_ulid(prefix::TOKEN);
    let user = state.store.create_user(username, &token).await.map_err(|err| {
        tracing::debug!(%err, "registration rejected");
        (
            StatusCode::CONFLICT,
            Json(json!({
                "error": { "kind": "CONFLICT", "message": "Username is already taken" }
            })),
        )
    })?;

    Ok((StatusCode::CREATED, Json(json!({ "user": user, "token": token }))))
}
