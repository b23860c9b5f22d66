//! Handshake authentication capability.
//!
//! Credential verification happens once, at connection-establishment time,
//! before the WebSocket upgrade completes. A connection that fails here never
//! becomes a session.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::store::Store;

/// The authenticated principal attached to a session. Immutable for the
/// session's lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

/// Handshake-time failures. The connection is refused; none of these reach
/// an active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    Missing,
    Malformed,
    Expired,
    Invalid,
    PrincipalNotFound,
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Missing => "AUTH_MISSING",
            AuthError::Malformed => "AUTH_MALFORMED",
            AuthError::Expired => "AUTH_EXPIRED",
            AuthError::Invalid => "AUTH_INVALID",
            AuthError::PrincipalNotFound => "AUTH_PRINCIPAL_NOT_FOUND",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AuthError::Missing => "Credential is required",
            AuthError::Malformed => "Credential is malformed",
            AuthError::Expired => "Credential has expired",
            AuthError::Invalid => "Credential is invalid",
            AuthError::PrincipalNotFound => "No user for this credential",
        }
    }
}

/// Validates a bearer credential and resolves it to a stable identity.
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Store-backed verifier: the credential is an opaque token registered
/// alongside the user record.
pub struct TokenVerifier {
    store: Arc<dyn Store>,
}

impl TokenVerifier {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuthVerifier for TokenVerifier {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::Missing);
        }
        if credential.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(AuthError::Malformed);
        }

        let user = self
            .store
            .find_user_by_credential(credential)
            .await
            .map_err(|err| {
                tracing::error!(%err, "credential lookup failed");
                AuthError::Invalid
            })?
            .ok_or(AuthError::PrincipalNotFound)?;

        Ok(Identity {
            user_id: user.id,
            username: user.username,
        })
    }
}
