use std::fmt;

use serde::Serialize;

use crate::store::StoreError;

/// A per-operation failure reported to the initiating caller via its ack.
///
/// These never close the connection and never affect other sessions; the
/// dispatcher catches them at the operation boundary and serializes them
/// into the ack payload.
#[derive(Debug)]
pub struct DispatchError {
    pub kind: &'static str,
    pub message: String,
}

impl DispatchError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: "VALIDATION_ERROR",
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            kind: "FORBIDDEN",
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            kind: "CONFLICT",
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: "NOT_FOUND",
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: "INTERNAL_ERROR",
            message: message.into(),
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for DispatchError {}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        tracing::error!(%err, "store error");
        Self::internal("An internal error occurred")
    }
}

/// The `error` object carried in a failed ack.
#[derive(Debug, Clone, Serialize)]
pub struct AckError {
    pub kind: String,
    pub message: String,
}

impl From<&DispatchError> for AckError {
    fn from(err: &DispatchError) -> Self {
        Self {
            kind: err.kind.to_string(),
            message: err.message.clone(),
        }
    }
}
