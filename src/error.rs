use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

/// Error taxonomy of the definition execution engine.
///
/// Responses never carry raw driver or stack detail; the sensitive variants
/// log the full detail server-side and return a sanitized body.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("request validation failed")]
    Validation { violations: Vec<FieldViolation> },

    /// Injection pattern match, write-capability violation or disallowed
    /// logic kind. `detail` is logged, never returned.
    #[error("request rejected by security policy")]
    Security { detail: String },

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("{scope} exceeded its {limit_secs}s budget")]
    Timeout {
        scope: &'static str,
        limit_secs: u64,
    },

    #[error("immutable policy: cannot {action} a persisted {resource}")]
    ImmutablePolicy {
        action: &'static str,
        resource: &'static str,
    },

    #[error("duplicate {kind}: {identity}")]
    Duplicate { kind: &'static str, identity: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn security(detail: impl Into<String>) -> Self {
        EngineError::Security {
            detail: detail.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        EngineError::Execution(message.into())
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::Validation { .. } => "VALIDATION_ERROR",
            EngineError::Security { .. } => "SECURITY_ERROR",
            EngineError::Execution(_) => "EXECUTION_ERROR",
            EngineError::Timeout { .. } => "TIMEOUT_ERROR",
            EngineError::ImmutablePolicy { .. } => "IMMUTABLE_POLICY_VIOLATION",
            EngineError::Duplicate { .. } => "DUPLICATE_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::Validation { .. } => StatusCode::BAD_REQUEST,
            EngineError::Security { .. } => StatusCode::BAD_REQUEST,
            EngineError::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            EngineError::ImmutablePolicy { .. } => StatusCode::FORBIDDEN,
            EngineError::Duplicate { .. } => StatusCode::CONFLICT,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to the caller.
    fn public_message(&self) -> String {
        match self {
            EngineError::Security { .. } => {
                "request was rejected by the security policy".to_string()
            }
            EngineError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> axum::response::Response {
        match &self {
            EngineError::Security { detail } => {
                log::warn!("security rejection: {}", detail);
            }
            EngineError::Internal(err) => {
                log::error!("internal error: {:#}", err);
            }
            EngineError::Execution(message) => {
                log::warn!("execution failure: {}", message);
            }
            _ => {}
        }

        let details = match &self {
            EngineError::Validation { violations } => {
                Some(serde_json::json!({ "violations": violations }))
            }
            EngineError::NotFound { kind, id } => {
                Some(serde_json::json!({ "kind": kind, "id": id }))
            }
            EngineError::Duplicate { kind, identity } => {
                Some(serde_json::json!({ "kind": kind, "identity": identity }))
            }
            EngineError::Timeout { scope, limit_secs } => {
                Some(serde_json::json!({ "scope": scope, "limit_secs": limit_secs }))
            }
            _ => None,
        };

        let body = ErrorBody {
            success: false,
            error: self.error_code(),
            message: self.public_message(),
            details,
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_error_message_is_generic() {
        let err = EngineError::security("UNION SELECT probe in query payload");
        assert!(!err.public_message().contains("UNION"));
        assert_eq!(err.error_code(), "SECURITY_ERROR");
    }

    #[test]
    fn timeout_is_distinguishable_from_execution() {
        let timeout = EngineError::Timeout {
            scope: "step",
            limit_secs: 30,
        };
        let exec = EngineError::execution("connection reset");
        assert_ne!(timeout.error_code(), exec.error_code());
        assert_ne!(timeout.status_code(), exec.status_code());
    }
}
