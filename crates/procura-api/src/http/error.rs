//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use procura_core::engine::EngineError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Workflow engine errors.
    Engine(EngineError),
    /// Request validation error.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl AppError {
    /// HTTP status and machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Engine(EngineError::ConcurrentModification(_)) => {
                (StatusCode::CONFLICT, "CONCURRENT_MODIFICATION")
            }
            AppError::Engine(EngineError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Engine(EngineError::InvalidState(_)) => {
                (StatusCode::CONFLICT, "INVALID_STATE")
            }
            AppError::Engine(EngineError::AlreadyDecided { .. }) => {
                (StatusCode::CONFLICT, "ALREADY_DECIDED")
            }
            AppError::Engine(EngineError::UnknownBranch(_)) => {
                (StatusCode::BAD_REQUEST, "UNKNOWN_BRANCH")
            }
            AppError::Engine(EngineError::PartialWrite { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "PARTIAL_WRITE")
            }
            AppError::Engine(EngineError::InvalidInput(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_INPUT")
            }
            AppError::Engine(EngineError::NodeFailed { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "NODE_FAILED")
            }
            AppError::Engine(EngineError::StepLimitExceeded { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STEP_LIMIT_EXCEEDED")
            }
            AppError::Engine(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ENGINE_ERROR"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Engine(e) => e.to_string(),
            AppError::Validation(msg) | AppError::Internal(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = self.message();

        if status.is_server_error() {
            tracing::error!(code, %message, "request failed");
        } else {
            tracing::debug!(code, %message, "request rejected");
        }

        let body = serde_json::to_string(&ApiResponse::error(code, &message, String::new(), 0))
            .unwrap_or_else(|_| {
                r#"{"data":null,"errors":[{"code":"SERIALIZATION_ERROR","message":"Failed to serialize response"}]}"#.to_string()
            });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_types::approval::BranchDecision;
    use procura_types::workflow::InstanceId;

    fn status_of(err: EngineError) -> (StatusCode, &'static str) {
        AppError::from(err).status_and_code()
    }

    #[test]
    fn engine_errors_map_to_distinct_codes() {
        assert_eq!(
            status_of(EngineError::ConcurrentModification(InstanceId::new("v1"))),
            (StatusCode::CONFLICT, "CONCURRENT_MODIFICATION")
        );
        assert_eq!(
            status_of(EngineError::NotFound("v1".to_string())),
            (StatusCode::NOT_FOUND, "NOT_FOUND")
        );
        assert_eq!(
            status_of(EngineError::InvalidState("terminal".to_string())),
            (StatusCode::CONFLICT, "INVALID_STATE")
        );
        assert_eq!(
            status_of(EngineError::AlreadyDecided {
                branch: "legal".to_string(),
                decision: BranchDecision::Approved,
            }),
            (StatusCode::CONFLICT, "ALREADY_DECIDED")
        );
        assert_eq!(
            status_of(EngineError::UnknownBranch("marketing".to_string())),
            (StatusCode::BAD_REQUEST, "UNKNOWN_BRANCH")
        );
        assert_eq!(
            status_of(EngineError::PartialWrite {
                instance_id: InstanceId::new("v1"),
                sequence: 4,
                message: "disk full".to_string(),
            }),
            (StatusCode::SERVICE_UNAVAILABLE, "PARTIAL_WRITE")
        );
        assert_eq!(
            status_of(EngineError::InvalidInput("amount".to_string())),
            (StatusCode::BAD_REQUEST, "INVALID_INPUT")
        );
    }

    #[test]
    fn into_response_sets_status() {
        let resp = AppError::Engine(EngineError::NotFound("v9".to_string())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = AppError::Internal("boom".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
