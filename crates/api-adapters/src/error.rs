use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use domains::DomainError;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            ApiError::Domain(e) => match e {
                DomainError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
                DomainError::PermissionDenied(_) => (StatusCode::FORBIDDEN, "permission_denied"),
                DomainError::NotFound(..) => (StatusCode::NOT_FOUND, "not_found"),
                DomainError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
                DomainError::Conflict(_) | DomainError::VersionConflict { .. } => (StatusCode::CONFLICT, "conflict"),
                DomainError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream"),
                DomainError::Storage(_) | DomainError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let message = if status.is_server_error() {
            error!(error = %self, "request failed");
            "internal server error".to_owned()
        } else {
            self.to_string()
        };
        (status, Json(serde_json::json!({ "error": code, "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn domain_errors_map_to_statuses() {
        let cases = [
            (DomainError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (DomainError::PermissionDenied("x".into()), StatusCode::FORBIDDEN),
            (DomainError::not_found("ad", Uuid::nil()), StatusCode::NOT_FOUND),
            (DomainError::InvalidState("x".into()), StatusCode::CONFLICT),
            (DomainError::VersionConflict { monitor_id: Uuid::nil(), expected: 1 }, StatusCode::CONFLICT),
            (DomainError::Upstream("x".into()), StatusCode::BAD_GATEWAY),
            (DomainError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
