use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum AssessError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Measurement provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Stream aborted by caller")]
    StreamAborted,

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl AssessError {
    /// Stable machine label, used as the `error` field of failure messages.
    pub fn kind(&self) -> &'static str {
        match self {
            AssessError::Validation(_) => "validation_error",
            AssessError::ProviderUnavailable(_) => "provider_unavailable",
            AssessError::StreamAborted => "stream_aborted",
            AssessError::Cancelled(_) => "cancelled",
            AssessError::NotFound(_) => "not_found",
            AssessError::Io(_) => "io_error",
            AssessError::Other(_) => "internal_error",
        }
    }
}

impl IntoResponse for AssessError {
    fn into_response(self) -> Response {
        let status = match &self {
            AssessError::Validation(_) => StatusCode::BAD_REQUEST,
            AssessError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AssessError::StreamAborted => StatusCode::INTERNAL_SERVER_ERROR,
            AssessError::Cancelled(_) => StatusCode::CONFLICT,
            AssessError::NotFound(_) => StatusCode::NOT_FOUND,
            AssessError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AssessError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Errors raised by a page metrics provider call. Only `Unavailable` ends a
/// run; timeouts and navigation failures degrade the stage that hit them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("navigation failed: {0}")]
    Navigation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (AssessError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (
                AssessError::ProviderUnavailable("gone".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (AssessError::Cancelled("stop".into()), StatusCode::CONFLICT),
            (AssessError::NotFound("run x".into()), StatusCode::NOT_FOUND),
            (AssessError::StreamAborted, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(
            AssessError::ProviderUnavailable("x".into()).kind(),
            "provider_unavailable"
        );
        assert_eq!(AssessError::Validation("x".into()).kind(), "validation_error");
        assert_eq!(AssessError::Cancelled("x".into()).kind(), "cancelled");
        assert_eq!(AssessError::Other("x".into()).kind(), "internal_error");
    }
}
