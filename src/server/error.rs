//! Mapping library errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::{Error, ErrorKind};

/// Error body: `{"detail": ..., "kind": ...}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
    kind: &'static str,
}

/// A request failure, rendered as JSON tagged with its [`ErrorKind`].
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    /// Response status for this error.
    ///
    /// Every kind answers 500; clients tell them apart by the `kind` field.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Classification carried in the response body.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.0.kind()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        tracing::error!("Error ({}): {}", kind.as_str(), self.0);

        let body = ErrorBody {
            detail: self.0.to_string(),
            kind: kind.as_str(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_is_internal_error() {
        for err in [
            Error::invalid("scale", "must be positive"),
            Error::ModelUnavailable,
            Error::Worker {
                reason: "panicked".to_string(),
            },
        ] {
            let api = ApiError::from(err);
            assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[tokio::test]
    async fn test_response_keeps_kind() {
        use http_body_util::BodyExt;

        let response = ApiError::from(Error::ModelUnavailable).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["kind"], "model_unavailable");
        assert_eq!(json["detail"], "Model failed to load. Check server logs.");
    }
}
