use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::responses::RequestMeta;

pub const E_BAD_SIGNATURE: &str = "BAD_SIGNATURE";
pub const E_BAD_PAYLOAD: &str = "BAD_PAYLOAD";
pub const E_DB_FAILURE: &str = "DB_FAILURE";
pub const E_NOT_FOUND: &str = "NOT_FOUND";

/// Failures while ingesting one webhook delivery.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("signature header missing")]
    MissingSignature,
    #[error("signature does not match payload")]
    InvalidSignature,
    #[error("signature timestamp outside tolerance")]
    StaleSignature,
    #[error("malformed event payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl WebhookError {
    /// Whether the processor should redeliver after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WebhookError::Storage(_))
    }

    fn into_api_error(self) -> (ApiError, &'static str) {
        let message = self.to_string();
        match self {
            WebhookError::MissingSignature
            | WebhookError::InvalidSignature
            | WebhookError::StaleSignature => (ApiError::Unauthorized(message), E_BAD_SIGNATURE),
            WebhookError::MalformedPayload(_) => (ApiError::BadRequest(message), E_BAD_PAYLOAD),
            WebhookError::Storage(e) => (ApiError::Internal(e.into()), E_DB_FAILURE),
        }
    }

    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        let (error, code) = self.into_api_error();
        error.with_meta(meta).with_code(code)
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Internal(anyhow::Error),
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
        }
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.error {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(e) => {
                error!("internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_failures_are_retryable() {
        assert!(!WebhookError::InvalidSignature.is_retryable());
        assert!(!WebhookError::MissingSignature.is_retryable());
        assert!(WebhookError::Storage(sqlx::Error::PoolTimedOut).is_retryable());
    }
}
