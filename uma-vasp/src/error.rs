//! Error types of the receiving VASP server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uma::webhook::WebhookError;
use uma::{FailureReason, UmaError};

/// Errors returned by the server's handlers.
#[derive(Debug, thiserror::Error)]
pub enum VaspError {
    /// A handshake step failed.
    #[error(transparent)]
    Handshake(#[from] UmaError),

    /// A webhook did not verify.
    #[error(transparent)]
    Webhook(#[from] WebhookError),

    /// No webhook secret is configured.
    #[error("webhooks are not enabled")]
    WebhooksDisabled,

    /// A required request header is absent.
    #[error("missing {0} header")]
    MissingHeader(&'static str),
}

/// HTTP status a handshake failure is reported with.
#[must_use]
pub const fn status_for(reason: FailureReason) -> StatusCode {
    match reason {
        FailureReason::MalformedMessage
        | FailureReason::InvalidState
        | FailureReason::InvoiceExpired => StatusCode::BAD_REQUEST,
        FailureReason::SignatureInvalid => StatusCode::UNAUTHORIZED,
        FailureReason::ComplianceRejected => StatusCode::FORBIDDEN,
        FailureReason::UserNotFound => StatusCode::NOT_FOUND,
        FailureReason::NonceReplay => StatusCode::CONFLICT,
        FailureReason::UnsupportedVersion => StatusCode::PRECONDITION_FAILED,
        FailureReason::CurrencyOutOfRange | FailureReason::UnsupportedCurrency => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        FailureReason::KeyDiscoveryFailed | FailureReason::RequestFailed => {
            StatusCode::FAILED_DEPENDENCY
        }
        FailureReason::Timeout => StatusCode::GATEWAY_TIMEOUT,
        FailureReason::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for VaspError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Handshake(err) => (status_for(err.reason()), err.to_response_body()),
            Self::Webhook(WebhookError::SignatureMismatch) | Self::MissingHeader(_) => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "status": "ERROR", "message": self.to_string() }),
            ),
            Self::Webhook(WebhookError::InvalidBody(_)) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "status": "ERROR", "message": self.to_string() }),
            ),
            Self::WebhooksDisabled => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "status": "ERROR", "message": self.to_string() }),
            ),
        };
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_failures_keep_their_reason_on_the_wire() {
        let err = UmaError::malformed("nonce", "missing nonce");
        let response = VaspError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn statuses_follow_the_failure_reason() {
        assert_eq!(status_for(FailureReason::SignatureInvalid), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(FailureReason::NonceReplay), StatusCode::CONFLICT);
        assert_eq!(
            status_for(FailureReason::UnsupportedVersion),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(status_for(FailureReason::Internal), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn bad_webhook_signatures_are_unauthorized() {
        let response = VaspError::from(WebhookError::SignatureMismatch).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
