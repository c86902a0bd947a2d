use axum::{
    extract::{
        FromRequest, FromRequestParts,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Json as ResponseJson, Response},
};
use services::services::{ab_testing::AbTestingError, invoice::InvoiceError};
use thiserror::Error;
use tracing::{error, warn};
use utils::response::ApiResponse;

const INTERNAL_ERROR_MESSAGE: &str = "Interner Serverfehler";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Invoice(#[from] InvoiceError),
    #[error(transparent)]
    AbTesting(#[from] AbTestingError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// JSON body extractor that rejects malformed payloads and unknown enum values with a 400.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Query string extractor with the same rejection mapping as [`ApiJson`].
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::Invoice(err) => match err {
                InvoiceError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "Rechnung nicht gefunden".to_string())
                }
                InvoiceError::NotEditable(status) => (
                    StatusCode::CONFLICT,
                    format!("Rechnung im Status {status} kann nicht mehr bearbeitet werden"),
                ),
                InvoiceError::DuplicateNumber(number) => (
                    StatusCode::CONFLICT,
                    format!("Rechnungsnummer {number} existiert bereits"),
                ),
                InvoiceError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, format!("Ungültige Eingabe: {msg}"))
                }
                InvoiceError::Database(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE.to_string())
                }
            },
            ApiError::AbTesting(err) => match err {
                AbTestingError::ConfigMissing => (
                    StatusCode::NOT_FOUND,
                    "A/B-Konfiguration nicht gefunden".to_string(),
                ),
                AbTestingError::ExperimentNotFound(_) => {
                    (StatusCode::NOT_FOUND, "Experiment nicht gefunden".to_string())
                }
                AbTestingError::NoVariants(_) => {
                    (StatusCode::NOT_FOUND, "Keine Varianten gefunden".to_string())
                }
                AbTestingError::VariantNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "Variante nicht gefunden".to_string())
                }
                AbTestingError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, format!("Ungültige Eingabe: {msg}"))
                }
                AbTestingError::Database(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE.to_string())
                }
            },
            ApiError::Database(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE.to_string())
            }
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, format!("Ungültige Anfrage: {msg}"))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, ResponseJson(ApiResponse::<()>::error(message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use db::models::invoice::InvoiceStatus;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ApiError::from(InvoiceError::NotFound(Uuid::new_v4())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(InvoiceError::NotEditable(InvoiceStatus::Sent)),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(InvoiceError::Validation("x".to_string())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(AbTestingError::ConfigMissing),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(sqlx::Error::PoolTimedOut),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::BadRequest("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let (_, message) =
            ApiError::from(InvoiceError::Database(sqlx::Error::PoolTimedOut)).status_and_message();
        assert_eq!(message, INTERNAL_ERROR_MESSAGE);
    }
}
