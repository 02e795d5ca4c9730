//! Error taxonomy for feed personalization.
//!
//! Missing signal data is never an error: it degrades the matching score
//! component to zero.

use axum::{
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Failure reported by a storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PersonalizationError {
    /// Malformed filter value or out-of-range paging.
    #[error("invalid request: {0}")]
    Validation(String),
    /// Unknown user, feed or article reference.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
    /// Structurally invalid input handed to a pure component.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, PersonalizationError>;

impl PersonalizationError {
    pub fn not_found(entity: &'static str, id: u64) -> Self {
        PersonalizationError::NotFound { entity, id }
    }

    /// Stable error code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            PersonalizationError::Validation(_) => "INVALID_REQUEST",
            PersonalizationError::NotFound { .. } => "NOT_FOUND",
            PersonalizationError::InvalidInput(_) => "INVALID_INPUT",
            PersonalizationError::Storage(_) => "STORAGE",
        }
    }

    pub fn http_code(&self) -> StatusCode {
        match self {
            PersonalizationError::Validation(_) => StatusCode::BAD_REQUEST,
            PersonalizationError::NotFound { .. } => StatusCode::NOT_FOUND,
            PersonalizationError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PersonalizationError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<QueryRejection> for PersonalizationError {
    fn from(rejection: QueryRejection) -> Self {
        PersonalizationError::Validation(rejection.body_text())
    }
}

/// Http error response
#[derive(Debug, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    pub error: HttpError,
}

/// Error JSON shape
#[derive(Debug, Serialize, Deserialize)]
pub struct HttpError {
    pub code: String,
    pub message: String,
}

impl IntoResponse for PersonalizationError {
    fn into_response(self) -> Response {
        let status = self.http_code();
        let body = HttpErrorResponse {
            error: HttpError {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
