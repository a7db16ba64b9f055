use actix_web::http::{StatusCode, header};
use actix_web::{HttpResponse, ResponseError};
use neumo_shared::ErrorResponse;

use crate::auth::jwt::JwtError;
use crate::db::RepositoryError;
use crate::imaging::ImageError;
use crate::inference::InferenceError;
use crate::storage::StorageError;

/// Outcome kinds surfaced by the service layer. The routing layer only maps
/// these onto status codes.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Incorrect email or password")]
    InvalidCredentials,
    #[error("Could not validate credentials")]
    InvalidToken,
    #[error("Email already registered")]
    DuplicateEmail,
    #[error("Username already taken")]
    DuplicateUsername,
    #[error("{0}")]
    Validation(String),
    #[error("Prediction not found or not authorized")]
    NotFoundOrForbidden,
    #[error("Not enough permissions")]
    Forbidden,
    #[error("User not found")]
    UserNotFound,
    #[error("Prediction failed: could not decode image: {0}")]
    ImageDecode(String),
    #[error("Prediction failed: model unavailable: {0}")]
    ModelLoad(String),
    #[error("Prediction failed: storage error: {0}")]
    Storage(String),
    #[error("Prediction failed: {0}")]
    Upstream(String),
    #[error("Database error: {0}")]
    Database(String),
}

impl From<JwtError> for ServiceError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Encoding(_) | JwtError::LifetimeOverflow => {
                ServiceError::Upstream(err.to_string())
            }
            other => {
                log::debug!("Token rejected: {}", other);
                ServiceError::InvalidToken
            }
        }
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        ServiceError::Database(err.to_string())
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Storage(err.to_string())
    }
}

impl From<ImageError> for ServiceError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::Decode(msg) => ServiceError::ImageDecode(msg),
            ImageError::TooLarge { .. } | ImageError::UnsupportedType(_) => {
                ServiceError::Validation(err.to_string())
            }
            ImageError::Worker(msg) => ServiceError::Upstream(msg),
        }
    }
}

impl From<InferenceError> for ServiceError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::ModelLoad(msg) => ServiceError::ModelLoad(msg),
            other => ServiceError::Upstream(other.to_string()),
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidCredentials | ServiceError::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            ServiceError::DuplicateEmail | ServiceError::DuplicateUsername => StatusCode::CONFLICT,
            ServiceError::Validation(_) | ServiceError::ImageDecode(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFoundOrForbidden | ServiceError::UserNotFound => StatusCode::NOT_FOUND,
            ServiceError::Forbidden => StatusCode::FORBIDDEN,
            ServiceError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Storage(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Upstream(_) | ServiceError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        }

        let mut builder = HttpResponse::build(status);
        if status == StatusCode::UNAUTHORIZED {
            builder.insert_header((header::WWW_AUTHENTICATE, "Bearer"));
        }
        builder.json(ErrorResponse {
            error: self.to_string(),
        })
    }
}
