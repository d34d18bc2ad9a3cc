use axum::http::StatusCode;
use thiserror::Error;
use tracing::error;

/// Outcome of every holder operation that touches the backend.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// The requested row does not exist (or is not visible to the caller).
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The signed-in owner has no restaurant yet.
    #[error("No restaurant loaded")]
    NotOnboarded,

    /// Input rejected before reaching the backend.
    #[error("{0}")]
    Validation(String),

    /// A uniqueness rule of the backend was violated.
    #[error("{0}")]
    Conflict(String),

    /// The identity service refused the credentials or token.
    #[error("{0}")]
    Unauthorized(String),

    /// The backend or identity service failed.
    #[error("{0}")]
    Remote(String),
}

impl StoreError {
    pub fn status(&self) -> StatusCode {
        match self {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::NotOnboarded => StatusCode::PRECONDITION_REQUIRED,
            StoreError::Validation(_) => StatusCode::BAD_REQUEST,
            StoreError::Conflict(_) => StatusCode::CONFLICT,
            StoreError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            StoreError::Remote(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row"),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Remote(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Remote(e.to_string())
    }
}

/// Maps a holder failure onto the `(StatusCode, String)` rejection used by handlers.
pub fn reject(e: StoreError) -> (StatusCode, String) {
    let status = e.status();
    if status.is_server_error() {
        error!(error = %e, "backend call failed");
    }
    (status, e.to_string())
}
