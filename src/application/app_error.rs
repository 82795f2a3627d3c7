use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("User is deactivated")]
    DeactivatedUser,

    #[error("Billing provider error: {0}")]
    Provider(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found")]
    NotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Clone, Copy, Debug)]
pub enum ErrorCode {
    DatabaseError,
    InvalidSignature,
    MissingField,
    DeactivatedUser,
    ProviderError,
    InvalidInput,
    NotFound,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InvalidSignature => "INVALID_SIGNATURE",
            ErrorCode::MissingField => "MISSING_FIELD",
            ErrorCode::DeactivatedUser => "DEACTIVATED_USER",
            ErrorCode::ProviderError => "PROVIDER_ERROR",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Transient failures answer the provider with a 5xx so the delivery is
/// retried; everything else is the sender's fault and must not be.
pub fn is_retryable_error(err: &AppError) -> bool {
    matches!(
        err,
        AppError::Database(_) | AppError::Provider(_) | AppError::Internal(_)
    )
}
