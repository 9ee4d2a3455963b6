pub mod access;
pub mod cache;
pub mod models;
pub mod notify;
pub mod reminders;
pub mod repository;
pub mod reservation_code;
pub mod validation;

use access::AccessError;
use repository::StoreError;
use validation::FieldErrors;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed")]
    Validation(#[from] FieldErrors),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Internal service error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
