use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced by the attendance store.
#[derive(Error, Debug)]
pub enum DataAccessError {
    #[error("Database error: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("Attendance record {0} not found")]
    NotFound(Uuid),
    #[error("Corrupt stored data: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, DataAccessError>;
