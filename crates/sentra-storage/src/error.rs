/// Errors surfaced by the storage layer.
///
/// The lease operations need matchable variants: the scheduler's lock
/// manager distinguishes "someone else holds it" from "my lease vanished".
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The lease is held by another owner and has not expired.
    #[error("resource is already locked")]
    AlreadyLocked,

    /// The lease id is unknown: expired and taken over, or released.
    #[error("lock not found")]
    LockNotFound,

    /// A required record was not found.
    #[error("{entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// Underlying database error.
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    /// A JSON column failed to (de)serialize.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
