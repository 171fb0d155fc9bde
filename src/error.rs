//! Error types for claimq.

use std::time::Duration;

use thiserror::Error;

use crate::model::MessageId;
use crate::task::TaskError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::model::MessageState,
        to: crate::model::MessageState,
    },

    /// The caller-supplied task failed; the attempt was rolled back.
    #[error("task failed for message {id}")]
    Task {
        id: MessageId,
        #[source]
        source: TaskError,
    },

    /// An update expected to touch exactly one row touched `rows`.
    #[error("consistency violation on message {id}: expected 1 row updated, got {rows}")]
    ConsistencyViolation { id: MessageId, rows: u64 },

    #[error("rollback failed ({source}) after: {cause}")]
    RollbackFailed {
        #[source]
        source: sqlx::Error,
        cause: Box<Error>,
    },

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
