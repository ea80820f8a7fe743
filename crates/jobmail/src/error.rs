//! Error types shared across the sync pipeline.
//!
//! Each layer has its own enum; `SyncError` is the run-level taxonomy the
//! orchestrator reports. Extraction failures never reach it: the extraction
//! engine absorbs them and falls back to rules.

use diesel_async::pooled_connection::deadpool::PoolError;
use jobmail_types::SyncErrorKind;
use thiserror::Error;

/// Errors raised by a mail source adapter
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network, auth, or provider failure; safe to retry
    #[error("Mail source unavailable: {0}")]
    Unavailable(String),

    /// The history window no longer covers this checkpoint
    #[error("Checkpoint {token} is no longer valid")]
    CheckpointStale { token: String },

    #[error("Message {0} not found")]
    NotFound(String),
}

impl SourceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        SourceError::Unavailable(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Unavailable(_))
    }
}

/// Errors raised by the record store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database connection error")]
    ConnectionPool(#[source] PoolError),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Stored record {id} is unreadable: {reason}")]
    Corrupt { id: String, reason: String },
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        StoreError::ConnectionPool(err)
    }
}

/// Run-level failure of a sync
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Mail source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Checkpoint stale: {0}")]
    CheckpointStale(String),

    #[error("Store failure: {0}")]
    StoreFailure(#[from] StoreError),
}

impl SyncError {
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::SourceUnavailable(_) => SyncErrorKind::SourceUnavailable,
            SyncError::CheckpointStale(_) => SyncErrorKind::CheckpointStale,
            SyncError::StoreFailure(_) => SyncErrorKind::StoreFailure,
        }
    }
}

impl From<SourceError> for SyncError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::CheckpointStale { token } => SyncError::CheckpointStale(token),
            SourceError::Unavailable(reason) => SyncError::SourceUnavailable(reason),
            missing @ SourceError::NotFound(_) => SyncError::SourceUnavailable(missing.to_string()),
        }
    }
}
