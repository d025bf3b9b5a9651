use std::error::Error;

use crate::model::CollectionKind;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),
    #[error("StorageUnavailable: {0}")]
    StorageUnavailable(#[source] Box<dyn Error + Send + Sync + 'static>),
    #[error("PartialWriteDetected: {kind} expected {expected} records, found {stored}")]
    PartialWriteDetected {
        kind: CollectionKind,
        expected: usize,
        stored: usize,
    },
}

impl SyncError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        SyncError::InvalidArgument(msg.into())
    }

    pub fn storage(err: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        SyncError::StorageUnavailable(err.into())
    }

    /// Whether the caller may safely repeat the request unchanged.
    pub fn is_retriable(&self) -> bool {
        matches!(self, SyncError::StorageUnavailable(_))
    }
}

impl From<libsql::Error> for SyncError {
    fn from(error: libsql::Error) -> Self {
        SyncError::StorageUnavailable(Box::new(error))
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(error: anyhow::Error) -> Self {
        SyncError::StorageUnavailable(error.into())
    }
}
