use thiserror::Error;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
}

/// Errors reported by repository backends.
///
/// `IdExists` and `UrlExists` are conflicts on the two uniqueness invariants
/// and are distinguishable from infrastructure failures, which abort the
/// enclosing operation.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("short code already exists: {0}")]
    IdExists(String),
    #[error("url already exists for owner: {0}")]
    UrlExists(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage operation failed: {0}")]
    Operation(String),
}

impl StorageError {
    /// Returns `true` for the two uniqueness conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::IdExists(_) | StorageError::UrlExists(_))
    }
}
