//! Server-wide error type and its HTTP mapping.

use engram_core::messages::EntryError;
use engram_core::store_id::StoreIdError;

/// Errors surfaced by the manager, engine, and sync protocol.
///
/// Handlers translate these into HTTP statuses; background coordinators log
/// and continue. Lower-level causes are preserved through `#[from]` wraps.
#[derive(Debug, thiserror::Error)]
pub enum EngramError {
    #[error("invalid store id: {0}")]
    InvalidStoreId(#[from] StoreIdError),

    #[error("store not found: {store_id}")]
    StoreNotFound { store_id: String },

    #[error("store already exists: {store_id}")]
    StoreAlreadyExists { store_id: String },

    #[error("store {store_id} is protected and cannot be deleted")]
    StoreProtected { store_id: String },

    #[error("client schema version {client} is ahead of server version {server}")]
    SchemaMismatch { client: i64, server: i64 },

    #[error("push validation failed: {} entries rejected", .0.len())]
    ValidationFailed(Vec<EntryError>),

    #[error("snapshot not available")]
    SnapshotUnavailable,

    #[error("server is shutting down")]
    ShutdownInProgress,

    #[error("store metadata error: {0}")]
    Meta(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngramError {
    /// The HTTP status this error maps to at the network boundary.
    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Self::InvalidStoreId(_) => StatusCode::BAD_REQUEST,
            Self::StoreNotFound { .. } => StatusCode::NOT_FOUND,
            Self::StoreAlreadyExists { .. }
            | Self::StoreProtected { .. }
            | Self::SchemaMismatch { .. } => StatusCode::CONFLICT,
            Self::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::SnapshotUnavailable | Self::ShutdownInProgress => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Meta(_) | Self::Database(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short machine-readable error code used in JSON error bodies.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidStoreId(_) => "invalid_store_id",
            Self::StoreNotFound { .. } => "store_not_found",
            Self::StoreAlreadyExists { .. } => "store_already_exists",
            Self::StoreProtected { .. } => "store_protected",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::ValidationFailed(_) => "validation_failed",
            Self::SnapshotUnavailable => "snapshot_unavailable",
            Self::ShutdownInProgress => "shutdown_in_progress",
            Self::Meta(_) => "store_meta_error",
            Self::Database(_) => "database_error",
            Self::Io(_) => "store_io_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Convenience alias used throughout the server crate.
pub type Result<T> = std::result::Result<T, EngramError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn status_mapping_matches_protocol() {
        let not_found = EngramError::StoreNotFound {
            store_id: "x".to_string(),
        };
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let mismatch = EngramError::SchemaMismatch {
            client: 3,
            server: 2,
        };
        assert_eq!(mismatch.status_code(), StatusCode::CONFLICT);

        let invalid = EngramError::ValidationFailed(vec![]);
        assert_eq!(invalid.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        assert_eq!(
            EngramError::SnapshotUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn store_id_errors_convert() {
        let err: EngramError = engram_core::StoreId::parse("Bad/Id").unwrap_err().into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "invalid_store_id");
    }
}
