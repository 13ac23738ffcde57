//! Shared error types for the services crate.

use thiserror::Error;

use quiz_core::model::SettingsError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Failure of a single snapshot read or write.
///
/// Never returned across the controller boundary: the snapshot store logs
/// and swallows it, since persistence must not break the quiz.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}
