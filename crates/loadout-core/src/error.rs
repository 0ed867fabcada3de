//! Error types for loadout-core

use std::path::PathBuf;

use loadout_fs::{GamePath, Hash};

use crate::model::{EntityId, TxId};

/// Result type for loadout-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a loadout-core operation.
///
/// Per-file problems during synchronization are not errors; they are
/// collected into the report as diagnostics and path failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The Before/After rules of a loadout form a cycle
    #[error("Sort rules form a cycle between mods: {}", mods.join(", "))]
    SortCycle { mods: Vec<String> },

    /// The content store claimed to hold a hash but could not produce it
    #[error("Content store is missing archived hash {hash} needed for {path}")]
    ArchiveMissing { hash: Hash, path: GamePath },

    /// Optimistic commit lost a race against another writer
    #[error("Store changed underneath transaction (based on tx {base}, store at tx {current})")]
    StoreConflict { base: TxId, current: TxId },

    /// Persisted data could not be interpreted
    #[error("Corrupt data: {message}")]
    Corrupt { message: String },

    #[error("Entity {entity} has no attribute '{attribute}'")]
    MissingAttribute { entity: EntityId, attribute: String },

    #[error("Unknown game: {0}")]
    UnknownGame(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Transaction log {path} uses schema version {found}, newest supported is {supported}")]
    UnsupportedSchema {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    #[error("Background task failed: {0}")]
    Task(String),

    /// Filesystem error from loadout-fs
    #[error(transparent)]
    Fs(#[from] loadout_fs::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
