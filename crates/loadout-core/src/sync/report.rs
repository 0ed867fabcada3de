//! Report types for synchronize and preview
//!
//! Per-path problems never abort a run; they end up here.

use loadout_fs::GamePath;
use serde::{Deserialize, Serialize};

use super::action::Actions;
use crate::model::TxId;

/// Kind of a per-path diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// The loadout wants content that is neither on disk nor in the store
    UnableToExtract,
    /// Disk, previous and loadout all differ and none can be preserved
    Conflict,
}

/// A user-visible warning about one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub path: GamePath,
    pub kind: DiagnosticKind,
    pub message: String,
}

/// A path whose actions could not be completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathFailure {
    pub path: GamePath,
    /// The action that failed, empty for a path the scan could not read
    pub action: Actions,
    pub message: String,
}

/// Number of paths carrying each action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    pub backup: usize,
    pub ingest: usize,
    pub delete: usize,
    pub extract: usize,
    pub reified_delete: usize,
    pub unable_to_extract: usize,
    pub conflict: usize,
}

impl ActionCounts {
    pub fn record(&mut self, actions: Actions) {
        let slots = [
            (Actions::BACKUP_FILE, &mut self.backup),
            (Actions::INGEST_FROM_DISK, &mut self.ingest),
            (Actions::DELETE_FROM_DISK, &mut self.delete),
            (Actions::EXTRACT_TO_DISK, &mut self.extract),
            (Actions::ADD_REIFIED_DELETE, &mut self.reified_delete),
            (Actions::WARN_OF_UNABLE_TO_EXTRACT, &mut self.unable_to_extract),
            (Actions::WARN_OF_CONFLICT, &mut self.conflict),
        ];
        for (flag, count) in slots {
            if actions.contains(flag) {
                *count += 1;
            }
        }
    }

    pub fn total(&self) -> usize {
        self.backup
            + self.ingest
            + self.delete
            + self.extract
            + self.reified_delete
            + self.unable_to_extract
            + self.conflict
    }

    fn add(&mut self, other: &ActionCounts) {
        self.backup += other.backup;
        self.ingest += other.ingest;
        self.delete += other.delete;
        self.extract += other.extract;
        self.reified_delete += other.reified_delete;
        self.unable_to_extract += other.unable_to_extract;
        self.conflict += other.conflict;
    }
}

/// What a synchronize would do, without doing it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPreview {
    pub actions: ActionCounts,
    /// Paths with at least one action
    pub paths_with_actions: usize,
    /// Paths in the sync tree
    pub total_paths: usize,
}

impl SyncPreview {
    pub fn is_in_sync(&self) -> bool {
        self.paths_with_actions == 0
    }
}

/// Outcome of a synchronize
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Paths whose disk or loadout state was changed
    pub files_changed: usize,
    /// Paths that produced a diagnostic
    pub files_warned: usize,
    pub failures: Vec<PathFailure>,
    pub actions: ActionCounts,
    pub diagnostics: Vec<Diagnostic>,
    /// Transaction that recorded the run, `None` for dry runs
    pub committed_tx: Option<TxId>,
}

impl SyncReport {
    /// Whether every path was handled
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn files_failed(&self) -> usize {
        self.failures.len()
    }

    /// Combine with a report from a later run. The later commit wins.
    pub fn merge(mut self, other: SyncReport) -> Self {
        self.files_changed += other.files_changed;
        self.files_warned += other.files_warned;
        self.failures.extend(other.failures);
        self.actions.add(&other.actions);
        self.diagnostics.extend(other.diagnostics);
        self.committed_tx = other.committed_tx.or(self.committed_tx);
        self
    }
}

/// Progress messages sent while synchronizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Ingesting the previously applied loadout before switching
    SwitchingLoadout,
    Scanning,
    Planning,
    BackingUp { files: usize },
    Ingesting { files: usize },
    Deleting { files: usize },
    Extracting { files: usize },
    Committing,
    Done { files_changed: usize },
}
