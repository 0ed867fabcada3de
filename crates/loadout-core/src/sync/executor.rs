//! Applies a processed sync tree to disk and the loadout
//!
//! Phases run in a fixed order: backup, ingest, reified deletes, delete from
//! disk, extract to disk, warnings. Every deletion finishes before any
//! extraction starts, so a path being replaced (or one whose lowercase form
//! collides with it) is never written while the old file still exists.
//!
//! Loadout changes, the new disk state and the sync watermarks go into one
//! transaction, committed only when the run was not cancelled.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use loadout_fs::{GamePath, Hash, LocationRegister, Size, io};
use tokio::sync::Semaphore;

use super::action::Actions;
use super::report::{Diagnostic, DiagnosticKind, PathFailure, SyncReport, SyncStatus};
use super::tree::{SyncNode, SyncTree, covers};
use super::{CancelReceiver, StatusSender, is_cancelled, send_status};
use crate::config::SyncConfig;
use crate::content::{ContentReader, ContentStore};
use crate::model::{
    DiskStateEntry, GameInstallId, GameInstallMetadata, Loadout, Mod, ModFile, ModId, ModKind,
    NewModFile,
};
use crate::store::{EntityStore, Transaction};
use crate::{Error, Result};

/// Extensions marked executable after extraction on Unix. The empty string
/// stands for files without an extension.
const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "", "sh", "bin", "run", "py", "pl", "php", "rb", "out", "elf",
];

/// Name of the mod that collects ingested disk changes.
pub(crate) const OVERRIDES_MOD_NAME: &str = "Overrides";

/// Everything plan execution needs besides the tree.
pub struct ExecutionContext<'a> {
    pub store: &'a dyn EntityStore,
    pub content: &'a dyn ContentStore,
    pub register: &'a LocationRegister,
    pub config: &'a SyncConfig,
    pub install: GameInstallId,
    /// The loadout being synchronized; ingests land in its overrides mod.
    pub loadout: &'a Loadout,
    pub cancel: Option<&'a CancelReceiver>,
    pub status: Option<&'a StatusSender>,
}

/// Content of one file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DiskFile {
    pub hash: Hash,
    pub size: Size,
    pub modified: DateTime<Utc>,
}

/// Mutable bookkeeping for one run.
#[derive(Default)]
struct Progress {
    report: SyncReport,
    failed: BTreeSet<GamePath>,
    changed: BTreeSet<GamePath>,
    extracted: BTreeMap<GamePath, DiskFile>,
    deleted: BTreeSet<GamePath>,
    emptied_dirs: BTreeSet<PathBuf>,
}

impl Progress {
    fn fail(&mut self, path: &GamePath, action: Actions, err: impl std::fmt::Display) {
        tracing::warn!(%path, %action, error = %err, "action failed");
        self.failed.insert(path.clone());
        self.report.failures.push(PathFailure {
            path: path.clone(),
            action,
            message: err.to_string(),
        });
    }

    fn is_failed(&self, path: &GamePath) -> bool {
        self.failed.contains(path)
    }
}

fn with_action<'t>(
    tree: &'t SyncTree,
    action: Actions,
) -> impl Iterator<Item = (&'t GamePath, &'t SyncNode)> {
    tree.iter().filter(move |(_, node)| node.actions.contains(action))
}

fn count(tree: &SyncTree, action: Actions) -> usize {
    with_action(tree, action).count()
}

fn check_cancelled(cancel: Option<&CancelReceiver>) -> Result<()> {
    if is_cancelled(cancel) {
        tracing::info!("synchronize cancelled; skipping commit");
        return Err(Error::Cancelled);
    }
    Ok(())
}

/// Execute every action in `tree` and commit the result.
///
/// # Errors
///
/// Fatal conditions only: [`Error::ArchiveMissing`], [`Error::Cancelled`]
/// and store failures. Per-path problems are reported in the
/// [`SyncReport`].
pub async fn execute(tree: &SyncTree, ctx: &ExecutionContext<'_>) -> Result<SyncReport> {
    let mut progress = Progress::default();
    for (path, node) in tree {
        progress.report.actions.record(node.actions);
        if let Some(message) = &node.scan_error
            && !node.path_is_ignored
        {
            progress.fail(
                path,
                Actions::DO_NOTHING,
                format!("unreadable during scan: {message}"),
            );
        }
    }
    let mut tx = ctx.store.begin();

    backup(tree, ctx, &mut progress).await?;
    check_cancelled(ctx.cancel)?;

    ingest(tree, ctx, &mut tx, &mut progress)?;
    delete_from_disk(tree, ctx, &mut progress).await?;
    check_cancelled(ctx.cancel)?;

    extract_to_disk(tree, ctx, &mut progress).await?;
    check_cancelled(ctx.cancel)?;

    warn(tree, &mut progress);
    prune(ctx, &mut progress);

    record_disk_state(tree, ctx, &mut tx, &progress)?;
    GameInstallMetadata::mark_synced(&mut tx, ctx.install, ctx.loadout.id)?;

    send_status(ctx.status, SyncStatus::Committing);
    let committed = ctx.store.commit(tx)?;

    let mut report = progress.report;
    report.files_changed = progress.changed.len();
    report.committed_tx = Some(committed);
    tracing::info!(
        changed = report.files_changed,
        warned = report.files_warned,
        failed = report.files_failed(),
        tx = %committed,
        "synchronize committed"
    );
    Ok(report)
}

async fn backup(tree: &SyncTree, ctx: &ExecutionContext<'_>, progress: &mut Progress) -> Result<()> {
    send_status(
        ctx.status,
        SyncStatus::BackingUp {
            files: count(tree, Actions::BACKUP_FILE),
        },
    );
    for (path, node) in with_action(tree, Actions::BACKUP_FILE) {
        check_cancelled(ctx.cancel)?;
        let Some(disk) = node.disk else { continue };
        let native = match ctx.register.resolve(path) {
            Ok(native) => native,
            Err(err) => {
                progress.fail(path, Actions::BACKUP_FILE, err);
                continue;
            }
        };
        if let Err(err) = ctx.content.backup(disk.hash, &native).await {
            // Never replace content that could not be preserved.
            progress.fail(path, Actions::BACKUP_FILE, err);
        }
    }
    Ok(())
}

fn overrides_mod(
    ctx: &ExecutionContext<'_>,
    tx: &mut Transaction,
    created: &mut Option<ModId>,
) -> Result<ModId> {
    if let Some(existing) = ctx.loadout.mod_of_kind(ModKind::Overrides) {
        return Ok(existing.id);
    }
    if let Some(id) = created {
        return Ok(*id);
    }
    let id = Mod::create(tx, ctx.loadout.id, OVERRIDES_MOD_NAME, ModKind::Overrides)?;
    *created = Some(id);
    Ok(id)
}

fn ingest(
    tree: &SyncTree,
    ctx: &ExecutionContext<'_>,
    tx: &mut Transaction,
    progress: &mut Progress,
) -> Result<()> {
    let existing = ctx.loadout.mod_of_kind(ModKind::Overrides);
    let mut created = None;

    send_status(
        ctx.status,
        SyncStatus::Ingesting {
            files: count(tree, Actions::INGEST_FROM_DISK),
        },
    );
    for (path, node) in with_action(tree, Actions::INGEST_FROM_DISK) {
        let Some(disk) = node.disk else { continue };
        if progress.is_failed(path) {
            continue;
        }
        let owner = overrides_mod(ctx, tx, &mut created)?;
        match existing.and_then(|m| m.file_at(path)) {
            Some(file) => ModFile::set_content(tx, file.id, disk.hash, disk.size)?,
            None => {
                ModFile::add(tx, owner, NewModFile::new(path.clone(), disk.hash, disk.size))?;
            }
        }
        tracing::debug!(%path, hash = %disk.hash, "ingested");
        progress.changed.insert(path.clone());
    }

    for (path, _) in with_action(tree, Actions::ADD_REIFIED_DELETE) {
        if progress.is_failed(path) {
            continue;
        }
        let owner = overrides_mod(ctx, tx, &mut created)?;
        match existing.and_then(|m| m.file_at(path)) {
            Some(file) => ModFile::mark_deleted(tx, file.id)?,
            None => {
                ModFile::add(tx, owner, NewModFile::deletion(path.clone()))?;
            }
        }
        tracing::debug!(%path, "recorded deletion");
        progress.changed.insert(path.clone());
    }
    Ok(())
}

async fn delete_from_disk(
    tree: &SyncTree,
    ctx: &ExecutionContext<'_>,
    progress: &mut Progress,
) -> Result<()> {
    send_status(
        ctx.status,
        SyncStatus::Deleting {
            files: count(tree, Actions::DELETE_FROM_DISK),
        },
    );
    let robustness = ctx.config.robustness();
    for (path, _) in with_action(tree, Actions::DELETE_FROM_DISK) {
        check_cancelled(ctx.cancel)?;
        if progress.is_failed(path) {
            continue;
        }
        let removed = match ctx.register.resolve(path) {
            Ok(native) => {
                tokio::task::spawn_blocking(move || {
                    io::with_retry(robustness, || io::remove_file_if_exists(&native))?;
                    Ok::<_, loadout_fs::Error>(native)
                })
                .await?
            }
            Err(err) => Err(err),
        };
        match removed {
            Ok(native) => {
                if let Some(parent) = native.parent() {
                    progress.emptied_dirs.insert(parent.to_path_buf());
                }
                progress.deleted.insert(path.clone());
                progress.changed.insert(path.clone());
            }
            Err(err) => progress.fail(path, Actions::DELETE_FROM_DISK, err),
        }
    }
    Ok(())
}

fn is_executable(path: &GamePath) -> bool {
    EXECUTABLE_EXTENSIONS.contains(&path.extension().unwrap_or(""))
}

fn write_extracted(
    native: &Path,
    mut reader: ContentReader,
    executable: bool,
) -> loadout_fs::Result<Size> {
    let written = io::write_stream_atomic(native, &mut reader)?;
    if executable {
        io::set_executable(native)?;
    }
    Ok(written)
}

async fn extract_to_disk(
    tree: &SyncTree,
    ctx: &ExecutionContext<'_>,
    progress: &mut Progress,
) -> Result<()> {
    send_status(
        ctx.status,
        SyncStatus::Extracting {
            files: count(tree, Actions::EXTRACT_TO_DISK),
        },
    );

    let semaphore = Arc::new(Semaphore::new(ctx.config.concurrency()));
    let mut tasks = Vec::new();
    let mut fatal = None;

    for (path, node) in with_action(tree, Actions::EXTRACT_TO_DISK) {
        if is_cancelled(ctx.cancel) {
            break;
        }
        let Some(loadout) = node.loadout else { continue };
        if progress.is_failed(path) {
            continue;
        }
        let native = match ctx.register.resolve(path) {
            Ok(native) => native,
            Err(err) => {
                progress.fail(path, Actions::EXTRACT_TO_DISK, err);
                continue;
            }
        };
        let reader = match ctx.content.open(loadout.hash).await {
            Ok(Some(reader)) => reader,
            Ok(None) => {
                fatal = Some(Error::ArchiveMissing {
                    hash: loadout.hash,
                    path: path.clone(),
                });
                break;
            }
            Err(err) => {
                progress.fail(path, Actions::EXTRACT_TO_DISK, err);
                continue;
            }
        };

        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|e| Error::Task(e.to_string()))?;
        let executable = is_executable(path);
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            write_extracted(&native, reader, executable)
        });
        tasks.push((path, loadout.hash, handle));
    }

    for (path, hash, handle) in tasks {
        match handle.await? {
            Ok(size) => {
                progress.extracted.insert(
                    path.clone(),
                    DiskFile {
                        hash,
                        size,
                        modified: Utc::now(),
                    },
                );
                progress.changed.insert(path.clone());
            }
            Err(err) => progress.fail(path, Actions::EXTRACT_TO_DISK, err),
        }
    }

    match fatal {
        Some(err) => {
            tracing::error!(error = %err, "content store lost archived content");
            Err(err)
        }
        None => Ok(()),
    }
}

fn warn(tree: &SyncTree, progress: &mut Progress) {
    for (path, node) in tree {
        let mut warned = false;
        if node.actions.contains(Actions::WARN_OF_UNABLE_TO_EXTRACT) {
            let message = match node.loadout {
                Some(entry) => format!("content {} is not available in the store", entry.hash),
                None => "content is not available in the store".to_string(),
            };
            tracing::warn!(%path, %message, "unable to extract");
            progress.report.diagnostics.push(Diagnostic {
                path: path.clone(),
                kind: DiagnosticKind::UnableToExtract,
                message,
            });
            warned = true;
        }
        if node.actions.contains(Actions::WARN_OF_CONFLICT) {
            let message =
                "disk, previous and loadout differ and no version can be preserved".to_string();
            tracing::warn!(%path, "unresolvable conflict");
            progress.report.diagnostics.push(Diagnostic {
                path: path.clone(),
                kind: DiagnosticKind::Conflict,
                message,
            });
            warned = true;
        }
        if warned {
            progress.report.files_warned += 1;
        }
    }
}

fn prune(ctx: &ExecutionContext<'_>, progress: &mut Progress) {
    if !ctx.config.prune_empty_dirs {
        return;
    }
    let dirs = std::mem::take(&mut progress.emptied_dirs);
    for dir in dirs.iter().rev() {
        let Some((_, root)) = ctx
            .register
            .roots()
            .filter(|(_, root)| dir.starts_with(root))
            .max_by_key(|(_, root)| root.components().count())
        else {
            continue;
        };
        match io::prune_empty_dirs(dir, root) {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(dir = %dir.display(), removed, "pruned empty directories"),
            Err(err) => tracing::warn!(dir = %dir.display(), error = %err, "failed to prune directories"),
        }
    }
}

/// Replace the recorded disk state of `install` with `desired`.
///
/// Entries for paths where `keep` holds are left as they are. Returns the
/// number of entries written or removed.
pub(crate) fn write_disk_state(
    tx: &mut Transaction,
    install: GameInstallId,
    current: &[DiskStateEntry],
    desired: &BTreeMap<GamePath, DiskFile>,
    keep: impl Fn(&GamePath) -> bool,
) -> Result<usize> {
    let mut changes = 0;
    let mut recorded = BTreeSet::new();

    for entry in current {
        recorded.insert(&entry.path);
        if keep(&entry.path) {
            continue;
        }
        match desired.get(&entry.path) {
            Some(file) if file.hash != entry.hash || file.size != entry.size => {
                DiskStateEntry::update(tx, entry.id, file.hash, file.size, file.modified)?;
                changes += 1;
            }
            Some(_) => {}
            None => {
                DiskStateEntry::remove(tx, entry.id);
                changes += 1;
            }
        }
    }
    for (path, file) in desired {
        if recorded.contains(path) || keep(path) {
            continue;
        }
        DiskStateEntry::insert(tx, install, path, file.hash, file.size, file.modified)?;
        changes += 1;
    }
    Ok(changes)
}

/// Record the disk as it is after this run.
///
/// Ignored paths, and paths the scan could not read, are left alone. Failed
/// paths are recorded with their previous content so the next run derives
/// them again.
fn record_disk_state(
    tree: &SyncTree,
    ctx: &ExecutionContext<'_>,
    tx: &mut Transaction,
    progress: &Progress,
) -> Result<()> {
    let mut desired = BTreeMap::new();
    for (path, node) in tree {
        if node.path_is_ignored {
            continue;
        }
        let file = if progress.is_failed(path) {
            node.previous.map(|prev| DiskFile {
                hash: prev.hash,
                size: prev.size,
                modified: Utc::now(),
            })
        } else if let Some(written) = progress.extracted.get(path) {
            Some(*written)
        } else if progress.deleted.contains(path) {
            None
        } else {
            node.disk.map(|disk| DiskFile {
                hash: disk.hash,
                size: disk.size,
                modified: node.disk_modified.unwrap_or_else(Utc::now),
            })
        };
        if let Some(file) = file {
            desired.insert(path.clone(), file);
        }
    }

    let current = DiskStateEntry::for_install(&ctx.store.snapshot(), ctx.install)?;
    let unreadable: Vec<&GamePath> = tree
        .iter()
        .filter(|(_, n)| n.scan_error.is_some())
        .map(|(path, _)| path)
        .collect();
    let keep = |path: &GamePath| {
        tree.get(path).is_some_and(|n| n.path_is_ignored)
            || unreadable.iter().any(|u| covers(u, path))
    };
    let changes = write_disk_state(tx, ctx.install, &current, &desired, keep)?;
    tracing::debug!(changes, "recorded disk state");
    Ok(())
}
