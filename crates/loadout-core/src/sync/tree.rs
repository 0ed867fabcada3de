//! Disk scanning and the three-way sync tree

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use loadout_fs::{GamePath, Hash, LocationRegister, RelativePath, RobustnessConfig, Size, io};
use tokio::sync::Semaphore;
use walkdir::WalkDir;

use super::action::{Actions, SyncDirection, resolve};
use super::signature::{Signature, SignatureInput};
use super::{CancelReceiver, is_cancelled};
use crate::config::SyncConfig;
use crate::content::ContentStore;
use crate::flatten::Plan;
use crate::game::GameDefinition;
use crate::model::{DiskStateEntry, FileId, FileStateEntry, ModId, SourceItemType};
use crate::{Error, Result};

/// A file found by a disk scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntry {
    pub path: GamePath,
    pub hash: Hash,
    pub size: Size,
    pub last_modified: DateTime<Utc>,
}

/// A file or directory the scan could not read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadablePath {
    pub path: GamePath,
    pub message: String,
}

impl UnreadablePath {
    /// Whether `path` is this path or lies beneath it.
    pub fn covers(&self, path: &GamePath) -> bool {
        covers(&self.path, path)
    }
}

pub(crate) fn covers(prefix: &GamePath, path: &GamePath) -> bool {
    prefix.location == path.location && path.path.starts_with_ignore_case(&prefix.path)
}

/// Files found by a scan, and what could not be read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskScan {
    /// Ordered by path.
    pub entries: Vec<DiskEntry>,
    pub unreadable: Vec<UnreadablePath>,
}

impl DiskScan {
    pub fn is_unreadable(&self, path: &GamePath) -> bool {
        self.unreadable.iter().any(|u| u.covers(path))
    }
}

/// Everything known about one path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncNode {
    pub disk: Option<FileStateEntry>,
    pub previous: Option<FileStateEntry>,
    pub loadout: Option<FileStateEntry>,
    pub path_is_ignored: bool,
    /// Origin of the loadout side, `None` when the loadout lacks the path.
    pub source_item_type: Option<SourceItemType>,
    pub mod_id: Option<ModId>,
    pub file_id: Option<FileId>,
    /// Modification time seen by the scan.
    pub disk_modified: Option<DateTime<Utc>>,
    /// Set when the scan could not read the path; it is then left alone.
    pub scan_error: Option<String>,
    pub signature: Signature,
    pub actions: Actions,
}

impl SyncNode {
    pub fn signature_input(&self) -> SignatureInput {
        SignatureInput {
            disk: self.disk,
            prev: self.previous,
            loadout: self.loadout,
            path_is_ignored: self.path_is_ignored,
        }
    }
}

pub type SyncTree = BTreeMap<GamePath, SyncNode>;

type Hasher = fn(&Path) -> loadout_fs::Result<(Hash, Size)>;

/// Every regular file under the registered roots, attributed to the deepest
/// root containing it. Entries that cannot be walked are collected instead.
fn enumerate(
    register: &LocationRegister,
) -> Result<(Vec<(GamePath, PathBuf)>, Vec<UnreadablePath>)> {
    let mut found = Vec::new();
    let mut unreadable = Vec::new();
    for (location, root) in register.roots() {
        if !root.is_dir() {
            tracing::debug!(%location, root = %root.display(), "location root does not exist");
            continue;
        }
        let nested = register.nested_roots(location);
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !nested.iter().any(|n| e.path() == *n));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(|p| register.to_game_path(p));
                    match path {
                        Some(Ok(path)) => {
                            tracing::warn!(%path, error = %err, "cannot read path during scan");
                            unreadable.push(UnreadablePath {
                                path,
                                message: err.to_string(),
                            });
                            continue;
                        }
                        // The root itself is unreadable
                        _ => return Err(std::io::Error::from(err).into()),
                    }
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if io::is_temp_file_name(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            match RelativePath::from_native(relative) {
                Ok(relative) => found.push((
                    GamePath::new(location.clone(), relative),
                    entry.into_path(),
                )),
                Err(err) => {
                    tracing::warn!(path = %entry.path().display(), error = %err, "skipping unrepresentable path");
                }
            }
        }
    }
    Ok((found, unreadable))
}

fn hash_entry(
    path: &GamePath,
    native: &Path,
    robustness: RobustnessConfig,
    hasher: Hasher,
) -> loadout_fs::Result<Option<DiskEntry>> {
    let hashed = io::with_retry(robustness, || {
        let (hash, size) = hasher(native)?;
        let modified = std::fs::metadata(native)
            .and_then(|m| m.modified())
            .map_err(|e| loadout_fs::Error::io(native, e))?;
        Ok((hash, size, modified))
    });
    match hashed {
        Ok((hash, size, modified)) => Ok(Some(DiskEntry {
            path: path.clone(),
            hash,
            size,
            last_modified: DateTime::<Utc>::from(modified),
        })),
        Err(err) if err.is_not_found() => {
            tracing::debug!(%path, "file vanished during scan");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Scan and hash every file under the register's roots.
///
/// Hashing runs on the blocking pool with at most
/// [`SyncConfig::max_concurrency`] files in flight. Entries are ordered by
/// path. Files and directories that cannot be read are listed in
/// [`DiskScan::unreadable`] and the scan carries on.
///
/// # Errors
///
/// An unreadable location root, or [`Error::Cancelled`].
pub async fn scan_disk(
    register: &LocationRegister,
    config: &SyncConfig,
    cancel: Option<&CancelReceiver>,
) -> Result<DiskScan> {
    scan_with(register, config, cancel, loadout_fs::hash_file).await
}

async fn scan_with(
    register: &LocationRegister,
    config: &SyncConfig,
    cancel: Option<&CancelReceiver>,
    hasher: Hasher,
) -> Result<DiskScan> {
    let (candidates, mut unreadable) = {
        let register = register.clone();
        tokio::task::spawn_blocking(move || enumerate(&register)).await??
    };
    tracing::debug!(files = candidates.len(), "enumerated location roots");

    let semaphore = Arc::new(Semaphore::new(config.concurrency()));
    let robustness = config.robustness();
    let mut tasks = Vec::with_capacity(candidates.len());

    for (path, native) in candidates {
        if is_cancelled(cancel) {
            return Err(Error::Cancelled);
        }
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|e| Error::Task(e.to_string()))?;
        tasks.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let hashed = hash_entry(&path, &native, robustness, hasher);
            (path, hashed)
        }));
    }

    let mut entries = Vec::with_capacity(tasks.len());
    for task in tasks {
        match task.await? {
            (_, Ok(Some(entry))) => entries.push(entry),
            (_, Ok(None)) => {}
            (path, Err(err)) => {
                tracing::warn!(%path, error = %err, "cannot hash file");
                unreadable.push(UnreadablePath {
                    path,
                    message: err.to_string(),
                });
            }
        }
    }
    if is_cancelled(cancel) {
        return Err(Error::Cancelled);
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    unreadable.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(DiskScan {
        entries,
        unreadable,
    })
}

/// Join disk, previous and loadout into one node per path.
///
/// Every path seen by any source gets a node; absent sides are `None`.
pub fn build_sync_tree(
    disk: &[DiskEntry],
    previous: &[DiskStateEntry],
    plan: &Plan,
    game: &dyn GameDefinition,
) -> SyncTree {
    let mut tree = SyncTree::new();

    for entry in disk {
        let node = tree.entry(entry.path.clone()).or_default();
        node.disk = Some(FileStateEntry::new(entry.hash, entry.size));
        node.disk_modified = Some(entry.last_modified);
    }
    for entry in previous {
        let node = tree.entry(entry.path.clone()).or_default();
        node.previous = Some(FileStateEntry::new(entry.hash, entry.size));
    }
    for (path, file) in &plan.flattened_files {
        let node = tree.entry(path.clone()).or_default();
        node.loadout = Some(FileStateEntry::new(file.hash, file.size));
        node.source_item_type = Some(file.source);
        node.mod_id = Some(file.mod_id);
        node.file_id = Some(file.file_id);
    }

    for (path, node) in tree.iter_mut() {
        node.path_is_ignored = game.is_ignored_path(path);
    }
    tree
}

/// Flag every node the scan could not read, adding nodes for unreadable
/// paths the tree does not know yet.
pub fn mark_unreadable(
    tree: &mut SyncTree,
    unreadable: &[UnreadablePath],
    game: &dyn GameDefinition,
) {
    for u in unreadable {
        tree.entry(u.path.clone()).or_insert_with(|| SyncNode {
            path_is_ignored: game.is_ignored_path(&u.path),
            ..SyncNode::default()
        });
    }
    for (path, node) in tree.iter_mut() {
        if let Some(u) = unreadable.iter().find(|u| u.covers(path)) {
            node.scan_error = Some(u.message.clone());
        }
    }
}

/// Respell disk paths the way the loadout or the previous state spells them.
///
/// For case-insensitive file systems, where `data/a.esp` on disk is the
/// loadout's `Data/a.esp`.
pub fn align_case(disk: &mut [DiskEntry], previous: &[DiskStateEntry], plan: &Plan) {
    let known: BTreeMap<_, &GamePath> = previous
        .iter()
        .map(|e| &e.path)
        .chain(plan.flattened_files.keys())
        .map(|path| (path.collision_key(), path))
        .collect();

    for entry in disk.iter_mut() {
        if let Some(spelling) = known.get(&entry.path.collision_key())
            && **spelling != entry.path
        {
            tracing::debug!(disk = %entry.path, known = %spelling, "aligning path case");
            entry.path = (*spelling).clone();
        }
    }
}

/// Fill archived flags, signatures and actions.
///
/// The store is asked once per distinct hash. Backups are dropped for paths
/// the game excludes from backup and for files above
/// [`SyncConfig::max_backup_size`].
pub async fn process_sync_tree(
    tree: &mut SyncTree,
    store: &dyn ContentStore,
    game: &dyn GameDefinition,
    config: &SyncConfig,
    direction: SyncDirection,
) -> Result<()> {
    let hashes: BTreeSet<Hash> = tree
        .values()
        .flat_map(|n| [n.disk, n.previous, n.loadout])
        .flatten()
        .map(|e| e.hash)
        .collect();

    let mut archived = HashMap::with_capacity(hashes.len());
    for hash in hashes {
        archived.insert(hash, store.has(hash).await?);
    }
    let is_archived = |hash: Hash| archived.get(&hash).copied().unwrap_or(false);

    for (path, node) in tree.iter_mut() {
        for side in [&mut node.disk, &mut node.previous, &mut node.loadout] {
            if let Some(entry) = side {
                entry.is_archived = is_archived(entry.hash);
            }
        }

        node.signature = Signature::build(&node.signature_input());
        let mut actions = direction.filter(node.signature, resolve(node.signature));
        if node.scan_error.is_some() {
            actions = Actions::DO_NOTHING;
        }

        if actions.contains(Actions::BACKUP_FILE) {
            let too_large = node
                .disk
                .is_some_and(|d| d.size > config.max_backup_size);
            if too_large || game.is_ignored_backup_path(path) {
                actions.remove(Actions::BACKUP_FILE);
            }
        }
        node.actions = actions;

        if !actions.is_empty() {
            tracing::debug!(%path, signature = %node.signature, %actions, "resolved");
        }
    }
    Ok(())
}
