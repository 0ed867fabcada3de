//! Synchronizer implementation
//!
//! The Synchronizer ties the stores, the game registry and the sync stages
//! together: it manages installations, builds sync trees and runs
//! synchronizes, one at a time per installation.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use loadout_fs::{GamePath, LocationId, LocationRegister};

use super::action::{Actions, SyncDirection};
use super::executor::{self, DiskFile, ExecutionContext};
use super::report::{
    ActionCounts, Diagnostic, DiagnosticKind, PathFailure, SyncPreview, SyncReport, SyncStatus,
};
use super::tree::{self, SyncTree};
use super::{CancelReceiver, StatusSender, send_status};
use crate::Result;
use crate::config::SyncConfig;
use crate::content::ContentStore;
use crate::flatten::{Plan, SortCache, flatten};
use crate::game::GameRegistry;
use crate::model::{
    DiskStateEntry, GameInstallId, GameInstallMetadata, Loadout, LoadoutId, Mod, ModFile, ModKind,
    NewModFile,
};
use crate::store::EntityStore;

/// Name of the mod holding the files of the unmodified game.
pub(crate) const GAME_FILES_MOD_NAME: &str = "Game Files";

/// Options for [`Synchronizer::synchronize`]
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub direction: SyncDirection,
    /// Resolve actions and report them without touching disk or store.
    pub dry_run: bool,
    pub cancel: Option<CancelReceiver>,
    pub status: Option<StatusSender>,
}

/// A sync tree together with what was needed to build it.
struct Prepared {
    loadout: Loadout,
    install: GameInstallMetadata,
    register: LocationRegister,
    plan: Plan,
    tree: SyncTree,
}

/// Reconciles game folders with loadouts
pub struct Synchronizer {
    store: Arc<dyn EntityStore>,
    content: Arc<dyn ContentStore>,
    games: GameRegistry,
    config: SyncConfig,
    sort_cache: SortCache,
    install_locks: Mutex<HashMap<GameInstallId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn EntityStore>,
        content: Arc<dyn ContentStore>,
        games: GameRegistry,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            content,
            games,
            config,
            sort_cache: SortCache::new(),
            install_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }

    pub fn content(&self) -> &dyn ContentStore {
        self.content.as_ref()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn sort_cache(&self) -> &SortCache {
        &self.sort_cache
    }

    fn install_lock(&self, install: GameInstallId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.install_locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(install).or_default())
    }

    fn register_for(&self, install: &GameInstallMetadata) -> LocationRegister {
        let register = install.register();
        match self.config.case_insensitive {
            Some(flag) => register.with_case_insensitive(flag),
            None => register,
        }
    }

    /// Start managing a game installation.
    ///
    /// Indexes every file under `locations`, ignored paths included, and
    /// records the result as the installation's initial disk state.
    ///
    /// # Errors
    ///
    /// Returns an error if the game is unknown or the scan fails.
    pub async fn manage_game(
        &self,
        game_id: &str,
        locations: BTreeMap<LocationId, PathBuf>,
    ) -> Result<GameInstallId> {
        self.games.get(game_id)?;
        let register = LocationRegister::new(locations);
        let scan = tree::scan_disk(&register, &self.config, None).await?;
        for u in &scan.unreadable {
            tracing::warn!(path = %u.path, error = %u.message, "not indexed");
        }
        let scanned = scan.entries;

        let mut tx = self.store.begin();
        let install = GameInstallMetadata::create(&mut tx, game_id, &register.to_map())?;
        for entry in &scanned {
            DiskStateEntry::insert(
                &mut tx,
                install,
                &entry.path,
                entry.hash,
                entry.size,
                entry.last_modified,
            )?;
        }
        GameInstallMetadata::mark_initial_state(&mut tx, install)?;
        let committed = self.store.commit(tx)?;

        tracing::info!(game = game_id, %install, files = scanned.len(), tx = %committed, "managing game");
        Ok(install)
    }

    /// Create a loadout whose game files mod holds the initial disk state.
    ///
    /// # Errors
    ///
    /// Returns an error if the installation does not exist.
    pub async fn create_loadout(&self, install: GameInstallId, name: &str) -> Result<LoadoutId> {
        let meta = GameInstallMetadata::load(&self.store.snapshot(), install)?;
        let game = self.games.get(&meta.game_id)?;
        let initial = match meta.initial_disk_state_tx {
            Some(tx) => DiskStateEntry::for_install(&self.store.as_of(tx)?, install)?,
            None => Vec::new(),
        };

        let mut tx = self.store.begin();
        let loadout = Loadout::create(&mut tx, install, name)?;
        let game_files = Mod::create(&mut tx, loadout, GAME_FILES_MOD_NAME, ModKind::GameFiles)?;
        for entry in initial.iter().filter(|e| !game.is_ignored_path(&e.path)) {
            ModFile::add(
                &mut tx,
                game_files,
                NewModFile::new(entry.path.clone(), entry.hash, entry.size),
            )?;
        }
        self.store.commit(tx)?;

        tracing::info!(%install, %loadout, name, "created loadout");
        Ok(loadout)
    }

    /// Rescan an installation and record its disk state.
    ///
    /// Returns whether anything changed; nothing is committed otherwise.
    pub async fn rescan(&self, install: GameInstallId) -> Result<bool> {
        let lock = self.install_lock(install);
        let _guard = lock.lock().await;

        let snapshot = self.store.snapshot();
        let meta = GameInstallMetadata::load(&snapshot, install)?;
        let game = self.games.get(&meta.game_id)?;
        let register = self.register_for(&meta);

        let scan = tree::scan_disk(&register, &self.config, None).await?;
        let desired: BTreeMap<GamePath, DiskFile> = scan
            .entries
            .iter()
            .cloned()
            .map(|e| {
                let file = DiskFile {
                    hash: e.hash,
                    size: e.size,
                    modified: e.last_modified,
                };
                (e.path, file)
            })
            .collect();
        let current = DiskStateEntry::for_install(&snapshot, install)?;

        let mut tx = self.store.begin();
        let changes = executor::write_disk_state(&mut tx, install, &current, &desired, |path| {
            game.is_ignored_path(path) || scan.is_unreadable(path)
        })?;
        if changes == 0 {
            tracing::debug!(%install, "rescan found no changes");
            return Ok(false);
        }
        GameInstallMetadata::mark_scanned(&mut tx, install)?;
        let committed = self.store.commit(tx)?;
        tracing::info!(%install, changes, tx = %committed, "recorded rescan");
        Ok(true)
    }

    async fn prepare(
        &self,
        loadout: LoadoutId,
        direction: SyncDirection,
        cancel: Option<&CancelReceiver>,
    ) -> Result<Prepared> {
        let snapshot = self.store.snapshot();
        let loadout = Loadout::load(&snapshot, loadout)?;
        let install = GameInstallMetadata::load(&snapshot, loadout.game_install)?;
        let game = self.games.get(&install.game_id)?;
        let register = self.register_for(&install);

        let plan = flatten(&loadout, game.as_ref(), &self.sort_cache)?;

        let previous_tx = install
            .last_synced_loadout_tx
            .or(install.initial_disk_state_tx);
        let previous = match previous_tx {
            Some(tx) => DiskStateEntry::for_install(&self.store.as_of(tx)?, install.id)?,
            None => Vec::new(),
        };

        let scan = tree::scan_disk(&register, &self.config, cancel).await?;
        let mut disk = scan.entries;
        if register.is_case_insensitive() {
            tree::align_case(&mut disk, &previous, &plan);
        }

        let mut tree = tree::build_sync_tree(&disk, &previous, &plan, game.as_ref());
        tree::mark_unreadable(&mut tree, &scan.unreadable, game.as_ref());
        tree::process_sync_tree(
            &mut tree,
            self.content.as_ref(),
            game.as_ref(),
            &self.config,
            direction,
        )
        .await?;

        Ok(Prepared {
            loadout,
            install,
            register,
            plan,
            tree,
        })
    }

    /// Build the processed sync tree of a loadout without changing anything.
    pub async fn build_sync_tree(&self, loadout: LoadoutId) -> Result<SyncTree> {
        Ok(self.prepare(loadout, SyncDirection::Auto, None).await?.tree)
    }

    /// Count what a synchronize would do.
    pub async fn preview(&self, loadout: LoadoutId) -> Result<SyncPreview> {
        let tree = self.build_sync_tree(loadout).await?;
        let mut preview = SyncPreview {
            total_paths: tree.len(),
            ..SyncPreview::default()
        };
        for node in tree.values() {
            preview.actions.record(node.actions);
            if !node.actions.is_empty() {
                preview.paths_with_actions += 1;
            }
        }
        Ok(preview)
    }

    /// Whether any path of the loadout needs an action.
    pub async fn should_synchronize(&self, loadout: LoadoutId) -> Result<bool> {
        let tree = self.build_sync_tree(loadout).await?;
        Ok(tree.values().any(|node| !node.actions.is_empty()))
    }

    /// Synchronize a loadout with its game folder.
    ///
    /// When another loadout was applied last, its disk changes are ingested
    /// into it first. After a successful commit, overrides that merely
    /// restate a game file are dropped.
    ///
    /// # Errors
    ///
    /// Fatal conditions only; per-path problems are in the report.
    pub async fn synchronize(&self, loadout: LoadoutId, options: SyncOptions) -> Result<SyncReport> {
        let install = Loadout::load(&self.store.snapshot(), loadout)?.game_install;
        let lock = self.install_lock(install);
        let _guard = lock.lock().await;

        let meta = GameInstallMetadata::load(&self.store.snapshot(), install)?;
        let mut report = SyncReport::default();

        if let Some(previous) = meta.last_synced_loadout
            && previous != loadout
            && !options.dry_run
        {
            tracing::info!(from = %previous, to = %loadout, "switching loadouts");
            send_status(options.status.as_ref(), SyncStatus::SwitchingLoadout);
            report = self.run(previous, SyncDirection::Ingest, &options).await?;
        }

        let main = self.run(loadout, options.direction, &options).await?;
        let report = report.merge(main);
        send_status(
            options.status.as_ref(),
            SyncStatus::Done {
                files_changed: report.files_changed,
            },
        );
        Ok(report)
    }

    async fn run(
        &self,
        loadout: LoadoutId,
        direction: SyncDirection,
        options: &SyncOptions,
    ) -> Result<SyncReport> {
        let cancel = options.cancel.as_ref();
        let status = options.status.as_ref();

        send_status(status, SyncStatus::Scanning);
        let prepared = self.prepare(loadout, direction, cancel).await?;
        send_status(status, SyncStatus::Planning);
        tracing::debug!(
            loadout = %prepared.loadout.name,
            files = prepared.plan.len(),
            conflicts = prepared.plan.conflicts.len(),
            paths = prepared.tree.len(),
            ?direction,
            "prepared sync tree"
        );

        if options.dry_run {
            return Ok(dry_run_report(&prepared.tree));
        }

        let ctx = ExecutionContext {
            store: self.store.as_ref(),
            content: self.content.as_ref(),
            register: &prepared.register,
            config: &self.config,
            install: prepared.install.id,
            loadout: &prepared.loadout,
            cancel,
            status,
        };
        let report = executor::execute(&prepared.tree, &ctx).await?;

        if report.committed_tx.is_some() {
            self.reprocess_overrides(loadout)?;
        }
        Ok(report)
    }

    /// Drop override files whose content equals the game file at the same
    /// path, when the path still flattens to that content without them.
    fn reprocess_overrides(&self, loadout: LoadoutId) -> Result<usize> {
        let snapshot = self.store.snapshot();
        let loadout = Loadout::load(&snapshot, loadout)?;
        let (Some(overrides), Some(game_files)) = (
            loadout.mod_of_kind(ModKind::Overrides),
            loadout.mod_of_kind(ModKind::GameFiles),
        ) else {
            return Ok(0);
        };

        let restating: Vec<&ModFile> = overrides
            .files
            .iter()
            .filter(|f| !f.deleted)
            .filter(|f| {
                game_files
                    .file_at(&f.path)
                    .is_some_and(|g| !g.deleted && g.hash == f.hash)
            })
            .collect();
        if restating.is_empty() {
            return Ok(0);
        }

        // A normal mod may still provide the path; keep the override then
        let mut without = loadout.clone();
        if let Some(m) = without.mods.iter_mut().find(|m| m.id == overrides.id) {
            m.files.retain(|f| !restating.iter().any(|r| r.id == f.id));
        }
        let meta = GameInstallMetadata::load(&snapshot, loadout.game_install)?;
        let game = self.games.get(&meta.game_id)?;
        let plan = flatten(&without, game.as_ref(), &self.sort_cache)?;

        let mut tx = self.store.begin();
        let mut removed = 0;
        for file in restating {
            let unchanged = plan.file(&file.path).is_some_and(|w| w.hash == file.hash);
            if unchanged {
                ModFile::remove(&mut tx, file.id);
                removed += 1;
            }
        }
        if removed > 0 {
            self.store.commit(tx)?;
            tracing::debug!(loadout = %loadout.name, removed, "dropped redundant overrides");
        }
        Ok(removed)
    }
}

fn dry_run_report(tree: &SyncTree) -> SyncReport {
    let mut report = SyncReport::default();
    let mut actions = ActionCounts::default();
    for (path, node) in tree {
        actions.record(node.actions);
        if node.actions.intersects(Actions::DISK_MUTATIONS | Actions::LOADOUT_MUTATIONS) {
            report.files_changed += 1;
        }
        let kinds = [
            (Actions::WARN_OF_UNABLE_TO_EXTRACT, DiagnosticKind::UnableToExtract),
            (Actions::WARN_OF_CONFLICT, DiagnosticKind::Conflict),
        ];
        let mut warned = false;
        for (flag, kind) in kinds {
            if node.actions.contains(flag) {
                report.diagnostics.push(Diagnostic {
                    path: path.clone(),
                    kind,
                    message: format!("would warn ({})", node.signature),
                });
                warned = true;
            }
        }
        if warned {
            report.files_warned += 1;
        }
        if let Some(message) = &node.scan_error
            && !node.path_is_ignored
        {
            report.failures.push(PathFailure {
                path: path.clone(),
                action: Actions::DO_NOTHING,
                message: format!("unreadable during scan: {message}"),
            });
        }
    }
    report.actions = actions;
    report
}
