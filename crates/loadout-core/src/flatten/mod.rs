//! Mod flattening
//!
//! Resolves the load order of a loadout and collapses every mod's files into
//! a single map from path to the file that wins it. Pure: reads only the
//! loadout value it is given.

mod sort;

pub use sort::{SortCache, fingerprint, sort_mods};

use std::collections::BTreeMap;

use loadout_fs::{GamePath, Hash, Size};

use crate::Result;
use crate::game::{GameDefinition, apply_transforms};
use crate::model::{FileId, Loadout, Mod, ModFile, ModId, ModKind, SourceItemType};

/// The file that wins a path after flattening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenedFile {
    pub mod_id: ModId,
    pub file_id: FileId,
    pub hash: Hash,
    pub size: Size,
    pub source: SourceItemType,
}

/// A path provided by more than one mod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileConflict {
    pub path: GamePath,
    /// Providers in load order.
    pub candidates: Vec<ModId>,
    pub winner: ModId,
    pub overridden: Vec<ModId>,
}

/// Result of flattening one loadout. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Every enabled mod in load order, game files first, overrides last.
    pub sorted_mods: Vec<ModId>,
    pub flattened_files: BTreeMap<GamePath, FlattenedFile>,
    pub conflicts: Vec<FileConflict>,
}

impl Plan {
    pub fn file(&self, path: &GamePath) -> Option<&FlattenedFile> {
        self.flattened_files.get(path)
    }

    pub fn len(&self) -> usize {
        self.flattened_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flattened_files.is_empty()
    }
}

/// Enabled mods of one kind in creation order.
fn enabled_of(loadout: &Loadout, kind: ModKind) -> Vec<&Mod> {
    let mut mods: Vec<&Mod> = loadout
        .mods
        .iter()
        .filter(|m| m.enabled && m.kind == kind)
        .collect();
    mods.sort_by_key(|m| m.id);
    mods
}

/// Flatten `loadout` after applying `game`'s transforms.
///
/// # Errors
///
/// [`Error::SortCycle`](crate::Error::SortCycle) when the normal mods'
/// rules cannot be ordered.
pub fn flatten(loadout: &Loadout, game: &dyn GameDefinition, cache: &SortCache) -> Result<Plan> {
    let loadout = apply_transforms(game, loadout.clone());

    let normal = enabled_of(&loadout, ModKind::Normal);
    let normal_order = cache.sorted(loadout.id, &normal)?;

    let by_id: BTreeMap<ModId, &Mod> = loadout.mods.iter().map(|m| (m.id, m)).collect();
    let ordered: Vec<&Mod> = enabled_of(&loadout, ModKind::GameFiles)
        .into_iter()
        .chain(normal_order.iter().filter_map(|id| by_id.get(id).copied()))
        .chain(enabled_of(&loadout, ModKind::Overrides))
        .collect();

    let mut providers: BTreeMap<&GamePath, Vec<(&Mod, &ModFile)>> = BTreeMap::new();
    for m in &ordered {
        for file in &m.files {
            providers.entry(&file.path).or_default().push((m, file));
        }
    }

    let explicit: BTreeMap<&GamePath, ModId> = loadout
        .file_overrides
        .iter()
        .map(|o| (&o.path, o.winner))
        .collect();

    let mut plan = Plan {
        sorted_mods: ordered.iter().map(|m| m.id).collect(),
        ..Plan::default()
    };

    for (path, candidates) in providers {
        let Some(&(last_mod, last_file)) = candidates.last() else {
            continue;
        };
        let (winner_mod, winner_file) = explicit
            .get(path)
            .and_then(|id| candidates.iter().rev().find(|(m, _)| m.id == *id))
            .copied()
            .unwrap_or((last_mod, last_file));

        let mut contenders: Vec<ModId> = candidates
            .iter()
            .filter(|(m, f)| !f.deleted && m.kind != ModKind::GameFiles)
            .map(|(m, _)| m.id)
            .collect();
        // A mod's files for one path are adjacent
        contenders.dedup();
        if contenders.len() > 1 {
            plan.conflicts.push(FileConflict {
                path: path.clone(),
                overridden: contenders
                    .iter()
                    .copied()
                    .filter(|id| *id != winner_mod.id)
                    .collect(),
                candidates: contenders,
                winner: winner_mod.id,
            });
        }

        if winner_file.deleted {
            continue;
        }
        let source = match winner_mod.kind {
            ModKind::GameFiles => SourceItemType::Game,
            ModKind::Normal | ModKind::Overrides => SourceItemType::Loadout,
        };
        plan.flattened_files.insert(
            path.clone(),
            FlattenedFile {
                mod_id: winner_mod.id,
                file_id: winner_file.id,
                hash: winner_file.hash,
                size: winner_file.size,
                source,
            },
        );
    }

    tracing::debug!(
        loadout = %loadout.name,
        mods = plan.sorted_mods.len(),
        files = plan.flattened_files.len(),
        conflicts = plan.conflicts.len(),
        "flattened loadout"
    );
    Ok(plan)
}
