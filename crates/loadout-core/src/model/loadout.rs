use std::collections::BTreeMap;

use loadout_fs::{GamePath, Hash, Size};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::attrs;
use super::{EntityId, FileId, GameInstallId, LoadoutId, ModId};
use crate::store::{Snapshot, Transaction};
use crate::{Error, Result};

/// Role of a mod during flattening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModKind {
    Normal,
    /// Files of the unmodified game. Always loses conflicts.
    GameFiles,
    /// Files ingested from disk. Always wins conflicts.
    Overrides,
}

/// Partial-order constraint relative to another mod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortRule {
    /// This mod loads before the target.
    Before(ModId),
    /// This mod loads after the target.
    After(ModId),
}

/// Explicit winner for one conflicting path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictOverride {
    pub path: GamePath,
    pub winner: ModId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModFile {
    pub id: FileId,
    pub path: GamePath,
    pub hash: Hash,
    pub size: Size,
    /// A reified delete: the path must not exist.
    pub deleted: bool,
}

/// Input for [`ModFile::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewModFile {
    pub path: GamePath,
    pub hash: Hash,
    pub size: Size,
    pub deleted: bool,
}

impl NewModFile {
    pub fn new(path: GamePath, hash: Hash, size: Size) -> Self {
        Self {
            path,
            hash,
            size,
            deleted: false,
        }
    }

    pub fn deletion(path: GamePath) -> Self {
        Self {
            path,
            hash: Hash::ZERO,
            size: 0,
            deleted: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mod {
    pub id: ModId,
    pub name: String,
    pub enabled: bool,
    pub kind: ModKind,
    pub rules: Vec<SortRule>,
    pub files: Vec<ModFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loadout {
    pub id: LoadoutId,
    pub name: String,
    pub game_install: GameInstallId,
    /// Mods in creation order.
    pub mods: Vec<Mod>,
    pub file_overrides: Vec<ConflictOverride>,
}

impl Loadout {
    /// Read a loadout with all its mods and files.
    pub fn load(snapshot: &Snapshot, id: LoadoutId) -> Result<Self> {
        let entity = id.entity();
        let name: String = snapshot
            .get(entity, attrs::LOADOUT_NAME)?
            .ok_or_else(|| Error::NotFound(format!("loadout {id}")))?;
        let game_install = snapshot.require(entity, attrs::LOADOUT_INSTALL)?;
        let file_overrides = snapshot
            .get(entity, attrs::LOADOUT_FILE_OVERRIDES)?
            .unwrap_or_default();

        let owner = json!(entity);
        let mut mods = Vec::new();
        for mod_entity in snapshot.find(attrs::MOD_LOADOUT, &owner) {
            mods.push(Mod {
                id: ModId(mod_entity),
                name: snapshot.require(mod_entity, attrs::MOD_NAME)?,
                enabled: snapshot.get(mod_entity, attrs::MOD_ENABLED)?.unwrap_or(true),
                kind: snapshot.get(mod_entity, attrs::MOD_KIND)?.unwrap_or(ModKind::Normal),
                rules: snapshot.get(mod_entity, attrs::MOD_RULES)?.unwrap_or_default(),
                files: Vec::new(),
            });
        }

        let index: BTreeMap<EntityId, usize> = mods
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.entity(), i))
            .collect();
        for file_entity in snapshot.with_attribute(attrs::FILE_MOD) {
            let owner: EntityId = snapshot.require(file_entity, attrs::FILE_MOD)?;
            let Some(&slot) = index.get(&owner) else {
                continue;
            };
            mods[slot].files.push(ModFile {
                id: FileId(file_entity),
                path: snapshot.require(file_entity, attrs::FILE_PATH)?,
                hash: snapshot.get(file_entity, attrs::FILE_HASH)?.unwrap_or(Hash::ZERO),
                size: snapshot.get(file_entity, attrs::FILE_SIZE)?.unwrap_or(0),
                deleted: snapshot.get(file_entity, attrs::FILE_DELETED)?.unwrap_or(false),
            });
        }

        Ok(Self {
            id,
            name,
            game_install,
            mods,
            file_overrides,
        })
    }

    pub fn create(tx: &mut Transaction, install: GameInstallId, name: &str) -> Result<LoadoutId> {
        let entity = tx.new_entity();
        tx.put(entity, attrs::LOADOUT_NAME, name)?;
        tx.put(entity, attrs::LOADOUT_INSTALL, install)?;
        Ok(LoadoutId(entity))
    }

    /// Loadouts belonging to an installation, in creation order.
    pub fn for_install(snapshot: &Snapshot, install: GameInstallId) -> Vec<LoadoutId> {
        let owner = json!(install);
        snapshot
            .find(attrs::LOADOUT_INSTALL, &owner)
            .map(LoadoutId)
            .collect()
    }

    pub fn set_file_overrides(
        tx: &mut Transaction,
        id: LoadoutId,
        overrides: &[ConflictOverride],
    ) -> Result<()> {
        tx.put(id.entity(), attrs::LOADOUT_FILE_OVERRIDES, overrides)
    }

    pub fn get_mod(&self, id: ModId) -> Option<&Mod> {
        self.mods.iter().find(|m| m.id == id)
    }

    /// First mod of `kind`, by creation order.
    pub fn mod_of_kind(&self, kind: ModKind) -> Option<&Mod> {
        self.mods.iter().find(|m| m.kind == kind)
    }

    pub fn mod_by_name(&self, name: &str) -> Option<&Mod> {
        self.mods.iter().find(|m| m.name == name)
    }
}

impl Mod {
    pub fn create(
        tx: &mut Transaction,
        loadout: LoadoutId,
        name: &str,
        kind: ModKind,
    ) -> Result<ModId> {
        let entity = tx.new_entity();
        tx.put(entity, attrs::MOD_LOADOUT, loadout)?;
        tx.put(entity, attrs::MOD_NAME, name)?;
        tx.put(entity, attrs::MOD_ENABLED, true)?;
        tx.put(entity, attrs::MOD_KIND, kind)?;
        Ok(ModId(entity))
    }

    pub fn set_enabled(tx: &mut Transaction, id: ModId, enabled: bool) -> Result<()> {
        tx.put(id.entity(), attrs::MOD_ENABLED, enabled)
    }

    pub fn set_rules(tx: &mut Transaction, id: ModId, rules: &[SortRule]) -> Result<()> {
        tx.put(id.entity(), attrs::MOD_RULES, rules)
    }

    /// Delete the mod and every file it owns.
    pub fn remove(tx: &mut Transaction, the_mod: &Mod) {
        for file in &the_mod.files {
            tx.delete(file.id.entity());
        }
        tx.delete(the_mod.id.entity());
    }

    pub fn file_at(&self, path: &GamePath) -> Option<&ModFile> {
        self.files.iter().find(|f| &f.path == path)
    }
}

impl ModFile {
    pub fn add(tx: &mut Transaction, owner: ModId, file: NewModFile) -> Result<FileId> {
        let entity = tx.new_entity();
        tx.put(entity, attrs::FILE_MOD, owner)?;
        tx.put(entity, attrs::FILE_PATH, &file.path)?;
        if file.deleted {
            tx.put(entity, attrs::FILE_DELETED, true)?;
        } else {
            tx.put(entity, attrs::FILE_HASH, file.hash)?;
            tx.put(entity, attrs::FILE_SIZE, file.size)?;
        }
        Ok(FileId(entity))
    }

    /// Replace the content of an existing file, clearing any reified delete.
    pub fn set_content(tx: &mut Transaction, id: FileId, hash: Hash, size: Size) -> Result<()> {
        tx.put(id.entity(), attrs::FILE_HASH, hash)?;
        tx.put(id.entity(), attrs::FILE_SIZE, size)?;
        tx.retract(id.entity(), attrs::FILE_DELETED);
        Ok(())
    }

    /// Turn an existing file into a reified delete.
    pub fn mark_deleted(tx: &mut Transaction, id: FileId) -> Result<()> {
        tx.put(id.entity(), attrs::FILE_DELETED, true)?;
        tx.retract(id.entity(), attrs::FILE_HASH);
        tx.retract(id.entity(), attrs::FILE_SIZE);
        Ok(())
    }

    pub fn remove(tx: &mut Transaction, id: FileId) {
        tx.delete(id.entity());
    }
}
