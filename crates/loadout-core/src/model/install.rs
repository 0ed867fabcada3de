use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use loadout_fs::{GamePath, Hash, LocationId, LocationRegister, Size};
use serde_json::json;

use super::attrs;
use super::{EntityId, GameInstallId, LoadoutId, TxId};
use crate::store::{Snapshot, Transaction};
use crate::{Error, Result};

/// A managed game installation and its synchronization watermarks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameInstallMetadata {
    pub id: GameInstallId,
    pub game_id: String,
    pub locations: BTreeMap<LocationId, PathBuf>,
    pub last_synced_loadout: Option<LoadoutId>,
    /// Transaction that committed the last synchronize.
    pub last_synced_loadout_tx: Option<TxId>,
    /// Transaction holding the disk state of the untouched game.
    pub initial_disk_state_tx: Option<TxId>,
    /// Transaction holding the most recently recorded disk state.
    pub last_scanned_disk_state_tx: Option<TxId>,
}

impl GameInstallMetadata {
    pub fn load(snapshot: &Snapshot, id: GameInstallId) -> Result<Self> {
        let entity = id.entity();
        let game_id = snapshot
            .get(entity, attrs::GAME_ID)?
            .ok_or_else(|| Error::NotFound(format!("game installation {id}")))?;
        Ok(Self {
            id,
            game_id,
            locations: snapshot.require(entity, attrs::GAME_LOCATIONS)?,
            last_synced_loadout: snapshot.get(entity, attrs::GAME_LAST_SYNCED_LOADOUT)?,
            last_synced_loadout_tx: snapshot.get(entity, attrs::GAME_LAST_SYNCED_LOADOUT_TX)?,
            initial_disk_state_tx: snapshot.get(entity, attrs::GAME_INITIAL_DISK_STATE_TX)?,
            last_scanned_disk_state_tx: snapshot
                .get(entity, attrs::GAME_LAST_SCANNED_DISK_STATE_TX)?,
        })
    }

    pub fn create(
        tx: &mut Transaction,
        game_id: &str,
        locations: &BTreeMap<LocationId, PathBuf>,
    ) -> Result<GameInstallId> {
        let entity = tx.new_entity();
        tx.put(entity, attrs::GAME_ID, game_id)?;
        tx.put(entity, attrs::GAME_LOCATIONS, locations)?;
        Ok(GameInstallId(entity))
    }

    pub fn register(&self) -> LocationRegister {
        LocationRegister::new(self.locations.clone())
    }

    /// Record a successful synchronize committed by `tx`.
    pub fn mark_synced(tx: &mut Transaction, id: GameInstallId, loadout: LoadoutId) -> Result<()> {
        let this_tx = tx.this_tx();
        tx.put(id.entity(), attrs::GAME_LAST_SYNCED_LOADOUT, loadout)?;
        tx.put(id.entity(), attrs::GAME_LAST_SYNCED_LOADOUT_TX, this_tx)?;
        tx.put(id.entity(), attrs::GAME_LAST_SCANNED_DISK_STATE_TX, this_tx)
    }

    /// Record that `tx` holds a fresh disk scan.
    pub fn mark_scanned(tx: &mut Transaction, id: GameInstallId) -> Result<()> {
        let this_tx = tx.this_tx();
        tx.put(id.entity(), attrs::GAME_LAST_SCANNED_DISK_STATE_TX, this_tx)
    }

    pub fn mark_initial_state(tx: &mut Transaction, id: GameInstallId) -> Result<()> {
        let this_tx = tx.this_tx();
        tx.put(id.entity(), attrs::GAME_INITIAL_DISK_STATE_TX, this_tx)?;
        tx.put(id.entity(), attrs::GAME_LAST_SCANNED_DISK_STATE_TX, this_tx)
    }

    /// Every installation in the store.
    pub fn all(snapshot: &Snapshot) -> Vec<GameInstallId> {
        snapshot
            .with_attribute(attrs::GAME_ID)
            .map(GameInstallId)
            .collect()
    }
}

/// One file of a recorded disk state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskStateEntry {
    pub id: EntityId,
    pub path: GamePath,
    pub hash: Hash,
    pub size: Size,
    pub last_modified: DateTime<Utc>,
}

impl DiskStateEntry {
    /// Disk state of `install` as recorded in `snapshot`, ordered by path.
    pub fn for_install(snapshot: &Snapshot, install: GameInstallId) -> Result<Vec<Self>> {
        let owner = json!(install);
        let mut entries = snapshot
            .find(attrs::DISK_INSTALL, &owner)
            .map(|entity| -> Result<Self> {
                Ok(Self {
                    id: entity,
                    path: snapshot.require(entity, attrs::DISK_PATH)?,
                    hash: snapshot.require(entity, attrs::DISK_HASH)?,
                    size: snapshot.require(entity, attrs::DISK_SIZE)?,
                    last_modified: snapshot.require(entity, attrs::DISK_LAST_MODIFIED)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    pub fn insert(
        tx: &mut Transaction,
        install: GameInstallId,
        path: &GamePath,
        hash: Hash,
        size: Size,
        last_modified: DateTime<Utc>,
    ) -> Result<EntityId> {
        let entity = tx.new_entity();
        tx.put(entity, attrs::DISK_INSTALL, install)?;
        tx.put(entity, attrs::DISK_PATH, path)?;
        Self::update(tx, entity, hash, size, last_modified)?;
        Ok(entity)
    }

    pub fn update(
        tx: &mut Transaction,
        id: EntityId,
        hash: Hash,
        size: Size,
        last_modified: DateTime<Utc>,
    ) -> Result<()> {
        tx.put(id, attrs::DISK_HASH, hash)?;
        tx.put(id, attrs::DISK_SIZE, size)?;
        tx.put(id, attrs::DISK_LAST_MODIFIED, last_modified)
    }

    pub fn remove(tx: &mut Transaction, id: EntityId) {
        tx.delete(id);
    }
}
