//! Typed records stored in the entity store
//!
//! Records are plain structs read from a [`Snapshot`](crate::store::Snapshot)
//! and written through a [`Transaction`](crate::store::Transaction) using the
//! attribute names in [`attrs`].

pub mod attrs;
mod install;
mod loadout;

pub use install::{DiskStateEntry, GameInstallMetadata};
pub use loadout::{ConflictOverride, Loadout, Mod, ModFile, ModKind, NewModFile, SortRule};

use std::fmt;

use loadout_fs::{Hash, Size};
use serde::{Deserialize, Serialize};

/// Identity of an entity. Ids increase monotonically, so ordering by id is
/// ordering by creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Identity of a committed transaction. `TxId(0)` is the empty store.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TxId(pub u64);

impl TxId {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub EntityId);

        impl $name {
            pub fn entity(self) -> EntityId {
                self.0
            }
        }

        impl From<EntityId> for $name {
            fn from(id: EntityId) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

typed_id!(
    /// A mod within a loadout.
    ModId
);
typed_id!(
    /// A file provided by a mod.
    FileId
);
typed_id!(LoadoutId);
typed_id!(
    /// A managed game installation.
    GameInstallId
);

/// One side's knowledge of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStateEntry {
    pub hash: Hash,
    pub size: Size,
    /// The content store retains bytes for `hash`.
    pub is_archived: bool,
}

impl FileStateEntry {
    pub fn new(hash: Hash, size: Size) -> Self {
        Self {
            hash,
            size,
            is_archived: false,
        }
    }
}

/// Where the loadout side of a path comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceItemType {
    /// Part of the game as originally installed.
    Game,
    /// Provided by a user mod (including the overrides group).
    Loadout,
    /// A reified delete. Never appears in a sync tree.
    Deleted,
}
