//! Actions that reconcile a classified path

use std::fmt;

use serde::{Deserialize, Serialize};

use super::signature::Signature;

flag_set! {
    /// What to do with one path. The empty set is [`Actions::DO_NOTHING`].
    Actions {
        /// Copy the disk file into the content store before it is replaced.
        BACKUP_FILE = 1 << 0,
        /// Record the disk content in the loadout's overrides.
        INGEST_FROM_DISK = 1 << 1,
        DELETE_FROM_DISK = 1 << 2,
        EXTRACT_TO_DISK = 1 << 3,
        /// Record in the loadout that the user deleted the path.
        ADD_REIFIED_DELETE = 1 << 4,
        /// The loadout wants content the store does not hold.
        WARN_OF_UNABLE_TO_EXTRACT = 1 << 5,
        /// Disk, previous and loadout all differ and nothing can be preserved.
        WARN_OF_CONFLICT = 1 << 6,
    }
}

impl Actions {
    pub const DO_NOTHING: Self = Self::empty();

    /// Actions that write to the game folder.
    pub const DISK_MUTATIONS: Self = Self(Self::DELETE_FROM_DISK.0 | Self::EXTRACT_TO_DISK.0);

    /// Actions that write to the loadout.
    pub const LOADOUT_MUTATIONS: Self =
        Self(Self::INGEST_FROM_DISK.0 | Self::ADD_REIFIED_DELETE.0);

    pub const WARNINGS: Self =
        Self(Self::WARN_OF_UNABLE_TO_EXTRACT.0 | Self::WARN_OF_CONFLICT.0);
}

impl fmt::Display for Actions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("DO_NOTHING");
        }
        let names: Vec<&str> = self.names().collect();
        f.write_str(&names.join("|"))
    }
}

/// Resolve the actions for a signature.
///
/// Pure and total over every bit pattern. Ignored paths never get actions.
pub fn resolve(signature: Signature) -> Actions {
    if signature.contains(Signature::PATH_IS_IGNORED) {
        return Actions::DO_NOTHING;
    }

    let sig = signature.canonicalize();
    let disk_archived = sig.contains(Signature::DISK_ARCHIVED);
    let loadout_archived = sig.contains(Signature::LOADOUT_ARCHIVED);

    let backup = if disk_archived {
        Actions::DO_NOTHING
    } else {
        Actions::BACKUP_FILE
    };
    let extract_or_warn = if loadout_archived {
        Actions::EXTRACT_TO_DISK
    } else {
        Actions::WARN_OF_UNABLE_TO_EXTRACT
    };

    match &sig.shape() {
        b"xxx" | b"xAx" => Actions::DO_NOTHING,
        b"xxA" | b"xAB" => extract_or_warn,
        // Applied earlier, gone from disk now: the user deleted it.
        b"xAA" => {
            if loadout_archived {
                Actions::ADD_REIFIED_DELETE
            } else {
                Actions::WARN_OF_UNABLE_TO_EXTRACT
            }
        }
        b"Axx" | b"AxB" | b"ABB" => Actions::INGEST_FROM_DISK | backup,
        b"AxA" | b"AAA" | b"ABA" => backup,
        b"AAx" | b"ABx" => Actions::DELETE_FROM_DISK | backup,
        b"AAB" => {
            if loadout_archived {
                Actions::DELETE_FROM_DISK | Actions::EXTRACT_TO_DISK | backup
            } else {
                Actions::WARN_OF_UNABLE_TO_EXTRACT
            }
        }
        b"ABC" => {
            if disk_archived {
                Actions::INGEST_FROM_DISK
            } else if loadout_archived {
                Actions::BACKUP_FILE | Actions::INGEST_FROM_DISK
            } else {
                Actions::WARN_OF_CONFLICT
            }
        }
        _ => Actions::DO_NOTHING,
    }
}

/// Which way a synchronize may move content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Apply the loadout and ingest external changes in one pass.
    #[default]
    Auto,
    /// Make disk match the loadout; never write to the loadout.
    Apply,
    /// Capture disk changes into the loadout; never write to disk.
    Ingest,
}

impl SyncDirection {
    /// Restrict resolved actions to this direction.
    pub fn filter(self, signature: Signature, actions: Actions) -> Actions {
        match self {
            SyncDirection::Auto => actions,
            SyncDirection::Ingest => {
                actions - (Actions::DISK_MUTATIONS | Actions::WARN_OF_UNABLE_TO_EXTRACT)
            }
            SyncDirection::Apply => {
                let sig = signature.canonicalize();
                let restore = if sig.contains(Signature::LOADOUT_ARCHIVED) {
                    Actions::EXTRACT_TO_DISK
                } else {
                    Actions::WARN_OF_UNABLE_TO_EXTRACT
                };

                let mut out = actions - Actions::LOADOUT_MUTATIONS;
                if actions.contains(Actions::INGEST_FROM_DISK) {
                    if !sig.contains(Signature::LOADOUT_EXISTS) {
                        out |= Actions::DELETE_FROM_DISK;
                    } else if restore == Actions::EXTRACT_TO_DISK {
                        out |= Actions::DELETE_FROM_DISK | Actions::EXTRACT_TO_DISK;
                    } else {
                        out |= Actions::WARN_OF_UNABLE_TO_EXTRACT;
                    }
                }
                if actions.contains(Actions::ADD_REIFIED_DELETE) {
                    out |= restore;
                }
                out
            }
        }
    }
}
