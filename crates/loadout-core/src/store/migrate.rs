//! Explicit schema migrations for persisted transaction logs
//!
//! Each migration rewrites the ops of every recorded transaction from one
//! schema version to the next. Migrations run in order on load.

use super::{Op, TxRecord};
use crate::model::attrs;
use crate::{Error, Result};

/// Schema version written by this build.
pub const CURRENT_SCHEMA: u32 = 2;

type Migration = fn(&mut Op);

/// `(from_version, migration)`, ascending.
const MIGRATIONS: &[(u32, Migration)] = &[(1, rename_last_applied)];

/// Version 1 named the sync watermarks after "apply".
fn rename_last_applied(op: &mut Op) {
    let attribute = match op {
        Op::Put { attribute, .. } | Op::Retract { attribute, .. } => attribute,
        Op::Delete { .. } => return,
    };
    let renamed = match attribute.as_str() {
        "game/last_applied" => attrs::GAME_LAST_SYNCED_LOADOUT,
        "game/last_applied_tx" => attrs::GAME_LAST_SYNCED_LOADOUT_TX,
        _ => return,
    };
    *attribute = renamed.to_string();
}

/// Bring `records` from schema `from` up to [`CURRENT_SCHEMA`].
pub fn migrate(from: u32, records: &mut [TxRecord]) -> Result<u32> {
    if from == 0 || from > CURRENT_SCHEMA {
        return Err(Error::corrupt(format!("cannot migrate from schema {from}")));
    }
    let mut version = from;
    for (step_from, migration) in MIGRATIONS {
        if *step_from < version {
            continue;
        }
        tracing::info!(from = step_from, to = step_from + 1, "migrating transaction log");
        for record in records.iter_mut() {
            record.ops.iter_mut().for_each(migration);
        }
        version = step_from + 1;
    }
    Ok(version)
}
