use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{EntityStore, LogState, Snapshot, Transaction};
use crate::Result;
use crate::model::TxId;

/// Entity store held entirely in memory.
#[derive(Debug)]
pub struct MemoryEntityStore {
    state: RwLock<LogState>,
}

impl Default for MemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LogState {
                next_entity: 1,
                ..LogState::default()
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LogState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LogState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EntityStore for MemoryEntityStore {
    fn current_tx(&self) -> TxId {
        self.read().current_tx()
    }

    fn snapshot(&self) -> Snapshot {
        self.read().head()
    }

    fn as_of(&self, tx: TxId) -> Result<Snapshot> {
        self.read().as_of(tx)
    }

    fn begin(&self) -> Transaction {
        self.read().begin()
    }

    fn commit(&self, tx: Transaction) -> Result<TxId> {
        let mut state = self.write();
        if tx.is_empty() && tx.base() == state.current_tx() {
            return Ok(state.current_tx());
        }
        let record = state.prepare(tx)?;
        let id = record.tx;
        state.apply(record)?;
        tracing::debug!(%id, "committed transaction");
        Ok(id)
    }
}
