//! Transactional entity store
//!
//! State is a map of entities, each a map of attribute name to JSON value.
//! Every change is recorded as an ordered list of [`Op`]s inside a numbered
//! transaction, so any past state can be reconstructed with
//! [`EntityStore::as_of`]. The synchronizer relies on this to recover the
//! "previous" disk state from a transaction watermark.
//!
//! Commits are optimistic: a [`Transaction`] remembers the transaction it was
//! based on, and committing it after another commit landed fails with
//! [`Error::StoreConflict`].

mod file;
mod memory;
pub mod migrate;

pub use file::FileEntityStore;
pub use memory::MemoryEntityStore;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{EntityId, TxId};
use crate::{Error, Result};

/// Attribute map of one entity.
pub type Entity = BTreeMap<String, Value>;

/// A single change inside a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Put {
        entity: EntityId,
        attribute: String,
        value: Value,
    },
    Retract {
        entity: EntityId,
        attribute: String,
    },
    Delete {
        entity: EntityId,
    },
}

impl Op {
    pub fn entity(&self) -> EntityId {
        match self {
            Self::Put { entity, .. } | Self::Retract { entity, .. } | Self::Delete { entity } => {
                *entity
            }
        }
    }
}

/// A committed transaction as it appears in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRecord {
    pub tx: TxId,
    pub committed_at: DateTime<Utc>,
    pub ops: Vec<Op>,
}

/// Immutable view of the store as of one transaction.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    tx: TxId,
    entities: Arc<BTreeMap<EntityId, Entity>>,
}

impl Snapshot {
    pub fn tx(&self) -> TxId {
        self.tx
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Decode one attribute. `Ok(None)` when the entity or attribute is absent.
    pub fn get<T: DeserializeOwned>(&self, id: EntityId, attribute: &str) -> Result<Option<T>> {
        match self.entities.get(&id).and_then(|e| e.get(attribute)) {
            Some(value) => Ok(Some(T::deserialize(value).map_err(|e| {
                Error::corrupt(format!("{id} attribute '{attribute}': {e}"))
            })?)),
            None => Ok(None),
        }
    }

    /// Decode one attribute that must be present.
    pub fn require<T: DeserializeOwned>(&self, id: EntityId, attribute: &str) -> Result<T> {
        self.get(id, attribute)?
            .ok_or_else(|| Error::MissingAttribute {
                entity: id,
                attribute: attribute.to_string(),
            })
    }

    /// Entities whose `attribute` equals `value`, in creation order.
    pub fn find<'a>(
        &'a self,
        attribute: &'a str,
        value: &'a Value,
    ) -> impl Iterator<Item = EntityId> + 'a {
        self.entities
            .iter()
            .filter(move |(_, e)| e.get(attribute) == Some(value))
            .map(|(id, _)| *id)
    }

    /// Entities that carry `attribute`, in creation order.
    pub fn with_attribute<'a>(&'a self, attribute: &'a str) -> impl Iterator<Item = EntityId> + 'a {
        self.entities
            .iter()
            .filter(move |(_, e)| e.contains_key(attribute))
            .map(|(id, _)| *id)
    }
}

/// Pending changes, committed all-or-nothing through [`EntityStore::commit`].
#[derive(Debug, Clone)]
pub struct Transaction {
    base: TxId,
    next_entity: u64,
    ops: Vec<Op>,
}

impl Transaction {
    pub(crate) fn new(base: TxId, next_entity: u64) -> Self {
        Self {
            base,
            next_entity,
            ops: Vec::new(),
        }
    }

    /// Transaction this one was started from.
    pub fn base(&self) -> TxId {
        self.base
    }

    /// Id this transaction will receive when committed.
    pub fn this_tx(&self) -> TxId {
        self.base.next()
    }

    pub fn new_entity(&mut self) -> EntityId {
        let id = EntityId(self.next_entity);
        self.next_entity += 1;
        id
    }

    pub fn put(&mut self, entity: EntityId, attribute: &str, value: impl Serialize) -> Result<()> {
        self.ops.push(Op::Put {
            entity,
            attribute: attribute.to_string(),
            value: serde_json::to_value(value)?,
        });
        Ok(())
    }

    pub fn retract(&mut self, entity: EntityId, attribute: &str) {
        self.ops.push(Op::Retract {
            entity,
            attribute: attribute.to_string(),
        });
    }

    pub fn delete(&mut self, entity: EntityId) {
        self.ops.push(Op::Delete { entity });
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn into_ops(self) -> Vec<Op> {
        self.ops
    }
}

/// Transactional get/put of entity attributes with point-in-time reads.
pub trait EntityStore: Send + Sync {
    /// Most recently committed transaction.
    fn current_tx(&self) -> TxId;

    /// State as of the current transaction.
    fn snapshot(&self) -> Snapshot;

    /// State as of a past transaction.
    fn as_of(&self, tx: TxId) -> Result<Snapshot>;

    fn begin(&self) -> Transaction;

    /// Apply all of `tx` or none of it. Empty transactions commit nothing
    /// and return the current id.
    fn commit(&self, tx: Transaction) -> Result<TxId>;
}

/// In-memory log plus materialized head state, shared by the store
/// implementations.
#[derive(Debug, Default)]
pub(crate) struct LogState {
    log: Vec<TxRecord>,
    head: Snapshot,
    next_entity: u64,
}

fn apply_op(entities: &mut BTreeMap<EntityId, Entity>, op: &Op) {
    match op {
        Op::Put {
            entity,
            attribute,
            value,
        } => {
            entities
                .entry(*entity)
                .or_default()
                .insert(attribute.clone(), value.clone());
        }
        Op::Retract { entity, attribute } => {
            if let Some(e) = entities.get_mut(entity) {
                e.remove(attribute);
                if e.is_empty() {
                    entities.remove(entity);
                }
            }
        }
        Op::Delete { entity } => {
            entities.remove(entity);
        }
    }
}

impl LogState {
    pub(crate) fn replay(records: Vec<TxRecord>) -> Result<Self> {
        let mut state = Self {
            next_entity: 1,
            ..Self::default()
        };
        for record in records {
            state.apply(record)?;
        }
        Ok(state)
    }

    pub(crate) fn current_tx(&self) -> TxId {
        self.head.tx
    }

    pub(crate) fn head(&self) -> Snapshot {
        self.head.clone()
    }

    pub(crate) fn records(&self) -> &[TxRecord] {
        &self.log
    }

    pub(crate) fn as_of(&self, tx: TxId) -> Result<Snapshot> {
        if tx == self.head.tx {
            return Ok(self.head.clone());
        }
        if tx > self.head.tx {
            return Err(Error::NotFound(format!("transaction {tx}")));
        }
        let mut entities = BTreeMap::new();
        for record in self.log.iter().take_while(|r| r.tx <= tx) {
            for op in &record.ops {
                apply_op(&mut entities, op);
            }
        }
        Ok(Snapshot {
            tx,
            entities: Arc::new(entities),
        })
    }

    pub(crate) fn begin(&self) -> Transaction {
        Transaction::new(self.head.tx, self.next_entity.max(1))
    }

    /// Validate `tx` against the head and turn it into the next log record.
    pub(crate) fn prepare(&self, tx: Transaction) -> Result<TxRecord> {
        if tx.base != self.head.tx {
            return Err(Error::StoreConflict {
                base: tx.base,
                current: self.head.tx,
            });
        }
        Ok(TxRecord {
            tx: tx.this_tx(),
            committed_at: Utc::now(),
            ops: tx.into_ops(),
        })
    }

    pub(crate) fn apply(&mut self, record: TxRecord) -> Result<()> {
        if record.tx != self.head.tx.next() {
            return Err(Error::corrupt(format!(
                "transaction {} follows {}",
                record.tx, self.head.tx
            )));
        }
        let entities = Arc::make_mut(&mut self.head.entities);
        for op in &record.ops {
            apply_op(entities, op);
            self.next_entity = self.next_entity.max(op.entity().0 + 1);
        }
        self.head.tx = record.tx;
        self.log.push(record);
        Ok(())
    }
}
