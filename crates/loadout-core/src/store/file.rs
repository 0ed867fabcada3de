//! Append-only JSON-lines transaction log
//!
//! Layout: a header line `{"schema":N}` followed by one [`TxRecord`] per
//! line. Appends happen under an exclusive `fs2` lock and are synced before
//! the in-memory state advances. A final line without a trailing newline is
//! a torn write from a crash and is dropped on load.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use fs2::FileExt;
use loadout_fs::{RobustnessConfig, io};
use serde::{Deserialize, Serialize};

use super::migrate::{self, CURRENT_SCHEMA};
use super::{EntityStore, LogState, Snapshot, Transaction, TxRecord};
use crate::model::TxId;
use crate::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    schema: u32,
}

#[derive(Debug)]
struct Inner {
    state: LogState,
    /// Byte length of the log as last seen by this process.
    known_len: u64,
}

/// Entity store persisted to a transaction log file.
#[derive(Debug)]
pub struct FileEntityStore {
    path: PathBuf,
    inner: RwLock<Inner>,
}

struct Loaded {
    records: Vec<TxRecord>,
    needs_rewrite: bool,
}

fn parse_log(path: &Path, content: &str) -> Result<Loaded> {
    let mut lines = content.split_inclusive('\n').enumerate().peekable();

    let Some((_, header_line)) = lines.next() else {
        return Ok(Loaded {
            records: Vec::new(),
            needs_rewrite: true,
        });
    };
    let header: Header = serde_json::from_str(header_line.trim_end())
        .map_err(|e| Error::corrupt(format!("{}: bad header: {e}", path.display())))?;
    if header.schema > CURRENT_SCHEMA {
        return Err(Error::UnsupportedSchema {
            path: path.to_path_buf(),
            found: header.schema,
            supported: CURRENT_SCHEMA,
        });
    }

    let mut records = Vec::new();
    let mut needs_rewrite = !header_line.ends_with('\n');
    while let Some((number, line)) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }
        if !line.ends_with('\n') && lines.peek().is_none() {
            tracing::warn!(
                path = %path.display(),
                line = number + 1,
                "dropping torn transaction at end of log"
            );
            needs_rewrite = true;
            break;
        }
        let record: TxRecord = serde_json::from_str(line.trim_end()).map_err(|e| {
            Error::corrupt(format!("{} line {}: {e}", path.display(), number + 1))
        })?;
        records.push(record);
    }

    if header.schema < CURRENT_SCHEMA {
        migrate::migrate(header.schema, &mut records)?;
        needs_rewrite = true;
    }

    Ok(Loaded {
        records,
        needs_rewrite,
    })
}

fn render_log(records: &[TxRecord]) -> Result<String> {
    let mut out = serde_json::to_string(&Header {
        schema: CURRENT_SCHEMA,
    })?;
    out.push('\n');
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

impl FileEntityStore {
    /// Open the log at `path`, creating it when absent.
    ///
    /// Older schema versions are migrated and the file rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupt`] for unreadable records other than a torn
    /// final line, and [`Error::UnsupportedSchema`] for logs written by a
    /// newer version.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (state, known_len) = Self::load(&path)?;
        tracing::debug!(path = %path.display(), tx = %state.current_tx(), "opened transaction log");
        Ok(Self {
            path,
            inner: RwLock::new(Inner { state, known_len }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<(LogState, u64)> {
        let content = if path.exists() {
            io::read_text(path)?
        } else {
            String::new()
        };

        let loaded = parse_log(path, &content)?;
        let state = LogState::replay(loaded.records)?;

        if loaded.needs_rewrite {
            let rendered = render_log(state.records())?;
            io::write_atomic(path, rendered.as_bytes(), RobustnessConfig::default())?;
            return Ok((state, rendered.len() as u64));
        }
        Ok((state, content.len() as u64))
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EntityStore for FileEntityStore {
    fn current_tx(&self) -> TxId {
        self.read().state.current_tx()
    }

    fn snapshot(&self) -> Snapshot {
        self.read().state.head()
    }

    fn as_of(&self, tx: TxId) -> Result<Snapshot> {
        self.read().state.as_of(tx)
    }

    fn begin(&self) -> Transaction {
        self.read().state.begin()
    }

    fn commit(&self, tx: Transaction) -> Result<TxId> {
        let mut inner = self.write();
        if tx.is_empty() && tx.base() == inner.state.current_tx() {
            return Ok(inner.state.current_tx());
        }

        let mut file: File = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| loadout_fs::Error::io(&self.path, e))?;
        file.lock_exclusive()
            .map_err(|_| loadout_fs::Error::LockFailed {
                path: self.path.clone(),
            })?;

        // Another process appended since we last looked: pick up its
        // transactions so the base check below sees them.
        let on_disk = file
            .seek(SeekFrom::End(0))
            .map_err(|e| loadout_fs::Error::io(&self.path, e))?;
        if on_disk != inner.known_len {
            let (state, known_len) = Self::load(&self.path)?;
            inner.state = state;
            inner.known_len = known_len;
        }

        let record = inner.state.prepare(tx)?;
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| loadout_fs::Error::io(&self.path, e))?;
        let _ = FileExt::unlock(&file);

        let id = record.tx;
        inner.known_len += line.len() as u64;
        inner.state.apply(record)?;
        tracing::debug!(%id, path = %self.path.display(), "appended transaction");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityId;
    use std::fs;

    fn put_one(store: &FileEntityStore, attribute: &str, value: i64) -> EntityId {
        let mut tx = store.begin();
        let e = tx.new_entity();
        tx.put(e, attribute, value).unwrap();
        store.commit(tx).unwrap();
        e
    }

    #[test]
    fn reopen_replays_committed_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.jsonl");

        let store = FileEntityStore::open(&path).unwrap();
        let e = put_one(&store, "a/x", 7);
        put_one(&store, "a/y", 8);
        drop(store);

        let reopened = FileEntityStore::open(&path).unwrap();
        assert_eq!(reopened.current_tx(), TxId(2));
        assert_eq!(reopened.snapshot().get::<i64>(e, "a/x").unwrap(), Some(7));
        assert!(reopened.as_of(TxId(1)).unwrap().get::<i64>(EntityId(2), "a/y").unwrap().is_none());
    }

    #[test]
    fn torn_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.jsonl");
        let store = FileEntityStore::open(&path).unwrap();
        put_one(&store, "a/x", 1);
        drop(store);

        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("{\"tx\":2,\"committed_at\":\"20");
        fs::write(&path, content).unwrap();

        let reopened = FileEntityStore::open(&path).unwrap();
        assert_eq!(reopened.current_tx(), TxId(1));
        // The rewrite leaves a log that appends cleanly.
        put_one(&reopened, "a/x", 2);
        drop(reopened);
        assert_eq!(FileEntityStore::open(&path).unwrap().current_tx(), TxId(2));
    }

    #[test]
    fn corrupt_middle_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.jsonl");
        fs::write(&path, "{\"schema\":2}\nnot json\n").unwrap();

        assert!(matches!(FileEntityStore::open(&path), Err(Error::Corrupt { .. })));
    }

    #[test]
    fn newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.jsonl");
        fs::write(&path, "{\"schema\":99}\n").unwrap();

        assert!(matches!(
            FileEntityStore::open(&path),
            Err(Error::UnsupportedSchema { found: 99, .. })
        ));
    }

    #[test]
    fn v1_log_is_migrated_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.jsonl");
        fs::write(
            &path,
            concat!(
                "{\"schema\":1}\n",
                "{\"tx\":1,\"committed_at\":\"2024-01-01T00:00:00Z\",\"ops\":[",
                "{\"op\":\"put\",\"entity\":1,\"attribute\":\"game/last_applied\",\"value\":5}]}\n"
            ),
        )
        .unwrap();

        let store = FileEntityStore::open(&path).unwrap();
        let value: Option<u64> = store
            .snapshot()
            .get(EntityId(1), crate::model::attrs::GAME_LAST_SYNCED_LOADOUT)
            .unwrap();
        assert_eq!(value, Some(5));
        assert!(fs::read_to_string(&path).unwrap().starts_with("{\"schema\":2}"));
    }

    #[test]
    fn second_handle_sees_conflict_after_foreign_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.jsonl");
        let a = FileEntityStore::open(&path).unwrap();
        let b = FileEntityStore::open(&path).unwrap();

        let mut stale = b.begin();
        let e = stale.new_entity();
        stale.put(e, "a/x", 1).unwrap();

        put_one(&a, "a/x", 1);

        assert!(matches!(b.commit(stale), Err(Error::StoreConflict { .. })));
        assert_eq!(b.current_tx(), TxId(1));
    }
}
