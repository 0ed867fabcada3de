//! Content stores that fail on demand.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use loadout_core::content::{ContentReader, ContentStore};
use loadout_core::{DirectoryContentStore, Result};
use loadout_fs::Hash;

/// Wraps a [`DirectoryContentStore`] and injects failures per hash.
///
/// - `fail_open`: `open` returns a permission error
/// - `lose`: `has` still answers `true` but `open` returns `None`
/// - `fail_backup`: `backup` returns a permission error
pub struct FlakyContentStore {
    inner: DirectoryContentStore,
    fail_open: Mutex<BTreeSet<Hash>>,
    lost: Mutex<BTreeSet<Hash>>,
    fail_backup: Mutex<BTreeSet<Hash>>,
}

fn denied(what: &str, hash: Hash) -> loadout_core::Error {
    loadout_fs::Error::io(
        format!("flaky/{hash}"),
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, what.to_string()),
    )
    .into()
}

impl FlakyContentStore {
    pub fn new(inner: DirectoryContentStore) -> Self {
        Self {
            inner,
            fail_open: Mutex::new(BTreeSet::new()),
            lost: Mutex::new(BTreeSet::new()),
            fail_backup: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn inner(&self) -> &DirectoryContentStore {
        &self.inner
    }

    pub fn fail_open(&self, hash: Hash) {
        self.fail_open.lock().unwrap().insert(hash);
    }

    pub fn lose(&self, hash: Hash) {
        self.lost.lock().unwrap().insert(hash);
    }

    pub fn fail_backup(&self, hash: Hash) {
        self.fail_backup.lock().unwrap().insert(hash);
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        self.fail_open.lock().unwrap().clear();
        self.lost.lock().unwrap().clear();
        self.fail_backup.lock().unwrap().clear();
    }
}

#[async_trait]
impl ContentStore for FlakyContentStore {
    async fn has(&self, hash: Hash) -> Result<bool> {
        if self.lost.lock().unwrap().contains(&hash) {
            return Ok(true);
        }
        self.inner.has(hash).await
    }

    async fn open(&self, hash: Hash) -> Result<Option<ContentReader>> {
        if self.fail_open.lock().unwrap().contains(&hash) {
            return Err(denied("open refused", hash));
        }
        if self.lost.lock().unwrap().contains(&hash) {
            return Ok(None);
        }
        self.inner.open(hash).await
    }

    async fn backup(&self, hash: Hash, source: &Path) -> Result<()> {
        if self.fail_backup.lock().unwrap().contains(&hash) {
            return Err(denied("backup refused", hash));
        }
        self.inner.backup(hash, source).await
    }
}
