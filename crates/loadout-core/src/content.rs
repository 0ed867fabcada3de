//! Content-addressed file store
//!
//! The synchronizer only needs three things from a store: whether a hash is
//! retained, a reader over its bytes, and a way to back up a file from disk.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use loadout_fs::{Hash, RobustnessConfig, io};
use xxhash_rust::xxh3::Xxh3;

use crate::{Error, Result};

/// Blocking reader over stored bytes. Consumed on the blocking pool.
pub type ContentReader = Box<dyn Read + Send>;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Whether the store retains bytes for `hash`.
    async fn has(&self, hash: Hash) -> Result<bool>;

    /// Open the bytes for `hash`, `None` when the store does not have them.
    async fn open(&self, hash: Hash) -> Result<Option<ContentReader>>;

    /// Copy the file at `source` into the store under `hash`.
    ///
    /// Fails if the bytes read do not hash to `hash`.
    async fn backup(&self, hash: Hash, source: &Path) -> Result<()>;
}

/// One file per hash under a root directory, sharded by the first two hex
/// digits: `<root>/ab/ab12…`.
#[derive(Debug, Clone)]
pub struct DirectoryContentStore {
    root: PathBuf,
    robustness: RobustnessConfig,
}

impl DirectoryContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            robustness: RobustnessConfig::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(&self, hash: Hash) -> PathBuf {
        self.root.join(hash.shard()).join(hash.to_hex())
    }

    /// Store `bytes` and return their hash.
    pub fn insert_bytes(&self, bytes: &[u8]) -> Result<Hash> {
        let hash = loadout_fs::hash_bytes(bytes);
        let target = self.blob_path(hash);
        if !target.exists() {
            io::write_atomic(&target, bytes, self.robustness)?;
        }
        Ok(hash)
    }

    pub fn remove(&self, hash: Hash) -> Result<bool> {
        Ok(io::remove_file_if_exists(&self.blob_path(hash))?)
    }
}

/// Hashes bytes as they pass through.
struct HashingReader<R> {
    inner: R,
    hasher: Xxh3,
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Copy `source` to `target` atomically, returning the hash of the bytes copied.
fn copy_hashed(source: &Path, target: &Path) -> loadout_fs::Result<Hash> {
    let file = File::open(source).map_err(|e| loadout_fs::Error::io(source, e))?;
    let mut reader = HashingReader {
        inner: file,
        hasher: Xxh3::new(),
    };
    io::write_stream_atomic(target, &mut reader)?;
    Ok(Hash(reader.hasher.digest()))
}

#[async_trait]
impl ContentStore for DirectoryContentStore {
    async fn has(&self, hash: Hash) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.blob_path(hash)).await?)
    }

    async fn open(&self, hash: Hash) -> Result<Option<ContentReader>> {
        let path = self.blob_path(hash);
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Some(Box::new(file.into_std().await))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(loadout_fs::Error::io(path, e).into()),
        }
    }

    async fn backup(&self, hash: Hash, source: &Path) -> Result<()> {
        let target = self.blob_path(hash);
        if tokio::fs::try_exists(&target).await? {
            return Ok(());
        }
        let source = source.to_path_buf();
        let robustness = self.robustness;
        let (actual, source) = tokio::task::spawn_blocking(move || {
            let actual = io::with_retry(robustness, || copy_hashed(&source, &target))?;
            if actual != hash {
                io::remove_file_if_exists(&target)?;
            }
            Ok::<_, loadout_fs::Error>((actual, source))
        })
        .await??;

        if actual != hash {
            return Err(Error::corrupt(format!(
                "{} changed during backup: expected {hash}, read {actual}",
                source.display()
            )));
        }
        tracing::debug!(%hash, "backed up file");
        Ok(())
    }
}
