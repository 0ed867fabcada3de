//! Atomic I/O operations with file locking and retry

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use fs2::FileExt;

use crate::{Error, Result};

/// Retry policy for file operations that may hit transient failures
/// (sharing violations, antivirus locks, interrupted syscalls).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RobustnessConfig {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RobustnessConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl RobustnessConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }
}

/// Run `op`, retrying with exponential backoff while it fails with a
/// transient error and the retry budget lasts.
pub fn with_retry<T>(config: RobustnessConfig, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(config.initial_backoff)
        .with_max_interval(config.max_backoff)
        .with_max_elapsed_time(None)
        .build();

    let mut attempts = 0u32;
    backoff::retry(policy, || {
        attempts += 1;
        op().map_err(|err| {
            if err.is_transient() && attempts <= config.max_retries {
                tracing::debug!(attempt = attempts, error = %err, "retrying file operation");
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            }
        })
    })
    .map_err(|err| match err {
        backoff::Error::Permanent(e) => e,
        backoff::Error::Transient { err, .. } => err,
    })
}

/// Path of the temp file used while atomically replacing `target`.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

/// Whether `name` is a temp file left by [`write_atomic`] or
/// [`write_stream_atomic`].
pub fn is_temp_file_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

/// Write content atomically to a file with locking.
///
/// Writes to a sibling temp file, syncs it, then renames over the target so
/// readers never observe a partial write.
pub fn write_atomic(path: &Path, content: &[u8], config: RobustnessConfig) -> Result<()> {
    with_retry(config, || {
        write_stream_atomic(path, &mut std::io::Cursor::new(content)).map(|_| ())
    })
}

/// Stream `reader` into `path` atomically. Returns the number of bytes written.
pub fn write_stream_atomic(path: &Path, reader: &mut impl Read) -> Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let temp_path = temp_path_for(path);
    let mut temp_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| Error::io(&temp_path, e))?;

    temp_file.lock_exclusive().map_err(|_| Error::LockFailed {
        path: path.to_path_buf(),
    })?;

    let written = match copy_and_sync(reader, &mut temp_file) {
        Ok(n) => n,
        Err(e) => {
            drop(temp_file);
            let _ = fs::remove_file(&temp_path);
            return Err(Error::io(&temp_path, e));
        }
    };

    let _ = FileExt::unlock(&temp_file);
    drop(temp_file);

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::io(path, e)
    })?;

    Ok(written)
}

fn copy_and_sync(reader: &mut impl Read, file: &mut File) -> std::io::Result<u64> {
    let written = std::io::copy(reader, file)?;
    file.flush()?;
    file.sync_all()?;
    Ok(written)
}

pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Remove a file. Returns `false` when it was already gone.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Remove empty directories from `start` upwards, stopping at `stop_at`
/// (which is never removed). Returns how many directories were removed.
pub fn prune_empty_dirs(start: &Path, stop_at: &Path) -> Result<usize> {
    let mut removed = 0;
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir == stop_at || !dir.starts_with(stop_at) {
            break;
        }
        let is_empty = match fs::read_dir(dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                current = dir.parent();
                continue;
            }
            Err(e) => return Err(Error::io(dir, e)),
        };
        if !is_empty {
            break;
        }
        fs::remove_dir(dir).map_err(|e| Error::io(dir, e))?;
        removed += 1;
        current = dir.parent();
    }
    Ok(removed)
}

/// Mark a file executable for its owner, group and others.
#[cfg(unix)]
pub fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path).map_err(|e| Error::io(path, e))?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    fs::set_permissions(path, permissions).map_err(|e| Error::io(path, e))
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}
