//! Synchronizer configuration

use std::path::Path;

use loadout_fs::{ConfigStore, RobustnessConfig};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Files larger than this are not backed up before being overwritten or
/// ingested (2 GiB).
pub const DEFAULT_MAX_BACKUP_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Tunables for scanning and plan execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on concurrent hashing / extraction tasks.
    pub max_concurrency: usize,
    /// Retries for transient per-file I/O failures.
    pub io_retries: u32,
    pub max_backup_size: u64,
    /// Remove directories emptied by deletions.
    pub prune_empty_dirs: bool,
    /// Override the platform default for case-insensitive collisions.
    pub case_insensitive: Option<bool>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            io_retries: 3,
            max_backup_size: DEFAULT_MAX_BACKUP_SIZE,
            prune_empty_dirs: true,
            case_insensitive: None,
        }
    }
}

impl SyncConfig {
    /// Load from a TOML, JSON or YAML file; missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(ConfigStore::new().load(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        Ok(ConfigStore::new().save(path, self)?)
    }

    pub fn robustness(&self) -> RobustnessConfig {
        RobustnessConfig::with_retries(self.io_retries)
    }

    pub(crate) fn concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }
}

/// Declarative description of a game, consumed by
/// [`GenericGame`](crate::game::GenericGame).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub game_id: String,
    /// Path prefixes in `{Location}/path` form that are never synchronized.
    pub ignored_paths: Vec<String>,
    /// Path prefixes whose contents are never backed up.
    pub ignored_backup_paths: Vec<String>,
}

impl GameConfig {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(ConfigStore::new().load(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_toml_fills_defaults() {
        let config: SyncConfig = toml::from_str("io_retries = 7").unwrap();
        assert_eq!(config.io_retries, 7);
        assert_eq!(config.max_backup_size, DEFAULT_MAX_BACKUP_SIZE);
        assert!(config.prune_empty_dirs);
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let config = SyncConfig {
            max_concurrency: 0,
            ..SyncConfig::default()
        };
        assert_eq!(config.concurrency(), 1);
    }

    #[test]
    fn round_trips_through_config_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.json");
        let config = SyncConfig {
            max_concurrency: 2,
            case_insensitive: Some(true),
            ..SyncConfig::default()
        };

        config.save(&path).unwrap();
        assert_eq!(SyncConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn game_config_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.yaml");
        std::fs::write(
            &path,
            "game_id: skyrim\nignored_paths:\n  - \"{Game}/Logs\"\n",
        )
        .unwrap();

        let config = GameConfig::load(&path).unwrap();
        assert_eq!(config.game_id, "skyrim");
        assert_eq!(config.ignored_paths, vec!["{Game}/Logs".to_string()]);
        assert!(config.ignored_backup_paths.is_empty());
    }
}
