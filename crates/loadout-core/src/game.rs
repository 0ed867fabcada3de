//! Game definitions and the registry that holds them
//!
//! A game contributes path classification (ignored / not backed up) and an
//! ordered list of pure transforms applied to a loadout before it is
//! flattened.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use loadout_fs::GamePath;

use crate::config::GameConfig;
use crate::model::{Loadout, Mod, SortRule};
use crate::{Error, Result};

/// Result of a per-mod transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModTransform {
    Nothing,
    DisableMod,
    ReplaceRules(Vec<SortRule>),
}

pub type ModTransformFn = Box<dyn Fn(&Mod) -> ModTransform + Send + Sync>;
pub type LoadoutTransformFn = Box<dyn Fn(Loadout) -> Loadout + Send + Sync>;

/// Game-specific knowledge consumed by the synchronizer.
///
/// Predicates must be pure functions of the path.
pub trait GameDefinition: Send + Sync {
    fn game_id(&self) -> &str;

    /// Paths the synchronizer never touches after initial indexing.
    fn is_ignored_path(&self, path: &GamePath) -> bool;

    /// Paths whose contents are not backed up before being replaced.
    fn is_ignored_backup_path(&self, path: &GamePath) -> bool;

    /// Applied to every mod, in order, before sorting.
    fn mod_transforms(&self) -> &[ModTransformFn] {
        &[]
    }

    /// Applied to the whole loadout, in order, before mod transforms.
    fn loadout_transforms(&self) -> &[LoadoutTransformFn] {
        &[]
    }
}

/// Run a game's transforms over a loadout.
pub fn apply_transforms(game: &dyn GameDefinition, loadout: Loadout) -> Loadout {
    let mut loadout = game
        .loadout_transforms()
        .iter()
        .fold(loadout, |acc, transform| transform(acc));

    for m in &mut loadout.mods {
        for transform in game.mod_transforms() {
            match transform(&*m) {
                ModTransform::Nothing => {}
                ModTransform::DisableMod => {
                    tracing::debug!(mod_name = %m.name, "mod disabled by game transform");
                    m.enabled = false;
                }
                ModTransform::ReplaceRules(rules) => m.rules = rules,
            }
        }
    }
    loadout
}

/// Game described by path prefixes, optionally with transforms.
pub struct GenericGame {
    game_id: String,
    ignored: Vec<GamePath>,
    ignored_backup: Vec<GamePath>,
    mod_transforms: Vec<ModTransformFn>,
    loadout_transforms: Vec<LoadoutTransformFn>,
}

impl std::fmt::Debug for GenericGame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericGame")
            .field("game_id", &self.game_id)
            .field("ignored", &self.ignored)
            .field("ignored_backup", &self.ignored_backup)
            .field("mod_transforms", &self.mod_transforms.len())
            .field("loadout_transforms", &self.loadout_transforms.len())
            .finish()
    }
}

fn parse_prefixes(raw: &[String]) -> Result<Vec<GamePath>> {
    raw.iter()
        .map(|s| s.parse::<GamePath>().map_err(Error::from))
        .collect()
}

fn matches_any(prefixes: &[GamePath], path: &GamePath) -> bool {
    prefixes
        .iter()
        .any(|p| p.location == path.location && path.path.starts_with_ignore_case(&p.path))
}

impl GenericGame {
    pub fn new(game_id: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            ignored: Vec::new(),
            ignored_backup: Vec::new(),
            mod_transforms: Vec::new(),
            loadout_transforms: Vec::new(),
        }
    }

    /// Build from a [`GameConfig`]. Prefixes use the `{Location}/path` form.
    pub fn from_config(config: &GameConfig) -> Result<Self> {
        Ok(Self {
            ignored: parse_prefixes(&config.ignored_paths)?,
            ignored_backup: parse_prefixes(&config.ignored_backup_paths)?,
            ..Self::new(config.game_id.clone())
        })
    }

    pub fn from_config_file(path: &Path) -> Result<Self> {
        Self::from_config(&GameConfig::load(path)?)
    }

    pub fn ignore(mut self, prefix: GamePath) -> Self {
        self.ignored.push(prefix);
        self
    }

    pub fn ignore_backup(mut self, prefix: GamePath) -> Self {
        self.ignored_backup.push(prefix);
        self
    }

    pub fn with_mod_transform(
        mut self,
        transform: impl Fn(&Mod) -> ModTransform + Send + Sync + 'static,
    ) -> Self {
        self.mod_transforms.push(Box::new(transform));
        self
    }

    pub fn with_loadout_transform(
        mut self,
        transform: impl Fn(Loadout) -> Loadout + Send + Sync + 'static,
    ) -> Self {
        self.loadout_transforms.push(Box::new(transform));
        self
    }
}

impl GameDefinition for GenericGame {
    fn game_id(&self) -> &str {
        &self.game_id
    }

    fn is_ignored_path(&self, path: &GamePath) -> bool {
        matches_any(&self.ignored, path)
    }

    fn is_ignored_backup_path(&self, path: &GamePath) -> bool {
        matches_any(&self.ignored_backup, path)
    }

    fn mod_transforms(&self) -> &[ModTransformFn] {
        &self.mod_transforms
    }

    fn loadout_transforms(&self) -> &[LoadoutTransformFn] {
        &self.loadout_transforms
    }
}

/// Game definitions by id. Built once at startup and passed explicitly.
#[derive(Default, Clone)]
pub struct GameRegistry {
    games: BTreeMap<String, Arc<dyn GameDefinition>>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, game: impl GameDefinition + 'static) -> &mut Self {
        self.games.insert(game.game_id().to_string(), Arc::new(game));
        self
    }

    pub fn with(mut self, game: impl GameDefinition + 'static) -> Self {
        self.register(game);
        self
    }

    pub fn get(&self, game_id: &str) -> Result<Arc<dyn GameDefinition>> {
        self.games
            .get(game_id)
            .cloned()
            .ok_or_else(|| Error::UnknownGame(game_id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.games.keys().map(String::as_str)
    }
}
