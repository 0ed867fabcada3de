//! Mapping between named location roots and native directories

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{Error, GamePath, LocationId, RelativePath, Result};

/// Registered roots of one game installation.
///
/// Roots may nest (e.g. `Saves` inside `Game`); a native path is always
/// attributed to the deepest root containing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRegister {
    roots: BTreeMap<LocationId, PathBuf>,
    case_insensitive: bool,
}

impl LocationRegister {
    pub fn new(roots: impl IntoIterator<Item = (LocationId, PathBuf)>) -> Self {
        let roots = roots
            .into_iter()
            .map(|(id, root)| {
                let root = dunce::canonicalize(&root).unwrap_or(root);
                (id, root)
            })
            .collect();
        Self {
            roots,
            case_insensitive: cfg!(any(windows, target_os = "macos")),
        }
    }

    pub fn with_case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    pub fn root(&self, location: &LocationId) -> Option<&Path> {
        self.roots.get(location).map(PathBuf::as_path)
    }

    pub fn roots(&self) -> impl Iterator<Item = (&LocationId, &Path)> {
        self.roots.iter().map(|(id, root)| (id, root.as_path()))
    }

    pub fn to_map(&self) -> BTreeMap<LocationId, PathBuf> {
        self.roots.clone()
    }

    /// Native path of a game path.
    pub fn resolve(&self, path: &GamePath) -> Result<PathBuf> {
        let root = self
            .root(&path.location)
            .ok_or_else(|| Error::UnknownLocation(path.location.to_string()))?;
        Ok(path.path.to_native_under(root))
    }

    /// Game path of a native path, using the deepest registered root that
    /// contains it.
    pub fn to_game_path(&self, native: &Path) -> Result<GamePath> {
        let native = dunce::simplified(native);
        let (location, root) = self
            .roots
            .iter()
            .filter(|(_, root)| native.starts_with(root) && native != root.as_path())
            .max_by_key(|(_, root)| root.components().count())
            .ok_or_else(|| Error::OutsideLocations {
                path: native.to_path_buf(),
            })?;

        let relative = native
            .strip_prefix(root)
            .map_err(|_| Error::OutsideLocations {
                path: native.to_path_buf(),
            })?;
        Ok(GamePath::new(location.clone(), RelativePath::from_native(relative)?))
    }

    /// Roots registered strictly beneath `location`'s root.
    pub fn nested_roots(&self, location: &LocationId) -> Vec<&Path> {
        let Some(outer) = self.root(location) else {
            return Vec::new();
        };
        self.roots
            .values()
            .filter(|root| root.as_path() != outer && root.starts_with(outer))
            .map(PathBuf::as_path)
            .collect()
    }
}
