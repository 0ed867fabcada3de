//! Game-relative path handling
//!
//! Every file the synchronizer tracks is addressed by a [`GamePath`]: a named
//! location root plus a normalized [`RelativePath`] beneath it. Native paths
//! only appear at I/O boundaries (see [`crate::LocationRegister`]).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// Names a root directory that game files live under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocationId {
    Game,
    AppData,
    Saves,
    Preferences,
    Custom(String),
}

impl LocationId {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Game => "Game",
            Self::AppData => "AppData",
            Self::Saves => "Saves",
            Self::Preferences => "Preferences",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for LocationId {
    fn from(s: &str) -> Self {
        match s {
            "Game" => Self::Game,
            "AppData" => Self::AppData,
            "Saves" => Self::Saves,
            "Preferences" => Self::Preferences,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl Serialize for LocationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LocationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from(name.as_str()))
    }
}

/// A validated path relative to a location root.
///
/// Always uses forward slashes and never contains empty, `.` or `..`
/// segments, a leading `/`, or a drive prefix. Comparison is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath {
    inner: String,
}

impl RelativePath {
    /// Validate and normalize a relative path.
    ///
    /// Backslashes become forward slashes and repeated separators collapse,
    /// so `a\\b//c/` becomes `a/b/c`.
    pub fn new(path: impl AsRef<str>) -> Result<Self> {
        let raw = path.as_ref();
        let unified = raw.replace('\\', "/");

        if unified.starts_with('/') {
            return Err(Error::invalid_path(raw, "absolute paths are not allowed"));
        }
        if has_drive_prefix(&unified) {
            return Err(Error::invalid_path(raw, "drive prefixes are not allowed"));
        }
        if unified.contains('\0') {
            return Err(Error::invalid_path(raw, "contains a NUL byte"));
        }

        let mut segments = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" => continue,
                "." | ".." => {
                    return Err(Error::invalid_path(
                        raw,
                        format!("'{segment}' segments are not allowed"),
                    ));
                }
                s => segments.push(s),
            }
        }

        if segments.is_empty() {
            return Err(Error::invalid_path(raw, "path is empty"));
        }

        Ok(Self {
            inner: segments.join("/"),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.inner.split('/')
    }

    pub fn file_name(&self) -> &str {
        self.inner.rsplit('/').next().unwrap_or(&self.inner)
    }

    /// Extension of the file name, without the dot.
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx + 1..]),
        }
    }

    pub fn parent(&self) -> Option<Self> {
        self.inner.rfind('/').map(|idx| Self {
            inner: self.inner[..idx].to_string(),
        })
    }

    pub fn join(&self, segment: &str) -> Result<Self> {
        Self::new(format!("{}/{}", self.inner, segment))
    }

    /// True when `prefix` names this path or one of its ancestor directories.
    pub fn starts_with(&self, prefix: &RelativePath) -> bool {
        self.inner == prefix.inner
            || (self.inner.starts_with(&prefix.inner)
                && self.inner.as_bytes().get(prefix.inner.len()) == Some(&b'/'))
    }

    /// Same check as [`starts_with`](Self::starts_with), ignoring ASCII and Unicode case.
    pub fn starts_with_ignore_case(&self, prefix: &RelativePath) -> bool {
        let this = self.collision_key();
        let other = prefix.collision_key();
        this == other
            || (this.starts_with(&other) && this.as_bytes().get(other.len()) == Some(&b'/'))
    }

    /// Lowercased form used to detect paths that collide on case-insensitive
    /// file systems.
    pub fn collision_key(&self) -> String {
        self.inner.to_lowercase()
    }

    /// Native path of this file beneath `root`.
    pub fn to_native_under(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for segment in self.segments() {
            out.push(segment);
        }
        out
    }

    /// Build from a native path that is already relative to a root.
    pub fn from_native(relative: &Path) -> Result<Self> {
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                std::path::Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                _ => {
                    return Err(Error::invalid_path(
                        relative.to_string_lossy(),
                        "not a plain relative path",
                    ));
                }
            }
        }
        Self::new(parts.join("/"))
    }
}

fn has_drive_prefix(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

impl TryFrom<String> for RelativePath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for RelativePath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RelativePath> for String {
    fn from(path: RelativePath) -> Self {
        path.inner
    }
}

impl AsRef<str> for RelativePath {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

/// A file location: root plus relative path. Orders by location, then path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GamePath {
    pub location: LocationId,
    pub path: RelativePath,
}

impl GamePath {
    pub fn new(location: LocationId, path: RelativePath) -> Self {
        Self { location, path }
    }

    /// Shorthand for a path under [`LocationId::Game`].
    pub fn game(path: impl AsRef<str>) -> Result<Self> {
        Ok(Self::new(LocationId::Game, RelativePath::new(path)?))
    }

    pub fn collision_key(&self) -> (LocationId, String) {
        (self.location.clone(), self.path.collision_key())
    }

    pub fn file_name(&self) -> &str {
        self.path.file_name()
    }

    pub fn extension(&self) -> Option<&str> {
        self.path.extension()
    }
}

impl fmt::Display for GamePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}/{}", self.location, self.path)
    }
}

/// Parses the display form, `{Location}/relative/path`.
impl FromStr for GamePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix('{')
            .ok_or_else(|| Error::invalid_path(s, "missing '{Location}' prefix"))?;
        let (location, path) = rest
            .split_once("}/")
            .ok_or_else(|| Error::invalid_path(s, "missing '{Location}' prefix"))?;
        Ok(Self::new(LocationId::from(location), RelativePath::new(path)?))
    }
}
