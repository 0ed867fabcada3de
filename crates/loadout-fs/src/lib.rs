//! Filesystem layer for the loadout synchronizer
//!
//! Provides game-relative paths, xxHash3 content hashing, location roots and
//! safe I/O operations.

pub mod config;
pub mod error;
pub mod hash;
pub mod io;
pub mod locations;
pub mod path;

pub use config::ConfigStore;
pub use error::{Error, Result};
pub use hash::{Hash, Size, hash_bytes, hash_file};
pub use io::RobustnessConfig;
pub use locations::LocationRegister;
pub use path::{GamePath, LocationId, RelativePath};
