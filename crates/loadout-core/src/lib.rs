//! Core synchronization layer for the loadout synchronizer
//!
//! This crate keeps a game folder in agreement with a loadout, implementing:
//!
//! - **Data model**: installations, loadouts, mods and recorded disk states on
//!   an append-only entity store with point-in-time snapshots
//! - **Flattening**: load-order resolution of mods into one file per path
//! - **Three-way sync**: signature classification of disk, previous and
//!   loadout state, the action table, and plan execution
//! - **Synchronizer**: per-installation entry points tying it together
//!
//! # Architecture
//!
//! `loadout-core` sits above `loadout-fs` and below any UI or CLI:
//!
//! ```text
//!              UI / CLI
//!                 |
//!           Synchronizer
//!                 |
//!    +------+-----+------+---------+
//!    |      |            |         |
//! flatten  sync       store     content
//!    |      |            |         |
//!    +------+-----+------+---------+
//!                 |
//!            loadout-fs
//! ```
//!
//! # Example
//!
//! ```ignore
//! use loadout_core::{SyncOptions, Synchronizer};
//!
//! async fn apply(sync: &Synchronizer, loadout: loadout_core::model::LoadoutId) -> loadout_core::Result<()> {
//!     let report = sync.synchronize(loadout, SyncOptions::default()).await?;
//!     println!("{} files changed", report.files_changed);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod content;
pub mod error;
pub mod flatten;
pub mod game;
pub mod logging;
pub mod model;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use content::{ContentStore, DirectoryContentStore};
pub use error::{Error, Result};
pub use flatten::{Plan, SortCache, flatten};
pub use game::{GameDefinition, GameRegistry, GenericGame};
pub use store::{EntityStore, FileEntityStore, MemoryEntityStore};
pub use sync::{
    Actions, SyncDirection, SyncOptions, SyncPreview, SyncReport, SyncStatus, SyncTree,
    Synchronizer,
};
