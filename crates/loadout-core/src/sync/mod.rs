//! Three-way synchronization between disk, the last applied state and a loadout
//!
//! This module provides:
//! - **signature**: classify a path by which sides exist, agree and are archived
//! - **action**: map a classification to the actions that reconcile it
//! - **tree**: scan disk and join the three views into a sync tree
//! - **executor**: apply a processed tree to disk and the loadout
//! - **engine**: the [`Synchronizer`] entry points

/// Defines a `u16` bit set with named flags.
macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$flag_meta:meta])* $flag:ident = $bit:expr ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u16);

        impl $name {
            $( $(#[$flag_meta])* pub const $flag: Self = Self($bit); )*

            /// Every defined flag.
            pub const ALL: Self = Self(0 $(| $bit)*);

            const NAMES: &'static [(&'static str, Self)] = &[$((stringify!($flag), Self::$flag)),*];

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn bits(self) -> u16 {
                self.0
            }

            /// Build from raw bits, dropping undefined ones.
            pub const fn from_bits_truncate(bits: u16) -> Self {
                Self(bits & Self::ALL.0)
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            pub fn set(&mut self, other: Self, on: bool) {
                if on {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }

            /// Names of the flags that are set, in bit order.
            pub fn names(self) -> impl Iterator<Item = &'static str> {
                Self::NAMES
                    .iter()
                    .filter(move |(_, flag)| self.contains(*flag))
                    .map(|(name, _)| *name)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl std::ops::BitAnd for $name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl std::ops::Sub for $name {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self {
                Self(self.0 & !rhs.0)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let names: Vec<&str> = self.names().collect();
                write!(f, "{}({})", stringify!($name), names.join(" | "))
            }
        }
    };
}

mod action;
mod engine;
mod executor;
mod report;
mod signature;
mod tree;

pub use action::{Actions, SyncDirection, resolve};
pub use engine::{SyncOptions, Synchronizer};
pub use executor::{ExecutionContext, execute};
pub use report::{
    ActionCounts, Diagnostic, DiagnosticKind, PathFailure, SyncPreview, SyncReport, SyncStatus,
};
pub use signature::{Signature, SignatureInput};
pub use tree::{
    DiskEntry, DiskScan, SyncNode, SyncTree, UnreadablePath, align_case, build_sync_tree,
    mark_unreadable, process_sync_tree, scan_disk,
};

use tokio::sync::{mpsc, watch};

/// Cancellation signal: `true` once cancellation was requested.
pub type CancelReceiver = watch::Receiver<bool>;

/// Progress channel for [`SyncStatus`] messages.
pub type StatusSender = mpsc::UnboundedSender<SyncStatus>;

pub(crate) fn is_cancelled(cancel: Option<&CancelReceiver>) -> bool {
    cancel.is_some_and(|rx| *rx.borrow())
}

pub(crate) fn send_status(status: Option<&StatusSender>, message: SyncStatus) {
    if let Some(tx) = status {
        // The receiver going away only means nobody is listening.
        let _ = tx.send(message);
    }
}
