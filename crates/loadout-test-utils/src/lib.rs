//! Shared test fixtures for the loadout synchronizer workspace.
//!
//! This crate provides standardised fixtures to eliminate duplication
//! across crate test suites. It is a dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`game`]: [`TestGame`](game::TestGame), a managed game install in a
//!   temporary directory with a seeded content store
//! - [`content`]: content stores that fail on demand

pub mod content;
pub mod game;

pub use content::FlakyContentStore;
pub use game::{TEST_GAME_ID, TestGame};
