//! State persistence for the grading engine
//!
//! This module provides the storage contract and two backends for:
//! - Topics and their scoring configuration
//! - Papers with their examiner marks and final score
//! - Live assignments and the tombstones of retired ones
//! - The append-only score record trail
//! - Calibration cohorts and per-grader cursors
//!
//! # Architecture
//!
//! The engine only sees [`PaperStore`]. Every multi-record change goes through
//! [`PaperStore::commit`], which applies a [`Commit`] atomically after checking
//! that retired assignments are still live and written papers are at the
//! revision they were read at. A failed precondition surfaces as
//! [`StoreError::Conflict`] and nothing is written.
//!
//! - [`MemoryStore`]: in-process tables behind one lock
//! - `StateStore` (feature `heavy-state`): RocksDB with column families
//!   `papers`, `topics`, `assignments`, `retired`, `records`, `cohorts`,
//!   `graders`
//!
//! # Usage
//!
//! ```ignore
//! use grading::state::{Commit, MemoryStore, Paper, PaperStore, Topic, ScoringMode};
//!
//! let store = MemoryStore::new();
//! store.put_topic(&Topic::new(1, "Essay", ScoringMode::DoubleBlind, 20, 3))?;
//! store.put_paper(&Paper::new(100, 1))?;
//! ```

pub mod memory;
pub mod repository;
pub mod schema;
#[cfg(feature = "heavy-state")]
pub mod store;
pub mod types;

pub use memory::{MemoryStore, SharedMemoryStore};
pub use repository::{
    AssignmentFilter, Commit, Conflict, PaperStore, PaperWrite, SharedPaperStore, StoreError,
    StoreResult,
};
#[cfg(feature = "heavy-state")]
pub use store::{SharedStateStore, StateStore};
pub use types::*;
