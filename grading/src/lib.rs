//! Grading Engine Library
//!
//! This library provides the assignment and arbitration core of an exam
//! marking system:
//! - Work selection: training, calibration cohorts and production batches
//! - Double-blind marking with third-examiner arbitration and leader escalation
//! - Self-score quality checks and grader statistics
//! - Reclamation of assignments left unscored past their deadline
//!
//! # Features
//!
//! ## Grader Operations
//! - `request_work`: papers the grader should mark next
//! - `submit`: score an assignment, possibly finalizing the paper
//! - `report_problem`: hand a damaged or unreadable paper to the leader desk
//! - `revise`: correct an own mark before the paper is final
//!
//! ## Leader Desk
//! - `open_leader_review`: take over a paper directly
//! - `leader_queue`: escalations and problem holds waiting for a leader
//!
//! ## Storage
//! - `MemoryStore`: in-process tables (default)
//! - `StateStore`: RocksDB column families (feature `heavy-state`)
//!
//! # Usage
//!
//! ```bash
//! # Run the reclaimer until interrupted
//! grading reclaim --config grading.toml
//!
//! # Run one reclaim pass over a RocksDB store
//! grading --state-path ./grading-state sweep
//!
//! # Resolve three marks against a tolerance
//! grading resolve 10 20 14 --tolerance 5
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod identity;
pub mod random;
pub mod state;

// Re-export key engine types
pub use engine::{
    ClosestPair, Disposition, FinalizationResult, GraderStats, GradingEngine, ProblemReport,
    Resolution, SelfCheckReport, SharedGradingEngine, SweepStats, TaskReclaimer,
};

// Re-export configuration and error types
pub use config::{ConfigError, EngineConfig, RecordPolicy};
pub use error::{EngineError, EngineResult, NotFoundKind};

// Re-export key state types
pub use state::{
    Assignment, Commit, MemoryStore, Paper, PaperStatus, PaperStore, ScoreRecord, ScoringMode,
    SharedPaperStore, StoreError, TaskKind, Topic, TrainingCohort,
};
#[cfg(feature = "heavy-state")]
pub use state::{SharedStateStore, StateStore};

// Re-export key event types
pub use events::{EventBus, EventFilter, GradingEvent, SharedEventBus};

// Re-export collaborator seams
pub use identity::{GraderDirectory, GraderProfile, GraderRole, StaticDirectory};
pub use random::{RandomSource, SeededRandom, ThreadRandom};
