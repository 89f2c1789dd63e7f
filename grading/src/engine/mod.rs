//! Grading engine
//!
//! Hands out papers, turns score submissions into final scores and keeps the
//! graders honest.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      GradingEngine                         │
//! │  • request_work / submit / report_problem / revise         │
//! │  • leader desk, reports, import helpers                    │
//! └─────────────────────────┬─────────────────────────────────┘
//!                           │
//!       ┌─────────────┬─────┴───────┬─────────────┐
//!       ▼             ▼             ▼             ▼
//! ┌───────────┐ ┌───────────┐ ┌───────────┐ ┌───────────┐
//! │ Assignment│ │  Grading  │ │ SelfCheck │ │   Task    │
//! │ Selector  │ │  Machine  │ │  Sampler  │ │ Reclaimer │
//! └───────────┘ └─────┬─────┘ └───────────┘ └───────────┘
//!                     ▼
//!               ┌───────────┐
//!               │Arbitration│
//!               │ Resolver  │
//!               └───────────┘
//! ```
//!
//! The components never call each other directly: they read and write the
//! shared [`PaperStore`](crate::state::PaperStore) and announce what they did
//! on the event bus.
//!
//! # Components
//!
//! - **AssignmentSelector**: training, calibration cohorts and production batches
//! - **GradingMachine**: first, second, arbitration and leader rounds
//! - **arbitration**: closest-pair resolution of three marks
//! - **SelfCheckSampler**: blind re-grades every full window of records
//! - **TaskReclaimer**: releases assignments past their deadline
//! - **StatsReporter**: self-check and score distribution reports

pub mod arbitration;
pub mod coordinator;
pub mod machine;
pub mod reclaimer;
pub mod sampler;
pub mod selection;
pub mod stats;

pub use arbitration::{average, resolve, ClosestPair, Resolution};
pub use coordinator::{GradingEngine, SharedGradingEngine};
pub use machine::{validate_scores, Disposition, FinalizationResult, GradingMachine, ProblemReport};
pub use reclaimer::{SweepStats, TaskReclaimer};
pub use sampler::SelfCheckSampler;
pub use selection::AssignmentSelector;
pub use stats::{GraderStats, SelfCheckEntry, SelfCheckReport, StatsReporter};
