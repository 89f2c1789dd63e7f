//! Event types for grading
//!
//! These events are broadcast after each committed state change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{
    AssignmentId, BatchId, EscalationCause, GraderId, PaperId, RetireReason, TaskKind, TopicId,
};

/// Unique identifier for events
pub type EventId = String;

/// All grading events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GradingEvent {
    /// Papers were handed to a grader
    WorkAssigned {
        grader_id: GraderId,
        topic_id: TopicId,
        paper_ids: Vec<PaperId>,
        kind: TaskKind,
        batch_id: Option<BatchId>,
        timestamp: DateTime<Utc>,
    },

    /// A grader submitted scores against an assignment
    ScoreSubmitted {
        paper_id: PaperId,
        grader_id: GraderId,
        assignment_id: AssignmentId,
        kind: TaskKind,
        score: i64,
        timestamp: DateTime<Utc>,
    },

    /// A paper received its final score
    PaperFinalized {
        paper_id: PaperId,
        topic_id: TopicId,
        final_score: i64,
        finalized_by: GraderId,
        timestamp: DateTime<Utc>,
    },

    /// Two marks disagreed and a third grader was asked
    ArbitrationRequested {
        paper_id: PaperId,
        arbiter_id: GraderId,
        first_score: i64,
        second_score: i64,
        timestamp: DateTime<Utc>,
    },

    /// Work was raised to the leader desk
    LeaderEscalated {
        paper_id: PaperId,
        cause: EscalationCause,
        subject_grader: Option<GraderId>,
        timestamp: DateTime<Utc>,
    },

    /// Self-check assignments were created for a completed window
    SelfCheckScheduled {
        grader_id: GraderId,
        paper_ids: Vec<PaperId>,
        window: u64,
        timestamp: DateTime<Utc>,
    },

    /// A stale assignment was released back to the pool
    AssignmentReclaimed {
        assignment_id: AssignmentId,
        paper_id: PaperId,
        grader_id: Option<GraderId>,
        reason: RetireReason,
        timestamp: DateTime<Utc>,
    },

    /// A grader flagged a paper as unscorable
    ProblemReported {
        paper_id: PaperId,
        grader_id: GraderId,
        problem_type: String,
        duplicate: bool,
        timestamp: DateTime<Utc>,
    },
}

impl GradingEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            GradingEvent::WorkAssigned { timestamp, .. } => *timestamp,
            GradingEvent::ScoreSubmitted { timestamp, .. } => *timestamp,
            GradingEvent::PaperFinalized { timestamp, .. } => *timestamp,
            GradingEvent::ArbitrationRequested { timestamp, .. } => *timestamp,
            GradingEvent::LeaderEscalated { timestamp, .. } => *timestamp,
            GradingEvent::SelfCheckScheduled { timestamp, .. } => *timestamp,
            GradingEvent::AssignmentReclaimed { timestamp, .. } => *timestamp,
            GradingEvent::ProblemReported { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            GradingEvent::WorkAssigned { .. } => "work_assigned",
            GradingEvent::ScoreSubmitted { .. } => "score_submitted",
            GradingEvent::PaperFinalized { .. } => "paper_finalized",
            GradingEvent::ArbitrationRequested { .. } => "arbitration_requested",
            GradingEvent::LeaderEscalated { .. } => "leader_escalated",
            GradingEvent::SelfCheckScheduled { .. } => "self_check_scheduled",
            GradingEvent::AssignmentReclaimed { .. } => "assignment_reclaimed",
            GradingEvent::ProblemReported { .. } => "problem_reported",
        }
    }

    /// Get the paper ID if this event concerns a single paper
    pub fn paper_id(&self) -> Option<PaperId> {
        match self {
            GradingEvent::ScoreSubmitted { paper_id, .. }
            | GradingEvent::PaperFinalized { paper_id, .. }
            | GradingEvent::ArbitrationRequested { paper_id, .. }
            | GradingEvent::LeaderEscalated { paper_id, .. }
            | GradingEvent::AssignmentReclaimed { paper_id, .. }
            | GradingEvent::ProblemReported { paper_id, .. } => Some(*paper_id),
            _ => None,
        }
    }

    /// Get the grader the event is about, if any
    pub fn grader_id(&self) -> Option<GraderId> {
        match self {
            GradingEvent::WorkAssigned { grader_id, .. }
            | GradingEvent::ScoreSubmitted { grader_id, .. }
            | GradingEvent::SelfCheckScheduled { grader_id, .. }
            | GradingEvent::ProblemReported { grader_id, .. } => Some(*grader_id),
            GradingEvent::PaperFinalized { finalized_by, .. } => Some(*finalized_by),
            GradingEvent::ArbitrationRequested { arbiter_id, .. } => Some(*arbiter_id),
            GradingEvent::LeaderEscalated { subject_grader, .. } => *subject_grader,
            GradingEvent::AssignmentReclaimed { grader_id, .. } => *grader_id,
        }
    }

    /// Create a new unique event ID
    pub fn new_id() -> EventId {
        uuid::Uuid::new_v4().to_string()
    }
}
