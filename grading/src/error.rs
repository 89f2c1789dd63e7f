//! Error types for the grading engine API

use crate::identity::DirectoryError;
use crate::state::{AssignmentId, Conflict, StoreError};

/// What kind of entity was missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Paper,
    Topic,
    Assignment,
    Grader,
    /// The grader exists but has no topic to draw work from
    GraderTopic,
}

impl std::fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFoundKind::Paper => write!(f, "paper"),
            NotFoundKind::Topic => write!(f, "topic"),
            NotFoundKind::Assignment => write!(f, "assignment"),
            NotFoundKind::Grader => write!(f, "grader"),
            NotFoundKind::GraderTopic => write!(f, "grader topic"),
        }
    }
}

/// Errors returned by engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(NotFoundKind),

    #[error("Invalid score payload: {0}")]
    InvalidScorePayload(String),

    #[error("Assignment {0} was already consumed")]
    AssignmentAlreadyConsumed(AssignmentId),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Grader {grader_id} is not the assignee of {assignment_id}")]
    NotAssignee {
        grader_id: i64,
        assignment_id: AssignmentId,
    },

    #[error("Grader {0} is not a leader")]
    NotLeader(i64),

    #[error("Paper {0} already has a final score")]
    AlreadyFinalized(i64),

    #[error("Paper {paper_id} is not ready for {kind}")]
    RoundOutOfOrder { paper_id: i64, kind: String },

    #[error("Paper {0} has scores or outstanding work")]
    PaperHasScores(i64),

    #[error("Concurrent update: {0}")]
    ConcurrentUpdate(Conflict),
}

impl EngineError {
    /// Whether the caller may retry the same request
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::StoreUnavailable(_) | EngineError::ConcurrentUpdate(_)
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(conflict) => EngineError::ConcurrentUpdate(conflict),
            other => EngineError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<DirectoryError> for EngineError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::UnknownGrader(_) => EngineError::NotFound(NotFoundKind::Grader),
            other => EngineError::StoreUnavailable(other.to_string()),
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
