//! Paper store contract
//!
//! The engine never talks to a database directly. Everything it reads or
//! writes goes through [`PaperStore`], and every multi-record mutation is
//! expressed as one [`Commit`] that the store applies atomically or not at
//! all.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::types::*;

/// Error type for paper store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "heavy-state")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    #[error("Commit rejected: {0}")]
    Conflict(Conflict),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Precondition a commit failed; nothing was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// The assignment was already consumed or reclaimed
    AssignmentRetired(AssignmentId),
    /// Someone else wrote the paper since it was read
    PaperChanged {
        paper_id: PaperId,
        expected: u64,
        found: u64,
    },
    PaperMissing(PaperId),
    /// The grader already holds a live assignment for the paper
    DuplicateAssignment {
        grader_id: GraderId,
        paper_id: PaperId,
    },
    RecordMissing(RecordId),
    /// Another commit advanced the grader's self-check cursor first
    CursorMoved {
        grader_id: GraderId,
        expected: u64,
        found: u64,
    },
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::AssignmentRetired(id) => write!(f, "assignment {} already retired", id),
            Conflict::PaperChanged {
                paper_id,
                expected,
                found,
            } => write!(
                f,
                "paper {} changed (expected revision {}, found {})",
                paper_id, expected, found
            ),
            Conflict::PaperMissing(id) => write!(f, "paper {} missing", id),
            Conflict::DuplicateAssignment {
                grader_id,
                paper_id,
            } => write!(
                f,
                "grader {} already holds an assignment for paper {}",
                grader_id, paper_id
            ),
            Conflict::RecordMissing(id) => write!(f, "score record {} missing", id),
            Conflict::CursorMoved {
                grader_id,
                expected,
                found,
            } => write!(
                f,
                "self-check cursor of grader {} moved (expected {}, found {})",
                grader_id, expected, found
            ),
        }
    }
}

/// Result type for paper store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a paper store
pub type SharedPaperStore = Arc<dyn PaperStore>;

/// A paper write guarded by the revision it was read at
#[derive(Debug, Clone)]
pub struct PaperWrite {
    pub paper: Paper,
    pub expected_revision: u64,
}

/// A set of mutations applied all-or-nothing
///
/// Preconditions checked by the store, in order: every retired assignment is
/// still live, every written paper is at its expected revision, no created
/// assignment duplicates a live (grader, paper) pair, every corrected record
/// exists, the self-check cursor is still where it was read.
#[derive(Debug, Clone, Default)]
pub struct Commit {
    pub papers: Vec<PaperWrite>,
    pub retire: Vec<(AssignmentId, RetireReason)>,
    pub create: Vec<Assignment>,
    pub append: Vec<ScoreRecord>,
    pub correct: Vec<ScoreRecord>,
    pub cohort_progress: Option<(GraderId, CohortProgress)>,
    /// Grader, cursor value it was read at, new value
    pub self_check_cursor: Option<(GraderId, u64, u64)>,
}

impl Commit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `paper`, expecting the stored copy to still be at `paper.revision`
    pub fn write_paper(mut self, paper: Paper) -> Self {
        self.papers.push(PaperWrite {
            expected_revision: paper.revision,
            paper,
        });
        self
    }

    pub fn retire(mut self, assignment_id: impl Into<AssignmentId>, reason: RetireReason) -> Self {
        self.retire.push((assignment_id.into(), reason));
        self
    }

    pub fn create(mut self, assignment: Assignment) -> Self {
        self.create.push(assignment);
        self
    }

    pub fn append(mut self, record: ScoreRecord) -> Self {
        self.append.push(record);
        self
    }

    pub fn correct(mut self, record: ScoreRecord) -> Self {
        self.correct.push(record);
        self
    }

    pub fn cohort_progress(mut self, grader_id: GraderId, progress: CohortProgress) -> Self {
        self.cohort_progress = Some((grader_id, progress));
        self
    }

    /// Move the grader's cursor from `expected` to `windows`
    pub fn self_check_cursor(mut self, grader_id: GraderId, expected: u64, windows: u64) -> Self {
        self.self_check_cursor = Some((grader_id, expected, windows));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.papers.is_empty()
            && self.retire.is_empty()
            && self.create.is_empty()
            && self.append.is_empty()
            && self.correct.is_empty()
            && self.cohort_progress.is_none()
            && self.self_check_cursor.is_none()
    }

    /// Papers touched by created assignments
    pub(crate) fn created_papers(&self) -> HashSet<PaperId> {
        self.create.iter().map(|a| a.paper_id).collect()
    }

    /// Reject created assignments that collide with `live` or with each other
    ///
    /// Assignments retired by this same commit do not count as live.
    pub(crate) fn check_unique_pairs(&self, live: &[Assignment]) -> StoreResult<()> {
        let retiring: HashSet<&str> = self.retire.iter().map(|(id, _)| id.as_str()).collect();
        let mut taken: HashSet<(GraderId, PaperId)> = live
            .iter()
            .filter(|a| !retiring.contains(a.id.as_str()))
            .filter_map(|a| a.grader_id.map(|g| (g, a.paper_id)))
            .collect();

        for assignment in &self.create {
            if let Some(grader_id) = assignment.grader_id {
                if !taken.insert((grader_id, assignment.paper_id)) {
                    return Err(StoreError::Conflict(Conflict::DuplicateAssignment {
                        grader_id,
                        paper_id: assignment.paper_id,
                    }));
                }
            }
        }
        Ok(())
    }
}

/// Query over live assignments
#[derive(Debug, Clone, Default)]
pub struct AssignmentFilter {
    pub grader_id: Option<GraderId>,
    pub paper_id: Option<PaperId>,
    pub kinds: Option<Vec<TaskKind>>,
    pub leader_level: bool,
    pub reclaim_due_before: Option<DateTime<Utc>>,
}

impl AssignmentFilter {
    /// Create an empty filter (matches all live assignments)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grader(mut self, grader_id: GraderId) -> Self {
        self.grader_id = Some(grader_id);
        self
    }

    pub fn paper(mut self, paper_id: PaperId) -> Self {
        self.paper_id = Some(paper_id);
        self
    }

    pub fn kinds(mut self, kinds: Vec<TaskKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    /// Only unaddressed supervisor work
    pub fn leader_level(mut self) -> Self {
        self.leader_level = true;
        self
    }

    /// Only reclaimable assignments whose deadline is at or before `now`
    pub fn reclaim_due(mut self, now: DateTime<Utc>) -> Self {
        self.reclaim_due_before = Some(now);
        self
    }

    pub fn matches(&self, assignment: &Assignment) -> bool {
        if let Some(grader_id) = self.grader_id {
            if assignment.grader_id != Some(grader_id) {
                return false;
            }
        }
        if let Some(paper_id) = self.paper_id {
            if assignment.paper_id != paper_id {
                return false;
            }
        }
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&assignment.kind) {
                return false;
            }
        }
        if self.leader_level
            && (!assignment.kind.is_leader_level() || assignment.grader_id.is_some())
        {
            return false;
        }
        if let Some(now) = self.reclaim_due_before {
            if !assignment.is_reclaim_due(now) {
                return false;
            }
        }
        true
    }
}

/// Durable storage the engine depends on
pub trait PaperStore: Send + Sync {
    fn put_topic(&self, topic: &Topic) -> StoreResult<()>;

    fn get_topic(&self, topic_id: TopicId) -> StoreResult<Option<Topic>>;

    /// Insert or replace a paper outside the grading flow (import)
    fn put_paper(&self, paper: &Paper) -> StoreResult<()>;

    fn get_paper(&self, paper_id: PaperId) -> StoreResult<Option<Paper>>;

    /// Delete a paper if it is still at `expected_revision`
    fn delete_paper(&self, paper_id: PaperId, expected_revision: u64) -> StoreResult<()>;

    /// Papers of a topic, ordered by id
    fn list_papers(&self, topic_id: TopicId) -> StoreResult<Vec<Paper>>;

    fn get_assignment(&self, assignment_id: &str) -> StoreResult<Option<Assignment>>;

    /// Tombstone of a consumed or reclaimed assignment
    fn get_retired(&self, assignment_id: &str) -> StoreResult<Option<RetiredAssignment>>;

    /// Live assignments matching `filter`, oldest first
    fn find_assignments(&self, filter: &AssignmentFilter) -> StoreResult<Vec<Assignment>>;

    /// All records of a grader, oldest first
    fn records_by_grader(&self, grader_id: GraderId) -> StoreResult<Vec<ScoreRecord>>;

    /// All records of a paper, oldest first
    fn records_for_paper(&self, paper_id: PaperId) -> StoreResult<Vec<ScoreRecord>>;

    fn put_cohort(&self, cohort: &TrainingCohort) -> StoreResult<()>;

    /// First cohort with an id greater than `after` (or the first one)
    fn next_cohort_after(&self, after: Option<CohortId>) -> StoreResult<Option<TrainingCohort>>;

    fn cohort_progress(&self, grader_id: GraderId) -> StoreResult<CohortProgress>;

    /// Number of self-check windows already sampled for a grader
    fn self_check_cursor(&self, grader_id: GraderId) -> StoreResult<u64>;

    /// Apply every mutation in `commit` atomically
    fn commit(&self, commit: Commit) -> StoreResult<()>;

    /// The last `n` records of a grader, oldest first
    fn last_records(&self, grader_id: GraderId, n: usize) -> StoreResult<Vec<ScoreRecord>> {
        let mut records = self.records_by_grader(grader_id)?;
        let skip = records.len().saturating_sub(n);
        Ok(records.split_off(skip))
    }
}
