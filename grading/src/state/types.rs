//! Core types for grading state
//!
//! These types are persisted by a [`PaperStore`](super::PaperStore) and
//! represent topics, papers, outstanding assignments and the score audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a topic ("big question")
pub type TopicId = i64;

/// Identifier of a paper
pub type PaperId = i64;

/// Identifier of a grader (examiner or leader)
pub type GraderId = i64;

/// Identifier of a calibration cohort
pub type CohortId = i64;

/// Unique identifier for assignments
pub type AssignmentId = String;

/// Unique identifier for score records
pub type RecordId = String;

/// Identifier shared by assignments handed out in one request
pub type BatchId = String;

/// How many independent marks a topic requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// One examiner, score is final immediately
    Single,
    /// Two blind examiners, arbitration on disagreement
    DoubleBlind,
}

impl ScoringMode {
    /// Number of independent marks needed before a paper can finalize
    pub fn independent_marks(&self) -> usize {
        match self {
            ScoringMode::Single => 1,
            ScoringMode::DoubleBlind => 2,
        }
    }
}

impl std::fmt::Display for ScoringMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoringMode::Single => write!(f, "single"),
            ScoringMode::DoubleBlind => write!(f, "double_blind"),
        }
    }
}

/// One scorable item inside a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuestion {
    pub id: i64,
    pub name: String,
    pub full_score: i64,
}

impl SubQuestion {
    pub fn new(id: i64, name: impl Into<String>, full_score: i64) -> Self {
        Self {
            id,
            name: name.into(),
            full_score,
        }
    }
}

/// A gradable question with its scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    /// Topic identifier
    pub id: TopicId,

    /// Display name
    pub name: String,

    /// Subject the topic belongs to
    pub subject: String,

    /// Single or double-blind scoring
    pub mode: ScoringMode,

    /// Maximum total score
    pub full_score: i64,

    /// Largest disagreement between two marks that is still accepted
    pub standard_error: i64,

    /// Fraction of a grader's completed window re-checked blind (0.0..=1.0)
    pub self_score_rate: f64,

    /// Sub-questions, in payload order
    pub sub_questions: Vec<SubQuestion>,
}

impl Topic {
    /// Create a topic with a single sub-question covering the full score
    pub fn new(
        id: TopicId,
        name: impl Into<String>,
        mode: ScoringMode,
        full_score: i64,
        standard_error: i64,
    ) -> Self {
        let name = name.into();
        Self {
            id,
            sub_questions: vec![SubQuestion::new(1, name.clone(), full_score)],
            name,
            subject: String::new(),
            mode,
            full_score,
            standard_error,
            self_score_rate: 0.0,
        }
    }

    /// Replace the sub-question list
    pub fn with_sub_questions(mut self, sub_questions: Vec<SubQuestion>) -> Self {
        self.sub_questions = sub_questions;
        self
    }

    /// Set the self-check sampling rate
    pub fn with_self_score_rate(mut self, rate: f64) -> Self {
        self.self_score_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the subject name
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Whether two totals agree within the topic's tolerance
    pub fn within_tolerance(&self, a: i64, b: i64) -> bool {
        (a - b).abs() <= self.standard_error
    }
}

/// Lifecycle status of a paper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperStatus {
    /// Waiting for independent marks
    Pending,
    /// Arbitration failed, a supervisor must decide
    NeedsLeader,
    /// A grader reported a problem with the scan or content
    FlaggedProblem,
    /// Reference paper, never handed out for production grading
    Example,
    /// Final score written
    Final,
}

impl std::fmt::Display for PaperStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaperStatus::Pending => write!(f, "pending"),
            PaperStatus::NeedsLeader => write!(f, "needs_leader"),
            PaperStatus::FlaggedProblem => write!(f, "flagged_problem"),
            PaperStatus::Example => write!(f, "example"),
            PaperStatus::Final => write!(f, "final"),
        }
    }
}

/// Independent examiner slot on a paper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExaminerSlot {
    First,
    Second,
    Third,
}

/// A mark left by one independent examiner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExaminerMark {
    pub grader_id: GraderId,

    /// Sum of `item_scores`
    pub score: i64,

    /// Per-sub-question scores
    pub item_scores: Vec<i64>,

    pub marked_at: DateTime<Utc>,

    /// Total from the blind self re-grade, if one happened
    pub self_score: Option<i64>,

    pub self_item_scores: Option<Vec<i64>>,
}

impl ExaminerMark {
    pub fn new(grader_id: GraderId, item_scores: Vec<i64>) -> Self {
        Self {
            grader_id,
            score: item_scores.iter().sum(),
            item_scores,
            marked_at: Utc::now(),
            self_score: None,
            self_item_scores: None,
        }
    }
}

/// A supervisor's authoritative mark
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderMark {
    pub grader_id: GraderId,
    pub score: i64,
    pub item_scores: Vec<i64>,
    pub marked_at: DateTime<Utc>,
}

impl LeaderMark {
    pub fn new(grader_id: GraderId, item_scores: Vec<i64>) -> Self {
        Self {
            grader_id,
            score: item_scores.iter().sum(),
            item_scores,
            marked_at: Utc::now(),
        }
    }
}

/// A problem reported against a paper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemNote {
    pub problem_type: String,
    pub message: String,
    pub reported_by: GraderId,
    pub reported_at: DateTime<Utc>,
}

/// One candidate's answer for a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    /// Paper identifier
    pub id: PaperId,

    /// Topic this paper answers
    pub topic_id: TopicId,

    /// Current status
    pub status: PaperStatus,

    pub first: Option<ExaminerMark>,
    pub second: Option<ExaminerMark>,
    pub third: Option<ExaminerMark>,

    /// Supervisor mark, kept apart from the examiner slots
    pub leader: Option<LeaderMark>,

    /// Final total, written once
    pub final_score: Option<i64>,

    pub final_item_scores: Option<Vec<i64>>,

    pub finalized_at: Option<DateTime<Utc>>,

    /// Number of live first/second-round assignments on this paper
    pub in_flight: u32,

    /// Bumped by the store on every committed write
    pub revision: u64,

    /// Latest problem report, if any
    pub problem: Option<ProblemNote>,
}

impl Paper {
    /// Create an ungraded paper
    pub fn new(id: PaperId, topic_id: TopicId) -> Self {
        Self {
            id,
            topic_id,
            status: PaperStatus::Pending,
            first: None,
            second: None,
            third: None,
            leader: None,
            final_score: None,
            final_item_scores: None,
            finalized_at: None,
            in_flight: 0,
            revision: 0,
            problem: None,
        }
    }

    /// Mark this paper as a reference example
    pub fn as_example(mut self) -> Self {
        self.status = PaperStatus::Example;
        self
    }

    pub fn is_final(&self) -> bool {
        self.final_score.is_some()
    }

    /// Count of first/second marks present
    pub fn independent_marks(&self) -> usize {
        [&self.first, &self.second]
            .iter()
            .filter(|m| m.is_some())
            .count()
    }

    /// Whether any score has ever been written
    pub fn has_scores(&self) -> bool {
        self.first.is_some()
            || self.second.is_some()
            || self.third.is_some()
            || self.leader.is_some()
            || self.final_score.is_some()
    }

    /// Whether the selector may hand this paper out for an independent mark
    pub fn is_assignable(&self, mode: ScoringMode) -> bool {
        self.status == PaperStatus::Pending
            && !self.is_final()
            && self.in_flight == 0
            && self.independent_marks() < mode.independent_marks()
    }

    /// Slot occupied by `grader_id`, if any
    pub fn slot_of(&self, grader_id: GraderId) -> Option<ExaminerSlot> {
        let owns = |m: &Option<ExaminerMark>| m.as_ref().is_some_and(|m| m.grader_id == grader_id);
        if owns(&self.first) {
            Some(ExaminerSlot::First)
        } else if owns(&self.second) {
            Some(ExaminerSlot::Second)
        } else if owns(&self.third) {
            Some(ExaminerSlot::Third)
        } else {
            None
        }
    }

    pub fn mark(&self, slot: ExaminerSlot) -> Option<&ExaminerMark> {
        match slot {
            ExaminerSlot::First => self.first.as_ref(),
            ExaminerSlot::Second => self.second.as_ref(),
            ExaminerSlot::Third => self.third.as_ref(),
        }
    }

    pub fn mark_mut(&mut self, slot: ExaminerSlot) -> Option<&mut ExaminerMark> {
        match slot {
            ExaminerSlot::First => self.first.as_mut(),
            ExaminerSlot::Second => self.second.as_mut(),
            ExaminerSlot::Third => self.third.as_mut(),
        }
    }

    /// Most recently filled examiner slot
    pub fn latest_slot(&self) -> Option<ExaminerSlot> {
        if self.third.is_some() {
            Some(ExaminerSlot::Third)
        } else if self.second.is_some() {
            Some(ExaminerSlot::Second)
        } else if self.first.is_some() {
            Some(ExaminerSlot::First)
        } else {
            None
        }
    }

    /// Graders holding an examiner slot
    pub fn examiners(&self) -> Vec<GraderId> {
        [&self.first, &self.second, &self.third]
            .iter()
            .filter_map(|m| m.as_ref().map(|m| m.grader_id))
            .collect()
    }
}

/// Why a leader-level assignment was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationCause {
    /// Arbitration could not reconcile the marks
    Dispute,
    /// A grader's self re-grade drifted from their original mark
    CalibrationConcern,
}

impl std::fmt::Display for EscalationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationCause::Dispute => write!(f, "dispute"),
            EscalationCause::CalibrationConcern => write!(f, "calibration_concern"),
        }
    }
}

/// Role a grader plays when producing a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    FirstRound,
    SecondRound,
    Arbitration,
    LeaderEscalation { cause: EscalationCause },
    SelfCheck,
    ProblemHold,
    LeaderDirect,
    Training,
    Calibration,
}

impl TaskKind {
    /// Independent production marks (count toward statistics and self-check windows)
    pub fn is_production(&self) -> bool {
        matches!(
            self,
            TaskKind::FirstRound | TaskKind::SecondRound | TaskKind::Arbitration
        )
    }

    /// Handed out by the selector and released by the reclaimer when stale
    pub fn is_reclaimable(&self) -> bool {
        matches!(self, TaskKind::FirstRound | TaskKind::SecondRound)
    }

    /// Picked up by any supervisor rather than addressed to one grader
    pub fn is_leader_level(&self) -> bool {
        matches!(
            self,
            TaskKind::LeaderEscalation { .. } | TaskKind::ProblemHold | TaskKind::LeaderDirect
        )
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::FirstRound => write!(f, "first_round"),
            TaskKind::SecondRound => write!(f, "second_round"),
            TaskKind::Arbitration => write!(f, "arbitration"),
            TaskKind::LeaderEscalation { cause } => write!(f, "leader_escalation:{}", cause),
            TaskKind::SelfCheck => write!(f, "self_check"),
            TaskKind::ProblemHold => write!(f, "problem_hold"),
            TaskKind::LeaderDirect => write!(f, "leader_direct"),
            TaskKind::Training => write!(f, "training"),
            TaskKind::Calibration => write!(f, "calibration"),
        }
    }
}

/// An outstanding obligation to score one paper in one role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Unique assignment identifier
    pub id: AssignmentId,

    pub paper_id: PaperId,

    pub topic_id: TopicId,

    /// Addressed grader; `None` for leader-level work any supervisor may take
    pub grader_id: Option<GraderId>,

    pub kind: TaskKind,

    pub created_at: DateTime<Utc>,

    /// Request batch this assignment was handed out in
    pub batch_id: Option<BatchId>,

    /// When the reclaimer may release it
    pub reclaim_at: Option<DateTime<Utc>>,

    /// Grader under review for calibration concerns
    pub subject_grader: Option<GraderId>,

    pub problem: Option<ProblemNote>,
}

impl Assignment {
    /// Create an assignment for `paper`
    pub fn new(paper: &Paper, grader_id: Option<GraderId>, kind: TaskKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            paper_id: paper.id,
            topic_id: paper.topic_id,
            grader_id,
            kind,
            created_at: Utc::now(),
            batch_id: None,
            reclaim_at: None,
            subject_grader: None,
            problem: None,
        }
    }

    /// Attach a reclaim deadline
    pub fn with_reclaim(mut self, batch_id: BatchId, reclaim_at: DateTime<Utc>) -> Self {
        self.batch_id = Some(batch_id);
        self.reclaim_at = Some(reclaim_at);
        self
    }

    pub fn with_subject(mut self, grader_id: GraderId) -> Self {
        self.subject_grader = Some(grader_id);
        self
    }

    pub fn with_problem(mut self, problem: ProblemNote) -> Self {
        self.problem = Some(problem);
        self
    }

    /// Whether the reclaimer may release this assignment at `now`
    pub fn is_reclaim_due(&self, now: DateTime<Utc>) -> bool {
        self.kind.is_reclaimable() && self.reclaim_at.is_some_and(|at| at <= now)
    }
}

/// How an assignment left the live queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireReason {
    Submitted,
    Reclaimed,
    ProblemReported,
    Superseded,
}

/// Tombstone kept for a consumed assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetiredAssignment {
    pub assignment: Assignment,
    pub reason: RetireReason,
    pub retired_at: DateTime<Utc>,
}

/// Audit entry for one score submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub id: RecordId,
    pub grader_id: GraderId,
    pub paper_id: PaperId,
    pub topic_id: TopicId,
    pub score: i64,
    pub kind: TaskKind,
    pub recorded_at: DateTime<Utc>,

    /// Whether this submission wrote the paper's final score
    pub finalized: bool,

    pub problem_type: Option<String>,
}

impl ScoreRecord {
    pub fn new(
        grader_id: GraderId,
        paper: &Paper,
        score: i64,
        kind: TaskKind,
        finalized: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            grader_id,
            paper_id: paper.id,
            topic_id: paper.topic_id,
            score,
            kind,
            recorded_at: Utc::now(),
            finalized,
            problem_type: None,
        }
    }

    pub fn with_problem_type(mut self, problem_type: impl Into<String>) -> Self {
        self.problem_type = Some(problem_type.into());
        self
    }
}

/// An ordered group of reference papers used to calibrate new graders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingCohort {
    pub id: CohortId,
    pub papers: Vec<PaperId>,
}

/// Where a grader stands in the calibration sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortProgress {
    pub current: Option<CohortId>,
    pub last_completed: Option<CohortId>,
}
