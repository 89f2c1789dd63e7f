//! Grading state machine
//!
//! Turns a score submission into the paper's next disposition. Every
//! submission is planned against a snapshot of the paper, then applied as a
//! single [`Commit`]: the assignment is retired, the paper is written at the
//! revision it was read, follow-up assignments are created and exactly one
//! score record is written. If the commit loses a race the whole plan is
//! rebuilt from fresh state.
//!
//! Round flow for a double-blind topic:
//!
//! ```text
//! FirstRound ──▶ SecondRound ──┬──▶ within tolerance ──▶ Final (average)
//!                              └──▶ Arbitration ──┬──▶ resolved ──▶ Final (pair average)
//!                                                 └──▶ LeaderEscalation ──▶ Final (leader)
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::arbitration::{self, ClosestPair};
use crate::config::RecordPolicy;
use crate::error::{EngineError, EngineResult, NotFoundKind};
use crate::events::{GradingEvent, SharedEventBus};
use crate::identity::{GraderProfile, SharedDirectory};
use crate::random::SharedRandom;
use crate::state::{
    Assignment, AssignmentFilter, Commit, Conflict, EscalationCause, ExaminerMark, ExaminerSlot,
    GraderId, LeaderMark, Paper, PaperId, PaperStatus, ProblemNote, RetireReason, ScoreRecord,
    ScoringMode, SharedPaperStore, StoreError, TaskKind, Topic,
};

/// Attempts before a conflicting commit is reported to the caller
const MAX_COMMIT_ATTEMPTS: usize = 3;

/// What a submission did to the paper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Score recorded without touching the paper's grading state
    Recorded,
    /// First of two blind marks stored
    AwaitingSecondMark,
    Finalized,
    ArbitrationRequested { arbiter_id: GraderId },
    Escalated { cause: EscalationCause },
    SelfChecked { within_tolerance: bool },
}

/// Result of a score submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizationResult {
    pub paper_id: PaperId,
    pub final_score: Option<i64>,
    pub finalized: bool,
    pub disposition: Disposition,
}

/// Result of a problem report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemReport {
    pub paper_id: PaperId,
    /// An identical report was already waiting at the leader desk
    pub duplicate: bool,
    pub hold_assignment_id: Option<String>,
}

struct Transition {
    commit: Commit,
    outcome: FinalizationResult,
    events: Vec<GradingEvent>,
}

impl Transition {
    fn new(commit: Commit, paper_id: PaperId, disposition: Disposition) -> Self {
        Self {
            commit,
            outcome: FinalizationResult {
                paper_id,
                final_score: None,
                finalized: false,
                disposition,
            },
            events: Vec::new(),
        }
    }
}

/// Check a score payload against the topic's sub-questions
pub fn validate_scores(topic: &Topic, scores: &[i64]) -> EngineResult<()> {
    if scores.len() != topic.sub_questions.len() {
        return Err(EngineError::InvalidScorePayload(format!(
            "expected {} scores, got {}",
            topic.sub_questions.len(),
            scores.len()
        )));
    }
    for (question, &score) in topic.sub_questions.iter().zip(scores) {
        if score < 0 || score > question.full_score {
            return Err(EngineError::InvalidScorePayload(format!(
                "score {} for {} outside 0..={}",
                score, question.name, question.full_score
            )));
        }
    }
    Ok(())
}

fn authorize(assignment: &Assignment, profile: &GraderProfile) -> EngineResult<()> {
    match assignment.grader_id {
        Some(id) if id == profile.id => Ok(()),
        None if profile.is_leader() => Ok(()),
        _ => Err(EngineError::NotAssignee {
            grader_id: profile.id,
            assignment_id: assignment.id.clone(),
        }),
    }
}

fn round_kind(slot: ExaminerSlot) -> TaskKind {
    match slot {
        ExaminerSlot::First => TaskKind::FirstRound,
        ExaminerSlot::Second => TaskKind::SecondRound,
        ExaminerSlot::Third => TaskKind::Arbitration,
    }
}

/// Work that reviews a grader rather than the paper it sits on
fn audits_grader(kind: TaskKind) -> bool {
    matches!(
        kind,
        TaskKind::SelfCheck
            | TaskKind::LeaderEscalation {
                cause: EscalationCause::CalibrationConcern,
            }
    )
}

fn out_of_order(paper: &Paper, kind: TaskKind) -> EngineError {
    EngineError::RoundOutOfOrder {
        paper_id: paper.id,
        kind: kind.to_string(),
    }
}

fn finalize(paper: &mut Paper, score: i64, item_scores: Vec<i64>) {
    paper.final_score = Some(score);
    paper.final_item_scores = Some(item_scores);
    paper.finalized_at = Some(Utc::now());
    paper.status = PaperStatus::Final;
}

/// Applies score submissions to papers
pub struct GradingMachine {
    store: SharedPaperStore,
    directory: SharedDirectory,
    event_bus: SharedEventBus,
    random: SharedRandom,
    record_policy: RecordPolicy,
}

impl GradingMachine {
    /// Create a new grading machine
    pub fn new(
        store: SharedPaperStore,
        directory: SharedDirectory,
        event_bus: SharedEventBus,
        random: SharedRandom,
        record_policy: RecordPolicy,
    ) -> Self {
        Self {
            store,
            directory,
            event_bus,
            random,
            record_policy,
        }
    }

    /// Apply one score submission
    pub fn submit(
        &self,
        grader_id: GraderId,
        paper_id: PaperId,
        assignment_id: &str,
        scores: &[i64],
    ) -> EngineResult<FinalizationResult> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let transition = self.plan_submission(grader_id, paper_id, assignment_id, scores)?;
            match self.apply(transition, assignment_id) {
                Err(EngineError::ConcurrentUpdate(conflict)) if attempt < MAX_COMMIT_ATTEMPTS => {
                    debug!(paper_id, grader_id, attempt, %conflict, "Replanning submission");
                }
                other => return other,
            }
        }
    }

    /// Turn an assignment into a problem hold for the leader desk
    pub fn report_problem(
        &self,
        grader_id: GraderId,
        paper_id: PaperId,
        assignment_id: &str,
        problem_type: &str,
        message: &str,
    ) -> EngineResult<ProblemReport> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let (transition, report) =
                self.plan_problem(grader_id, paper_id, assignment_id, problem_type, message)?;
            match self.apply(transition, assignment_id) {
                Ok(_) => {
                    info!(
                        paper_id,
                        grader_id,
                        problem_type,
                        duplicate = report.duplicate,
                        "Problem reported"
                    );
                    return Ok(report);
                }
                Err(EngineError::ConcurrentUpdate(conflict)) if attempt < MAX_COMMIT_ATTEMPTS => {
                    debug!(paper_id, grader_id, attempt, %conflict, "Replanning problem report");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Revise the grader's own latest mark on a paper still being graded
    pub fn revise(
        &self,
        grader_id: GraderId,
        paper_id: PaperId,
        scores: &[i64],
    ) -> EngineResult<FinalizationResult> {
        self.directory.grader(grader_id)?;
        let paper = self.load_paper(paper_id)?;
        let topic = self.load_topic(&paper)?;
        validate_scores(&topic, scores)?;

        if paper.is_final() {
            return Err(EngineError::AlreadyFinalized(paper_id));
        }

        let slot = paper
            .slot_of(grader_id)
            .ok_or_else(|| out_of_order(&paper, TaskKind::FirstRound))?;
        let kind = round_kind(slot);
        let arbitration_live = !self
            .store
            .find_assignments(
                &AssignmentFilter::new()
                    .paper(paper_id)
                    .kinds(vec![TaskKind::Arbitration]),
            )?
            .is_empty();
        if paper.status != PaperStatus::Pending
            || paper.latest_slot() != Some(slot)
            || arbitration_live
        {
            return Err(out_of_order(&paper, kind));
        }

        let mut next = paper.clone();
        let total: i64 = scores.iter().sum();
        if let Some(mark) = next.mark_mut(slot) {
            mark.score = total;
            mark.item_scores = scores.to_vec();
            mark.marked_at = Utc::now();
        }

        let commit = Commit::new().write_paper(next);
        let commit = self.with_record(commit, &paper, grader_id, total, kind, false)?;
        self.store.commit(commit)?;

        info!(paper_id, grader_id, kind = %kind, score = total, "Mark revised");
        Ok(FinalizationResult {
            paper_id,
            final_score: None,
            finalized: false,
            disposition: Disposition::Recorded,
        })
    }

    fn apply(&self, transition: Transition, assignment_id: &str) -> EngineResult<FinalizationResult> {
        match self.store.commit(transition.commit) {
            Ok(()) => {}
            Err(StoreError::Conflict(Conflict::AssignmentRetired(id))) if id == assignment_id => {
                return Err(EngineError::AssignmentAlreadyConsumed(id));
            }
            Err(e) => return Err(e.into()),
        }

        for event in transition.events {
            let _ = self.event_bus.publish(event);
        }
        Ok(transition.outcome)
    }

    fn load_assignment(&self, assignment_id: &str) -> EngineResult<Assignment> {
        if let Some(assignment) = self.store.get_assignment(assignment_id)? {
            return Ok(assignment);
        }
        if self.store.get_retired(assignment_id)?.is_some() {
            return Err(EngineError::AssignmentAlreadyConsumed(
                assignment_id.to_string(),
            ));
        }
        Err(EngineError::NotFound(NotFoundKind::Assignment))
    }

    fn load_paper(&self, paper_id: PaperId) -> EngineResult<Paper> {
        self.store
            .get_paper(paper_id)?
            .ok_or(EngineError::NotFound(NotFoundKind::Paper))
    }

    fn load_topic(&self, paper: &Paper) -> EngineResult<Topic> {
        self.store
            .get_topic(paper.topic_id)?
            .ok_or(EngineError::NotFound(NotFoundKind::Topic))
    }

    /// Load and authorize the assignment a grader is acting on
    fn claim(
        &self,
        grader_id: GraderId,
        paper_id: PaperId,
        assignment_id: &str,
    ) -> EngineResult<(Assignment, Paper, Topic)> {
        let assignment = self.load_assignment(assignment_id)?;
        if assignment.paper_id != paper_id {
            return Err(EngineError::NotFound(NotFoundKind::Assignment));
        }
        let profile = self.directory.grader(grader_id)?;
        authorize(&assignment, &profile)?;

        let paper = self.load_paper(paper_id)?;
        let topic = self.load_topic(&paper)?;
        Ok((assignment, paper, topic))
    }

    /// Append a record, or correct the grader's earlier one under `CorrectInPlace`
    fn with_record(
        &self,
        commit: Commit,
        paper: &Paper,
        grader_id: GraderId,
        score: i64,
        kind: TaskKind,
        finalized: bool,
    ) -> EngineResult<Commit> {
        let record = ScoreRecord::new(grader_id, paper, score, kind, finalized);

        if self.record_policy == RecordPolicy::CorrectInPlace {
            let earlier = self
                .store
                .records_for_paper(paper.id)?
                .into_iter()
                .rev()
                .find(|r| r.grader_id == grader_id && r.kind == kind);
            if let Some(earlier) = earlier {
                return Ok(commit.correct(ScoreRecord {
                    id: earlier.id,
                    ..record
                }));
            }
        }
        Ok(commit.append(record))
    }

    /// Retire every other live assignment on a paper that just finalized
    ///
    /// Self-checks and calibration concern reviews survive; they audit the
    /// grader, not the paper.
    fn supersede_others(
        &self,
        mut commit: Commit,
        paper: &mut Paper,
        current: &Assignment,
    ) -> EngineResult<Commit> {
        let others = self
            .store
            .find_assignments(&AssignmentFilter::new().paper(paper.id))?;
        for other in others {
            if other.id == current.id || audits_grader(other.kind) {
                continue;
            }
            if other.kind.is_reclaimable() {
                paper.in_flight = paper.in_flight.saturating_sub(1);
            }
            debug!(paper_id = paper.id, assignment_id = %other.id, kind = %other.kind, "Superseding assignment");
            commit = commit.retire(other.id, RetireReason::Superseded);
        }
        Ok(commit)
    }

    fn plan_submission(
        &self,
        grader_id: GraderId,
        paper_id: PaperId,
        assignment_id: &str,
        scores: &[i64],
    ) -> EngineResult<Transition> {
        let (assignment, paper, topic) = self.claim(grader_id, paper_id, assignment_id)?;
        validate_scores(&topic, scores)?;

        let total: i64 = scores.iter().sum();
        let commit = Commit::new().retire(assignment.id.clone(), RetireReason::Submitted);

        let mut transition = match assignment.kind {
            TaskKind::Training
            | TaskKind::Calibration
            | TaskKind::LeaderEscalation {
                cause: EscalationCause::CalibrationConcern,
            } => {
                let commit =
                    self.with_record(commit, &paper, grader_id, total, assignment.kind, false)?;
                Transition::new(commit, paper_id, Disposition::Recorded)
            }
            TaskKind::SelfCheck => {
                self.plan_self_check(commit, &assignment, paper, &topic, grader_id, scores)?
            }
            TaskKind::LeaderEscalation {
                cause: EscalationCause::Dispute,
            }
            | TaskKind::LeaderDirect
            | TaskKind::ProblemHold => {
                self.plan_leader(commit, &assignment, paper, grader_id, scores)?
            }
            TaskKind::FirstRound | TaskKind::SecondRound | TaskKind::Arbitration => {
                self.plan_round(commit, &assignment, paper, &topic, grader_id, scores)?
            }
        };

        transition.events.insert(
            0,
            GradingEvent::ScoreSubmitted {
                paper_id,
                grader_id,
                assignment_id: assignment.id.clone(),
                kind: assignment.kind,
                score: total,
                timestamp: Utc::now(),
            },
        );
        if let Some(final_score) = transition.outcome.final_score {
            transition.events.push(GradingEvent::PaperFinalized {
                paper_id,
                topic_id: topic.id,
                final_score,
                finalized_by: grader_id,
                timestamp: Utc::now(),
            });
        }

        info!(
            paper_id,
            grader_id,
            assignment_id,
            kind = %assignment.kind,
            score = total,
            disposition = ?transition.outcome.disposition,
            "Score submitted"
        );
        Ok(transition)
    }

    fn plan_self_check(
        &self,
        commit: Commit,
        assignment: &Assignment,
        paper: Paper,
        topic: &Topic,
        grader_id: GraderId,
        scores: &[i64],
    ) -> EngineResult<Transition> {
        let slot = paper
            .slot_of(grader_id)
            .ok_or_else(|| out_of_order(&paper, assignment.kind))?;

        let total: i64 = scores.iter().sum();
        let mut next = paper.clone();
        let original = match next.mark_mut(slot) {
            Some(mark) => {
                mark.self_score = Some(total);
                mark.self_item_scores = Some(scores.to_vec());
                mark.score
            }
            None => return Err(out_of_order(&paper, assignment.kind)),
        };
        let within_tolerance = topic.within_tolerance(original, total);

        let mut commit = commit.write_paper(next);
        let mut events = Vec::new();
        if !within_tolerance {
            let review = Assignment::new(
                &paper,
                None,
                TaskKind::LeaderEscalation {
                    cause: EscalationCause::CalibrationConcern,
                },
            )
            .with_subject(grader_id);
            warn!(
                paper_id = paper.id,
                grader_id,
                original,
                self_score = total,
                tolerance = topic.standard_error,
                "Self-check drifted beyond tolerance"
            );
            commit = commit.create(review);
            events.push(GradingEvent::LeaderEscalated {
                paper_id: paper.id,
                cause: EscalationCause::CalibrationConcern,
                subject_grader: Some(grader_id),
                timestamp: Utc::now(),
            });
        }

        let commit = self.with_record(commit, &paper, grader_id, total, assignment.kind, false)?;
        let mut transition = Transition::new(
            commit,
            paper.id,
            Disposition::SelfChecked { within_tolerance },
        );
        transition.events = events;
        Ok(transition)
    }

    fn plan_leader(
        &self,
        commit: Commit,
        assignment: &Assignment,
        paper: Paper,
        grader_id: GraderId,
        scores: &[i64],
    ) -> EngineResult<Transition> {
        if paper.is_final() {
            return Err(EngineError::AlreadyFinalized(paper.id));
        }

        let mut next = paper.clone();
        let mark = LeaderMark::new(grader_id, scores.to_vec());
        let total = mark.score;
        next.leader = Some(mark);
        finalize(&mut next, total, scores.to_vec());

        let commit = self.supersede_others(commit, &mut next, assignment)?;
        let commit = commit.write_paper(next);
        let commit = self.with_record(commit, &paper, grader_id, total, assignment.kind, true)?;

        let mut transition = Transition::new(commit, paper.id, Disposition::Finalized);
        transition.outcome.final_score = Some(total);
        transition.outcome.finalized = true;
        Ok(transition)
    }

    fn plan_round(
        &self,
        commit: Commit,
        assignment: &Assignment,
        paper: Paper,
        topic: &Topic,
        grader_id: GraderId,
        scores: &[i64],
    ) -> EngineResult<Transition> {
        if paper.is_final() {
            return Err(EngineError::AlreadyFinalized(paper.id));
        }

        let kind = assignment.kind;
        let mark = ExaminerMark::new(grader_id, scores.to_vec());
        let total = mark.score;
        let mut next = paper.clone();
        if kind.is_reclaimable() {
            next.in_flight = next.in_flight.saturating_sub(1);
        }

        let mut events = Vec::new();
        let mut commit = commit;
        let mut final_score = None;

        let disposition = match (topic.mode, kind) {
            (ScoringMode::Single, TaskKind::FirstRound) if next.first.is_none() => {
                next.first = Some(mark);
                final_score = Some((total, scores.to_vec()));
                Disposition::Finalized
            }
            (ScoringMode::DoubleBlind, TaskKind::FirstRound) if next.first.is_none() => {
                next.first = Some(mark);
                Disposition::AwaitingSecondMark
            }
            (ScoringMode::DoubleBlind, TaskKind::SecondRound)
                if next.first.is_some() && next.second.is_none() =>
            {
                let first = next
                    .first
                    .clone()
                    .ok_or_else(|| out_of_order(&paper, kind))?;
                next.second = Some(mark);

                if topic.within_tolerance(first.score, total) {
                    final_score = Some((
                        arbitration::average(first.score, total),
                        arbitration::average_items(&first.item_scores, scores),
                    ));
                    Disposition::Finalized
                } else {
                    let (follow_up, event, disposition) =
                        self.request_arbitration(&mut next, topic, first.score, total)?;
                    commit = commit.create(follow_up);
                    events.push(event);
                    disposition
                }
            }
            (ScoringMode::DoubleBlind, TaskKind::Arbitration)
                if next.third.is_none() && next.second.is_some() =>
            {
                let (first, second) = match (next.first.clone(), next.second.clone()) {
                    (Some(first), Some(second)) => (first, second),
                    _ => return Err(out_of_order(&paper, kind)),
                };
                next.third = Some(mark);

                let resolution =
                    arbitration::resolve(first.score, second.score, total, topic.standard_error);
                if resolution.resolved {
                    let partner = match resolution.pair {
                        ClosestPair::FirstThird => &first,
                        ClosestPair::SecondThird => &second,
                    };
                    final_score = Some((
                        resolution.final_score,
                        arbitration::average_items(&partner.item_scores, scores),
                    ));
                    Disposition::Finalized
                } else {
                    next.status = PaperStatus::NeedsLeader;
                    commit = commit.create(Assignment::new(
                        &paper,
                        None,
                        TaskKind::LeaderEscalation {
                            cause: EscalationCause::Dispute,
                        },
                    ));
                    events.push(GradingEvent::LeaderEscalated {
                        paper_id: paper.id,
                        cause: EscalationCause::Dispute,
                        subject_grader: None,
                        timestamp: Utc::now(),
                    });
                    info!(
                        paper_id = paper.id,
                        first = first.score,
                        second = second.score,
                        third = total,
                        "Arbitration unresolved, escalating to leader"
                    );
                    Disposition::Escalated {
                        cause: EscalationCause::Dispute,
                    }
                }
            }
            _ => return Err(out_of_order(&paper, kind)),
        };

        let finalized = final_score.is_some();
        if let Some((score, items)) = final_score.clone() {
            finalize(&mut next, score, items);
            commit = self.supersede_others(commit, &mut next, assignment)?;
        }
        let commit = commit.write_paper(next);
        let commit = self.with_record(commit, &paper, grader_id, total, kind, finalized)?;

        let mut transition = Transition::new(commit, paper.id, disposition);
        transition.outcome.final_score = final_score.map(|(score, _)| score);
        transition.outcome.finalized = finalized;
        transition.events = events;
        Ok(transition)
    }

    /// Pick a third examiner, or escalate when nobody is eligible
    fn request_arbitration(
        &self,
        paper: &mut Paper,
        topic: &Topic,
        first_score: i64,
        second_score: i64,
    ) -> EngineResult<(Assignment, GradingEvent, Disposition)> {
        let examiners = paper.examiners();
        let candidates: Vec<GraderId> = self
            .directory
            .qualified_graders(topic.id)?
            .into_iter()
            .filter(|g| !examiners.contains(g))
            .collect();

        match self.random.pick(candidates.len()).map(|i| candidates[i]) {
            Some(arbiter_id) => {
                info!(
                    paper_id = paper.id,
                    arbiter_id,
                    first_score,
                    second_score,
                    tolerance = topic.standard_error,
                    "Marks disagree, requesting arbitration"
                );
                let assignment = Assignment::new(paper, Some(arbiter_id), TaskKind::Arbitration);
                let event = GradingEvent::ArbitrationRequested {
                    paper_id: paper.id,
                    arbiter_id,
                    first_score,
                    second_score,
                    timestamp: Utc::now(),
                };
                Ok((
                    assignment,
                    event,
                    Disposition::ArbitrationRequested { arbiter_id },
                ))
            }
            None => {
                warn!(
                    paper_id = paper.id,
                    topic_id = topic.id,
                    "No eligible arbiter, escalating to leader"
                );
                paper.status = PaperStatus::NeedsLeader;
                let assignment = Assignment::new(
                    paper,
                    None,
                    TaskKind::LeaderEscalation {
                        cause: EscalationCause::Dispute,
                    },
                );
                let event = GradingEvent::LeaderEscalated {
                    paper_id: paper.id,
                    cause: EscalationCause::Dispute,
                    subject_grader: None,
                    timestamp: Utc::now(),
                };
                Ok((
                    assignment,
                    event,
                    Disposition::Escalated {
                        cause: EscalationCause::Dispute,
                    },
                ))
            }
        }
    }

    fn plan_problem(
        &self,
        grader_id: GraderId,
        paper_id: PaperId,
        assignment_id: &str,
        problem_type: &str,
        message: &str,
    ) -> EngineResult<(Transition, ProblemReport)> {
        let (assignment, paper, _topic) = self.claim(grader_id, paper_id, assignment_id)?;
        let record = ScoreRecord::new(grader_id, &paper, 0, TaskKind::ProblemHold, false)
            .with_problem_type(problem_type);

        // Practice and reference papers are never held or re-flagged
        if matches!(assignment.kind, TaskKind::Training | TaskKind::Calibration)
            || paper.status == PaperStatus::Example
        {
            debug!(paper_id, grader_id, kind = %assignment.kind, "Problem noted on reference work");
            let commit = Commit::new()
                .retire(assignment.id.clone(), RetireReason::ProblemReported)
                .append(record);
            let mut transition = Transition::new(commit, paper_id, Disposition::Recorded);
            transition.events.push(GradingEvent::ProblemReported {
                paper_id,
                grader_id,
                problem_type: problem_type.to_string(),
                duplicate: false,
                timestamp: Utc::now(),
            });
            let report = ProblemReport {
                paper_id,
                duplicate: false,
                hold_assignment_id: None,
            };
            return Ok((transition, report));
        }

        if paper.is_final() {
            return Err(EngineError::AlreadyFinalized(paper_id));
        }

        let mut next = paper.clone();
        if assignment.kind.is_reclaimable() {
            next.in_flight = next.in_flight.saturating_sub(1);
        }

        let note = ProblemNote {
            problem_type: problem_type.to_string(),
            message: message.to_string(),
            reported_by: grader_id,
            reported_at: Utc::now(),
        };

        let duplicate = self
            .store
            .find_assignments(
                &AssignmentFilter::new()
                    .paper(paper_id)
                    .kinds(vec![TaskKind::ProblemHold]),
            )?
            .iter()
            .any(|hold| {
                hold.problem
                    .as_ref()
                    .is_some_and(|p| p.problem_type == problem_type)
            });

        let mut commit = Commit::new().retire(assignment.id.clone(), RetireReason::ProblemReported);
        let mut hold_assignment_id = None;
        if !duplicate {
            let hold =
                Assignment::new(&paper, None, TaskKind::ProblemHold).with_problem(note.clone());
            hold_assignment_id = Some(hold.id.clone());
            commit = commit.create(hold);
            next.status = PaperStatus::FlaggedProblem;
            next.problem = Some(note);
        }
        let commit = commit.write_paper(next).append(record);

        let mut transition = Transition::new(commit, paper_id, Disposition::Recorded);
        transition.events.push(GradingEvent::ProblemReported {
            paper_id,
            grader_id,
            problem_type: problem_type.to_string(),
            duplicate,
            timestamp: Utc::now(),
        });

        let report = ProblemReport {
            paper_id,
            duplicate,
            hold_assignment_id,
        };
        Ok((transition, report))
    }
}
