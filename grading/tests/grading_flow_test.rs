//! Integration tests for the grading flow
//!
//! Drives the engine through request → submit → arbitration → leader with an
//! in-memory store and a seeded random source.

use std::sync::Arc;

use chrono::{Duration, Utc};
use grading::engine::{Disposition, FinalizationResult};
use grading::events::{EventBusExt, EventFilter};
use grading::identity::{GraderProfile, StaticDirectory};
use grading::random::SeededRandom;
use grading::state::{
    Assignment, AssignmentFilter, Commit, EscalationCause, MemoryStore, Paper, PaperStatus,
    PaperStore, RetireReason, ScoringMode, SubQuestion, TaskKind, Topic,
};
use grading::{EngineConfig, EngineError, GradingEngine, NotFoundKind, RecordPolicy};

const TOPIC: i64 = 1;
const LEADER: i64 = 9;

struct Harness {
    engine: GradingEngine,
    store: Arc<MemoryStore>,
}

fn essay(mode: ScoringMode) -> Topic {
    Topic::new(TOPIC, "Essay", mode, 20, 3)
}

fn harness_with(
    topic: Topic,
    graders: Vec<GraderProfile>,
    papers: i64,
    config: EngineConfig,
) -> Harness {
    let store = MemoryStore::new().shared();
    store.put_topic(&topic).unwrap();
    for id in 1..=papers {
        store.put_paper(&Paper::new(id, TOPIC)).unwrap();
    }
    let directory = StaticDirectory::with_graders(graders).shared();
    let engine = GradingEngine::with_random(
        store.clone(),
        directory,
        config,
        Arc::new(SeededRandom::new(7)),
    );
    Harness { engine, store }
}

/// Examiners 1..=3 and a leader on a double-blind topic with one paper
fn double_blind() -> Harness {
    harness_with(
        essay(ScoringMode::DoubleBlind),
        vec![
            GraderProfile::examiner(1, TOPIC),
            GraderProfile::examiner(2, TOPIC),
            GraderProfile::examiner(3, TOPIC),
            GraderProfile::leader(LEADER, TOPIC),
        ],
        1,
        EngineConfig::default(),
    )
}

fn held(h: &Harness, grader_id: i64, paper_id: i64) -> Assignment {
    h.engine
        .pending_assignment(grader_id, paper_id)
        .unwrap()
        .expect("grader should hold an assignment")
}

fn mark(h: &Harness, grader_id: i64, paper_id: i64, score: i64) -> FinalizationResult {
    assert_eq!(h.engine.request_work(grader_id).unwrap(), vec![paper_id]);
    let assignment = held(h, grader_id, paper_id);
    h.engine
        .submit(grader_id, paper_id, &assignment.id, &[score])
        .unwrap()
}

fn paper(h: &Harness, paper_id: i64) -> Paper {
    h.store.get_paper(paper_id).unwrap().unwrap()
}

#[test]
fn test_single_mode_finalizes_with_sum() {
    let topic = essay(ScoringMode::Single).with_sub_questions(vec![
        SubQuestion::new(1, "structure", 10),
        SubQuestion::new(2, "argument", 10),
    ]);
    let h = harness_with(
        topic,
        vec![GraderProfile::examiner(1, TOPIC)],
        1,
        EngineConfig::default(),
    );
    let mut finals = h
        .engine
        .event_bus()
        .subscribe_filtered(EventFilter::new().types(vec!["paper_finalized"]));

    assert_eq!(h.engine.request_work(1).unwrap(), vec![1]);
    let assignment = held(&h, 1, 1);
    let result = h.engine.submit(1, 1, &assignment.id, &[7, 8]).unwrap();

    assert!(result.finalized);
    assert_eq!(result.final_score, Some(15));
    let stored = paper(&h, 1);
    assert_eq!(stored.status, PaperStatus::Final);
    assert_eq!(stored.final_item_scores, Some(vec![7, 8]));
    assert_eq!(stored.in_flight, 0);
    assert_eq!(finals.drain().len(), 1);
}

#[test]
fn test_invalid_payload_leaves_assignment_live() {
    let h = double_blind();
    h.engine.request_work(1).unwrap();
    let assignment = held(&h, 1, 1);

    assert!(matches!(
        h.engine.submit(1, 1, &assignment.id, &[21]),
        Err(EngineError::InvalidScorePayload(_))
    ));
    assert!(matches!(
        h.engine.submit(1, 1, &assignment.id, &[5, 5]),
        Err(EngineError::InvalidScorePayload(_))
    ));
    assert!(h.store.get_assignment(&assignment.id).unwrap().is_some());
}

#[test]
fn test_second_grader_waits_for_first_mark() {
    let h = double_blind();
    assert_eq!(h.engine.request_work(1).unwrap(), vec![1]);
    assert!(h.engine.request_work(2).unwrap().is_empty());

    let assignment = held(&h, 1, 1);
    let result = h.engine.submit(1, 1, &assignment.id, &[10]).unwrap();
    assert_eq!(result.disposition, Disposition::AwaitingSecondMark);
    assert!(!result.finalized);

    // The first examiner never sees the paper again.
    assert!(h.engine.request_work(1).unwrap().is_empty());
    assert_eq!(h.engine.request_work(2).unwrap(), vec![1]);
    assert_eq!(held(&h, 2, 1).kind, TaskKind::SecondRound);
}

#[test]
fn test_within_tolerance_finalizes_with_rounded_average() {
    let h = double_blind();
    mark(&h, 1, 1, 10);
    let result = mark(&h, 2, 1, 13);

    assert_eq!(result.disposition, Disposition::Finalized);
    assert_eq!(result.final_score, Some(12));
    assert!(h
        .store
        .find_assignments(&AssignmentFilter::new().kinds(vec![TaskKind::Arbitration]))
        .unwrap()
        .is_empty());
}

#[test]
fn test_disagreement_requests_one_arbitration() {
    let h = double_blind();
    mark(&h, 1, 1, 10);
    let result = mark(&h, 2, 1, 18);

    assert_eq!(
        result.disposition,
        Disposition::ArbitrationRequested { arbiter_id: 3 }
    );
    let arbitrations = h
        .store
        .find_assignments(&AssignmentFilter::new().paper(1).kinds(vec![TaskKind::Arbitration]))
        .unwrap();
    assert_eq!(arbitrations.len(), 1);
    assert_eq!(arbitrations[0].grader_id, Some(3));

    // Third mark sides with the second: (18 + 16) / 2
    let result = mark(&h, 3, 1, 16);
    assert!(result.finalized);
    assert_eq!(result.final_score, Some(17));
}

#[test]
fn test_unresolved_arbitration_goes_to_leader() {
    let h = double_blind();
    mark(&h, 1, 1, 0);
    mark(&h, 2, 1, 20);
    let result = mark(&h, 3, 1, 10);

    assert_eq!(
        result.disposition,
        Disposition::Escalated {
            cause: EscalationCause::Dispute
        }
    );
    assert_eq!(paper(&h, 1).status, PaperStatus::NeedsLeader);

    let queue = h.engine.leader_queue(None).unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(
        queue[0].kind,
        TaskKind::LeaderEscalation {
            cause: EscalationCause::Dispute
        }
    );

    // Examiners cannot take desk work.
    assert!(matches!(
        h.engine.submit(1, 1, &queue[0].id, &[14]),
        Err(EngineError::NotAssignee { .. })
    ));

    let result = h.engine.submit(LEADER, 1, &queue[0].id, &[14]).unwrap();
    assert!(result.finalized);
    assert_eq!(result.final_score, Some(14));
    assert!(h.engine.leader_queue(None).unwrap().is_empty());
    assert_eq!(paper(&h, 1).leader.map(|m| m.score), Some(14));
}

#[test]
fn test_no_eligible_arbiter_escalates() {
    let h = harness_with(
        essay(ScoringMode::DoubleBlind),
        vec![
            GraderProfile::examiner(1, TOPIC),
            GraderProfile::examiner(2, TOPIC),
            GraderProfile::leader(LEADER, TOPIC),
        ],
        1,
        EngineConfig::default(),
    );
    mark(&h, 1, 1, 2);
    let result = mark(&h, 2, 1, 19);

    assert_eq!(
        result.disposition,
        Disposition::Escalated {
            cause: EscalationCause::Dispute
        }
    );
    assert_eq!(h.engine.leader_queue(None).unwrap().len(), 1);
}

#[test]
fn test_reclaimed_assignment_is_consumed() {
    let h = double_blind();
    h.engine.request_work(1).unwrap();
    let assignment = held(&h, 1, 1);

    let stats = h
        .engine
        .reclaimer()
        .sweep(Utc::now() + Duration::hours(1))
        .unwrap();
    assert_eq!(stats.reclaimed, 1);

    let before = paper(&h, 1);
    assert_eq!(before.in_flight, 0);
    assert!(matches!(
        h.engine.submit(1, 1, &assignment.id, &[10]),
        Err(EngineError::AssignmentAlreadyConsumed(id)) if id == assignment.id
    ));
    assert_eq!(paper(&h, 1), before);

    // The paper is free for anyone again.
    assert_eq!(h.engine.request_work(2).unwrap(), vec![1]);
}

#[test]
fn test_double_submit_is_rejected() {
    let h = double_blind();
    h.engine.request_work(1).unwrap();
    let assignment = held(&h, 1, 1);
    h.engine.submit(1, 1, &assignment.id, &[10]).unwrap();

    let before = paper(&h, 1);
    assert!(matches!(
        h.engine.submit(1, 1, &assignment.id, &[12]),
        Err(EngineError::AssignmentAlreadyConsumed(_))
    ));
    assert_eq!(paper(&h, 1), before);
    assert_eq!(h.store.records_for_paper(1).unwrap().len(), 1);
}

#[test]
fn test_unknown_assignment_and_grader() {
    let h = double_blind();
    assert!(matches!(
        h.engine.submit(1, 1, "missing", &[10]),
        Err(EngineError::NotFound(NotFoundKind::Assignment))
    ));
    assert!(matches!(
        h.engine.request_work(42),
        Err(EngineError::NotFound(NotFoundKind::Grader))
    ));
}

#[test]
fn test_problem_reports_are_deduplicated() {
    let h = double_blind();
    h.engine.request_work(1).unwrap();
    let assignment = held(&h, 1, 1);

    let report = h
        .engine
        .report_problem(1, 1, &assignment.id, "blank_page", "page two is empty")
        .unwrap();
    assert!(!report.duplicate);
    assert!(report.hold_assignment_id.is_some());

    let flagged = paper(&h, 1);
    assert_eq!(flagged.status, PaperStatus::FlaggedProblem);
    assert_eq!(flagged.in_flight, 0);
    assert_eq!(
        h.store.get_retired(&assignment.id).unwrap().unwrap().reason,
        RetireReason::ProblemReported
    );

    // The leader opens the paper directly and hits the same problem.
    let review = h.engine.open_leader_review(LEADER, 1).unwrap();
    let report = h
        .engine
        .report_problem(LEADER, 1, &review.id, "blank_page", "nothing on page two")
        .unwrap();
    assert!(report.duplicate);
    assert!(report.hold_assignment_id.is_none());

    let holds = h
        .engine
        .leader_queue(Some(vec![TaskKind::ProblemHold]))
        .unwrap();
    assert_eq!(holds.len(), 1);
    assert_eq!(
        holds[0].problem.as_ref().map(|p| p.problem_type.as_str()),
        Some("blank_page")
    );

    let result = h.engine.submit(LEADER, 1, &holds[0].id, &[0]).unwrap();
    assert!(result.finalized);
    assert_eq!(result.final_score, Some(0));
}

#[test]
fn test_training_problem_report_leaves_paper_alone() {
    let h = harness_with(
        essay(ScoringMode::Single),
        vec![
            GraderProfile::examiner(1, TOPIC).training(),
            GraderProfile::examiner(2, TOPIC),
        ],
        1,
        EngineConfig::default(),
    );
    assert_eq!(h.engine.request_work(1).unwrap(), vec![1]);
    let practice = held(&h, 1, 1);
    let before = paper(&h, 1);

    let report = h
        .engine
        .report_problem(1, 1, &practice.id, "blank_page", "page two is empty")
        .unwrap();
    assert!(!report.duplicate);
    assert!(report.hold_assignment_id.is_none());

    assert_eq!(paper(&h, 1), before);
    assert!(h.engine.leader_queue(None).unwrap().is_empty());
    assert_eq!(
        h.store.get_retired(&practice.id).unwrap().unwrap().reason,
        RetireReason::ProblemReported
    );
    let records = h.store.records_for_paper(1).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].problem_type.as_deref(), Some("blank_page"));

    let result = mark(&h, 2, 1, 9);
    assert_eq!(result.final_score, Some(9));
}

#[test]
fn test_calibration_problem_report_keeps_example_paper() {
    let h = harness_with(
        essay(ScoringMode::DoubleBlind),
        vec![
            GraderProfile::examiner(5, TOPIC).unqualified(),
            GraderProfile::leader(LEADER, TOPIC),
        ],
        0,
        EngineConfig::default(),
    );
    let example = Paper::new(1, TOPIC).as_example();
    h.store.put_paper(&example).unwrap();
    let calibration = Assignment::new(&example, Some(5), TaskKind::Calibration);
    h.store
        .commit(Commit::new().create(calibration.clone()))
        .unwrap();
    let before = paper(&h, 1);

    let report = h
        .engine
        .report_problem(5, 1, &calibration.id, "smudged", "second page unreadable")
        .unwrap();
    assert!(!report.duplicate);
    assert!(report.hold_assignment_id.is_none());

    let stored = paper(&h, 1);
    assert_eq!(stored, before);
    assert_eq!(stored.status, PaperStatus::Example);
    assert!(h
        .engine
        .leader_queue(Some(vec![TaskKind::ProblemHold]))
        .unwrap()
        .is_empty());
    assert!(h.store.get_assignment(&calibration.id).unwrap().is_none());
    assert_eq!(h.store.records_by_grader(5).unwrap().len(), 1);
}

#[test]
fn test_calibration_concern_survives_finalization() {
    let h = double_blind();
    let concern_kind = TaskKind::LeaderEscalation {
        cause: EscalationCause::CalibrationConcern,
    };
    mark(&h, 1, 1, 10);

    // Grader 1 re-grades their own paper while it waits for a second mark.
    let check = Assignment::new(&paper(&h, 1), Some(1), TaskKind::SelfCheck);
    h.store.commit(Commit::new().create(check.clone())).unwrap();
    let result = h.engine.submit(1, 1, &check.id, &[18]).unwrap();
    assert_eq!(
        result.disposition,
        Disposition::SelfChecked {
            within_tolerance: false
        }
    );
    let concerns = h.engine.leader_queue(Some(vec![concern_kind])).unwrap();
    assert_eq!(concerns.len(), 1);

    let result = mark(&h, 2, 1, 11);
    assert!(result.finalized);

    let after = h.engine.leader_queue(Some(vec![concern_kind])).unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, concerns[0].id);
    assert_eq!(after[0].subject_grader, Some(1));
    assert!(h.store.get_retired(&concerns[0].id).unwrap().is_none());

    let result = h.engine.submit(LEADER, 1, &after[0].id, &[12]).unwrap();
    assert_eq!(result.disposition, Disposition::Recorded);
    assert_eq!(paper(&h, 1).final_score, Some(11));
}

#[test]
fn test_revise_appends_by_default() {
    let h = double_blind();
    mark(&h, 1, 1, 10);

    let result = h.engine.revise(1, 1, &[12]).unwrap();
    assert_eq!(result.disposition, Disposition::Recorded);
    assert_eq!(paper(&h, 1).first.map(|m| m.score), Some(12));

    let records = h.store.records_for_paper(1).unwrap();
    assert_eq!(records.iter().map(|r| r.score).collect::<Vec<_>>(), vec![10, 12]);

    // Second examiner agrees with the revised mark.
    let result = mark(&h, 2, 1, 13);
    assert_eq!(result.final_score, Some(13));
    assert!(matches!(
        h.engine.revise(1, 1, &[20]),
        Err(EngineError::AlreadyFinalized(1))
    ));
}

#[test]
fn test_revise_corrects_in_place() {
    let config = EngineConfig {
        record_policy: RecordPolicy::CorrectInPlace,
        ..EngineConfig::default()
    };
    let h = harness_with(
        essay(ScoringMode::DoubleBlind),
        vec![
            GraderProfile::examiner(1, TOPIC),
            GraderProfile::examiner(2, TOPIC),
        ],
        1,
        config,
    );
    mark(&h, 1, 1, 10);
    h.engine.revise(1, 1, &[11]).unwrap();

    let records = h.store.records_for_paper(1).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].score, 11);
}

#[test]
fn test_revise_requires_latest_mark() {
    let h = double_blind();
    mark(&h, 1, 1, 10);
    mark(&h, 2, 1, 18);

    // Arbitration is open, so neither examiner may move their mark.
    assert!(matches!(
        h.engine.revise(2, 1, &[12]),
        Err(EngineError::RoundOutOfOrder { paper_id: 1, .. })
    ));
    assert!(matches!(
        h.engine.revise(1, 1, &[12]),
        Err(EngineError::RoundOutOfOrder { .. })
    ));
}

#[test]
fn test_leader_review_supersedes_outstanding_work() {
    let h = double_blind();
    h.engine.request_work(1).unwrap();
    let examiner_task = held(&h, 1, 1);

    assert!(matches!(
        h.engine.open_leader_review(2, 1),
        Err(EngineError::NotLeader(2))
    ));

    let review = h.engine.open_leader_review(LEADER, 1).unwrap();
    assert_eq!(review.kind, TaskKind::LeaderDirect);
    assert_eq!(review.grader_id, Some(LEADER));
    assert_eq!(h.engine.open_leader_review(LEADER, 1).unwrap().id, review.id);
    // Addressed work never shows in the shared queue.
    assert!(h.engine.leader_queue(None).unwrap().is_empty());

    let result = h.engine.submit(LEADER, 1, &review.id, &[15]).unwrap();
    assert_eq!(result.final_score, Some(15));

    let stored = paper(&h, 1);
    assert_eq!(stored.in_flight, 0);
    assert_eq!(
        h.store.get_retired(&examiner_task.id).unwrap().unwrap().reason,
        RetireReason::Superseded
    );
    assert!(matches!(
        h.engine.submit(1, 1, &examiner_task.id, &[10]),
        Err(EngineError::AssignmentAlreadyConsumed(_))
    ));
    assert!(matches!(
        h.engine.open_leader_review(LEADER, 1),
        Err(EngineError::AlreadyFinalized(1))
    ));
}

#[test]
fn test_training_does_not_claim_papers() {
    let h = harness_with(
        essay(ScoringMode::Single),
        vec![
            GraderProfile::examiner(1, TOPIC).training(),
            GraderProfile::examiner(2, TOPIC),
        ],
        1,
        EngineConfig::default(),
    );
    assert_eq!(h.engine.request_work(1).unwrap(), vec![1]);
    assert_eq!(paper(&h, 1).in_flight, 0);

    let practice = held(&h, 1, 1);
    assert_eq!(practice.kind, TaskKind::Training);
    let result = h.engine.submit(1, 1, &practice.id, &[18]).unwrap();
    assert_eq!(result.disposition, Disposition::Recorded);
    assert!(!paper(&h, 1).is_final());

    let result = mark(&h, 2, 1, 9);
    assert_eq!(result.final_score, Some(9));
}

#[test]
fn test_remove_paper() {
    let h = double_blind();
    h.engine.request_work(1).unwrap();
    h.store.put_paper(&Paper::new(2, TOPIC)).unwrap();

    assert!(matches!(
        h.engine.remove_paper(1),
        Err(EngineError::PaperHasScores(1))
    ));
    h.engine.remove_paper(2).unwrap();
    assert!(h.store.get_paper(2).unwrap().is_none());
    assert!(matches!(
        h.engine.remove_paper(2),
        Err(EngineError::NotFound(NotFoundKind::Paper))
    ));
}

#[test]
fn test_grader_stats_count_production_only() {
    let h = harness_with(
        essay(ScoringMode::Single),
        vec![GraderProfile::examiner(1, TOPIC)],
        3,
        EngineConfig::default(),
    );
    let papers = h.engine.request_work(1).unwrap();
    assert_eq!(papers.len(), 3);
    for (paper_id, score) in papers.iter().zip([8, 10, 12]) {
        let assignment = held(&h, 1, *paper_id);
        h.engine.submit(1, *paper_id, &assignment.id, &[score]).unwrap();
    }

    let stats = h.engine.grader_stats(1, TOPIC).unwrap();
    assert_eq!(stats.count, 3);
    assert!((stats.average - 10.0).abs() < 1e-9);
    assert!(stats.std_dev > 1.6 && stats.std_dev < 1.7);
}
