//! Integration tests for self-score sampling
//!
//! A grader's hundredth production record closes a window; a share of that
//! window comes back to them for a blind re-grade.

use std::collections::HashSet;
use std::sync::Arc;

use grading::engine::Disposition;
use grading::events::{EventBusExt, EventFilter, GradingEvent};
use grading::identity::{GraderProfile, StaticDirectory};
use grading::random::SeededRandom;
use grading::state::{
    AssignmentFilter, EscalationCause, MemoryStore, Paper, PaperStore, ScoringMode, TaskKind,
    Topic,
};
use grading::{EngineConfig, GradingEngine};

const TOPIC: i64 = 1;
const GRADER: i64 = 4;
const LEADER: i64 = 9;

fn setup(rate: f64) -> (GradingEngine, Arc<MemoryStore>) {
    let store = MemoryStore::new().shared();
    store
        .put_topic(
            &Topic::new(TOPIC, "Essay", ScoringMode::Single, 20, 3).with_self_score_rate(rate),
        )
        .unwrap();
    for id in 1..=120 {
        store.put_paper(&Paper::new(id, TOPIC)).unwrap();
    }
    let directory = StaticDirectory::with_graders([
        GraderProfile::examiner(GRADER, TOPIC),
        GraderProfile::leader(LEADER, TOPIC),
    ])
    .shared();
    let engine = GradingEngine::with_random(
        store.clone(),
        directory,
        EngineConfig::default(),
        Arc::new(SeededRandom::new(5)),
    );
    (engine, store)
}

/// Mark `count` papers, ten per request
fn mark_papers(engine: &GradingEngine, count: usize) {
    let mut marked = 0;
    while marked < count {
        let papers = engine.request_work(GRADER).unwrap();
        assert_eq!(papers.len(), 10);
        for paper_id in papers {
            let assignment = engine.pending_assignment(GRADER, paper_id).unwrap().unwrap();
            assert_eq!(assignment.kind, TaskKind::FirstRound);
            engine
                .submit(GRADER, paper_id, &assignment.id, &[10])
                .unwrap();
            marked += 1;
        }
    }
}

fn self_checks(store: &MemoryStore) -> Vec<grading::state::Assignment> {
    store
        .find_assignments(
            &AssignmentFilter::new()
                .grader(GRADER)
                .kinds(vec![TaskKind::SelfCheck]),
        )
        .unwrap()
}

#[test]
fn test_no_sampling_before_window_closes() {
    let (engine, store) = setup(0.1);
    mark_papers(&engine, 90);
    assert!(self_checks(&store).is_empty());
}

#[test]
fn test_hundredth_record_schedules_rounded_share() {
    let (engine, store) = setup(0.1);
    let mut scheduled = engine
        .event_bus()
        .subscribe_filtered(EventFilter::new().types(vec!["self_check_scheduled"]));

    mark_papers(&engine, 100);

    let checks = self_checks(&store);
    assert_eq!(checks.len(), 10);
    let distinct: HashSet<_> = checks.iter().map(|a| a.paper_id).collect();
    assert_eq!(distinct.len(), 10);
    assert!(distinct.iter().all(|id| (1..=100).contains(id)));
    assert_eq!(store.self_check_cursor(GRADER).unwrap(), 1);

    let events = scheduled.drain();
    assert_eq!(events.len(), 1);
    match &events[0] {
        GradingEvent::SelfCheckScheduled {
            grader_id, window, ..
        } => {
            assert_eq!(*grader_id, GRADER);
            assert_eq!(*window, 1);
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Self-checks come back first on the next request.
    let mut replay = engine.request_work(GRADER).unwrap();
    replay.sort();
    let mut expected: Vec<_> = distinct.into_iter().collect();
    expected.sort();
    assert_eq!(replay, expected);
}

#[test]
fn test_drifting_self_checks_reach_the_leader() {
    let (engine, store) = setup(0.05);
    mark_papers(&engine, 100);

    let checks = self_checks(&store);
    assert_eq!(checks.len(), 5);

    for (i, check) in checks.iter().enumerate() {
        // Original marks were all 10; the last two drift past the tolerance of 3.
        let score = if i < 3 { 12 } else { 15 };
        let result = engine
            .submit(GRADER, check.paper_id, &check.id, &[score])
            .unwrap();
        assert_eq!(
            result.disposition,
            Disposition::SelfChecked {
                within_tolerance: i < 3
            }
        );
        assert!(!result.finalized);
    }
    assert!(self_checks(&store).is_empty());

    let report = engine.self_check_report(GRADER).unwrap();
    assert_eq!(report.entries.len(), 5);
    assert_eq!(report.drifted(), 2);

    let concerns = engine
        .leader_queue(Some(vec![TaskKind::LeaderEscalation {
            cause: EscalationCause::CalibrationConcern,
        }]))
        .unwrap();
    assert_eq!(concerns.len(), 2);
    assert!(concerns.iter().all(|a| a.subject_grader == Some(GRADER)));

    // A leader looking at a calibration concern does not move the final score.
    let result = engine
        .submit(LEADER, concerns[0].paper_id, &concerns[0].id, &[10])
        .unwrap();
    assert_eq!(result.disposition, Disposition::Recorded);
    assert_eq!(
        store
            .get_paper(concerns[0].paper_id)
            .unwrap()
            .unwrap()
            .final_score,
        Some(10)
    );

    // Self-checks and leader reviews never count towards the next window.
    assert_eq!(engine.grader_stats(GRADER, TOPIC).unwrap().count, 100);
}
