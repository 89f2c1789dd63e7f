//! Read-only reports over the score record trail

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::state::{GraderId, PaperId, ScoreRecord, SharedPaperStore, TaskKind, Topic, TopicId};

/// A grader's production records with revisions folded in
///
/// Each (paper, kind) appears once, at the position of its first record and
/// carrying the score of its last.
pub(crate) fn production_marks(records: Vec<ScoreRecord>) -> Vec<ScoreRecord> {
    let mut index: HashMap<(PaperId, TaskKind), usize> = HashMap::new();
    let mut marks: Vec<ScoreRecord> = Vec::new();
    for record in records.into_iter().filter(|r| r.kind.is_production()) {
        match index.get(&(record.paper_id, record.kind)) {
            Some(&at) => marks[at].score = record.score,
            None => {
                index.insert((record.paper_id, record.kind), marks.len());
                marks.push(record);
            }
        }
    }
    marks
}

/// One self re-grade compared with the original mark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfCheckEntry {
    pub paper_id: PaperId,
    pub topic_id: TopicId,
    pub original_score: i64,
    pub self_score: i64,
    pub error: i64,
    pub within_tolerance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfCheckReport {
    pub grader_id: GraderId,
    pub entries: Vec<SelfCheckEntry>,
}

impl SelfCheckReport {
    pub fn drifted(&self) -> usize {
        self.entries.iter().filter(|e| !e.within_tolerance).count()
    }
}

/// Score distribution of a grader's production marks on one topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraderStats {
    pub grader_id: GraderId,
    pub topic_id: TopicId,
    pub count: usize,
    pub average: f64,
    /// Population standard deviation
    pub std_dev: f64,
}

pub struct StatsReporter {
    store: SharedPaperStore,
}

impl StatsReporter {
    pub fn new(store: SharedPaperStore) -> Self {
        Self { store }
    }

    /// Every paper the grader has self-checked, in submission order
    pub fn self_check_report(&self, grader_id: GraderId) -> EngineResult<SelfCheckReport> {
        let mut topics: HashMap<TopicId, Option<Topic>> = HashMap::new();
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for record in self.store.records_by_grader(grader_id)? {
            if record.kind != TaskKind::SelfCheck || !seen.insert(record.paper_id) {
                continue;
            }
            let Some(paper) = self.store.get_paper(record.paper_id)? else {
                continue;
            };
            let Some(mark) = paper.slot_of(grader_id).and_then(|slot| paper.mark(slot)) else {
                continue;
            };
            let Some(self_score) = mark.self_score else {
                continue;
            };

            let topic = match topics.get(&paper.topic_id) {
                Some(topic) => topic.clone(),
                None => {
                    let topic = self.store.get_topic(paper.topic_id)?;
                    topics.insert(paper.topic_id, topic.clone());
                    topic
                }
            };
            let error = (mark.score - self_score).abs();
            let within_tolerance = topic.map_or(true, |t| t.within_tolerance(mark.score, self_score));

            entries.push(SelfCheckEntry {
                paper_id: paper.id,
                topic_id: paper.topic_id,
                original_score: mark.score,
                self_score,
                error,
                within_tolerance,
            });
        }

        Ok(SelfCheckReport { grader_id, entries })
    }

    /// Count, mean and spread of the grader's production scores on a topic
    pub fn grader_stats(&self, grader_id: GraderId, topic_id: TopicId) -> EngineResult<GraderStats> {
        let scores: Vec<f64> = production_marks(self.store.records_by_grader(grader_id)?)
            .into_iter()
            .filter(|r| r.topic_id == topic_id)
            .map(|r| r.score as f64)
            .collect();

        let count = scores.len();
        let (average, std_dev) = if count == 0 {
            (0.0, 0.0)
        } else {
            let mean = scores.iter().sum::<f64>() / count as f64;
            let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / count as f64;
            (mean, variance.sqrt())
        };

        Ok(GraderStats {
            grader_id,
            topic_id,
            count,
            average,
            std_dev,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        Commit, ExaminerMark, MemoryStore, Paper, PaperStore, ScoreRecord, ScoringMode,
    };

    fn append(store: &MemoryStore, grader_id: GraderId, paper: &Paper, score: i64, kind: TaskKind) {
        let record = ScoreRecord::new(grader_id, paper, score, kind, false);
        store.commit(Commit::new().append(record)).unwrap();
    }

    #[test]
    fn test_grader_stats_population_std_dev() {
        let store = MemoryStore::new().shared();
        for (id, score) in [2, 4, 4, 4, 5, 5, 7, 9].into_iter().enumerate() {
            append(&store, 3, &Paper::new(id as i64, 1), score, TaskKind::FirstRound);
        }
        let paper = Paper::new(0, 1);
        append(&store, 3, &paper, 100, TaskKind::Training);
        append(&store, 3, &paper, 100, TaskKind::SelfCheck);

        let stats = StatsReporter::new(store).grader_stats(3, 1).unwrap();
        assert_eq!(stats.count, 8);
        assert!((stats.average - 5.0).abs() < f64::EPSILON);
        assert!((stats.std_dev - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_grader_stats_counts_revised_mark_once() {
        let store = MemoryStore::new().shared();
        let paper = Paper::new(1, 1);
        append(&store, 3, &paper, 8, TaskKind::FirstRound);
        append(&store, 3, &Paper::new(2, 1), 4, TaskKind::FirstRound);
        append(&store, 3, &paper, 12, TaskKind::FirstRound);

        let stats = StatsReporter::new(store).grader_stats(3, 1).unwrap();
        assert_eq!(stats.count, 2);
        assert!((stats.average - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_production_marks_keep_first_position() {
        let first = Paper::new(1, 1);
        let second = Paper::new(2, 1);
        let records = vec![
            ScoreRecord::new(3, &first, 8, TaskKind::FirstRound, false),
            ScoreRecord::new(3, &second, 4, TaskKind::SecondRound, false),
            ScoreRecord::new(3, &first, 0, TaskKind::Training, false),
            ScoreRecord::new(3, &first, 12, TaskKind::FirstRound, false),
        ];

        let marks = production_marks(records);
        assert_eq!(marks.len(), 2);
        assert_eq!((marks[0].paper_id, marks[0].score), (1, 12));
        assert_eq!((marks[1].paper_id, marks[1].score), (2, 4));
    }

    #[test]
    fn test_grader_stats_empty() {
        let store = MemoryStore::new().shared();
        let stats = StatsReporter::new(store).grader_stats(3, 1).unwrap();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.average, 0.0);
    }

    #[test]
    fn test_self_check_report() {
        let store = MemoryStore::new().shared();
        store
            .put_topic(&Topic::new(1, "Essay", ScoringMode::Single, 20, 2))
            .unwrap();

        let mut close = Paper::new(1, 1);
        let mut mark = ExaminerMark::new(3, vec![10]);
        mark.self_score = Some(11);
        close.first = Some(mark);

        let mut far = Paper::new(2, 1);
        let mut mark = ExaminerMark::new(3, vec![10]);
        mark.self_score = Some(15);
        far.first = Some(mark);

        for paper in [&close, &far] {
            store.put_paper(paper).unwrap();
            append(&store, 3, paper, 0, TaskKind::SelfCheck);
        }

        let report = StatsReporter::new(store).self_check_report(3).unwrap();
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[0].error, 1);
        assert!(report.entries[0].within_tolerance);
        assert_eq!(report.entries[1].error, 5);
        assert_eq!(report.drifted(), 1);
    }
}
