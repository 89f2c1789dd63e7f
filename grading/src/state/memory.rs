//! In-process paper store
//!
//! Default backend for tests and for the binary when no `--state-path` is
//! given. All tables live behind one `RwLock`, so a commit is validated and
//! applied while holding the write guard.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::Utc;

use super::repository::*;
use super::types::*;

#[derive(Default)]
struct Tables {
    topics: BTreeMap<TopicId, Topic>,
    papers: BTreeMap<PaperId, Paper>,
    assignments: HashMap<AssignmentId, Assignment>,
    retired: HashMap<AssignmentId, RetiredAssignment>,
    records: Vec<ScoreRecord>,
    cohorts: BTreeMap<CohortId, TrainingCohort>,
    cohort_progress: HashMap<GraderId, CohortProgress>,
    self_check_cursors: HashMap<GraderId, u64>,
}

impl Tables {
    fn validate(&self, commit: &Commit) -> StoreResult<()> {
        for (id, _) in &commit.retire {
            if !self.assignments.contains_key(id) {
                return Err(StoreError::Conflict(Conflict::AssignmentRetired(id.clone())));
            }
        }

        for write in &commit.papers {
            let found = self
                .papers
                .get(&write.paper.id)
                .ok_or(StoreError::Conflict(Conflict::PaperMissing(write.paper.id)))?
                .revision;
            if found != write.expected_revision {
                return Err(StoreError::Conflict(Conflict::PaperChanged {
                    paper_id: write.paper.id,
                    expected: write.expected_revision,
                    found,
                }));
            }
        }

        if !commit.create.is_empty() {
            let touched = commit.created_papers();
            let live: Vec<Assignment> = self
                .assignments
                .values()
                .filter(|a| touched.contains(&a.paper_id))
                .cloned()
                .collect();
            commit.check_unique_pairs(&live)?;
        }

        for record in &commit.correct {
            if !self.records.iter().any(|r| r.id == record.id) {
                return Err(StoreError::Conflict(Conflict::RecordMissing(
                    record.id.clone(),
                )));
            }
        }

        if let Some((grader_id, expected, _)) = commit.self_check_cursor {
            let found = self.self_check_cursors.get(&grader_id).copied().unwrap_or(0);
            if found != expected {
                return Err(StoreError::Conflict(Conflict::CursorMoved {
                    grader_id,
                    expected,
                    found,
                }));
            }
        }

        Ok(())
    }

    fn apply(&mut self, commit: Commit) {
        let now = Utc::now();

        for write in commit.papers {
            let mut paper = write.paper;
            paper.revision = write.expected_revision + 1;
            self.papers.insert(paper.id, paper);
        }

        for (id, reason) in commit.retire {
            if let Some(assignment) = self.assignments.remove(&id) {
                self.retired.insert(
                    id,
                    RetiredAssignment {
                        assignment,
                        reason,
                        retired_at: now,
                    },
                );
            }
        }

        for assignment in commit.create {
            self.assignments.insert(assignment.id.clone(), assignment);
        }

        self.records.extend(commit.append);

        for record in commit.correct {
            if let Some(existing) = self.records.iter_mut().find(|r| r.id == record.id) {
                *existing = record;
            }
        }

        if let Some((grader_id, progress)) = commit.cohort_progress {
            self.cohort_progress.insert(grader_id, progress);
        }
        if let Some((grader_id, _, windows)) = commit.self_check_cursor {
            self.self_check_cursors.insert(grader_id, windows);
        }
    }
}

/// Shared reference to MemoryStore
pub type SharedMemoryStore = Arc<MemoryStore>;

/// Paper store held entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedMemoryStore {
        Arc::new(self)
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> StoreResult<T> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(f(&tables))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> StoreResult<T>) -> StoreResult<T> {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut tables)
    }
}

impl PaperStore for MemoryStore {
    fn put_topic(&self, topic: &Topic) -> StoreResult<()> {
        self.write(|t| {
            t.topics.insert(topic.id, topic.clone());
            Ok(())
        })
    }

    fn get_topic(&self, topic_id: TopicId) -> StoreResult<Option<Topic>> {
        self.read(|t| t.topics.get(&topic_id).cloned())
    }

    fn put_paper(&self, paper: &Paper) -> StoreResult<()> {
        self.write(|t| {
            let mut paper = paper.clone();
            if let Some(existing) = t.papers.get(&paper.id) {
                paper.revision = existing.revision + 1;
            }
            t.papers.insert(paper.id, paper);
            Ok(())
        })
    }

    fn get_paper(&self, paper_id: PaperId) -> StoreResult<Option<Paper>> {
        self.read(|t| t.papers.get(&paper_id).cloned())
    }

    fn delete_paper(&self, paper_id: PaperId, expected_revision: u64) -> StoreResult<()> {
        self.write(|t| {
            let found = t
                .papers
                .get(&paper_id)
                .ok_or(StoreError::Conflict(Conflict::PaperMissing(paper_id)))?
                .revision;
            if found != expected_revision {
                return Err(StoreError::Conflict(Conflict::PaperChanged {
                    paper_id,
                    expected: expected_revision,
                    found,
                }));
            }
            t.papers.remove(&paper_id);
            t.assignments.retain(|_, a| a.paper_id != paper_id);
            Ok(())
        })
    }

    fn list_papers(&self, topic_id: TopicId) -> StoreResult<Vec<Paper>> {
        self.read(|t| {
            t.papers
                .values()
                .filter(|p| p.topic_id == topic_id)
                .cloned()
                .collect()
        })
    }

    fn get_assignment(&self, assignment_id: &str) -> StoreResult<Option<Assignment>> {
        self.read(|t| t.assignments.get(assignment_id).cloned())
    }

    fn get_retired(&self, assignment_id: &str) -> StoreResult<Option<RetiredAssignment>> {
        self.read(|t| t.retired.get(assignment_id).cloned())
    }

    fn find_assignments(&self, filter: &AssignmentFilter) -> StoreResult<Vec<Assignment>> {
        self.read(|t| {
            let mut found: Vec<Assignment> = t
                .assignments
                .values()
                .filter(|a| filter.matches(a))
                .cloned()
                .collect();
            found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            found
        })
    }

    fn records_by_grader(&self, grader_id: GraderId) -> StoreResult<Vec<ScoreRecord>> {
        self.read(|t| {
            t.records
                .iter()
                .filter(|r| r.grader_id == grader_id)
                .cloned()
                .collect()
        })
    }

    fn records_for_paper(&self, paper_id: PaperId) -> StoreResult<Vec<ScoreRecord>> {
        self.read(|t| {
            t.records
                .iter()
                .filter(|r| r.paper_id == paper_id)
                .cloned()
                .collect()
        })
    }

    fn put_cohort(&self, cohort: &TrainingCohort) -> StoreResult<()> {
        self.write(|t| {
            t.cohorts.insert(cohort.id, cohort.clone());
            Ok(())
        })
    }

    fn next_cohort_after(&self, after: Option<CohortId>) -> StoreResult<Option<TrainingCohort>> {
        self.read(|t| {
            t.cohorts
                .values()
                .find(|c| after.map_or(true, |after| c.id > after))
                .cloned()
        })
    }

    fn cohort_progress(&self, grader_id: GraderId) -> StoreResult<CohortProgress> {
        self.read(|t| t.cohort_progress.get(&grader_id).copied().unwrap_or_default())
    }

    fn self_check_cursor(&self, grader_id: GraderId) -> StoreResult<u64> {
        self.read(|t| t.self_check_cursors.get(&grader_id).copied().unwrap_or(0))
    }

    fn commit(&self, commit: Commit) -> StoreResult<()> {
        self.write(|t| {
            t.validate(&commit)?;
            t.apply(commit);
            Ok(())
        })
    }
}
