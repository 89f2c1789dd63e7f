//! RocksDB-backed paper store
//!
//! Provides persistent storage with column families for logical data separation.
//! Uses bincode for efficient binary serialization internally.
//!
//! Reads share the lock; [`PaperStore::commit`] takes it exclusively, checks
//! the commit's preconditions and applies everything in one `WriteBatch`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};

use super::repository::*;
use super::schema::{self, keys, ALL_CFS};
use super::types::*;

/// Shared reference to StateStore
pub type SharedStateStore = Arc<StateStore>;

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| StoreError::Deserialization(e.to_string()))
}

/// RocksDB-backed persistent paper store
pub struct StateStore {
    db: RwLock<DB>,
    path: PathBuf,
}

impl StateStore {
    /// Open or create a paper store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedStateStore {
        Arc::new(self)
    }

    /// Get the database path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    // =========================================================================
    // Generic operations
    // =========================================================================

    fn put<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        db.put_cf(&cf, key.as_bytes(), encode(value)?)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        Self::get_in(&db, cf_name, key)
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str, prefix: &str) -> StoreResult<Vec<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        Self::scan_in(&db, cf_name, prefix)
    }

    fn get_in<T: DeserializeOwned>(db: &DB, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        match db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Decode every value whose key starts with `prefix`, in key order
    fn scan_in<T: DeserializeOwned>(db: &DB, cf_name: &str, prefix: &str) -> StoreResult<Vec<T>> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let mut values = Vec::new();
        for result in db.prefix_iterator_cf(&cf, prefix.as_bytes()) {
            let (key, value) = result?;
            if !key.starts_with(prefix.as_bytes()) {
                break; // Prefix no longer matches
            }
            values.push(decode(&value)?);
        }
        Ok(values)
    }

    fn validate(db: &DB, commit: &Commit) -> StoreResult<Vec<(Assignment, RetireReason)>> {
        let mut retiring = Vec::with_capacity(commit.retire.len());
        for (id, reason) in &commit.retire {
            let assignment: Assignment =
                Self::get_in(db, schema::CF_ASSIGNMENTS, &keys::assignment(id))?
                    .ok_or_else(|| StoreError::Conflict(Conflict::AssignmentRetired(id.clone())))?;
            retiring.push((assignment, *reason));
        }

        for write in &commit.papers {
            let stored: Paper = Self::get_in(db, schema::CF_PAPERS, &keys::paper(write.paper.id))?
                .ok_or(StoreError::Conflict(Conflict::PaperMissing(write.paper.id)))?;
            if stored.revision != write.expected_revision {
                return Err(StoreError::Conflict(Conflict::PaperChanged {
                    paper_id: write.paper.id,
                    expected: write.expected_revision,
                    found: stored.revision,
                }));
            }
        }

        if !commit.create.is_empty() {
            let touched = commit.created_papers();
            let live: Vec<Assignment> =
                Self::scan_in::<Assignment>(db, schema::CF_ASSIGNMENTS, keys::ASSIGNMENT_PREFIX)?
                    .into_iter()
                    .filter(|a| touched.contains(&a.paper_id))
                    .collect();
            commit.check_unique_pairs(&live)?;
        }

        for record in &commit.correct {
            let indexed: Option<String> =
                Self::get_in(db, schema::CF_RECORDS, &keys::record_index(&record.id))?;
            if indexed.is_none() {
                return Err(StoreError::Conflict(Conflict::RecordMissing(
                    record.id.clone(),
                )));
            }
        }

        if let Some((grader_id, expected, _)) = commit.self_check_cursor {
            let found: u64 =
                Self::get_in(db, schema::CF_GRADERS, &keys::self_check_cursor(grader_id))?
                    .unwrap_or(0);
            if found != expected {
                return Err(StoreError::Conflict(Conflict::CursorMoved {
                    grader_id,
                    expected,
                    found,
                }));
            }
        }

        Ok(retiring)
    }

    fn cf<'a>(db: &'a DB, cf_name: &str) -> StoreResult<&'a rocksdb::ColumnFamily> {
        db.cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))
    }
}

impl PaperStore for StateStore {
    fn put_topic(&self, topic: &Topic) -> StoreResult<()> {
        self.put(schema::CF_TOPICS, &keys::topic(topic.id), topic)
    }

    fn get_topic(&self, topic_id: TopicId) -> StoreResult<Option<Topic>> {
        self.get(schema::CF_TOPICS, &keys::topic(topic_id))
    }

    fn put_paper(&self, paper: &Paper) -> StoreResult<()> {
        let db = self.db.write().map_err(|_| StoreError::LockPoisoned)?;
        let key = keys::paper(paper.id);
        let mut paper = paper.clone();
        if let Some(existing) = Self::get_in::<Paper>(&db, schema::CF_PAPERS, &key)? {
            paper.revision = existing.revision + 1;
        }
        let cf = Self::cf(&db, schema::CF_PAPERS)?;
        db.put_cf(&cf, key.as_bytes(), encode(&paper)?)?;
        Ok(())
    }

    fn get_paper(&self, paper_id: PaperId) -> StoreResult<Option<Paper>> {
        self.get(schema::CF_PAPERS, &keys::paper(paper_id))
    }

    fn delete_paper(&self, paper_id: PaperId, expected_revision: u64) -> StoreResult<()> {
        let db = self.db.write().map_err(|_| StoreError::LockPoisoned)?;
        let stored: Paper = Self::get_in(&db, schema::CF_PAPERS, &keys::paper(paper_id))?
            .ok_or(StoreError::Conflict(Conflict::PaperMissing(paper_id)))?;
        if stored.revision != expected_revision {
            return Err(StoreError::Conflict(Conflict::PaperChanged {
                paper_id,
                expected: expected_revision,
                found: stored.revision,
            }));
        }

        let mut batch = WriteBatch::default();
        batch.delete_cf(Self::cf(&db, schema::CF_PAPERS)?, keys::paper(paper_id));

        let assignments_cf = Self::cf(&db, schema::CF_ASSIGNMENTS)?;
        for assignment in
            Self::scan_in::<Assignment>(&db, schema::CF_ASSIGNMENTS, keys::ASSIGNMENT_PREFIX)?
        {
            if assignment.paper_id == paper_id {
                batch.delete_cf(assignments_cf, keys::assignment(&assignment.id));
            }
        }

        db.write(batch)?;
        Ok(())
    }

    fn list_papers(&self, topic_id: TopicId) -> StoreResult<Vec<Paper>> {
        Ok(self
            .scan::<Paper>(schema::CF_PAPERS, keys::PAPER_PREFIX)?
            .into_iter()
            .filter(|p| p.topic_id == topic_id)
            .collect())
    }

    fn get_assignment(&self, assignment_id: &str) -> StoreResult<Option<Assignment>> {
        self.get(schema::CF_ASSIGNMENTS, &keys::assignment(assignment_id))
    }

    fn get_retired(&self, assignment_id: &str) -> StoreResult<Option<RetiredAssignment>> {
        self.get(schema::CF_RETIRED, &keys::retired(assignment_id))
    }

    fn find_assignments(&self, filter: &AssignmentFilter) -> StoreResult<Vec<Assignment>> {
        let mut found: Vec<Assignment> = self
            .scan::<Assignment>(schema::CF_ASSIGNMENTS, keys::ASSIGNMENT_PREFIX)?
            .into_iter()
            .filter(|a| filter.matches(a))
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    fn records_by_grader(&self, grader_id: GraderId) -> StoreResult<Vec<ScoreRecord>> {
        self.scan(schema::CF_RECORDS, &keys::grader_records(grader_id))
    }

    fn records_for_paper(&self, paper_id: PaperId) -> StoreResult<Vec<ScoreRecord>> {
        let mut records: Vec<ScoreRecord> = self
            .scan::<ScoreRecord>(schema::CF_RECORDS, keys::RECORD_PREFIX)?
            .into_iter()
            .filter(|r| r.paper_id == paper_id)
            .collect();
        records.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(records)
    }

    fn put_cohort(&self, cohort: &TrainingCohort) -> StoreResult<()> {
        self.put(schema::CF_COHORTS, &keys::cohort(cohort.id), cohort)
    }

    fn next_cohort_after(&self, after: Option<CohortId>) -> StoreResult<Option<TrainingCohort>> {
        Ok(self
            .scan::<TrainingCohort>(schema::CF_COHORTS, keys::COHORT_PREFIX)?
            .into_iter()
            .find(|c| after.map_or(true, |after| c.id > after)))
    }

    fn cohort_progress(&self, grader_id: GraderId) -> StoreResult<CohortProgress> {
        Ok(self
            .get(schema::CF_GRADERS, &keys::cohort_progress(grader_id))?
            .unwrap_or_default())
    }

    fn self_check_cursor(&self, grader_id: GraderId) -> StoreResult<u64> {
        Ok(self
            .get(schema::CF_GRADERS, &keys::self_check_cursor(grader_id))?
            .unwrap_or(0))
    }

    fn commit(&self, commit: Commit) -> StoreResult<()> {
        let db = self.db.write().map_err(|_| StoreError::LockPoisoned)?;
        let retiring = Self::validate(&db, &commit)?;

        let papers_cf = Self::cf(&db, schema::CF_PAPERS)?;
        let assignments_cf = Self::cf(&db, schema::CF_ASSIGNMENTS)?;
        let retired_cf = Self::cf(&db, schema::CF_RETIRED)?;
        let records_cf = Self::cf(&db, schema::CF_RECORDS)?;
        let graders_cf = Self::cf(&db, schema::CF_GRADERS)?;

        let now = Utc::now();
        let mut batch = WriteBatch::default();

        for write in commit.papers {
            let mut paper = write.paper;
            paper.revision = write.expected_revision + 1;
            batch.put_cf(papers_cf, keys::paper(paper.id), encode(&paper)?);
        }

        let mut retired_ids = HashSet::new();
        for (assignment, reason) in retiring {
            batch.delete_cf(assignments_cf, keys::assignment(&assignment.id));
            retired_ids.insert(assignment.id.clone());
            let tombstone = RetiredAssignment {
                assignment,
                reason,
                retired_at: now,
            };
            batch.put_cf(
                retired_cf,
                keys::retired(&tombstone.assignment.id),
                encode(&tombstone)?,
            );
        }

        for assignment in commit.create {
            batch.put_cf(
                assignments_cf,
                keys::assignment(&assignment.id),
                encode(&assignment)?,
            );
        }

        for record in commit.append {
            let nanos = record.recorded_at.timestamp_nanos_opt().unwrap_or(0);
            let key = keys::record(record.grader_id, nanos, &record.id);
            batch.put_cf(records_cf, keys::record_index(&record.id), encode(&key)?);
            batch.put_cf(records_cf, key, encode(&record)?);
        }

        for record in commit.correct {
            let key: Option<String> =
                Self::get_in(&db, schema::CF_RECORDS, &keys::record_index(&record.id))?;
            if let Some(key) = key {
                batch.put_cf(records_cf, key, encode(&record)?);
            }
        }

        if let Some((grader_id, progress)) = commit.cohort_progress {
            batch.put_cf(
                graders_cf,
                keys::cohort_progress(grader_id),
                encode(&progress)?,
            );
        }
        if let Some((grader_id, _, windows)) = commit.self_check_cursor {
            batch.put_cf(
                graders_cf,
                keys::self_check_cursor(grader_id),
                encode(&windows)?,
            );
        }

        db.write(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_store() -> (StateStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().join("test.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_topic_and_paper_crud() {
        let (store, _dir) = test_store();

        let topic = Topic::new(1, "Essay", ScoringMode::DoubleBlind, 20, 3);
        store.put_topic(&topic).unwrap();
        store.put_paper(&Paper::new(10, 1)).unwrap();
        store.put_paper(&Paper::new(11, 1)).unwrap();
        store.put_paper(&Paper::new(12, 2)).unwrap();

        assert_eq!(store.get_topic(1).unwrap().unwrap(), topic);
        let papers = store.list_papers(1).unwrap();
        assert_eq!(papers.iter().map(|p| p.id).collect::<Vec<_>>(), vec![10, 11]);
    }

    #[test]
    fn test_commit_round_trip() {
        let (store, _dir) = test_store();
        store.put_paper(&Paper::new(10, 1)).unwrap();

        let mut paper = store.get_paper(10).unwrap().unwrap();
        let assignment = Assignment::new(&paper, Some(5), TaskKind::FirstRound);
        let id = assignment.id.clone();
        paper.in_flight = 1;

        store
            .commit(Commit::new().write_paper(paper).create(assignment))
            .unwrap();

        let stored = store.get_paper(10).unwrap().unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(
            store
                .find_assignments(&AssignmentFilter::new().grader(5))
                .unwrap()
                .len(),
            1
        );

        let record = ScoreRecord::new(5, &stored, 9, TaskKind::FirstRound, false);
        store
            .commit(
                Commit::new()
                    .retire(id.clone(), RetireReason::Submitted)
                    .append(record),
            )
            .unwrap();

        assert!(store.get_assignment(&id).unwrap().is_none());
        assert!(store.get_retired(&id).unwrap().is_some());
        assert_eq!(store.records_by_grader(5).unwrap()[0].score, 9);
        assert_eq!(store.records_for_paper(10).unwrap().len(), 1);
    }

    #[test]
    fn test_stale_commit_rejected() {
        let (store, _dir) = test_store();
        store.put_paper(&Paper::new(10, 1)).unwrap();
        let stale = store.get_paper(10).unwrap().unwrap();

        store
            .commit(Commit::new().write_paper(stale.clone()))
            .unwrap();
        let result = store.commit(Commit::new().write_paper(stale));

        assert!(matches!(
            result,
            Err(StoreError::Conflict(Conflict::PaperChanged { .. }))
        ));
    }

    #[test]
    fn test_correct_record_in_place() {
        let (store, _dir) = test_store();
        store.put_paper(&Paper::new(10, 1)).unwrap();
        let paper = store.get_paper(10).unwrap().unwrap();

        let record = ScoreRecord::new(5, &paper, 9, TaskKind::FirstRound, false);
        store.commit(Commit::new().append(record.clone())).unwrap();

        let mut corrected = record;
        corrected.score = 11;
        store.commit(Commit::new().correct(corrected)).unwrap();

        let records = store.records_by_grader(5).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].score, 11);
    }

    #[test]
    fn test_grader_cursors_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let store = StateStore::open(&path).unwrap();
            let progress = CohortProgress {
                current: Some(2),
                last_completed: Some(1),
            };
            store
                .commit(
                    Commit::new()
                        .cohort_progress(5, progress)
                        .self_check_cursor(5, 0, 3),
                )
                .unwrap();
        }

        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.cohort_progress(5).unwrap().last_completed, Some(1));
        assert_eq!(store.self_check_cursor(5).unwrap(), 3);
        assert_eq!(store.self_check_cursor(6).unwrap(), 0);
    }

    #[test]
    fn test_stale_cursor_rejected() {
        let (store, _dir) = test_store();
        store.commit(Commit::new().self_check_cursor(5, 0, 1)).unwrap();

        let result = store.commit(Commit::new().self_check_cursor(5, 0, 1));
        assert!(matches!(
            result,
            Err(StoreError::Conflict(Conflict::CursorMoved { found: 1, .. }))
        ));
        store.commit(Commit::new().self_check_cursor(5, 1, 2)).unwrap();
        assert_eq!(store.self_check_cursor(5).unwrap(), 2);
    }
}
