//! Assignment selector
//!
//! Decides which papers a grader sees next. Papers are claimed one at a time:
//! each claim bumps the paper's in-flight counter and creates the assignment in
//! the same commit, so two graders racing for a paper cannot both win it.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult, NotFoundKind};
use crate::events::{GradingEvent, SharedEventBus};
use crate::identity::{GraderProfile, SharedDirectory};
use crate::random::SharedRandom;
use crate::state::{
    Assignment, AssignmentFilter, Commit, CohortProgress, PaperId, PaperStatus, SharedPaperStore,
    StoreError, TaskKind, Topic,
};

/// Hands out papers to graders
pub struct AssignmentSelector {
    store: SharedPaperStore,
    directory: SharedDirectory,
    event_bus: SharedEventBus,
    random: SharedRandom,
    batch_size: usize,
    reclaim_after: Duration,
}

impl AssignmentSelector {
    pub fn new(
        store: SharedPaperStore,
        directory: SharedDirectory,
        event_bus: SharedEventBus,
        random: SharedRandom,
        batch_size: usize,
        reclaim_after: Duration,
    ) -> Self {
        Self {
            store,
            directory,
            event_bus,
            random,
            batch_size,
            reclaim_after,
        }
    }

    /// Papers the grader should work on now
    ///
    /// A grader with outstanding assignments gets those back and nothing new
    /// is created. Leaders draw from the leader desk instead and get an empty
    /// list here.
    pub fn request_work(&self, grader_id: i64) -> EngineResult<Vec<PaperId>> {
        let profile = self.directory.grader(grader_id)?;

        let held = self
            .store
            .find_assignments(&AssignmentFilter::new().grader(grader_id))?;
        if !held.is_empty() {
            let mut seen = HashSet::new();
            let papers: Vec<PaperId> = held
                .iter()
                .map(|a| a.paper_id)
                .filter(|id| seen.insert(*id))
                .collect();
            debug!(grader_id, held = papers.len(), "Returning outstanding work");
            return Ok(papers);
        }

        if profile.is_leader() {
            return Ok(Vec::new());
        }

        let topic_id = profile
            .topic_id
            .ok_or(EngineError::NotFound(NotFoundKind::GraderTopic))?;
        let topic = self
            .store
            .get_topic(topic_id)?
            .ok_or(EngineError::NotFound(NotFoundKind::Topic))?;

        if profile.in_training {
            self.assign_training(&profile, &topic)
        } else if !profile.qualified {
            self.assign_calibration(&profile)
        } else {
            self.assign_batch(&profile, &topic)
        }
    }

    /// One random paper still being graded, for practice
    fn assign_training(&self, profile: &GraderProfile, topic: &Topic) -> EngineResult<Vec<PaperId>> {
        let papers: Vec<_> = self
            .store
            .list_papers(topic.id)?
            .into_iter()
            .filter(|p| p.status == PaperStatus::Pending && !p.is_final())
            .collect();

        let Some(paper) = self.random.pick(papers.len()).map(|i| &papers[i]) else {
            debug!(grader_id = profile.id, topic_id = topic.id, "No paper for training");
            return Ok(Vec::new());
        };

        let assignment = Assignment::new(paper, Some(profile.id), TaskKind::Training);
        self.store.commit(Commit::new().create(assignment))?;

        info!(grader_id = profile.id, paper_id = paper.id, "Training paper assigned");
        self.announce(profile, topic.id, vec![paper.id], TaskKind::Training, None);
        Ok(vec![paper.id])
    }

    /// The next calibration cohort after the last completed one
    fn assign_calibration(&self, profile: &GraderProfile) -> EngineResult<Vec<PaperId>> {
        let progress = self.store.cohort_progress(profile.id)?;
        // No outstanding work means the current cohort is done.
        let last_completed = progress.current.or(progress.last_completed);

        let Some(cohort) = self.store.next_cohort_after(last_completed)? else {
            debug!(grader_id = profile.id, ?last_completed, "No calibration cohort left");
            if progress.current.is_some() {
                self.store.commit(Commit::new().cohort_progress(
                    profile.id,
                    CohortProgress {
                        current: None,
                        last_completed,
                    },
                ))?;
            }
            return Ok(Vec::new());
        };

        let mut commit = Commit::new().cohort_progress(
            profile.id,
            CohortProgress {
                current: Some(cohort.id),
                last_completed,
            },
        );
        let mut papers = Vec::with_capacity(cohort.papers.len());
        for paper_id in &cohort.papers {
            match self.store.get_paper(*paper_id)? {
                Some(paper) => {
                    commit = commit.create(Assignment::new(
                        &paper,
                        Some(profile.id),
                        TaskKind::Calibration,
                    ));
                    papers.push(paper.id);
                }
                None => warn!(cohort_id = cohort.id, paper_id, "Cohort references missing paper"),
            }
        }
        self.store.commit(commit)?;

        info!(
            grader_id = profile.id,
            cohort_id = cohort.id,
            papers = papers.len(),
            "Calibration cohort assigned"
        );
        if let Some(topic_id) = profile.topic_id {
            self.announce(profile, topic_id, papers.clone(), TaskKind::Calibration, None);
        }
        Ok(papers)
    }

    /// Up to `batch_size` papers needing an independent mark
    fn assign_batch(&self, profile: &GraderProfile, topic: &Topic) -> EngineResult<Vec<PaperId>> {
        let candidates: Vec<_> = self
            .store
            .list_papers(topic.id)?
            .into_iter()
            .filter(|p| p.is_assignable(topic.mode) && p.slot_of(profile.id).is_none())
            .collect();

        let batch_id = uuid::Uuid::new_v4().to_string();
        let reclaim_at = Utc::now() + self.reclaim_after;
        let mut first_round = Vec::new();
        let mut second_round = Vec::new();

        for paper in candidates {
            if first_round.len() + second_round.len() >= self.batch_size {
                break;
            }

            let kind = if paper.independent_marks() == 0 {
                TaskKind::FirstRound
            } else {
                TaskKind::SecondRound
            };
            let assignment = Assignment::new(&paper, Some(profile.id), kind)
                .with_reclaim(batch_id.clone(), reclaim_at);
            let mut claimed = paper.clone();
            claimed.in_flight += 1;

            match self
                .store
                .commit(Commit::new().write_paper(claimed).create(assignment))
            {
                Ok(()) => match kind {
                    TaskKind::FirstRound => first_round.push(paper.id),
                    _ => second_round.push(paper.id),
                },
                Err(StoreError::Conflict(conflict)) => {
                    debug!(paper_id = paper.id, grader_id = profile.id, %conflict, "Lost race for paper");
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            grader_id = profile.id,
            topic_id = topic.id,
            batch_id = %batch_id,
            first_round = first_round.len(),
            second_round = second_round.len(),
            "Work assigned"
        );

        let mut papers = first_round.clone();
        papers.extend(&second_round);
        for (kind, ids) in [
            (TaskKind::FirstRound, first_round),
            (TaskKind::SecondRound, second_round),
        ] {
            if !ids.is_empty() {
                self.announce(profile, topic.id, ids, kind, Some(batch_id.clone()));
            }
        }
        Ok(papers)
    }

    fn announce(
        &self,
        profile: &GraderProfile,
        topic_id: i64,
        paper_ids: Vec<PaperId>,
        kind: TaskKind,
        batch_id: Option<String>,
    ) {
        let _ = self.event_bus.publish(GradingEvent::WorkAssigned {
            grader_id: profile.id,
            topic_id,
            paper_ids,
            kind,
            batch_id,
            timestamp: Utc::now(),
        });
    }
}
