//! Self-score QC sampler
//!
//! Every full window of production records a grader completes, a share of
//! the papers in that window comes back to them for a blind re-grade. The
//! window cursor is written in the same commit as the self-check
//! assignments, so a window is never sampled twice.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, info};

use super::stats::production_marks;
use crate::error::{EngineError, EngineResult, NotFoundKind};
use crate::events::{GradingEvent, SharedEventBus};
use crate::random::SharedRandom;
use crate::state::{
    Assignment, AssignmentFilter, Commit, Conflict, GraderId, PaperId, SharedPaperStore,
    StoreError, TaskKind,
};

/// Schedules blind self re-grades
///
/// Only first-round, second-round and arbitration records fill a window.
/// Training, calibration, self-check, problem and leader records never do,
/// and a revised mark still counts once.
pub struct SelfCheckSampler {
    store: SharedPaperStore,
    event_bus: SharedEventBus,
    random: SharedRandom,
    window: usize,
}

impl SelfCheckSampler {
    pub fn new(
        store: SharedPaperStore,
        event_bus: SharedEventBus,
        random: SharedRandom,
        window: usize,
    ) -> Self {
        Self {
            store,
            event_bus,
            random,
            window: window.max(1),
        }
    }

    /// Sample the grader's latest window if it completed since the last call
    ///
    /// Returns the papers sent back for self-check.
    pub fn observe(&self, grader_id: GraderId) -> EngineResult<Vec<PaperId>> {
        let production = production_marks(self.store.records_by_grader(grader_id)?);

        let windows = (production.len() / self.window) as u64;
        let cursor = self.store.self_check_cursor(grader_id)?;
        if windows <= cursor {
            return Ok(Vec::new());
        }

        let start = (windows as usize - 1) * self.window;
        let window = &production[start..start + self.window];
        let topic_id = window[window.len() - 1].topic_id;
        let topic = self
            .store
            .get_topic(topic_id)?
            .ok_or(EngineError::NotFound(NotFoundKind::Topic))?;
        let amount = (topic.self_score_rate * self.window as f64).round() as usize;

        let held: HashSet<PaperId> = self
            .store
            .find_assignments(&AssignmentFilter::new().grader(grader_id))?
            .into_iter()
            .map(|a| a.paper_id)
            .collect();

        let mut seen = HashSet::new();
        let mut eligible = Vec::new();
        for record in window {
            if held.contains(&record.paper_id) || !seen.insert(record.paper_id) {
                continue;
            }
            if let Some(paper) = self.store.get_paper(record.paper_id)? {
                if paper.slot_of(grader_id).is_some() {
                    eligible.push(paper);
                }
            }
        }

        let mut commit = Commit::new().self_check_cursor(grader_id, cursor, windows);
        let mut picked = Vec::new();
        for index in self.random.sample(eligible.len(), amount) {
            let paper = &eligible[index];
            commit = commit.create(Assignment::new(paper, Some(grader_id), TaskKind::SelfCheck));
            picked.push(paper.id);
        }
        match self.store.commit(commit) {
            Ok(()) => {}
            Err(StoreError::Conflict(Conflict::CursorMoved { found, .. })) => {
                debug!(grader_id, window = windows, cursor = found, "Window already sampled");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        }

        if picked.is_empty() {
            debug!(grader_id, window = windows, "Self-check window closed without samples");
        } else {
            info!(
                grader_id,
                window = windows,
                sampled = picked.len(),
                rate = topic.self_score_rate,
                "Self-checks scheduled"
            );
            let _ = self.event_bus.publish(GradingEvent::SelfCheckScheduled {
                grader_id,
                paper_ids: picked.clone(),
                window: windows,
                timestamp: Utc::now(),
            });
        }
        Ok(picked)
    }
}
