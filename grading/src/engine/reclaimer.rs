//! Task reclaimer
//!
//! Releases first/second-round assignments a grader has sat on past their
//! reclaim deadline. The assignment is retired and the paper's in-flight
//! counter dropped in one commit; a submission that lands first wins and the
//! sweep leaves it alone.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::EngineResult;
use crate::events::{GradingEvent, SharedEventBus};
use crate::state::{
    Assignment, AssignmentFilter, Commit, Conflict, RetireReason, SharedPaperStore, StoreError,
};

/// Attempts per assignment when the paper keeps changing underneath
const MAX_RECLAIM_ATTEMPTS: usize = 3;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Assignments past their deadline
    pub due: usize,
    pub reclaimed: usize,
    /// Consumed by a submission before the sweep got to them
    pub already_consumed: usize,
}

/// Background releaser of stale assignments
pub struct TaskReclaimer {
    store: SharedPaperStore,
    event_bus: SharedEventBus,
    interval: Duration,
}

impl TaskReclaimer {
    pub fn new(store: SharedPaperStore, event_bus: SharedEventBus, interval: Duration) -> Self {
        Self {
            store,
            event_bus,
            interval,
        }
    }

    /// Reclaim every assignment due at `now`
    pub fn sweep(&self, now: DateTime<Utc>) -> EngineResult<SweepStats> {
        let due = self
            .store
            .find_assignments(&AssignmentFilter::new().reclaim_due(now))?;

        let mut stats = SweepStats {
            due: due.len(),
            ..Default::default()
        };
        for assignment in due {
            if self.reclaim(&assignment)? {
                stats.reclaimed += 1;
            } else {
                stats.already_consumed += 1;
            }
        }

        if stats.due > 0 {
            info!(
                due = stats.due,
                reclaimed = stats.reclaimed,
                already_consumed = stats.already_consumed,
                "Reclaim sweep finished"
            );
        }
        Ok(stats)
    }

    fn reclaim(&self, assignment: &Assignment) -> EngineResult<bool> {
        for attempt in 1..=MAX_RECLAIM_ATTEMPTS {
            let mut commit = Commit::new().retire(assignment.id.clone(), RetireReason::Reclaimed);
            if let Some(mut paper) = self.store.get_paper(assignment.paper_id)? {
                paper.in_flight = paper.in_flight.saturating_sub(1);
                commit = commit.write_paper(paper);
            }

            match self.store.commit(commit) {
                Ok(()) => {
                    debug!(
                        assignment_id = %assignment.id,
                        paper_id = assignment.paper_id,
                        grader_id = ?assignment.grader_id,
                        "Assignment reclaimed"
                    );
                    let _ = self.event_bus.publish(GradingEvent::AssignmentReclaimed {
                        assignment_id: assignment.id.clone(),
                        paper_id: assignment.paper_id,
                        grader_id: assignment.grader_id,
                        reason: RetireReason::Reclaimed,
                        timestamp: Utc::now(),
                    });
                    return Ok(true);
                }
                Err(StoreError::Conflict(Conflict::AssignmentRetired(_))) => return Ok(false),
                Err(StoreError::Conflict(conflict)) => {
                    debug!(assignment_id = %assignment.id, attempt, %conflict, "Retrying reclaim");
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!(assignment_id = %assignment.id, "Gave up reclaiming after repeated conflicts");
        Ok(false)
    }

    /// Run [`sweep`](Self::sweep) on an interval until `shutdown` turns true
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep(Utc::now()) {
                            warn!(error = %e, "Reclaim sweep failed");
                        }
                    }
                }
            }
            debug!("Reclaimer stopped");
        })
    }
}
