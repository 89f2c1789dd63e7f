//! Grading engine
//!
//! Entry point for graders and leaders. Wires the selector, state machine,
//! sampler, reclaimer and reports over one store and one event bus, and adds
//! the leader desk and import helpers on top.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::machine::{FinalizationResult, GradingMachine, ProblemReport};
use super::reclaimer::TaskReclaimer;
use super::sampler::SelfCheckSampler;
use super::selection::AssignmentSelector;
use super::stats::{GraderStats, SelfCheckReport, StatsReporter};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, NotFoundKind};
use crate::events::{EventBus, GradingEvent, SharedEventBus};
use crate::identity::SharedDirectory;
use crate::random::{SharedRandom, ThreadRandom};
use crate::state::{
    Assignment, AssignmentFilter, Commit, Conflict, GraderId, Paper, PaperId, SharedPaperStore,
    StoreError, TaskKind, Topic, TopicId, TrainingCohort,
};

/// Shared engine handle
pub type SharedGradingEngine = Arc<GradingEngine>;

/// Central orchestrator for grading work
pub struct GradingEngine {
    store: SharedPaperStore,
    directory: SharedDirectory,
    event_bus: SharedEventBus,
    config: EngineConfig,
    machine: GradingMachine,
    selector: AssignmentSelector,
    sampler: SelfCheckSampler,
    reclaimer: Arc<TaskReclaimer>,
    stats: StatsReporter,
}

impl GradingEngine {
    /// Create an engine drawing randomness from the thread RNG
    pub fn new(store: SharedPaperStore, directory: SharedDirectory, config: EngineConfig) -> Self {
        Self::with_random(store, directory, config, Arc::new(ThreadRandom))
    }

    /// Create an engine with an injected random source
    pub fn with_random(
        store: SharedPaperStore,
        directory: SharedDirectory,
        config: EngineConfig,
        random: SharedRandom,
    ) -> Self {
        let event_bus = EventBus::with_capacity(config.event_capacity).shared();

        let machine = GradingMachine::new(
            store.clone(),
            directory.clone(),
            event_bus.clone(),
            random.clone(),
            config.record_policy,
        );
        let selector = AssignmentSelector::new(
            store.clone(),
            directory.clone(),
            event_bus.clone(),
            random.clone(),
            config.batch_size,
            config.reclaim_after(),
        );
        let sampler = SelfCheckSampler::new(
            store.clone(),
            event_bus.clone(),
            random,
            config.self_check_window,
        );
        let reclaimer = Arc::new(TaskReclaimer::new(
            store.clone(),
            event_bus.clone(),
            config.sweep_interval(),
        ));
        let stats = StatsReporter::new(store.clone());

        Self {
            store,
            directory,
            event_bus,
            config,
            machine,
            selector,
            sampler,
            reclaimer,
            stats,
        }
    }

    /// Create a shared reference to this engine
    pub fn shared(self) -> SharedGradingEngine {
        Arc::new(self)
    }

    pub fn store(&self) -> &SharedPaperStore {
        &self.store
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.event_bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reclaimer handle, for [`TaskReclaimer::spawn`] or manual sweeps
    pub fn reclaimer(&self) -> Arc<TaskReclaimer> {
        self.reclaimer.clone()
    }

    // =========================================================================
    // Grader operations
    // =========================================================================

    /// Papers the grader should work on next
    pub fn request_work(&self, grader_id: GraderId) -> EngineResult<Vec<PaperId>> {
        self.selector.request_work(grader_id)
    }

    /// Submit scores against an assignment
    ///
    /// A production submission may complete a self-check window; sampling
    /// failures are logged and never fail the submission itself.
    pub fn submit(
        &self,
        grader_id: GraderId,
        paper_id: PaperId,
        assignment_id: &str,
        scores: &[i64],
    ) -> EngineResult<FinalizationResult> {
        let kind = self
            .store
            .get_assignment(assignment_id)?
            .map(|a| a.kind);
        let result = self.machine.submit(grader_id, paper_id, assignment_id, scores)?;

        if kind.is_some_and(|k| k.is_production()) {
            if let Err(e) = self.sampler.observe(grader_id) {
                warn!(grader_id, error = %e, "Self-check sampling failed");
            }
        }
        Ok(result)
    }

    pub fn report_problem(
        &self,
        grader_id: GraderId,
        paper_id: PaperId,
        assignment_id: &str,
        problem_type: &str,
        message: &str,
    ) -> EngineResult<ProblemReport> {
        self.machine
            .report_problem(grader_id, paper_id, assignment_id, problem_type, message)
    }

    pub fn revise(
        &self,
        grader_id: GraderId,
        paper_id: PaperId,
        scores: &[i64],
    ) -> EngineResult<FinalizationResult> {
        self.machine.revise(grader_id, paper_id, scores)
    }

    /// The grader's live assignment on a paper, if any
    pub fn pending_assignment(
        &self,
        grader_id: GraderId,
        paper_id: PaperId,
    ) -> EngineResult<Option<Assignment>> {
        Ok(self
            .store
            .find_assignments(&AssignmentFilter::new().grader(grader_id).paper(paper_id))?
            .into_iter()
            .next())
    }

    // =========================================================================
    // Leader desk
    // =========================================================================

    /// Open a direct leader review of a paper
    ///
    /// Returns the leader's existing review when one is already open.
    pub fn open_leader_review(
        &self,
        leader_id: GraderId,
        paper_id: PaperId,
    ) -> EngineResult<Assignment> {
        let profile = self.directory.grader(leader_id)?;
        if !profile.is_leader() {
            return Err(EngineError::NotLeader(leader_id));
        }

        let paper = self
            .store
            .get_paper(paper_id)?
            .ok_or(EngineError::NotFound(NotFoundKind::Paper))?;
        if paper.is_final() {
            return Err(EngineError::AlreadyFinalized(paper_id));
        }

        if let Some(existing) = self.pending_assignment(leader_id, paper_id)? {
            if existing.kind == TaskKind::LeaderDirect {
                debug!(leader_id, paper_id, assignment_id = %existing.id, "Leader review already open");
                return Ok(existing);
            }
        }

        let review = Assignment::new(&paper, Some(leader_id), TaskKind::LeaderDirect);
        match self.store.commit(Commit::new().create(review.clone())) {
            Ok(()) => {}
            Err(StoreError::Conflict(Conflict::DuplicateAssignment { .. })) => {
                return self
                    .pending_assignment(leader_id, paper_id)?
                    .ok_or(EngineError::NotFound(NotFoundKind::Assignment));
            }
            Err(e) => return Err(e.into()),
        }

        info!(leader_id, paper_id, assignment_id = %review.id, "Leader review opened");
        let _ = self.event_bus.publish(GradingEvent::WorkAssigned {
            grader_id: leader_id,
            topic_id: paper.topic_id,
            paper_ids: vec![paper_id],
            kind: TaskKind::LeaderDirect,
            batch_id: None,
            timestamp: Utc::now(),
        });
        Ok(review)
    }

    /// Unaddressed leader-level work, oldest first
    pub fn leader_queue(&self, kinds: Option<Vec<TaskKind>>) -> EngineResult<Vec<Assignment>> {
        let mut filter = AssignmentFilter::new().leader_level();
        if let Some(kinds) = kinds {
            filter = filter.kinds(kinds);
        }
        Ok(self.store.find_assignments(&filter)?)
    }

    // =========================================================================
    // Reports
    // =========================================================================

    pub fn self_check_report(&self, grader_id: GraderId) -> EngineResult<SelfCheckReport> {
        self.stats.self_check_report(grader_id)
    }

    pub fn grader_stats(&self, grader_id: GraderId, topic_id: TopicId) -> EngineResult<GraderStats> {
        self.stats.grader_stats(grader_id, topic_id)
    }

    // =========================================================================
    // Import
    // =========================================================================

    pub fn put_topic(&self, topic: &Topic) -> EngineResult<()> {
        Ok(self.store.put_topic(topic)?)
    }

    pub fn put_paper(&self, paper: &Paper) -> EngineResult<()> {
        Ok(self.store.put_paper(paper)?)
    }

    pub fn put_cohort(&self, cohort: &TrainingCohort) -> EngineResult<()> {
        Ok(self.store.put_cohort(cohort)?)
    }

    /// Delete a paper nobody has scored or been handed yet
    pub fn remove_paper(&self, paper_id: PaperId) -> EngineResult<()> {
        let paper = self
            .store
            .get_paper(paper_id)?
            .ok_or(EngineError::NotFound(NotFoundKind::Paper))?;
        let live = self
            .store
            .find_assignments(&AssignmentFilter::new().paper(paper_id))?;
        if paper.has_scores() || !live.is_empty() {
            return Err(EngineError::PaperHasScores(paper_id));
        }

        self.store.delete_paper(paper_id, paper.revision)?;
        info!(paper_id, "Paper removed");
        Ok(())
    }
}
