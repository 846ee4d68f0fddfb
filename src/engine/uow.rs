//! Explicit unit of work for one save cycle.
//!
//! Owns the pending change set, the session queue, and the recalculation
//! state as plain values; nothing ambient or global survives outside this
//! struct, so concurrent units of work cannot interfere. The save cycle
//! is: detect over pending changes, flush them through the store, then
//! recalculate once under the re-entrancy guard. The queue is cleared
//! after every recalculation attempt, success or failure, so a failed
//! pass can never replay into an unrelated transaction.

use tracing::info;
use uuid::Uuid;

use super::change_set::{ChangeSet, EntityChange, Tracked};
use super::detector;
use super::queue::SessionQueue;
use super::recalc::{self, RecalcReport};
use super::trigger;
use crate::error::{EngineError, EngineResult};
use crate::model::{
    Decision, DecisionOption, DiscreteProbability, DiscreteUtility, Edge, Issue, Node, Outcome,
    ProbabilityParentOption, ProbabilityParentOutcome, Strategy, StrategyOption, Uncertainty,
    Utility, UtilityParentOption, UtilityParentOutcome,
};
use crate::storage::DiagramStore;

/// Whether a recalculation pass is currently running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecalculationState {
    /// No recalculation in progress; triggers and detection are live.
    #[default]
    Idle,
    /// Recalculating; trigger operations and detection are no-ops.
    InProgress,
}

/// One transaction-scoped unit of work over a diagram store.
#[derive(Debug)]
pub struct UnitOfWork<S: DiagramStore> {
    store: S,
    changes: ChangeSet,
    queue: SessionQueue,
    state: RecalculationState,
}

impl<S: DiagramStore> UnitOfWork<S> {
    /// Wrap a store handle (for SQLite, a live transaction).
    pub fn new(store: S) -> Self {
        Self {
            store,
            changes: ChangeSet::new(),
            queue: SessionQueue::new(),
            state: RecalculationState::Idle,
        }
    }

    /// The wrapped store handle.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Unwrap the store handle, e.g. to commit the transaction.
    pub fn into_store(self) -> S {
        self.store
    }

    /// The session queue accumulated so far.
    pub fn queue(&self) -> &SessionQueue {
        &self.queue
    }

    /// Current recalculation state.
    pub fn recalculation_state(&self) -> RecalculationState {
        self.state
    }

    /// Whether any mutations are pending flush.
    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Record an arbitrary tracked change.
    pub fn track(&mut self, change: EntityChange) {
        self.changes.push(change);
    }

    // ------------------------------------------------------------------
    // Typed mutation surface
    // ------------------------------------------------------------------

    /// Add an issue.
    pub fn add_issue(&mut self, issue: Issue) {
        self.track(EntityChange::Issue(Tracked::added(issue)));
    }

    /// Update an issue, keeping its original values for detection.
    pub fn update_issue(&mut self, original: Issue, current: Issue) {
        self.track(EntityChange::Issue(Tracked::modified(original, current)));
    }

    /// Add a node.
    pub fn add_node(&mut self, node: Node) {
        self.track(EntityChange::Node(Tracked::added(node)));
    }

    /// Add an edge.
    pub fn add_edge(&mut self, edge: Edge) {
        self.track(EntityChange::Edge(Tracked::added(edge)));
    }

    /// Update an edge, keeping its original endpoints for detection.
    pub fn update_edge(&mut self, original: Edge, current: Edge) {
        self.track(EntityChange::Edge(Tracked::modified(original, current)));
    }

    /// Delete an edge.
    pub fn delete_edge(&mut self, edge: Edge) {
        self.track(EntityChange::Edge(Tracked::deleted(edge)));
    }

    /// Add a decision payload.
    pub fn add_decision(&mut self, decision: Decision) {
        self.track(EntityChange::Decision(Tracked::added(decision)));
    }

    /// Update a decision payload.
    pub fn update_decision(&mut self, original: Decision, current: Decision) {
        self.track(EntityChange::Decision(Tracked::modified(original, current)));
    }

    /// Add an option under a decision.
    pub fn add_decision_option(&mut self, option: DecisionOption) {
        self.track(EntityChange::DecisionOption(Tracked::added(option)));
    }

    /// Delete an option.
    pub fn delete_decision_option(&mut self, option: DecisionOption) {
        self.track(EntityChange::DecisionOption(Tracked::deleted(option)));
    }

    /// Add an uncertainty payload.
    pub fn add_uncertainty(&mut self, uncertainty: Uncertainty) {
        self.track(EntityChange::Uncertainty(Tracked::added(uncertainty)));
    }

    /// Update an uncertainty payload.
    pub fn update_uncertainty(&mut self, original: Uncertainty, current: Uncertainty) {
        self.track(EntityChange::Uncertainty(Tracked::modified(
            original, current,
        )));
    }

    /// Add an outcome under an uncertainty.
    pub fn add_outcome(&mut self, outcome: Outcome) {
        self.track(EntityChange::Outcome(Tracked::added(outcome)));
    }

    /// Delete an outcome.
    pub fn delete_outcome(&mut self, outcome: Outcome) {
        self.track(EntityChange::Outcome(Tracked::deleted(outcome)));
    }

    /// Add a utility payload.
    pub fn add_utility(&mut self, utility: Utility) {
        self.track(EntityChange::Utility(Tracked::added(utility)));
    }

    /// Add a strategy.
    pub fn add_strategy(&mut self, strategy: Strategy) {
        self.track(EntityChange::Strategy(Tracked::added(strategy)));
    }

    /// Link a strategy to an option.
    pub fn add_strategy_link(&mut self, link: StrategyOption) {
        self.track(EntityChange::StrategyLink(Tracked::added(link)));
    }

    /// Unlink a strategy from an option.
    pub fn delete_strategy_link(&mut self, link: StrategyOption) {
        self.track(EntityChange::StrategyLink(Tracked::deleted(link)));
    }

    /// Edit a probability row's value (an ordinary field update; does not
    /// trigger regeneration).
    pub fn update_probability(&mut self, original: DiscreteProbability, current: DiscreteProbability) {
        self.track(EntityChange::Probability(Tracked::modified(
            original, current,
        )));
    }

    /// Edit a utility row's value.
    pub fn update_utility_row(&mut self, original: DiscreteUtility, current: DiscreteUtility) {
        self.track(EntityChange::UtilityRow(Tracked::modified(
            original, current,
        )));
    }

    /// Delete a probability parent-option junction; the owning row is
    /// purged on the next save cycle.
    pub fn delete_probability_parent_option(&mut self, junction: ProbabilityParentOption) {
        self.track(EntityChange::ProbabilityParentOption(Tracked::deleted(
            junction,
        )));
    }

    /// Delete a probability parent-outcome junction.
    pub fn delete_probability_parent_outcome(&mut self, junction: ProbabilityParentOutcome) {
        self.track(EntityChange::ProbabilityParentOutcome(Tracked::deleted(
            junction,
        )));
    }

    /// Delete a utility parent-option junction.
    pub fn delete_utility_parent_option(&mut self, junction: UtilityParentOption) {
        self.track(EntityChange::UtilityParentOption(Tracked::deleted(junction)));
    }

    /// Delete a utility parent-outcome junction.
    pub fn delete_utility_parent_outcome(&mut self, junction: UtilityParentOutcome) {
        self.track(EntityChange::UtilityParentOutcome(Tracked::deleted(
            junction,
        )));
    }

    // ------------------------------------------------------------------
    // Explicit rule trigger
    // ------------------------------------------------------------------

    /// Options were inserted under existing decisions.
    pub async fn on_parent_options_added(&mut self, decision_ids: &[Uuid]) -> EngineResult<()> {
        if self.recalculating() {
            return Ok(());
        }
        trigger::parent_options_added(&mut self.store, &mut self.queue, decision_ids).await
    }

    /// Outcomes were inserted under existing uncertainties.
    pub async fn on_parent_outcomes_added(
        &mut self,
        uncertainty_ids: &[Uuid],
    ) -> EngineResult<()> {
        if self.recalculating() {
            return Ok(());
        }
        trigger::parent_outcomes_added(&mut self.store, &mut self.queue, uncertainty_ids).await
    }

    /// Parent issues changed in a way that affects their children.
    pub async fn on_parent_issues_changed(&mut self, issue_ids: &[Uuid]) -> EngineResult<()> {
        if self.recalculating() {
            return Ok(());
        }
        trigger::parent_issues_changed(&mut self.store, &mut self.queue, issue_ids).await
    }

    /// Edges were added outside tracked mutation.
    pub async fn on_edges_added(&mut self, edge_ids: &[Uuid]) -> EngineResult<()> {
        if self.recalculating() {
            return Ok(());
        }
        trigger::edges_changed(&mut self.store, &mut self.queue, edge_ids).await
    }

    /// Edges were deleted outside tracked mutation. Resolve before the
    /// rows disappear.
    pub async fn on_edges_deleted(&mut self, edge_ids: &[Uuid]) -> EngineResult<()> {
        if self.recalculating() {
            return Ok(());
        }
        trigger::edges_changed(&mut self.store, &mut self.queue, edge_ids).await
    }

    /// Node connectivity was rewritten wholesale.
    pub async fn on_node_connections_changed(&mut self, node_ids: &[Uuid]) -> EngineResult<()> {
        if self.recalculating() {
            return Ok(());
        }
        trigger::node_connections_changed(&mut self.store, &mut self.queue, node_ids).await
    }

    /// Force the given issues' own tables to be rebuilt on the next save
    /// cycle.
    pub async fn mark_issues_for_rebuild(&mut self, issue_ids: &[Uuid]) -> EngineResult<()> {
        if self.recalculating() {
            return Ok(());
        }
        trigger::issues_marked_for_rebuild(&mut self.store, &mut self.queue, issue_ids).await
    }

    // ------------------------------------------------------------------
    // Save cycle
    // ------------------------------------------------------------------

    /// Run one save cycle: detect, flush, recalculate.
    ///
    /// Returns a summary of the recalculation work. On failure the queue
    /// is still cleared and the state reset; the caller is expected to
    /// roll back the surrounding transaction.
    pub async fn save_changes(&mut self) -> EngineResult<RecalcReport> {
        if matches!(self.state, RecalculationState::Idle) && !self.changes.is_empty() {
            detector::scan(&self.changes, &mut self.store, &mut self.queue).await?;
        }

        let pending = self.changes.take();
        for change in &pending {
            if let Some(kind) = change.immutable_junction_modification() {
                return Err(EngineError::ImmutableJunction {
                    kind: kind.to_string(),
                });
            }
            self.store.apply(change).await?;
        }

        if matches!(self.state, RecalculationState::InProgress) || !self.queue.has_changes() {
            return Ok(RecalcReport::default());
        }

        self.state = RecalculationState::InProgress;
        let result = recalc::run(&mut self.store, &self.queue).await;
        self.queue.clear();
        self.state = RecalculationState::Idle;

        let report = result?;
        info!(
            flushed_changes = pending.len(),
            rebuilt_tables = report.rebuilt_tables,
            probability_rows = report.probability_rows,
            utility_rows = report.utility_rows,
            "save cycle complete"
        );
        Ok(report)
    }

    fn recalculating(&self) -> bool {
        matches!(self.state, RecalculationState::InProgress)
    }
}
