//! Storage contract consumed by the derived-table engine.
//!
//! [`DiagramStore`] is the abstract collaborator the engine requires of
//! its persistence layer: flushing tracked entity changes, typed bulk
//! lookups with a declared eager-load shape, and bulk delete/insert of
//! derived rows. [`sqlite::SqliteDiagramStore`] provides the SQLite
//! implementation; its transaction handle [`sqlite::DiagramTx`]
//! implements this trait so one save cycle runs atomically.

mod sqlite;

pub use sqlite::{DiagramTx, SqliteDiagramStore, TableStats};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use uuid::Uuid;

use crate::engine::EntityChange;
use crate::error::StorageResult;
use crate::model::{
    Boundary, DecisionHierarchy, DiscreteProbability, DiscreteUtility, IssueKind, StrategyOption,
};

/// Flat projection of an issue with just enough payload to classify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueSummary {
    /// Issue id.
    pub id: Uuid,
    /// Issue kind.
    pub kind: IssueKind,
    /// Analysis-scope boundary.
    pub boundary: Boundary,
    /// Uncertainty payload, if present.
    pub uncertainty: Option<UncertaintySummary>,
    /// Decision payload, if present.
    pub decision: Option<DecisionSummary>,
    /// Utility payload id, if present.
    pub utility_id: Option<Uuid>,
}

/// Uncertainty payload projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UncertaintySummary {
    /// Uncertainty id.
    pub id: Uuid,
    /// Whether the uncertainty is key.
    pub is_key: bool,
}

/// Decision payload projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionSummary {
    /// Decision id.
    pub id: Uuid,
    /// Hierarchy level.
    pub hierarchy: DecisionHierarchy,
}

/// A node together with its issue, if the issue still exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSummary {
    /// Node id.
    pub id: Uuid,
    /// The node's issue; `None` for dangling nodes.
    pub issue: Option<IssueSummary>,
}

impl NodeSummary {
    /// Whether this node's issue can contribute a parent dimension
    /// (an uncertainty or decision with its payload attached).
    pub fn is_dimension_contributor(&self) -> bool {
        match &self.issue {
            Some(issue) => match issue.kind {
                IssueKind::Uncertainty => issue.uncertainty.is_some(),
                IssueKind::Decision => issue.decision.is_some(),
                _ => false,
            },
            None => false,
        }
    }
}

/// One incoming edge of a rebuild target: the tail issue plus the child
/// ids it would contribute as a dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    /// Tail node of the edge (used to collapse duplicate edges).
    pub tail_node_id: Uuid,
    /// The tail node's issue.
    pub issue: IssueSummary,
    /// Option ids of the tail's decision, if any.
    pub option_ids: Vec<Uuid>,
    /// Outcome ids of the tail's uncertainty, if any.
    pub outcome_ids: Vec<Uuid>,
}

/// Everything needed to rebuild one uncertainty's probability table.
#[derive(Debug, Clone)]
pub struct UncertaintyContext {
    /// The uncertainty being rebuilt.
    pub uncertainty_id: Uuid,
    /// Its owning issue.
    pub issue_id: Uuid,
    /// The uncertainty's own outcome ids, sorted by id.
    pub outcome_ids: Vec<Uuid>,
    /// Incoming edges with their tail issues, one entry per edge.
    pub parents: Vec<ParentLink>,
}

/// Everything needed to rebuild one utility's table.
#[derive(Debug, Clone)]
pub struct UtilityContext {
    /// The utility being rebuilt.
    pub utility_id: Uuid,
    /// Its owning issue.
    pub issue_id: Uuid,
    /// Incoming edges with their tail issues, one entry per edge.
    pub parents: Vec<ParentLink>,
}

/// Persistence contract required by the derived-table engine.
///
/// Implementations run inside one unit of work; all methods see the
/// store's current (possibly uncommitted) state.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DiagramStore: Send {
    /// Persist one tracked entity change.
    async fn apply(&mut self, change: &EntityChange) -> StorageResult<()>;

    /// Load issue summaries for the given issue ids. Missing ids are
    /// silently absent from the result.
    async fn issue_summaries(&mut self, issue_ids: &[Uuid]) -> StorageResult<Vec<IssueSummary>>;

    /// Load node summaries (node plus issue) for the given node ids.
    async fn node_issues(&mut self, node_ids: &[Uuid]) -> StorageResult<Vec<NodeSummary>>;

    /// Head-node issues of the given edges.
    async fn edge_head_issues(&mut self, edge_ids: &[Uuid]) -> StorageResult<Vec<IssueSummary>>;

    /// Head issues one hop downstream of the given issues, via edges whose
    /// tail node belongs to one of them. Deduplicated.
    async fn downstream_head_issues(
        &mut self,
        issue_ids: &[Uuid],
    ) -> StorageResult<Vec<IssueSummary>>;

    /// Owning issue ids of the given decisions.
    async fn decision_issue_ids(&mut self, decision_ids: &[Uuid]) -> StorageResult<Vec<Uuid>>;

    /// Owning issue ids of the given uncertainties.
    async fn uncertainty_issue_ids(
        &mut self,
        uncertainty_ids: &[Uuid],
    ) -> StorageResult<Vec<Uuid>>;

    /// Rebuild context for an uncertainty: own outcomes plus every
    /// incoming edge with its tail issue and child ids. `None` when the
    /// uncertainty no longer exists.
    async fn uncertainty_context(
        &mut self,
        uncertainty_id: Uuid,
    ) -> StorageResult<Option<UncertaintyContext>>;

    /// Rebuild context for a utility. `None` when the utility no longer
    /// exists.
    async fn utility_context(&mut self, utility_id: Uuid)
        -> StorageResult<Option<UtilityContext>>;

    /// Hard-delete the given probability rows and their junctions.
    async fn delete_probability_rows(&mut self, row_ids: &[Uuid]) -> StorageResult<u64>;

    /// Hard-delete the given utility rows and their junctions.
    async fn delete_utility_rows(&mut self, row_ids: &[Uuid]) -> StorageResult<u64>;

    /// Delete every probability row of an uncertainty.
    async fn clear_probabilities(&mut self, uncertainty_id: Uuid) -> StorageResult<u64>;

    /// Delete every utility row of a utility.
    async fn clear_utility_rows(&mut self, utility_id: Uuid) -> StorageResult<u64>;

    /// Insert freshly generated probability rows with their junctions.
    async fn insert_probability_rows(
        &mut self,
        rows: &[DiscreteProbability],
    ) -> StorageResult<()>;

    /// Insert freshly generated utility rows with their junctions.
    async fn insert_utility_rows(&mut self, rows: &[DiscreteUtility]) -> StorageResult<()>;

    /// Strategy-option links reachable through the given issues'
    /// decisions.
    async fn strategy_links_for_issues(
        &mut self,
        issue_ids: &[Uuid],
    ) -> StorageResult<Vec<StrategyOption>>;

    /// Delete the given strategy-option links.
    async fn delete_strategy_links(&mut self, links: &[StrategyOption]) -> StorageResult<u64>;
}
