//! Pending-mutation tracking for one save cycle.
//!
//! The change set stands in for an ORM change tracker: every mutation a
//! caller records through the unit of work lands here as a [`Tracked`]
//! entity with its lifecycle state and, for modifications, the original
//! values the detector compares against.

use crate::model::{
    Decision, DecisionOption, DiscreteProbability, DiscreteUtility, Edge, Issue, Node, Outcome,
    ProbabilityParentOption, ProbabilityParentOutcome, Strategy, StrategyOption, Uncertainty,
    Utility, UtilityParentOption, UtilityParentOutcome,
};

/// Lifecycle state of a tracked entity within one save cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Newly created, not yet persisted.
    Added,
    /// Exists in storage; fields changed in this cycle.
    Modified,
    /// Exists in storage; removed in this cycle.
    Deleted,
}

/// One tracked entity with lifecycle state and before/after values.
#[derive(Debug, Clone)]
pub struct Tracked<T> {
    /// Lifecycle state.
    pub state: EntityState,
    /// Pre-change values; present only for `Modified`.
    pub original: Option<T>,
    /// Current values (for `Deleted`, the values being removed).
    pub current: T,
}

impl<T> Tracked<T> {
    /// Track a newly added entity.
    pub fn added(current: T) -> Self {
        Self {
            state: EntityState::Added,
            original: None,
            current,
        }
    }

    /// Track a modification with its original values.
    pub fn modified(original: T, current: T) -> Self {
        Self {
            state: EntityState::Modified,
            original: Some(original),
            current,
        }
    }

    /// Track a deletion.
    pub fn deleted(current: T) -> Self {
        Self {
            state: EntityState::Deleted,
            original: None,
            current,
        }
    }
}

/// A tracked change to one entity of any kind.
#[derive(Debug, Clone)]
pub enum EntityChange {
    /// Issue change.
    Issue(Tracked<Issue>),
    /// Node change.
    Node(Tracked<Node>),
    /// Edge change.
    Edge(Tracked<Edge>),
    /// Decision payload change.
    Decision(Tracked<Decision>),
    /// Decision option change.
    DecisionOption(Tracked<DecisionOption>),
    /// Uncertainty payload change.
    Uncertainty(Tracked<Uncertainty>),
    /// Outcome change.
    Outcome(Tracked<Outcome>),
    /// Utility payload change.
    Utility(Tracked<Utility>),
    /// Strategy change.
    Strategy(Tracked<Strategy>),
    /// Strategy-option link change.
    StrategyLink(Tracked<StrategyOption>),
    /// Direct edit of a probability row (value updates).
    Probability(Tracked<DiscreteProbability>),
    /// Direct edit of a utility row (value updates).
    UtilityRow(Tracked<DiscreteUtility>),
    /// Probability parent-option junction change.
    ProbabilityParentOption(Tracked<ProbabilityParentOption>),
    /// Probability parent-outcome junction change.
    ProbabilityParentOutcome(Tracked<ProbabilityParentOutcome>),
    /// Utility parent-option junction change.
    UtilityParentOption(Tracked<UtilityParentOption>),
    /// Utility parent-outcome junction change.
    UtilityParentOutcome(Tracked<UtilityParentOutcome>),
}

impl EntityChange {
    /// Junction rows are only ever added or deleted; returns the kind
    /// name when this change would modify one in place.
    pub(crate) fn immutable_junction_modification(&self) -> Option<&'static str> {
        match self {
            EntityChange::ProbabilityParentOption(t) if t.state == EntityState::Modified => {
                Some("probability_parent_option")
            }
            EntityChange::ProbabilityParentOutcome(t) if t.state == EntityState::Modified => {
                Some("probability_parent_outcome")
            }
            EntityChange::UtilityParentOption(t) if t.state == EntityState::Modified => {
                Some("utility_parent_option")
            }
            EntityChange::UtilityParentOutcome(t) if t.state == EntityState::Modified => {
                Some("utility_parent_outcome")
            }
            _ => None,
        }
    }
}

/// The pending mutation set of one save cycle, in insertion order.
#[derive(Debug, Default)]
pub struct ChangeSet {
    entries: Vec<EntityChange>,
}

impl ChangeSet {
    /// Create an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change.
    pub fn push(&mut self, change: EntityChange) {
        self.entries.push(change);
    }

    /// Whether any changes are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of pending changes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate the pending changes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityChange> {
        self.entries.iter()
    }

    /// Take all pending changes, leaving the set empty.
    pub fn take(&mut self) -> Vec<EntityChange> {
        std::mem::take(&mut self.entries)
    }
}
