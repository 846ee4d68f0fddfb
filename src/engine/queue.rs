//! Transaction-scoped accumulator of rebuild work.
//!
//! All bookkeeping is keyed by [`DerivedTableOwner`]; callers that think
//! in issue ids (the rebuild facade, the issue-keyed trigger operation)
//! translate to owners at their boundary instead of keeping a parallel
//! issue-id queue. Ordered sets give deterministic drain order.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::model::IssueKind;
use crate::storage::IssueSummary;

/// Identity of one derived table: the uncertainty or utility that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DerivedTableOwner {
    /// A discrete probability table, keyed by uncertainty id.
    Uncertainty(Uuid),
    /// A discrete utility table, keyed by utility id.
    Utility(Uuid),
}

impl DerivedTableOwner {
    /// Resolve the derived-table owner of an issue, if it has one.
    ///
    /// Issues without a matching payload (dangling references, facts,
    /// decisions) resolve to `None` and are skipped by callers.
    pub fn for_issue(issue: &IssueSummary) -> Option<Self> {
        match issue.kind {
            IssueKind::Uncertainty => issue
                .uncertainty
                .as_ref()
                .map(|u| DerivedTableOwner::Uncertainty(u.id)),
            IssueKind::Utility => issue.utility_id.map(DerivedTableOwner::Utility),
            _ => None,
        }
    }
}

/// Per-save-cycle scratch queue of affected owners and stale rows.
///
/// Inserts are idempotent; the queue is consumed and cleared exactly once
/// per save cycle, success or failure.
#[derive(Debug, Default)]
pub struct SessionQueue {
    owners: BTreeSet<DerivedTableOwner>,
    prune_issues: BTreeSet<Uuid>,
    stale_probability_rows: BTreeSet<Uuid>,
    stale_utility_rows: BTreeSet<Uuid>,
}

impl SessionQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a derived-table owner as affected.
    pub fn mark_owner(&mut self, owner: DerivedTableOwner) {
        self.owners.insert(owner);
    }

    /// Mark an uncertainty's table as affected.
    pub fn mark_uncertainty(&mut self, uncertainty_id: Uuid) {
        self.owners
            .insert(DerivedTableOwner::Uncertainty(uncertainty_id));
    }

    /// Mark a utility's table as affected.
    pub fn mark_utility(&mut self, utility_id: Uuid) {
        self.owners.insert(DerivedTableOwner::Utility(utility_id));
    }

    /// Mark an issue whose strategy-option links must be pruned.
    pub fn mark_for_strategy_pruning(&mut self, issue_id: Uuid) {
        self.prune_issues.insert(issue_id);
    }

    /// Mark a probability row for hard deletion before any rebuild.
    pub fn mark_stale_probability(&mut self, row_id: Uuid) {
        self.stale_probability_rows.insert(row_id);
    }

    /// Mark a utility row for hard deletion before any rebuild.
    pub fn mark_stale_utility(&mut self, row_id: Uuid) {
        self.stale_utility_rows.insert(row_id);
    }

    /// Affected owners in deterministic order.
    pub fn owners(&self) -> impl Iterator<Item = DerivedTableOwner> + '_ {
        self.owners.iter().copied()
    }

    /// Issues pending strategy-option pruning.
    pub fn prune_issues(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.prune_issues.iter().copied()
    }

    /// Stale probability row ids.
    pub fn stale_probability_rows(&self) -> Vec<Uuid> {
        self.stale_probability_rows.iter().copied().collect()
    }

    /// Stale utility row ids.
    pub fn stale_utility_rows(&self) -> Vec<Uuid> {
        self.stale_utility_rows.iter().copied().collect()
    }

    /// Whether any work is queued.
    pub fn has_changes(&self) -> bool {
        !self.owners.is_empty()
            || !self.prune_issues.is_empty()
            || !self.stale_probability_rows.is_empty()
            || !self.stale_utility_rows.is_empty()
    }

    /// Drop all queued work.
    pub fn clear(&mut self) {
        self.owners.clear();
        self.prune_issues.clear();
        self.stale_probability_rows.clear();
        self.stale_utility_rows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserts_are_idempotent() {
        let mut queue = SessionQueue::new();
        let id = Uuid::new_v4();

        queue.mark_uncertainty(id);
        queue.mark_uncertainty(id);
        queue.mark_owner(DerivedTableOwner::Uncertainty(id));

        assert_eq!(queue.owners().count(), 1);
    }

    #[test]
    fn test_has_changes_and_clear() {
        let mut queue = SessionQueue::new();
        assert!(!queue.has_changes());

        queue.mark_stale_probability(Uuid::new_v4());
        assert!(queue.has_changes());

        queue.clear();
        assert!(!queue.has_changes());
        assert!(queue.stale_probability_rows().is_empty());
    }

    #[test]
    fn test_owner_ordering_is_deterministic() {
        let mut queue = SessionQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        queue.mark_utility(a);
        queue.mark_uncertainty(b);

        let owners: Vec<_> = queue.owners().collect();
        // Uncertainty variants sort before utility variants.
        assert_eq!(owners[0], DerivedTableOwner::Uncertainty(b));
        assert_eq!(owners[1], DerivedTableOwner::Utility(a));
    }
}
