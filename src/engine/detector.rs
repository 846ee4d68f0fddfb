//! Change detection over the pending mutation set.
//!
//! Runs before the mutation set is flushed, classifies each tracked
//! change against the fixed table-relevance predicates, resolves the
//! impacted derived-table owners through one-hop lookups, and writes them
//! into the session queue. Resolution is null-safe throughout: dangling
//! nodes, issues, or payloads are skipped, never an error.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;
use uuid::Uuid;

use super::change_set::{ChangeSet, EntityChange, EntityState};
use super::queue::{DerivedTableOwner, SessionQueue};
use crate::error::EngineResult;
use crate::model::{Boundary, IssueKind};
use crate::storage::{DiagramStore, IssueSummary};

/// Scan the pending changes and enqueue every impacted owner.
pub(crate) async fn scan<S: DiagramStore + ?Sized>(
    changes: &ChangeSet,
    store: &mut S,
    queue: &mut SessionQueue,
) -> EngineResult<()> {
    // Node ids whose issues own a table that must be rebuilt.
    let mut head_nodes: BTreeSet<Uuid> = BTreeSet::new();
    // Rewired-edge bookkeeping: old/new tail node -> the edge's current head.
    let mut tail_to_head: BTreeMap<Uuid, Uuid> = BTreeMap::new();
    // Issues that become re-derivation roots (own table plus one hop down).
    let mut roots: BTreeSet<Uuid> = BTreeSet::new();
    let mut added_option_decisions: BTreeSet<Uuid> = BTreeSet::new();
    let mut added_outcome_uncertainties: BTreeSet<Uuid> = BTreeSet::new();

    for change in changes.iter() {
        match change {
            EntityChange::Edge(tracked) => match tracked.state {
                EntityState::Added | EntityState::Deleted => {
                    head_nodes.insert(tracked.current.head_id);
                }
                EntityState::Modified => {
                    let Some(original) = &tracked.original else {
                        continue;
                    };
                    if original.head_id != tracked.current.head_id {
                        head_nodes.insert(original.head_id);
                        head_nodes.insert(tracked.current.head_id);
                    }
                    if original.tail_id != tracked.current.tail_id {
                        tail_to_head.insert(original.tail_id, tracked.current.head_id);
                        tail_to_head.insert(tracked.current.tail_id, tracked.current.head_id);
                        head_nodes.insert(tracked.current.head_id);
                    }
                }
            },
            EntityChange::Issue(tracked) if tracked.state == EntityState::Modified => {
                let Some(original) = &tracked.original else {
                    continue;
                };
                let current = &tracked.current;
                let boundary_changed = original.boundary != current.boundary;
                if boundary_changed
                    && (original.boundary == Boundary::Out || current.boundary == Boundary::Out)
                {
                    roots.insert(current.id);
                }
                if boundary_changed && original.boundary == Boundary::In {
                    queue.mark_for_strategy_pruning(current.id);
                }
                let kind_changed = original.kind != current.kind;
                if kind_changed
                    && (crosses_table_kind(original.kind) || crosses_table_kind(current.kind))
                {
                    roots.insert(current.id);
                }
                if kind_changed && original.kind == IssueKind::Decision {
                    queue.mark_for_strategy_pruning(current.id);
                }
            }
            EntityChange::Uncertainty(tracked) if tracked.state == EntityState::Modified => {
                let Some(original) = &tracked.original else {
                    continue;
                };
                if original.is_key != tracked.current.is_key {
                    roots.insert(tracked.current.issue_id);
                }
            }
            EntityChange::Decision(tracked) if tracked.state == EntityState::Modified => {
                let Some(original) = &tracked.original else {
                    continue;
                };
                let hierarchy_changed = original.hierarchy != tracked.current.hierarchy;
                if hierarchy_changed
                    && (original.hierarchy.is_focus() || tracked.current.hierarchy.is_focus())
                {
                    roots.insert(tracked.current.issue_id);
                }
                if hierarchy_changed && original.hierarchy.is_focus() {
                    queue.mark_for_strategy_pruning(tracked.current.issue_id);
                }
            }
            EntityChange::DecisionOption(tracked) if tracked.state == EntityState::Added => {
                added_option_decisions.insert(tracked.current.decision_id);
            }
            EntityChange::Outcome(tracked) if tracked.state == EntityState::Added => {
                added_outcome_uncertainties.insert(tracked.current.uncertainty_id);
            }
            EntityChange::ProbabilityParentOption(tracked)
                if tracked.state == EntityState::Deleted =>
            {
                queue.mark_stale_probability(tracked.current.discrete_probability_id);
            }
            EntityChange::ProbabilityParentOutcome(tracked)
                if tracked.state == EntityState::Deleted =>
            {
                queue.mark_stale_probability(tracked.current.discrete_probability_id);
            }
            EntityChange::UtilityParentOption(tracked)
                if tracked.state == EntityState::Deleted =>
            {
                queue.mark_stale_utility(tracked.current.discrete_utility_id);
            }
            EntityChange::UtilityParentOutcome(tracked)
                if tracked.state == EntityState::Deleted =>
            {
                queue.mark_stale_utility(tracked.current.discrete_utility_id);
            }
            _ => {}
        }
    }

    if !head_nodes.is_empty() || !tail_to_head.is_empty() {
        resolve_nodes(store, queue, &head_nodes, &tail_to_head).await?;
    }

    if !added_option_decisions.is_empty() {
        let decision_ids: Vec<Uuid> = added_option_decisions.into_iter().collect();
        roots.extend(store.decision_issue_ids(&decision_ids).await?);
    }
    if !added_outcome_uncertainties.is_empty() {
        let uncertainty_ids: Vec<Uuid> = added_outcome_uncertainties.into_iter().collect();
        roots.extend(store.uncertainty_issue_ids(&uncertainty_ids).await?);
    }

    if !roots.is_empty() {
        let root_ids: Vec<Uuid> = roots.into_iter().collect();
        resolve_roots(store, queue, &root_ids).await?;
    }

    debug!(
        owners = queue.owners().count(),
        stale_probability_rows = queue.stale_probability_rows().len(),
        stale_utility_rows = queue.stale_utility_rows().len(),
        "change detection complete"
    );

    Ok(())
}

/// Treat each issue as a re-derivation root: mark its own table (if any)
/// and every head issue one hop downstream.
pub(crate) async fn resolve_roots<S: DiagramStore + ?Sized>(
    store: &mut S,
    queue: &mut SessionQueue,
    issue_ids: &[Uuid],
) -> EngineResult<()> {
    for summary in store.issue_summaries(issue_ids).await? {
        mark_owner(queue, &summary);
    }
    for summary in store.downstream_head_issues(issue_ids).await? {
        mark_owner(queue, &summary);
    }
    Ok(())
}

/// Mark an issue's derived-table owner, if it has one.
pub(crate) fn mark_owner(queue: &mut SessionQueue, issue: &IssueSummary) {
    if let Some(owner) = DerivedTableOwner::for_issue(issue) {
        queue.mark_owner(owner);
    }
}

/// Resolve edge-endpoint node ids to owners. Rewired tails only count
/// when the tail can actually contribute a dimension.
async fn resolve_nodes<S: DiagramStore + ?Sized>(
    store: &mut S,
    queue: &mut SessionQueue,
    head_nodes: &BTreeSet<Uuid>,
    tail_to_head: &BTreeMap<Uuid, Uuid>,
) -> EngineResult<()> {
    let mut node_ids: BTreeSet<Uuid> = head_nodes.clone();
    for (tail, head) in tail_to_head {
        node_ids.insert(*tail);
        node_ids.insert(*head);
    }

    let lookup_ids: Vec<Uuid> = node_ids.into_iter().collect();
    let nodes = store.node_issues(&lookup_ids).await?;
    let node_map: HashMap<Uuid, _> = nodes.into_iter().map(|n| (n.id, n)).collect();

    let mut resolved_heads = head_nodes.clone();
    for (tail, head) in tail_to_head {
        let Some(tail_node) = node_map.get(tail) else {
            continue;
        };
        if tail_node.is_dimension_contributor() {
            resolved_heads.insert(*head);
        }
    }

    for head in resolved_heads {
        if let Some(node) = node_map.get(&head) {
            if let Some(issue) = &node.issue {
                mark_owner(queue, issue);
            }
        }
    }

    Ok(())
}

fn crosses_table_kind(kind: IssueKind) -> bool {
    matches!(kind, IssueKind::Uncertainty | IssueKind::Decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::change_set::Tracked;
    use crate::model::{
        Boundary, Decision, DecisionHierarchy, DecisionOption, Edge, Issue, Outcome,
        ProbabilityParentOutcome, Uncertainty, UtilityParentOption,
    };
    use crate::storage::{MockDiagramStore, NodeSummary, UncertaintySummary};

    fn uncertainty_issue(issue_id: Uuid, uncertainty_id: Uuid) -> IssueSummary {
        IssueSummary {
            id: issue_id,
            kind: IssueKind::Uncertainty,
            boundary: Boundary::In,
            uncertainty: Some(UncertaintySummary {
                id: uncertainty_id,
                is_key: true,
            }),
            decision: None,
            utility_id: None,
        }
    }

    fn utility_issue(issue_id: Uuid, utility_id: Uuid) -> IssueSummary {
        IssueSummary {
            id: issue_id,
            kind: IssueKind::Utility,
            boundary: Boundary::In,
            uncertainty: None,
            decision: None,
            utility_id: Some(utility_id),
        }
    }

    #[tokio::test]
    async fn test_deleted_edge_marks_head_owner() {
        let project = Uuid::new_v4();
        let head_node = Uuid::new_v4();
        let issue_id = Uuid::new_v4();
        let uncertainty_id = Uuid::new_v4();

        let mut changes = ChangeSet::new();
        changes.push(EntityChange::Edge(Tracked::deleted(Edge::new(
            project,
            Uuid::new_v4(),
            head_node,
        ))));

        let mut store = MockDiagramStore::new();
        store.expect_node_issues().returning(move |_| {
            Ok(vec![NodeSummary {
                id: head_node,
                issue: Some(uncertainty_issue(issue_id, uncertainty_id)),
            }])
        });

        let mut queue = SessionQueue::new();
        scan(&changes, &mut store, &mut queue).await.unwrap();

        let owners: Vec<_> = queue.owners().collect();
        assert_eq!(owners, vec![DerivedTableOwner::Uncertainty(uncertainty_id)]);
    }

    #[tokio::test]
    async fn test_deleted_junction_marks_stale_row() {
        let probability_id = Uuid::new_v4();
        let utility_row_id = Uuid::new_v4();

        let mut changes = ChangeSet::new();
        changes.push(EntityChange::ProbabilityParentOutcome(Tracked::deleted(
            ProbabilityParentOutcome {
                discrete_probability_id: probability_id,
                parent_outcome_id: Uuid::new_v4(),
            },
        )));
        changes.push(EntityChange::UtilityParentOption(Tracked::deleted(
            UtilityParentOption {
                discrete_utility_id: utility_row_id,
                parent_option_id: Uuid::new_v4(),
            },
        )));

        let mut store = MockDiagramStore::new();
        let mut queue = SessionQueue::new();
        scan(&changes, &mut store, &mut queue).await.unwrap();

        assert_eq!(queue.stale_probability_rows(), vec![probability_id]);
        assert_eq!(queue.stale_utility_rows(), vec![utility_row_id]);
    }

    #[tokio::test]
    async fn test_boundary_crossing_out_is_a_root() {
        let issue_id = Uuid::new_v4();
        let downstream_utility = Uuid::new_v4();

        let mut original = Issue::new(Uuid::new_v4(), "price").with_kind(IssueKind::Uncertainty);
        original.id = issue_id;
        let mut moved = original.clone();
        moved.boundary = Boundary::Out;

        let mut changes = ChangeSet::new();
        changes.push(EntityChange::Issue(Tracked::modified(original, moved)));

        let own_uncertainty = Uuid::new_v4();
        let mut store = MockDiagramStore::new();
        store
            .expect_issue_summaries()
            .returning(move |_| Ok(vec![uncertainty_issue(issue_id, own_uncertainty)]));
        store
            .expect_downstream_head_issues()
            .returning(move |_| Ok(vec![utility_issue(Uuid::new_v4(), downstream_utility)]));

        let mut queue = SessionQueue::new();
        scan(&changes, &mut store, &mut queue).await.unwrap();

        let owners: Vec<_> = queue.owners().collect();
        assert!(owners.contains(&DerivedTableOwner::Uncertainty(own_uncertainty)));
        assert!(owners.contains(&DerivedTableOwner::Utility(downstream_utility)));
        // Leaving `In` also queues strategy pruning.
        assert_eq!(queue.prune_issues().collect::<Vec<_>>(), vec![issue_id]);
    }

    #[tokio::test]
    async fn test_name_only_issue_change_is_ignored() {
        let original = Issue::new(Uuid::new_v4(), "price");
        let mut renamed = original.clone();
        renamed.name = "cost".to_string();

        let mut changes = ChangeSet::new();
        changes.push(EntityChange::Issue(Tracked::modified(original, renamed)));

        let mut store = MockDiagramStore::new();
        let mut queue = SessionQueue::new();
        scan(&changes, &mut store, &mut queue).await.unwrap();

        assert!(!queue.has_changes());
    }

    #[tokio::test]
    async fn test_is_key_change_resolves_through_issue() {
        let issue_id = Uuid::new_v4();
        let uncertainty = Uncertainty::new(issue_id);
        let toggled = uncertainty.clone().with_is_key(false);

        let mut changes = ChangeSet::new();
        changes.push(EntityChange::Uncertainty(Tracked::modified(
            uncertainty.clone(),
            toggled,
        )));

        let downstream = Uuid::new_v4();
        let own = uncertainty.id;
        let mut store = MockDiagramStore::new();
        store
            .expect_issue_summaries()
            .withf(move |ids| ids == [issue_id])
            .returning(move |_| Ok(vec![uncertainty_issue(issue_id, own)]));
        store
            .expect_downstream_head_issues()
            .returning(move |_| Ok(vec![utility_issue(Uuid::new_v4(), downstream)]));

        let mut queue = SessionQueue::new();
        scan(&changes, &mut store, &mut queue).await.unwrap();

        let owners: Vec<_> = queue.owners().collect();
        assert!(owners.contains(&DerivedTableOwner::Uncertainty(own)));
        assert!(owners.contains(&DerivedTableOwner::Utility(downstream)));
    }

    #[tokio::test]
    async fn test_decision_leaving_focus_queues_pruning() {
        let issue_id = Uuid::new_v4();
        let decision = Decision::new(issue_id).with_hierarchy(DecisionHierarchy::Focus);
        let demoted = decision.clone().with_hierarchy(DecisionHierarchy::Policy);

        let mut changes = ChangeSet::new();
        changes.push(EntityChange::Decision(Tracked::modified(decision, demoted)));

        let mut store = MockDiagramStore::new();
        store.expect_issue_summaries().returning(|_| Ok(vec![]));
        store
            .expect_downstream_head_issues()
            .returning(|_| Ok(vec![]));

        let mut queue = SessionQueue::new();
        scan(&changes, &mut store, &mut queue).await.unwrap();

        assert_eq!(queue.prune_issues().collect::<Vec<_>>(), vec![issue_id]);
    }

    #[tokio::test]
    async fn test_rewired_tail_requires_dimension_contributor() {
        let project = Uuid::new_v4();
        let old_tail = Uuid::new_v4();
        let new_tail = Uuid::new_v4();
        let head = Uuid::new_v4();
        let head_issue = Uuid::new_v4();
        let head_utility = Uuid::new_v4();

        let original = Edge::new(project, old_tail, head);
        let mut rewired = original.clone();
        rewired.tail_id = new_tail;

        let mut changes = ChangeSet::new();
        changes.push(EntityChange::Edge(Tracked::modified(original, rewired)));

        let mut store = MockDiagramStore::new();
        store.expect_node_issues().returning(move |_| {
            Ok(vec![
                // Old tail is a fact: contributes nothing.
                NodeSummary {
                    id: old_tail,
                    issue: Some(IssueSummary {
                        id: Uuid::new_v4(),
                        kind: IssueKind::Fact,
                        boundary: Boundary::In,
                        uncertainty: None,
                        decision: None,
                        utility_id: None,
                    }),
                },
                // New tail is a key uncertainty.
                NodeSummary {
                    id: new_tail,
                    issue: Some(uncertainty_issue(Uuid::new_v4(), Uuid::new_v4())),
                },
                NodeSummary {
                    id: head,
                    issue: Some(utility_issue(head_issue, head_utility)),
                },
            ])
        });

        let mut queue = SessionQueue::new();
        scan(&changes, &mut store, &mut queue).await.unwrap();

        let owners: Vec<_> = queue.owners().collect();
        assert_eq!(owners, vec![DerivedTableOwner::Utility(head_utility)]);
    }

    #[tokio::test]
    async fn test_added_option_and_outcome_resolve_owners() {
        let decision = Decision::new(Uuid::new_v4());
        let uncertainty = Uncertainty::new(Uuid::new_v4());

        let mut changes = ChangeSet::new();
        changes.push(EntityChange::DecisionOption(Tracked::added(
            DecisionOption::new(decision.id, "expand"),
        )));
        changes.push(EntityChange::Outcome(Tracked::added(Outcome::new(
            uncertainty.id,
            "high",
        ))));

        let decision_issue = decision.issue_id;
        let uncertainty_issue_id = uncertainty.issue_id;
        let own_uncertainty = uncertainty.id;
        let downstream = Uuid::new_v4();

        let mut store = MockDiagramStore::new();
        store
            .expect_decision_issue_ids()
            .returning(move |_| Ok(vec![decision_issue]));
        store
            .expect_uncertainty_issue_ids()
            .returning(move |_| Ok(vec![uncertainty_issue_id]));
        store.expect_issue_summaries().returning(move |ids| {
            // The decision issue owns no table; the uncertainty issue does.
            let mut found = Vec::new();
            if ids.contains(&uncertainty_issue_id) {
                found.push(uncertainty_issue(uncertainty_issue_id, own_uncertainty));
            }
            Ok(found)
        });
        store
            .expect_downstream_head_issues()
            .returning(move |_| Ok(vec![utility_issue(Uuid::new_v4(), downstream)]));

        let mut queue = SessionQueue::new();
        scan(&changes, &mut store, &mut queue).await.unwrap();

        let owners: Vec<_> = queue.owners().collect();
        assert!(owners.contains(&DerivedTableOwner::Uncertainty(own_uncertainty)));
        assert!(owners.contains(&DerivedTableOwner::Utility(downstream)));
    }
}
