//! Integration tests for the SQLite storage layer
//!
//! Exercises entity flushing, the lookup queries the engine depends on,
//! and derived-row persistence against an in-memory database.

use uuid::Uuid;

use influence_tables::engine::{EntityChange, Tracked};
use influence_tables::error::EngineError;
use influence_tables::model::{
    Boundary, Decision, DecisionHierarchy, DecisionOption, DiscreteProbability, Edge, Issue,
    IssueKind, Node, Outcome, ProbabilityParentOption, Strategy, StrategyOption, Uncertainty,
    Utility, DEFAULT_VALUE_METRIC_ID,
};
use influence_tables::storage::{DiagramStore, SqliteDiagramStore};

async fn create_test_store() -> SqliteDiagramStore {
    SqliteDiagramStore::new_in_memory()
        .await
        .expect("Failed to create in-memory store")
}

#[cfg(test)]
mod entity_tests {
    use super::*;

    #[tokio::test]
    async fn test_issue_round_trip_through_summary() {
        let store = create_test_store().await;
        let project = Uuid::new_v4();
        let issue = Issue::new(project, "market size")
            .with_kind(IssueKind::Uncertainty)
            .with_boundary(Boundary::On)
            .with_description("total addressable market");
        let uncertainty = Uncertainty::new(issue.id).with_is_key(false);

        let mut uow = store.unit_of_work().await.unwrap();
        uow.add_issue(issue.clone());
        uow.add_uncertainty(uncertainty.clone());
        uow.save_changes().await.unwrap();
        uow.into_store().commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let summaries = tx.issue_summaries(&[issue.id]).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.id, issue.id);
        assert_eq!(summary.kind, IssueKind::Uncertainty);
        assert_eq!(summary.boundary, Boundary::On);
        let payload = summary.uncertainty.expect("uncertainty payload");
        assert_eq!(payload.id, uncertainty.id);
        assert!(!payload.is_key);
        assert!(summary.decision.is_none());
        assert!(summary.utility_id.is_none());
    }

    #[tokio::test]
    async fn test_issue_update_is_persisted() {
        let store = create_test_store().await;
        let issue = Issue::new(Uuid::new_v4(), "scope");

        let mut uow = store.unit_of_work().await.unwrap();
        uow.add_issue(issue.clone());
        uow.save_changes().await.unwrap();
        uow.into_store().commit().await.unwrap();

        let moved = issue.clone().with_boundary(Boundary::Out);
        let mut uow = store.unit_of_work().await.unwrap();
        uow.update_issue(issue.clone(), moved);
        uow.save_changes().await.unwrap();
        uow.into_store().commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let summaries = tx.issue_summaries(&[issue.id]).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(summaries[0].boundary, Boundary::Out);
    }

    #[tokio::test]
    async fn test_missing_ids_are_absent_from_lookups() {
        let store = create_test_store().await;

        let mut tx = store.begin().await.unwrap();
        let summaries = tx.issue_summaries(&[Uuid::new_v4()]).await.unwrap();
        let nodes = tx.node_issues(&[Uuid::new_v4()]).await.unwrap();
        tx.commit().await.unwrap();

        assert!(summaries.is_empty());
        assert!(nodes.is_empty());
    }

    #[tokio::test]
    async fn test_modified_junction_is_rejected() {
        let store = create_test_store().await;
        let junction = ProbabilityParentOption {
            discrete_probability_id: Uuid::new_v4(),
            parent_option_id: Uuid::new_v4(),
        };

        let mut uow = store.unit_of_work().await.unwrap();
        uow.track(EntityChange::ProbabilityParentOption(Tracked::modified(
            junction.clone(),
            junction,
        )));
        let err = uow.save_changes().await.unwrap_err();
        assert!(matches!(err, EngineError::ImmutableJunction { .. }));
    }
}

#[cfg(test)]
mod lookup_tests {
    use super::*;

    #[tokio::test]
    async fn test_downstream_head_issues_walk_one_hop() {
        let store = create_test_store().await;
        let project = Uuid::new_v4();

        let parent_issue = Issue::new(project, "demand").with_kind(IssueKind::Uncertainty);
        let parent_node = Node::new(project, parent_issue.id);
        let parent_uncertainty = Uncertainty::new(parent_issue.id);

        let head_issue = Issue::new(project, "profit").with_kind(IssueKind::Utility);
        let head_node = Node::new(project, head_issue.id);
        let head_utility = Utility::new(head_issue.id);

        let far_issue = Issue::new(project, "npv").with_kind(IssueKind::Utility);
        let far_node = Node::new(project, far_issue.id);
        let far_utility = Utility::new(far_issue.id);

        let mut uow = store.unit_of_work().await.unwrap();
        uow.add_issue(parent_issue.clone());
        uow.add_node(parent_node.clone());
        uow.add_uncertainty(parent_uncertainty.clone());
        uow.add_issue(head_issue.clone());
        uow.add_node(head_node.clone());
        uow.add_utility(head_utility.clone());
        uow.add_issue(far_issue.clone());
        uow.add_node(far_node.clone());
        uow.add_utility(far_utility.clone());
        uow.add_edge(Edge::new(project, parent_node.id, head_node.id));
        uow.add_edge(Edge::new(project, head_node.id, far_node.id));
        uow.save_changes().await.unwrap();
        uow.into_store().commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let heads = tx.downstream_head_issues(&[parent_issue.id]).await.unwrap();
        tx.commit().await.unwrap();

        // One hop only: the far utility is not reachable.
        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].id, head_issue.id);
        assert_eq!(heads[0].utility_id, Some(head_utility.id));
    }

    #[tokio::test]
    async fn test_uncertainty_context_carries_sorted_children() {
        let store = create_test_store().await;
        let project = Uuid::new_v4();

        let parent_issue = Issue::new(project, "demand").with_kind(IssueKind::Decision);
        let parent_node = Node::new(project, parent_issue.id);
        let parent_decision =
            Decision::new(parent_issue.id).with_hierarchy(DecisionHierarchy::Focus);
        let option_a = DecisionOption::new(parent_decision.id, "expand");
        let option_b = DecisionOption::new(parent_decision.id, "hold");

        let own_issue = Issue::new(project, "revenue").with_kind(IssueKind::Uncertainty);
        let own_node = Node::new(project, own_issue.id);
        let own_uncertainty = Uncertainty::new(own_issue.id);
        let outcome_a = Outcome::new(own_uncertainty.id, "high");
        let outcome_b = Outcome::new(own_uncertainty.id, "low");

        let mut uow = store.unit_of_work().await.unwrap();
        uow.add_issue(parent_issue.clone());
        uow.add_node(parent_node.clone());
        uow.add_decision(parent_decision.clone());
        uow.add_decision_option(option_a.clone());
        uow.add_decision_option(option_b.clone());
        uow.add_issue(own_issue.clone());
        uow.add_node(own_node.clone());
        uow.add_uncertainty(own_uncertainty.clone());
        uow.add_outcome(outcome_a.clone());
        uow.add_outcome(outcome_b.clone());
        uow.add_edge(Edge::new(project, parent_node.id, own_node.id));
        uow.save_changes().await.unwrap();
        uow.into_store().commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let context = tx
            .uncertainty_context(own_uncertainty.id)
            .await
            .unwrap()
            .expect("context");
        tx.commit().await.unwrap();

        assert_eq!(context.issue_id, own_issue.id);
        assert_eq!(context.outcome_ids.len(), 2);
        let mut expected_outcomes = vec![outcome_a.id, outcome_b.id];
        expected_outcomes.sort_by_key(|id| id.to_string());
        assert_eq!(
            context.outcome_ids,
            expected_outcomes,
            "own outcomes come back ordered by id"
        );

        assert_eq!(context.parents.len(), 1);
        let parent = &context.parents[0];
        assert_eq!(parent.tail_node_id, parent_node.id);
        assert_eq!(parent.issue.id, parent_issue.id);
        assert_eq!(parent.option_ids.len(), 2);
        assert!(parent.outcome_ids.is_empty());
    }

    #[tokio::test]
    async fn test_context_is_none_for_missing_owner() {
        let store = create_test_store().await;

        let mut tx = store.begin().await.unwrap();
        assert!(tx.uncertainty_context(Uuid::new_v4()).await.unwrap().is_none());
        assert!(tx.utility_context(Uuid::new_v4()).await.unwrap().is_none());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_strategy_links_resolve_through_decisions() {
        let store = create_test_store().await;
        let project = Uuid::new_v4();

        let issue = Issue::new(project, "investment").with_kind(IssueKind::Decision);
        let decision = Decision::new(issue.id).with_hierarchy(DecisionHierarchy::Focus);
        let option = DecisionOption::new(decision.id, "expand");
        let strategy = Strategy::new(project, "aggressive").with_rationale("growth first");

        let mut uow = store.unit_of_work().await.unwrap();
        uow.add_issue(issue.clone());
        uow.add_decision(decision.clone());
        uow.add_decision_option(option.clone());
        uow.add_strategy(strategy.clone());
        uow.add_strategy_link(StrategyOption::new(strategy.id, option.id));
        uow.save_changes().await.unwrap();
        uow.into_store().commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let links = tx.strategy_links_for_issues(&[issue.id]).await.unwrap();
        let removed = tx.delete_strategy_links(&links).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(links.len(), 1);
        assert_eq!(removed, 1);
        assert!(store.strategy_links_for(strategy.id).await.unwrap().is_empty());
    }
}

#[cfg(test)]
mod derived_row_tests {
    use super::*;

    #[tokio::test]
    async fn test_inserted_probability_rows_round_trip_with_junctions() {
        let store = create_test_store().await;
        let uncertainty_id = Uuid::new_v4();
        let outcome_id = Uuid::new_v4();
        let parent_option = Uuid::new_v4();
        let parent_outcome = Uuid::new_v4();

        let row = DiscreteProbability::generated(uncertainty_id, outcome_id)
            .with_parent_options(vec![parent_option])
            .with_parent_outcomes(vec![parent_outcome]);

        let mut tx = store.begin().await.unwrap();
        tx.insert_probability_rows(std::slice::from_ref(&row))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let rows = store.probabilities_for(uncertainty_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, row.id);
        assert_eq!(rows[0].outcome_id, outcome_id);
        assert_eq!(rows[0].parent_option_ids, vec![parent_option]);
        assert_eq!(rows[0].parent_outcome_ids, vec![parent_outcome]);
    }

    #[tokio::test]
    async fn test_clear_probabilities_removes_rows_and_junctions() {
        let store = create_test_store().await;
        let uncertainty_id = Uuid::new_v4();

        let rows: Vec<DiscreteProbability> = (0..3)
            .map(|_| {
                DiscreteProbability::generated(uncertainty_id, Uuid::new_v4())
                    .with_parent_options(vec![Uuid::new_v4()])
            })
            .collect();

        let mut tx = store.begin().await.unwrap();
        tx.insert_probability_rows(&rows).await.unwrap();
        let cleared = tx.clear_probabilities(uncertainty_id).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(cleared, 3);
        assert!(store.probabilities_for(uncertainty_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_probability_rows_is_selective() {
        let store = create_test_store().await;
        let uncertainty_id = Uuid::new_v4();

        let keep = DiscreteProbability::generated(uncertainty_id, Uuid::new_v4());
        let drop = DiscreteProbability::generated(uncertainty_id, Uuid::new_v4());

        let mut tx = store.begin().await.unwrap();
        tx.insert_probability_rows(&[keep.clone(), drop.clone()])
            .await
            .unwrap();
        let removed = tx.delete_probability_rows(&[drop.id]).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(removed, 1);
        let remaining = store.probabilities_for(uncertainty_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, keep.id);
    }

    #[tokio::test]
    async fn test_utility_rows_carry_default_value_metric() {
        let store = create_test_store().await;
        let utility_id = Uuid::new_v4();

        let row = influence_tables::model::DiscreteUtility::generated(utility_id)
            .with_parent_outcomes(vec![Uuid::new_v4()]);

        let mut tx = store.begin().await.unwrap();
        tx.insert_utility_rows(std::slice::from_ref(&row)).await.unwrap();
        tx.commit().await.unwrap();

        let rows = store.utility_rows_for(utility_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value_metric_id, DEFAULT_VALUE_METRIC_ID);
        assert_eq!(rows[0].value, 0.0);
    }

    #[tokio::test]
    async fn test_rollback_discards_the_save_cycle() {
        let store = create_test_store().await;
        let issue = Issue::new(Uuid::new_v4(), "scope");

        let mut uow = store.unit_of_work().await.unwrap();
        uow.add_issue(issue.clone());
        uow.save_changes().await.unwrap();
        uow.into_store().rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let summaries = tx.issue_summaries(&[issue.id]).await.unwrap();
        tx.commit().await.unwrap();
        assert!(summaries.is_empty());
    }
}

#[cfg(test)]
mod file_backed_tests {
    use super::*;
    use influence_tables::config::DatabaseConfig;

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = DatabaseConfig {
            path: dir.path().join("diagram.db"),
            max_connections: 2,
        };

        let issue = Issue::new(Uuid::new_v4(), "durable");
        {
            let store = SqliteDiagramStore::new(&config).await.unwrap();
            let mut uow = store.unit_of_work().await.unwrap();
            uow.add_issue(issue.clone());
            uow.save_changes().await.unwrap();
            uow.into_store().commit().await.unwrap();
        }

        let reopened = SqliteDiagramStore::new(&config).await.unwrap();
        let mut tx = reopened.begin().await.unwrap();
        let summaries = tx.issue_summaries(&[issue.id]).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, issue.id);
    }
}
