//! Full delete-and-regenerate of derived tables.
//!
//! Consumes the session queue once per save cycle: stale rows are purged
//! first (pure deletes, independent of any reload), then every affected
//! owner's table is rebuilt from its current parent chain, then
//! strategy-option links of issues that left scope are pruned. Row ids
//! are freshly minted on every rebuild; previously edited values are
//! deliberately not preserved.

use std::collections::HashSet;

use tracing::debug;
use uuid::Uuid;

use super::queue::{DerivedTableOwner, SessionQueue};
use crate::error::EngineResult;
use crate::model::{DiscreteProbability, DiscreteUtility, IssueKind};
use crate::storage::{DiagramStore, ParentLink, UncertaintyContext, UtilityContext};

/// Summary of one recalculation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecalcReport {
    /// Stale probability rows purged before rebuilding.
    pub purged_probability_rows: u64,
    /// Stale utility rows purged before rebuilding.
    pub purged_utility_rows: u64,
    /// Derived tables rebuilt.
    pub rebuilt_tables: usize,
    /// Probability rows regenerated.
    pub probability_rows: usize,
    /// Utility rows regenerated.
    pub utility_rows: usize,
    /// Strategy-option links removed for out-of-scope decisions.
    pub pruned_strategy_links: u64,
}

/// One qualifying parent dimension, already filtered and sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Dimension {
    /// Option ids of a focus decision.
    Options(Vec<Uuid>),
    /// Outcome ids of a key uncertainty.
    Outcomes(Vec<Uuid>),
}

impl Dimension {
    fn members(&self) -> &[Uuid] {
        match self {
            Dimension::Options(ids) | Dimension::Outcomes(ids) => ids,
        }
    }
}

/// Drain the queue: purge, rebuild, prune.
pub(crate) async fn run<S: DiagramStore + ?Sized>(
    store: &mut S,
    queue: &SessionQueue,
) -> EngineResult<RecalcReport> {
    let mut report = RecalcReport::default();

    let stale_probabilities = queue.stale_probability_rows();
    if !stale_probabilities.is_empty() {
        report.purged_probability_rows = store.delete_probability_rows(&stale_probabilities).await?;
    }
    let stale_utilities = queue.stale_utility_rows();
    if !stale_utilities.is_empty() {
        report.purged_utility_rows = store.delete_utility_rows(&stale_utilities).await?;
    }

    for owner in queue.owners() {
        match owner {
            DerivedTableOwner::Uncertainty(id) => {
                report.probability_rows += rebuild_uncertainty(store, id).await?;
            }
            DerivedTableOwner::Utility(id) => {
                report.utility_rows += rebuild_utility(store, id).await?;
            }
        }
        report.rebuilt_tables += 1;
    }

    let prune_issues: Vec<Uuid> = queue.prune_issues().collect();
    if !prune_issues.is_empty() {
        let links = store.strategy_links_for_issues(&prune_issues).await?;
        if !links.is_empty() {
            report.pruned_strategy_links = store.delete_strategy_links(&links).await?;
        }
    }

    debug!(
        rebuilt_tables = report.rebuilt_tables,
        probability_rows = report.probability_rows,
        utility_rows = report.utility_rows,
        pruned_strategy_links = report.pruned_strategy_links,
        "recalculation pass complete"
    );

    Ok(report)
}

/// Rebuild one uncertainty's probability table. Missing owners are
/// skipped null-safely.
async fn rebuild_uncertainty<S: DiagramStore + ?Sized>(
    store: &mut S,
    uncertainty_id: Uuid,
) -> EngineResult<usize> {
    let Some(context) = store.uncertainty_context(uncertainty_id).await? else {
        return Ok(0);
    };

    store.clear_probabilities(uncertainty_id).await?;

    let dimensions = qualifying_dimensions(&context.parents);
    let rows = probability_rows(&context, &dimensions);
    if !rows.is_empty() {
        store.insert_probability_rows(&rows).await?;
    }

    Ok(rows.len())
}

/// Rebuild one utility's table. Missing owners are skipped null-safely.
async fn rebuild_utility<S: DiagramStore + ?Sized>(
    store: &mut S,
    utility_id: Uuid,
) -> EngineResult<usize> {
    let Some(context) = store.utility_context(utility_id).await? else {
        return Ok(0);
    };

    store.clear_utility_rows(utility_id).await?;

    let dimensions = qualifying_dimensions(&context.parents);
    let rows = utility_rows(&context, &dimensions);
    if !rows.is_empty() {
        store.insert_utility_rows(&rows).await?;
    }

    Ok(rows.len())
}

/// Collapse duplicate edges and keep only qualifying parents: in-scope
/// key uncertainties (outcome dimension) and in-scope focus decisions
/// (option dimension). Dimensions are ordered by parent issue id and
/// members are sorted, so output is deterministic.
pub(crate) fn qualifying_dimensions(parents: &[ParentLink]) -> Vec<Dimension> {
    let mut seen_tails: HashSet<Uuid> = HashSet::new();
    let mut keyed: Vec<(Uuid, Dimension)> = Vec::new();

    for link in parents {
        if !seen_tails.insert(link.tail_node_id) {
            continue;
        }
        if !link.issue.boundary.in_scope() {
            continue;
        }
        match link.issue.kind {
            IssueKind::Uncertainty => {
                if link.issue.uncertainty.is_some_and(|u| u.is_key) {
                    let mut ids = link.outcome_ids.clone();
                    ids.sort();
                    keyed.push((link.issue.id, Dimension::Outcomes(ids)));
                }
            }
            IssueKind::Decision => {
                if link.issue.decision.is_some_and(|d| d.hierarchy.is_focus()) {
                    let mut ids = link.option_ids.clone();
                    ids.sort();
                    keyed.push((link.issue.id, Dimension::Options(ids)));
                }
            }
            _ => {}
        }
    }

    keyed.sort_by_key(|(issue_id, _)| *issue_id);
    keyed.into_iter().map(|(_, dimension)| dimension).collect()
}

/// Cartesian product of the dimension member lists, built by repeated
/// cross-join from a single empty combination. An empty group zeroes the
/// whole product.
pub(crate) fn cross_join(groups: &[&[Uuid]]) -> Vec<Vec<Uuid>> {
    let mut results: Vec<Vec<Uuid>> = vec![Vec::new()];

    for group in groups {
        let mut next = Vec::with_capacity(results.len() * group.len());
        for existing in &results {
            for item in *group {
                let mut combination = existing.clone();
                combination.push(*item);
                next.push(combination);
            }
        }
        results = next;
    }

    results
}

/// Generate the full probability row set: own outcomes crossed with every
/// parent combination. With no qualifying parents, exactly one row per
/// own outcome.
pub(crate) fn probability_rows(
    context: &UncertaintyContext,
    dimensions: &[Dimension],
) -> Vec<DiscreteProbability> {
    if dimensions.is_empty() {
        return context
            .outcome_ids
            .iter()
            .map(|&outcome_id| DiscreteProbability::generated(context.uncertainty_id, outcome_id))
            .collect();
    }

    let groups: Vec<&[Uuid]> = dimensions.iter().map(|d| d.members()).collect();
    let combinations = cross_join(&groups);
    let (option_pool, outcome_pool) = member_pools(dimensions);

    let mut rows = Vec::with_capacity(context.outcome_ids.len() * combinations.len());
    for &outcome_id in &context.outcome_ids {
        for combination in &combinations {
            let (parent_options, parent_outcomes) =
                split_combination(combination, &option_pool, &outcome_pool);
            rows.push(
                DiscreteProbability::generated(context.uncertainty_id, outcome_id)
                    .with_parent_options(parent_options)
                    .with_parent_outcomes(parent_outcomes),
            );
        }
    }

    rows
}

/// Generate the full utility row set: one row per parent combination.
/// With no qualifying parents there are no rows at all; this asymmetry
/// with the uncertainty no-parent case is intentional.
pub(crate) fn utility_rows(
    context: &UtilityContext,
    dimensions: &[Dimension],
) -> Vec<DiscreteUtility> {
    if dimensions.is_empty() {
        return Vec::new();
    }

    let groups: Vec<&[Uuid]> = dimensions.iter().map(|d| d.members()).collect();
    let combinations = cross_join(&groups);
    let (option_pool, outcome_pool) = member_pools(dimensions);

    combinations
        .iter()
        .map(|combination| {
            let (parent_options, parent_outcomes) =
                split_combination(combination, &option_pool, &outcome_pool);
            DiscreteUtility::generated(context.utility_id)
                .with_parent_options(parent_options)
                .with_parent_outcomes(parent_outcomes)
        })
        .collect()
}

fn member_pools(dimensions: &[Dimension]) -> (HashSet<Uuid>, HashSet<Uuid>) {
    let mut option_pool = HashSet::new();
    let mut outcome_pool = HashSet::new();
    for dimension in dimensions {
        match dimension {
            Dimension::Options(ids) => option_pool.extend(ids.iter().copied()),
            Dimension::Outcomes(ids) => outcome_pool.extend(ids.iter().copied()),
        }
    }
    (option_pool, outcome_pool)
}

fn split_combination(
    combination: &[Uuid],
    option_pool: &HashSet<Uuid>,
    outcome_pool: &HashSet<Uuid>,
) -> (Vec<Uuid>, Vec<Uuid>) {
    let mut options: Vec<Uuid> = combination
        .iter()
        .copied()
        .filter(|id| option_pool.contains(id))
        .collect();
    let mut outcomes: Vec<Uuid> = combination
        .iter()
        .copied()
        .filter(|id| outcome_pool.contains(id))
        .collect();
    options.sort();
    outcomes.sort();
    (options, outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Boundary, DecisionHierarchy};
    use crate::storage::{DecisionSummary, IssueSummary, UncertaintySummary};

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    fn key_uncertainty_link(outcomes: &[Uuid], boundary: Boundary, is_key: bool) -> ParentLink {
        ParentLink {
            tail_node_id: Uuid::new_v4(),
            issue: IssueSummary {
                id: Uuid::new_v4(),
                kind: IssueKind::Uncertainty,
                boundary,
                uncertainty: Some(UncertaintySummary {
                    id: Uuid::new_v4(),
                    is_key,
                }),
                decision: None,
                utility_id: None,
            },
            option_ids: Vec::new(),
            outcome_ids: outcomes.to_vec(),
        }
    }

    fn focus_decision_link(options: &[Uuid], hierarchy: DecisionHierarchy) -> ParentLink {
        ParentLink {
            tail_node_id: Uuid::new_v4(),
            issue: IssueSummary {
                id: Uuid::new_v4(),
                kind: IssueKind::Decision,
                boundary: Boundary::In,
                uncertainty: None,
                decision: Some(DecisionSummary {
                    id: Uuid::new_v4(),
                    hierarchy,
                }),
                utility_id: None,
            },
            option_ids: options.to_vec(),
            outcome_ids: Vec::new(),
        }
    }

    #[test]
    fn test_cross_join_product_law() {
        let a = ids(2);
        let b = ids(3);
        let c = ids(4);

        let combos = cross_join(&[a.as_slice(), b.as_slice(), c.as_slice()]);
        assert_eq!(combos.len(), 2 * 3 * 4);
        assert!(combos.iter().all(|combo| combo.len() == 3));
    }

    #[test]
    fn test_cross_join_of_nothing_is_one_empty_combination() {
        let combos = cross_join(&[]);
        assert_eq!(combos, vec![Vec::<Uuid>::new()]);
    }

    #[test]
    fn test_cross_join_with_empty_group_is_empty() {
        let a = ids(3);
        let empty: Vec<Uuid> = Vec::new();
        assert!(cross_join(&[a.as_slice(), empty.as_slice()]).is_empty());
    }

    #[test]
    fn test_qualifying_dimensions_filters_scope_key_and_focus() {
        let outcomes = ids(2);
        let options = ids(3);
        let parents = vec![
            key_uncertainty_link(&outcomes, Boundary::In, true),
            key_uncertainty_link(&ids(5), Boundary::Out, true),
            key_uncertainty_link(&ids(5), Boundary::In, false),
            focus_decision_link(&options, DecisionHierarchy::Focus),
            focus_decision_link(&ids(4), DecisionHierarchy::Policy),
        ];

        let dimensions = qualifying_dimensions(&parents);
        assert_eq!(dimensions.len(), 2);
        let total: usize = dimensions.iter().map(|d| d.members().len()).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_duplicate_edges_collapse_to_one_dimension() {
        let outcomes = ids(2);
        let mut link = key_uncertainty_link(&outcomes, Boundary::In, true);
        link.tail_node_id = Uuid::new_v4();
        let duplicate = link.clone();

        let dimensions = qualifying_dimensions(&[link, duplicate]);
        assert_eq!(dimensions.len(), 1);
    }

    #[test]
    fn test_probability_rows_without_parents() {
        let context = UncertaintyContext {
            uncertainty_id: Uuid::new_v4(),
            issue_id: Uuid::new_v4(),
            outcome_ids: ids(3),
            parents: Vec::new(),
        };

        let rows = probability_rows(&context, &[]);
        assert_eq!(rows.len(), 3);
        assert!(rows
            .iter()
            .all(|row| row.parent_option_ids.is_empty() && row.parent_outcome_ids.is_empty()));
        assert!(rows.iter().all(|row| row.probability == 0.0));
    }

    #[test]
    fn test_probability_rows_product_law() {
        let outcomes = ids(3);
        let parent_outcomes = ids(2);
        let parent_options = ids(3);
        let context = UncertaintyContext {
            uncertainty_id: Uuid::new_v4(),
            issue_id: Uuid::new_v4(),
            outcome_ids: outcomes,
            parents: Vec::new(),
        };
        let dimensions = vec![
            Dimension::Outcomes(parent_outcomes.clone()),
            Dimension::Options(parent_options.clone()),
        ];

        let rows = probability_rows(&context, &dimensions);
        assert_eq!(rows.len(), 3 * 2 * 3);
        assert!(rows.iter().all(|row| row.parent_outcome_ids.len() == 1
            && row.parent_option_ids.len() == 1));

        // No two rows share the same (outcome, parent set) key.
        let keys: HashSet<(Uuid, Vec<Uuid>, Vec<Uuid>)> = rows
            .iter()
            .map(|row| {
                (
                    row.outcome_id,
                    row.parent_option_ids.clone(),
                    row.parent_outcome_ids.clone(),
                )
            })
            .collect();
        assert_eq!(keys.len(), rows.len());
    }

    #[test]
    fn test_utility_rows_zero_parent_convention() {
        let context = UtilityContext {
            utility_id: Uuid::new_v4(),
            issue_id: Uuid::new_v4(),
            parents: Vec::new(),
        };

        // Unlike uncertainties, a utility with no parents has no rows.
        assert!(utility_rows(&context, &[]).is_empty());
    }

    #[test]
    fn test_utility_rows_map_one_to_one_to_combinations() {
        let context = UtilityContext {
            utility_id: Uuid::new_v4(),
            issue_id: Uuid::new_v4(),
            parents: Vec::new(),
        };
        let dimension = ids(2);
        let rows = utility_rows(&context, &[Dimension::Outcomes(dimension.clone())]);

        assert_eq!(rows.len(), 2);
        let tagged: HashSet<Uuid> = rows
            .iter()
            .flat_map(|row| row.parent_outcome_ids.iter().copied())
            .collect();
        assert_eq!(tagged, dimension.into_iter().collect());
    }
}
