//! Resolution behind the explicit rule-trigger operations.
//!
//! Repository-level mutation code calls the trigger for changes the
//! declarative detector cannot observe structurally, e.g. options or
//! outcomes inserted as part of a larger aggregate update. Each operation
//! resolves the relevant downstream head issues (one hop via outgoing
//! edges) and merges the resulting owners into the session queue. The
//! re-entrancy guard lives on the unit of work, which no-ops these calls
//! while a recalculation is running.

use tracing::debug;
use uuid::Uuid;

use super::detector;
use super::queue::SessionQueue;
use crate::error::EngineResult;
use crate::storage::DiagramStore;

/// Options were inserted under existing decisions: rebuild everything
/// downstream of the decisions' issues.
pub(crate) async fn parent_options_added<S: DiagramStore + ?Sized>(
    store: &mut S,
    queue: &mut SessionQueue,
    decision_ids: &[Uuid],
) -> EngineResult<()> {
    if decision_ids.is_empty() {
        return Ok(());
    }
    let issue_ids = store.decision_issue_ids(decision_ids).await?;
    detector::resolve_roots(store, queue, &issue_ids).await?;
    debug!(decisions = decision_ids.len(), "options-added trigger resolved");
    Ok(())
}

/// Outcomes were inserted under existing uncertainties: rebuild their own
/// tables and everything downstream.
pub(crate) async fn parent_outcomes_added<S: DiagramStore + ?Sized>(
    store: &mut S,
    queue: &mut SessionQueue,
    uncertainty_ids: &[Uuid],
) -> EngineResult<()> {
    if uncertainty_ids.is_empty() {
        return Ok(());
    }
    let issue_ids = store.uncertainty_issue_ids(uncertainty_ids).await?;
    detector::resolve_roots(store, queue, &issue_ids).await?;
    debug!(
        uncertainties = uncertainty_ids.len(),
        "outcomes-added trigger resolved"
    );
    Ok(())
}

/// Parent issues changed in a way that affects their children: rebuild
/// every head issue one hop downstream.
pub(crate) async fn parent_issues_changed<S: DiagramStore + ?Sized>(
    store: &mut S,
    queue: &mut SessionQueue,
    issue_ids: &[Uuid],
) -> EngineResult<()> {
    if issue_ids.is_empty() {
        return Ok(());
    }
    for summary in store.downstream_head_issues(issue_ids).await? {
        detector::mark_owner(queue, &summary);
    }
    Ok(())
}

/// Edges were added or deleted outside tracked mutation: rebuild the head
/// issues' tables.
pub(crate) async fn edges_changed<S: DiagramStore + ?Sized>(
    store: &mut S,
    queue: &mut SessionQueue,
    edge_ids: &[Uuid],
) -> EngineResult<()> {
    if edge_ids.is_empty() {
        return Ok(());
    }
    for summary in store.edge_head_issues(edge_ids).await? {
        detector::mark_owner(queue, &summary);
    }
    Ok(())
}

/// Node connectivity was rewritten wholesale: rebuild the tables of the
/// nodes' own issues.
pub(crate) async fn node_connections_changed<S: DiagramStore + ?Sized>(
    store: &mut S,
    queue: &mut SessionQueue,
    node_ids: &[Uuid],
) -> EngineResult<()> {
    if node_ids.is_empty() {
        return Ok(());
    }
    for node in store.node_issues(node_ids).await? {
        if let Some(issue) = &node.issue {
            detector::mark_owner(queue, issue);
        }
    }
    Ok(())
}

/// Force the given issues' own tables into the queue, translating issue
/// ids to derived-table owners at this boundary.
pub(crate) async fn issues_marked_for_rebuild<S: DiagramStore + ?Sized>(
    store: &mut S,
    queue: &mut SessionQueue,
    issue_ids: &[Uuid],
) -> EngineResult<()> {
    if issue_ids.is_empty() {
        return Ok(());
    }
    for summary in store.issue_summaries(issue_ids).await? {
        detector::mark_owner(queue, &summary);
    }
    Ok(())
}
