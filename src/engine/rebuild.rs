//! Synchronous rebuild facade.
//!
//! Write paths that want a guaranteed rebuild before returning call this
//! directly instead of relying on the automatic detect-and-recalculate
//! pipeline. Issue ids are translated to derived-table owners here; the
//! rebuild itself is the same per-owner pass the recalculator runs.

use tracing::debug;
use uuid::Uuid;

use super::queue::{DerivedTableOwner, SessionQueue};
use super::recalc::{self, RecalcReport};
use crate::error::EngineResult;
use crate::storage::DiagramStore;

/// Rebuild the derived tables of the given issues now.
///
/// Issues without a derived table (facts, decisions, dangling ids) are
/// skipped. Returns a summary of the work done; the caller owns the
/// surrounding transaction.
pub async fn rebuild_issues<S: DiagramStore + ?Sized>(
    store: &mut S,
    issue_ids: &[Uuid],
) -> EngineResult<RecalcReport> {
    let mut queue = SessionQueue::new();
    for summary in store.issue_summaries(issue_ids).await? {
        if let Some(owner) = DerivedTableOwner::for_issue(&summary) {
            queue.mark_owner(owner);
        }
    }

    if !queue.has_changes() {
        debug!(issues = issue_ids.len(), "no derived tables to rebuild");
        return Ok(RecalcReport::default());
    }

    recalc::run(store, &queue).await
}
