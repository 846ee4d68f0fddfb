//! Incremental maintenance of the derived discrete tables.
//!
//! The engine keeps two materialized relations consistent with the
//! mutable diagram graph:
//!
//! - **Change detection**: pending mutations are classified against a
//!   fixed set of table-relevance predicates before they are flushed.
//! - **Session queue**: affected owners and stale rows accumulate per
//!   unit of work, deduplicated with set semantics.
//! - **Explicit rule trigger**: an imperative enqueue API for changes the
//!   detector cannot observe structurally.
//! - **Recalculation**: stale rows are purged, then each affected table
//!   is deleted and regenerated from its current parent chain, once per
//!   save cycle, guarded against re-entrant triggering.
//! - **Rebuild facade**: a synchronous forced rebuild keyed by issue ids.

mod change_set;
mod detector;
mod queue;
mod rebuild;
mod recalc;
mod trigger;
mod uow;

pub use change_set::{ChangeSet, EntityChange, EntityState, Tracked};
pub use queue::{DerivedTableOwner, SessionQueue};
pub use rebuild::rebuild_issues;
pub use recalc::RecalcReport;
pub use uow::{RecalculationState, UnitOfWork};
