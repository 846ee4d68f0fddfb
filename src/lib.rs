//! # Influence Tables
//!
//! An incremental maintenance engine for the derived discrete tables of
//! decision-analysis networks (influence diagrams). Typed issues
//! (decision, uncertainty, utility, fact) own graph nodes connected by
//! directed edges; from that mutable graph two materialized relations
//! are kept consistent at all times:
//!
//! - a **discrete probability table** per uncertainty, one row per own
//!   outcome and combination of qualifying parent dimensions, and
//! - a **discrete utility table** per utility, one row per combination
//!   of qualifying parent dimensions.
//!
//! Writes go through an explicit unit of work: pending changes are
//! scanned by the change detector, flushed inside one SQLite
//! transaction, and the affected tables are deleted and regenerated in
//! the same transaction before the caller commits.
//!
//! ## Architecture
//!
//! ```text
//! caller -> UnitOfWork (change set, session queue, recalc state)
//!                |  save_changes()
//!                v
//!        detector -> queue -> recalculator
//!                |               |
//!                v               v
//!             DiagramTx (SQLite transaction)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use influence_tables::config::Config;
//! use influence_tables::storage::SqliteDiagramStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let store = SqliteDiagramStore::new(&config.database).await?;
//!     let mut uow = store.unit_of_work().await?;
//!     // ... record graph mutations ...
//!     uow.save_changes().await?;
//!     uow.into_store().commit().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Configuration management.
pub mod config;
/// Derived-table maintenance engine (detection, queueing, rebuild).
pub mod engine;
/// Error types and result aliases for the application.
pub mod error;
/// Influence-diagram graph model.
pub mod model;
/// SQLite persistence and the storage contract the engine consumes.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
