use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::info;
use uuid::Uuid;

use super::{
    DecisionSummary, DiagramStore, IssueSummary, NodeSummary, ParentLink, UncertaintyContext,
    UncertaintySummary, UtilityContext,
};
use crate::config::DatabaseConfig;
use crate::engine::{EntityChange, EntityState, UnitOfWork};
use crate::error::{StorageError, StorageResult};
use crate::model::{
    DiscreteProbability, DiscreteUtility, StrategyOption,
};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const ISSUE_SUMMARY_COLUMNS: &str = "i.id AS id, i.kind AS kind, i.boundary AS boundary, \
     u.id AS uncertainty_id, u.is_key AS is_key, \
     d.id AS decision_id, d.hierarchy AS hierarchy, \
     ut.id AS utility_id";

const ISSUE_PAYLOAD_JOINS: &str = "LEFT JOIN uncertainties u ON u.issue_id = i.id \
     LEFT JOIN decisions d ON d.issue_id = i.id \
     LEFT JOIN utilities ut ON ut.issue_id = i.id";

/// SQLite-backed diagram store
#[derive(Clone)]
pub struct SqliteDiagramStore {
    pool: SqlitePool,
}

impl SqliteDiagramStore {
    /// Create a new SQLite store instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory store, used by tests. A single pooled
    /// connection keeps the database alive for the pool's lifetime.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a transaction for one unit of work.
    pub async fn begin(&self) -> StorageResult<DiagramTx> {
        Ok(DiagramTx {
            tx: self.pool.begin().await?,
        })
    }

    /// Begin a transaction wrapped in a fresh [`UnitOfWork`].
    pub async fn unit_of_work(&self) -> StorageResult<UnitOfWork<DiagramTx>> {
        Ok(UnitOfWork::new(self.begin().await?))
    }

    /// Probability rows of an uncertainty with their parent links,
    /// ordered by row id.
    pub async fn probabilities_for(
        &self,
        uncertainty_id: Uuid,
    ) -> StorageResult<Vec<DiscreteProbability>> {
        let mut conn = self.pool.acquire().await?;
        fetch_probabilities(&mut conn, uncertainty_id).await
    }

    /// Utility rows of a utility with their parent links, ordered by
    /// row id.
    pub async fn utility_rows_for(&self, utility_id: Uuid) -> StorageResult<Vec<DiscreteUtility>> {
        let mut conn = self.pool.acquire().await?;
        fetch_discrete_utilities(&mut conn, utility_id).await
    }

    /// Strategy-option links of a strategy.
    pub async fn strategy_links_for(&self, strategy_id: Uuid) -> StorageResult<Vec<StrategyOption>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT strategy_id, option_id FROM strategy_options WHERE strategy_id = ? ORDER BY option_id",
        )
        .bind(strategy_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter()
            .map(|(strategy, option)| {
                Ok(StrategyOption {
                    strategy_id: parse_uuid(&strategy)?,
                    option_id: parse_uuid(&option)?,
                })
            })
            .collect()
    }

    /// Row counts across the graph and derived tables.
    pub async fn table_stats(&self) -> StorageResult<TableStats> {
        let mut conn = self.pool.acquire().await?;
        let (issues, nodes, edges, probability_rows, utility_rows, strategy_links): (
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            "SELECT \
                 (SELECT COUNT(*) FROM issues), \
                 (SELECT COUNT(*) FROM nodes), \
                 (SELECT COUNT(*) FROM edges), \
                 (SELECT COUNT(*) FROM discrete_probabilities), \
                 (SELECT COUNT(*) FROM discrete_utilities), \
                 (SELECT COUNT(*) FROM strategy_options)",
        )
        .fetch_one(&mut *conn)
        .await?;

        Ok(TableStats {
            issues,
            nodes,
            edges,
            probability_rows,
            utility_rows,
            strategy_links,
        })
    }
}

/// Row counts reported by [`SqliteDiagramStore::table_stats`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TableStats {
    /// Issue count.
    pub issues: i64,
    /// Node count.
    pub nodes: i64,
    /// Edge count.
    pub edges: i64,
    /// Derived probability row count.
    pub probability_rows: i64,
    /// Derived utility row count.
    pub utility_rows: i64,
    /// Strategy-option link count.
    pub strategy_links: i64,
}

/// One open transaction over the diagram store.
///
/// Implements [`DiagramStore`], so a whole save cycle (flush, detection
/// lookups, recalculation) runs atomically and is discarded on rollback.
pub struct DiagramTx {
    tx: Transaction<'static, Sqlite>,
}

impl DiagramTx {
    /// Commit the transaction.
    pub async fn commit(self) -> StorageResult<()> {
        self.tx.commit().await.map_err(Into::into)
    }

    /// Roll the transaction back explicitly. Dropping the value has the
    /// same effect.
    pub async fn rollback(self) -> StorageResult<()> {
        self.tx.rollback().await.map_err(Into::into)
    }

    /// Probability rows of an uncertainty as visible inside this
    /// transaction.
    pub async fn probabilities_for(
        &mut self,
        uncertainty_id: Uuid,
    ) -> StorageResult<Vec<DiscreteProbability>> {
        fetch_probabilities(&mut self.tx, uncertainty_id).await
    }

    /// Utility rows of a utility as visible inside this transaction.
    pub async fn utility_rows_for(&mut self, utility_id: Uuid) -> StorageResult<Vec<DiscreteUtility>> {
        fetch_discrete_utilities(&mut self.tx, utility_id).await
    }
}

impl std::fmt::Debug for DiagramTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagramTx").finish_non_exhaustive()
    }
}

#[async_trait]
impl DiagramStore for DiagramTx {
    async fn apply(&mut self, change: &EntityChange) -> StorageResult<()> {
        apply_change(&mut self.tx, change).await
    }

    async fn issue_summaries(&mut self, issue_ids: &[Uuid]) -> StorageResult<Vec<IssueSummary>> {
        fetch_issue_summaries(&mut self.tx, issue_ids).await
    }

    async fn node_issues(&mut self, node_ids: &[Uuid]) -> StorageResult<Vec<NodeSummary>> {
        fetch_node_issues(&mut self.tx, node_ids).await
    }

    async fn edge_head_issues(&mut self, edge_ids: &[Uuid]) -> StorageResult<Vec<IssueSummary>> {
        fetch_edge_head_issues(&mut self.tx, edge_ids).await
    }

    async fn downstream_head_issues(
        &mut self,
        issue_ids: &[Uuid],
    ) -> StorageResult<Vec<IssueSummary>> {
        fetch_downstream_head_issues(&mut self.tx, issue_ids).await
    }

    async fn decision_issue_ids(&mut self, decision_ids: &[Uuid]) -> StorageResult<Vec<Uuid>> {
        fetch_owner_issue_ids(&mut self.tx, "decisions", decision_ids).await
    }

    async fn uncertainty_issue_ids(
        &mut self,
        uncertainty_ids: &[Uuid],
    ) -> StorageResult<Vec<Uuid>> {
        fetch_owner_issue_ids(&mut self.tx, "uncertainties", uncertainty_ids).await
    }

    async fn uncertainty_context(
        &mut self,
        uncertainty_id: Uuid,
    ) -> StorageResult<Option<UncertaintyContext>> {
        fetch_uncertainty_context(&mut self.tx, uncertainty_id).await
    }

    async fn utility_context(
        &mut self,
        utility_id: Uuid,
    ) -> StorageResult<Option<UtilityContext>> {
        fetch_utility_context(&mut self.tx, utility_id).await
    }

    async fn delete_probability_rows(&mut self, row_ids: &[Uuid]) -> StorageResult<u64> {
        delete_probability_rows(&mut self.tx, row_ids).await
    }

    async fn delete_utility_rows(&mut self, row_ids: &[Uuid]) -> StorageResult<u64> {
        delete_utility_rows(&mut self.tx, row_ids).await
    }

    async fn clear_probabilities(&mut self, uncertainty_id: Uuid) -> StorageResult<u64> {
        clear_probabilities(&mut self.tx, uncertainty_id).await
    }

    async fn clear_utility_rows(&mut self, utility_id: Uuid) -> StorageResult<u64> {
        clear_utility_rows(&mut self.tx, utility_id).await
    }

    async fn insert_probability_rows(
        &mut self,
        rows: &[DiscreteProbability],
    ) -> StorageResult<()> {
        for row in rows {
            insert_probability_row(&mut self.tx, row).await?;
        }
        Ok(())
    }

    async fn insert_utility_rows(&mut self, rows: &[DiscreteUtility]) -> StorageResult<()> {
        for row in rows {
            insert_utility_row(&mut self.tx, row).await?;
        }
        Ok(())
    }

    async fn strategy_links_for_issues(
        &mut self,
        issue_ids: &[Uuid],
    ) -> StorageResult<Vec<StrategyOption>> {
        fetch_strategy_links_for_issues(&mut self.tx, issue_ids).await
    }

    async fn delete_strategy_links(&mut self, links: &[StrategyOption]) -> StorageResult<u64> {
        let mut removed = 0;
        for link in links {
            let result = sqlx::query(
                "DELETE FROM strategy_options WHERE strategy_id = ? AND option_id = ?",
            )
            .bind(link.strategy_id.to_string())
            .bind(link.option_id.to_string())
            .execute(&mut *self.tx)
            .await?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------
// Row types and conversions
// ---------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct IssueSummaryRow {
    id: String,
    kind: String,
    boundary: String,
    uncertainty_id: Option<String>,
    is_key: Option<bool>,
    decision_id: Option<String>,
    hierarchy: Option<String>,
    utility_id: Option<String>,
}

impl IssueSummaryRow {
    fn into_summary(self) -> StorageResult<IssueSummary> {
        let kind = self.kind.parse().map_err(|e: String| corrupt(&self.id, e))?;
        let boundary = self
            .boundary
            .parse()
            .map_err(|e: String| corrupt(&self.id, e))?;

        let uncertainty = match self.uncertainty_id {
            Some(ref uncertainty_id) => Some(UncertaintySummary {
                id: parse_uuid(uncertainty_id)?,
                is_key: self.is_key.unwrap_or(false),
            }),
            None => None,
        };
        let decision = match (self.decision_id.as_ref(), self.hierarchy.as_ref()) {
            (Some(decision_id), Some(hierarchy)) => Some(DecisionSummary {
                id: parse_uuid(decision_id)?,
                hierarchy: hierarchy.parse().map_err(|e: String| corrupt(&self.id, e))?,
            }),
            _ => None,
        };
        let utility_id = match self.utility_id {
            Some(ref utility_id) => Some(parse_uuid(utility_id)?),
            None => None,
        };

        Ok(IssueSummary {
            id: parse_uuid(&self.id)?,
            kind,
            boundary,
            uncertainty,
            decision,
            utility_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct NodeIssueRow {
    node_id: String,
    issue_id: Option<String>,
    kind: Option<String>,
    boundary: Option<String>,
    uncertainty_id: Option<String>,
    is_key: Option<bool>,
    decision_id: Option<String>,
    hierarchy: Option<String>,
    utility_id: Option<String>,
}

impl NodeIssueRow {
    fn into_summary(self) -> StorageResult<NodeSummary> {
        let node_id = parse_uuid(&self.node_id)?;
        let issue = match (self.issue_id, self.kind, self.boundary) {
            (Some(id), Some(kind), Some(boundary)) => Some(
                IssueSummaryRow {
                    id,
                    kind,
                    boundary,
                    uncertainty_id: self.uncertainty_id,
                    is_key: self.is_key,
                    decision_id: self.decision_id,
                    hierarchy: self.hierarchy,
                    utility_id: self.utility_id,
                }
                .into_summary()?,
            ),
            _ => None,
        };
        Ok(NodeSummary { id: node_id, issue })
    }
}

#[derive(sqlx::FromRow)]
struct ParentLinkRow {
    tail_id: String,
    #[sqlx(flatten)]
    issue: IssueSummaryRow,
}

fn corrupt(row_id: &str, message: String) -> StorageError {
    StorageError::CorruptRow {
        row_id: row_id.to_string(),
        message,
    }
}

fn parse_uuid(value: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| StorageError::Query {
        message: format!("invalid uuid '{}': {}", value, e),
    })
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

// ---------------------------------------------------------------------
// Change flushing
// ---------------------------------------------------------------------

async fn apply_change(conn: &mut SqliteConnection, change: &EntityChange) -> StorageResult<()> {
    match change {
        EntityChange::Issue(tracked) => {
            let issue = &tracked.current;
            match tracked.state {
                EntityState::Added => {
                    sqlx::query(
                        "INSERT INTO issues (id, project_id, kind, boundary, name, description, sort_order, created_at, updated_at) \
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(issue.id.to_string())
                    .bind(issue.project_id.to_string())
                    .bind(issue.kind.to_string())
                    .bind(issue.boundary.to_string())
                    .bind(&issue.name)
                    .bind(&issue.description)
                    .bind(issue.order)
                    .bind(issue.created_at.to_rfc3339())
                    .bind(issue.updated_at.to_rfc3339())
                    .execute(&mut *conn)
                    .await?;
                }
                EntityState::Modified => {
                    sqlx::query(
                        "UPDATE issues SET project_id = ?, kind = ?, boundary = ?, name = ?, description = ?, sort_order = ?, updated_at = ? \
                         WHERE id = ?",
                    )
                    .bind(issue.project_id.to_string())
                    .bind(issue.kind.to_string())
                    .bind(issue.boundary.to_string())
                    .bind(&issue.name)
                    .bind(&issue.description)
                    .bind(issue.order)
                    .bind(issue.updated_at.to_rfc3339())
                    .bind(issue.id.to_string())
                    .execute(&mut *conn)
                    .await?;
                }
                EntityState::Deleted => {
                    sqlx::query("DELETE FROM issues WHERE id = ?")
                        .bind(issue.id.to_string())
                        .execute(&mut *conn)
                        .await?;
                }
            }
        }
        EntityChange::Node(tracked) => {
            let node = &tracked.current;
            match tracked.state {
                EntityState::Added => {
                    sqlx::query(
                        "INSERT INTO nodes (id, project_id, issue_id, name) VALUES (?, ?, ?, ?)",
                    )
                    .bind(node.id.to_string())
                    .bind(node.project_id.to_string())
                    .bind(node.issue_id.to_string())
                    .bind(&node.name)
                    .execute(&mut *conn)
                    .await?;
                }
                EntityState::Modified => {
                    sqlx::query(
                        "UPDATE nodes SET project_id = ?, issue_id = ?, name = ? WHERE id = ?",
                    )
                    .bind(node.project_id.to_string())
                    .bind(node.issue_id.to_string())
                    .bind(&node.name)
                    .bind(node.id.to_string())
                    .execute(&mut *conn)
                    .await?;
                }
                EntityState::Deleted => {
                    sqlx::query("DELETE FROM nodes WHERE id = ?")
                        .bind(node.id.to_string())
                        .execute(&mut *conn)
                        .await?;
                }
            }
        }
        EntityChange::Edge(tracked) => {
            let edge = &tracked.current;
            match tracked.state {
                EntityState::Added => {
                    sqlx::query(
                        "INSERT INTO edges (id, project_id, tail_id, head_id) VALUES (?, ?, ?, ?)",
                    )
                    .bind(edge.id.to_string())
                    .bind(edge.project_id.to_string())
                    .bind(edge.tail_id.to_string())
                    .bind(edge.head_id.to_string())
                    .execute(&mut *conn)
                    .await?;
                }
                EntityState::Modified => {
                    sqlx::query(
                        "UPDATE edges SET project_id = ?, tail_id = ?, head_id = ? WHERE id = ?",
                    )
                    .bind(edge.project_id.to_string())
                    .bind(edge.tail_id.to_string())
                    .bind(edge.head_id.to_string())
                    .bind(edge.id.to_string())
                    .execute(&mut *conn)
                    .await?;
                }
                EntityState::Deleted => {
                    sqlx::query("DELETE FROM edges WHERE id = ?")
                        .bind(edge.id.to_string())
                        .execute(&mut *conn)
                        .await?;
                }
            }
        }
        EntityChange::Decision(tracked) => {
            let decision = &tracked.current;
            match tracked.state {
                EntityState::Added => {
                    sqlx::query("INSERT INTO decisions (id, issue_id, hierarchy) VALUES (?, ?, ?)")
                        .bind(decision.id.to_string())
                        .bind(decision.issue_id.to_string())
                        .bind(decision.hierarchy.to_string())
                        .execute(&mut *conn)
                        .await?;
                }
                EntityState::Modified => {
                    sqlx::query("UPDATE decisions SET issue_id = ?, hierarchy = ? WHERE id = ?")
                        .bind(decision.issue_id.to_string())
                        .bind(decision.hierarchy.to_string())
                        .bind(decision.id.to_string())
                        .execute(&mut *conn)
                        .await?;
                }
                EntityState::Deleted => {
                    sqlx::query("DELETE FROM decisions WHERE id = ?")
                        .bind(decision.id.to_string())
                        .execute(&mut *conn)
                        .await?;
                }
            }
        }
        EntityChange::DecisionOption(tracked) => {
            let option = &tracked.current;
            match tracked.state {
                EntityState::Added => {
                    sqlx::query(
                        "INSERT INTO options (id, decision_id, name, utility) VALUES (?, ?, ?, ?)",
                    )
                    .bind(option.id.to_string())
                    .bind(option.decision_id.to_string())
                    .bind(&option.name)
                    .bind(option.utility)
                    .execute(&mut *conn)
                    .await?;
                }
                EntityState::Modified => {
                    sqlx::query(
                        "UPDATE options SET decision_id = ?, name = ?, utility = ? WHERE id = ?",
                    )
                    .bind(option.decision_id.to_string())
                    .bind(&option.name)
                    .bind(option.utility)
                    .bind(option.id.to_string())
                    .execute(&mut *conn)
                    .await?;
                }
                EntityState::Deleted => {
                    sqlx::query("DELETE FROM options WHERE id = ?")
                        .bind(option.id.to_string())
                        .execute(&mut *conn)
                        .await?;
                }
            }
        }
        EntityChange::Uncertainty(tracked) => {
            let uncertainty = &tracked.current;
            match tracked.state {
                EntityState::Added => {
                    sqlx::query(
                        "INSERT INTO uncertainties (id, issue_id, is_key) VALUES (?, ?, ?)",
                    )
                    .bind(uncertainty.id.to_string())
                    .bind(uncertainty.issue_id.to_string())
                    .bind(uncertainty.is_key)
                    .execute(&mut *conn)
                    .await?;
                }
                EntityState::Modified => {
                    sqlx::query("UPDATE uncertainties SET issue_id = ?, is_key = ? WHERE id = ?")
                        .bind(uncertainty.issue_id.to_string())
                        .bind(uncertainty.is_key)
                        .bind(uncertainty.id.to_string())
                        .execute(&mut *conn)
                        .await?;
                }
                EntityState::Deleted => {
                    sqlx::query("DELETE FROM uncertainties WHERE id = ?")
                        .bind(uncertainty.id.to_string())
                        .execute(&mut *conn)
                        .await?;
                }
            }
        }
        EntityChange::Outcome(tracked) => {
            let outcome = &tracked.current;
            match tracked.state {
                EntityState::Added => {
                    sqlx::query(
                        "INSERT INTO outcomes (id, uncertainty_id, name, utility) VALUES (?, ?, ?, ?)",
                    )
                    .bind(outcome.id.to_string())
                    .bind(outcome.uncertainty_id.to_string())
                    .bind(&outcome.name)
                    .bind(outcome.utility)
                    .execute(&mut *conn)
                    .await?;
                }
                EntityState::Modified => {
                    sqlx::query(
                        "UPDATE outcomes SET uncertainty_id = ?, name = ?, utility = ? WHERE id = ?",
                    )
                    .bind(outcome.uncertainty_id.to_string())
                    .bind(&outcome.name)
                    .bind(outcome.utility)
                    .bind(outcome.id.to_string())
                    .execute(&mut *conn)
                    .await?;
                }
                EntityState::Deleted => {
                    sqlx::query("DELETE FROM outcomes WHERE id = ?")
                        .bind(outcome.id.to_string())
                        .execute(&mut *conn)
                        .await?;
                }
            }
        }
        EntityChange::Utility(tracked) => {
            let utility = &tracked.current;
            match tracked.state {
                EntityState::Added => {
                    sqlx::query("INSERT INTO utilities (id, issue_id) VALUES (?, ?)")
                        .bind(utility.id.to_string())
                        .bind(utility.issue_id.to_string())
                        .execute(&mut *conn)
                        .await?;
                }
                EntityState::Modified => {
                    sqlx::query("UPDATE utilities SET issue_id = ? WHERE id = ?")
                        .bind(utility.issue_id.to_string())
                        .bind(utility.id.to_string())
                        .execute(&mut *conn)
                        .await?;
                }
                EntityState::Deleted => {
                    sqlx::query("DELETE FROM utilities WHERE id = ?")
                        .bind(utility.id.to_string())
                        .execute(&mut *conn)
                        .await?;
                }
            }
        }
        EntityChange::Strategy(tracked) => {
            let strategy = &tracked.current;
            match tracked.state {
                EntityState::Added => {
                    sqlx::query(
                        "INSERT INTO strategies (id, project_id, name, description, rationale, created_at, updated_at) \
                         VALUES (?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(strategy.id.to_string())
                    .bind(strategy.project_id.to_string())
                    .bind(&strategy.name)
                    .bind(&strategy.description)
                    .bind(&strategy.rationale)
                    .bind(strategy.created_at.to_rfc3339())
                    .bind(strategy.updated_at.to_rfc3339())
                    .execute(&mut *conn)
                    .await?;
                }
                EntityState::Modified => {
                    sqlx::query(
                        "UPDATE strategies SET name = ?, description = ?, rationale = ?, updated_at = ? WHERE id = ?",
                    )
                    .bind(&strategy.name)
                    .bind(&strategy.description)
                    .bind(&strategy.rationale)
                    .bind(strategy.updated_at.to_rfc3339())
                    .bind(strategy.id.to_string())
                    .execute(&mut *conn)
                    .await?;
                }
                EntityState::Deleted => {
                    sqlx::query("DELETE FROM strategies WHERE id = ?")
                        .bind(strategy.id.to_string())
                        .execute(&mut *conn)
                        .await?;
                }
            }
        }
        EntityChange::StrategyLink(tracked) => {
            let link = &tracked.current;
            match tracked.state {
                EntityState::Added => {
                    sqlx::query(
                        "INSERT INTO strategy_options (strategy_id, option_id) VALUES (?, ?)",
                    )
                    .bind(link.strategy_id.to_string())
                    .bind(link.option_id.to_string())
                    .execute(&mut *conn)
                    .await?;
                }
                EntityState::Deleted => {
                    sqlx::query(
                        "DELETE FROM strategy_options WHERE strategy_id = ? AND option_id = ?",
                    )
                    .bind(link.strategy_id.to_string())
                    .bind(link.option_id.to_string())
                    .execute(&mut *conn)
                    .await?;
                }
                EntityState::Modified => {
                    return Err(StorageError::Query {
                        message: "strategy_options junction rows cannot be modified".to_string(),
                    });
                }
            }
        }
        EntityChange::Probability(tracked) => {
            let row = &tracked.current;
            match tracked.state {
                EntityState::Added => insert_probability_row(conn, row).await?,
                EntityState::Modified => {
                    sqlx::query("UPDATE discrete_probabilities SET probability = ? WHERE id = ?")
                        .bind(row.probability)
                        .bind(row.id.to_string())
                        .execute(&mut *conn)
                        .await?;
                }
                EntityState::Deleted => {
                    delete_probability_rows(conn, &[row.id]).await?;
                }
            }
        }
        EntityChange::UtilityRow(tracked) => {
            let row = &tracked.current;
            match tracked.state {
                EntityState::Added => insert_utility_row(conn, row).await?,
                EntityState::Modified => {
                    sqlx::query(
                        "UPDATE discrete_utilities SET value = ?, value_metric_id = ? WHERE id = ?",
                    )
                    .bind(row.value)
                    .bind(row.value_metric_id.to_string())
                    .bind(row.id.to_string())
                    .execute(&mut *conn)
                    .await?;
                }
                EntityState::Deleted => {
                    delete_utility_rows(conn, &[row.id]).await?;
                }
            }
        }
        EntityChange::ProbabilityParentOption(tracked) => {
            apply_junction(
                conn,
                tracked.state,
                "discrete_probability_parent_options",
                "discrete_probability_id",
                "parent_option_id",
                tracked.current.discrete_probability_id,
                tracked.current.parent_option_id,
            )
            .await?;
        }
        EntityChange::ProbabilityParentOutcome(tracked) => {
            apply_junction(
                conn,
                tracked.state,
                "discrete_probability_parent_outcomes",
                "discrete_probability_id",
                "parent_outcome_id",
                tracked.current.discrete_probability_id,
                tracked.current.parent_outcome_id,
            )
            .await?;
        }
        EntityChange::UtilityParentOption(tracked) => {
            apply_junction(
                conn,
                tracked.state,
                "discrete_utility_parent_options",
                "discrete_utility_id",
                "parent_option_id",
                tracked.current.discrete_utility_id,
                tracked.current.parent_option_id,
            )
            .await?;
        }
        EntityChange::UtilityParentOutcome(tracked) => {
            apply_junction(
                conn,
                tracked.state,
                "discrete_utility_parent_outcomes",
                "discrete_utility_id",
                "parent_outcome_id",
                tracked.current.discrete_utility_id,
                tracked.current.parent_outcome_id,
            )
            .await?;
        }
    }

    Ok(())
}

async fn apply_junction(
    conn: &mut SqliteConnection,
    state: EntityState,
    table: &str,
    owner_column: &str,
    member_column: &str,
    owner_id: Uuid,
    member_id: Uuid,
) -> StorageResult<()> {
    let sql = match state {
        EntityState::Added => {
            format!(
                "INSERT INTO {} ({}, {}) VALUES (?, ?)",
                table, owner_column, member_column
            )
        }
        EntityState::Deleted => {
            format!(
                "DELETE FROM {} WHERE {} = ? AND {} = ?",
                table, owner_column, member_column
            )
        }
        EntityState::Modified => {
            return Err(StorageError::Query {
                message: format!("{} junction rows cannot be modified", table),
            });
        }
    };

    sqlx::query(&sql)
        .bind(owner_id.to_string())
        .bind(member_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------
// Lookup queries
// ---------------------------------------------------------------------

async fn fetch_issue_summaries(
    conn: &mut SqliteConnection,
    issue_ids: &[Uuid],
) -> StorageResult<Vec<IssueSummary>> {
    if issue_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT {} FROM issues i {} WHERE i.id IN ({})",
        ISSUE_SUMMARY_COLUMNS,
        ISSUE_PAYLOAD_JOINS,
        placeholders(issue_ids.len())
    );

    let mut query = sqlx::query_as::<_, IssueSummaryRow>(&sql);
    for id in issue_ids {
        query = query.bind(id.to_string());
    }

    let rows = query.fetch_all(&mut *conn).await?;
    rows.into_iter().map(|row| row.into_summary()).collect()
}

async fn fetch_node_issues(
    conn: &mut SqliteConnection,
    node_ids: &[Uuid],
) -> StorageResult<Vec<NodeSummary>> {
    if node_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT n.id AS node_id, i.id AS issue_id, i.kind AS kind, i.boundary AS boundary, \
                u.id AS uncertainty_id, u.is_key AS is_key, \
                d.id AS decision_id, d.hierarchy AS hierarchy, \
                ut.id AS utility_id \
         FROM nodes n \
         LEFT JOIN issues i ON i.id = n.issue_id \
         {} \
         WHERE n.id IN ({})",
        ISSUE_PAYLOAD_JOINS,
        placeholders(node_ids.len())
    );

    let mut query = sqlx::query_as::<_, NodeIssueRow>(&sql);
    for id in node_ids {
        query = query.bind(id.to_string());
    }

    let rows = query.fetch_all(&mut *conn).await?;
    rows.into_iter().map(|row| row.into_summary()).collect()
}

async fn fetch_edge_head_issues(
    conn: &mut SqliteConnection,
    edge_ids: &[Uuid],
) -> StorageResult<Vec<IssueSummary>> {
    if edge_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT DISTINCT {} \
         FROM edges e \
         JOIN nodes n ON n.id = e.head_id \
         JOIN issues i ON i.id = n.issue_id \
         {} \
         WHERE e.id IN ({})",
        ISSUE_SUMMARY_COLUMNS,
        ISSUE_PAYLOAD_JOINS,
        placeholders(edge_ids.len())
    );

    let mut query = sqlx::query_as::<_, IssueSummaryRow>(&sql);
    for id in edge_ids {
        query = query.bind(id.to_string());
    }

    let rows = query.fetch_all(&mut *conn).await?;
    rows.into_iter().map(|row| row.into_summary()).collect()
}

async fn fetch_downstream_head_issues(
    conn: &mut SqliteConnection,
    issue_ids: &[Uuid],
) -> StorageResult<Vec<IssueSummary>> {
    if issue_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT DISTINCT {} \
         FROM nodes tail \
         JOIN edges e ON e.tail_id = tail.id \
         JOIN nodes head ON head.id = e.head_id \
         JOIN issues i ON i.id = head.issue_id \
         {} \
         WHERE tail.issue_id IN ({})",
        ISSUE_SUMMARY_COLUMNS,
        ISSUE_PAYLOAD_JOINS,
        placeholders(issue_ids.len())
    );

    let mut query = sqlx::query_as::<_, IssueSummaryRow>(&sql);
    for id in issue_ids {
        query = query.bind(id.to_string());
    }

    let rows = query.fetch_all(&mut *conn).await?;
    rows.into_iter().map(|row| row.into_summary()).collect()
}

async fn fetch_owner_issue_ids(
    conn: &mut SqliteConnection,
    table: &str,
    owner_ids: &[Uuid],
) -> StorageResult<Vec<Uuid>> {
    if owner_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT DISTINCT issue_id FROM {} WHERE id IN ({})",
        table,
        placeholders(owner_ids.len())
    );

    let mut query = sqlx::query_scalar::<_, String>(&sql);
    for id in owner_ids {
        query = query.bind(id.to_string());
    }

    let rows = query.fetch_all(&mut *conn).await?;
    rows.iter().map(|id| parse_uuid(id)).collect()
}

async fn fetch_uncertainty_context(
    conn: &mut SqliteConnection,
    uncertainty_id: Uuid,
) -> StorageResult<Option<UncertaintyContext>> {
    let owner: Option<(String, String)> =
        sqlx::query_as("SELECT id, issue_id FROM uncertainties WHERE id = ?")
            .bind(uncertainty_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

    let Some((_, issue_id)) = owner else {
        return Ok(None);
    };

    let outcome_rows: Vec<String> =
        sqlx::query_scalar("SELECT id FROM outcomes WHERE uncertainty_id = ? ORDER BY id")
            .bind(uncertainty_id.to_string())
            .fetch_all(&mut *conn)
            .await?;
    let outcome_ids = outcome_rows
        .iter()
        .map(|id| parse_uuid(id))
        .collect::<StorageResult<Vec<Uuid>>>()?;

    let parents = load_parent_links_of_issue(conn, &issue_id).await?;

    Ok(Some(UncertaintyContext {
        uncertainty_id,
        issue_id: parse_uuid(&issue_id)?,
        outcome_ids,
        parents,
    }))
}

async fn fetch_utility_context(
    conn: &mut SqliteConnection,
    utility_id: Uuid,
) -> StorageResult<Option<UtilityContext>> {
    let owner: Option<(String, String)> =
        sqlx::query_as("SELECT id, issue_id FROM utilities WHERE id = ?")
            .bind(utility_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

    let Some((_, issue_id)) = owner else {
        return Ok(None);
    };

    let parents = load_parent_links_of_issue(conn, &issue_id).await?;

    Ok(Some(UtilityContext {
        utility_id,
        issue_id: parse_uuid(&issue_id)?,
        parents,
    }))
}

/// Incoming edges of an issue's node, each with its tail issue and the
/// child ids that issue could contribute as a dimension.
async fn load_parent_links_of_issue(
    conn: &mut SqliteConnection,
    issue_id: &str,
) -> StorageResult<Vec<ParentLink>> {
    let node_id: Option<String> =
        sqlx::query_scalar("SELECT id FROM nodes WHERE issue_id = ? LIMIT 1")
            .bind(issue_id)
            .fetch_optional(&mut *conn)
            .await?;

    let Some(node_id) = node_id else {
        return Ok(Vec::new());
    };

    let sql = format!(
        "SELECT e.tail_id AS tail_id, {} \
         FROM edges e \
         JOIN nodes tn ON tn.id = e.tail_id \
         JOIN issues i ON i.id = tn.issue_id \
         {} \
         WHERE e.head_id = ?",
        ISSUE_SUMMARY_COLUMNS, ISSUE_PAYLOAD_JOINS
    );

    let rows: Vec<ParentLinkRow> = sqlx::query_as(&sql)
        .bind(&node_id)
        .fetch_all(&mut *conn)
        .await?;

    let mut links = Vec::with_capacity(rows.len());
    for row in rows {
        let tail_node_id = parse_uuid(&row.tail_id)?;
        let issue = row.issue.into_summary()?;
        links.push(ParentLink {
            tail_node_id,
            issue,
            option_ids: Vec::new(),
            outcome_ids: Vec::new(),
        });
    }

    let uncertainty_ids: Vec<Uuid> = links
        .iter()
        .filter_map(|link| link.issue.uncertainty.map(|u| u.id))
        .collect();
    let decision_ids: Vec<Uuid> = links
        .iter()
        .filter_map(|link| link.issue.decision.map(|d| d.id))
        .collect();

    let outcomes_by_owner = fetch_child_ids(
        conn,
        "outcomes",
        "uncertainty_id",
        &uncertainty_ids,
    )
    .await?;
    let options_by_owner = fetch_child_ids(conn, "options", "decision_id", &decision_ids).await?;

    for link in &mut links {
        if let Some(uncertainty) = link.issue.uncertainty {
            if let Some(ids) = outcomes_by_owner.get(&uncertainty.id) {
                link.outcome_ids = ids.clone();
            }
        }
        if let Some(decision) = link.issue.decision {
            if let Some(ids) = options_by_owner.get(&decision.id) {
                link.option_ids = ids.clone();
            }
        }
    }

    Ok(links)
}

async fn fetch_child_ids(
    conn: &mut SqliteConnection,
    table: &str,
    owner_column: &str,
    owner_ids: &[Uuid],
) -> StorageResult<HashMap<Uuid, Vec<Uuid>>> {
    if owner_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let sql = format!(
        "SELECT {}, id FROM {} WHERE {} IN ({}) ORDER BY id",
        owner_column,
        table,
        owner_column,
        placeholders(owner_ids.len())
    );

    let mut query = sqlx::query_as::<_, (String, String)>(&sql);
    for id in owner_ids {
        query = query.bind(id.to_string());
    }

    let rows = query.fetch_all(&mut *conn).await?;
    let mut grouped: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (owner, child) in rows {
        grouped
            .entry(parse_uuid(&owner)?)
            .or_default()
            .push(parse_uuid(&child)?);
    }
    Ok(grouped)
}

// ---------------------------------------------------------------------
// Derived-table writes
// ---------------------------------------------------------------------

async fn delete_probability_rows(
    conn: &mut SqliteConnection,
    row_ids: &[Uuid],
) -> StorageResult<u64> {
    if row_ids.is_empty() {
        return Ok(0);
    }

    let marks = placeholders(row_ids.len());
    let bound_ids: Vec<String> = row_ids.iter().map(|id| id.to_string()).collect();

    for table in [
        "discrete_probability_parent_outcomes",
        "discrete_probability_parent_options",
    ] {
        let sql = format!(
            "DELETE FROM {} WHERE discrete_probability_id IN ({})",
            table, marks
        );
        let mut query = sqlx::query(&sql);
        for id in &bound_ids {
            query = query.bind(id);
        }
        query.execute(&mut *conn).await?;
    }

    let sql = format!("DELETE FROM discrete_probabilities WHERE id IN ({})", marks);
    let mut query = sqlx::query(&sql);
    for id in &bound_ids {
        query = query.bind(id);
    }
    let result = query.execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

async fn delete_utility_rows(conn: &mut SqliteConnection, row_ids: &[Uuid]) -> StorageResult<u64> {
    if row_ids.is_empty() {
        return Ok(0);
    }

    let marks = placeholders(row_ids.len());
    let bound_ids: Vec<String> = row_ids.iter().map(|id| id.to_string()).collect();

    for table in [
        "discrete_utility_parent_outcomes",
        "discrete_utility_parent_options",
    ] {
        let sql = format!(
            "DELETE FROM {} WHERE discrete_utility_id IN ({})",
            table, marks
        );
        let mut query = sqlx::query(&sql);
        for id in &bound_ids {
            query = query.bind(id);
        }
        query.execute(&mut *conn).await?;
    }

    let sql = format!("DELETE FROM discrete_utilities WHERE id IN ({})", marks);
    let mut query = sqlx::query(&sql);
    for id in &bound_ids {
        query = query.bind(id);
    }
    let result = query.execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

async fn clear_probabilities(
    conn: &mut SqliteConnection,
    uncertainty_id: Uuid,
) -> StorageResult<u64> {
    let owner = uncertainty_id.to_string();

    for table in [
        "discrete_probability_parent_outcomes",
        "discrete_probability_parent_options",
    ] {
        let sql = format!(
            "DELETE FROM {} WHERE discrete_probability_id IN \
             (SELECT id FROM discrete_probabilities WHERE uncertainty_id = ?)",
            table
        );
        sqlx::query(&sql).bind(&owner).execute(&mut *conn).await?;
    }

    let result = sqlx::query("DELETE FROM discrete_probabilities WHERE uncertainty_id = ?")
        .bind(&owner)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

async fn clear_utility_rows(conn: &mut SqliteConnection, utility_id: Uuid) -> StorageResult<u64> {
    let owner = utility_id.to_string();

    for table in [
        "discrete_utility_parent_outcomes",
        "discrete_utility_parent_options",
    ] {
        let sql = format!(
            "DELETE FROM {} WHERE discrete_utility_id IN \
             (SELECT id FROM discrete_utilities WHERE utility_id = ?)",
            table
        );
        sqlx::query(&sql).bind(&owner).execute(&mut *conn).await?;
    }

    let result = sqlx::query("DELETE FROM discrete_utilities WHERE utility_id = ?")
        .bind(&owner)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

async fn insert_probability_row(
    conn: &mut SqliteConnection,
    row: &DiscreteProbability,
) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO discrete_probabilities (id, uncertainty_id, outcome_id, probability) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(row.id.to_string())
    .bind(row.uncertainty_id.to_string())
    .bind(row.outcome_id.to_string())
    .bind(row.probability)
    .execute(&mut *conn)
    .await?;

    for option_id in &row.parent_option_ids {
        sqlx::query(
            "INSERT INTO discrete_probability_parent_options (discrete_probability_id, parent_option_id) \
             VALUES (?, ?)",
        )
        .bind(row.id.to_string())
        .bind(option_id.to_string())
        .execute(&mut *conn)
        .await?;
    }

    for outcome_id in &row.parent_outcome_ids {
        sqlx::query(
            "INSERT INTO discrete_probability_parent_outcomes (discrete_probability_id, parent_outcome_id) \
             VALUES (?, ?)",
        )
        .bind(row.id.to_string())
        .bind(outcome_id.to_string())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

async fn insert_utility_row(
    conn: &mut SqliteConnection,
    row: &DiscreteUtility,
) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO discrete_utilities (id, utility_id, value_metric_id, value) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(row.id.to_string())
    .bind(row.utility_id.to_string())
    .bind(row.value_metric_id.to_string())
    .bind(row.value)
    .execute(&mut *conn)
    .await?;

    for option_id in &row.parent_option_ids {
        sqlx::query(
            "INSERT INTO discrete_utility_parent_options (discrete_utility_id, parent_option_id) \
             VALUES (?, ?)",
        )
        .bind(row.id.to_string())
        .bind(option_id.to_string())
        .execute(&mut *conn)
        .await?;
    }

    for outcome_id in &row.parent_outcome_ids {
        sqlx::query(
            "INSERT INTO discrete_utility_parent_outcomes (discrete_utility_id, parent_outcome_id) \
             VALUES (?, ?)",
        )
        .bind(row.id.to_string())
        .bind(outcome_id.to_string())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

async fn fetch_strategy_links_for_issues(
    conn: &mut SqliteConnection,
    issue_ids: &[Uuid],
) -> StorageResult<Vec<StrategyOption>> {
    if issue_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT so.strategy_id, so.option_id \
         FROM strategy_options so \
         JOIN options o ON o.id = so.option_id \
         JOIN decisions d ON d.id = o.decision_id \
         WHERE d.issue_id IN ({})",
        placeholders(issue_ids.len())
    );

    let mut query = sqlx::query_as::<_, (String, String)>(&sql);
    for id in issue_ids {
        query = query.bind(id.to_string());
    }

    let rows = query.fetch_all(&mut *conn).await?;
    rows.into_iter()
        .map(|(strategy, option)| {
            Ok(StrategyOption {
                strategy_id: parse_uuid(&strategy)?,
                option_id: parse_uuid(&option)?,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------
// Derived-table reads (tests, CLI)
// ---------------------------------------------------------------------

async fn fetch_probabilities(
    conn: &mut SqliteConnection,
    uncertainty_id: Uuid,
) -> StorageResult<Vec<DiscreteProbability>> {
    let rows: Vec<(String, String, String, f64)> = sqlx::query_as(
        "SELECT id, uncertainty_id, outcome_id, probability \
         FROM discrete_probabilities WHERE uncertainty_id = ? ORDER BY id",
    )
    .bind(uncertainty_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let row_ids: Vec<Uuid> = rows
        .iter()
        .map(|(id, _, _, _)| parse_uuid(id))
        .collect::<StorageResult<_>>()?;

    let options_by_row = fetch_junction_ids(
        conn,
        "discrete_probability_parent_options",
        "discrete_probability_id",
        "parent_option_id",
        &row_ids,
    )
    .await?;
    let outcomes_by_row = fetch_junction_ids(
        conn,
        "discrete_probability_parent_outcomes",
        "discrete_probability_id",
        "parent_outcome_id",
        &row_ids,
    )
    .await?;

    rows.into_iter()
        .map(|(id, owner, outcome, probability)| {
            let row_id = parse_uuid(&id)?;
            Ok(DiscreteProbability {
                id: row_id,
                uncertainty_id: parse_uuid(&owner)?,
                outcome_id: parse_uuid(&outcome)?,
                probability,
                parent_option_ids: options_by_row.get(&row_id).cloned().unwrap_or_default(),
                parent_outcome_ids: outcomes_by_row.get(&row_id).cloned().unwrap_or_default(),
            })
        })
        .collect()
}

async fn fetch_discrete_utilities(
    conn: &mut SqliteConnection,
    utility_id: Uuid,
) -> StorageResult<Vec<DiscreteUtility>> {
    let rows: Vec<(String, String, String, f64)> = sqlx::query_as(
        "SELECT id, utility_id, value_metric_id, value \
         FROM discrete_utilities WHERE utility_id = ? ORDER BY id",
    )
    .bind(utility_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let row_ids: Vec<Uuid> = rows
        .iter()
        .map(|(id, _, _, _)| parse_uuid(id))
        .collect::<StorageResult<_>>()?;

    let options_by_row = fetch_junction_ids(
        conn,
        "discrete_utility_parent_options",
        "discrete_utility_id",
        "parent_option_id",
        &row_ids,
    )
    .await?;
    let outcomes_by_row = fetch_junction_ids(
        conn,
        "discrete_utility_parent_outcomes",
        "discrete_utility_id",
        "parent_outcome_id",
        &row_ids,
    )
    .await?;

    rows.into_iter()
        .map(|(id, owner, metric, value)| {
            let row_id = parse_uuid(&id)?;
            Ok(DiscreteUtility {
                id: row_id,
                utility_id: parse_uuid(&owner)?,
                value_metric_id: parse_uuid(&metric)?,
                value,
                parent_option_ids: options_by_row.get(&row_id).cloned().unwrap_or_default(),
                parent_outcome_ids: outcomes_by_row.get(&row_id).cloned().unwrap_or_default(),
            })
        })
        .collect()
}

async fn fetch_junction_ids(
    conn: &mut SqliteConnection,
    table: &str,
    owner_column: &str,
    member_column: &str,
    owner_ids: &[Uuid],
) -> StorageResult<HashMap<Uuid, Vec<Uuid>>> {
    if owner_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let sql = format!(
        "SELECT {}, {} FROM {} WHERE {} IN ({}) ORDER BY {}",
        owner_column,
        member_column,
        table,
        owner_column,
        placeholders(owner_ids.len()),
        member_column
    );

    let mut query = sqlx::query_as::<_, (String, String)>(&sql);
    for id in owner_ids {
        query = query.bind(id.to_string());
    }

    let rows = query.fetch_all(&mut *conn).await?;
    let mut grouped: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (owner, member) in rows {
        grouped
            .entry(parse_uuid(&owner)?)
            .or_default()
            .push(parse_uuid(&member)?);
    }
    Ok(grouped)
}
