//! SQLite-backed graph store.
//!
//! Steps, NEXT edges, and session nodes map to three small tables; the
//! schema is created with idempotent DDL on connect. Session-state updates
//! run inside a transaction: read, apply the caller's closure, write,
//! commit: any failure rolls the transaction back and the stored document
//! is left unchanged.
//!
//! Example URL: `sqlite://trellis.db` (or `sqlite::memory:` in tests).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::instrument;

use super::{
    merge_function_attrs, EdgeDefinition, GraphStore, SessionStateUpdate, StepDefinition,
    StoreError,
};
use crate::types::BoolOperator;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS steps (
    id          TEXT PRIMARY KEY,
    function    TEXT,
    utility     TEXT,
    input       TEXT,
    description TEXT,
    tags        TEXT
);
CREATE TABLE IF NOT EXISTS edges (
    source    TEXT NOT NULL,
    target    TEXT NOT NULL,
    condition TEXT,
    operator  TEXT,
    priority  INTEGER
);
CREATE INDEX IF NOT EXISTS edges_source ON edges (source);
CREATE TABLE IF NOT EXISTS sessions (
    id         TEXT PRIMARY KEY,
    state      TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// SQLite [`GraphStore`] backend.
pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteGraphStore").finish()
    }
}

impl SqliteGraphStore {
    /// Connects (or creates) the database at `database_url` and ensures the
    /// schema exists.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("connect error: {e}"),
            })?;
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("schema setup: {e}"),
            })?;
        Ok(Self { pool })
    }

    /// Inserts or replaces a step node. Writes populate `function` only;
    /// the `utility` column exists for definitions written by older tooling.
    pub async fn insert_step(&self, step: &StepDefinition) -> Result<(), StoreError> {
        let tags = if step.tags.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&step.tags)?)
        };
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO steps (id, function, utility, input, description, tags)
            VALUES (?1, ?2, NULL, ?3, ?4, ?5)
            "#,
        )
        .bind(&step.id)
        .bind(&step.function)
        .bind(&step.input)
        .bind(&step.description)
        .bind(tags)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend {
            message: format!("insert step: {e}"),
        })?;
        Ok(())
    }

    /// Appends an outgoing NEXT edge; discovery order is rowid order.
    pub async fn insert_edge(
        &self,
        source: &str,
        edge: &EdgeDefinition,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO edges (source, target, condition, operator, priority)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(source)
        .bind(&edge.target)
        .bind(&edge.condition)
        .bind(edge.operator.encode())
        .bind(edge.priority)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend {
            message: format!("insert edge: {e}"),
        })?;
        Ok(())
    }
}

fn step_from_row(row: &SqliteRow) -> Result<StepDefinition, StoreError> {
    let function: Option<String> = row.get("function");
    let utility: Option<String> = row.get("utility");
    let tags: Option<String> = row.get("tags");
    let tags = match tags {
        Some(raw) if !raw.is_empty() => serde_json::from_str(&raw).unwrap_or_default(),
        _ => Vec::new(),
    };
    Ok(StepDefinition {
        id: row.get("id"),
        function: merge_function_attrs(function, utility),
        input: row.get("input"),
        description: row.get("description"),
        tags,
    })
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    #[instrument(skip(self), err)]
    async fn get_step(&self, id: &str) -> Result<Option<StepDefinition>, StoreError> {
        let row = sqlx::query(
            r#"SELECT id, function, utility, input, description, tags FROM steps WHERE id = ?1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend {
            message: format!("select step: {e}"),
        })?;
        row.as_ref().map(step_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn outgoing_edges(&self, id: &str) -> Result<Vec<EdgeDefinition>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT target, condition, operator, priority
            FROM edges WHERE source = ?1
            ORDER BY rowid
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend {
            message: format!("select edges: {e}"),
        })?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let operator: Option<String> = row.get("operator");
                EdgeDefinition {
                    target: row.get("target"),
                    condition: row.get("condition"),
                    operator: operator
                        .map(|s| BoolOperator::decode(&s))
                        .unwrap_or_default(),
                    priority: row.get("priority"),
                }
            })
            .collect())
    }

    #[instrument(skip(self, state), err)]
    async fn create_session(
        &self,
        id: &str,
        state: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO sessions (id, state, created_at) VALUES (?1, ?2, ?3)"#,
        )
        .bind(id)
        .bind(state)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::SessionExists { id: id.to_string() })
            }
            Err(e) => Err(StoreError::Backend {
                message: format!("insert session: {e}"),
            }),
        }
    }

    #[instrument(skip(self), err)]
    async fn read_session_state(&self, id: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(r#"SELECT state FROM sessions WHERE id = ?1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("select session: {e}"),
            })?;
        Ok(row.map(|r| r.get("state")))
    }

    #[instrument(skip(self, apply), err)]
    async fn update_session_state(
        &self,
        id: &str,
        apply: SessionStateUpdate<'_>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Backend {
            message: format!("tx begin: {e}"),
        })?;

        let row = sqlx::query(r#"SELECT state FROM sessions WHERE id = ?1"#)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("select for update: {e}"),
            })?;
        let current: String = match row {
            Some(r) => r.get("state"),
            // Dropping the transaction rolls it back.
            None => return Err(StoreError::SessionNotFound { id: id.to_string() }),
        };

        let updated = apply(current)?;

        sqlx::query(r#"UPDATE sessions SET state = ?2 WHERE id = ?1"#)
            .bind(id)
            .bind(&updated)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("update session: {e}"),
            })?;

        tx.commit().await.map_err(|e| StoreError::Backend {
            message: format!("tx commit: {e}"),
        })?;
        Ok(())
    }
}
