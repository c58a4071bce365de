use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    Result, TransactionCheckpoint, TransactionId, TransactionQuery, TransactionStoreError,
    Version, WorkflowId,
    store::{SaveOptions, TransactionStore, validate_checkpoint_for_save},
};

const SELECT_COLUMNS: &str = "workflow_id, transaction_id, version, flow_state, next_deadline, expires_at, created_at, updated_at, state";

/// PostgreSQL-backed transaction store.
#[derive(Clone)]
pub struct PostgresTransactionStore {
    pool: PgPool,
}

impl PostgresTransactionStore {
    /// Creates a new PostgreSQL transaction store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_checkpoint(row: PgRow) -> Result<TransactionCheckpoint> {
        Ok(TransactionCheckpoint {
            workflow_id: WorkflowId::new(row.try_get::<String, _>("workflow_id")?),
            transaction_id: TransactionId::new(row.try_get::<String, _>("transaction_id")?),
            version: Version::new(row.try_get("version")?),
            flow_state: row.try_get("flow_state")?,
            next_deadline: row.try_get("next_deadline")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            state: row.try_get("state")?,
        })
    }
}

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn load_transaction(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<Option<TransactionCheckpoint>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM workflow_transactions WHERE workflow_id = $1 AND transaction_id = $2"
        ))
        .bind(workflow_id.as_str())
        .bind(transaction_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_checkpoint).transpose()
    }

    async fn save_transaction(
        &self,
        checkpoint: TransactionCheckpoint,
        options: SaveOptions,
    ) -> Result<Version> {
        validate_checkpoint_for_save(&checkpoint)?;

        let workflow_id = checkpoint.workflow_id.clone();
        let transaction_id = checkpoint.transaction_id.clone();

        let mut tx = self.pool.begin().await?;

        // Lock the row (if any) for the duration of the read-modify-write
        let current_version: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM workflow_transactions WHERE workflow_id = $1 AND transaction_id = $2 FOR UPDATE",
        )
        .bind(workflow_id.as_str())
        .bind(transaction_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let actual = Version::new(current_version.unwrap_or(0));

        if let Some(expected) = options.expected_version
            && actual != expected
        {
            metrics::counter!("transaction_store_conflicts_total").increment(1);
            return Err(TransactionStoreError::ConcurrencyConflict {
                workflow_id,
                transaction_id,
                expected,
                actual,
            });
        }

        if checkpoint.version <= actual {
            metrics::counter!("transaction_store_conflicts_total").increment(1);
            return Err(TransactionStoreError::ConcurrencyConflict {
                workflow_id,
                transaction_id,
                expected: options.expected_version.unwrap_or(actual),
                actual,
            });
        }

        if current_version.is_none() {
            sqlx::query(
                r#"
                INSERT INTO workflow_transactions
                    (workflow_id, transaction_id, version, flow_state, next_deadline, expires_at, created_at, updated_at, state)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(workflow_id.as_str())
            .bind(transaction_id.as_str())
            .bind(checkpoint.version.as_i64())
            .bind(&checkpoint.flow_state)
            .bind(checkpoint.next_deadline)
            .bind(checkpoint.expires_at)
            .bind(checkpoint.created_at)
            .bind(checkpoint.updated_at)
            .bind(&checkpoint.state)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                // A concurrent insert of the same transaction won the race
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("workflow_transactions_pkey")
                {
                    metrics::counter!("transaction_store_conflicts_total").increment(1);
                    return TransactionStoreError::ConcurrencyConflict {
                        workflow_id: workflow_id.clone(),
                        transaction_id: transaction_id.clone(),
                        expected: options.expected_version.unwrap_or(Version::initial()),
                        actual: checkpoint.version,
                    };
                }
                TransactionStoreError::Database(e)
            })?;
        } else {
            sqlx::query(
                r#"
                UPDATE workflow_transactions
                SET version = $3, flow_state = $4, next_deadline = $5, expires_at = $6, updated_at = $7, state = $8
                WHERE workflow_id = $1 AND transaction_id = $2
                "#,
            )
            .bind(workflow_id.as_str())
            .bind(transaction_id.as_str())
            .bind(checkpoint.version.as_i64())
            .bind(&checkpoint.flow_state)
            .bind(checkpoint.next_deadline)
            .bind(checkpoint.expires_at)
            .bind(checkpoint.updated_at)
            .bind(&checkpoint.state)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            workflow_id = %workflow_id,
            transaction_id = %transaction_id,
            version = %checkpoint.version,
            flow_state = %checkpoint.flow_state,
            "Saved transaction checkpoint"
        );

        Ok(checkpoint.version)
    }

    async fn delete_transaction(
        &self,
        workflow_id: &WorkflowId,
        transaction_id: &TransactionId,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM workflow_transactions WHERE workflow_id = $1 AND transaction_id = $2",
        )
        .bind(workflow_id.as_str())
        .bind(transaction_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_transactions(
        &self,
        query: TransactionQuery,
    ) -> Result<Vec<TransactionCheckpoint>> {
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM workflow_transactions WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.workflow_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND workflow_id = ${param_count}"));
        }
        if query.flow_states.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND flow_state = ANY(${param_count})"));
        }
        if query.deadline_before.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND next_deadline <= ${param_count}"));
        }
        if query.expired_before.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND expires_at <= ${param_count}"));
        }

        sql.push_str(" ORDER BY updated_at ASC, transaction_id ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.workflow_id {
            sqlx_query = sqlx_query.bind(id.as_str().to_string());
        }
        if let Some(states) = query.flow_states {
            sqlx_query = sqlx_query.bind(states);
        }
        if let Some(at) = query.deadline_before {
            sqlx_query = sqlx_query.bind(at);
        }
        if let Some(at) = query.expired_before {
            sqlx_query = sqlx_query.bind(at);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_checkpoint).collect()
    }
}
