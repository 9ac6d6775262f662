use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use stepwise_core::config::DatabaseConfig;
use stepwise_core::{
    ExecutionResult, ExecutionState, NodeExecution, Outputs, QueueItem, Result,
    ScheduledActionCall, StepError, Subscription,
};

use super::Store;

/// The internal schema, embedded from the migrations directory.
const STEPWISE_INTERNAL_SQL: &str = include_str!("../../migrations/0000_stepwise_internal.sql");

fn db_err(e: sqlx::Error) -> StepError {
    StepError::Database(e.to_string())
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the database configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.url)
            .await
            .map_err(|e| StepError::Database(format!("Failed to connect: {}", e)))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the internal tables if they do not exist.
    pub async fn migrate(&self) -> Result<()> {
        for statement in split_statements(STEPWISE_INTERNAL_SQL) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StepError::Database(format!("Migration failed: {}", e)))?;
        }
        tracing::info!("Applied stepwise schema");
        Ok(())
    }
}

/// Split a migration into statements, dropping comment-only chunks.
fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|statement| !statement.is_empty())
        .collect()
}

fn execution_from_row(row: &PgRow) -> Result<NodeExecution> {
    let state: String = row.try_get("state").map_err(db_err)?;
    let result: Option<serde_json::Value> = row.try_get("result").map_err(db_err)?;
    let outputs: serde_json::Value = row.try_get("outputs").map_err(db_err)?;

    Ok(NodeExecution {
        id: row.try_get("id").map_err(db_err)?,
        workflow_id: row.try_get("workflow_id").map_err(db_err)?,
        node_id: row.try_get("node_id").map_err(db_err)?,
        root_event_id: row.try_get("root_event_id").map_err(db_err)?,
        state: state.parse::<ExecutionState>()?,
        result: result
            .map(serde_json::from_value::<ExecutionResult>)
            .transpose()?,
        outputs: serde_json::from_value::<Outputs>(outputs)?,
        metadata: row.try_get("metadata").map_err(db_err)?,
        input: row.try_get("input").map_err(db_err)?,
        source_node_id: row.try_get("source_node_id").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
        finished_at: row.try_get("finished_at").map_err(db_err)?,
    })
}

fn queue_item_from_row(row: &PgRow) -> Result<QueueItem> {
    Ok(QueueItem {
        id: row.try_get("id").map_err(db_err)?,
        workflow_id: row.try_get("workflow_id").map_err(db_err)?,
        node_id: row.try_get("node_id").map_err(db_err)?,
        source_node_id: row.try_get("source_node_id").map_err(db_err)?,
        channel: row.try_get("channel").map_err(db_err)?,
        root_event_id: row.try_get("root_event_id").map_err(db_err)?,
        data: row.try_get("data").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

fn call_from_row(row: &PgRow) -> Result<ScheduledActionCall> {
    Ok(ScheduledActionCall {
        id: row.try_get("id").map_err(db_err)?,
        execution_id: row.try_get("execution_id").map_err(db_err)?,
        action: row.try_get("action").map_err(db_err)?,
        parameters: row.try_get("parameters").map_err(db_err)?,
        run_at: row.try_get("run_at").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription> {
    Ok(Subscription {
        id: row.try_get("id").map_err(db_err)?,
        execution_id: row.try_get("execution_id").map_err(db_err)?,
        workflow_id: row.try_get("workflow_id").map_err(db_err)?,
        node_id: row.try_get("node_id").map_err(db_err)?,
        event: row.try_get("event").map_err(db_err)?,
        action: row.try_get("action").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

const EXECUTION_COLUMNS: &str = "id, workflow_id, node_id, root_event_id, state, result, outputs, \
     metadata, input, source_node_id, created_at, updated_at, finished_at";

impl Store for PgStore {
    async fn insert_execution(&self, execution: &NodeExecution) -> Result<()> {
        let result = execution
            .result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO stepwise_executions (
                id, workflow_id, node_id, root_event_id, state, result, outputs,
                metadata, input, source_node_id, created_at, updated_at, finished_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(execution.id)
        .bind(&execution.workflow_id)
        .bind(&execution.node_id)
        .bind(execution.root_event_id)
        .bind(execution.state.as_str())
        .bind(result)
        .bind(serde_json::to_value(&execution.outputs)?)
        .bind(&execution.metadata)
        .bind(&execution.input)
        .bind(&execution.source_node_id)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .bind(execution.finished_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn update_execution(&self, execution: &NodeExecution) -> Result<()> {
        let result = execution
            .result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let updated = sqlx::query(
            r#"
            UPDATE stepwise_executions
            SET state = $2, result = $3, outputs = $4, metadata = $5, input = $6,
                updated_at = $7, finished_at = $8
            WHERE id = $1
            "#,
        )
        .bind(execution.id)
        .bind(execution.state.as_str())
        .bind(result)
        .bind(serde_json::to_value(&execution.outputs)?)
        .bind(&execution.metadata)
        .bind(&execution.input)
        .bind(execution.updated_at)
        .bind(execution.finished_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Err(StepError::NotFound(format!("execution {}", execution.id)));
        }
        Ok(())
    }

    async fn find_execution(&self, id: Uuid) -> Result<Option<NodeExecution>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM stepwise_executions WHERE id = $1",
            EXECUTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn executions(&self, workflow_id: &str, node_id: &str) -> Result<Vec<NodeExecution>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM stepwise_executions WHERE workflow_id = $1 AND node_id = $2 ORDER BY seq",
            EXECUTION_COLUMNS
        ))
        .bind(workflow_id)
        .bind(node_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn enqueue(&self, item: &QueueItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stepwise_queue_items (
                id, workflow_id, node_id, source_node_id, channel, root_event_id, data, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(item.id)
        .bind(&item.workflow_id)
        .bind(&item.node_id)
        .bind(&item.source_node_id)
        .bind(&item.channel)
        .bind(item.root_event_id)
        .bind(&item.data)
        .bind(item.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn queue_items(&self, workflow_id: &str, node_id: &str) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, node_id, source_node_id, channel, root_event_id, data, created_at
            FROM stepwise_queue_items
            WHERE workflow_id = $1 AND node_id = $2
            ORDER BY seq
            "#,
        )
        .bind(workflow_id)
        .bind(node_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(queue_item_from_row).collect()
    }

    async fn delete_queue_item(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM stepwise_queue_items WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn schedule(&self, call: &ScheduledActionCall) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stepwise_scheduled_calls (id, execution_id, action, parameters, run_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(call.id)
        .bind(call.execution_id)
        .bind(&call.action)
        .bind(&call.parameters)
        .bind(call.run_at)
        .bind(call.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn due_calls(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledActionCall>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT id, execution_id, action, parameters, run_at, created_at
            FROM stepwise_scheduled_calls
            WHERE run_at <= $1
            ORDER BY run_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(call_from_row).collect()
    }

    async fn delete_call(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM stepwise_scheduled_calls WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn subscribe(&self, subscription: &Subscription) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stepwise_subscriptions (id, execution_id, workflow_id, node_id, event, action, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (execution_id, event, action) DO NOTHING
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.execution_id)
        .bind(&subscription.workflow_id)
        .bind(&subscription.node_id)
        .bind(&subscription.event)
        .bind(&subscription.action)
        .bind(subscription.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn subscriptions(
        &self,
        workflow_id: &str,
        node_id: &str,
        event: &str,
    ) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            r#"
            SELECT id, execution_id, workflow_id, node_id, event, action, created_at
            FROM stepwise_subscriptions
            WHERE workflow_id = $1 AND node_id = $2 AND event = $3
            ORDER BY seq
            "#,
        )
        .bind(workflow_id)
        .bind(node_id)
        .bind(event)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(subscription_from_row).collect()
    }

    async fn remove_subscriptions(&self, execution_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM stepwise_subscriptions WHERE execution_id = $1")
            .bind(execution_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
