use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, SagaId, SagaInstance, SagaQuery, SagaStoreError, StepExecution, Version,
    store::SagaStore,
};

const SAGA_COLUMNS: &str = "saga_id, flow_name, current_step, status, context, error_step, \
     error_message, created_at, updated_at, completed_at, version";

const STEP_COLUMNS: &str = "saga_id, step_name, topic, status, request_data, response_data, \
     error_message, created_at, ended_at";

/// PostgreSQL-backed saga store.
///
/// Sagas live in `saga_instances`; step executions live in
/// `saga_step_executions`, keyed by a serial id with a foreign key back to
/// the saga.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
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

    fn row_to_saga(row: &PgRow, steps: Vec<StepExecution>) -> Result<SagaInstance> {
        let context_json: serde_json::Value = row.try_get("context")?;
        let status: String = row.try_get("status")?;

        Ok(SagaInstance {
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            flow_name: row.try_get("flow_name")?,
            current_step: row.try_get("current_step")?,
            context: serde_json::from_value(context_json)?,
            status: status.parse()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
            error_step: row.try_get("error_step")?,
            error_message: row.try_get("error_message")?,
            version: Version::new(row.try_get("version")?),
            steps,
        })
    }

    fn row_to_step(row: &PgRow) -> Result<StepExecution> {
        let request: serde_json::Value = row.try_get("request_data")?;
        let response: serde_json::Value = row.try_get("response_data")?;
        let status: String = row.try_get("status")?;

        Ok(StepExecution {
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            step_name: row.try_get("step_name")?,
            topic: row.try_get("topic")?,
            status: status.parse()?,
            request: serde_json::from_value(request)?,
            response: serde_json::from_value(response)?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            ended_at: row.try_get("ended_at")?,
        })
    }

    /// Loads step executions for several sagas at once, grouped by saga.
    async fn load_steps(&self, saga_ids: &[Uuid]) -> Result<HashMap<SagaId, Vec<StepExecution>>> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM saga_step_executions WHERE saga_id = ANY($1) ORDER BY id ASC"
        ))
        .bind(saga_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<SagaId, Vec<StepExecution>> = HashMap::new();
        for row in &rows {
            let step = Self::row_to_step(row)?;
            grouped.entry(step.saga_id).or_default().push(step);
        }
        Ok(grouped)
    }

    async fn insert_steps(
        tx: &mut Transaction<'_, Postgres>,
        saga: &SagaInstance,
    ) -> Result<()> {
        for step in saga.steps() {
            sqlx::query(
                r#"
                INSERT INTO saga_step_executions
                    (saga_id, step_name, topic, status, request_data, response_data, error_message, created_at, ended_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(saga.saga_id().as_uuid())
            .bind(&step.step_name)
            .bind(&step.topic)
            .bind(step.status.as_str())
            .bind(serde_json::to_value(&step.request)?)
            .bind(serde_json::to_value(&step.response)?)
            .bind(&step.error_message)
            .bind(step.created_at)
            .bind(step.ended_at)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn create(&self, saga: &SagaInstance) -> Result<Version> {
        let saga_id = saga.saga_id();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO saga_instances
                (saga_id, flow_name, current_step, status, context, error_step, error_message, created_at, updated_at, completed_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(saga_id.as_uuid())
        .bind(saga.flow_name())
        .bind(saga.current_step())
        .bind(saga.status().as_str())
        .bind(serde_json::to_value(saga.context())?)
        .bind(saga.error_step())
        .bind(saga.error_message())
        .bind(saga.created_at())
        .bind(saga.updated_at())
        .bind(saga.completed_at())
        .bind(Version::first().as_i64())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("saga_instances_pkey")
            {
                return SagaStoreError::AlreadyExists(saga_id);
            }
            SagaStoreError::Database(e)
        })?;

        Self::insert_steps(&mut tx, saga).await?;
        tx.commit().await?;

        Ok(Version::first())
    }

    async fn get_by_id(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {SAGA_COLUMNS} FROM saga_instances WHERE saga_id = $1"
        ))
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let steps = self
            .load_steps(&[saga_id.as_uuid()])
            .await?
            .remove(&saga_id)
            .unwrap_or_default();

        Self::row_to_saga(&row, steps).map(Some)
    }

    async fn update(&self, saga: &SagaInstance) -> Result<Version> {
        let saga_id = saga.saga_id();
        let expected = saga.version();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE saga_instances
            SET flow_name = $2, current_step = $3, status = $4, context = $5, error_step = $6,
                error_message = $7, updated_at = $8, completed_at = $9, version = version + 1
            WHERE saga_id = $1 AND version = $10
            "#,
        )
        .bind(saga_id.as_uuid())
        .bind(saga.flow_name())
        .bind(saga.current_step())
        .bind(saga.status().as_str())
        .bind(serde_json::to_value(saga.context())?)
        .bind(saga.error_step())
        .bind(saga.error_message())
        .bind(saga.updated_at())
        .bind(saga.completed_at())
        .bind(expected.as_i64())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM saga_instances WHERE saga_id = $1")
                    .bind(saga_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;

            return Err(match actual {
                Some(actual) => SagaStoreError::ConcurrencyConflict {
                    saga_id,
                    expected,
                    actual: Version::new(actual),
                },
                None => SagaStoreError::SagaNotFound(saga_id),
            });
        }

        // Children are replaced wholesale rather than diffed.
        sqlx::query("DELETE FROM saga_step_executions WHERE saga_id = $1")
            .bind(saga_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        Self::insert_steps(&mut tx, saga).await?;

        tx.commit().await?;
        Ok(expected.next())
    }

    async fn delete(&self, saga_id: SagaId) -> Result<bool> {
        // Step executions go with the saga through ON DELETE CASCADE.
        let deleted = sqlx::query("DELETE FROM saga_instances WHERE saga_id = $1")
            .bind(saga_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn query(&self, query: SagaQuery) -> Result<Vec<SagaInstance>> {
        let mut sql = format!("SELECT {SAGA_COLUMNS} FROM saga_instances WHERE 1=1");
        let mut param_count = 0;

        let statuses = query.status_names();
        if statuses.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ANY(${param_count})"));
        }
        if query.flow_name.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND flow_name = ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at ASC");

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = query.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        let mut q = sqlx::query(&sql);
        if let Some(statuses) = statuses {
            q = q.bind(statuses);
        }
        if let Some(ref flow_name) = query.flow_name {
            q = q.bind(flow_name);
        }

        let rows = q.fetch_all(&self.pool).await?;
        let ids: Vec<Uuid> = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("saga_id"))
            .collect::<std::result::Result<_, _>>()?;
        let mut steps = self.load_steps(&ids).await?;

        rows.iter()
            .map(|row| {
                let saga_id = SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?);
                Self::row_to_saga(row, steps.remove(&saga_id).unwrap_or_default())
            })
            .collect()
    }
}
