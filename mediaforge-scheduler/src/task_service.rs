//! Task service: task creation, cancellation, and lookup. The
//! single entry point outside the scheduler loop that is allowed to
//! insert a task row or charge an account.

use chrono::Utc;
use mediaforge_billing::BillingEngine;
use mediaforge_core::errors::{TaskError, TaskResult};
use mediaforge_core::types::{LogLevel, ResourceType, Task, TaskResource, TaskStatus, TaskType};
use serde_json::{json, Value as Json};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// One input artifact supplied at creation time.
#[derive(Debug, Clone)]
pub struct InputResource {
    pub resource_type: ResourceType,
    pub url: String,
    pub metadata: Json,
}

#[derive(Debug, Clone)]
pub struct CreateTaskParams {
    pub account_id: Uuid,
    pub name: String,
    pub task_type: TaskType,
    pub config: Json,
    pub estimated_duration: Option<f64>,
    pub estimated_count: Option<f64>,
    pub inputs: Vec<InputResource>,
}

/// Pagination/filter options for `list`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub status: Option<TaskStatus>,
    pub limit: i64,
    pub offset: i64,
}

/// `get`'s return shape: the task plus its input and output resources,
/// split the way `task_resources.is_input` splits them.
#[derive(Debug, Clone)]
pub struct TaskDetail {
    pub task: Task,
    pub inputs: Vec<TaskResource>,
    pub outputs: Vec<TaskResource>,
}

/// `list`'s return shape: a page of tasks plus the total matching the
/// same filter, ignoring `limit`/`offset`.
#[derive(Debug, Clone)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: i64,
}

pub struct TaskService {
    pool: PgPool,
    billing: Arc<BillingEngine>,
}

impl TaskService {
    pub fn new(pool: PgPool, billing: Arc<BillingEngine>) -> Self {
        Self { pool, billing }
    }

    /// Estimate cost, insert the task `pending`, charge the account, and
    /// record the input resources, all inside one transaction.
    pub async fn create(&self, params: CreateTaskParams) -> TaskResult<Task> {
        let estimate = self
            .billing
            .estimate(
                &self.pool,
                params.task_type,
                params.estimated_duration,
                params.estimated_count,
            )
            .await?;

        let mut tx = self.pool.begin().await?;
        let task_id = Uuid::new_v4();
        let now = Utc::now();

        let task = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks
                (id, account_id, name, task_type, status, config, pricing_id, billing_type,
                 estimated_cost, estimated_usage, actual_cost, actual_usage, external_task_id,
                 retry_count, next_retry_at, created_at, updated_at, started_at, completed_at, result)
            VALUES
                ($1, $2, $3, $4, 'pending', $5, $6, (SELECT billing_type FROM pricing_configs WHERE id = $6),
                 $7, $8, NULL, NULL, NULL, 0, NULL, $9, $9, NULL, NULL, '[]')
            RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(params.account_id)
        .bind(&params.name)
        .bind(params.task_type)
        .bind(&params.config)
        .bind(estimate.pricing_id)
        .bind(estimate.cost)
        .bind(estimate.usage)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        self.billing
            .charge(&mut tx, params.account_id, estimate.cost, Some(task_id))
            .await?;

        for input in &params.inputs {
            sqlx::query(
                r#"
                INSERT INTO task_resources (id, task_id, resource_type, is_input, url, metadata)
                VALUES ($1, $2, $3, true, $4, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(task_id)
            .bind(input.resource_type)
            .bind(&input.url)
            .bind(&input.metadata)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO task_logs (id, task_id, level, message, data) VALUES ($1, $2, 'info', 'task created', $3)",
        )
        .bind(Uuid::new_v4())
        .bind(task_id)
        .bind(json!({ "estimated_cost": estimate.cost }))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(task_id = %task.id, task_type = ?params.task_type, cost = estimate.cost, "task created");
        Ok(task)
    }

    /// Reject unless the task is still `pending`; transition to
    /// `cancelled`, then refund the full estimate. The refund
    /// happens after the state transition commits, mirroring the
    /// settle/refund split used by the executor's Handler path.
    pub async fn cancel(&self, task_id: Uuid) -> TaskResult<Task> {
        let mut tx = self.pool.begin().await?;

        let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(TaskError::NotFound(task_id))?;

        if task.status != TaskStatus::Pending {
            return Err(TaskError::NotCancellable {
                task_id,
                status: format!("{:?}", task.status),
            });
        }

        let now = Utc::now();
        let cancelled = sqlx::query_as::<_, Task>(
            "UPDATE tasks SET status = 'cancelled', completed_at = $1, updated_at = $1 \
             WHERE id = $2 RETURNING *",
        )
        .bind(now)
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO task_logs (id, task_id, level, message, data) VALUES ($1, $2, 'info', 'task cancelled', '{}')",
        )
        .bind(Uuid::new_v4())
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.billing
            .refund(&self.pool, cancelled.account_id, task_id, cancelled.estimated_cost)
            .await?;

        info!(task_id = %task_id, "task cancelled, refunded");
        Ok(cancelled)
    }

    pub async fn get(&self, task_id: Uuid) -> TaskResult<TaskDetail> {
        let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(TaskError::NotFound(task_id))?;

        let mut resources = sqlx::query_as::<_, TaskResource>(
            "SELECT * FROM task_resources WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for resource in resources.drain(..) {
            if resource.is_input {
                inputs.push(resource);
            } else {
                outputs.push(resource);
            }
        }

        Ok(TaskDetail {
            task,
            inputs,
            outputs,
        })
    }

    pub async fn list(&self, account_id: Uuid, opts: ListOptions) -> TaskResult<TaskPage> {
        let limit = if opts.limit > 0 { opts.limit } else { 50 };
        let (tasks, total) = match opts.status {
            Some(status) => {
                let tasks = sqlx::query_as::<_, Task>(
                    "SELECT * FROM tasks WHERE account_id = $1 AND status = $2 \
                     ORDER BY created_at DESC LIMIT $3 OFFSET $4",
                )
                .bind(account_id)
                .bind(status)
                .bind(limit)
                .bind(opts.offset)
                .fetch_all(&self.pool)
                .await?;

                let total: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM tasks WHERE account_id = $1 AND status = $2",
                )
                .bind(account_id)
                .bind(status)
                .fetch_one(&self.pool)
                .await?;

                (tasks, total)
            }
            None => {
                let tasks = sqlx::query_as::<_, Task>(
                    "SELECT * FROM tasks WHERE account_id = $1 \
                     ORDER BY created_at DESC LIMIT $2 OFFSET $3",
                )
                .bind(account_id)
                .bind(limit)
                .bind(opts.offset)
                .fetch_all(&self.pool)
                .await?;

                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE account_id = $1")
                    .bind(account_id)
                    .fetch_one(&self.pool)
                    .await?;

                (tasks, total)
            }
        };
        Ok(TaskPage { tasks, total })
    }

    pub async fn log(&self, task_id: Uuid, level: LogLevel, message: &str, data: Json) -> TaskResult<()> {
        sqlx::query(
            "INSERT INTO task_logs (id, task_id, level, message, data) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(task_id)
        .bind(level)
        .bind(message)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_options_default_has_no_filter() {
        let opts = ListOptions::default();
        assert!(opts.status.is_none());
        assert_eq!(opts.limit, 0);
    }
}
