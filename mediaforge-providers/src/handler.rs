//! Handler contract and `DefaultHandler`: post-execution
//! orchestration — artifact upload, resource persistence, state-gated
//! transition, and billing settle/refund.

use crate::provider::ProviderOutput;
use crate::uploader::ArtifactUploader;
use async_trait::async_trait;
use chrono::Utc;
use mediaforge_billing::BillingEngine;
use mediaforge_core::errors::ConfigurationResult;
use mediaforge_core::types::{LogLevel, ResourceType, Task, TaskMode, TaskType};
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Each Handler declares the task type it serves and implements the two
/// post-execution paths. Concrete Handlers subclass `DefaultHandler`
/// chiefly to add alerting hooks.
#[async_trait]
pub trait Handler: Send + Sync {
    fn task_type(&self) -> TaskType;

    async fn handle_completion(
        &self,
        task: &Task,
        outputs: Vec<ProviderOutput>,
        actual_usage: Option<f64>,
    );

    async fn handle_failure(&self, task: &Task, error: &str, retryable: bool, error_code: Option<&str>);

    /// A task stuck `processing` past its mode's liveness threshold.
    /// Unlike an ordinary provider failure, this always attempts a retry
    /// regardless of mode — a dead worker says nothing about whether the
    /// provider call itself would succeed again.
    async fn handle_timeout(&self, task: &Task);
}

/// `retry_count < max_retries` as a named predicate, so the retry-bound
/// invariant has one place to check rather than an inline comparison at
/// every call site.
fn should_retry(retry_count: i32, max_retries: i32) -> bool {
    retry_count < max_retries
}

/// Async-mode timeouts resume polling the same upstream job; sync-mode
/// timeouts (and sync tasks never carry a meaningful external id anyway)
/// clear it so the next attempt submits from scratch.
fn clear_external_id_for_timeout(mode: TaskMode) -> bool {
    mode == TaskMode::Sync
}

/// Typed `TaskType -> Handler` lookup, mirroring `ProviderRegistry`.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) -> ConfigurationResult<()> {
        let task_type = handler.task_type();
        if self.handlers.contains_key(&task_type) {
            return Err(mediaforge_core::errors::ConfigurationError::DuplicateRegistration(
                task_type.as_str().to_string(),
            ));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&task_type).cloned()
    }
}

/// The canonical Handler implementation. Generic over which `TaskType`
/// it serves so one struct covers every task type that needs no extra
/// alerting hook.
pub struct DefaultHandler {
    task_type: TaskType,
    pool: PgPool,
    billing: Arc<BillingEngine>,
    uploader: Arc<ArtifactUploader>,
    max_retries: i32,
    backoff: Arc<dyn Fn(i32) -> std::time::Duration + Send + Sync>,
}

impl DefaultHandler {
    pub fn new(
        task_type: TaskType,
        pool: PgPool,
        billing: Arc<BillingEngine>,
        uploader: Arc<ArtifactUploader>,
        max_retries: i32,
        backoff: Arc<dyn Fn(i32) -> std::time::Duration + Send + Sync>,
    ) -> Self {
        Self {
            task_type,
            pool,
            billing,
            uploader,
            max_retries,
            backoff,
        }
    }

    async fn log(&self, task_id: Uuid, level: LogLevel, message: &str, data: serde_json::Value) {
        let result = sqlx::query(
            "INSERT INTO task_logs (id, task_id, level, message, data) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(task_id)
        .bind(level)
        .bind(message)
        .bind(data)
        .execute(&self.pool)
        .await;
        if let Err(e) = result {
            error!(%task_id, error = %e, "failed to write task log");
        }
    }

    /// State-gated transition to `failed` plus a full refund, shared by
    /// every terminal-failure path (sync failure, exhausted async
    /// retries, exhausted timeout retries).
    async fn fail_and_refund(&self, task: &Task) {
        let rows = sqlx::query(
            "UPDATE tasks SET status = 'failed', completed_at = $1, updated_at = $1 \
             WHERE id = $2 AND status = 'processing'",
        )
        .bind(Utc::now())
        .bind(task.id)
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected())
        .unwrap_or(0);

        if rows > 0 {
            if let Err(e) = self
                .billing
                .refund(&self.pool, task.account_id, task.id, task.estimated_cost)
                .await
            {
                error!(task_id = %task.id, error = %e, "refund failed after terminal transition");
            }
        }
    }
}

#[async_trait]
impl Handler for DefaultHandler {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    async fn handle_completion(
        &self,
        task: &Task,
        outputs: Vec<ProviderOutput>,
        actual_usage: Option<f64>,
    ) {
        let resource_type = match task.category() {
            mediaforge_core::types::Category::Video => ResourceType::Video,
            mediaforge_core::types::Category::Image => ResourceType::Image,
            mediaforge_core::types::Category::Audio => ResourceType::Audio,
        };

        // 1. upload every output, deriving filename/key/extension.
        let mut stored = Vec::with_capacity(outputs.len());
        for (index, output) in outputs.iter().enumerate() {
            match self
                .uploader
                .upload(
                    task.account_id,
                    task.task_type.as_str(),
                    task.id,
                    index,
                    &output.url,
                    resource_type,
                )
                .await
            {
                Ok(stored_url) => stored.push((stored_url, output.metadata.clone())),
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "artifact upload failed");
                    self.handle_failure(task, &e.to_string(), true, None).await;
                    return;
                }
            }
        }

        // 2. compute actual cost: ceil(actual_usage * unit_price) if
        // usage is known and pricing available, else fall back to the
        // estimate.
        let actual_cost = match actual_usage {
            Some(usage) => {
                match self
                    .billing
                    .estimate(&self.pool, task.task_type, None, Some(usage))
                    .await
                {
                    Ok(est) => est.cost,
                    Err(_) => task.estimated_cost,
                }
            }
            None => task.estimated_cost,
        };

        // 3. persist output resources.
        for (url, metadata) in &stored {
            if let Err(e) = sqlx::query(
                r#"
                INSERT INTO task_resources (id, task_id, resource_type, is_input, url, metadata)
                VALUES ($1, $2, $3, false, $4, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(task.id)
            .bind(resource_type)
            .bind(url)
            .bind(metadata)
            .execute(&self.pool)
            .await
            {
                error!(task_id = %task.id, error = %e, "failed to persist output resource");
            }
        }

        let result_json = json!(stored
            .iter()
            .map(|(url, metadata)| json!({ "url": url, "metadata": metadata }))
            .collect::<Vec<_>>());

        // 4. state-gated transition: only if still `processing`.
        let rows = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'completed', completed_at = $1, actual_cost = $2,
                actual_usage = $3, result = $4, updated_at = $1
            WHERE id = $5 AND status = 'processing'
            "#,
        )
        .bind(Utc::now())
        .bind(actual_cost)
        .bind(actual_usage)
        .bind(&result_json)
        .bind(task.id)
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected())
        .unwrap_or(0);

        if rows == 0 {
            // Another worker already concluded this task; abort silently.
            return;
        }

        // 5. settle billing.
        if let Err(e) = self
            .billing
            .settle(&self.pool, task.account_id, task.id, task.estimated_cost, actual_cost)
            .await
        {
            error!(task_id = %task.id, error = %e, "settlement failed after completion");
        }

        info!(task_id = %task.id, actual_cost, "task completed");
    }

    async fn handle_failure(
        &self,
        task: &Task,
        error_message: &str,
        retryable: bool,
        error_code: Option<&str>,
    ) {
        self.log(
            task.id,
            LogLevel::Error,
            error_message,
            json!({ "error_code": error_code, "retryable": retryable }),
        )
        .await;

        match task.mode() {
            TaskMode::Sync => {
                // Synchronous providers perform their own in-call retries;
                // there is no system-level retry here.
                self.fail_and_refund(task).await;
            }
            TaskMode::Async => {
                if retryable && should_retry(task.retry_count, self.max_retries) {
                    let delay = (self.backoff)(task.retry_count);
                    let next_retry_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();

                    // Preserve external_task_id for query failures (continue
                    // polling the same upstream job); the caller is
                    // responsible for clearing it on submit failures by
                    // not having set it in the first place.
                    let rows = sqlx::query(
                        r#"
                        UPDATE tasks
                        SET status = 'pending', retry_count = retry_count + 1,
                            next_retry_at = $1, updated_at = $2
                        WHERE id = $3 AND status = 'processing'
                        "#,
                    )
                    .bind(next_retry_at)
                    .bind(Utc::now())
                    .bind(task.id)
                    .execute(&self.pool)
                    .await
                    .map(|r| r.rows_affected())
                    .unwrap_or(0);

                    if rows > 0 {
                        warn!(task_id = %task.id, retry_count = task.retry_count + 1, "task scheduled for retry");
                    }
                } else {
                    self.fail_and_refund(task).await;
                }
            }
        }
    }

    async fn handle_timeout(&self, task: &Task) {
        self.log(
            task.id,
            LogLevel::Error,
            "task exceeded timeout threshold",
            json!({ "error_code": "TIMEOUT" }),
        )
        .await;

        if should_retry(task.retry_count, self.max_retries) {
            let delay = (self.backoff)(task.retry_count);
            let next_retry_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            let clear_external = clear_external_id_for_timeout(task.mode());

            let rows = sqlx::query(
                r#"
                UPDATE tasks
                SET status = 'pending', retry_count = retry_count + 1,
                    next_retry_at = $1, updated_at = $2,
                    external_task_id = CASE WHEN $3 THEN NULL ELSE external_task_id END
                WHERE id = $4 AND status = 'processing'
                "#,
            )
            .bind(next_retry_at)
            .bind(Utc::now())
            .bind(clear_external)
            .bind(task.id)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .unwrap_or(0);

            if rows > 0 {
                warn!(task_id = %task.id, retry_count = task.retry_count + 1, "task timed out, scheduled for retry");
            }
        } else {
            self.fail_and_refund(task).await;
        }
    }
}

#[cfg(test)]
mod predicate_tests {
    use super::*;

    #[test]
    fn should_retry_respects_max_retries_boundary() {
        assert!(should_retry(0, 3));
        assert!(should_retry(2, 3));
        assert!(!should_retry(3, 3));
        assert!(!should_retry(4, 3));
    }

    #[test]
    fn clear_external_id_for_timeout_only_clears_sync() {
        assert!(clear_external_id_for_timeout(TaskMode::Sync));
        assert!(!clear_external_id_for_timeout(TaskMode::Async));
    }
}
