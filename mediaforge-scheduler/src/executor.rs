//! Executor: dispatches a claimed task to its Provider and routes
//! the outcome to its Handler. Never touches billing or task-status rows
//! directly — that responsibility belongs to `TaskService` (creation) and
//! the `Handler` (conclusion).

use mediaforge_core::types::{Task, TaskMode, TaskResource};
use mediaforge_providers::{
    Handler, HandlerRegistry, Provider, ProviderRegistry, QueryStatus,
};
use sqlx::PgPool;
use tracing::warn;

pub struct Executor {
    pool: PgPool,
    providers: ProviderRegistry,
    handlers: HandlerRegistry,
}

impl Executor {
    pub fn new(pool: PgPool, providers: ProviderRegistry, handlers: HandlerRegistry) -> Self {
        Self {
            pool,
            providers,
            handlers,
        }
    }

    /// Run a freshly claimed task to its first outcome: either a
    /// synchronous result or an async submission.
    pub async fn execute_task(&self, task: Task) {
        // Re-entry: an async job already has an upstream id, so this claim
        // came from a retried poll, not a fresh submission. Leave it
        // `processing` for the poll loop rather than resubmitting.
        if task.mode() == TaskMode::Async && task.external_task_id.is_some() {
            return;
        }

        let (provider, handler) = match self.resolve(&task) {
            Some(pair) => pair,
            None => return,
        };

        let inputs = match self.load_inputs(task.id).await {
            Ok(inputs) => inputs,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "failed to load task inputs");
                handler
                    .handle_failure(&task, &e.to_string(), true, None)
                    .await;
                return;
            }
        };

        let result = provider.execute(&task, &inputs).await;

        if result.success {
            if let Some(outputs) = result.outputs {
                // Synchronous provider: the outcome is already final.
                handler
                    .handle_completion(&task, outputs, result.actual_usage)
                    .await;
            } else if let Some(external_id) = result.external_task_id {
                // Asynchronous provider: record the job id and leave the
                // task `processing`; the poll loop picks it up later.
                if let Err(e) = sqlx::query(
                    "UPDATE tasks SET external_task_id = $1, updated_at = NOW() WHERE id = $2",
                )
                .bind(&external_id)
                .bind(task.id)
                .execute(&self.pool)
                .await
                {
                    warn!(task_id = %task.id, error = %e, "failed to record external_task_id");
                }
            }
        } else {
            let message = result.error.unwrap_or_else(|| "provider execution failed".to_string());
            handler
                .handle_failure(&task, &message, result.retryable, result.error_code.as_deref())
                .await;
        }
    }

    /// Poll an in-flight async task and route the outcome.
    pub async fn query_async_task(&self, task: Task) {
        let (provider, handler) = match self.resolve(&task) {
            Some(pair) => pair,
            None => return,
        };

        let result = provider.query(&task).await;

        match result.status {
            QueryStatus::Pending => {
                // Still running upstream; nothing to do until the next poll.
            }
            QueryStatus::Completed => {
                handler
                    .handle_completion(&task, result.outputs.unwrap_or_default(), result.actual_usage)
                    .await;
            }
            QueryStatus::Failed => {
                let message = result.error.unwrap_or_else(|| "provider query failed".to_string());
                handler
                    .handle_failure(&task, &message, result.retryable, result.error_code.as_deref())
                    .await;
            }
        }
    }

    fn resolve(&self, task: &Task) -> Option<(std::sync::Arc<dyn Provider>, std::sync::Arc<dyn Handler>)> {
        let provider = self.providers.get(task.task_type);
        let handler = self.handlers.get(task.task_type);
        match (provider, handler) {
            (Some(p), Some(h)) => Some((p, h)),
            _ => {
                warn!(task_id = %task.id, task_type = ?task.task_type, "no provider/handler registered");
                None
            }
        }
    }

    async fn load_inputs(&self, task_id: uuid::Uuid) -> Result<Vec<TaskResource>, sqlx::Error> {
        sqlx::query_as::<_, TaskResource>(
            "SELECT * FROM task_resources WHERE task_id = $1 AND is_input = true",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use mediaforge_core::types::{BillingType, TaskStatus, TaskType};
    use mediaforge_providers::{FakeProvider, ProviderExecuteResult, ProviderOutput, ProviderQueryResult, QueryStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    fn lazy_pool() -> PgPool {
        PgPool::connect_lazy("postgres://localhost/mediaforge_test_unused")
            .expect("lazy pool construction does not need a live connection")
    }

    fn make_task(task_type: TaskType, status: TaskStatus, external_task_id: Option<String>) -> Task {
        Task {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            name: "test task".to_string(),
            task_type,
            status,
            config: serde_json::json!({}),
            pricing_id: Uuid::new_v4(),
            billing_type: BillingType::PerUnit,
            estimated_cost: 100,
            estimated_usage: 1.0,
            actual_cost: None,
            actual_usage: None,
            external_task_id,
            retry_count: 0,
            next_retry_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: serde_json::json!([]),
        }
    }

    #[derive(Default)]
    struct FakeHandler {
        task_type: Option<TaskType>,
        completion_calls: AtomicUsize,
        failure_calls: AtomicUsize,
        timeout_calls: AtomicUsize,
    }

    impl FakeHandler {
        fn new(task_type: TaskType) -> Self {
            Self {
                task_type: Some(task_type),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Handler for FakeHandler {
        fn task_type(&self) -> TaskType {
            self.task_type.expect("task_type set by FakeHandler::new")
        }

        async fn handle_completion(&self, _task: &Task, _outputs: Vec<ProviderOutput>, _actual_usage: Option<f64>) {
            self.completion_calls.fetch_add(1, Ordering::SeqCst);
        }

        async fn handle_failure(&self, _task: &Task, _error: &str, _retryable: bool, _error_code: Option<&str>) {
            self.failure_calls.fetch_add(1, Ordering::SeqCst);
        }

        async fn handle_timeout(&self, _task: &Task) {
            self.timeout_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn registries(provider: Arc<FakeProvider>, handler: Arc<FakeHandler>) -> (ProviderRegistry, HandlerRegistry) {
        let mut providers = ProviderRegistry::new();
        providers.register(provider).unwrap();
        let mut handlers = HandlerRegistry::new();
        handlers.register(handler).unwrap();
        (providers, handlers)
    }

    #[tokio::test]
    async fn async_re_entry_never_calls_provider_execute() {
        let provider = Arc::new(FakeProvider::new(
            TaskType::VideoLipsync,
            TaskMode::Async,
            ProviderExecuteResult {
                success: true,
                external_task_id: Some("should-not-run".to_string()),
                outputs: None,
                actual_usage: None,
                error: None,
                error_code: None,
                retryable: false,
            },
            ProviderQueryResult {
                status: QueryStatus::Pending,
                outputs: None,
                actual_usage: None,
                error: None,
                error_code: None,
                retryable: false,
            },
        ));
        let handler = Arc::new(FakeHandler::new(TaskType::VideoLipsync));
        let (providers, handlers) = registries(provider.clone(), handler.clone());
        let executor = Executor::new(lazy_pool(), providers, handlers);

        let task = make_task(
            TaskType::VideoLipsync,
            TaskStatus::Processing,
            Some("ext-1".to_string()),
        );
        executor.execute_task(task).await;

        assert_eq!(provider.execute_call_count(), 0);
        assert_eq!(handler.failure_calls.load(Ordering::SeqCst), 0);
        assert_eq!(handler.completion_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fresh_async_task_without_external_id_does_call_provider_execute() {
        let provider = Arc::new(FakeProvider::new(
            TaskType::VideoLipsync,
            TaskMode::Async,
            ProviderExecuteResult {
                success: true,
                external_task_id: Some("ext-1".to_string()),
                outputs: None,
                actual_usage: None,
                error: None,
                error_code: None,
                retryable: false,
            },
            ProviderQueryResult {
                status: QueryStatus::Pending,
                outputs: None,
                actual_usage: None,
                error: None,
                error_code: None,
                retryable: false,
            },
        ));
        let handler = Arc::new(FakeHandler::new(TaskType::VideoLipsync));
        let (providers, handlers) = registries(provider.clone(), handler);
        let executor = Executor::new(lazy_pool(), providers, handlers);

        let task = make_task(TaskType::VideoLipsync, TaskStatus::Processing, None);
        executor.execute_task(task).await;

        assert_eq!(provider.execute_call_count(), 1);
    }

    #[tokio::test]
    async fn query_pending_does_not_call_handler() {
        let provider = Arc::new(FakeProvider::new(
            TaskType::VideoLipsync,
            TaskMode::Async,
            ProviderExecuteResult {
                success: false,
                external_task_id: None,
                outputs: None,
                actual_usage: None,
                error: None,
                error_code: None,
                retryable: false,
            },
            ProviderQueryResult {
                status: QueryStatus::Pending,
                outputs: None,
                actual_usage: None,
                error: None,
                error_code: None,
                retryable: false,
            },
        ));
        let handler = Arc::new(FakeHandler::new(TaskType::VideoLipsync));
        let (providers, handlers) = registries(provider, handler.clone());
        let executor = Executor::new(lazy_pool(), providers, handlers);

        let task = make_task(
            TaskType::VideoLipsync,
            TaskStatus::Processing,
            Some("ext-1".to_string()),
        );
        executor.query_async_task(task).await;

        assert_eq!(handler.completion_calls.load(Ordering::SeqCst), 0);
        assert_eq!(handler.failure_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn query_failure_routes_to_handle_failure_preserving_retryability() {
        let provider = Arc::new(FakeProvider::new(
            TaskType::VideoLipsync,
            TaskMode::Async,
            ProviderExecuteResult {
                success: false,
                external_task_id: None,
                outputs: None,
                actual_usage: None,
                error: None,
                error_code: None,
                retryable: false,
            },
            ProviderQueryResult {
                status: QueryStatus::Failed,
                outputs: None,
                actual_usage: None,
                error: Some("upstream timed out".to_string()),
                error_code: Some("UPSTREAM_TIMEOUT".to_string()),
                retryable: true,
            },
        ));
        let handler = Arc::new(FakeHandler::new(TaskType::VideoLipsync));
        let (providers, handlers) = registries(provider, handler.clone());
        let executor = Executor::new(lazy_pool(), providers, handlers);

        let task = make_task(
            TaskType::VideoLipsync,
            TaskStatus::Processing,
            Some("ext-1".to_string()),
        );
        executor.query_async_task(task).await;

        assert_eq!(handler.failure_calls.load(Ordering::SeqCst), 1);
    }
}
