//! Task lifecycle orchestration: creation/cancellation, dispatch
//! to Provider/Handler, and the periodic claim/poll/timeout loops
//! that drive tasks from `pending` to a terminal state.

mod executor;
mod scheduler;
mod task_service;

pub use executor::Executor;
pub use scheduler::Scheduler;
pub use task_service::{CreateTaskParams, InputResource, ListOptions, TaskDetail, TaskPage, TaskService};

#[cfg(test)]
mod tests {
    use mediaforge_core::types::{Task, TaskMode, TaskResource, TaskType};
    use mediaforge_providers::{ProviderExecuteResult, ProviderOutput, ProviderRegistry, Provider};
    use std::sync::Arc;

    struct EchoProvider;

    #[async_trait::async_trait]
    impl Provider for EchoProvider {
        fn task_type(&self) -> TaskType {
            TaskType::ImageTxt2Img
        }
        fn mode(&self) -> TaskMode {
            TaskMode::Sync
        }
        async fn execute(&self, _task: &Task, _inputs: &[TaskResource]) -> ProviderExecuteResult {
            ProviderExecuteResult {
                success: true,
                external_task_id: None,
                outputs: Some(vec![ProviderOutput {
                    url: "https://upstream.example/result.png".to_string(),
                    metadata: serde_json::json!({}),
                }]),
                actual_usage: Some(1.0),
                error: None,
                error_code: None,
                retryable: false,
            }
        }
    }

    // Registry wiring is exercised without a live database: this confirms
    // the typed lookup used by `Executor::resolve` sees exactly the
    // providers registered for a task type, nothing more.
    #[test]
    fn registries_resolve_only_registered_task_types() {
        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(EchoProvider)).unwrap();
        assert!(providers.get(TaskType::ImageTxt2Img).is_some());
        assert!(providers.get(TaskType::VideoLipsync).is_none());
    }
}
