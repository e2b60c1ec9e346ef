//! Provider contract: a pure adapter to one upstream AI service.
//!
//! Grounded on the minimal async trait contract shape of `reqpool::Pool`
//! in the enrichment pack — a small set of methods, `Send + Sync`, no
//! database access of its own.

use async_trait::async_trait;
use mediaforge_core::errors::{ConfigurationError, ConfigurationResult};
use mediaforge_core::types::{Task, TaskMode, TaskResource, TaskType};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;

/// The outcome of `Provider::execute`.
#[derive(Debug, Clone)]
pub struct ProviderExecuteResult {
    pub success: bool,
    /// Set by asynchronous providers on success.
    pub external_task_id: Option<String>,
    /// Set by synchronous providers on success.
    pub outputs: Option<Vec<ProviderOutput>>,
    pub actual_usage: Option<f64>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    /// Whether a `success = false` result is safe to retry.
    pub retryable: bool,
}

/// One produced artifact, as returned by a Provider before upload.
#[derive(Debug, Clone)]
pub struct ProviderOutput {
    pub url: String,
    pub metadata: Json,
}

/// Poll status for an in-flight async task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Pending,
    Completed,
    Failed,
}

/// The outcome of `Provider::query`.
#[derive(Debug, Clone)]
pub struct ProviderQueryResult {
    pub status: QueryStatus,
    pub outputs: Option<Vec<ProviderOutput>>,
    pub actual_usage: Option<f64>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub retryable: bool,
}

/// A pure adapter to a single external AI service. Providers must not
/// mutate database rows directly, and must tolerate repeated calls with
/// the same `external_task_id`.
#[async_trait]
pub trait Provider: Send + Sync {
    fn task_type(&self) -> TaskType;
    fn mode(&self) -> TaskMode;

    /// Submit work. Synchronous providers return `outputs` on success;
    /// asynchronous providers return `external_task_id`.
    async fn execute(&self, task: &Task, inputs: &[TaskResource]) -> ProviderExecuteResult;

    /// Poll an in-flight async job. Synchronous providers may leave this
    /// unreachable (the default panics loudly rather than silently
    /// returning a wrong status).
    async fn query(&self, _task: &Task) -> ProviderQueryResult {
        unreachable!(
            "query() called on a provider for sync task type {:?}",
            self.task_type()
        );
    }
}

/// Typed `TaskType -> Provider` lookup, built once at startup and never
/// mutated at runtime. Registering two providers for the same `TaskType`
/// is a `ConfigurationError`, not a silent overwrite.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<TaskType, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) -> ConfigurationResult<()> {
        let task_type = provider.task_type();
        if self.providers.contains_key(&task_type) {
            return Err(ConfigurationError::DuplicateRegistration(
                task_type.as_str().to_string(),
            ));
        }
        self.providers.insert(task_type, provider);
        Ok(())
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn Provider>> {
        self.providers.get(&task_type).cloned()
    }

    pub fn registered_task_types(&self) -> Vec<TaskType> {
        self.providers.keys().copied().collect()
    }
}

/// A configurable Provider for downstream tests: returns a fixed result
/// and records how many times each method was called, so a test can
/// assert a call was skipped entirely (the async re-entry fast path)
/// as well as assert on one that happened.
#[cfg(any(test, feature = "test-util"))]
pub struct FakeProvider {
    task_type: TaskType,
    mode: TaskMode,
    execute_result: ProviderExecuteResult,
    query_result: ProviderQueryResult,
    execute_calls: std::sync::atomic::AtomicUsize,
    query_calls: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-util"))]
impl FakeProvider {
    pub fn new(
        task_type: TaskType,
        mode: TaskMode,
        execute_result: ProviderExecuteResult,
        query_result: ProviderQueryResult,
    ) -> Self {
        Self {
            task_type,
            mode,
            execute_result,
            query_result,
            execute_calls: std::sync::atomic::AtomicUsize::new(0),
            query_calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn execute_call_count(&self) -> usize {
        self.execute_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn query_call_count(&self) -> usize {
        self.query_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl Provider for FakeProvider {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn mode(&self) -> TaskMode {
        self.mode
    }

    async fn execute(&self, _task: &Task, _inputs: &[TaskResource]) -> ProviderExecuteResult {
        self.execute_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.execute_result.clone()
    }

    async fn query(&self, _task: &Task) -> ProviderQueryResult {
        self.query_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.query_result.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaforge_core::types::TaskMode;

    struct StubProvider;

    #[async_trait]
    impl Provider for StubProvider {
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
                outputs: Some(vec![]),
                actual_usage: Some(1.0),
                error: None,
                error_code: None,
                retryable: false,
            }
        }
    }

    #[test]
    fn duplicate_registration_is_a_configuration_error() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider)).unwrap();
        let err = registry.register(Arc::new(StubProvider)).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::DuplicateRegistration(_)
        ));
    }

    #[test]
    fn lookup_misses_return_none() {
        let registry = ProviderRegistry::new();
        assert!(registry.get(TaskType::VideoLipsync).is_none());
    }
}
