//! Error taxonomy for the task engine.

use thiserror::Error;

/// Top-level error for the task engine, composed from per-module sub-errors.
#[derive(Error, Debug)]
pub enum StudioError {
    #[error("billing error: {0}")]
    Billing(#[from] BillingError),

    #[error("task error: {0}")]
    Task(#[from] TaskError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result alias for fallible task-engine operations.
pub type StudioResult<T> = Result<T, StudioError>;

/// Billing invariants: estimation, charge, settle, refund.
#[derive(Error, Debug)]
pub enum BillingError {
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("no pricing configured for task type {task_type}")]
    NoPricing { task_type: String },

    #[error("unsupported billing type {billing_type:?}, only per_unit is implemented")]
    UnsupportedBillingType { billing_type: String },

    #[error("account not found: {0}")]
    AccountNotFound(uuid::Uuid),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type BillingResult<T> = Result<T, BillingError>;

/// Task record / state-machine errors (task service + handler).
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("task {task_id} cannot be cancelled: status is {status}, not pending")]
    NotCancellable { task_id: uuid::Uuid, status: String },

    #[error("no provider registered for task type {0:?}")]
    ProviderUnavailable(String),

    #[error("no handler registered for task type {0:?}")]
    HandlerUnavailable(String),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type TaskResult<T> = Result<T, TaskError>;

/// Scheduler loop errors. Per-task failures are never represented here —
/// they are converted into state transitions by the Handler before the
/// loop sees them. This enum only covers failures of the claim/poll
/// batch operations themselves.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("claim batch failed: {0}")]
    ClaimFailed(#[source] sqlx::Error),

    #[error("poll batch failed: {0}")]
    PollFailed(#[source] sqlx::Error),

    #[error("timeout sweep failed: {0}")]
    TimeoutSweepFailed(#[source] sqlx::Error),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors surfaced by a Provider adapter. `retryable()` classifies the
/// error per the transient/permanent split so callers don't need to
/// inspect variants by hand.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("transient failure: {message}")]
    Transient { message: String, error_code: Option<String> },

    #[error("permanent failure: {message}")]
    Permanent { message: String, error_code: Option<String> },
}

impl ProviderError {
    pub fn retryable(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            ProviderError::Transient { message, .. } => message,
            ProviderError::Permanent { message, .. } => message,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            ProviderError::Transient { error_code, .. } => error_code.as_deref(),
            ProviderError::Permanent { error_code, .. } => error_code.as_deref(),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Artifact upload / object-store errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to fetch source url {url}: {message}")]
    FetchFailed { url: String, message: String },

    #[error("failed to upload to object store: {0}")]
    PutFailed(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Startup-time configuration errors. Never retryable.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("duplicate registration for task type {0:?}")]
    DuplicateRegistration(String),

    #[error(transparent)]
    Source(#[from] config::ConfigError),
}

pub type ConfigurationResult<T> = Result<T, ConfigurationError>;
