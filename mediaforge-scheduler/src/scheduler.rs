//! The double-loop scheduler: a main claim loop, an async poll
//! loop, and a timeout recovery sweep, each a non-reentrant periodic
//! timer guarded the way the established `BillingEngine::start_billing_cycle`
//! guards its own cycle with an `Arc<RwLock<bool>>` "is running" flag.
//!
//! Claiming is grounded on the enrichment pack's
//! `claim_ready_task_postgres`: a single `WITH ... FOR UPDATE SKIP LOCKED
//! ... UPDATE ... RETURNING` statement, so concurrent scheduler replicas
//! never claim the same row twice.

use chrono::Utc;
use mediaforge_core::types::Task;
use mediaforge_providers::{Handler, HandlerRegistry};
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::executor::Executor;
use mediaforge_core::config::SchedulerConfig;

/// Async task types whose processing row can go stale for longer than a
/// sync call before it's considered stuck.
const ASYNC_TASK_TYPES: &[&str] = &["video_motion_transfer", "video_lipsync"];

pub struct Scheduler {
    pool: PgPool,
    executor: Arc<Executor>,
    handlers: HandlerRegistry,
    config: SchedulerConfig,
    running: Arc<AtomicBool>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(pool: PgPool, executor: Arc<Executor>, handlers: HandlerRegistry, config: SchedulerConfig) -> Self {
        Self {
            pool,
            executor,
            handlers,
            config,
            running: Arc::new(AtomicBool::new(false)),
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Spawn the three periodic loops. Idempotent: a second call while
    /// already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("scheduler already running, ignoring start()");
            return;
        }
        if !self.config.enabled {
            info!("scheduler disabled by configuration, not starting loops");
            return;
        }

        info!("starting scheduler loops");
        let mut handles = self.handles.lock().unwrap();
        handles.push(tokio::spawn(self.clone().main_loop()));
        handles.push(tokio::spawn(self.clone().poll_loop()));
        handles.push(tokio::spawn(self.clone().timeout_sweep_loop()));
    }

    /// Signal the loops to stop after their current tick and await them.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handles = {
            let mut guard = self.handles.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            let _ = handle.await;
        }
        info!("scheduler stopped");
    }

    async fn main_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.main_interval);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));

        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            match self.claim_pending().await {
                Ok(tasks) => {
                    if !tasks.is_empty() {
                        debug!(count = tasks.len(), "claimed pending tasks");
                    }
                    for task in tasks {
                        let permit = semaphore.clone().acquire_owned().await.ok();
                        let executor = self.executor.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            executor.execute_task(task).await;
                        });
                    }
                }
                Err(e) => error!(error = %e, "claim batch failed"),
            }
        }
    }

    async fn poll_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));

        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            match self.claim_in_flight().await {
                Ok(tasks) => {
                    for task in tasks {
                        let permit = semaphore.clone().acquire_owned().await.ok();
                        let executor = self.executor.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            executor.query_async_task(task).await;
                        });
                    }
                }
                Err(e) => error!(error = %e, "poll batch failed"),
            }
        }
    }

    async fn timeout_sweep_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.main_interval * 4);

        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            if let Err(e) = self.sweep_timeouts().await {
                error!(error = %e, "timeout sweep failed");
            }
        }
    }

    /// Claim a batch of pending tasks whose `next_retry_at` has elapsed,
    /// transitioning them to `processing` in one statement.
    async fn claim_pending(&self) -> Result<Vec<Task>, sqlx::Error> {
        sqlx::query_as::<_, Task>(
            r#"
            WITH claimed AS (
                SELECT id FROM tasks
                WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE tasks
            SET status = 'processing', started_at = COALESCE(started_at, NOW()), updated_at = NOW()
            FROM claimed
            WHERE tasks.id = claimed.id
            RETURNING tasks.*
            "#,
        )
        .bind(self.config.batch_size as i64)
        .fetch_all(&self.pool)
        .await
    }

    /// Claim a batch of in-flight async tasks to poll, bumping their
    /// heartbeat so the timeout sweep doesn't also reclaim them mid-poll.
    async fn claim_in_flight(&self) -> Result<Vec<Task>, sqlx::Error> {
        sqlx::query_as::<_, Task>(
            r#"
            WITH claimed AS (
                SELECT id FROM tasks
                WHERE status = 'processing' AND external_task_id IS NOT NULL
                ORDER BY updated_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE tasks
            SET updated_at = NOW()
            FROM claimed
            WHERE tasks.id = claimed.id
            RETURNING tasks.*
            "#,
        )
        .bind(self.config.batch_size as i64)
        .fetch_all(&self.pool)
        .await
    }

    /// Reclaim tasks stuck `processing` past their mode's liveness
    /// threshold. Each candidate is routed through its Handler's
    /// `handle_timeout`, which retries regardless of mode (unlike an
    /// ordinary provider failure, a dead worker says nothing about
    /// whether the provider call itself would succeed again) up to the
    /// same retry bound as any other failure.
    async fn sweep_timeouts(&self) -> Result<(), sqlx::Error> {
        let sync_cutoff = Utc::now() - chrono::Duration::from_std(self.config.sync_timeout).unwrap_or_default();
        let async_cutoff = Utc::now() - chrono::Duration::from_std(self.config.async_timeout).unwrap_or_default();

        let stuck = sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM tasks
            WHERE status = 'processing'
            AND (
                (task_type = ANY($1) AND updated_at < $2)
                OR (NOT (task_type = ANY($1)) AND updated_at < $3)
            )
            FOR UPDATE SKIP LOCKED
            LIMIT $4
            "#,
        )
        .bind(ASYNC_TASK_TYPES)
        .bind(async_cutoff)
        .bind(sync_cutoff)
        .bind(self.config.batch_size as i64)
        .fetch_all(&self.pool)
        .await?;

        for task in stuck {
            warn!(task_id = %task.id, "task exceeded liveness threshold, reclaiming");
            if let Some(handler) = self.handlers.get(task.task_type) {
                handler.handle_timeout(&task).await;
            }
        }
        Ok(())
    }
}
