//! Entry point for the task scheduling and billing engine.
//!
//! Wires configuration, the database pool, and the provider/handler
//! registries, then runs the scheduler until a shutdown signal arrives,
//! in the lifecycle-orchestrator shape of the established `main.rs`
//! (`Engine::new` / `start` / `stop`).

use anyhow::Context;
use mediaforge_billing::BillingEngine;
use mediaforge_core::config::TaskEngineConfig;
use mediaforge_core::schema;
use mediaforge_providers::{HandlerRegistry, ProviderRegistry};
use mediaforge_scheduler::{Executor, Scheduler, TaskService};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;

/// Owns every long-lived collaborator and the scheduler's background
/// loops. Concrete `Provider` implementations for real upstream AI
/// services are deployment-specific and registered by the caller of
/// `Engine::new`; this core ships the registry and the loop, not the
/// integrations themselves.
struct Engine {
    scheduler: Arc<Scheduler>,
    /// Public API surface for an out-of-scope HTTP layer to delegate to.
    #[allow(dead_code)]
    task_service: Arc<TaskService>,
}

impl Engine {
    async fn new(config: TaskEngineConfig, providers: ProviderRegistry) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await
            .context("failed to connect to database")?;

        schema::init_schema(&pool).await.context("failed to initialize schema")?;

        let billing = Arc::new(BillingEngine::new());
        let task_service = Arc::new(TaskService::new(pool.clone(), billing.clone()));

        let mut handlers = HandlerRegistry::new();
        for task_type in providers.registered_task_types() {
            let uploader = Arc::new(default_uploader());
            let handler = mediaforge_providers::DefaultHandler::new(
                task_type,
                pool.clone(),
                billing.clone(),
                uploader,
                config.scheduler.max_retries,
                Arc::new({
                    let scheduler_config = config.scheduler.clone();
                    move |retry_count| scheduler_config.backoff(retry_count)
                }),
            );
            handlers
                .register(Arc::new(handler))
                .context("duplicate handler registration")?;
        }

        let executor = Arc::new(Executor::new(pool.clone(), providers, handlers.clone()));
        let scheduler = Arc::new(Scheduler::new(pool, executor, handlers, config.scheduler));

        Ok(Self {
            scheduler,
            task_service,
        })
    }

    fn start(&self) {
        self.scheduler.start();
        info!("task engine started");
    }

    async fn stop(&self) {
        self.scheduler.stop().await;
    }
}

fn default_uploader() -> mediaforge_providers::ArtifactUploader {
    let base_url = std::env::var("OBJECT_STORE_BASE_URL")
        .unwrap_or_else(|_| "http://localhost:9000/mediaforge".to_string());
    mediaforge_providers::ArtifactUploader::new(Arc::new(
        mediaforge_providers::HttpStreamingStore::new(base_url),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = TaskEngineConfig::from_env().context("failed to load configuration")?;

    // Third-party AI service adapters are deployment-specific; register
    // them here before starting the engine.
    let providers = ProviderRegistry::new();

    let engine = Engine::new(config, providers).await?;
    engine.start();

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, draining scheduler");
    engine.stop().await;

    Ok(())
}
