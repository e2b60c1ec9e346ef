//! Schema initialization for the task engine's tables.
//!
//! Mirrors the established schema-init-on-construct convention: idempotent
//! `CREATE TABLE IF NOT EXISTS` statements run once at startup rather than
//! through a separate migration tool.

use sqlx::PgPool;
use tracing::debug;

pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    debug!("initializing task engine schema");

    sqlx::raw_sql(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id UUID PRIMARY KEY,
            balance BIGINT NOT NULL CHECK (balance >= 0)
        );

        CREATE TABLE IF NOT EXISTS pricing_configs (
            id UUID PRIMARY KEY,
            task_type TEXT NOT NULL,
            billing_type TEXT NOT NULL,
            unit_price DOUBLE PRECISION NOT NULL,
            min_unit DOUBLE PRECISION NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_pricing_configs_task_type ON pricing_configs(task_type);

        CREATE TABLE IF NOT EXISTS tasks (
            id UUID PRIMARY KEY,
            account_id UUID NOT NULL REFERENCES accounts(id),
            name TEXT NOT NULL,
            task_type TEXT NOT NULL,
            status TEXT NOT NULL,
            config JSONB NOT NULL DEFAULT '{}',
            pricing_id UUID NOT NULL REFERENCES pricing_configs(id),
            billing_type TEXT NOT NULL,
            estimated_cost BIGINT NOT NULL,
            estimated_usage DOUBLE PRECISION NOT NULL,
            actual_cost BIGINT,
            actual_usage DOUBLE PRECISION,
            external_task_id TEXT,
            retry_count INT NOT NULL DEFAULT 0,
            next_retry_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            result JSONB NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_account_id ON tasks(account_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_status_retry ON tasks(status, next_retry_at);
        CREATE INDEX IF NOT EXISTS idx_tasks_status_mode_ext
            ON tasks(status, task_type, external_task_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_updated_at ON tasks(updated_at);

        CREATE TABLE IF NOT EXISTS task_resources (
            id UUID PRIMARY KEY,
            task_id UUID NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            resource_type TEXT NOT NULL,
            is_input BOOLEAN NOT NULL,
            url TEXT NOT NULL,
            metadata JSONB NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_task_resources_task_id ON task_resources(task_id);

        CREATE TABLE IF NOT EXISTS task_logs (
            id UUID PRIMARY KEY,
            task_id UUID NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            level TEXT NOT NULL,
            message TEXT NOT NULL,
            data JSONB NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );

        CREATE INDEX IF NOT EXISTS idx_task_logs_task_id ON task_logs(task_id);

        CREATE TABLE IF NOT EXISTS transactions (
            id UUID PRIMARY KEY,
            account_id UUID NOT NULL REFERENCES accounts(id),
            category TEXT NOT NULL,
            amount BIGINT NOT NULL,
            balance_before BIGINT NOT NULL,
            balance_after BIGINT NOT NULL CHECK (balance_after >= 0),
            task_id UUID REFERENCES tasks(id),
            metadata JSONB NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_transactions_account_id ON transactions(account_id);
        CREATE INDEX IF NOT EXISTS idx_transactions_task_id ON transactions(task_id);
        "#,
    )
    .execute(pool)
    .await?;

    debug!("task engine schema ready");
    Ok(())
}
