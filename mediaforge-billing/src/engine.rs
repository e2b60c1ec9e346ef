//! Cost estimation, pre-charge, settle, and refund.
//!
//! Grounded on the established `BillingEngine` (raw sqlx queries, schema
//! owned by the crate that needs it, `tracing` at every mutation) but
//! reworked around charge/settle/refund instead of periodic invoice
//! generation: there is no background loop here, every operation is
//! called synchronously from the task service or the executor.

use mediaforge_core::errors::{BillingError, BillingResult};
use mediaforge_core::types::{Account, BillingType, Category, PricingConfig, TaskType, TransactionCategory};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::warn;
use uuid::Uuid;

/// Result of `estimate`: the cost and usage to charge, and the pricing
/// row the task should reference.
#[derive(Debug, Clone)]
pub struct Estimate {
    pub cost: i64,
    pub usage: f64,
    pub pricing_id: Uuid,
}

pub struct BillingEngine;

impl BillingEngine {
    pub fn new() -> Self {
        Self
    }

    /// `estimate(taskType, estimatedDuration?, estimatedCount?) -> {cost, usage, pricingId}`.
    pub async fn estimate<'e, E>(
        &self,
        executor: E,
        task_type: TaskType,
        estimated_duration: Option<f64>,
        estimated_count: Option<f64>,
    ) -> BillingResult<Estimate>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let pricing = sqlx::query_as::<_, PricingConfig>(
            "SELECT * FROM pricing_configs WHERE task_type = $1",
        )
        .bind(task_type)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| BillingError::NoPricing {
            task_type: task_type.as_str().to_string(),
        })?;

        if pricing.billing_type != BillingType::PerUnit {
            return Err(BillingError::UnsupportedBillingType {
                billing_type: format!("{:?}", pricing.billing_type),
            });
        }

        let count = estimated_count.unwrap_or(1.0);
        let usage = match task_type.category() {
            Category::Video | Category::Audio => {
                let duration = estimated_duration.unwrap_or(0.0);
                duration.max(pricing.min_unit) * count
            }
            Category::Image => count.max(pricing.min_unit),
        };
        let cost = (usage * pricing.unit_price).ceil() as i64;

        Ok(Estimate {
            cost,
            usage,
            pricing_id: pricing.id,
        })
    }

    /// Debit `amount` from the account inside the caller's transaction,
    /// locking the row exclusively first.
    pub async fn charge(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        account_id: Uuid,
        amount: i64,
        task_id: Option<Uuid>,
    ) -> BillingResult<()> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT * FROM accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(account_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(BillingError::AccountNotFound(account_id))?;

        if account.balance < amount {
            return Err(BillingError::InsufficientBalance {
                required: amount,
                available: account.balance,
            });
        }

        let new_balance = account.balance - amount;
        sqlx::query("UPDATE accounts SET balance = $1 WHERE id = $2")
            .bind(new_balance)
            .bind(account_id)
            .execute(&mut **tx)
            .await?;

        insert_transaction(
            tx,
            account_id,
            TransactionCategory::TaskCharge,
            -amount,
            account.balance,
            new_balance,
            task_id,
        )
        .await?;

        Ok(())
    }

    /// Settle a completed task: refund `max(0, estimated_cost - actual_cost)`
    /// as a `task_refund` ledger row, the same category a terminal-failure
    /// refund uses — settlement is just a refund computed from actual
    /// usage instead of the full estimate. Under-collection (`actual_cost
    /// > estimated_cost`) is absorbed by the platform and only logged,
    /// never back-charged.
    pub async fn settle(
        &self,
        pool: &PgPool,
        account_id: Uuid,
        task_id: Uuid,
        estimated_cost: i64,
        actual_cost: i64,
    ) -> BillingResult<()> {
        let diff = estimated_cost - actual_cost;
        if diff < 0 {
            warn!(
                %task_id,
                estimated_cost,
                actual_cost,
                "actual cost exceeded estimate; platform absorbs the difference"
            );
        }
        if diff <= 0 {
            return Ok(());
        }

        let mut tx = pool.begin().await?;
        let account = sqlx::query_as::<_, Account>(
            "SELECT * FROM accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(BillingError::AccountNotFound(account_id))?;

        let new_balance = account.balance + diff;
        sqlx::query("UPDATE accounts SET balance = $1 WHERE id = $2")
            .bind(new_balance)
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        insert_transaction(
            &mut tx,
            account_id,
            TransactionCategory::TaskRefund,
            diff,
            account.balance,
            new_balance,
            Some(task_id),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Refund the full `estimated_cost` on terminal failure or cancellation
    ///. Callers only invoke this from state-gated transitions,
    /// so it is idempotent by construction rather than by a guard here.
    pub async fn refund(
        &self,
        pool: &PgPool,
        account_id: Uuid,
        task_id: Uuid,
        amount: i64,
    ) -> BillingResult<()> {
        let mut tx = pool.begin().await?;
        let account = sqlx::query_as::<_, Account>(
            "SELECT * FROM accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(BillingError::AccountNotFound(account_id))?;

        let new_balance = account.balance + amount;
        sqlx::query("UPDATE accounts SET balance = $1 WHERE id = $2")
            .bind(new_balance)
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        insert_transaction(
            &mut tx,
            account_id,
            TransactionCategory::TaskRefund,
            amount,
            account.balance,
            new_balance,
            Some(task_id),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

impl Default for BillingEngine {
    fn default() -> Self {
        Self::new()
    }
}

async fn insert_transaction(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    category: TransactionCategory,
    amount: i64,
    balance_before: i64,
    balance_after: i64,
    task_id: Option<Uuid>,
) -> BillingResult<()> {
    sqlx::query(
        r#"
        INSERT INTO transactions
            (id, account_id, category, amount, balance_before, balance_after, task_id, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, '{}')
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(category)
    .bind(amount)
    .bind(balance_before)
    .bind(balance_after)
    .bind(task_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_usage_uses_count_and_min_unit() {
        let min_unit = 1.0_f64;
        let count = 0.0_f64;
        assert_eq!(count.max(min_unit), 1.0);
    }

    #[test]
    fn video_usage_multiplies_duration_by_count() {
        let min_unit = 1.0_f64;
        let duration = 10.0_f64;
        let count = 2.0_f64;
        let usage = duration.max(min_unit) * count;
        assert_eq!(usage, 20.0);
    }

    #[test]
    fn cost_rounds_up_to_whole_minor_units() {
        let usage = 7.0_f64;
        let unit_price = 0.3_f64;
        let cost = (usage * unit_price).ceil() as i64;
        assert_eq!(cost, 3);
    }
}
