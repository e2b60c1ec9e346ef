//! Data model: accounts, pricing, tasks, resources, logs, and the ledger.
//!
//! Money is always integer minor units (`i64`); nothing in this module
//! touches floating point for anything that affects a balance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

/// The category an upstream integration belongs to. Derived from `TaskType`,
/// never stored independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum Category {
    Video,
    Image,
    Audio,
}

/// Whether a task's Provider answers inline (`Sync`) or hands back a job id
/// to be polled later (`Async`). Derived from `TaskType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TaskMode {
    Sync,
    Async,
}

/// The closed set of upstream AI integrations this studio supports.
///
/// A typed enum replacing a stringly-typed runtime registry: `category()`
/// and `mode()` are total match arms, so adding a task type without
/// wiring its category/mode is a compile error, not a runtime surprise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TaskType {
    ImageTxt2Img,
    ImageUpscale,
    VideoMotionTransfer,
    VideoLipsync,
    AudioTts,
}

impl TaskType {
    pub fn category(self) -> Category {
        match self {
            TaskType::ImageTxt2Img | TaskType::ImageUpscale => Category::Image,
            TaskType::VideoMotionTransfer | TaskType::VideoLipsync => Category::Video,
            TaskType::AudioTts => Category::Audio,
        }
    }

    pub fn mode(self) -> TaskMode {
        match self {
            TaskType::ImageTxt2Img | TaskType::ImageUpscale | TaskType::AudioTts => {
                TaskMode::Sync
            }
            TaskType::VideoMotionTransfer | TaskType::VideoLipsync => TaskMode::Async,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::ImageTxt2Img => "image_txt2img",
            TaskType::ImageUpscale => "image_upscale",
            TaskType::VideoMotionTransfer => "video_motion_transfer",
            TaskType::VideoLipsync => "video_lipsync",
            TaskType::AudioTts => "audio_tts",
        }
    }
}

/// Task lifecycle status. Terminal states (`Completed`, `Failed`,
/// `Cancelled`) never transition back out; see the state-machine invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Only `PerUnit` is implemented. Any other pricing row is a hard
/// `ConfigurationError` at estimation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum BillingType {
    PerUnit,
    PerToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ResourceType {
    Image,
    Video,
    Audio,
    Text,
    Model3d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TransactionCategory {
    TaskCharge,
    TaskRefund,
}

/// An account's credit balance. `balance` never goes negative; every
/// mutation is paired with a `Transaction` row in the same database
/// transaction (see `mediaforge-billing`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,
    pub balance: i64,
}

/// A snapshot-referenced pricing row. Tasks store `pricing_id`, not a
/// copied value.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PricingConfig {
    pub id: Uuid,
    pub task_type: TaskType,
    pub billing_type: BillingType,
    /// Rational values are stored as `f64`; they feed cost math that is
    /// immediately rounded (`ceil`) into integer minor units, so no
    /// ledger-affecting quantity is ever persisted as a float.
    pub unit_price: f64,
    pub min_unit: f64,
}

/// The persistently tracked request to produce an AI artifact.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub config: Json,
    pub pricing_id: Uuid,
    pub billing_type: BillingType,
    pub estimated_cost: i64,
    pub estimated_usage: f64,
    pub actual_cost: Option<i64>,
    pub actual_usage: Option<f64>,
    pub external_task_id: Option<String>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Output descriptors, `[{url, metadata}, ...]`; empty until the
    /// Handler writes it on completion.
    pub result: Json,
}

impl Task {
    pub fn category(&self) -> Category {
        self.task_type.category()
    }

    pub fn mode(&self) -> TaskMode {
        self.task_type.mode()
    }
}

/// An input or output artifact reference belonging to a Task.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskResource {
    pub id: Uuid,
    pub task_id: Uuid,
    pub resource_type: ResourceType,
    pub is_input: bool,
    pub url: String,
    pub metadata: Json,
}

/// An append-only event on a task.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskLog {
    pub id: Uuid,
    pub task_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    pub data: Json,
    pub created_at: DateTime<Utc>,
}

/// A ledger row. The ledger is the source of truth for monetary history;
/// `Account::balance` is a materialized sum of it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub category: TransactionCategory,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub task_id: Option<Uuid>,
    pub metadata: Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_category_and_mode_are_total() {
        assert_eq!(TaskType::ImageTxt2Img.category(), Category::Image);
        assert_eq!(TaskType::ImageTxt2Img.mode(), TaskMode::Sync);
        assert_eq!(TaskType::VideoLipsync.category(), Category::Video);
        assert_eq!(TaskType::VideoLipsync.mode(), TaskMode::Async);
        assert_eq!(TaskType::AudioTts.category(), Category::Audio);
        assert_eq!(TaskType::AudioTts.mode(), TaskMode::Sync);
    }

    #[test]
    fn terminal_statuses_are_closed() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
    }
}
