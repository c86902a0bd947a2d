use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "experiment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExperimentStatus {
    #[default]
    Draft,
    Running,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "ab_event_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AbEventType {
    View,
    Click,
    Conversion,
}

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "device_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    #[default]
    Desktop,
}

/// Global switch for A/B testing (single row, id 1)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct AbConfig {
    pub ab_active: bool,
    pub default_split: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct AbExperiment {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub goal: Option<String>,
    pub status: ExperimentStatus,
    pub split_a: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct AbVariant {
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub variant_key: String,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub button_text: Option<String>,
    pub button_link: Option<String>,
    pub impressions: i64,
    pub clicks: i64,
    pub conversions: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only visitor event; `user_hash` is a one-way digest, never raw request data
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct AbEvent {
    pub id: i64,
    pub experiment_id: Uuid,
    pub variant_key: String,
    pub event_type: AbEventType,
    pub user_hash: String,
    pub device_type: DeviceType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct AbExperimentWithVariants {
    #[serde(flatten)]
    #[ts(flatten)]
    pub experiment: AbExperiment,
    pub variants: Vec<AbVariant>,
}

impl std::ops::Deref for AbExperimentWithVariants {
    type Target = AbExperiment;
    fn deref(&self) -> &Self::Target {
        &self.experiment
    }
}

#[derive(Debug, Clone)]
pub struct NewExperiment {
    pub name: String,
    pub description: Option<String>,
    pub goal: Option<String>,
    pub split_a: i64,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct VariantContent {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub button_text: Option<String>,
    pub button_link: Option<String>,
}

const EXPERIMENT_COLUMNS: &str =
    "id, name, description, goal, status, split_a, start_date, end_date, created_at, updated_at";

const VARIANT_COLUMNS: &str = "id, experiment_id, variant_key, title, subtitle, description, \
     button_text, button_link, impressions, clicks, conversions, created_at, updated_at";

impl AbConfig {
    pub async fn find<'e, E>(executor: E) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, AbConfig>(
            "SELECT ab_active, default_split, updated_at FROM ab_config WHERE id = 1",
        )
        .fetch_optional(executor)
        .await
    }

    pub async fn upsert(
        pool: &SqlitePool,
        ab_active: bool,
        default_split: i64,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, AbConfig>(
            r#"INSERT INTO ab_config (id, ab_active, default_split)
               VALUES (1, $1, $2)
               ON CONFLICT(id) DO UPDATE SET
                   ab_active = excluded.ab_active,
                   default_split = excluded.default_split,
                   updated_at = datetime('now', 'subsec')
               RETURNING ab_active, default_split, updated_at"#,
        )
        .bind(ab_active)
        .bind(default_split)
        .fetch_one(pool)
        .await
    }
}

impl AbExperiment {
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, AbExperiment>(&format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM ab_experiments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_all(
        pool: &SqlitePool,
        status: Option<ExperimentStatus>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AbExperiment>(&format!(
            r#"SELECT {EXPERIMENT_COLUMNS} FROM ab_experiments
               WHERE $1 IS NULL OR status = $1
               ORDER BY created_at DESC, rowid DESC"#
        ))
        .bind(status)
        .fetch_all(pool)
        .await
    }

    /// Running experiments, newest first; the date window is checked by the caller.
    pub async fn find_running<'e, E>(executor: E) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, AbExperiment>(&format!(
            r#"SELECT {EXPERIMENT_COLUMNS} FROM ab_experiments
               WHERE status = 'running'
               ORDER BY created_at DESC, rowid DESC"#
        ))
        .fetch_all(executor)
        .await
    }

    pub async fn create<'e, E>(executor: E, data: &NewExperiment) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, AbExperiment>(&format!(
            r#"INSERT INTO ab_experiments (id, name, description, goal, status, split_a, start_date, end_date)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING {EXPERIMENT_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(&data.name)
        .bind(&data.description)
        .bind(&data.goal)
        .bind(ExperimentStatus::Draft)
        .bind(data.split_a)
        .bind(data.start_date)
        .bind(data.end_date)
        .fetch_one(executor)
        .await
    }

    pub async fn update_status(
        pool: &SqlitePool,
        id: Uuid,
        status: ExperimentStatus,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, AbExperiment>(&format!(
            r#"UPDATE ab_experiments
               SET status = $2, updated_at = datetime('now', 'subsec')
               WHERE id = $1
               RETURNING {EXPERIMENT_COLUMNS}"#
        ))
        .bind(id)
        .bind(status)
        .fetch_optional(pool)
        .await
    }

    /// Whether `now` falls inside the optional start/end window.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ExperimentStatus::Running
            && self.start_date.is_none_or(|start| start <= now)
            && self.end_date.is_none_or(|end| end >= now)
    }
}

impl AbVariant {
    pub async fn find_by_experiment_id<'e, E>(
        executor: E,
        experiment_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, AbVariant>(&format!(
            r#"SELECT {VARIANT_COLUMNS} FROM ab_variants
               WHERE experiment_id = $1
               ORDER BY variant_key ASC"#
        ))
        .bind(experiment_id)
        .fetch_all(executor)
        .await
    }

    pub async fn create<'e, E>(
        executor: E,
        experiment_id: Uuid,
        variant_key: &str,
        content: &VariantContent,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, AbVariant>(&format!(
            r#"INSERT INTO ab_variants (id, experiment_id, variant_key, title, subtitle, description, button_text, button_link)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING {VARIANT_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(experiment_id)
        .bind(variant_key)
        .bind(&content.title)
        .bind(&content.subtitle)
        .bind(&content.description)
        .bind(&content.button_text)
        .bind(&content.button_link)
        .fetch_one(executor)
        .await
    }

    /// Bump the counter matching `event_type`; returns the number of variants touched.
    pub async fn increment_counter<'e, E>(
        executor: E,
        experiment_id: Uuid,
        variant_key: &str,
        event_type: AbEventType,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let column = match event_type {
            AbEventType::View => "impressions",
            AbEventType::Click => "clicks",
            AbEventType::Conversion => "conversions",
        };
        let result = sqlx::query(&format!(
            r#"UPDATE ab_variants
               SET {column} = {column} + 1, updated_at = datetime('now', 'subsec')
               WHERE experiment_id = $1 AND variant_key = $2"#
        ))
        .bind(experiment_id)
        .bind(variant_key)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}

impl AbEvent {
    pub async fn create<'e, E>(
        executor: E,
        experiment_id: Uuid,
        variant_key: &str,
        event_type: AbEventType,
        user_hash: &str,
        device_type: DeviceType,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, AbEvent>(
            r#"INSERT INTO ab_events (experiment_id, variant_key, event_type, user_hash, device_type)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING id, experiment_id, variant_key, event_type, user_hash, device_type, timestamp"#,
        )
        .bind(experiment_id)
        .bind(variant_key)
        .bind(event_type)
        .bind(user_hash)
        .bind(device_type)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_experiment_id(
        pool: &SqlitePool,
        experiment_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AbEvent>(
            r#"SELECT id, experiment_id, variant_key, event_type, user_hash, device_type, timestamp
               FROM ab_events
               WHERE experiment_id = $1
               ORDER BY id ASC"#,
        )
        .bind(experiment_id)
        .fetch_all(pool)
        .await
    }
}
