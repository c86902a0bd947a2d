//! A/B testing: deterministic variant assignment, event tracking and experiment admin.
//!
//! Visitors are identified only by `sha256("{user-agent}-{ip}")`; the raw header
//! values are never stored.

use chrono::{DateTime, Utc};
use db::models::ab_testing::{
    AbConfig, AbEvent, AbEventType, AbExperiment, AbExperimentWithVariants, AbVariant,
    DeviceType, ExperimentStatus, NewExperiment, VariantContent,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info};
use ts_rs::TS;
use uuid::Uuid;

const UNKNOWN_IP: &str = "unknown";
const DEFAULT_SPLIT: i64 = 50;
const MIN_VARIANTS: usize = 2;
const MAX_VARIANTS: usize = 26;

#[derive(Debug, Error)]
pub enum AbTestingError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("A/B configuration row is missing")]
    ConfigMissing,
    #[error("experiment {0} not found")]
    ExperimentNotFound(Uuid),
    #[error("experiment {0} has no variants")]
    NoVariants(Uuid),
    #[error("variant {variant_key} not found in experiment {experiment_id}")]
    VariantNotFound {
        experiment_id: Uuid,
        variant_key: String,
    },
    #[error("validation failed: {0}")]
    Validation(String),
}

/// Request metadata a visitor is recognised by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorContext {
    pub user_agent: String,
    pub ip: String,
}

impl VisitorContext {
    pub fn new(user_agent: Option<&str>, ip: Option<&str>) -> Self {
        Self {
            user_agent: user_agent.unwrap_or_default().to_string(),
            ip: ip
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .unwrap_or(UNKNOWN_IP)
                .to_string(),
        }
    }

    fn digest(&self) -> [u8; 32] {
        let digest = Sha256::digest(format!("{}-{}", self.user_agent, self.ip));
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }

    /// Hex SHA-256 of `"{user_agent}-{ip}"`.
    pub fn visitor_hash(&self) -> String {
        hex::encode(self.digest())
    }

    pub fn bucket(&self) -> u32 {
        bucket_for(&self.digest())
    }

    pub fn device_type(&self) -> DeviceType {
        detect_device_type(&self.user_agent)
    }
}

pub fn detect_device_type(user_agent: &str) -> DeviceType {
    if user_agent.contains("Mobile") {
        DeviceType::Mobile
    } else if user_agent.contains("Tablet") {
        DeviceType::Tablet
    } else {
        DeviceType::Desktop
    }
}

/// First four digest bytes read big endian, reduced to `0..100`.
pub fn bucket_for(digest: &[u8; 32]) -> u32 {
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) % 100
}

/// Index into the key-ordered variant list: 0 below the split, 1 otherwise.
pub fn choose_variant_index(bucket: u32, split_a: i64, variant_count: usize) -> usize {
    if variant_count < 2 || i64::from(bucket) < split_a {
        0
    } else {
        1
    }
}

fn variant_key(index: usize) -> String {
    char::from(b'A' + index as u8).to_string()
}

fn validate_split(split: i64) -> Result<i64, AbTestingError> {
    if (0..=100).contains(&split) {
        Ok(split)
    } else {
        Err(AbTestingError::Validation(format!(
            "split must be between 0 and 100, got {split}"
        )))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct AssignedVariant {
    pub key: String,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub button_text: Option<String>,
    pub button_link: Option<String>,
}

impl From<AbVariant> for AssignedVariant {
    fn from(variant: AbVariant) -> Self {
        Self {
            key: variant.variant_key,
            title: variant.title,
            subtitle: variant.subtitle,
            description: variant.description,
            button_text: variant.button_text,
            button_link: variant.button_link,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct VariantAssignment {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<AssignedVariant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_a: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VariantAssignment {
    fn inactive(message: &str) -> Self {
        Self {
            active: false,
            experiment_id: None,
            experiment_name: None,
            variant: None,
            split_a: None,
            device_type: None,
            message: Some(message.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct RecordEvent {
    pub experiment_id: Uuid,
    pub variant_key: String,
    pub event_type: AbEventType,
    /// Overrides the device type derived from the user agent
    pub device_type: Option<DeviceType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateExperiment {
    pub name: String,
    pub description: Option<String>,
    pub goal: Option<String>,
    pub split_a: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub variants: Vec<VariantContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UpdateExperimentStatus {
    pub status: ExperimentStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct ListExperimentsQuery {
    pub status: Option<ExperimentStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ExperimentList {
    pub experiments: Vec<AbExperimentWithVariants>,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateAbConfig {
    pub ab_active: Option<bool>,
    pub default_split: Option<i64>,
}

pub struct AbTestingService;

impl AbTestingService {
    /// Pick the visitor's variant in the live experiment, log a view and count the impression.
    pub async fn assign_variant(
        pool: &SqlitePool,
        visitor: &VisitorContext,
    ) -> Result<VariantAssignment, AbTestingError> {
        let config = AbConfig::find(pool)
            .await?
            .ok_or(AbTestingError::ConfigMissing)?;
        if !config.ab_active {
            return Ok(VariantAssignment::inactive("A/B-Testing ist deaktiviert"));
        }

        let now = Utc::now();
        let Some(experiment) = AbExperiment::find_running(pool)
            .await?
            .into_iter()
            .find(|exp| exp.is_live_at(now))
        else {
            return Ok(VariantAssignment::inactive("Kein aktives Experiment"));
        };

        let mut variants = AbVariant::find_by_experiment_id(pool, experiment.id).await?;
        if variants.is_empty() {
            return Err(AbTestingError::NoVariants(experiment.id));
        }

        let split_a = experiment.split_a.unwrap_or(config.default_split);
        let bucket = visitor.bucket();
        let index = choose_variant_index(bucket, split_a, variants.len());
        let variant = variants.swap_remove(index);
        let user_hash = visitor.visitor_hash();
        let device_type = visitor.device_type();

        let mut tx = pool.begin().await?;
        AbEvent::create(
            &mut *tx,
            experiment.id,
            &variant.variant_key,
            AbEventType::View,
            &user_hash,
            device_type,
        )
        .await?;
        AbVariant::increment_counter(
            &mut *tx,
            experiment.id,
            &variant.variant_key,
            AbEventType::View,
        )
        .await?;
        tx.commit().await?;

        debug!(
            experiment_id = %experiment.id,
            variant_key = %variant.variant_key,
            bucket,
            split_a,
            device_type = %device_type,
            "A/B variant assigned"
        );

        Ok(VariantAssignment {
            active: true,
            experiment_id: Some(experiment.id),
            experiment_name: Some(experiment.name),
            variant: Some(variant.into()),
            split_a: Some(split_a),
            device_type: Some(device_type),
            message: None,
        })
    }

    /// Track a click or conversion for a variant the visitor was shown.
    pub async fn record_event(
        pool: &SqlitePool,
        data: RecordEvent,
        visitor: &VisitorContext,
    ) -> Result<AbEvent, AbTestingError> {
        if data.event_type == AbEventType::View {
            return Err(AbTestingError::Validation(
                "view events are recorded by variant assignment".to_string(),
            ));
        }
        let variant_key = data.variant_key.trim().to_string();
        let device_type = data.device_type.unwrap_or_else(|| visitor.device_type());

        let mut tx = pool.begin().await?;
        let touched =
            AbVariant::increment_counter(&mut *tx, data.experiment_id, &variant_key, data.event_type)
                .await?;
        if touched == 0 {
            return Err(AbTestingError::VariantNotFound {
                experiment_id: data.experiment_id,
                variant_key,
            });
        }
        let event = AbEvent::create(
            &mut *tx,
            data.experiment_id,
            &variant_key,
            data.event_type,
            &visitor.visitor_hash(),
            device_type,
        )
        .await?;
        tx.commit().await?;

        debug!(
            experiment_id = %data.experiment_id,
            variant_key = %variant_key,
            event_type = %data.event_type,
            "A/B event recorded"
        );
        Ok(event)
    }

    /// Create a draft experiment; variants are keyed `A`, `B`, `C`, ... in input order.
    pub async fn create_experiment(
        pool: &SqlitePool,
        data: CreateExperiment,
    ) -> Result<AbExperimentWithVariants, AbTestingError> {
        let name = data.name.trim();
        if name.is_empty() {
            return Err(AbTestingError::Validation("name is required".to_string()));
        }
        if !(MIN_VARIANTS..=MAX_VARIANTS).contains(&data.variants.len()) {
            return Err(AbTestingError::Validation(format!(
                "an experiment needs between {MIN_VARIANTS} and {MAX_VARIANTS} variants, got {}",
                data.variants.len()
            )));
        }
        let split_a = validate_split(data.split_a.unwrap_or(DEFAULT_SPLIT))?;
        if let (Some(start), Some(end)) = (data.start_date, data.end_date) {
            if end < start {
                return Err(AbTestingError::Validation(
                    "end_date lies before start_date".to_string(),
                ));
            }
        }

        let new_experiment = NewExperiment {
            name: name.to_string(),
            description: data.description,
            goal: data.goal,
            split_a,
            start_date: data.start_date,
            end_date: data.end_date,
        };

        let mut tx = pool.begin().await?;
        let experiment = AbExperiment::create(&mut *tx, &new_experiment).await?;
        let mut variants = Vec::with_capacity(data.variants.len());
        for (index, content) in data.variants.iter().enumerate() {
            variants.push(
                AbVariant::create(&mut *tx, experiment.id, &variant_key(index), content).await?,
            );
        }
        tx.commit().await?;

        info!(
            experiment_id = %experiment.id,
            name = %experiment.name,
            variants = variants.len(),
            split_a,
            "A/B experiment created"
        );
        Ok(AbExperimentWithVariants {
            experiment,
            variants,
        })
    }

    pub async fn list_experiments(
        pool: &SqlitePool,
        query: ListExperimentsQuery,
    ) -> Result<ExperimentList, AbTestingError> {
        let experiments = AbExperiment::find_all(pool, query.status).await?;
        let mut result = Vec::with_capacity(experiments.len());
        for experiment in experiments {
            let variants = AbVariant::find_by_experiment_id(pool, experiment.id).await?;
            result.push(AbExperimentWithVariants {
                experiment,
                variants,
            });
        }
        Ok(ExperimentList {
            count: result.len(),
            experiments: result,
        })
    }

    pub async fn set_experiment_status(
        pool: &SqlitePool,
        experiment_id: Uuid,
        status: ExperimentStatus,
    ) -> Result<AbExperiment, AbTestingError> {
        let experiment = AbExperiment::update_status(pool, experiment_id, status)
            .await?
            .ok_or(AbTestingError::ExperimentNotFound(experiment_id))?;
        info!(experiment_id = %experiment_id, status = %status, "A/B experiment status changed");
        Ok(experiment)
    }

    pub async fn get_config(pool: &SqlitePool) -> Result<AbConfig, AbTestingError> {
        AbConfig::find(pool)
            .await?
            .ok_or(AbTestingError::ConfigMissing)
    }

    /// Apply the given fields on top of the stored configuration.
    pub async fn update_config(
        pool: &SqlitePool,
        data: UpdateAbConfig,
    ) -> Result<AbConfig, AbTestingError> {
        let current = AbConfig::find(pool).await?;
        let ab_active = data
            .ab_active
            .or(current.as_ref().map(|c| c.ab_active))
            .unwrap_or(false);
        let default_split = validate_split(
            data.default_split
                .or(current.as_ref().map(|c| c.default_split))
                .unwrap_or(DEFAULT_SPLIT),
        )?;

        let config = AbConfig::upsert(pool, ab_active, default_split).await?;
        info!(ab_active, default_split, "A/B configuration updated");
        Ok(config)
    }
}
