//! Normalisation of untyped Advisor records into [`RecommendationRecord`]s
//!
//! Two shapes are accepted. The typed shape carries `resource_kind` and
//! configuration maps directly. The flat shape names the provider service in
//! `resource_type` (`EC2`, `S3`, `Lambda`, `RDS`, `EBS`) and spreads current
//! and recommended values over service-specific keys.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{Configuration, Money, RecommendationRecord, ResourceKind};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("recommendation {index}: {reason}")]
pub struct NormalizeError {
    pub index: usize,
    pub reason: String,
}

pub fn normalize_records(values: &[Value]) -> Result<Vec<RecommendationRecord>, NormalizeError> {
    values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            normalize_one(value).map_err(|reason| NormalizeError { index, reason })
        })
        .collect()
}

fn normalize_one(value: &Value) -> Result<RecommendationRecord, String> {
    let object = value
        .as_object()
        .ok_or_else(|| "expected a JSON object".to_string())?;

    let mut record = if object.contains_key("resource_kind") {
        typed(object)?
    } else if object.contains_key("resource_type") {
        flat(object)?
    } else {
        return Err("missing 'resource_kind' or 'resource_type'".to_string());
    };

    record.estimated_monthly_savings = object
        .get("estimated_monthly_savings")
        .map(savings_string)
        .unwrap_or_default();
    record.policy_rule_id = object
        .get("policy_rule_id")
        .and_then(scalar_string)
        .filter(|s| !s.is_empty());

    Ok(record)
}

fn typed(object: &Map<String, Value>) -> Result<RecommendationRecord, String> {
    let kind = kind_of(object, "resource_kind")?;
    let resource_id = object
        .get("resource_id")
        .and_then(scalar_string)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "missing 'resource_id'".to_string())?;

    let mut record = RecommendationRecord::new(kind, resource_id);
    record.current_configuration = configuration(object.get("current_configuration"))?;
    record.suggested_configuration = configuration(object.get("suggested_configuration"))?;
    Ok(record)
}

/// (configuration key, current-value keys, recommended-value keys)
type FlatField = (&'static str, &'static [&'static str], &'static [&'static str]);

const COMPUTE_FIELDS: &[FlatField] = &[(
    "instance_type",
    &["current_instance_type", "current_type"],
    &["recommended_instance_type", "recommended_type"],
)];

const STORAGE_FIELDS: &[FlatField] = &[
    (
        "storage_class",
        &["current_storage_class", "storage_class"],
        &["recommended_storage_class"],
    ),
    ("transition_days", &[], &["transition_days"]),
];

const FUNCTION_FIELDS: &[FlatField] = &[
    ("memory_mb", &["current_memory_mb"], &["recommended_memory_mb"]),
    (
        "reserved_concurrency",
        &["current_concurrency"],
        &["recommended_concurrency"],
    ),
];

const DATABASE_FIELDS: &[FlatField] = &[(
    "instance_class",
    &["current_class", "current_instance_class"],
    &["recommended_class", "recommended_instance_class"],
)];

const VOLUME_FIELDS: &[FlatField] = &[
    (
        "volume_type",
        &["current_type", "volume_type"],
        &["recommended_type", "recommended_volume_type"],
    ),
    ("size_gb", &["size_gb"], &["recommended_size_gb"]),
];

fn flat(object: &Map<String, Value>) -> Result<RecommendationRecord, String> {
    let kind = kind_of(object, "resource_type")?;
    let id_keys: &[&str] = match kind {
        ResourceKind::Compute => &["instance_id"],
        ResourceKind::ObjectStorage => &["bucket_name"],
        ResourceKind::Function => &["function_name"],
        ResourceKind::RelationalDB => &["db_instance_id", "db_identifier"],
        ResourceKind::BlockVolume => &["volume_id"],
    };
    let resource_id = first(object, id_keys)
        .or_else(|| first(object, &["resource_id"]))
        .ok_or_else(|| format!("missing resource id (expected one of {id_keys:?})"))?;

    let fields = match kind {
        ResourceKind::Compute => COMPUTE_FIELDS,
        ResourceKind::ObjectStorage => STORAGE_FIELDS,
        ResourceKind::Function => FUNCTION_FIELDS,
        ResourceKind::RelationalDB => DATABASE_FIELDS,
        ResourceKind::BlockVolume => VOLUME_FIELDS,
    };

    let mut record = RecommendationRecord::new(kind, resource_id);
    for (key, current_keys, suggested_keys) in fields.iter().copied() {
        if let Some(value) = first(object, current_keys) {
            record.current_configuration.insert(key.to_string(), value);
        }
        if let Some(value) = first(object, suggested_keys) {
            record.suggested_configuration.insert(key.to_string(), value);
        }
    }

    if kind == ResourceKind::ObjectStorage && !record.suggested_configuration.contains_key("storage_class") {
        if let Some(class) = object
            .get("recommended_action")
            .and_then(Value::as_str)
            .and_then(storage_class_from_action)
        {
            record
                .suggested_configuration
                .insert("storage_class".to_string(), class.to_string());
        }
    }

    Ok(record)
}

/// Free-text lifecycle advice, e.g. "Add Intelligent-Tiering or transition to Glacier"
fn storage_class_from_action(action: &str) -> Option<&'static str> {
    let action = action.to_ascii_lowercase();
    if action.contains("intelligent") {
        Some("INTELLIGENT_TIERING")
    } else if action.contains("glacier") {
        Some("GLACIER_IR")
    } else {
        None
    }
}

fn kind_of(object: &Map<String, Value>, key: &str) -> Result<ResourceKind, String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("'{key}' must be a string"))?
        .parse()
}

fn first(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(scalar_string))
        .filter(|s| !s.is_empty())
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn configuration(value: Option<&Value>) -> Result<Configuration, String> {
    match value {
        None | Some(Value::Null) => Ok(Configuration::new()),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| {
                scalar_string(v)
                    .map(|s| (k.clone(), s))
                    .ok_or_else(|| format!("configuration value for '{k}' must be a scalar"))
            })
            .collect(),
        Some(_) => Err("configuration must be an object".to_string()),
    }
}

/// Numeric savings become currency strings; strings pass through untouched
fn savings_string(value: &Value) -> String {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(|amount| Money::from_cents((amount * 100.0).round() as i64).to_string())
            .unwrap_or_else(|| n.to_string()),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
