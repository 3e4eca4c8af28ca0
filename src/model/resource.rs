//! Resource kinds and recommendation records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kind-specific key/value configuration of a resource.
///
/// Ordered so that rendering and comparison are deterministic.
pub type Configuration = BTreeMap<String, String>;

/// The closed set of remediable resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Compute,
    ObjectStorage,
    Function,
    #[serde(rename = "relational_db")]
    RelationalDB,
    BlockVolume,
}

impl ResourceKind {
    /// All kinds in plan rendering order
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Compute,
        ResourceKind::ObjectStorage,
        ResourceKind::Function,
        ResourceKind::RelationalDB,
        ResourceKind::BlockVolume,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Compute => "compute",
            ResourceKind::ObjectStorage => "object_storage",
            ResourceKind::Function => "function",
            ResourceKind::RelationalDB => "relational_db",
            ResourceKind::BlockVolume => "block_volume",
        }
    }

    /// Heading used in rendered plans
    pub fn display_name(&self) -> &'static str {
        match self {
            ResourceKind::Compute => "Compute Instances",
            ResourceKind::ObjectStorage => "Object Storage Buckets",
            ResourceKind::Function => "Functions",
            ResourceKind::RelationalDB => "Relational Databases",
            ResourceKind::BlockVolume => "Block Volumes",
        }
    }

    /// Noun used in "+N more" summary lines
    pub fn unit_noun(&self) -> &'static str {
        match self {
            ResourceKind::Compute => "instance(s)",
            ResourceKind::ObjectStorage => "bucket(s)",
            ResourceKind::Function => "function(s)",
            ResourceKind::RelationalDB => "database(s)",
            ResourceKind::BlockVolume => "volume(s)",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    /// Accepts the canonical snake_case names as well as the provider
    /// service names the Advisor tends to emit (`EC2`, `S3`, `Lambda`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compute" | "ec2" | "instance" => Ok(ResourceKind::Compute),
            "object_storage" | "objectstorage" | "s3" | "bucket" => Ok(ResourceKind::ObjectStorage),
            "function" | "lambda" => Ok(ResourceKind::Function),
            "relational_db" | "relationaldb" | "rds" | "database" => Ok(ResourceKind::RelationalDB),
            "block_volume" | "blockvolume" | "ebs" | "volume" => Ok(ResourceKind::BlockVolume),
            other => Err(format!("unknown resource kind '{other}'")),
        }
    }
}

/// One flagged resource, immutable once handed to the plan compiler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationRecord {
    pub resource_kind: ResourceKind,
    pub resource_id: String,
    #[serde(default)]
    pub current_configuration: Configuration,
    #[serde(default)]
    pub suggested_configuration: Configuration,
    /// Currency string as produced upstream, e.g. `"$50.00"`; may be unparsable
    #[serde(default)]
    pub estimated_monthly_savings: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_rule_id: Option<String>,
}

impl RecommendationRecord {
    pub fn new(kind: ResourceKind, resource_id: impl Into<String>) -> Self {
        Self {
            resource_kind: kind,
            resource_id: resource_id.into(),
            current_configuration: Configuration::new(),
            suggested_configuration: Configuration::new(),
            estimated_monthly_savings: String::new(),
            policy_rule_id: None,
        }
    }

    pub fn with_current(mut self, key: &str, value: impl Into<String>) -> Self {
        self.current_configuration
            .insert(key.to_string(), value.into());
        self
    }

    pub fn with_suggested(mut self, key: &str, value: impl Into<String>) -> Self {
        self.suggested_configuration
            .insert(key.to_string(), value.into());
        self
    }

    pub fn with_savings(mut self, savings: impl Into<String>) -> Self {
        self.estimated_monthly_savings = savings.into();
        self
    }
}
