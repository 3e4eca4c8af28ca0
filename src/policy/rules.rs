//! Versioned policy rule table
//!
//! Rules are read-only configuration: loaded once (from a TOML file or the
//! built-in defaults) into an immutable [`PolicyTable`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use super::pattern::Pattern;
use super::size::SizeClass;
use crate::model::ResourceKind;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Failed to read policy file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy table: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Duplicate policy rule for kind '{0}'")]
    DuplicateKind(ResourceKind),

    #[error("Policy rule '{0}' has an empty attribute")]
    MissingAttribute(String),
}

/// One compliance constraint for a resource kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub kind: ResourceKind,
    /// Configuration key the patterns and size ceiling apply to
    pub attribute: String,
    #[serde(default)]
    pub deny: Vec<Pattern>,
    #[serde(default)]
    pub allow: Vec<Pattern>,
    #[serde(default)]
    pub max_size_class: Option<SizeClass>,
    /// Compliant value suggested when the rule is violated
    #[serde(default)]
    pub recommended: Option<String>,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    rules: Vec<PolicyRule>,
}

fn default_version() -> String {
    "unversioned".to_string()
}

/// Immutable rule table keyed by resource kind
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    version: String,
    rules: HashMap<ResourceKind, PolicyRule>,
}

impl PolicyTable {
    pub fn new(version: impl Into<String>, rules: Vec<PolicyRule>) -> Result<Self, PolicyError> {
        let mut by_kind = HashMap::with_capacity(rules.len());
        for rule in rules {
            if rule.attribute.trim().is_empty() {
                return Err(PolicyError::MissingAttribute(rule.id));
            }
            if by_kind.contains_key(&rule.kind) {
                return Err(PolicyError::DuplicateKind(rule.kind));
            }
            by_kind.insert(rule.kind, rule);
        }
        Ok(Self {
            version: version.into(),
            rules: by_kind,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, PolicyError> {
        let file: PolicyFile = toml::from_str(content)?;
        Self::new(file.version, file.rules)
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn rule_for(&self, kind: ResourceKind) -> Option<&PolicyRule> {
        self.rules.get(&kind)
    }

    pub fn rule_by_id(&self, id: &str) -> Option<&PolicyRule> {
        self.rules.values().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Company cost policy shipped with the binary
    pub fn builtin() -> Self {
        Self::from_toml_str(BUILTIN_POLICY).unwrap_or_default()
    }
}

const BUILTIN_POLICY: &str = r#"
version = "2025-Q1"

[[rules]]
id = "compute-t3-up-to-medium"
kind = "compute"
attribute = "instance_type"
deny = [
    "r5.*", "r5a.*", "r5b.*", "r5n.*", "r6i.*", "r6a.*",
    "m5.*", "m5a.*", "m5n.*", "m6i.*",
    "c5.*", "c5a.*", "c5n.*", "c6i.*",
    "t2.*", "t3.large", "t3.xlarge", "t3.2xlarge",
]
allow = ["t3.*"]
max_size_class = "medium"
recommended = "t3.medium"
rationale = "Only the T3 family up to medium size is approved; R5, M5, C5 and T2 families are not."

[[rules]]
id = "rds-t3-classes"
kind = "relational_db"
attribute = "instance_class"
deny = ["db.r5.*", "db.r5b.*", "db.r6i.*", "db.m5.*", "db.m6i.*"]
max_size_class = "medium"
recommended = "db.t3.medium"
rationale = "T3 database classes are sufficient for most workloads."

[[rules]]
id = "ebs-no-provisioned-iops"
kind = "block_volume"
attribute = "volume_type"
deny = ["io1", "io2"]
recommended = "gp3"
rationale = "gp3 provides good performance at lower cost than provisioned IOPS."

[[rules]]
id = "s3-tiered-storage"
kind = "object_storage"
attribute = "storage_class"
deny = ["STANDARD"]
allow = ["INTELLIGENT_TIERING", "GLACIER_IR"]
recommended = "INTELLIGENT_TIERING"
rationale = "Use Intelligent-Tiering for automatic cost optimization."
"#;
