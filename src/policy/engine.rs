//! Compliance evaluation against the rule table
//!
//! `evaluate` is a pure function of the current table and one resource. The
//! table is held behind an `Arc` snapshot so a reload replaces it whole and
//! in-flight evaluations keep the table they started with.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use super::rules::{PolicyRule, PolicyTable};
use super::size::SizeClass;
use crate::model::{Configuration, RecommendationRecord, ResourceKind};

/// A resource as seen by the policy engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub resource_id: String,
    #[serde(default)]
    pub configuration: Configuration,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, resource_id: impl Into<String>) -> Self {
        Self {
            kind,
            resource_id: resource_id.into(),
            configuration: Configuration::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.configuration.insert(key.to_string(), value.into());
        self
    }
}

impl From<&RecommendationRecord> for ResourceDescriptor {
    fn from(record: &RecommendationRecord) -> Self {
        Self {
            kind: record.resource_kind,
            resource_id: record.resource_id.clone(),
            configuration: record.current_configuration.clone(),
        }
    }
}

/// Compliance verdict for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub compliant: bool,
    pub violated_rule: Option<PolicyRule>,
    pub suggested_configuration: Option<Configuration>,
    /// Human-readable explanation of the violation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Verdict {
    fn compliant() -> Self {
        Self {
            compliant: true,
            violated_rule: None,
            suggested_configuration: None,
            reason: None,
        }
    }
}

pub struct PolicyEngine {
    table: RwLock<Arc<PolicyTable>>,
}

impl PolicyEngine {
    pub fn new(table: PolicyTable) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    /// Current rule table snapshot
    pub fn table(&self) -> Arc<PolicyTable> {
        match self.table.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Atomically replace the whole rule table
    pub fn replace_rules(&self, table: PolicyTable) {
        let version = table.version().to_string();
        let next = Arc::new(table);
        match self.table.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        info!("Policy table replaced with version {}", version);
    }

    pub fn evaluate(&self, resource: &ResourceDescriptor) -> Verdict {
        evaluate_with(&self.table(), resource)
    }

    /// Stamp policy metadata onto records before plan compilation.
    ///
    /// Records whose current configuration violates a rule get the rule id,
    /// and an empty or non-compliant suggestion is replaced by the rule's
    /// recommended value.
    pub fn annotate(&self, records: Vec<RecommendationRecord>) -> Vec<RecommendationRecord> {
        let table = self.table();
        records
            .into_iter()
            .map(|record| annotate_record(&table, record))
            .collect()
    }

    /// Generate recommendation records for every non-compliant resource
    pub fn flag(&self, resources: &[ResourceDescriptor]) -> Vec<RecommendationRecord> {
        let table = self.table();
        resources
            .iter()
            .filter_map(|resource| {
                let verdict = evaluate_with(&table, resource);
                let rule = verdict.violated_rule?;
                let suggested = verdict.suggested_configuration?;
                Some(RecommendationRecord {
                    resource_kind: resource.kind,
                    resource_id: resource.resource_id.clone(),
                    current_configuration: resource.configuration.clone(),
                    suggested_configuration: suggested,
                    estimated_monthly_savings: "$0.00".to_string(),
                    policy_rule_id: Some(rule.id),
                })
            })
            .collect()
    }
}

fn evaluate_with(table: &PolicyTable, resource: &ResourceDescriptor) -> Verdict {
    let Some(rule) = table.rule_for(resource.kind) else {
        return Verdict::compliant();
    };
    let Some(value) = resource.configuration.get(&rule.attribute) else {
        debug!(
            "Resource {} has no '{}' attribute; rule {} not applicable",
            resource.resource_id, rule.attribute, rule.id
        );
        return Verdict::compliant();
    };

    match violation(rule, value) {
        None => Verdict::compliant(),
        Some(reason) => {
            let suggested_configuration = rule.recommended.as_ref().map(|recommended| {
                let mut config = resource.configuration.clone();
                config.insert(rule.attribute.clone(), recommended.clone());
                config
            });
            Verdict {
                compliant: false,
                violated_rule: Some(rule.clone()),
                suggested_configuration,
                reason: Some(reason),
            }
        }
    }
}

/// Deny patterns are checked first; a deny match is final.
fn violation(rule: &PolicyRule, value: &str) -> Option<String> {
    if let Some(pattern) = rule.deny.iter().find(|p| p.matches(value)) {
        return Some(format!("'{value}' matches deny pattern '{pattern}'"));
    }

    if !rule.allow.is_empty() && !rule.allow.iter().any(|p| p.matches(value)) {
        return Some(format!("'{value}' matches no allow pattern"));
    }

    if let (Some(max), Some(size)) = (rule.max_size_class, SizeClass::from_token(value)) {
        if size > max {
            return Some(format!("size class {size} exceeds maximum {max}"));
        }
    }

    None
}

fn annotate_record(table: &PolicyTable, mut record: RecommendationRecord) -> RecommendationRecord {
    let Some(rule) = table.rule_for(record.resource_kind) else {
        return record;
    };

    let current = ResourceDescriptor::from(&record);
    if !evaluate_with(table, &current).compliant && record.policy_rule_id.is_none() {
        record.policy_rule_id = Some(rule.id.clone());
    }

    if let Some(recommended) = &rule.recommended {
        let suggestion_ok = record
            .suggested_configuration
            .get(&rule.attribute)
            .map(|value| violation(rule, value).is_none());

        match suggestion_ok {
            Some(true) => {}
            Some(false) => {
                warn!(
                    "Suggested {} for {} violates rule {}; using {}",
                    rule.attribute, record.resource_id, rule.id, recommended
                );
                record
                    .suggested_configuration
                    .insert(rule.attribute.clone(), recommended.clone());
            }
            None if record.policy_rule_id.as_deref() == Some(rule.id.as_str()) => {
                record
                    .suggested_configuration
                    .insert(rule.attribute.clone(), recommended.clone());
            }
            None => {}
        }
    }

    record
}
