//! Plan compiler: groups recommendations by kind and renders the execution plan
//!
//! Compilation is a pure function of the ordered input records. Identical
//! input always yields byte-identical plan text.

mod render;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Money, RecommendationRecord, ResourceKind};

/// Records rendered in full per group before the rest is summarised
pub const PREVIEW_LIMIT: usize = 3;

/// All records of one resource kind, in caller order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanGroup {
    pub kind: ResourceKind,
    pub records: Vec<RecommendationRecord>,
}

impl PlanGroup {
    /// Records rendered as explicit plan lines
    pub fn shown(&self) -> &[RecommendationRecord] {
        &self.records[..self.records.len().min(PREVIEW_LIMIT)]
    }

    /// Records folded into the "+N more" summary line
    pub fn remainder(&self) -> usize {
        self.records.len().saturating_sub(PREVIEW_LIMIT)
    }

    /// Shown plus summarised; always equals the group size
    pub fn rendered_count(&self) -> usize {
        self.shown().len() + self.remainder()
    }
}

/// Read-only view over a recommendation set, recomputed on every dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub groups: Vec<PlanGroup>,
    pub total_savings: Money,
    /// Set when at least one savings value could not be parsed
    pub savings_partial: bool,
    /// Resource ids whose savings were excluded from the total
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unparsed_savings: Vec<String>,
    pub text: String,
}

impl ExecutionPlan {
    pub fn total_records(&self) -> usize {
        self.groups.iter().map(|g| g.records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Records in group order
    pub fn records(&self) -> impl Iterator<Item = &RecommendationRecord> {
        self.groups.iter().flat_map(|g| g.records.iter())
    }
}

/// Compile records into a plan.
///
/// Groups appear in [`ResourceKind::ALL`] order; records keep their relative
/// input order inside a group.
pub fn compile(records: &[RecommendationRecord]) -> ExecutionPlan {
    let groups: Vec<PlanGroup> = ResourceKind::ALL
        .iter()
        .filter_map(|kind| {
            let records: Vec<RecommendationRecord> = records
                .iter()
                .filter(|r| r.resource_kind == *kind)
                .cloned()
                .collect();
            (!records.is_empty()).then_some(PlanGroup {
                kind: *kind,
                records,
            })
        })
        .collect();

    let mut total_savings = Money::ZERO;
    let mut unparsed_savings = Vec::new();
    for record in records {
        match Money::parse(&record.estimated_monthly_savings) {
            Some(amount) => total_savings = total_savings + amount,
            None => unparsed_savings.push(record.resource_id.clone()),
        }
    }

    let savings_partial = !unparsed_savings.is_empty();
    if savings_partial {
        debug!(
            "Excluded {} unparsable savings value(s) from plan total",
            unparsed_savings.len()
        );
    }

    let text = render::render_plan(&groups, total_savings, savings_partial);

    ExecutionPlan {
        groups,
        total_savings,
        savings_partial,
        unparsed_savings,
        text,
    }
}
