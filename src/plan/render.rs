//! Markdown rendering of compiled plans

use super::PlanGroup;
use crate::model::{Configuration, Money, RecommendationRecord, ResourceKind};

const NOT_AVAILABLE: &str = "N/A";

pub(super) fn render_plan(groups: &[PlanGroup], total: Money, partial: bool) -> String {
    let mut out = String::from("**Execution Plan:**\n\n");

    if groups.is_empty() {
        out.push_str("No actions required.\n\n");
    }

    for group in groups {
        push_line(
            &mut out,
            &format!("**{} ({}):**", group.kind.display_name(), group.records.len()),
        );
        for record in group.shown() {
            push_line(&mut out, &format!("- {}", describe(record)));
        }
        if group.remainder() > 0 {
            push_line(
                &mut out,
                &format!(
                    "- ... and {} more {}",
                    group.remainder(),
                    group.kind.unit_noun()
                ),
            );
        }
        out.push('\n');
    }

    out.push_str(&format!("**Estimated Total Monthly Savings:** {total}"));
    if partial {
        out.push_str(" (partial: some savings estimates could not be parsed)");
    }
    out
}

fn describe(record: &RecommendationRecord) -> String {
    let id = &record.resource_id;
    let current = &record.current_configuration;
    let suggested = &record.suggested_configuration;

    let mut line = match record.resource_kind {
        ResourceKind::Compute => format!(
            "Stop instance `{id}`, modify from `{}` to `{}`, restart and verify",
            value(current, "instance_type"),
            value(suggested, "instance_type"),
        ),
        ResourceKind::ObjectStorage => format!(
            "Apply `{}` lifecycle policy to bucket `{id}`",
            value(suggested, "storage_class"),
        ),
        ResourceKind::Function => format!(
            "Update function `{id}` ({})",
            changes(current, suggested, &[("memory_mb", "memory", "MB"), ("reserved_concurrency", "concurrency", "")]),
        ),
        ResourceKind::RelationalDB => format!(
            "Modify database `{id}` from `{}` to `{}` and verify",
            value(current, "instance_class"),
            value(suggested, "instance_class"),
        ),
        ResourceKind::BlockVolume => format!(
            "Modify volume `{id}` ({})",
            changes(current, suggested, &[("volume_type", "type", ""), ("size_gb", "size", "GB")]),
        ),
    };

    if let Some(rule) = &record.policy_rule_id {
        line.push_str(&format!(" [policy: {rule}]"));
    }
    line
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

fn value<'a>(config: &'a Configuration, key: &str) -> &'a str {
    config.get(key).map(String::as_str).unwrap_or(NOT_AVAILABLE)
}

fn changes(
    current: &Configuration,
    suggested: &Configuration,
    fields: &[(&str, &str, &str)],
) -> String {
    let parts: Vec<String> = fields
        .iter()
        .filter(|(key, _, _)| suggested.contains_key(*key))
        .map(|(key, label, unit)| {
            let from = current
                .get(*key)
                .map(|v| format!("{v}{unit}"))
                .unwrap_or_else(|| NOT_AVAILABLE.to_string());
            format!("{label}: {from} -> {}{unit}", value(suggested, key))
        })
        .collect();

    if parts.is_empty() {
        "no changes".to_string()
    } else {
        parts.join(", ")
    }
}
