//! # Conditions
//!
//! Helpers that keep condition lists well formed: at most one entry per type,
//! and `lastTransitionTime` only moves when the status flips.

use crate::crd::{Condition, ConditionStatus};
use chrono::{DateTime, SecondsFormat, Utc};

/// RFC3339 timestamp with seconds precision, as written to conditions
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Find the condition of the given type
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Status of the condition of the given type, `Unknown` when absent
pub fn condition_status(conditions: &[Condition], condition_type: &str) -> ConditionStatus {
    find_condition(conditions, condition_type).map_or(ConditionStatus::Unknown, |c| c.status)
}

/// Set a condition, replacing any existing entries of the same type
///
/// `lastTransitionTime` is carried over from the existing entry unless the
/// status changes. Duplicate entries of the same type are collapsed.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
    now: DateTime<Utc>,
) {
    let previous = find_condition(conditions, condition_type).cloned();

    let last_transition_time = match previous {
        Some(ref existing) if existing.status == status => existing
            .last_transition_time
            .clone()
            .or_else(|| Some(format_timestamp(now))),
        _ => Some(format_timestamp(now)),
    };

    let condition = Condition {
        r#type: condition_type.to_string(),
        status,
        last_transition_time,
        reason: Some(reason.to_string()),
        message: Some(message.into()),
        observed_generation: previous.and_then(|c| c.observed_generation),
    };

    match conditions.iter().position(|c| c.r#type == condition_type) {
        Some(index) => {
            conditions[index] = condition;
            let mut seen = false;
            conditions.retain(|c| {
                if c.r#type != condition_type {
                    return true;
                }
                let keep = !seen;
                seen = true;
                keep
            });
        }
        None => conditions.push(condition),
    }
}
