//! In-process representation of plugin-reported health.
//!
//! A [`Status`] is a snapshot from one poll: transient [`Event`]s that are
//! always forwarded, and persistent [`Condition`]s that are compared across
//! polls to suppress redundant updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConditionDefinition;

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational notice.
    #[default]
    Info,
    /// Something needs attention.
    Warn,
}

/// Tri-state condition value. `True` means the problem is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// The problem is present.
    True,
    /// The problem is absent (healthy).
    False,
    /// The plugin could not tell.
    #[default]
    Unknown,
}

/// A transient, timestamped notice. Never deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Severity tag.
    pub severity: Severity,
    /// When the plugin observed it.
    pub timestamp: DateTime<Utc>,
    /// Short machine-friendly reason.
    pub reason: String,
    /// Human-readable detail.
    pub message: String,
}

/// A persistent, named health fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Condition type, e.g. `GPUHealthy`.
    #[serde(rename = "type")]
    pub condition_type: String,
    /// Current value.
    pub status: ConditionStatus,
    /// Last transition time.
    pub transition: DateTime<Utc>,
    /// Short machine-friendly reason.
    pub reason: String,
    /// Human-readable detail.
    pub message: String,
}

impl Condition {
    /// Whether two conditions describe the same state.
    ///
    /// The transition timestamp is not part of the state: plugins commonly
    /// stamp every report with "now".
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// One poll's worth of health information.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    /// Source identifier reported by the plugin.
    pub source: String,
    /// Transient notices, in plugin order.
    pub events: Vec<Event>,
    /// Persistent facts, in plugin order.
    pub conditions: Vec<Condition>,
}

impl Status {
    /// Builds the synthetic status sent before the first poll: every declared
    /// condition, assumed healthy, stamped `now`.
    #[must_use]
    pub fn initial(source: &str, definitions: &[ConditionDefinition], now: DateTime<Utc>) -> Self {
        Self {
            source: source.to_string(),
            events: Vec::new(),
            conditions: definitions
                .iter()
                .map(|def| Condition {
                    condition_type: def.condition_type.clone(),
                    status: ConditionStatus::False,
                    transition: now,
                    reason: def.reason.clone(),
                    message: def.message.clone(),
                })
                .collect(),
        }
    }
}

/// Ordered, element-wise condition equality.
#[must_use]
pub fn conditions_equal(a: &[Condition], b: &[Condition]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_state(y))
}

/// Emission policy: forward the first status, any status carrying events,
/// and any status whose conditions changed since the last one sent.
#[must_use]
pub fn should_emit(last_sent: Option<&Status>, next: &Status) -> bool {
    match last_sent {
        None => true,
        Some(_) if !next.events.is_empty() => true,
        Some(prev) => !conditions_equal(&prev.conditions, &next.conditions),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn condition(status: ConditionStatus, reason: &str) -> Condition {
        Condition {
            condition_type: "GPUHealthy".to_string(),
            status,
            transition: Utc::now(),
            reason: reason.to_string(),
            message: "msg".to_string(),
        }
    }

    fn status_with(conditions: Vec<Condition>, events: Vec<Event>) -> Status {
        Status {
            source: "gpu-monitor".to_string(),
            events,
            conditions,
        }
    }

    #[test]
    fn first_status_is_always_emitted() {
        let next = status_with(Vec::new(), Vec::new());
        assert!(should_emit(None, &next));
    }

    #[test]
    fn unchanged_conditions_without_events_are_suppressed() {
        let a = status_with(vec![condition(ConditionStatus::False, "GPUIsHealthy")], Vec::new());
        let mut b = a.clone();
        // A fresh transition stamp alone is not a change.
        b.conditions[0].transition = a.conditions[0].transition + Duration::seconds(30);
        assert!(!should_emit(Some(&a), &b));
    }

    #[test]
    fn events_are_never_deduplicated() {
        let event = Event {
            severity: Severity::Warn,
            timestamp: Utc::now(),
            reason: "GPUOverheating".to_string(),
            message: "hot".to_string(),
        };
        let a = status_with(vec![condition(ConditionStatus::True, "GPUOverheating")], vec![event]);
        let b = a.clone();
        assert!(should_emit(Some(&a), &b));
    }

    #[test]
    fn changed_field_triggers_emission() {
        let a = status_with(vec![condition(ConditionStatus::False, "GPUIsHealthy")], Vec::new());

        let flipped = status_with(vec![condition(ConditionStatus::True, "GPUIsHealthy")], Vec::new());
        assert!(should_emit(Some(&a), &flipped));

        let new_reason = status_with(vec![condition(ConditionStatus::False, "Other")], Vec::new());
        assert!(should_emit(Some(&a), &new_reason));

        let extra = status_with(
            vec![
                condition(ConditionStatus::False, "GPUIsHealthy"),
                condition(ConditionStatus::False, "GPUIsHealthy"),
            ],
            Vec::new(),
        );
        assert!(should_emit(Some(&a), &extra));
    }

    #[test]
    fn condition_order_matters() {
        let mut x = condition(ConditionStatus::False, "A");
        x.condition_type = "X".to_string();
        let mut y = condition(ConditionStatus::False, "B");
        y.condition_type = "Y".to_string();

        assert!(!conditions_equal(&[x.clone(), y.clone()], &[y, x]));
    }

    #[test]
    fn initial_status_assumes_healthy() {
        let now = Utc::now();
        let defs = vec![
            ConditionDefinition::new("GPUHealthy", "GPUIsHealthy", "GPU is healthy"),
            ConditionDefinition::new("GPUMemory", "MemoryOk", "memory is fine"),
        ];
        let status = Status::initial("gpu-monitor", &defs, now);

        assert_eq!(status.source, "gpu-monitor");
        assert!(status.events.is_empty());
        assert_eq!(status.conditions.len(), 2);
        for (cond, def) in status.conditions.iter().zip(&defs) {
            assert_eq!(cond.condition_type, def.condition_type);
            assert_eq!(cond.status, ConditionStatus::False);
            assert_eq!(cond.reason, def.reason);
            assert_eq!(cond.message, def.message);
            assert_eq!(cond.transition, now);
        }
    }
}
