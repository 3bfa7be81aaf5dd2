//! Wire-to-internal conversion.
//!
//! Unrecognized enum values map to the most conservative internal value:
//! informational severity, unknown condition status.

use chrono::{DateTime, Utc};

use super::proto;
use super::PluginIdentity;
use crate::status::{Condition, ConditionStatus, Event, Severity, Status};

/// Maps a wire severity onto the internal enumeration.
#[must_use]
pub fn severity_from_wire(value: i32) -> Severity {
    match proto::Severity::try_from(value) {
        Ok(proto::Severity::Warn) => Severity::Warn,
        Ok(proto::Severity::Info | proto::Severity::Unspecified) | Err(_) => Severity::Info,
    }
}

/// Maps a wire condition status onto the internal tri-state.
#[must_use]
pub fn condition_status_from_wire(value: i32) -> ConditionStatus {
    match proto::ConditionStatus::try_from(value) {
        Ok(proto::ConditionStatus::True) => ConditionStatus::True,
        Ok(proto::ConditionStatus::False) => ConditionStatus::False,
        Ok(proto::ConditionStatus::Unknown | proto::ConditionStatus::Unspecified) | Err(_) => {
            ConditionStatus::Unknown
        }
    }
}

/// Converts a protobuf timestamp, falling back to `received` when the
/// plugin left it unset or out of range.
#[must_use]
pub fn timestamp_from_wire(ts: Option<&prost_types::Timestamp>, received: DateTime<Utc>) -> DateTime<Utc> {
    ts.and_then(|ts| {
        let nanos = u32::try_from(ts.nanos).ok()?;
        DateTime::from_timestamp(ts.seconds, nanos)
    })
    .unwrap_or(received)
}

/// Converts a plugin health report into an internal [`Status`].
#[must_use]
pub fn status_from_wire(wire: proto::HealthStatus, received: DateTime<Utc>) -> Status {
    Status {
        source: wire.source,
        events: wire
            .events
            .into_iter()
            .map(|e| Event {
                severity: severity_from_wire(e.severity),
                timestamp: timestamp_from_wire(e.timestamp.as_ref(), received),
                reason: e.reason,
                message: e.message,
            })
            .collect(),
        conditions: wire
            .conditions
            .into_iter()
            .map(|c| Condition {
                condition_type: c.r#type,
                status: condition_status_from_wire(c.status),
                transition: timestamp_from_wire(c.transition.as_ref(), received),
                reason: c.reason,
                message: c.message,
            })
            .collect(),
    }
}

/// Builds a [`PluginIdentity`] from the plugin's metadata.
#[must_use]
pub fn identity_from_wire(source: &str, endpoint: &str, wire: proto::MonitorMetadata) -> PluginIdentity {
    PluginIdentity {
        source: source.to_string(),
        endpoint: endpoint.to_string(),
        name: wire.name,
        version: wire.version,
        api_version: wire.api_version,
        description: wire.description,
        supported_conditions: wire.supported_conditions,
        capabilities: wire.capabilities.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn unknown_enum_values_map_conservatively() {
        assert_eq!(severity_from_wire(99), Severity::Info);
        assert_eq!(severity_from_wire(proto::Severity::Unspecified as i32), Severity::Info);
        assert_eq!(severity_from_wire(proto::Severity::Warn as i32), Severity::Warn);

        assert_eq!(condition_status_from_wire(-4), ConditionStatus::Unknown);
        assert_eq!(
            condition_status_from_wire(proto::ConditionStatus::Unspecified as i32),
            ConditionStatus::Unknown
        );
        assert_eq!(condition_status_from_wire(proto::ConditionStatus::True as i32), ConditionStatus::True);
        assert_eq!(condition_status_from_wire(proto::ConditionStatus::False as i32), ConditionStatus::False);
    }

    #[test]
    fn missing_or_invalid_timestamp_uses_receive_time() {
        let received = Utc::now();
        assert_eq!(timestamp_from_wire(None, received), received);

        let bad = prost_types::Timestamp { seconds: 0, nanos: -1 };
        assert_eq!(timestamp_from_wire(Some(&bad), received), received);

        let good = prost_types::Timestamp {
            seconds: 1_700_000_000,
            nanos: 5,
        };
        let converted = timestamp_from_wire(Some(&good), received);
        assert_eq!(converted.timestamp(), 1_700_000_000);
        assert_eq!(converted.timestamp_subsec_nanos(), 5);
    }

    #[test]
    fn converts_full_status_in_order() {
        let received = Utc::now();
        let wire = proto::HealthStatus {
            source: "gpu-monitor".to_string(),
            events: vec![proto::Event {
                severity: proto::Severity::Warn as i32,
                timestamp: None,
                reason: "GPUOverheating".to_string(),
                message: "GPU temperature 91°C exceeds threshold 80°C".to_string(),
            }],
            conditions: vec![
                proto::Condition {
                    r#type: "GPUHealthy".to_string(),
                    status: proto::ConditionStatus::True as i32,
                    transition: None,
                    reason: "GPUOverheating".to_string(),
                    message: "hot".to_string(),
                },
                proto::Condition {
                    r#type: "GPUMemory".to_string(),
                    status: 42,
                    transition: None,
                    reason: "Weird".to_string(),
                    message: "?".to_string(),
                },
            ],
        };

        let status = status_from_wire(wire, received);
        assert_eq!(status.source, "gpu-monitor");
        assert_eq!(status.events.len(), 1);
        assert_eq!(status.events[0].severity, Severity::Warn);
        assert_eq!(status.events[0].timestamp, received);
        assert_eq!(status.conditions[0].condition_type, "GPUHealthy");
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
        assert_eq!(status.conditions[1].condition_type, "GPUMemory");
        assert_eq!(status.conditions[1].status, ConditionStatus::Unknown);
    }

    #[test]
    fn identity_carries_source_and_endpoint() {
        let mut capabilities = HashMap::new();
        capabilities.insert("temperature_monitoring".to_string(), "true".to_string());
        let wire = proto::MonitorMetadata {
            name: "gpu-monitor".to_string(),
            version: "1.0.0".to_string(),
            description: "Monitors GPU health".to_string(),
            supported_conditions: vec!["GPUHealthy".to_string()],
            capabilities,
            api_version: "v1".to_string(),
        };

        let identity = identity_from_wire("gpu", "/run/gpu.sock", wire);
        assert_eq!(identity.source, "gpu");
        assert_eq!(identity.endpoint, "/run/gpu.sock");
        assert_eq!(identity.version, "1.0.0");
        assert_eq!(identity.api_version, "v1");
        assert_eq!(identity.supported_conditions, vec!["GPUHealthy".to_string()]);
        assert_eq!(identity.capabilities["temperature_monitoring"], "true");
    }
}
