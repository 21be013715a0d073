/// Audit trail for policy changes
///
/// Every committed mutation (rule added or deleted, defaults replaced,
/// snapshot imported, ruleset applied) is recorded with the acting user in
/// the store's `audit_log` table. Writing the trail is best effort: a failed
/// audit write is logged and never undoes the change it describes.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Types of auditable events
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    AddRule,
    DeleteRule,
    SetDefaults,
    ImportSnapshot,
    ApplyRules,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: DateTime<Utc>,

    /// User the change was made as
    pub actor: String,

    /// Type of event
    pub event_type: EventType,

    /// What was changed, e.g. `rule:7` or `defaults`
    pub object: String,

    /// Additional structured data about the event
    pub details: serde_json::Value,
}

impl AuditEvent {
    /// Creates a new audit event stamped with the current time
    pub fn new(
        actor: impl Into<String>,
        event_type: EventType,
        object: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: actor.into(),
            event_type,
            object: object.into(),
            details,
        }
    }
}

/// Audit object naming a single rule
pub fn rule_object(id: i64) -> String {
    format!("rule:{id}")
}

/// Audit object for the defaults singleton
pub const DEFAULTS_OBJECT: &str = "defaults";

/// Audit object for whole-policy operations (import, apply)
pub const RULESET_OBJECT: &str = "ruleset";

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_audit_event_creation() {
        let event = AuditEvent::new(
            "root",
            EventType::AddRule,
            rule_object(5),
            serde_json::json!({"chain": "input"}),
        );

        assert_eq!(event.actor, "root");
        assert_eq!(event.object, "rule:5");
        assert_eq!(event.details["chain"], "input");
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(EventType::ImportSnapshot.to_string(), "import_snapshot");
        assert_eq!(EventType::from_str("delete_rule").unwrap(), EventType::DeleteRule);
        assert!(EventType::from_str("revert_rules").is_err());
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"timestamp":"2024-01-01T00:00:00Z","actor":"operator","event_type":"apply_rules","object":"ruleset","details":{"rules":3}}"#;
        let event: AuditEvent = serde_json::from_str(json).unwrap();

        assert_eq!(event.event_type, EventType::ApplyRules);
        assert_eq!(event.object, RULESET_OBJECT);
        assert_eq!(event.details["rules"], 3);
    }
}
