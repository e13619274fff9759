//! Event model.
//!
//! Every public call on the dispatch surface produces exactly one [`Event`].
//! The event carries its own identity (`message_id`), assigned once at
//! creation and never regenerated, even across retries and persistence
//! round-trips.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The closed set of event kinds accepted by the dispatch surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Track,
    Page,
    Identify,
    Group,
    Alias,
    Screen,
}

impl EventType {
    /// Stable lowercase name, used in log fields and stats tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Track => "track",
            EventType::Page => "page",
            EventType::Identify => "identify",
            EventType::Group => "group",
            EventType::Alias => "alias",
            EventType::Screen => "screen",
        }
    }
}

/// A single event flowing through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event kind.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Track event name, or page/screen name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Page category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Free-form properties (track/page/screen).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    /// User or group traits (identify/group).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub traits: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Previous identity for alias calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    /// Per-destination enable/disable map. The `"All"` key sets the default;
    /// destination-name keys override it.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub integrations: Map<String, Value>,
    /// Free-form context bag (library info, locale, campaign, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    /// Unique message id, assigned once at creation.
    pub message_id: String,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    fn base(event_type: EventType) -> Self {
        Self {
            event_type,
            name: None,
            category: None,
            properties: Map::new(),
            traits: Map::new(),
            user_id: None,
            anonymous_id: None,
            group_id: None,
            previous_id: None,
            integrations: Map::new(),
            context: Map::new(),
            message_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Create a track event.
    pub fn track(name: impl Into<String>, properties: Map<String, Value>) -> Self {
        let mut event = Self::base(EventType::Track);
        event.name = Some(name.into());
        event.properties = properties;
        event
    }

    /// Create a page event.
    pub fn page(
        category: Option<String>,
        name: Option<String>,
        properties: Map<String, Value>,
    ) -> Self {
        let mut event = Self::base(EventType::Page);
        event.category = category;
        event.name = name;
        event.properties = properties;
        event
    }

    /// Create a screen event.
    pub fn screen(name: Option<String>, properties: Map<String, Value>) -> Self {
        let mut event = Self::base(EventType::Screen);
        event.name = name;
        event.properties = properties;
        event
    }

    /// Create an identify event.
    pub fn identify(user_id: Option<String>, traits: Map<String, Value>) -> Self {
        let mut event = Self::base(EventType::Identify);
        event.user_id = user_id;
        event.traits = traits;
        event
    }

    /// Create a group event.
    pub fn group(group_id: impl Into<String>, traits: Map<String, Value>) -> Self {
        let mut event = Self::base(EventType::Group);
        event.group_id = Some(group_id.into());
        event.traits = traits;
        event
    }

    /// Create an alias event linking a new user id to a previous one.
    pub fn alias(user_id: impl Into<String>, previous_id: impl Into<String>) -> Self {
        let mut event = Self::base(EventType::Alias);
        event.user_id = Some(user_id.into());
        event.previous_id = Some(previous_id.into());
        event
    }

    /// Internal event backing plugin registration contexts.
    pub fn system() -> Self {
        let mut event = Self::base(EventType::Track);
        event.name = Some("system".to_string());
        event
    }

    /// Whether a destination is enabled for this event.
    ///
    /// A destination-name key wins over the `"All"` key; a missing map means
    /// every destination is enabled. Non-boolean values (per-destination
    /// settings objects) count as enabled.
    pub fn integration_enabled(&self, name: &str) -> bool {
        match self.integrations.get(name) {
            Some(Value::Bool(enabled)) => *enabled,
            Some(_) => true,
            None => match self.integrations.get("All") {
                Some(Value::Bool(enabled)) => *enabled,
                _ => true,
            },
        }
    }

    /// Set a top-level property, replacing any existing value.
    pub fn set_property(&mut self, key: impl Into<String>, value: Value) {
        self.properties.insert(key.into(), value);
    }

    /// Remove a top-level property. Missing keys are a no-op.
    pub fn remove_property(&mut self, key: &str) {
        self.properties.remove(key);
    }

    /// Look up a field by dotted path for rule matching.
    ///
    /// Supported roots: `name`, `category`, `userId`, `anonymousId`,
    /// `groupId`, `previousId`, `messageId`, `type`, and the `properties.*`,
    /// `traits.*`, `context.*` bags.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let (root, rest) = match path.split_once('.') {
            Some((root, rest)) => (root, Some(rest)),
            None => (path, None),
        };

        match (root, rest) {
            ("name", None) => self.name.clone().map(Value::String),
            ("category", None) => self.category.clone().map(Value::String),
            ("userId", None) => self.user_id.clone().map(Value::String),
            ("anonymousId", None) => self.anonymous_id.clone().map(Value::String),
            ("groupId", None) => self.group_id.clone().map(Value::String),
            ("previousId", None) => self.previous_id.clone().map(Value::String),
            ("messageId", None) => Some(Value::String(self.message_id.clone())),
            ("type", None) => Some(Value::String(self.event_type.as_str().to_string())),
            ("properties", Some(key)) => self.properties.get(key).cloned(),
            ("traits", Some(key)) => self.traits.get(key).cloned(),
            ("context", Some(key)) => self.context.get(key).cloned(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_id_assigned_once_and_unique() {
        let a = Event::track("Signed Up", Map::new());
        let b = Event::track("Signed Up", Map::new());
        assert!(!a.message_id.is_empty());
        assert_ne!(a.message_id, b.message_id);

        // Cloning never regenerates the id
        let copy = a.clone();
        assert_eq!(copy.message_id, a.message_id);
    }

    #[test]
    fn serde_round_trip_preserves_message_id() {
        let mut event = Event::track("Order Completed", Map::new());
        event.set_property("revenue", json!(42.5));

        let encoded = serde_json::to_string(&event).unwrap();
        assert!(encoded.contains("\"type\":\"track\""));
        assert!(encoded.contains("\"messageId\""));

        let decoded: Event = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.message_id, event.message_id);
        assert_eq!(decoded.properties.get("revenue"), Some(&json!(42.5)));
    }

    #[test]
    fn integration_enabled_defaults_and_overrides() {
        let mut event = Event::track("Foo", Map::new());
        assert!(event.integration_enabled("Amplitude"));

        event.integrations.insert("All".to_string(), json!(false));
        assert!(!event.integration_enabled("Amplitude"));

        event.integrations.insert("Amplitude".to_string(), json!(true));
        assert!(event.integration_enabled("Amplitude"));
        assert!(!event.integration_enabled("Mixpanel"));

        // Settings objects count as enabled
        event
            .integrations
            .insert("Mixpanel".to_string(), json!({"apiKey": "k"}));
        assert!(event.integration_enabled("Mixpanel"));
    }

    #[test]
    fn lookup_resolves_fields_and_bags() {
        let mut event = Event::track("Foo", Map::new());
        event.set_property("plan", json!("pro"));
        event.context.insert("locale".to_string(), json!("en-US"));

        assert_eq!(event.lookup("name"), Some(json!("Foo")));
        assert_eq!(event.lookup("type"), Some(json!("track")));
        assert_eq!(event.lookup("properties.plan"), Some(json!("pro")));
        assert_eq!(event.lookup("context.locale"), Some(json!("en-US")));
        assert_eq!(event.lookup("properties.missing"), None);
        assert_eq!(event.lookup("unknown"), None);
    }

    #[test]
    fn alias_carries_both_identities() {
        let event = Event::alias("user-2", "anon-1");
        assert_eq!(event.event_type, EventType::Alias);
        assert_eq!(event.user_id.as_deref(), Some("user-2"));
        assert_eq!(event.previous_id.as_deref(), Some("anon-1"));
    }
}
