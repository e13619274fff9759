//! Declarative routing rules.
//!
//! A rule set is keyed by destination name. Each rule pairs a matcher with
//! an ordered list of transforms; matched transforms mutate the event or
//! signal a drop. The first drop terminates evaluation for that destination
//! without affecting any other destination's rules.

use beacon_core::{Event, EventType};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Boolean predicate over an event.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Matches every event.
    All,
    /// Matches events of one kind.
    EventType(EventType),
    /// Matches on the track/page/screen name.
    NameEquals(String),
    /// Matches a field by dotted path (see [`Event::lookup`]).
    FieldEquals { path: String, value: Value },
    /// Matches when the field is present at all.
    FieldExists { path: String },
    Not(Box<Matcher>),
    AnyOf(Vec<Matcher>),
    AllOf(Vec<Matcher>),
}

impl Matcher {
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Matcher::All => true,
            Matcher::EventType(event_type) => event.event_type == *event_type,
            Matcher::NameEquals(name) => event.name.as_deref() == Some(name.as_str()),
            Matcher::FieldEquals { path, value } => {
                event.lookup(path).as_ref() == Some(value)
            }
            Matcher::FieldExists { path } => event.lookup(path).is_some(),
            Matcher::Not(inner) => !inner.matches(event),
            Matcher::AnyOf(inner) => inner.iter().any(|matcher| matcher.matches(event)),
            Matcher::AllOf(inner) => inner.iter().all(|matcher| matcher.matches(event)),
        }
    }
}

/// Event mutation, or a drop signal.
#[derive(Debug, Clone)]
pub enum Transform {
    /// Suppress delivery for this destination.
    Drop,
    SetProperty { key: String, value: Value },
    RemoveProperty { key: String },
    /// Replace the event name.
    Rename(String),
}

impl Transform {
    /// Apply to the event. Returns false when the event was dropped.
    fn apply(&self, event: &mut Event) -> bool {
        match self {
            Transform::Drop => false,
            Transform::SetProperty { key, value } => {
                event.set_property(key.clone(), value.clone());
                true
            }
            Transform::RemoveProperty { key } => {
                event.remove_property(key);
                true
            }
            Transform::Rename(name) => {
                event.name = Some(name.clone());
                true
            }
        }
    }
}

/// One matcher with its ordered transforms.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub matcher: Matcher,
    pub transforms: Vec<Transform>,
}

impl RoutingRule {
    pub fn new(matcher: Matcher, transforms: Vec<Transform>) -> Self {
        Self {
            matcher,
            transforms,
        }
    }

    /// Shorthand for a rule that drops matching events.
    pub fn drop_when(matcher: Matcher) -> Self {
        Self::new(matcher, vec![Transform::Drop])
    }
}

/// Result of evaluating one destination's rules.
#[derive(Debug)]
pub enum RuleOutcome {
    Continue(Event),
    Dropped,
}

/// Routing rules keyed by destination name.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: HashMap<String, Vec<RoutingRule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule for one destination. Rules evaluate in insertion order.
    pub fn add_rule(&mut self, destination: impl Into<String>, rule: RoutingRule) {
        self.rules.entry(destination.into()).or_default().push(rule);
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run the event through every rule registered for `destination`.
    ///
    /// Unmatched rules are skipped; matched transforms apply in order; the
    /// first drop wins.
    pub fn evaluate(&self, destination: &str, mut event: Event) -> RuleOutcome {
        let Some(rules) = self.rules.get(destination) else {
            return RuleOutcome::Continue(event);
        };

        for rule in rules {
            if !rule.matcher.matches(&event) {
                continue;
            }
            for transform in &rule.transforms {
                if !transform.apply(&mut event) {
                    debug!(destination, "Routing rule dropped event");
                    return RuleOutcome::Dropped;
                }
            }
        }
        RuleOutcome::Continue(event)
    }
}
