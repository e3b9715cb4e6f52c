//! Condition framework.
//!
//! Each condition is one class of contextual check attached to a policy
//! under a condition key. The engine requires ALL of a policy's
//! conditions to be fulfilled; a single failing condition drops the
//! policy from the decision. Evaluation never raises: every internal
//! failure reads as "not fulfilled".
//!
//! Conditions are self-describing on the wire. A `conditions` entry looks
//! like `{"type": "BodyArrayMatch", "mode": "all", ...}`, and decoding
//! goes through a process-wide registry of discriminator -> factory so the
//! set can be extended by registering at program start.

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::Delimiters;
use crate::request::Request;

pub mod body_array_match;
pub mod body_match;
pub mod equals_subject;
pub mod string_match;

pub use body_array_match::{BodyArrayMatch, MatchMode};
pub use body_match::{BodyMatch, JsonBodyMatch};
pub use equals_subject::EqualsSubject;
pub use string_match::StringMatch;

/// Everything a condition may look at: the decision request and the
/// acting subject — the request subject the engine matched against the
/// candidate policy's subject patterns — plus the owning policy's pattern
/// delimiters.
#[derive(Clone, Copy)]
pub struct MatchContext<'a> {
    pub request: &'a Request,
    pub subject: &'a str,
    pub delimiters: Delimiters,
}

/// A single typed predicate evaluated against a request.
pub trait Condition: Send + Sync + std::fmt::Debug {
    /// Registered discriminator for this condition type.
    fn name(&self) -> &'static str;

    /// Whether the condition holds for the request, where `key` is the
    /// condition's slot name in the owning policy.
    fn fulfills(&self, key: &str, ctx: &MatchContext<'_>) -> bool;

    /// The variant's parameters as a JSON object, without the
    /// discriminator.
    fn params(&self) -> Value;

    fn boxed_clone(&self) -> Box<dyn Condition>;
}

#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    #[error("unknown condition type: {0}")]
    UnknownType(String),
    #[error("invalid condition parameters: {0}")]
    InvalidParams(#[from] serde_json::Error),
}

/// Constructor registered for a condition discriminator.
pub type ConditionFactory = fn(Value) -> Result<Box<dyn Condition>, serde_json::Error>;

static REGISTRY: Lazy<RwLock<HashMap<String, ConditionFactory>>> = Lazy::new(|| {
    let mut factories: HashMap<String, ConditionFactory> = HashMap::new();
    factories.insert("StringMatch".to_string(), string_match::factory);
    factories.insert("BodyMatch".to_string(), body_match::factory);
    factories.insert("JsonBodyMatch".to_string(), body_match::json_factory);
    factories.insert("BodyArrayMatch".to_string(), body_array_match::factory);
    factories.insert("EqualsSubject".to_string(), equals_subject::factory);
    RwLock::new(factories)
});

/// Register a condition factory under `name`. Call this at program start,
/// before any policies are decoded; the registry is read-only afterwards.
pub fn register(name: &str, factory: ConditionFactory) {
    if let Ok(mut registry) = REGISTRY.write() {
        registry.insert(name.to_string(), factory);
    }
}

/// Construct a condition from its discriminator and parameter object.
pub fn construct(name: &str, params: Value) -> Result<Box<dyn Condition>, ConditionError> {
    let factory = REGISTRY
        .read()
        .ok()
        .and_then(|registry| registry.get(name).copied())
        .ok_or_else(|| ConditionError::UnknownType(name.to_string()))?;
    Ok(factory(params)?)
}

/// The conditions attached to a policy, keyed by condition slot name.
#[derive(Debug, Default)]
pub struct Conditions(HashMap<String, Box<dyn Condition>>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<C: Condition + 'static>(&mut self, key: impl Into<String>, condition: C) {
        self.0.insert(key.into(), Box::new(condition));
    }

    pub fn get(&self, key: &str) -> Option<&dyn Condition> {
        self.0.get(key).map(|condition| condition.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Condition)> {
        self.0
            .iter()
            .map(|(key, condition)| (key.as_str(), condition.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Clone for Conditions {
    fn clone(&self) -> Self {
        Self(
            self.0
                .iter()
                .map(|(key, condition)| (key.clone(), condition.boxed_clone()))
                .collect(),
        )
    }
}

// Structural equality through the wire form; good enough for round-trip
// checks and cheap relative to how rarely it runs.
impl PartialEq for Conditions {
    fn eq(&self, other: &Self) -> bool {
        serde_json::to_value(self).ok() == serde_json::to_value(other).ok()
    }
}

impl Serialize for Conditions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, condition) in &self.0 {
            let mut entry = serde_json::Map::new();
            entry.insert("type".to_string(), Value::String(condition.name().into()));
            if let Value::Object(params) = condition.params() {
                entry.extend(params);
            }
            map.serialize_entry(key, &Value::Object(entry))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Conditions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = HashMap::<String, Value>::deserialize(deserializer)?;
        let mut conditions = HashMap::with_capacity(raw.len());
        for (key, mut value) in raw {
            let name = value
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| {
                    de::Error::custom(format!("condition `{key}` is missing a type discriminator"))
                })?;
            if let Some(entry) = value.as_object_mut() {
                entry.remove("type");
            }
            let condition = construct(&name, value).map_err(de::Error::custom)?;
            conditions.insert(key, condition);
        }
        Ok(Conditions(conditions))
    }
}
