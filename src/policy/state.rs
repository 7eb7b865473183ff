//! Persisted rule state
//!
//! State is a flat map of named booleans, strings and numbers. On disk it is
//! JSON with two objects: `types` maps each key to `boolean`, `string` or
//! `number`, and `values` maps each key to its textual representation.

use crate::errors::{Result, StakeSignError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Bool(bool),
    String(String),
    Number(f64),
}

impl StateValue {
    fn type_tag(&self) -> &'static str {
        match self {
            StateValue::Bool(_) => "boolean",
            StateValue::String(_) => "string",
            StateValue::Number(_) => "number",
        }
    }

    fn repr(&self) -> String {
        match self {
            StateValue::Bool(b) => b.to_string(),
            StateValue::String(s) => s.clone(),
            StateValue::Number(n) => n.to_string(),
        }
    }

    fn parse(tag: &str, repr: &str) -> Option<Self> {
        match tag {
            "boolean" => repr.parse().ok().map(StateValue::Bool),
            "string" => Some(StateValue::String(repr.to_string())),
            "number" => repr.parse().ok().map(StateValue::Number),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
struct EncodedState {
    #[serde(default)]
    types: BTreeMap<String, String>,
    #[serde(default)]
    values: BTreeMap<String, String>,
}

/// Mutable state a rule reads and writes across requests
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyState {
    values: BTreeMap<String, StateValue>,
}

impl PolicyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.values.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        match self.values.get(key) {
            Some(StateValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn boolean(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(StateValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(StateValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: StateValue) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<StateValue> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut encoded = EncodedState::default();
        for (key, value) in &self.values {
            encoded.types.insert(key.clone(), value.type_tag().to_string());
            encoded.values.insert(key.clone(), value.repr());
        }
        Ok(serde_json::to_vec(&encoded)?)
    }

    /// Decode persisted state; entries with an unknown type or bad value are skipped
    pub fn decode(data: &[u8]) -> Result<Self> {
        let encoded: EncodedState = serde_json::from_slice(data)
            .map_err(|e| StakeSignError::StorageError(format!("invalid rule state: {}", e)))?;

        let mut state = Self::default();
        for (key, tag) in &encoded.types {
            let Some(repr) = encoded.values.get(key) else {
                warn!(key = %key, "Rule state entry without a value");
                continue;
            };
            match StateValue::parse(tag, repr) {
                Some(value) => {
                    state.values.insert(key.clone(), value);
                }
                None => warn!(key = %key, tag = %tag, "Skipping unreadable rule state entry"),
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_format() {
        let mut state = PolicyState::new();
        state.set("count", StateValue::Number(3.0));
        state.set("seen", StateValue::Bool(true));
        state.set("last", StateValue::String("abc".to_string()));

        let json: serde_json::Value = serde_json::from_slice(&state.encode().unwrap()).unwrap();
        assert_eq!(json["types"]["count"], "number");
        assert_eq!(json["types"]["seen"], "boolean");
        assert_eq!(json["types"]["last"], "string");
        assert_eq!(json["values"]["count"], "3");
        assert_eq!(json["values"]["seen"], "true");
        assert_eq!(json["values"]["last"], "abc");

        assert_eq!(PolicyState::decode(&state.encode().unwrap()).unwrap(), state);
    }

    #[test]
    fn test_fractional_numbers() {
        let mut state = PolicyState::new();
        state.set("ratio", StateValue::Number(1.5));
        let decoded = PolicyState::decode(&state.encode().unwrap()).unwrap();
        assert_eq!(decoded.number("ratio"), Some(1.5));
    }

    #[test]
    fn test_decode_skips_unknown_entries() {
        let data = br#"{
            "types": {"a": "number", "b": "table", "c": "boolean", "d": "string"},
            "values": {"a": "12", "b": "{}", "c": "maybe"}
        }"#;
        let state = PolicyState::decode(data).unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(state.number("a"), Some(12.0));
        assert!(!state.contains("b"));
        assert!(!state.contains("c"));
        assert!(!state.contains("d"));
    }

    #[test]
    fn test_decode_invalid_json() {
        assert!(PolicyState::decode(b"not json").is_err());
    }

    #[test]
    fn test_empty_state_encodes_to_bytes() {
        let encoded = PolicyState::new().encode().unwrap();
        assert!(!encoded.is_empty());
        assert!(PolicyState::decode(&encoded).unwrap().is_empty());
    }
}
