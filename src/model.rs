//! Test-case data model (§3): `TestCase`, `Step`, `ExecutionState`, and CSR
//! history. YAML loading itself is an external collaborator (§1 out of
//! scope); this module only holds the parsed shape and the per-test
//! scratch state the coordinator and handlers read and write.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::diagnostics::DeviceStateSnapshot;

/// One of `infrastructure` / `protocol` / `application` (§4.I, §6,
/// GLOSSARY "Tier").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionTier {
    Infrastructure,
    Protocol,
    Application,
}

/// `None < Commissioning < Connected < Commissioned` (§4.I).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionLevel {
    None,
    Commissioning,
    Connected,
    Commissioned,
}

/// A single `{action, params}` step (§3). Parameter values may contain
/// `${name}` interpolations resolved against `ExecutionState` by the
/// out-of-scope test-case loader before a step reaches the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub action: String,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

/// One precondition entry: a single `{key: value}` map (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Precondition {
    pub key: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// A single named assertion over the most recent step's outputs or the
/// accumulated state (§6 test-case schema, `expectations`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expectation {
    pub key: String,
    pub expected: serde_json::Value,
    #[serde(default)]
    pub checker: Option<String>,
    #[serde(default)]
    pub fatal: bool,
}

/// A declarative test case (§3 TestCase).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub expectations: Vec<Expectation>,
    #[serde(default)]
    pub connection_tier: Option<ConnectionTier>,
}

impl TestCase {
    pub fn precondition(&self, key: &str) -> Option<&Precondition> {
        self.preconditions.iter().find(|p| p.key == key)
    }

    pub fn has_precondition(&self, key: &str) -> bool {
        self.precondition(key).is_some()
    }
}

/// Typed substates the coordinator/handlers keep alongside the flat
/// key→value store (§3 ExecutionState "Custom map").
#[derive(Debug, Clone, Default)]
pub struct CustomState {
    pub zone: HashMap<String, serde_json::Value>,
    pub device: HashMap<String, serde_json::Value>,
    pub controller: HashMap<String, serde_json::Value>,
    pub connection_tracker: HashMap<String, serde_json::Value>,
    pub security_pool: Vec<String>,
}

/// The ordered sequence of CSRs observed during a single test, referenced
/// by index for renewal tests (§3 "CSR history").
#[derive(Debug, Clone, Default)]
pub struct CsrHistory(pub Vec<Vec<u8>>);

impl CsrHistory {
    pub fn record(&mut self, csr: Vec<u8>) {
        self.0.push(csr);
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.0.get(index).map(|v| v.as_slice())
    }
}

/// Per-test key→value store plus typed substates (§3 ExecutionState).
/// Lifetime: one test case; cleared between tests except for fields the
/// coordinator explicitly preserves (session-reuse bookkeeping).
#[derive(Debug, Clone, Default)]
pub struct ExecutionState {
    pub values: HashMap<String, serde_json::Value>,
    pub custom: CustomState,
    pub before_snapshot: Option<DeviceStateSnapshot>,
    pub after_snapshot: Option<DeviceStateSnapshot>,
    pub csr_history: CsrHistory,
}

impl ExecutionState {
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.values.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    /// Clear everything except the fields the coordinator explicitly
    /// preserves across tests (§3 ExecutionState lifetime note).
    pub fn reset_for_next_test(&mut self, preserve_keys: &[&str]) {
        let preserved: HashMap<String, serde_json::Value> = preserve_keys
            .iter()
            .filter_map(|k| self.values.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect();
        *self = ExecutionState {
            values: preserved,
            ..ExecutionState::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_lookup_finds_by_key() {
        let tc = TestCase {
            id: "t1".into(),
            preconditions: vec![Precondition {
                key: "fresh_commission".into(),
                value: serde_json::Value::Bool(true),
            }],
            steps: vec![],
            expectations: vec![],
            connection_tier: None,
        };
        assert!(tc.has_precondition("fresh_commission"));
        assert!(!tc.has_precondition("device_booted"));
    }

    #[test]
    fn precondition_level_ordering_matches_spec() {
        assert!(PreconditionLevel::None < PreconditionLevel::Commissioning);
        assert!(PreconditionLevel::Commissioning < PreconditionLevel::Connected);
        assert!(PreconditionLevel::Connected < PreconditionLevel::Commissioned);
    }

    #[test]
    fn reset_for_next_test_preserves_named_keys_only() {
        let mut state = ExecutionState::default();
        state.set("keep_me", true);
        state.set("drop_me", "gone");
        state.reset_for_next_test(&["keep_me"]);
        assert_eq!(state.get("keep_me"), Some(&serde_json::Value::Bool(true)));
        assert_eq!(state.get("drop_me"), None);
    }

    #[test]
    fn csr_history_records_in_order() {
        let mut history = CsrHistory::default();
        history.record(vec![1]);
        history.record(vec![2]);
        assert_eq!(history.get(0), Some(&[1][..]));
        assert_eq!(history.get(1), Some(&[2][..]));
        assert_eq!(history.get(2), None);
    }
}
