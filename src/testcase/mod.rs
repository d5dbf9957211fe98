//! Test-case loading (§1 out of scope) named as a trait interface only, per
//! the same "named collaborator, stub body" treatment `zeekoe`'s `cli.rs`
//! gives unimplemented subcommands (`todo!()` branches) — except here the
//! stub is an explicit, tested error rather than a panic, since this is a
//! library a caller can reasonably probe at runtime.
//!
//! `${var}` parameter interpolation, by contrast, *is* implemented: the
//! coordinator and action handlers need it to resolve a step's parameters
//! against `ExecutionState` regardless of where the `TestCase` ultimately
//! came from (§3, §6).

use std::path::Path;

use thiserror::Error;

use crate::model::{ExecutionState, Step, TestCase};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("test-case loading from YAML files is not implemented by this crate")]
    Unimplemented,
    #[error("io error reading {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse error in {path}: {message}")]
    Parse { path: std::path::PathBuf, message: String },
}

/// A source of test cases, e.g. a directory of YAML files matched against a
/// glob pattern (§6 `test_dir`, `pattern`). Loading itself is out of scope
/// (§1); this trait exists so the coordinator can be driven by any source
/// without depending on a concrete file format.
pub trait Source: Send + Sync {
    fn load_all(&self, dir: &Path, pattern: &str) -> Result<Vec<TestCase>, LoadError>;
}

/// The concrete source `cli.rs` would wire up for a real run. Parsing YAML
/// test-case files is named but not implemented (§1).
#[derive(Debug, Default)]
pub struct YamlSource;

impl Source for YamlSource {
    fn load_all(&self, _dir: &Path, _pattern: &str) -> Result<Vec<TestCase>, LoadError> {
        Err(LoadError::Unimplemented)
    }
}

/// Replace every `${name}` occurrence in `template` with the string form of
/// `state.values["name"]` (§3 Step, §6). A reference to a key absent from
/// `state` is left untouched, so a step author's typo surfaces as a visibly
/// unexpanded `${...}` in output rather than silently vanishing.
pub fn interpolate(template: &str, state: &ExecutionState) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..start]);
        let name = &rest[start + 2..start + end];
        match state.get(name) {
            Some(value) => out.push_str(&value_to_interp_string(value)),
            None => out.push_str(&rest[start..start + end + 1]),
        }
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    out
}

fn value_to_interp_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Interpolate every string-valued parameter of a step in place (§3, §6).
/// Non-string parameter values (already-structured numbers, bools, nested
/// maps) pass through unchanged — `${var}` substitution only ever applies
/// at the string level, matching how the wire envelope and handler params
/// are built from step parameters.
pub fn interpolate_step(step: &Step, state: &ExecutionState) -> Step {
    let mut resolved = step.clone();
    for value in resolved.params.values_mut() {
        if let serde_json::Value::String(s) = value {
            *s = interpolate(s, state);
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn yaml_source_reports_unimplemented() {
        let source = YamlSource;
        let err = source
            .load_all(&PathBuf::from("tests"), "*.yaml")
            .unwrap_err();
        assert!(matches!(err, LoadError::Unimplemented));
    }

    #[test]
    fn interpolate_substitutes_known_keys() {
        let mut state = ExecutionState::default();
        state.set("zone_id", "abcd1234");
        assert_eq!(
            interpolate("zone=${zone_id}", &state),
            "zone=abcd1234"
        );
    }

    #[test]
    fn interpolate_leaves_unknown_keys_untouched() {
        let state = ExecutionState::default();
        assert_eq!(interpolate("zone=${missing}", &state), "zone=${missing}");
    }

    #[test]
    fn interpolate_handles_multiple_references() {
        let mut state = ExecutionState::default();
        state.set("a", "1");
        state.set("b", "2");
        assert_eq!(interpolate("${a}-${b}", &state), "1-2");
    }

    #[test]
    fn interpolate_step_only_touches_string_params() {
        let mut state = ExecutionState::default();
        state.set("device_id", "deadbeef");
        let mut step = Step {
            action: "ping".into(),
            params: Default::default(),
        };
        step.params
            .insert("id".into(), serde_json::Value::String("${device_id}".into()));
        step.params
            .insert("count".into(), serde_json::Value::from(3));
        let resolved = interpolate_step(&step, &state);
        assert_eq!(resolved.params["id"], serde_json::Value::String("deadbeef".into()));
        assert_eq!(resolved.params["count"], serde_json::Value::from(3));
    }
}
