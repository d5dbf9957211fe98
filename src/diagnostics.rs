//! Device-state snapshots and diffing (§4.H).

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use ciborium::value::Value;
use tracing::warn;

use crate::error::MashError;
use crate::transport::Connection;
use crate::zone::MessageIdGenerator;

/// An opaque key→value map sampled from the DUT via a `getTestState`
/// invoke (§3 DeviceStateSnapshot).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStateSnapshot(pub BTreeMap<String, String>);

impl DeviceStateSnapshot {
    /// Normalize a decoded CBOR payload into a flat string-keyed,
    /// string-valued map suitable for diffing: numeric values are coerced
    /// to a common representation first (Open Question, DESIGN.md) so an
    /// `int` vs `uint` round-trip through the codec never reads as a
    /// spurious divergence.
    pub fn from_payload(payload: &Value) -> Self {
        let mut fields = BTreeMap::new();
        if let Value::Map(entries) = payload {
            for (key, value) in entries {
                let key_str = match key {
                    Value::Text(t) => t.clone(),
                    Value::Integer(i) => i128::from(*i).to_string(),
                    other => format!("{other:?}"),
                };
                fields.insert(key_str, normalize_value(value));
            }
        }
        DeviceStateSnapshot(fields)
    }
}

/// Coerce a CBOR value into a comparable string, normalizing integer
/// representations to `i128` first so signed/unsigned round-tripping
/// through the wire codec never causes a false divergence.
fn normalize_value(value: &Value) -> String {
    match value {
        Value::Integer(i) => i128::from(*i).to_string(),
        Value::Float(f) => format!("{f}"),
        Value::Text(t) => t.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Bytes(b) => hex::encode(b),
        other => format!("{other:?}"),
    }
}

/// `diffSnapshots(before, after)`: the set of field-keys whose values
/// differ. A key missing on one side counts as a diff against `nil`.
/// `diffSnapshots(s, s) = ∅` (§8).
pub fn diff_snapshots(
    before: &DeviceStateSnapshot,
    after: &DeviceStateSnapshot,
) -> BTreeSet<String> {
    let mut diverged = BTreeSet::new();
    let keys: BTreeSet<&String> = before.0.keys().chain(after.0.keys()).collect();
    for key in keys {
        let left = before.0.get(key);
        let right = after.0.get(key);
        if left != right {
            diverged.insert(key.clone());
        }
    }
    diverged
}

const GET_TEST_STATE_ENDPOINT_ID: u8 = 0x00;

/// Issue a `getTestState` invoke and return the decoded snapshot (§4.H).
pub async fn capture_snapshot(
    conn: &mut Connection,
    ids: &MessageIdGenerator,
    deadline: Duration,
) -> Result<DeviceStateSnapshot, MashError> {
    let response = crate::zone::invoke(
        conn,
        ids,
        GET_TEST_STATE_ENDPOINT_ID,
        crate::transport::TEST_CONTROL_FEATURE_ID,
        Value::Integer((crate::transport::TestControlCommand::GetTestState as i64).into()),
        deadline,
    )
    .await?;
    Ok(DeviceStateSnapshot::from_payload(&response.payload))
}

/// Whether a divergence warrants logging "still diverged" noise: a
/// re-sample that matches `before` must not re-warn (§8 scenario 4).
pub fn log_if_still_diverged(before: &DeviceStateSnapshot, resampled: &DeviceStateSnapshot) {
    let diff = diff_snapshots(before, resampled);
    if !diff.is_empty() {
        warn!(fields = ?diff, "device state still diverged from baseline after reset+resample");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_of_identical_snapshots_is_empty() {
        let mut fields = BTreeMap::new();
        fields.insert("zoneCount".to_string(), "1".to_string());
        let snap = DeviceStateSnapshot(fields);
        assert!(diff_snapshots(&snap, &snap).is_empty());
    }

    #[test]
    fn diff_detects_changed_and_missing_fields() {
        let mut before = BTreeMap::new();
        before.insert("zoneCount".to_string(), "0".to_string());
        before.insert("onlyBefore".to_string(), "x".to_string());
        let mut after = BTreeMap::new();
        after.insert("zoneCount".to_string(), "1".to_string());
        after.insert("onlyAfter".to_string(), "y".to_string());

        let diff = diff_snapshots(&DeviceStateSnapshot(before), &DeviceStateSnapshot(after));
        assert!(diff.contains("zoneCount"));
        assert!(diff.contains("onlyBefore"));
        assert!(diff.contains("onlyAfter"));
        assert_eq!(diff.len(), 3);
    }

    #[test]
    fn normalize_value_treats_int_and_uint_alike() {
        let signed = Value::Integer((-5i64).into());
        let unsigned = Value::Integer(18_446_744_073_709_551_611u64.into());
        // Different magnitudes so this just checks normalization produces
        // *some* stable string, not that they're equal to each other.
        assert_eq!(normalize_value(&signed), "-5");
        assert!(!normalize_value(&unsigned).is_empty());
    }

    #[test]
    fn from_payload_builds_string_keyed_map() {
        let payload = Value::Map(vec![
            (Value::Text("zoneCount".into()), Value::Integer(2.into())),
            (Value::Integer(7.into()), Value::Bool(true)),
        ]);
        let snap = DeviceStateSnapshot::from_payload(&payload);
        assert_eq!(snap.0.get("zoneCount"), Some(&"2".to_string()));
        assert_eq!(snap.0.get("7"), Some(&"true".to_string()));
    }
}
