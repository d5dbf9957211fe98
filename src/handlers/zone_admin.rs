//! Zone-administration action handlers (§4.J `create_zone`).

use async_trait::async_trait;
use ciborium::value::Value as Cbor;
use serde_json::Value;

use super::{outputs, ActionHandler, HandlerCtx, Outputs};
use crate::commission::setup_code::fnv1a;
use crate::error::MashError;
use crate::model::{ExecutionState, Step};
use crate::transport::{ZoneAdminCommand, ZONE_ADMIN_FEATURE_ID};
use crate::zone;

const ZONE_ADMIN_ENDPOINT_ID: u8 = 0x00;

/// A short, non-cryptographic fingerprint over a zone-ID, grounded in the
/// same FNV-1a fold `commission::setup_code`/`derive_zone_id` already use
/// for non-secret derived identifiers (DESIGN.md Open Question log):
/// hashing crates are out of scope (§1) and this value is never used for
/// anything security-sensitive, only test-assertion readability.
pub fn fingerprint(zone_id: &[u8]) -> String {
    format!("{:016x}", fnv1a(zone_id))
}

pub struct CreateZone;

#[async_trait]
impl ActionHandler for CreateZone {
    async fn handle(
        &self,
        ctx: &mut HandlerCtx<'_>,
        step: &Step,
        state: &mut ExecutionState,
    ) -> Result<Outputs, MashError> {
        let zone_label = step
            .params
            .get("zone")
            .and_then(|v| v.as_str())
            .unwrap_or("zone")
            .to_string();
        let save_zone_id = step
            .params
            .get("save_zone_id")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let (_tier, conn) = ctx.resolve_conn(step);
        let request = Cbor::Map(vec![(
            Cbor::Text("command".into()),
            Cbor::Integer((ZoneAdminCommand::Create as i64).into()),
        )]);

        let response = zone::invoke(
            conn,
            ctx.ids,
            ZONE_ADMIN_ENDPOINT_ID,
            ZONE_ADMIN_FEATURE_ID,
            request,
            ctx.deadline,
        )
        .await?;

        let zone_id = extract_zone_id(&response.payload)
            .unwrap_or_else(|| crate::commission::pase::derive_zone_id(zone_label.as_bytes()));
        let zone_created = response.status.is_success();
        let print = fingerprint(&zone_id);

        if save_zone_id {
            state.set(format!("{zone_label}_zone_id"), hex::encode(&zone_id));
            state.custom.zone.insert(
                zone_label.clone(),
                Value::String(hex::encode(&zone_id)),
            );
        }

        Ok(outputs([
            ("zone_id", Value::String(hex::encode(&zone_id))),
            ("zone_created", Value::Bool(zone_created)),
            ("fingerprint", Value::String(print)),
            ("save_zone_id", Value::Bool(save_zone_id)),
        ]))
    }
}

fn extract_zone_id(payload: &Cbor) -> Option<Vec<u8>> {
    let Cbor::Map(entries) = payload else {
        return None;
    };
    for (key, value) in entries {
        let is_zone_id_key = matches!(key, Cbor::Text(t) if t == "zone_id");
        if is_zone_id_key {
            if let Cbor::Bytes(bytes) = value {
                return Some(bytes.clone());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint(&[1, 2, 3]);
        let b = fingerprint(&[1, 2, 3]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn extract_zone_id_reads_bytes_value() {
        let payload = Cbor::Map(vec![(
            Cbor::Text("zone_id".into()),
            Cbor::Bytes(vec![0xAB, 0xCD]),
        )]);
        assert_eq!(extract_zone_id(&payload), Some(vec![0xAB, 0xCD]));
    }

    #[test]
    fn extract_zone_id_none_when_absent() {
        assert_eq!(extract_zone_id(&Cbor::Map(vec![])), None);
    }
}
