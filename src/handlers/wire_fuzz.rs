//! Protocol-fuzzing action handlers (§4.J `send_raw`, `send_tls_alert`).
//!
//! These deliberately bypass the normal envelope builder to exercise the
//! DUT's handling of malformed or out-of-band wire traffic: the framer
//! already exposes raw send/receive primitives for exactly this (§4.C
//! `Framer::send_raw`, `Framer::shutdown`).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::timeout;

use super::{outputs, param_or_state, ActionHandler, HandlerCtx, Outputs};
use crate::error::MashError;
use crate::model::{ExecutionState, Step};
use crate::transport::{FrameError, IncomingFrame};

const RESPONSE_DEADLINE: Duration = Duration::from_millis(500);

/// Build the raw bytes to send for a named malformed-payload scenario
/// (§8 scenario 6 `cbor_map_string_keys`). Unrecognized kinds, or an
/// explicit `raw_hex` parameter, are passed through verbatim so a test
/// author can supply arbitrary bytes.
fn build_payload(kind: Option<&str>, raw_hex: Option<&str>) -> Vec<u8> {
    if let Some(hex_str) = raw_hex {
        if let Ok(bytes) = hex::decode(hex_str) {
            return bytes;
        }
    }
    match kind {
        Some("cbor_map_string_keys") => {
            // The wire envelope's keys are CBOR integers (§6); a map keyed
            // by strings instead is a protocol violation the DUT must
            // reject, not silently accept.
            let mut buf = Vec::new();
            let value = ciborium::value::Value::Map(vec![(
                ciborium::value::Value::Text("message_id".into()),
                ciborium::value::Value::Integer(1.into()),
            )]);
            ciborium::ser::into_writer(&value, &mut buf).ok();
            buf
        }
        Some("truncated") => vec![0xA1],
        Some("empty") => Vec::new(),
        _ => vec![0xFF, 0xFF, 0xFF, 0xFF],
    }
}

pub struct SendRaw;

#[async_trait]
impl ActionHandler for SendRaw {
    async fn handle(
        &self,
        ctx: &mut HandlerCtx<'_>,
        step: &Step,
        state: &mut ExecutionState,
    ) -> Result<Outputs, MashError> {
        let kind = param_or_state(step, state, "payload_kind");
        let raw_hex = param_or_state(step, state, "raw_hex");
        let payload = build_payload(kind, raw_hex);

        let (_tier, conn) = ctx.resolve_conn(step);
        let Some(framer) = conn.framer_mut() else {
            return Ok(outputs([
                ("raw_sent", Value::Bool(false)),
                ("parse_success", Value::Bool(false)),
                ("response_received", Value::Bool(false)),
                ("error_code", Value::String("NO_FRAMER".into())),
            ]));
        };

        framer.send_raw(payload).await?;

        match timeout(RESPONSE_DEADLINE, framer.read_frame()).await {
            Ok(Ok(IncomingFrame::Response(resp))) => Ok(outputs([
                ("raw_sent", Value::Bool(true)),
                ("response_received", Value::Bool(true)),
                ("parse_success", Value::Bool(true)),
                ("status", Value::String(format!("{:?}", resp.status))),
            ])),
            Ok(Ok(IncomingFrame::Notification(_))) => Ok(outputs([
                ("raw_sent", Value::Bool(true)),
                ("response_received", Value::Bool(false)),
                ("parse_success", Value::Bool(false)),
                ("error_code", Value::String("UNEXPECTED_NOTIFICATION".into())),
            ])),
            Ok(Err(FrameError::Closed)) | Err(_) => Ok(outputs([
                ("raw_sent", Value::Bool(true)),
                ("response_received", Value::Bool(false)),
                ("parse_success", Value::Bool(false)),
                ("error_code", Value::String("NO_RESPONSE".into())),
            ])),
            Ok(Err(err)) => Ok(outputs([
                ("raw_sent", Value::Bool(true)),
                ("response_received", Value::Bool(false)),
                ("parse_success", Value::Bool(false)),
                ("error_code", Value::String(err.to_string())),
            ])),
        }
    }
}

pub struct SendTlsAlert;

#[async_trait]
impl ActionHandler for SendTlsAlert {
    async fn handle(
        &self,
        ctx: &mut HandlerCtx<'_>,
        step: &Step,
        _state: &mut ExecutionState,
    ) -> Result<Outputs, MashError> {
        let (_tier, conn) = ctx.resolve_conn(step);
        let Some(framer) = conn.framer_mut() else {
            return Ok(outputs([
                ("alert_sent", Value::Bool(false)),
                ("peer_close_notify", Value::Bool(false)),
                ("connection_closed", Value::Bool(false)),
            ]));
        };

        let alert_sent = framer.shutdown().await.is_ok();

        let peer_close_notify = match timeout(RESPONSE_DEADLINE, framer.read_raw()).await {
            Ok(Err(FrameError::Closed)) => true,
            Ok(Err(_)) => true,
            Ok(Ok(_)) => false,
            Err(_elapsed) => false,
        };

        if alert_sent || peer_close_notify {
            conn.transition_to_disconnected();
        }

        Ok(outputs([
            ("alert_sent", Value::Bool(alert_sent)),
            ("peer_close_notify", Value::Bool(peer_close_notify)),
            ("connection_closed", Value::Bool(!conn.is_connected())),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_payload_uses_raw_hex_when_present() {
        let payload = build_payload(None, Some("deadbeef"));
        assert_eq!(payload, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn build_payload_produces_nonempty_bytes_for_known_kinds() {
        assert!(!build_payload(Some("cbor_map_string_keys"), None).is_empty());
        assert!(build_payload(Some("empty"), None).is_empty());
    }
}
