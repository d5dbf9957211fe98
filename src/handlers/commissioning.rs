//! Commissioning-state probing and QR-payload parsing (§4.J
//! `verify_commissioning_state`, "QR payload parse").

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use super::{outputs, param_or_state, ActionHandler, HandlerCtx, Outputs};
use crate::commission::pase::mid_pase_disconnect_detected;
use crate::error::MashError;
use crate::model::{ExecutionState, Step};
use crate::transport::Connection;

const PROBE_DEADLINE: Duration = Duration::from_millis(200);

/// `commissioning_state ∈ {IDLE, CONNECTED, ADVERTISING, COMMISSIONED}`
/// (§4.J).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissioningState {
    Idle,
    Connected,
    Advertising,
    Commissioned,
}

impl CommissioningState {
    pub fn as_str(self) -> &'static str {
        match self {
            CommissioningState::Idle => "IDLE",
            CommissioningState::Connected => "CONNECTED",
            CommissioningState::Advertising => "ADVERTISING",
            CommissioningState::Commissioned => "COMMISSIONED",
        }
    }
}

/// Probe a connection's commissioning state (§4.J): before deciding
/// CONNECTED, perform a bounded read to detect EOF/reset from the peer. A
/// timeout means the connection is still alive; any other error or EOF
/// means the peer closed, and `hadConnection=true` with a now-closed
/// connection reports ADVERTISING (the DUT returned to commissioning mode
/// after a mid-PASE disconnect, §4.F).
pub async fn probe_commissioning_state(
    conn: &mut Connection,
    is_commissioned: bool,
) -> CommissioningState {
    if is_commissioned {
        return CommissioningState::Commissioned;
    }
    if mid_pase_disconnect_detected(conn) {
        return CommissioningState::Advertising;
    }
    if !conn.is_connected() {
        return CommissioningState::Idle;
    }
    let Some(framer) = conn.framer_mut() else {
        // A dummy simulation connection (§9): report CONNECTED without
        // touching a socket.
        return CommissioningState::Connected;
    };
    match timeout(PROBE_DEADLINE, framer.read_raw()).await {
        Err(_elapsed) => CommissioningState::Connected,
        Ok(Ok(_bytes)) => CommissioningState::Connected,
        Ok(Err(err)) => {
            debug!(?err, "probe_commissioning_state: peer closed during probe read");
            conn.transition_to_disconnected();
            if conn.had_connection() {
                CommissioningState::Advertising
            } else {
                CommissioningState::Idle
            }
        }
    }
}

pub struct VerifyCommissioningState;

#[async_trait]
impl ActionHandler for VerifyCommissioningState {
    async fn handle(
        &self,
        ctx: &mut HandlerCtx<'_>,
        step: &Step,
        state: &mut ExecutionState,
    ) -> Result<Outputs, MashError> {
        let is_commissioned = state.get_bool("commissioned");
        let (_tier, conn) = ctx.resolve_conn(step);
        let observed = probe_commissioning_state(conn, is_commissioned).await;

        let expected = param_or_state(step, state, "expected_state");
        let state_matches = expected.map(|e| e == observed.as_str()).unwrap_or(false);

        Ok(outputs([
            ("commissioning_state", Value::String(observed.as_str().to_string())),
            ("state_matches", Value::Bool(state_matches)),
        ]))
    }
}

/// `MASH:<ver>:<discriminator>:<setup_code>` (§4.J, §8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrPayload {
    pub version: u8,
    pub discriminator: u16,
    /// Kept as a string so leading zeros survive (§8: `"00000001"` must
    /// parse valid with leading zeros preserved).
    pub setup_code: String,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QrParseError {
    #[error("invalid_prefix")]
    InvalidPrefix,
    #[error("invalid_field_count")]
    InvalidFieldCount,
    #[error("invalid_version")]
    InvalidVersion,
    #[error("discriminator_out_of_range")]
    DiscriminatorOutOfRange,
    #[error("invalid_setup_code")]
    InvalidSetupCode,
}

impl QrParseError {
    pub fn as_str(self) -> &'static str {
        match self {
            QrParseError::InvalidPrefix => "invalid_prefix",
            QrParseError::InvalidFieldCount => "invalid_field_count",
            QrParseError::InvalidVersion => "invalid_version",
            QrParseError::DiscriminatorOutOfRange => "discriminator_out_of_range",
            QrParseError::InvalidSetupCode => "invalid_setup_code",
        }
    }
}

const SUPPORTED_QR_VERSION: u8 = 1;
/// 12-bit discriminator range, the conventional width for this class of
/// commissioning payload.
const DISCRIMINATOR_MAX: u16 = 0x0FFF;

pub fn parse_qr_payload(raw: &str) -> Result<QrPayload, QrParseError> {
    let fields: Vec<&str> = raw.split(':').collect();
    if fields.first() != Some(&"MASH") {
        return Err(QrParseError::InvalidPrefix);
    }
    if fields.len() != 4 {
        return Err(QrParseError::InvalidFieldCount);
    }
    let version: u8 = fields[1].parse().map_err(|_| QrParseError::InvalidVersion)?;
    if version != SUPPORTED_QR_VERSION {
        return Err(QrParseError::InvalidVersion);
    }
    let discriminator: u16 = fields[2]
        .parse()
        .map_err(|_| QrParseError::DiscriminatorOutOfRange)?;
    if discriminator > DISCRIMINATOR_MAX {
        return Err(QrParseError::DiscriminatorOutOfRange);
    }
    let setup_code = fields[3];
    if setup_code.len() != 8 || !setup_code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(QrParseError::InvalidSetupCode);
    }
    Ok(QrPayload {
        version,
        discriminator,
        setup_code: setup_code.to_string(),
    })
}

pub struct ParseQrPayload;

#[async_trait]
impl ActionHandler for ParseQrPayload {
    async fn handle(
        &self,
        _ctx: &mut HandlerCtx<'_>,
        step: &Step,
        state: &mut ExecutionState,
    ) -> Result<Outputs, MashError> {
        let raw = param_or_state(step, state, "payload").unwrap_or_default();
        match parse_qr_payload(raw) {
            Ok(payload) => Ok(outputs([
                ("parsed", Value::Bool(true)),
                ("version", Value::from(payload.version)),
                ("discriminator", Value::from(payload.discriminator)),
                ("setup_code", Value::String(payload.setup_code)),
                ("error", Value::Null),
            ])),
            Err(err) => Ok(outputs([
                ("parsed", Value::Bool(false)),
                ("error", Value::String(err.as_str().to_string())),
            ])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_zeros_in_setup_code_are_preserved() {
        let payload = parse_qr_payload("MASH:1:42:00000001").unwrap();
        assert_eq!(payload.setup_code, "00000001");
    }

    #[test]
    fn discriminator_above_range_is_rejected() {
        let err = parse_qr_payload("MASH:1:99999:12345678").unwrap_err();
        assert_eq!(err, QrParseError::DiscriminatorOutOfRange);
    }

    #[test]
    fn wrong_prefix_is_rejected() {
        assert_eq!(
            parse_qr_payload("WRONG:1:1:12345678").unwrap_err(),
            QrParseError::InvalidPrefix
        );
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert_eq!(
            parse_qr_payload("MASH:1:1").unwrap_err(),
            QrParseError::InvalidFieldCount
        );
    }

    #[test]
    fn unsupported_version_is_rejected() {
        assert_eq!(
            parse_qr_payload("MASH:9:1:12345678").unwrap_err(),
            QrParseError::InvalidVersion
        );
    }

    #[test]
    fn non_numeric_setup_code_is_rejected() {
        assert_eq!(
            parse_qr_payload("MASH:1:1:abcdefgh").unwrap_err(),
            QrParseError::InvalidSetupCode
        );
    }

    #[tokio::test]
    async fn dummy_connection_probe_reports_connected() {
        let mut conn = Connection::dummy_operational();
        let state = probe_commissioning_state(&mut conn, false).await;
        assert_eq!(state, CommissioningState::Connected);
    }

    #[tokio::test]
    async fn disconnected_without_prior_connection_reports_idle() {
        let mut conn = Connection::disconnected();
        let state = probe_commissioning_state(&mut conn, false).await;
        assert_eq!(state, CommissioningState::Idle);
    }

    #[tokio::test]
    async fn mid_pase_disconnect_reports_advertising() {
        let mut conn = Connection::dummy_operational();
        conn.transition_to_disconnected();
        let state = probe_commissioning_state(&mut conn, false).await;
        assert_eq!(state, CommissioningState::Advertising);
    }

    #[tokio::test]
    async fn commissioned_flag_wins_over_connection_state() {
        let mut conn = Connection::disconnected();
        let state = probe_commissioning_state(&mut conn, true).await;
        assert_eq!(state, CommissioningState::Commissioned);
    }
}
