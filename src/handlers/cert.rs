//! Certificate inspection action handlers (§4.J `verify_certificate`,
//! `verify_cert_subject`, `extract_cert_device_id`).
//!
//! Certificate *generation* is out of scope (§1); these handlers only
//! parse and validate certs the suite already holds — the suite zone's CA
//! pool (§3 SuiteSession) and a cert blob named by the step's parameters,
//! typically one captured earlier in the test (a CSR-exchange response, a
//! peer cert handed back by `extract_cert_device_id`).

use async_trait::async_trait;
use rustls::pki_types::CertificateDer;
use serde_json::Value;
use x509_parser::prelude::*;

use super::{outputs, param_bytes_hex, param_or_state, ActionHandler, HandlerCtx, Outputs};
use crate::dial;
use crate::error::MashError;
use crate::model::{ExecutionState, Step};

/// Extract the subject Common Name from a DER-encoded certificate.
fn common_name(der: &[u8]) -> Result<Option<String>, MashError> {
    let (_, cert) = parse_x509_certificate(der)
        .map_err(|e| MashError::protocol(format!("certificate parse error: {e}")))?;
    Ok(cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|s| s.to_string()))
}

fn is_currently_valid(der: &[u8]) -> Result<bool, MashError> {
    let (_, cert) = parse_x509_certificate(der)
        .map_err(|e| MashError::protocol(format!("certificate parse error: {e}")))?;
    Ok(cert.validity().is_valid())
}

/// `extract_cert_device_id`'s rule (§4.J): if the CN contains `-`, take the
/// segment after the last `-`; otherwise the CN itself.
pub fn device_id_from_cn(cn: &str) -> &str {
    match cn.rfind('-') {
        Some(idx) => &cn[idx + 1..],
        None => cn,
    }
}

/// The CN should be pure lowercase hex of even length (16 hex chars = 8
/// bytes is the normal case). Validity is always reported as a boolean,
/// never a failure (§4.J).
pub fn is_valid_device_id_hex(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate.len() % 2 == 0
        && candidate
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

fn cert_der_param(step: &Step, state: &ExecutionState) -> Option<Vec<u8>> {
    param_bytes_hex(step, state, "cert_der").or_else(|| param_bytes_hex(step, state, "cert_hex"))
}

pub struct VerifyCertificate;

#[async_trait]
impl ActionHandler for VerifyCertificate {
    async fn handle(
        &self,
        ctx: &mut HandlerCtx<'_>,
        step: &Step,
        state: &mut ExecutionState,
    ) -> Result<Outputs, MashError> {
        let der = cert_der_param(step, state);
        let has_certs = der.is_some();

        let (cert_valid, not_expired) = match &der {
            Some(bytes) => (
                parse_x509_certificate(bytes).is_ok(),
                is_currently_valid(bytes).unwrap_or(false),
            ),
            None => (false, false),
        };

        let chain_valid = match (&der, ctx.suite.as_deref()) {
            (Some(bytes), Some(suite)) => match &suite.crypto().zone_ca_pool {
                Some(roots) => {
                    let end_entity = CertificateDer::from(bytes.clone());
                    dial::chain_is_valid(roots, &end_entity, &[])
                }
                None => false,
            },
            _ => false,
        };

        Ok(outputs([
            ("cert_valid", Value::Bool(cert_valid)),
            ("chain_valid", Value::Bool(chain_valid)),
            ("not_expired", Value::Bool(not_expired)),
            ("has_certs", Value::Bool(has_certs)),
        ]))
    }
}

pub struct VerifyCertSubject;

#[async_trait]
impl ActionHandler for VerifyCertSubject {
    async fn handle(
        &self,
        _ctx: &mut HandlerCtx<'_>,
        step: &Step,
        state: &mut ExecutionState,
    ) -> Result<Outputs, MashError> {
        let der = cert_der_param(step, state);
        let expected_cn = param_or_state(step, state, "expected_common_name").map(str::to_string);

        let cn = match &der {
            Some(bytes) => common_name(bytes)?,
            None => None,
        };

        let device_id = cn.as_deref().map(device_id_from_cn).unwrap_or_default();
        let device_id_hex_valid = is_valid_device_id_hex(device_id);
        let subject_matches = match (&cn, &expected_cn) {
            (Some(cn), Some(expected)) => cn == expected,
            _ => false,
        };

        Ok(outputs([
            ("subject_matches", Value::Bool(subject_matches)),
            (
                "common_name",
                cn.clone().map(Value::String).unwrap_or(Value::Null),
            ),
            (
                "common_name_is_device_id",
                // True when the CN has no `-` prefix segment to strip, i.e.
                // the whole CN already is the device-ID (§4.J device-ID
                // extraction rule: "if CN contains `-` ... otherwise the CN
                // itself").
                Value::Bool(cn.as_deref().map(|c| !c.contains('-')).unwrap_or(false)),
            ),
            ("device_id_hex_valid", Value::Bool(device_id_hex_valid)),
        ]))
    }
}

pub struct ExtractCertDeviceId;

#[async_trait]
impl ActionHandler for ExtractCertDeviceId {
    async fn handle(
        &self,
        _ctx: &mut HandlerCtx<'_>,
        step: &Step,
        state: &mut ExecutionState,
    ) -> Result<Outputs, MashError> {
        let der = cert_der_param(step, state);
        let cn = match &der {
            Some(bytes) => common_name(bytes)?,
            None => None,
        };
        let device_id = cn.as_deref().map(device_id_from_cn).map(str::to_string);
        let extracted = device_id.is_some();

        if let Some(id) = &device_id {
            state.set("last_extracted_device_id", id.clone());
        }

        Ok(outputs([
            (
                "device_id",
                device_id.map(Value::String).unwrap_or(Value::Null),
            ),
            ("extracted", Value::Bool(extracted)),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_takes_segment_after_last_dash() {
        assert_eq!(device_id_from_cn("mash-dev-1a2b3c4d5e6f7788"), "1a2b3c4d5e6f7788");
        assert_eq!(device_id_from_cn("1a2b3c4d5e6f7788"), "1a2b3c4d5e6f7788");
    }

    #[test]
    fn hex_validity_requires_even_length_lowercase_hex() {
        assert!(is_valid_device_id_hex("1a2b3c4d5e6f7788"));
        assert!(!is_valid_device_id_hex("1A2B3C4D"));
        assert!(!is_valid_device_id_hex("abc"));
        assert!(!is_valid_device_id_hex(""));
        assert!(!is_valid_device_id_hex("zzzzzzzz"));
    }
}
