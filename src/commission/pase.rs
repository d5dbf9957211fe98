//! PASE handshake + CSR/cert exchange orchestration (§4.F).
//!
//! PASE itself (SPAKE2+) is out of scope (§1, GLOSSARY "PASE") and is
//! injected as an opaque [`PaseHandshake`] collaborator, the same way
//! certificate issuance is injected as a [`CertIssuer`] collaborator. This
//! module owns only the orchestration: dial, run the handshake with retry,
//! exchange credentials, derive the zone-ID, and flip the connection to
//! Operational.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::setup_code::{derive_setup_code, fnv1a};
use crate::dial::{self, OperationalCrypto};
use crate::error::{retry_with_backoff, MashError, RetryConfig, RetryOutcome};
use crate::transport::Connection;

/// `Completed && !session_key.is_empty()` is the only commissioned state
/// (§3 PASEState).
#[derive(Debug, Default, Clone)]
pub struct PaseState {
    pub completed: bool,
    pub session_key: Vec<u8>,
}

impl PaseState {
    pub fn is_commissioned(&self) -> bool {
        self.completed && !self.session_key.is_empty()
    }

    /// An incomplete PASE after test teardown MUST be cleared (§3, §4.I
    /// TeardownTest step 4).
    pub fn clear(&mut self) {
        self.completed = false;
        self.session_key.clear();
    }
}

/// Credentials produced by the CSR/cert exchange that follows a completed
/// PASE handshake.
pub struct IssuedCredentials {
    pub controller_cert_chain: Vec<CertificateDer<'static>>,
    pub controller_private_key: Arc<PrivateKeyDer<'static>>,
    pub ca_pool: RootCertStore,
}

/// The opaque PASE handshake collaborator (GLOSSARY "PASE"): runs to
/// completion over `conn` and yields the derived session key, or a
/// classified [`MashError`] (timeouts classify as Infrastructure per
/// §4.F).
#[async_trait]
pub trait PaseHandshake: Send + Sync {
    async fn run(&self, conn: &mut Connection, setup_code: u32) -> Result<Vec<u8>, MashError>;
}

/// The opaque CSR/cert exchange collaborator that follows a completed PASE.
#[async_trait]
pub trait CertIssuer: Send + Sync {
    async fn issue(&self, session_key: &[u8]) -> Result<IssuedCredentials, MashError>;
}

/// A freshly (or previously) commissioned zone, as handed back to the
/// coordinator for recording into the [`crate::suite::SuiteSession`].
pub enum CommissionOutcome {
    /// The existing session was already commissioned and reusable; no dial,
    /// no PASE, no cert exchange took place.
    Reused,
    Fresh {
        zone_id: Vec<u8>,
        crypto: OperationalCrypto,
        conn: Connection,
    },
}

/// Derive a zone-ID from the PASE session key (§4.F, §4.G, Open Question in
/// DESIGN.md: a non-cryptographic but deterministic fold, since hashing
/// crates are out of scope per §1 and not otherwise needed in this crate).
pub fn derive_zone_id(session_key: &[u8]) -> Vec<u8> {
    let low = fnv1a(session_key);
    let high = fnv1a(&[session_key, b"\x01"].concat());
    let mut id = Vec::with_capacity(16);
    id.extend_from_slice(&low.to_be_bytes());
    id.extend_from_slice(&high.to_be_bytes());
    id
}

/// `EnsureCommissioned` (§4.F). `already_reusable` carries the coordinator's
/// own session-reuse decision (§4.I step 6); this function's only job once
/// that decision is `false` is to perform a fresh commission with retry on
/// Infrastructure classified errors.
pub async fn ensure_commissioned(
    target: SocketAddr,
    setup_code_input: &[u8],
    already_reusable: bool,
    pase: &dyn PaseHandshake,
    cert_issuer: &dyn CertIssuer,
    retry_cfg: RetryConfig,
    cancel: &CancellationToken,
) -> Result<CommissionOutcome, MashError> {
    if already_reusable {
        return Ok(CommissionOutcome::Reused);
    }

    let setup_code = derive_setup_code(setup_code_input);

    let outcome = retry_with_backoff(retry_cfg, cancel, || {
        commission_once(target, setup_code, pase, cert_issuer)
    })
    .await;

    match outcome {
        Ok(fresh) => Ok(fresh),
        Err(RetryOutcome::Permanent(e)) | Err(RetryOutcome::Exhausted(e)) => Err(e),
        Err(RetryOutcome::Cancelled) => Err(MashError::infrastructure("commissioning cancelled")),
        Err(RetryOutcome::InvalidConfig) => {
            Err(MashError::infrastructure("invalid retry configuration"))
        }
    }
}

async fn commission_once(
    target: SocketAddr,
    setup_code: u32,
    pase: &dyn PaseHandshake,
    cert_issuer: &dyn CertIssuer,
) -> Result<CommissionOutcome, MashError> {
    let mut conn = dial::dial_commissioning(target).await?;

    let session_key = match pase.run(&mut conn, setup_code).await {
        Ok(key) => key,
        Err(err) => {
            if mid_pase_disconnect_detected(&conn) {
                info!(?target, "commission_once: DUT closed connection mid-PASE");
            }
            return Err(err);
        }
    };

    let issued = cert_issuer.issue(&session_key).await?;
    let zone_id = derive_zone_id(&session_key);
    conn.mark_operational();

    let crypto = OperationalCrypto {
        controller_cert_chain: issued.controller_cert_chain,
        controller_private_key: issued.controller_private_key,
        zone_ca_pool: Some(issued.ca_pool),
        insecure_fallback: false,
    };

    info!(?target, zone_id = %hex::encode(&zone_id), "commission_once: commissioned");
    Ok(CommissionOutcome::Fresh {
        zone_id,
        crypto,
        conn,
    })
}

/// Detects the "DUT closed mid-PASE" condition from §4.F: `hadConnection`
/// stays true even though the connection is no longer connected. Shared
/// with `handlers::commissioning`'s `verify_commissioning_state`, which
/// reports `ADVERTISING` in this case.
pub fn mid_pase_disconnect_detected(conn: &Connection) -> bool {
    conn.had_connection() && !conn.is_connected()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pase_state_requires_both_completed_and_nonempty_key() {
        let mut state = PaseState::default();
        assert!(!state.is_commissioned());
        state.completed = true;
        assert!(!state.is_commissioned());
        state.session_key = vec![1, 2, 3];
        assert!(state.is_commissioned());
        state.clear();
        assert!(!state.is_commissioned());
        assert!(state.session_key.is_empty());
    }

    #[test]
    fn zone_id_derivation_is_deterministic_and_sixteen_bytes() {
        let a = derive_zone_id(b"some-session-key");
        let b = derive_zone_id(b"some-session-key");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn zone_id_derivation_differs_across_keys() {
        let a = derive_zone_id(b"session-key-one");
        let b = derive_zone_id(b"session-key-two");
        assert_ne!(a, b);
    }

    #[test]
    fn mid_pase_disconnect_detected_requires_had_connection_and_not_connected() {
        let mut conn = Connection::dummy_operational();
        assert!(!mid_pase_disconnect_detected(&conn));
        conn.transition_to_disconnected();
        assert!(mid_pase_disconnect_detected(&conn));

        let fresh = Connection::disconnected();
        assert!(!mid_pase_disconnect_detected(&fresh));
    }
}
