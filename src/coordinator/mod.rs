//! Per-test coordinator: setup, teardown, baseline enforcement, backward
//! transitions (§4.I).
//!
//! The coordinator talks to the rest of the system only through four
//! narrow capability interfaces — state accessor (`ExecutionState` itself),
//! [`Lifecycle`], [`WireOps`], and [`Diagnostics`] — which is what keeps the
//! largest single piece of this crate testable with mocks (§9 "Dependency
//! inversion at the coordinator").

pub mod level;
pub mod setup;
pub mod teardown;

use async_trait::async_trait;

use crate::commission::PaseState;
use crate::diagnostics::DeviceStateSnapshot;
use crate::error::MashError;
use crate::model::{ExecutionState, Precondition, PreconditionLevel, TestCase};
use crate::transport::TestControlCommand;

/// State transitions the coordinator drives but does not itself implement
/// (§4.F, §4.B, §4.G resolution).
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn ensure_connected(&mut self) -> Result<(), MashError>;
    async fn ensure_disconnected(&mut self) -> Result<(), MashError>;
    async fn ensure_commissioned(&mut self) -> Result<(), MashError>;
    async fn reconnect_to_suite_zone(&mut self) -> Result<(), MashError>;
    async fn probe_session_health(&mut self) -> Result<bool, MashError>;
    fn has_suite_zone(&self) -> bool;
    fn close_zones_except_suite(&mut self);
    fn close_all_zones(&mut self);
    fn detach_main(&mut self);
    fn pase_state(&self) -> &PaseState;
    fn pase_state_mut(&mut self) -> &mut PaseState;
    /// `CurrentLevel()` (§4.I): derived from observed PASE + main-connection
    /// state, which only the concrete `Lifecycle` implementation has direct
    /// access to (the pool and suite session live behind it).
    fn current_level(&self) -> PreconditionLevel;
    /// Reset `hadConnection` on the main connection (§4.I TeardownTest step
    /// 5), independent of whether the socket itself is closed.
    fn reset_main_had_connection(&mut self);
}

/// Wire-level privileged operations used by the coordinator directly,
/// distinct from the per-step action-handler registry (§4.J).
#[async_trait]
pub trait WireOps: Send + Sync {
    async fn send_trigger_via_zone(&mut self, command: TestControlCommand) -> Result<(), MashError>;
    async fn remove_zone(&mut self) -> Result<(), MashError>;
    async fn clear_limit(&mut self) -> Result<(), MashError>;
    fn unsubscribe_all_and_clear_notifications(&mut self);
}

/// Device-state snapshot capture (§4.H), used by the coordinator for
/// baseline enforcement around each test.
#[async_trait]
pub trait Diagnostics: Send + Sync {
    async fn request_device_state(&mut self) -> Result<DeviceStateSnapshot, MashError>;
    /// Whether a reset target + enable-key are configured at all; when not,
    /// baseline enforcement is skipped entirely (§4.I steps 3, TeardownTest
    /// step 1).
    fn reset_configured(&self) -> bool;
}

/// The delegated, case-specific precondition handler invoked at step 11 of
/// `SetupPreconditions` (§4.I): install whatever per-test simulation state
/// or dummy connections a precondition implies, beyond what the coordinator
/// itself drives through `Lifecycle`.
#[async_trait]
pub trait PreconditionHandler: Send + Sync {
    async fn handle(
        &self,
        tc: &TestCase,
        preconditions: &[Precondition],
        state: &mut ExecutionState,
    ) -> Result<PreconditionOutcome, MashError>;
}

/// What the delegated precondition handler reports back to the coordinator
/// (§4.I step 11 "capture whether crypto was replaced", step 14).
#[derive(Debug, Clone, Default)]
pub struct PreconditionOutcome {
    pub crypto_replaced: bool,
}

/// Configuration the coordinator needs beyond the four capability
/// interfaces: whether a DUT reset target + enable-key are configured, and
/// the label (Grid/Local/Test) used to store a derived zone-ID (§4.I steps
/// 3, 13, 15).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub reset_target_configured: bool,
    pub enable_key: Option<String>,
    pub zone_label: String,
}

/// The live, socket-backed implementation of the four capability
/// interfaces, wired to the dialer, zone dispatch, and PASE orchestration
/// modules. Test code exercises `setup`/`teardown` against
/// [`test_doubles`] instead; this is what `Coordinator::run` uses against a
/// real DUT.
pub struct LiveSystem {
    pub target: std::net::SocketAddr,
    pub pool: crate::pool::ConnectionPool,
    pub suite: Option<crate::suite::SuiteSession>,
    pub pase: PaseState,
    pub ids: crate::zone::MessageIdGenerator,
    pub setup_code_input: Vec<u8>,
    pub enable_key: String,
    pub invoke_deadline: std::time::Duration,
    pub retry_cfg: crate::error::RetryConfig,
    pub cancel: tokio_util::sync::CancellationToken,
    pub pase_handshake: std::sync::Arc<dyn crate::commission::pase::PaseHandshake>,
    pub cert_issuer: std::sync::Arc<dyn crate::commission::pase::CertIssuer>,
}

#[async_trait]
impl Lifecycle for LiveSystem {
    async fn ensure_connected(&mut self) -> Result<(), MashError> {
        if self.pool.main().is_operational() {
            return Ok(());
        }
        let conn = crate::dial::dial_commissioning(self.target).await?;
        self.pool.set_main(conn);
        self.pool.main_mut().mark_operational();
        Ok(())
    }

    async fn ensure_disconnected(&mut self) -> Result<(), MashError> {
        self.pool.main_mut().transition_to_disconnected();
        self.pool.main_mut().clear_refs();
        Ok(())
    }

    async fn ensure_commissioned(&mut self) -> Result<(), MashError> {
        let outcome = crate::commission::ensure_commissioned(
            self.target,
            &self.setup_code_input,
            false,
            self.pase_handshake.as_ref(),
            self.cert_issuer.as_ref(),
            self.retry_cfg,
            &self.cancel,
        )
        .await?;
        if let crate::commission::CommissionOutcome::Fresh {
            zone_id,
            crypto,
            conn,
        } = outcome
        {
            self.pase.completed = true;
            self.pase.session_key = zone_id.clone();
            self.suite = Some(crate::suite::SuiteSession::new(zone_id, crypto, conn));
        }
        Ok(())
    }

    async fn reconnect_to_suite_zone(&mut self) -> Result<(), MashError> {
        let Some(suite) = self.suite.as_mut() else {
            return Err(MashError::infrastructure("reconnect: no suite zone recorded"));
        };
        let conn = crate::dial::dial_operational(self.target, suite.crypto()).await?;
        suite.set_conn(conn);
        Ok(())
    }

    async fn probe_session_health(&mut self) -> Result<bool, MashError> {
        let Some(suite) = self.suite.as_mut() else {
            return Ok(false);
        };
        let response = crate::zone::invoke(
            suite.conn_mut(),
            &self.ids,
            0,
            crate::transport::TEST_CONTROL_FEATURE_ID,
            ciborium::value::Value::Null,
            self.invoke_deadline,
        )
        .await;
        Ok(response.is_ok())
    }

    fn has_suite_zone(&self) -> bool {
        self.suite.is_some()
    }

    fn close_zones_except_suite(&mut self) {
        let keep = self
            .suite
            .as_ref()
            .map(|s| s.zone_key())
            .unwrap_or_default();
        self.pool.close_zones_except(&keep);
    }

    fn close_all_zones(&mut self) {
        self.pool.close_all_zones();
    }

    fn detach_main(&mut self) {
        self.pool.set_main(crate::transport::Connection::disconnected());
    }

    fn pase_state(&self) -> &PaseState {
        &self.pase
    }

    fn pase_state_mut(&mut self) -> &mut PaseState {
        &mut self.pase
    }

    fn current_level(&self) -> PreconditionLevel {
        level::current_level(&self.pase, &self.pool)
    }

    fn reset_main_had_connection(&mut self) {
        self.pool.main_mut().set_had_connection(false);
    }
}

#[async_trait]
impl WireOps for LiveSystem {
    async fn send_trigger_via_zone(&mut self, command: TestControlCommand) -> Result<(), MashError> {
        let main = self.pool.main_mut();
        let response = crate::zone::trigger_test_event(
            main,
            self.suite.as_mut(),
            &self.ids,
            command,
            &self.enable_key,
            self.invoke_deadline,
        )
        .await?;
        if !response.status.is_success() {
            return Err(MashError::device(format!(
                "trigger {command:?} rejected: status {:?}",
                response.status
            )));
        }
        Ok(())
    }

    async fn remove_zone(&mut self) -> Result<(), MashError> {
        self.send_trigger_via_zone(TestControlCommand::RemoveZone).await
    }

    async fn clear_limit(&mut self) -> Result<(), MashError> {
        let main = self.pool.main_mut();
        crate::zone::invoke(
            main,
            &self.ids,
            0,
            crate::transport::TEST_CONTROL_FEATURE_ID,
            ciborium::value::Value::Text("clear_limit".into()),
            self.invoke_deadline,
        )
        .await?;
        Ok(())
    }

    fn unsubscribe_all_and_clear_notifications(&mut self) {
        self.pool.clear_notifications();
        if let Some(suite) = self.suite.as_mut() {
            suite.conn_mut().clear_notifications();
        }
    }
}

#[async_trait]
impl Diagnostics for LiveSystem {
    async fn request_device_state(&mut self) -> Result<crate::diagnostics::DeviceStateSnapshot, MashError> {
        let main = self.pool.main_mut();
        crate::diagnostics::capture_snapshot(main, &self.ids, self.invoke_deadline).await
    }

    fn reset_configured(&self) -> bool {
        !self.enable_key.is_empty()
    }
}
