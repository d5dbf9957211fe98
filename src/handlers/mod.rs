//! The action-handler registry (§4.J): a name → handler table. Each
//! handler interprets one declarative test-case step, talks to a single
//! connection resolved through the same zone-scoped dispatch the
//! coordinator uses, and returns an outputs map. Handlers are pure glue —
//! they do not manage connection lifecycle (that's the coordinator's job,
//! §4.I) — which is why the registry can be built once per suite run and
//! shared across every test case.

pub mod cert;
pub mod commissioning;
pub mod ping;
pub mod trigger;
pub mod wire_fuzz;
pub mod zone_admin;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::MashError;
use crate::model::{ExecutionState, Step};
use crate::pool::ConnectionPool;
use crate::suite::SuiteSession;
use crate::transport::Connection;
use crate::zone::{self, MessageIdGenerator, ResolvedTier, ZoneSelector};

/// A step's outputs, the shape §4.J's handler families all return:
/// flat key → value, the same `serde_json::Value` currency `ExecutionState`
/// and `Expectation` use so results can be compared against
/// `${var}`-interpolated expectations without a second conversion layer.
pub type Outputs = HashMap<String, serde_json::Value>;

pub fn outputs(pairs: impl IntoIterator<Item = (&'static str, serde_json::Value)>) -> Outputs {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Everything a handler needs to resolve and talk to a connection, without
/// taking on any lifecycle responsibility itself (§9 "dependency inversion
/// at the coordinator" applies one layer down here too: handlers see only
/// the pool/suite/ids/config they need to dispatch one step).
pub struct HandlerCtx<'a> {
    pub pool: &'a mut ConnectionPool,
    pub suite: Option<&'a mut SuiteSession>,
    pub ids: &'a MessageIdGenerator,
    pub enable_key: &'a str,
    pub deadline: Duration,
}

impl<'a> HandlerCtx<'a> {
    /// Resolve the step's `zone`/`zone_id` selector through the standard
    /// 3-tier order (§4.G) and hand back the connection plus which tier it
    /// came from, so handlers that care (e.g. diagnostics) can report it.
    pub fn resolve_conn(&mut self, step: &Step) -> (ResolvedTier, &mut Connection) {
        let owned = selector_from_step(step);
        let selector = owned.as_ref().map(ZoneSelectorOwned::as_selector);
        zone::resolve(selector, self.pool, self.suite.as_deref_mut())
    }

    pub fn main_mut(&mut self) -> &mut Connection {
        self.pool.main_mut()
    }
}

/// An owned form of [`zone::ZoneSelector`] so it can be built from a
/// step's owned `params` map and still borrow back out for `zone::resolve`.
enum ZoneSelectorOwned {
    Key(String),
    Id(Vec<u8>),
}

impl ZoneSelectorOwned {
    fn as_selector(&self) -> ZoneSelector<'_> {
        match self {
            ZoneSelectorOwned::Key(k) => ZoneSelector::Key(k),
            ZoneSelectorOwned::Id(id) => ZoneSelector::Id(id),
        }
    }
}

fn selector_from_step(step: &Step) -> Option<ZoneSelectorOwned> {
    if let Some(key) = step.params.get("zone").and_then(|v| v.as_str()) {
        return Some(ZoneSelectorOwned::Key(key.to_string()));
    }
    if let Some(id_hex) = step.params.get("zone_id").and_then(|v| v.as_str()) {
        if let Ok(bytes) = hex::decode(id_hex) {
            return Some(ZoneSelectorOwned::Id(bytes));
        }
    }
    None
}

/// Read a string parameter out of a step, or fall back to a value already
/// recorded in `state` under the same key (the `${var}` interpolation the
/// out-of-scope loader performs still leaves plain literals for handlers
/// that want to read straight from accumulated state, e.g. a cert captured
/// by an earlier step).
pub fn param_or_state<'a>(step: &'a Step, state: &'a ExecutionState, key: &str) -> Option<&'a str> {
    step.params
        .get(key)
        .and_then(|v| v.as_str())
        .or_else(|| state.get_str(key))
}

pub fn param_bytes_hex(step: &Step, state: &ExecutionState, key: &str) -> Option<Vec<u8>> {
    param_or_state(step, state, key).and_then(|s| hex::decode(s).ok())
}

/// `(ctx, step, state) → (outputs, error)` (§4.J).
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &mut HandlerCtx<'_>,
        step: &Step,
        state: &mut ExecutionState,
    ) -> Result<Outputs, MashError>;
}

/// Build the name → handler table. Generalizes the command-dispatch-by-enum
/// idiom zeekoe's own CLI uses for its `Customer`/`Merchant` subcommands
/// (`src/cli.rs`) into a runtime-extensible registry, since MASH's actions
/// are named in YAML rather than fixed at compile time.
pub fn build_registry() -> HashMap<&'static str, Box<dyn ActionHandler>> {
    let mut registry: HashMap<&'static str, Box<dyn ActionHandler>> = HashMap::new();
    registry.insert("verify_certificate", Box::new(cert::VerifyCertificate));
    registry.insert("verify_cert_subject", Box::new(cert::VerifyCertSubject));
    registry.insert("extract_cert_device_id", Box::new(cert::ExtractCertDeviceId));
    registry.insert(
        "verify_commissioning_state",
        Box::new(commissioning::VerifyCommissioningState),
    );
    registry.insert("parse_qr_payload", Box::new(commissioning::ParseQrPayload));
    registry.insert("create_zone", Box::new(zone_admin::CreateZone));
    registry.insert("send_raw", Box::new(wire_fuzz::SendRaw));
    registry.insert("send_tls_alert", Box::new(wire_fuzz::SendTlsAlert));
    registry.insert("ping", Box::new(ping::Ping));
    registry.insert("trigger_test_event", Box::new(trigger::TriggerTestEvent));
    registry
}
