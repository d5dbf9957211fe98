//! Suite-scoped long-lived connection (§3 "SuiteSession", §4.E).
//!
//! One zone, commissioned once at suite start, that serves as the control
//! channel across every test case in the run. Its connection lives outside
//! the per-test [`crate::pool::ConnectionPool`] so a test's
//! `CloseAllZones`/teardown never tears it down by accident.

use crate::dial::OperationalCrypto;
use crate::transport::Connection;

/// The zone key the suite connection is tracked under when a test needs to
/// address it through the pool's 3-tier resolution order (§4.G): always
/// `"main-<zoneID hex>"`.
pub fn suite_zone_key(zone_id: &[u8]) -> String {
    format!("main-{}", hex::encode(zone_id))
}

pub struct SuiteSession {
    zone_id: Vec<u8>,
    crypto: OperationalCrypto,
    conn: Connection,
}

impl SuiteSession {
    /// Build a suite session around an already-commissioned zone. Called
    /// once per suite run, after the one-time PASE/commissioning exchange
    /// completes (§4.F).
    pub fn new(zone_id: Vec<u8>, crypto: OperationalCrypto, conn: Connection) -> Self {
        SuiteSession {
            zone_id,
            crypto,
            conn,
        }
    }

    pub fn zone_id(&self) -> &[u8] {
        &self.zone_id
    }

    pub fn zone_key(&self) -> String {
        suite_zone_key(&self.zone_id)
    }

    pub fn crypto(&self) -> &OperationalCrypto {
        &self.crypto
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Replace the tracked connection, e.g. after a reconnect following an
    /// unexpected close. The caller is responsible for having already
    /// closed the previous connection if that is desired.
    pub fn set_conn(&mut self, conn: Connection) {
        self.conn = conn;
    }

    /// Tear down the suite connection at the very end of a run. Distinct
    /// from per-test teardown (§4.I), which must never reach this
    /// connection.
    pub fn clear(&mut self) {
        self.conn.transition_to_disconnected();
        self.conn.clear_refs();
    }
}
