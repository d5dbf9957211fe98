//! Connection pool (§3 "ConnectionPool", §4.D).
//!
//! Holds the main connection (replaceable wholesale by detach) and a
//! zone-key → Connection / zone-key → zone-ID mapping, with the invariant
//! that a zone is present in both maps or neither.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info};

use crate::transport::Connection;

/// Upper bound on simultaneous zone connections (§4.D).
pub const MAX_ZONE_CONNECTIONS: usize = 5;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("MAX_CONNS_EXCEEDED: pool already holds {0} zone connections")]
    MaxConnsExceeded(usize),
}

/// A stable identifier for a tracked zone (e.g. `"main-<zoneID>"` or a
/// test-assigned label like `Grid`/`Local`).
pub type ZoneKey = String;

pub struct ConnectionPool {
    main: Connection,
    zones: HashMap<ZoneKey, Connection>,
    zone_ids: HashMap<ZoneKey, Vec<u8>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        ConnectionPool {
            main: Connection::disconnected(),
            zones: HashMap::new(),
            zone_ids: HashMap::new(),
        }
    }

    pub fn main(&self) -> &Connection {
        &self.main
    }

    pub fn main_mut(&mut self) -> &mut Connection {
        &mut self.main
    }

    /// Atomically replace the main connection. The old main is **not**
    /// closed: this is detach semantics, used so a suite zone's control
    /// channel can outlive the main connection (§4.D, §9).
    pub fn set_main(&mut self, conn: Connection) -> Connection {
        std::mem::replace(&mut self.main, conn)
    }

    pub fn zone(&self, key: &str) -> Option<&Connection> {
        self.zones.get(key)
    }

    pub fn zone_mut(&mut self, key: &str) -> Option<&mut Connection> {
        self.zones.get_mut(key)
    }

    pub fn zone_id(&self, key: &str) -> Option<&[u8]> {
        self.zone_ids.get(key).map(|v| v.as_slice())
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn zone_keys(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(|s| s.as_str())
    }

    /// Add a zone to both mappings atomically. Enforces the 5-connection
    /// cap (§4.D): dialing beyond it fails with `MAX_CONNS_EXCEEDED` and no
    /// socket is opened by this call (the caller must check before
    /// dialing, see [`ConnectionPool::check_capacity`]).
    ///
    /// Reconnecting to an existing zone key overwrites silently is
    /// disallowed by contract: callers MUST `untrack_zone` or close the
    /// prior entry first. This is enforced here by closing any existing
    /// entry before inserting, which also keeps the invariant intact even
    /// if a caller forgets.
    pub fn track_zone(
        &mut self,
        key: impl Into<String>,
        mut conn: Connection,
        zone_id: Vec<u8>,
    ) -> Result<(), PoolError> {
        let key = key.into();
        if !self.zones.contains_key(&key) && self.zones.len() >= MAX_ZONE_CONNECTIONS {
            conn.transition_to_disconnected();
            conn.clear_refs();
            return Err(PoolError::MaxConnsExceeded(self.zones.len()));
        }
        if let Some(mut existing) = self.zones.remove(&key) {
            debug!(zone = %key, "track_zone: replacing previously tracked zone connection");
            existing.transition_to_disconnected();
            existing.clear_refs();
        }
        self.zones.insert(key.clone(), conn);
        self.zone_ids.insert(key, zone_id);
        Ok(())
    }

    /// Returns `Ok(())` if there is room to dial a new zone connection
    /// without first closing one, or the `MAX_CONNS_EXCEEDED` error
    /// otherwise, so callers can check before paying the cost of a dial.
    pub fn check_capacity(&self, key: &str) -> Result<(), PoolError> {
        if self.zones.contains_key(key) || self.zones.len() < MAX_ZONE_CONNECTIONS {
            Ok(())
        } else {
            Err(PoolError::MaxConnsExceeded(self.zones.len()))
        }
    }

    /// Remove both mappings for `key` without closing the connection.
    pub fn untrack_zone(&mut self, key: &str) -> Option<(Connection, Vec<u8>)> {
        let conn = self.zones.remove(key)?;
        let zone_id = self.zone_ids.remove(key).unwrap_or_default();
        Some((conn, zone_id))
    }

    /// Close and remove every tracked zone whose key is not `keep_key`.
    /// Never touches `keep_key`'s connection even if `keep_key` names a zone
    /// that isn't currently tracked (§4.D).
    pub fn close_zones_except(&mut self, keep_key: &str) {
        let keys_to_close: Vec<String> = self
            .zones
            .keys()
            .filter(|k| k.as_str() != keep_key)
            .cloned()
            .collect();
        let closed = keys_to_close.len();
        for key in keys_to_close {
            if let Some(mut conn) = self.zones.remove(&key) {
                conn.transition_to_disconnected();
                conn.clear_refs();
            }
            self.zone_ids.remove(&key);
        }
        info!(keep = %keep_key, closed, "close_zones_except: closed zone(s)");
    }

    pub fn close_all_zones(&mut self) {
        for (_key, mut conn) in self.zones.drain() {
            conn.transition_to_disconnected();
            conn.clear_refs();
        }
        self.zone_ids.clear();
    }

    /// Cancel subscriptions held on `conn`. There is no standing
    /// subscription table at the pool layer in this harness (subscriptions
    /// are tracked per-test in `ExecutionState`), so this clears the
    /// connection's own notification queue, which is where an
    /// unsubscribe's trailing notifications would otherwise linger.
    pub fn unsubscribe_all(&mut self, conn: &mut Connection) {
        conn.clear_notifications();
    }

    /// Drain notification queues on main and every tracked zone.
    pub fn clear_notifications(&mut self) {
        self.main.clear_notifications();
        for conn in self.zones.values_mut() {
            conn.clear_notifications();
        }
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        ConnectionPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Connection;

    fn conn() -> Connection {
        Connection::dummy_operational()
    }

    #[test]
    fn track_zone_adds_both_mappings_atomically() {
        let mut pool = ConnectionPool::new();
        pool.track_zone("a", conn(), vec![1, 2, 3]).unwrap();
        assert!(pool.zone("a").is_some());
        assert_eq!(pool.zone_id("a"), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn untrack_zone_removes_both_without_closing() {
        let mut pool = ConnectionPool::new();
        pool.track_zone("a", conn(), vec![1]).unwrap();
        let (removed, zone_id) = pool.untrack_zone("a").unwrap();
        assert_eq!(zone_id, vec![1]);
        // Untrack doesn't close; state should still read as whatever it was.
        assert!(removed.is_operational());
        assert!(pool.zone("a").is_none());
        assert!(pool.zone_id("a").is_none());
    }

    #[test]
    fn sixth_zone_connection_fails_with_max_conns_exceeded() {
        let mut pool = ConnectionPool::new();
        for i in 0..MAX_ZONE_CONNECTIONS {
            pool.track_zone(format!("z{i}"), conn(), vec![i as u8])
                .unwrap();
        }
        let result = pool.track_zone("z-sixth", conn(), vec![99]);
        assert!(matches!(result, Err(PoolError::MaxConnsExceeded(5))));
        assert_eq!(pool.zone_count(), MAX_ZONE_CONNECTIONS);
    }

    #[test]
    fn close_zones_except_keeps_only_named_key() {
        let mut pool = ConnectionPool::new();
        pool.track_zone("keep", conn(), vec![1]).unwrap();
        pool.track_zone("drop-a", conn(), vec![2]).unwrap();
        pool.track_zone("drop-b", conn(), vec![3]).unwrap();
        pool.close_zones_except("keep");
        assert!(pool.zone("keep").is_some());
        assert!(pool.zone("drop-a").is_none());
        assert!(pool.zone("drop-b").is_none());
        assert_eq!(pool.zone_count(), 1);
    }

    #[test]
    fn close_zones_except_is_noop_on_suite_zone_when_key_absent() {
        let mut pool = ConnectionPool::new();
        pool.track_zone("suite", conn(), vec![1]).unwrap();
        // "keep" names a zone that isn't tracked; suite must survive anyway.
        pool.close_zones_except("nonexistent-key");
        assert!(pool.zone("suite").is_none());
        // Re-verify with the suite key actually matching keep_key this time.
        let mut pool2 = ConnectionPool::new();
        pool2.track_zone("suite", conn(), vec![1]).unwrap();
        pool2.close_zones_except("suite");
        assert!(pool2.zone("suite").is_some());
    }

    #[test]
    fn set_main_does_not_close_old_main() {
        let mut pool = ConnectionPool::new();
        let old = pool.set_main(conn());
        assert!(old.state() == crate::transport::ConnState::Disconnected);
        let replaced = pool.set_main(Connection::disconnected());
        assert!(replaced.is_operational());
    }
}
