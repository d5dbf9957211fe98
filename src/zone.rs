//! Zone-scoped dispatch: routing I/O actions to the correct connection
//! (§4.G).

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use ciborium::value::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::MashError;
use crate::pool::ConnectionPool;
use crate::suite::SuiteSession;
use crate::transport::{IncomingFrame, Operation, RequestEnvelope, ResponseEnvelope};

/// Monotonic per-runner message-ID generator (§4.G "monotonic message-ID
/// (per-runner)").
#[derive(Debug, Default)]
pub struct MessageIdGenerator(AtomicU32);

impl MessageIdGenerator {
    pub fn new() -> Self {
        MessageIdGenerator(AtomicU32::new(1))
    }

    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// A zone selector: either the symbolic zone key (`zone` in the test-case
/// schema) or the raw zone-ID bytes (`zone_id`).
#[derive(Debug, Clone, Copy)]
pub enum ZoneSelector<'a> {
    Key(&'a str),
    Id(&'a [u8]),
}

/// Resolve a zone selector to the zone-key tracked in the pool, if any.
fn resolve_tracked_key(selector: Option<ZoneSelector<'_>>, pool: &ConnectionPool) -> Option<String> {
    match selector? {
        ZoneSelector::Key(key) => pool.zone(key).map(|_| key.to_string()),
        ZoneSelector::Id(id) => pool
            .zone_keys()
            .find(|key| pool.zone_id(key) == Some(id))
            .map(|key| key.to_string()),
    }
}

/// Which connection a dispatch resolved to, so callers (and tests) can
/// assert on the resolution tier actually used (§4.G resolution order:
/// tracked zone map, then suite-session connection, then main connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedTier {
    TrackedZone,
    SuiteSession,
    Main,
}

/// Resolve the connection a zone-scoped action should use, per the 3-tier
/// order in §4.G, returning which tier was used alongside a mutable handle.
pub fn resolve<'a>(
    selector: Option<ZoneSelector<'_>>,
    pool: &'a mut ConnectionPool,
    suite: Option<&'a mut SuiteSession>,
) -> (ResolvedTier, &'a mut crate::transport::Connection) {
    if let Some(key) = resolve_tracked_key(selector, pool) {
        return (ResolvedTier::TrackedZone, pool.zone_mut(&key).expect("key resolved above"));
    }
    if let Some(suite) = suite {
        return (ResolvedTier::SuiteSession, suite.conn_mut());
    }
    (ResolvedTier::Main, pool.main_mut())
}

/// Build and send an invoke request, correlating the response by
/// message-ID. Mismatches are recorded via a warning but never halt the
/// action (§4.G: notification reordering is expected).
pub async fn invoke(
    conn: &mut crate::transport::Connection,
    ids: &MessageIdGenerator,
    endpoint_id: u8,
    feature_id: u8,
    command: Value,
    deadline: Duration,
) -> Result<ResponseEnvelope, MashError> {
    if conn.is_dummy() {
        return Ok(ResponseEnvelope {
            message_id: ids.next(),
            status: crate::transport::Status::Success,
            payload: Value::Null,
        });
    }

    let message_id = ids.next();
    let request = RequestEnvelope {
        message_id,
        operation: Operation::Invoke,
        endpoint_id,
        feature_id,
        payload: command,
    };

    let framer = conn
        .framer_mut()
        .ok_or_else(|| MashError::infrastructure("invoke: connection has no framer"))?;
    framer.send_request(&request).await?;

    loop {
        let frame = timeout(deadline, framer.read_frame())
            .await
            .map_err(|_| MashError::infrastructure("invoke: timed out awaiting response"))??;
        match frame {
            IncomingFrame::Response(resp) => {
                if resp.message_id != message_id {
                    warn!(
                        expected = message_id,
                        got = resp.message_id,
                        "invoke: response message-ID mismatch, accepting anyway"
                    );
                }
                return Ok(resp);
            }
            IncomingFrame::Notification(note) => {
                debug!("invoke: buffering interleaved notification");
                conn.push_notification(note);
            }
        }
    }
}

/// `subscribe` returns the subscription-ID extracted from the response
/// payload's `"subscription_id"` field (§4.G).
pub async fn subscribe(
    conn: &mut crate::transport::Connection,
    ids: &MessageIdGenerator,
    endpoint_id: u8,
    feature_id: u8,
    deadline: Duration,
) -> Result<Option<u32>, MashError> {
    let response = invoke(
        conn,
        ids,
        endpoint_id,
        feature_id,
        Value::Map(vec![]),
        deadline,
    )
    .await?;
    Ok(extract_subscription_id(&response.payload))
}

fn extract_subscription_id(payload: &Value) -> Option<u32> {
    let Value::Map(entries) = payload else {
        return None;
    };
    for (key, value) in entries {
        let matches_key = matches!(key, Value::Text(t) if t == "subscription_id")
            || matches!(key, Value::Integer(_));
        if matches_key {
            if let Value::Integer(i) = value {
                return u32::try_from(i128::from(*i)).ok();
            }
        }
    }
    None
}

/// Drain the per-connection pending queue first, then do a framed read with
/// a bounded deadline (§4.G).
pub async fn wait_for_notification(
    conn: &mut crate::transport::Connection,
    deadline: Duration,
) -> Result<Option<RequestEnvelope>, MashError> {
    if let Some(pending) = conn.pop_notification() {
        return Ok(Some(pending));
    }
    if conn.is_dummy() {
        return Ok(None);
    }
    let framer = conn
        .framer_mut()
        .ok_or_else(|| MashError::infrastructure("wait_for_notification: no framer"))?;
    match timeout(deadline, framer.read_frame()).await {
        Ok(Ok(IncomingFrame::Notification(note))) => Ok(Some(note)),
        Ok(Ok(IncomingFrame::Response(_))) => {
            warn!("wait_for_notification: received a response frame, discarding");
            Ok(None)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_elapsed) => Ok(None),
    }
}

const TEST_CONTROL_ENDPOINT_ID: u8 = 0x00;

/// A privileged invoke targeting the well-known TestControl feature (§4.G,
/// §6). When `main` is detached (no socket) but a suite connection exists,
/// this is the one read/write path that implicitly reroutes to it — used
/// during teardown/reset when per-test zone tracking may already be gone.
pub async fn trigger_test_event(
    main: &mut crate::transport::Connection,
    suite: Option<&mut SuiteSession>,
    ids: &MessageIdGenerator,
    command: crate::transport::TestControlCommand,
    enable_key: &str,
    deadline: Duration,
) -> Result<ResponseEnvelope, MashError> {
    let params = Value::Map(vec![
        (
            Value::Text("command".into()),
            Value::Integer((command as i64).into()),
        ),
        (Value::Text("enable_key".into()), Value::Text(enable_key.into())),
    ]);

    let target: &mut crate::transport::Connection = if !main.is_connected() {
        match suite {
            Some(suite) => {
                debug!("trigger_test_event: main detached, rerouting to suite connection");
                suite.conn_mut()
            }
            None => main,
        }
    } else {
        main
    };

    invoke(
        target,
        ids,
        TEST_CONTROL_ENDPOINT_ID,
        crate::transport::TEST_CONTROL_FEATURE_ID,
        params,
        deadline,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Connection;

    #[test]
    fn message_ids_are_monotonic() {
        let gen = MessageIdGenerator::new();
        let a = gen.next();
        let b = gen.next();
        let c = gen.next();
        assert!(a < b && b < c);
    }

    #[test]
    fn resolve_prefers_tracked_zone_over_suite_and_main() {
        let mut pool = ConnectionPool::new();
        pool.track_zone("grid", Connection::dummy_operational(), vec![1])
            .unwrap();
        let (tier, _conn) = resolve(Some(ZoneSelector::Key("grid")), &mut pool, None);
        assert_eq!(tier, ResolvedTier::TrackedZone);
    }

    #[test]
    fn resolve_falls_back_to_main_with_no_selector_and_no_suite() {
        let mut pool = ConnectionPool::new();
        let (tier, _conn) = resolve(None, &mut pool, None);
        assert_eq!(tier, ResolvedTier::Main);
    }

    #[test]
    fn extract_subscription_id_reads_integer_value() {
        let payload = Value::Map(vec![(
            Value::Text("subscription_id".into()),
            Value::Integer(42.into()),
        )]);
        assert_eq!(extract_subscription_id(&payload), Some(42));
    }

    #[test]
    fn extract_subscription_id_none_when_absent() {
        let payload = Value::Map(vec![]);
        assert_eq!(extract_subscription_id(&payload), None);
    }
}
