//! `ping` action handler (§4.J).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use ciborium::value::Value as Cbor;
use serde_json::Value;

use super::{outputs, ActionHandler, HandlerCtx, Outputs};
use crate::error::MashError;
use crate::model::{ExecutionState, Step};
use crate::transport::TEST_CONTROL_FEATURE_ID;
use crate::zone;

const PING_ENDPOINT_ID: u8 = 0x00;
const PING_SEQ_STATE_KEY: &str = "_ping_seq";

pub struct Ping;

#[async_trait]
impl ActionHandler for Ping {
    async fn handle(
        &self,
        ctx: &mut HandlerCtx<'_>,
        step: &Step,
        state: &mut ExecutionState,
    ) -> Result<Outputs, MashError> {
        let max_latency_ms = step
            .params
            .get("max_latency_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(u64::from(u32::MAX));

        let seq = next_ping_seq(state);

        let (_tier, conn) = ctx.resolve_conn(step);
        let request = Cbor::Map(vec![
            (Cbor::Text("op".into()), Cbor::Text("ping".into())),
            (Cbor::Text("seq".into()), Cbor::Integer((seq as i64).into())),
        ]);

        let started = Instant::now();
        let result = zone::invoke(
            conn,
            ctx.ids,
            PING_ENDPOINT_ID,
            TEST_CONTROL_FEATURE_ID,
            request,
            ctx.deadline,
        )
        .await;
        let elapsed = started.elapsed();

        let (pong_received, status_success) = match &result {
            Ok(response) => (true, response.status.is_success()),
            Err(_) => (false, false),
        };

        let latency_under = pong_received && elapsed <= Duration::from_millis(max_latency_ms);

        Ok(outputs([
            ("ping_sent", Value::Bool(true)),
            ("pong_received", Value::Bool(pong_received && status_success)),
            ("latency_under", Value::Bool(latency_under)),
            ("pong_seq", Value::from(seq)),
        ]))
    }
}

/// Monotonic per-`ExecutionState` ping sequence (§4.J "ping_seq
/// (monotonic per-state)"), distinct from the wire-level message-ID
/// generator, which is per-runner rather than per-test.
fn next_ping_seq(state: &mut ExecutionState) -> u64 {
    let next = state
        .values
        .get(PING_SEQ_STATE_KEY)
        .and_then(|v| v.as_u64())
        .unwrap_or(0)
        + 1;
    state.set(PING_SEQ_STATE_KEY, next);
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_seq_increments_monotonically_per_state() {
        let mut state = ExecutionState::default();
        assert_eq!(next_ping_seq(&mut state), 1);
        assert_eq!(next_ping_seq(&mut state), 2);
        assert_eq!(next_ping_seq(&mut state), 3);
    }

    #[test]
    fn ping_seq_is_independent_across_states() {
        let mut a = ExecutionState::default();
        let mut b = ExecutionState::default();
        assert_eq!(next_ping_seq(&mut a), 1);
        assert_eq!(next_ping_seq(&mut a), 2);
        assert_eq!(next_ping_seq(&mut b), 1);
    }
}
