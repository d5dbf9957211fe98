//! `TeardownTest` (§4.I), the 6-step per-test teardown sequence.

use tracing::debug;

use super::{Diagnostics, Lifecycle, WireOps};
use crate::diagnostics::{diff_snapshots, log_if_still_diverged};
use crate::error::MashError;
use crate::model::{ExecutionState, PreconditionLevel};
use crate::transport::TestControlCommand;

pub async fn teardown_test(
    state: &mut ExecutionState,
    lifecycle: &mut dyn Lifecycle,
    wire: &mut dyn WireOps,
    diagnostics: &mut dyn Diagnostics,
) -> Result<(), MashError> {
    // Step 1: capture an "after" snapshot, diff against "before", re-reset
    // and re-sample once if diverged. Always record diffs for reporting.
    if diagnostics.reset_configured() {
        if let Some(before) = state.before_snapshot.clone() {
            let after = diagnostics.request_device_state().await?;
            let diverged = diff_snapshots(&before, &after);
            if !diverged.is_empty() {
                debug!(fields = ?diverged, "teardown: device state diverged, re-resetting");
                wire.send_trigger_via_zone(TestControlCommand::Reset).await.ok();
                let resampled = diagnostics.request_device_state().await?;
                log_if_still_diverged(&before, &resampled);
                state.after_snapshot = Some(resampled);
            } else {
                state.after_snapshot = Some(after);
            }
        }
    }

    // Step 2: unsubscribe all, clear notifications on main and every zone.
    wire.unsubscribe_all_and_clear_notifications();

    // Step 3: if main is connected but PASE incomplete, close it.
    let pase_complete = lifecycle.pase_state().is_commissioned();
    if lifecycle.current_level() >= PreconditionLevel::Commissioning && !pase_complete {
        lifecycle.ensure_disconnected().await?;
    }

    // Step 4: clear any incomplete PASE state.
    if !pase_complete {
        lifecycle.pase_state_mut().clear();
    }

    // Step 5: reset hadConnection on main.
    lifecycle.reset_main_had_connection();

    // Step 6: close any security-pool connections accumulated by
    // security-scenario steps.
    state.custom.security_pool.clear();

    Ok(())
}
