//! `trigger_test_event` action handler (§4.J, §4.G), the one handler that
//! bypasses zone-scoped dispatch entirely: TestControl commands target the
//! main/suite connection directly, using the same routing
//! `zone::trigger_test_event` already implements for the coordinator.

use async_trait::async_trait;
use serde_json::Value;

use super::{outputs, param_or_state, ActionHandler, HandlerCtx, Outputs};
use crate::error::MashError;
use crate::model::{ExecutionState, Step};
use crate::transport::TestControlCommand;
use crate::zone;

fn parse_command(name: &str) -> Option<TestControlCommand> {
    match name {
        "reset" => Some(TestControlCommand::Reset),
        "enter_commissioning_mode" => Some(TestControlCommand::EnterCommissioningMode),
        "exit_commissioning_mode" => Some(TestControlCommand::ExitCommissioningMode),
        "set_control_state" => Some(TestControlCommand::SetControlState),
        "set_process_state" => Some(TestControlCommand::SetProcessState),
        "clear_limit" => Some(TestControlCommand::ClearLimit),
        "get_test_state" => Some(TestControlCommand::GetTestState),
        "remove_zone" => Some(TestControlCommand::RemoveZone),
        _ => None,
    }
}

pub struct TriggerTestEvent;

#[async_trait]
impl ActionHandler for TriggerTestEvent {
    async fn handle(
        &self,
        ctx: &mut HandlerCtx<'_>,
        step: &Step,
        state: &mut ExecutionState,
    ) -> Result<Outputs, MashError> {
        let command_name = param_or_state(step, state, "command").unwrap_or("reset");
        let Some(command) = parse_command(command_name) else {
            return Ok(outputs([
                ("trigger_sent", Value::Bool(false)),
                ("success", Value::Bool(false)),
                ("error_code", Value::String("UNKNOWN_COMMAND".into())),
            ]));
        };

        let main = ctx.pool.main_mut();
        let result = zone::trigger_test_event(
            main,
            ctx.suite.as_deref_mut(),
            ctx.ids,
            command,
            ctx.enable_key,
            ctx.deadline,
        )
        .await;

        match result {
            Ok(response) => Ok(outputs([
                ("trigger_sent", Value::Bool(true)),
                ("event_trigger", Value::String(command_name.to_string())),
                ("success", Value::Bool(response.status.is_success())),
                ("status", Value::String(format!("{:?}", response.status))),
            ])),
            Err(err) => Ok(outputs([
                ("trigger_sent", Value::Bool(true)),
                ("event_trigger", Value::String(command_name.to_string())),
                ("success", Value::Bool(false)),
                ("error_code", Value::String(err.to_string())),
            ])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_command_covers_every_named_variant() {
        for name in [
            "reset",
            "enter_commissioning_mode",
            "exit_commissioning_mode",
            "set_control_state",
            "set_process_state",
            "clear_limit",
            "get_test_state",
            "remove_zone",
        ] {
            assert!(parse_command(name).is_some(), "missing mapping for {name}");
        }
    }

    #[test]
    fn parse_command_rejects_unknown_names() {
        assert!(parse_command("not_a_real_command").is_none());
    }
}
