//! Trigger surface: line commands from the operator, queued over a
//! crossbeam channel into the async control loop.

use crossbeam_channel::{Sender, TrySendError};
use pcp::{PcpError, PortId, TransferState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerCommand {
    Start { source: PortId, dest: PortId },
    Status { port: PortId, state: TransferState },
    ToggleIdentity,
    ToggleBus,
    Reset,
    Quit,
}

pub const USAGE: &str =
    "commands: start <source> <dest> | status <port> <L|U> | toggle | bus | reset | quit";

/// Parses one operator line into a trigger command.
pub fn parse_trigger(line: &str) -> Result<TriggerCommand, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        ["start", source, dest] => Ok(TriggerCommand::Start {
            source: parse_port(source)?,
            dest: parse_port(dest)?,
        }),
        ["status", port, state] => Ok(TriggerCommand::Status {
            port: parse_port(port)?,
            state: parse_state(state)?,
        }),
        ["toggle"] => Ok(TriggerCommand::ToggleIdentity),
        ["bus"] => Ok(TriggerCommand::ToggleBus),
        ["reset"] => Ok(TriggerCommand::Reset),
        ["quit"] | ["exit"] => Ok(TriggerCommand::Quit),
        _ => Err(USAGE.to_string()),
    }
}

fn parse_port(token: &str) -> Result<PortId, String> {
    PortId::new(token).map_err(|err: PcpError| err.to_string())
}

fn parse_state(token: &str) -> Result<TransferState, String> {
    match token {
        "L" | "l" => Ok(TransferState::Loading),
        "U" | "u" => Ok(TransferState::Unloading),
        other => Err(format!("unknown transfer state '{other}', expected L or U")),
    }
}

/// Queues a trigger for the control loop; a full or closed queue is
/// reported through `status` rather than an error.
pub fn dispatch_trigger(
    cmd_tx: &Sender<TriggerCommand>,
    cmd: TriggerCommand,
    status: &mut String,
) {
    let cmd_name = match &cmd {
        TriggerCommand::Start { .. } => "start",
        TriggerCommand::Status { .. } => "status",
        TriggerCommand::ToggleIdentity => "toggle_identity",
        TriggerCommand::ToggleBus => "toggle_bus",
        TriggerCommand::Reset => "reset",
        TriggerCommand::Quit => "quit",
    };

    match cmd_tx.try_send(cmd) {
        Ok(()) => tracing::debug!(command = cmd_name, "queued trigger command"),
        Err(TrySendError::Full(_)) => {
            *status = "trigger queue is full; please retry".to_string();
        }
        Err(TrySendError::Disconnected(_)) => {
            *status = "control loop disconnected; the process is shutting down".to_string();
        }
    }
}
