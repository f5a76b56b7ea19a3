//! Device control commands sent by the dashboard.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::envelope::OutboundRequest;
use crate::message::HEARTBEAT_REPLY;
use crate::pubsub::ProtocolError;

/// Subject for sequencer control codes.
pub const SET_SUBJECT: &str = "dunebugger_set";

/// Subject for direct switch control, handled by the controller core.
pub const CORE_SET_SUBJECT: &str = "core.dunebugger_set";

/// Commands understood by the Dunebugger controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Start the sequence cycle.
    StartCycle,
    /// Stop the running cycle.
    StopCycle,
    EnableStartButton,
    DisableStartButton,
    EnableRandomActions,
    DisableRandomActions,
    /// Drive every output to its off state.
    OffState,
    /// Drive every output to its standby state.
    StandbyState,
    /// Flip one GPIO switch.
    SetSwitch { pin: u32, on: bool },
    /// Ask the controller to re-broadcast its state.
    Refresh,
    /// Ask the controller for fresh system telemetry.
    RefreshSystemInfo,
    /// Announce this dashboard to the controller.
    Heartbeat,
}

impl DeviceCommand {
    /// Subject the command travels under.
    pub fn subject(&self) -> &'static str {
        match self {
            DeviceCommand::SetSwitch { .. } => CORE_SET_SUBJECT,
            DeviceCommand::Refresh => "refresh",
            DeviceCommand::RefreshSystemInfo => "system_info",
            DeviceCommand::Heartbeat => "heartbeat",
            _ => SET_SUBJECT,
        }
    }

    /// Body of the request.
    pub fn body(&self) -> Value {
        let code = match self {
            DeviceCommand::StartCycle => "c",
            DeviceCommand::StopCycle => "cs",
            DeviceCommand::EnableStartButton => "esb",
            DeviceCommand::DisableStartButton => "dsb",
            DeviceCommand::EnableRandomActions => "er",
            DeviceCommand::DisableRandomActions => "dr",
            DeviceCommand::OffState => "so",
            DeviceCommand::StandbyState => "sb",
            DeviceCommand::SetSwitch { pin, on } => {
                return Value::String(format!("sw {pin} {}", if *on { "on" } else { "off" }));
            }
            // The controller expects the literal string, not JSON null.
            DeviceCommand::Refresh => "null",
            DeviceCommand::RefreshSystemInfo => "refresh",
            DeviceCommand::Heartbeat => HEARTBEAT_REPLY,
        };
        Value::String(code.to_string())
    }

    /// Builds the outbound request, optionally addressed to a connection.
    pub fn to_request(&self, connection_id: Option<String>) -> OutboundRequest {
        OutboundRequest::new(self.subject(), self.body(), connection_id)
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommand::StartCycle => f.write_str("start"),
            DeviceCommand::StopCycle => f.write_str("stop"),
            DeviceCommand::EnableStartButton => f.write_str("start-button-on"),
            DeviceCommand::DisableStartButton => f.write_str("start-button-off"),
            DeviceCommand::EnableRandomActions => f.write_str("random-on"),
            DeviceCommand::DisableRandomActions => f.write_str("random-off"),
            DeviceCommand::OffState => f.write_str("off"),
            DeviceCommand::StandbyState => f.write_str("standby"),
            DeviceCommand::SetSwitch { pin, on } => {
                write!(f, "switch {pin} {}", if *on { "on" } else { "off" })
            }
            DeviceCommand::Refresh => f.write_str("refresh"),
            DeviceCommand::RefreshSystemInfo => f.write_str("system-info"),
            DeviceCommand::Heartbeat => f.write_str("heartbeat"),
        }
    }
}

/// Parses the names produced by `Display`, e.g. `"start"` or `"switch 17 on"`.
impl FromStr for DeviceCommand {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let name = parts
            .next()
            .ok_or_else(|| ProtocolError::InvalidCommand(s.to_string()))?;

        let command = match name {
            "start" => DeviceCommand::StartCycle,
            "stop" => DeviceCommand::StopCycle,
            "start-button-on" => DeviceCommand::EnableStartButton,
            "start-button-off" => DeviceCommand::DisableStartButton,
            "random-on" => DeviceCommand::EnableRandomActions,
            "random-off" => DeviceCommand::DisableRandomActions,
            "off" => DeviceCommand::OffState,
            "standby" => DeviceCommand::StandbyState,
            "refresh" => DeviceCommand::Refresh,
            "system-info" => DeviceCommand::RefreshSystemInfo,
            "heartbeat" => DeviceCommand::Heartbeat,
            "switch" => {
                let pin = parts
                    .next()
                    .and_then(|p| p.parse::<u32>().ok())
                    .ok_or_else(|| ProtocolError::InvalidCommand(s.to_string()))?;
                let on = match parts.next() {
                    Some("on") => true,
                    Some("off") => false,
                    _ => return Err(ProtocolError::InvalidCommand(s.to_string())),
                };
                DeviceCommand::SetSwitch { pin, on }
            }
            _ => return Err(ProtocolError::InvalidCommand(s.to_string())),
        };

        if parts.next().is_some() {
            return Err(ProtocolError::InvalidCommand(s.to_string()));
        }
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sequencer_codes() {
        assert_eq!(DeviceCommand::StartCycle.body(), json!("c"));
        assert_eq!(DeviceCommand::StopCycle.body(), json!("cs"));
        assert_eq!(DeviceCommand::EnableStartButton.body(), json!("esb"));
        assert_eq!(DeviceCommand::DisableRandomActions.body(), json!("dr"));
        assert_eq!(DeviceCommand::StandbyState.body(), json!("sb"));
        assert_eq!(DeviceCommand::OffState.subject(), SET_SUBJECT);
    }

    #[test]
    fn test_switch_goes_to_core_subject() {
        let command = DeviceCommand::SetSwitch { pin: 17, on: false };
        assert_eq!(command.subject(), CORE_SET_SUBJECT);
        assert_eq!(command.body(), json!("sw 17 off"));
    }

    #[test]
    fn test_refresh_requests() {
        let request = DeviceCommand::Refresh.to_request(None);
        assert_eq!(request.subject, "refresh");
        assert_eq!(request.body, json!("null"));

        let request = DeviceCommand::RefreshSystemInfo.to_request(Some("c1".into()));
        assert_eq!(request.subject, "system_info");
        assert_eq!(request.body, json!("refresh"));
        assert_eq!(request.connection_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_parse_display_names() {
        assert_eq!("start".parse::<DeviceCommand>().unwrap(), DeviceCommand::StartCycle);
        assert_eq!(
            "switch 4 on".parse::<DeviceCommand>().unwrap(),
            DeviceCommand::SetSwitch { pin: 4, on: true }
        );
        let command = DeviceCommand::SetSwitch { pin: 22, on: false };
        assert_eq!(command.to_string().parse::<DeviceCommand>().unwrap(), command);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<DeviceCommand>().is_err());
        assert!("launch".parse::<DeviceCommand>().is_err());
        assert!("switch x on".parse::<DeviceCommand>().is_err());
        assert!("switch 4 maybe".parse::<DeviceCommand>().is_err());
        assert!("start now".parse::<DeviceCommand>().is_err());
    }
}
