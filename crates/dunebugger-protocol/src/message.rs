//! Typed view of inbound envelope subjects.

use std::fmt;

use crate::envelope::InboundEnvelope;

/// Heartbeat body the controller sends when probing for listeners.
pub const HEARTBEAT_PROBE: &str = "Is anyone there?";

/// Heartbeat body a dashboard sends to announce itself.
pub const HEARTBEAT_REPLY: &str = "I am here";

/// Subjects the dashboard understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    Log,
    Heartbeat,
    GpioState,
    SequenceState,
    Sequence,
    CurrentSchedule,
    NextActions,
    LastExecutedAction,
    PlayingTime,
    SystemInfo,
}

impl Subject {
    /// All known subjects, in wire order.
    pub const ALL: [Subject; 10] = [
        Subject::Log,
        Subject::Heartbeat,
        Subject::GpioState,
        Subject::SequenceState,
        Subject::Sequence,
        Subject::CurrentSchedule,
        Subject::NextActions,
        Subject::LastExecutedAction,
        Subject::PlayingTime,
        Subject::SystemInfo,
    ];

    /// Wire name of the subject.
    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::Log => "log",
            Subject::Heartbeat => "heartbeat",
            Subject::GpioState => "gpio_state",
            Subject::SequenceState => "sequence_state",
            Subject::Sequence => "sequence",
            Subject::CurrentSchedule => "current_schedule",
            Subject::NextActions => "next_actions",
            Subject::LastExecutedAction => "last_executed_action",
            Subject::PlayingTime => "playing_time",
            Subject::SystemInfo => "system_info",
        }
    }

    /// Looks up a subject by wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|subject| subject.as_str() == name)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound envelope decoded by subject.
///
/// Bodies stay opaque JSON: their shape belongs to the controller and the
/// dashboard only forwards them.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Log line; either plain text or a structured `{message, level}` object.
    Log(serde_json::Value),

    /// Liveness signal from the controller.
    Heartbeat(serde_json::Value),

    GpioState(serde_json::Value),

    SequenceState(serde_json::Value),

    Sequence(serde_json::Value),

    CurrentSchedule(serde_json::Value),

    NextActions(serde_json::Value),

    LastExecutedAction(serde_json::Value),

    PlayingTime(serde_json::Value),

    SystemInfo(serde_json::Value),

    /// Subject this version does not know about.
    Unknown {
        subject: String,
        body: serde_json::Value,
    },
}

impl InboundMessage {
    /// Returns the subject, or `None` for unknown messages.
    pub fn subject(&self) -> Option<Subject> {
        match self {
            InboundMessage::Log(_) => Some(Subject::Log),
            InboundMessage::Heartbeat(_) => Some(Subject::Heartbeat),
            InboundMessage::GpioState(_) => Some(Subject::GpioState),
            InboundMessage::SequenceState(_) => Some(Subject::SequenceState),
            InboundMessage::Sequence(_) => Some(Subject::Sequence),
            InboundMessage::CurrentSchedule(_) => Some(Subject::CurrentSchedule),
            InboundMessage::NextActions(_) => Some(Subject::NextActions),
            InboundMessage::LastExecutedAction(_) => Some(Subject::LastExecutedAction),
            InboundMessage::PlayingTime(_) => Some(Subject::PlayingTime),
            InboundMessage::SystemInfo(_) => Some(Subject::SystemInfo),
            InboundMessage::Unknown { .. } => None,
        }
    }

    /// Returns true for a heartbeat probing for listeners.
    pub fn is_heartbeat_probe(&self) -> bool {
        matches!(self, InboundMessage::Heartbeat(body) if body.as_str() == Some(HEARTBEAT_PROBE))
    }
}

impl From<InboundEnvelope> for InboundMessage {
    fn from(envelope: InboundEnvelope) -> Self {
        let body = envelope.body;
        match Subject::parse(&envelope.subject) {
            Some(Subject::Log) => InboundMessage::Log(body),
            Some(Subject::Heartbeat) => InboundMessage::Heartbeat(body),
            Some(Subject::GpioState) => InboundMessage::GpioState(body),
            Some(Subject::SequenceState) => InboundMessage::SequenceState(body),
            Some(Subject::Sequence) => InboundMessage::Sequence(body),
            Some(Subject::CurrentSchedule) => InboundMessage::CurrentSchedule(body),
            Some(Subject::NextActions) => InboundMessage::NextActions(body),
            Some(Subject::LastExecutedAction) => InboundMessage::LastExecutedAction(body),
            Some(Subject::PlayingTime) => InboundMessage::PlayingTime(body),
            Some(Subject::SystemInfo) => InboundMessage::SystemInfo(body),
            None => InboundMessage::Unknown {
                subject: envelope.subject,
                body,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subject_names_are_unique_and_parse_back() {
        for subject in Subject::ALL {
            assert_eq!(Subject::parse(subject.as_str()), Some(subject));
        }
        assert_eq!(Subject::parse("dunebugger_set"), None);
    }

    #[test]
    fn test_gpio_state_body_untouched() {
        let envelope = InboundEnvelope::broadcast("gpio_state", json!({"17": "on"}));
        let message = InboundMessage::from(envelope);
        assert_eq!(message, InboundMessage::GpioState(json!({"17": "on"})));
        assert_eq!(message.subject(), Some(Subject::GpioState));
    }

    #[test]
    fn test_unknown_subject_keeps_name() {
        let envelope = InboundEnvelope::broadcast("firmware_update", json!(3));
        match InboundMessage::from(envelope) {
            InboundMessage::Unknown { subject, body } => {
                assert_eq!(subject, "firmware_update");
                assert_eq!(body, json!(3));
            }
            other => panic!("Expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_heartbeat_probe_detection() {
        assert!(InboundMessage::Heartbeat(json!(HEARTBEAT_PROBE)).is_heartbeat_probe());
        assert!(!InboundMessage::Heartbeat(json!("pong")).is_heartbeat_probe());
        assert!(!InboundMessage::Log(json!(HEARTBEAT_PROBE)).is_heartbeat_probe());
    }
}
