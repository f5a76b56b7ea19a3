//! State slots fed by the session client and the owned dashboard state.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::notification::NotificationLevel;
use crate::sequence::SequenceAnalysis;
use crate::DomainResult;

/// Default number of log entries kept by [`DashboardState`].
pub const DEFAULT_LOG_CAPACITY: usize = 500;

// ============================================================================
// Slot Values
// ============================================================================

/// One line of controller log output.
///
/// The controller sends either plain text or a structured
/// `{"message": ..., "level": ...}` object; the body is kept as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogEntry(Value);

impl LogEntry {
    pub fn new(body: Value) -> Self {
        Self(body)
    }

    /// Raw body as received.
    pub fn body(&self) -> &Value {
        &self.0
    }

    /// Text suitable for display.
    pub fn text(&self) -> String {
        match &self.0 {
            Value::String(s) => s.clone(),
            Value::Object(map) => match map.get("message").and_then(Value::as_str) {
                Some(message) => message.to_string(),
                None => self.0.to_string(),
            },
            other => other.to_string(),
        }
    }

    /// Notification carried by a structured entry, if any.
    ///
    /// Only objects with a string `message` raise a notification. A
    /// missing or non-string `level` maps to info.
    pub fn notification(&self) -> Option<(String, NotificationLevel)> {
        let map = self.0.as_object()?;
        let message = map.get("message")?.as_str()?;
        let level = map
            .get("level")
            .and_then(Value::as_str)
            .map(NotificationLevel::from_log_level)
            .unwrap_or_default();
        Some((message.to_string(), level))
    }
}

/// Schedule body stamped with a freshness marker.
///
/// The controller re-sends identical schedule text on every refresh;
/// `revision` increases on each receipt so consumers that compare values
/// still see a new update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub body: Value,
    pub received_at: DateTime<Utc>,
    pub revision: u64,
}

/// An update pushed by the session client into one state slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "slot", content = "value", rename_all = "snake_case")]
pub enum StateUpdate {
    /// Connection id assigned by the bus; `None` after disconnect.
    ConnectionId(Option<String>),

    /// Whether the remote device answered within the heartbeat window.
    Liveness(bool),

    /// New log entry, appended to the log slot.
    LogAppended(LogEntry),

    GpioStates(Value),

    SequenceState(Value),

    Sequence(Value),

    Schedule(ScheduleSnapshot),

    NextActions(Value),

    LastExecutedAction(Value),

    PlayingTime(Value),

    SystemInfo(Value),
}

impl StateUpdate {
    /// Name of the slot this update targets.
    pub fn slot(&self) -> &'static str {
        match self {
            StateUpdate::ConnectionId(_) => "connection_id",
            StateUpdate::Liveness(_) => "liveness",
            StateUpdate::LogAppended(_) => "log_appended",
            StateUpdate::GpioStates(_) => "gpio_states",
            StateUpdate::SequenceState(_) => "sequence_state",
            StateUpdate::Sequence(_) => "sequence",
            StateUpdate::Schedule(_) => "schedule",
            StateUpdate::NextActions(_) => "next_actions",
            StateUpdate::LastExecutedAction(_) => "last_executed_action",
            StateUpdate::PlayingTime(_) => "playing_time",
            StateUpdate::SystemInfo(_) => "system_info",
        }
    }
}

// ============================================================================
// Dashboard State
// ============================================================================

/// Owned dashboard state for one device.
///
/// Every slot starts empty and is filled by [`DashboardState::apply`].
/// Logs are append-only up to `log_capacity`; the oldest entries are
/// dropped first. Every other slot is replaced by its latest update.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardState {
    pub connection_id: Option<String>,
    pub is_live: bool,
    pub logs: VecDeque<LogEntry>,
    pub gpio_states: Option<Value>,
    pub sequence_state: Option<Value>,
    pub sequence: Option<Value>,
    pub schedule: Option<ScheduleSnapshot>,
    pub next_actions: Option<Value>,
    pub last_executed_action: Option<Value>,
    pub playing_time: Option<Value>,
    pub system_info: Option<Value>,

    /// When the last update was applied.
    pub last_update: Option<DateTime<Utc>>,

    log_capacity: usize,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self::new()
    }
}

impl DashboardState {
    /// Creates an empty state with the default log capacity.
    pub fn new() -> Self {
        Self::with_log_capacity(DEFAULT_LOG_CAPACITY)
    }

    /// Creates an empty state keeping at most `log_capacity` log entries.
    pub fn with_log_capacity(log_capacity: usize) -> Self {
        Self {
            connection_id: None,
            is_live: false,
            logs: VecDeque::new(),
            gpio_states: None,
            sequence_state: None,
            sequence: None,
            schedule: None,
            next_actions: None,
            last_executed_action: None,
            playing_time: None,
            system_info: None,
            last_update: None,
            log_capacity,
        }
    }

    pub fn log_capacity(&self) -> usize {
        self.log_capacity
    }

    /// Folds one update into the state.
    pub fn apply(&mut self, update: StateUpdate) {
        debug!(slot = update.slot(), "Applying state update");

        match update {
            StateUpdate::ConnectionId(id) => self.connection_id = id,
            StateUpdate::Liveness(live) => self.is_live = live,
            StateUpdate::LogAppended(entry) => self.push_log(entry),
            StateUpdate::GpioStates(value) => self.gpio_states = Some(value),
            StateUpdate::SequenceState(value) => self.sequence_state = Some(value),
            StateUpdate::Sequence(value) => self.sequence = Some(value),
            StateUpdate::Schedule(snapshot) => self.schedule = Some(snapshot),
            StateUpdate::NextActions(value) => self.next_actions = Some(value),
            StateUpdate::LastExecutedAction(value) => self.last_executed_action = Some(value),
            StateUpdate::PlayingTime(value) => self.playing_time = Some(value),
            StateUpdate::SystemInfo(value) => self.system_info = Some(value),
        }

        self.last_update = Some(Utc::now());
    }

    /// Clears every slot, keeping the configured log capacity.
    ///
    /// Used when the dashboard switches to another device.
    pub fn reset(&mut self) {
        *self = Self::with_log_capacity(self.log_capacity);
    }

    /// Analyses the current sequence, if one has been received.
    pub fn sequence_analysis(&self) -> Option<DomainResult<SequenceAnalysis>> {
        self.sequence.as_ref().map(SequenceAnalysis::from_value)
    }

    fn push_log(&mut self, entry: LogEntry) {
        if self.log_capacity == 0 {
            return;
        }
        while self.logs.len() >= self.log_capacity {
            self.logs.pop_front();
        }
        self.logs.push_back(entry);
    }
}

// ============================================================================
// Tests
// ============================================================================
