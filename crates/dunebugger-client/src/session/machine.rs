//! Session state machine.
//!
//! `SessionCore` holds every piece of session state and decides what to do
//! with each input: owner commands, transport events and heartbeat ticks.
//! It performs no I/O. Each handler publishes state updates directly to the
//! sink and returns the [`SessionAction`]s the actor must carry out against
//! the transport and the tick timer.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use dunebugger_core::{LogEntry, ScheduleSnapshot, StateUpdate};
use dunebugger_protocol::{
    InboundEnvelope, InboundMessage, OutboundRequest, Subject, HEARTBEAT_REPLY,
};
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use super::SessionConfig;
use crate::heartbeat::{CountdownTick, HeartbeatCountdown};
use crate::sink::{Notifier, StateSink};
use crate::transport::TransportEvent;

// ============================================================================
// States and Actions
// ============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No usable connection. Either never opened or the transport dropped.
    Idle,
    /// Transport requested, waiting for the bus to assign a connection id.
    Connecting,
    /// Connected; the device answered within the heartbeat window or the
    /// first heartbeat is still pending.
    Live,
    /// Connected, but the heartbeat window lapsed without a heartbeat.
    Degraded,
    /// Closed by the owner. Terminal.
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Live => "live",
            SessionState::Degraded => "degraded",
            SessionState::Closed => "closed",
        }
    }

    /// True while the bus connection is up.
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Live | SessionState::Degraded)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side effects requested by the core, executed in order by the actor.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Open a transport to `bus_url`.
    Connect { bus_url: String },
    /// Subscribe the current transport to `group`.
    JoinGroup { group: String },
    /// Publish a request to `group`.
    Send {
        group: String,
        request: OutboundRequest,
    },
    /// Start (or restart) the periodic heartbeat tick.
    StartHeartbeatTimer,
    /// Cancel the heartbeat tick.
    StopHeartbeatTimer,
    /// Stop the current transport and drop its event stream.
    StopTransport,
}

/// Bus URL and device group a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub bus_url: String,
    pub group_name: String,
}

// ============================================================================
// Session Core
// ============================================================================

/// The session state machine.
pub struct SessionCore {
    config: SessionConfig,
    sink: Arc<dyn StateSink>,
    notifier: Option<Arc<dyn Notifier>>,

    state: SessionState,
    target: Option<SessionTarget>,
    connection_id: Option<String>,
    is_live: bool,
    countdown: Option<HeartbeatCountdown>,
    schedule_revision: u64,
}

impl SessionCore {
    pub fn new(
        config: SessionConfig,
        sink: Arc<dyn StateSink>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            config,
            sink,
            notifier,
            state: SessionState::Idle,
            target: None,
            connection_id: None,
            is_live: false,
            countdown: None,
            schedule_revision: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }

    pub fn target(&self) -> Option<&SessionTarget> {
        self.target.as_ref()
    }

    /// Ticks left in the heartbeat window, `None` when no countdown runs.
    pub fn countdown_remaining(&self) -> Option<u64> {
        self.countdown.as_ref().map(HeartbeatCountdown::remaining)
    }

    // ------------------------------------------------------------------------
    // Owner commands
    // ------------------------------------------------------------------------

    /// Binds the session to `(bus_url, group_name)` and starts connecting.
    ///
    /// Re-opening the current pair does nothing. Opening a different pair
    /// tears the current transport down first.
    pub fn open(&mut self, bus_url: &str, group_name: &str) -> Vec<SessionAction> {
        if self.state == SessionState::Closed {
            warn!(group = group_name, "Open ignored, session is closed");
            return Vec::new();
        }

        if bus_url.is_empty() || group_name.is_empty() {
            debug!(
                bus_url,
                group = group_name,
                "Open ignored, bus url or group missing"
            );
            return Vec::new();
        }

        let target = SessionTarget {
            bus_url: bus_url.to_string(),
            group_name: group_name.to_string(),
        };

        if self.target.as_ref() == Some(&target) {
            debug!(group = group_name, "Session already open for this group");
            return Vec::new();
        }

        let mut actions = Vec::new();
        if self.target.is_some() {
            info!(
                from = self.target.as_ref().map(|t| t.group_name.as_str()),
                to = group_name,
                "Switching session to another group"
            );
            actions.extend(self.teardown());
            self.publish_disconnected();
        }

        info!(bus_url, group = group_name, "Opening session");
        self.target = Some(target);
        self.state = SessionState::Connecting;
        actions.push(SessionAction::Connect {
            bus_url: bus_url.to_string(),
        });
        actions
    }

    /// Records that the transport for the current target could not be created.
    ///
    /// The target is forgotten so a later `open` with the same pair retries.
    pub fn connect_failed(&mut self, reason: &str) {
        warn!(reason, "Failed to start transport");
        self.target = None;
        if self.state != SessionState::Closed {
            self.state = SessionState::Idle;
        }
    }

    /// Builds a request for the device, stamped with this session's id.
    ///
    /// Returns `None`, and logs, when the session is closed or no
    /// transport is connected. An explicit `connection_id` overrides the
    /// session's own id in the payload.
    pub fn prepare_request(
        &self,
        subject: &str,
        body: Value,
        connection_id: Option<String>,
    ) -> Option<SessionAction> {
        if self.state == SessionState::Closed {
            warn!(subject, "Request dropped, session is closed");
            return None;
        }

        let (Some(target), Some(own_id)) = (self.target.as_ref(), self.connection_id.as_ref())
        else {
            warn!(subject, "Request dropped, no connected transport");
            return None;
        };

        let connection_id = connection_id.unwrap_or_else(|| own_id.clone());
        debug!(subject, group = %target.group_name, "Sending request");
        Some(SessionAction::Send {
            group: target.group_name.clone(),
            request: OutboundRequest::new(subject, body, Some(connection_id)),
        })
    }

    /// Closes the session for good.
    ///
    /// Releases the timer and the transport. No state updates are
    /// published; the owner is discarding this session.
    pub fn close(&mut self) -> Vec<SessionAction> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }

        info!(
            group = self.target.as_ref().map(|t| t.group_name.as_str()),
            "Closing session"
        );
        let actions = self.teardown();
        self.target = None;
        self.state = SessionState::Closed;
        actions
    }

    // ------------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------------

    /// Handles one event from the current transport.
    pub fn handle_event(&mut self, event: TransportEvent) -> Vec<SessionAction> {
        if self.state == SessionState::Closed {
            trace!(?event, "Event ignored, session is closed");
            return Vec::new();
        }
        if self.target.is_none() {
            trace!(?event, "Event ignored, no transport");
            return Vec::new();
        }

        match event {
            TransportEvent::Connected { connection_id } => {
                info!(%connection_id, "Connected to bus");
                self.on_connected(connection_id)
            }
            TransportEvent::Reconnected { connection_id } => {
                info!(%connection_id, "Reconnected to bus");
                self.on_connected(connection_id)
            }
            TransportEvent::Disconnected { reason } => {
                info!(reason = reason.as_deref(), "Disconnected from bus");
                self.state = SessionState::Idle;
                let actions = self.stop_countdown();
                self.connection_id = None;
                self.publish_disconnected();
                actions
            }
            TransportEvent::GroupMessage(data) => self.handle_group_message(data),
            TransportEvent::Error(message) => {
                warn!(error = %message, "Transport error");
                Vec::new()
            }
        }
    }

    fn on_connected(&mut self, connection_id: String) -> Vec<SessionAction> {
        self.connection_id = Some(connection_id.clone());
        self.sink
            .publish(StateUpdate::ConnectionId(Some(connection_id.clone())));
        self.state = SessionState::Live;

        let Some(target) = self.target.as_ref() else {
            return Vec::new();
        };
        let group = target.group_name.clone();

        let mut actions = vec![
            SessionAction::JoinGroup {
                group: group.clone(),
            },
            SessionAction::Send {
                group,
                request: OutboundRequest::new(
                    Subject::Heartbeat.as_str(),
                    Value::String(HEARTBEAT_REPLY.to_string()),
                    Some(connection_id),
                ),
            },
        ];
        actions.extend(self.restart_countdown());
        actions
    }

    /// Routes one group message by subject.
    ///
    /// Malformed data, envelopes addressed to another connection and
    /// anything arriving while disconnected are dropped silently.
    pub fn handle_group_message(&mut self, data: Value) -> Vec<SessionAction> {
        if !self.state.is_connected() {
            trace!(state = %self.state, "Dropping group message, not connected");
            return Vec::new();
        }

        let envelope: InboundEnvelope = match serde_json::from_value(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "Dropping malformed group message");
                return Vec::new();
            }
        };

        if !envelope.is_addressed_to(self.connection_id.as_deref()) {
            trace!(
                subject = %envelope.subject,
                destination = envelope.destination.as_deref(),
                "Dropping message addressed elsewhere"
            );
            return Vec::new();
        }

        let message = InboundMessage::from(envelope);
        let probe = message.is_heartbeat_probe();

        match message {
            InboundMessage::Heartbeat(_) => return self.on_heartbeat(probe),
            InboundMessage::Log(body) => {
                let entry = LogEntry::new(body);
                let notification = entry.notification();
                self.sink.publish(StateUpdate::LogAppended(entry));
                if let (Some((text, level)), Some(notifier)) = (notification, &self.notifier) {
                    notifier.notify(&text, level);
                }
            }
            InboundMessage::GpioState(body) => self.sink.publish(StateUpdate::GpioStates(body)),
            InboundMessage::SequenceState(body) => {
                self.sink.publish(StateUpdate::SequenceState(body))
            }
            InboundMessage::Sequence(body) => self.sink.publish(StateUpdate::Sequence(body)),
            InboundMessage::CurrentSchedule(body) => {
                self.schedule_revision = self.schedule_revision.saturating_add(1);
                self.sink.publish(StateUpdate::Schedule(ScheduleSnapshot {
                    body,
                    received_at: Utc::now(),
                    revision: self.schedule_revision,
                }));
            }
            InboundMessage::NextActions(body) => self.sink.publish(StateUpdate::NextActions(body)),
            InboundMessage::LastExecutedAction(body) => {
                self.sink.publish(StateUpdate::LastExecutedAction(body))
            }
            InboundMessage::PlayingTime(body) => self.sink.publish(StateUpdate::PlayingTime(body)),
            InboundMessage::SystemInfo(body) => self.sink.publish(StateUpdate::SystemInfo(body)),
            InboundMessage::Unknown { subject, .. } => {
                warn!(%subject, "Unknown message subject");
            }
        }

        Vec::new()
    }

    fn on_heartbeat(&mut self, probe: bool) -> Vec<SessionAction> {
        trace!(probe, "Heartbeat received");
        self.set_live(true);
        if self.state.is_connected() {
            self.state = SessionState::Live;
        }

        let mut actions = self.restart_countdown();
        if probe {
            if let Some(reply) =
                self.prepare_request(Subject::Heartbeat.as_str(), Value::from(HEARTBEAT_REPLY), None)
            {
                actions.push(reply);
            }
        }
        actions
    }

    // ------------------------------------------------------------------------
    // Heartbeat ticks
    // ------------------------------------------------------------------------

    /// Advances the heartbeat countdown by one tick.
    pub fn on_tick(&mut self) -> Vec<SessionAction> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        let Some(countdown) = self.countdown.as_mut() else {
            return Vec::new();
        };

        match countdown.tick() {
            CountdownTick::Running { remaining } => {
                trace!(remaining, "Heartbeat countdown");
                Vec::new()
            }
            CountdownTick::Expired => {
                info!("Heartbeat timeout, device considered offline");
                self.countdown = None;
                self.set_live(false);
                if self.state == SessionState::Live {
                    self.state = SessionState::Degraded;
                }
                vec![SessionAction::StopHeartbeatTimer]
            }
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn set_live(&mut self, live: bool) {
        if self.is_live != live {
            self.is_live = live;
            self.sink.publish(StateUpdate::Liveness(live));
        }
    }

    /// Starts a full window. The timer is re-armed as well so the first tick
    /// lands one whole interval after now.
    fn restart_countdown(&mut self) -> Vec<SessionAction> {
        let config = self.config;
        let countdown = self.countdown.get_or_insert_with(|| {
            HeartbeatCountdown::from_timeout(config.heartbeat_timeout, config.tick_interval)
        });
        countdown.reset();
        trace!(ticks = countdown.window(), "Heartbeat countdown restarted");
        vec![SessionAction::StartHeartbeatTimer]
    }

    fn stop_countdown(&mut self) -> Vec<SessionAction> {
        match self.countdown.take() {
            Some(_) => vec![SessionAction::StopHeartbeatTimer],
            None => Vec::new(),
        }
    }

    /// Releases the timer and the transport and clears the connection id.
    fn teardown(&mut self) -> Vec<SessionAction> {
        let mut actions = self.stop_countdown();
        if self.target.is_some() {
            actions.push(SessionAction::StopTransport);
        }
        self.connection_id = None;
        actions
    }

    fn publish_disconnected(&mut self) {
        self.set_live(false);
        self.sink.publish(StateUpdate::ConnectionId(None));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use dunebugger_core::NotificationLevel;
    use dunebugger_protocol::{InboundEnvelope, HEARTBEAT_PROBE};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    const BUS: &str = "wss://bus.example/client";

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<StateUpdate>>,
        notifications: Mutex<Vec<(String, NotificationLevel)>>,
    }

    impl Recorder {
        fn updates(&self) -> Vec<StateUpdate> {
            self.updates.lock().unwrap().clone()
        }

        fn take_updates(&self) -> Vec<StateUpdate> {
            std::mem::take(&mut *self.updates.lock().unwrap())
        }

        fn notifications(&self) -> Vec<(String, NotificationLevel)> {
            self.notifications.lock().unwrap().clone()
        }
    }

    impl StateSink for Recorder {
        fn publish(&self, update: StateUpdate) {
            self.updates.lock().unwrap().push(update);
        }
    }

    impl Notifier for Recorder {
        fn notify(&self, message: &str, level: NotificationLevel) {
            self.notifications
                .lock()
                .unwrap()
                .push((message.to_string(), level));
        }
    }

    fn config(timeout_secs: u64) -> SessionConfig {
        SessionConfig {
            heartbeat_timeout: Duration::from_secs(timeout_secs),
            tick_interval: Duration::from_secs(1),
        }
    }

    fn core_with(timeout_secs: u64) -> (SessionCore, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let notifier: Arc<dyn Notifier> = recorder.clone();
        let core = SessionCore::new(config(timeout_secs), recorder.clone(), Some(notifier));
        (core, recorder)
    }

    fn connected_core(timeout_secs: u64) -> (SessionCore, Arc<Recorder>) {
        let (mut core, recorder) = core_with(timeout_secs);
        core.open(BUS, "deviceA");
        core.handle_event(TransportEvent::Connected {
            connection_id: "c1".to_string(),
        });
        recorder.take_updates();
        (core, recorder)
    }

    fn envelope(envelope: InboundEnvelope) -> TransportEvent {
        TransportEvent::GroupMessage(serde_json::to_value(envelope).unwrap())
    }

    fn heartbeat(body: &str) -> TransportEvent {
        envelope(InboundEnvelope::broadcast("heartbeat", json!(body)))
    }

    // ------------------------------------------------------------------------
    // open / close
    // ------------------------------------------------------------------------

    #[test]
    fn test_open_requests_connect() {
        let (mut core, _) = core_with(10);
        let actions = core.open(BUS, "deviceA");

        assert_eq!(
            actions,
            vec![SessionAction::Connect {
                bus_url: BUS.to_string()
            }]
        );
        assert_eq!(core.state(), SessionState::Connecting);
    }

    #[test]
    fn test_open_same_pair_is_noop() {
        let (mut core, _) = core_with(10);
        core.open(BUS, "deviceA");
        assert!(core.open(BUS, "deviceA").is_empty());
    }

    #[test]
    fn test_open_without_group_is_noop() {
        let (mut core, _) = core_with(10);
        assert!(core.open(BUS, "").is_empty());
        assert!(core.open("", "deviceA").is_empty());
        assert_eq!(core.state(), SessionState::Idle);
    }

    #[test]
    fn test_open_other_group_tears_down_first() {
        let (mut core, recorder) = connected_core(10);
        core.handle_event(heartbeat("ok"));
        recorder.take_updates();

        let actions = core.open(BUS, "deviceB");

        assert_eq!(
            actions,
            vec![
                SessionAction::StopHeartbeatTimer,
                SessionAction::StopTransport,
                SessionAction::Connect {
                    bus_url: BUS.to_string()
                },
            ]
        );
        assert_eq!(core.connection_id(), None);
        assert_eq!(
            recorder.updates(),
            vec![
                StateUpdate::Liveness(false),
                StateUpdate::ConnectionId(None)
            ]
        );
        assert_eq!(
            core.target().map(|t| t.group_name.as_str()),
            Some("deviceB")
        );
    }

    #[test]
    fn test_close_releases_everything_once() {
        let (mut core, recorder) = connected_core(10);

        let actions = core.close();
        assert_eq!(
            actions,
            vec![
                SessionAction::StopHeartbeatTimer,
                SessionAction::StopTransport
            ]
        );
        assert_eq!(core.state(), SessionState::Closed);
        assert_eq!(core.connection_id(), None);
        assert!(recorder.updates().is_empty());

        assert!(core.close().is_empty());
    }

    #[test]
    fn test_closed_session_ignores_everything() {
        let (mut core, recorder) = connected_core(10);
        core.close();

        assert!(core.open(BUS, "deviceB").is_empty());
        assert!(core.handle_event(heartbeat("ok")).is_empty());
        assert!(core
            .handle_event(envelope(InboundEnvelope::broadcast("log", json!("late"))))
            .is_empty());
        assert!(core.on_tick().is_empty());
        assert!(core.prepare_request("refresh", json!("null"), None).is_none());

        assert!(recorder.updates().is_empty());
        assert_eq!(core.state(), SessionState::Closed);
    }

    #[test]
    fn test_connect_failure_allows_retry() {
        let (mut core, _) = core_with(10);
        core.open(BUS, "deviceA");
        core.connect_failed("bad url");

        assert_eq!(core.state(), SessionState::Idle);
        assert_eq!(core.open(BUS, "deviceA").len(), 1);
    }

    // ------------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------------

    #[test]
    fn test_connected_joins_and_announces() {
        let (mut core, recorder) = core_with(10);
        core.open(BUS, "deviceA");

        let actions = core.handle_event(TransportEvent::Connected {
            connection_id: "c1".to_string(),
        });

        assert_eq!(
            actions,
            vec![
                SessionAction::JoinGroup {
                    group: "deviceA".to_string()
                },
                SessionAction::Send {
                    group: "deviceA".to_string(),
                    request: OutboundRequest::new(
                        "heartbeat",
                        json!("I am here"),
                        Some("c1".to_string())
                    ),
                },
                SessionAction::StartHeartbeatTimer,
            ]
        );
        assert_eq!(
            recorder.updates(),
            vec![StateUpdate::ConnectionId(Some("c1".to_string()))]
        );
        assert_eq!(core.state(), SessionState::Live);
        assert!(!core.is_live());
        assert_eq!(core.countdown_remaining(), Some(10));
    }

    #[test]
    fn test_reconnected_rejoins_with_new_id() {
        let (mut core, recorder) = connected_core(10);
        core.handle_event(TransportEvent::Disconnected { reason: None });
        recorder.take_updates();

        let actions = core.handle_event(TransportEvent::Reconnected {
            connection_id: "c2".to_string(),
        });

        assert!(actions.contains(&SessionAction::JoinGroup {
            group: "deviceA".to_string()
        }));
        assert_eq!(core.connection_id(), Some("c2"));
        assert_eq!(
            recorder.updates(),
            vec![StateUpdate::ConnectionId(Some("c2".to_string()))]
        );
    }

    #[test]
    fn test_disconnect_clears_id_and_liveness() {
        let (mut core, recorder) = connected_core(10);
        core.handle_event(heartbeat("ok"));
        recorder.take_updates();

        let actions = core.handle_event(TransportEvent::Disconnected {
            reason: Some("network".to_string()),
        });

        assert_eq!(actions, vec![SessionAction::StopHeartbeatTimer]);
        assert_eq!(core.state(), SessionState::Idle);
        assert_eq!(core.connection_id(), None);
        assert!(!core.is_live());
        assert_eq!(
            recorder.updates(),
            vec![
                StateUpdate::Liveness(false),
                StateUpdate::ConnectionId(None)
            ]
        );
        assert!(core.prepare_request("refresh", json!("null"), None).is_none());
    }

    #[test]
    fn test_transport_error_changes_nothing() {
        let (mut core, recorder) = connected_core(10);
        let actions = core.handle_event(TransportEvent::Error("ack rejected".to_string()));
        assert!(actions.is_empty());
        assert_eq!(core.state(), SessionState::Live);
        assert!(recorder.updates().is_empty());
    }

    #[test]
    fn test_events_before_open_are_ignored() {
        let (mut core, recorder) = core_with(10);
        assert!(core
            .handle_event(TransportEvent::Connected {
                connection_id: "c1".to_string()
            })
            .is_empty());
        assert!(recorder.updates().is_empty());
    }

    // ------------------------------------------------------------------------
    // Heartbeat
    // ------------------------------------------------------------------------

    #[test]
    fn test_heartbeat_sets_live_and_resets_countdown() {
        let (mut core, recorder) = connected_core(5);
        core.on_tick();
        core.on_tick();
        assert_eq!(core.countdown_remaining(), Some(3));

        let actions = core.handle_event(heartbeat("ok"));

        assert_eq!(actions, vec![SessionAction::StartHeartbeatTimer]);
        assert!(core.is_live());
        assert_eq!(core.countdown_remaining(), Some(5));
        assert_eq!(recorder.updates(), vec![StateUpdate::Liveness(true)]);
    }

    #[test]
    fn test_heartbeat_probe_is_answered() {
        let (mut core, _) = connected_core(10);

        let actions = core.handle_event(heartbeat(HEARTBEAT_PROBE));

        assert_eq!(
            actions,
            vec![
                SessionAction::StartHeartbeatTimer,
                SessionAction::Send {
                    group: "deviceA".to_string(),
                    request: OutboundRequest::new(
                        "heartbeat",
                        json!("I am here"),
                        Some("c1".to_string())
                    ),
                },
            ]
        );
    }

    #[test]
    fn test_liveness_published_only_on_change() {
        let (mut core, recorder) = connected_core(10);
        core.handle_event(heartbeat("ok"));
        core.handle_event(heartbeat("ok"));
        core.handle_event(heartbeat("ok"));

        assert_eq!(recorder.updates(), vec![StateUpdate::Liveness(true)]);
    }

    #[test]
    fn test_timeout_after_window() {
        let (mut core, recorder) = connected_core(3);
        core.handle_event(heartbeat("ok"));
        recorder.take_updates();

        assert!(core.on_tick().is_empty());
        assert!(core.on_tick().is_empty());
        assert!(core.is_live());

        let actions = core.on_tick();

        assert_eq!(actions, vec![SessionAction::StopHeartbeatTimer]);
        assert!(!core.is_live());
        assert_eq!(core.state(), SessionState::Degraded);
        assert_eq!(recorder.updates(), vec![StateUpdate::Liveness(false)]);
        // Connection id survives a heartbeat timeout
        assert_eq!(core.connection_id(), Some("c1"));
        assert_eq!(core.countdown_remaining(), None);
    }

    #[test]
    fn test_heartbeat_after_timeout_restarts_timer() {
        let (mut core, _) = connected_core(1);
        core.on_tick();
        assert_eq!(core.state(), SessionState::Degraded);

        let actions = core.handle_event(heartbeat("ok"));

        assert_eq!(actions, vec![SessionAction::StartHeartbeatTimer]);
        assert_eq!(core.state(), SessionState::Live);
        assert!(core.is_live());
    }

    #[test]
    fn test_heartbeat_while_disconnected_is_ignored() {
        let (mut core, recorder) = connected_core(10);
        core.handle_event(TransportEvent::Disconnected { reason: None });
        recorder.take_updates();

        let actions = core.handle_event(heartbeat("ok"));

        assert!(actions.is_empty());
        assert_eq!(core.state(), SessionState::Idle);
        assert!(!core.is_live());
        assert_eq!(core.countdown_remaining(), None);
        assert!(recorder.updates().is_empty());

        let actions = core.handle_event(envelope(InboundEnvelope::broadcast(
            "gpio_state",
            json!({"17": "on"}),
        )));
        assert!(actions.is_empty());
        assert!(recorder.updates().is_empty());
    }

    #[test]
    fn test_tick_without_countdown_is_noop() {
        let (mut core, recorder) = core_with(10);
        assert!(core.on_tick().is_empty());
        assert!(recorder.updates().is_empty());
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    #[test]
    fn test_broadcast_dispatch_to_slots() {
        let (mut core, recorder) = connected_core(10);

        core.handle_event(envelope(InboundEnvelope::broadcast(
            "gpio_state",
            json!({"17": "on"}),
        )));
        core.handle_event(envelope(InboundEnvelope::broadcast(
            "playing_time",
            json!(42),
        )));
        core.handle_event(envelope(InboundEnvelope::broadcast(
            "system_info",
            json!({"cpu": 3}),
        )));

        assert_eq!(
            recorder.updates(),
            vec![
                StateUpdate::GpioStates(json!({"17": "on"})),
                StateUpdate::PlayingTime(json!(42)),
                StateUpdate::SystemInfo(json!({"cpu": 3})),
            ]
        );
    }

    #[test]
    fn test_message_addressed_elsewhere_is_dropped() {
        let (mut core, recorder) = connected_core(10);

        core.handle_event(envelope(InboundEnvelope::addressed(
            "gpio_state",
            json!({}),
            "someone-else",
        )));
        core.handle_event(envelope(InboundEnvelope::addressed(
            "sequence",
            json!([]),
            "c1",
        )));

        assert_eq!(recorder.updates(), vec![StateUpdate::Sequence(json!([]))]);
    }

    #[test]
    fn test_malformed_and_unknown_messages_dropped() {
        let (mut core, recorder) = connected_core(10);

        core.handle_event(TransportEvent::GroupMessage(json!("not an envelope")));
        core.handle_event(TransportEvent::GroupMessage(json!({"body": 1})));
        core.handle_event(envelope(InboundEnvelope::broadcast(
            "firmware_update",
            json!({}),
        )));

        assert!(recorder.updates().is_empty());
        assert_eq!(core.state(), SessionState::Live);
    }

    #[test]
    fn test_log_appends_and_notifies() {
        let (mut core, recorder) = connected_core(10);

        core.handle_event(envelope(InboundEnvelope::broadcast(
            "log",
            json!({"message": "Relay stuck", "level": "error"}),
        )));
        core.handle_event(envelope(InboundEnvelope::broadcast("log", json!("plain"))));

        assert_eq!(
            recorder.updates(),
            vec![
                StateUpdate::LogAppended(LogEntry::new(
                    json!({"message": "Relay stuck", "level": "error"})
                )),
                StateUpdate::LogAppended(LogEntry::new(json!("plain"))),
            ]
        );
        assert_eq!(
            recorder.notifications(),
            vec![("Relay stuck".to_string(), NotificationLevel::Error)]
        );
    }

    #[test]
    fn test_identical_schedules_get_new_revisions() {
        let (mut core, recorder) = connected_core(10);
        let schedule = || {
            envelope(InboundEnvelope::broadcast(
                "current_schedule",
                json!("08:00 start"),
            ))
        };

        core.handle_event(schedule());
        core.handle_event(schedule());

        let revisions: Vec<u64> = recorder
            .updates()
            .into_iter()
            .filter_map(|update| match update {
                StateUpdate::Schedule(snapshot) => {
                    assert_eq!(snapshot.body, json!("08:00 start"));
                    Some(snapshot.revision)
                }
                _ => None,
            })
            .collect();
        assert_eq!(revisions, vec![1, 2]);
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    #[test]
    fn test_request_carries_own_connection_id() {
        let (core, _) = connected_core(10);

        let action = core.prepare_request("refresh", json!("null"), None);

        assert_eq!(
            action,
            Some(SessionAction::Send {
                group: "deviceA".to_string(),
                request: OutboundRequest::new("refresh", json!("null"), Some("c1".to_string())),
            })
        );
    }

    #[test]
    fn test_request_connection_id_override() {
        let (core, _) = connected_core(10);

        let action = core.prepare_request("refresh", json!("null"), Some("other".to_string()));

        match action {
            Some(SessionAction::Send { request, .. }) => {
                assert_eq!(request.connection_id.as_deref(), Some("other"))
            }
            other => panic!("Expected send, got {other:?}"),
        }
    }

    #[test]
    fn test_request_before_connect_is_dropped() {
        let (mut core, _) = core_with(10);
        core.open(BUS, "deviceA");
        assert!(core.prepare_request("refresh", json!("null"), None).is_none());
    }
}
