//! Session client: one logical connection to a device group.
//!
//! [`SessionClient`] is a cheap handle. The work happens in a
//! `SessionActor` task that owns a [`SessionCore`] and serializes owner
//! commands, transport events and heartbeat ticks. Commands are
//! fire-and-forget; the resulting state flows out through the injected
//! [`StateSink`].
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

mod machine;

use std::sync::Arc;
use std::time::Duration;

use dunebugger_protocol::DeviceCommand;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::sink::{Notifier, StateSink};
use crate::transport::{Transport, TransportEvent, TransportFactory};

pub use self::machine::{SessionAction, SessionCore, SessionState, SessionTarget};

/// Default heartbeat window.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default countdown tick.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Configuration
// ============================================================================

/// Timing of the heartbeat countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long the device may stay silent before it is considered offline.
    pub heartbeat_timeout: Duration,

    /// Period of the countdown tick.
    pub tick_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug)]
enum SessionCommand {
    Open {
        bus_url: String,
        group_name: String,
    },
    SendRequest {
        subject: String,
        body: Value,
        connection_id: Option<String>,
    },
    Close,
}

// ============================================================================
// Session Client Handle
// ============================================================================

/// Handle to a running session.
///
/// Dropping the last handle closes the session.
pub struct SessionClient {
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<SessionState>,
}

impl SessionClient {
    /// Spawns the session actor on the current runtime.
    ///
    /// The session starts `Idle`; call [`open`](Self::open) to connect.
    pub fn spawn(
        config: SessionConfig,
        transports: Arc<dyn TransportFactory>,
        sink: Arc<dyn StateSink>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let actor = SessionActor {
            core: SessionCore::new(config, sink, notifier),
            tick_interval: config.tick_interval,
            commands: command_rx,
            transports,
            transport: None,
            events: None,
            ticker: None,
            state: state_tx,
        };
        tokio::spawn(actor.run());

        Self {
            commands: command_tx,
            state: state_rx,
        }
    }

    /// Connects to `bus_url` and joins `group_name`.
    ///
    /// Re-opening the current pair is a no-op; a different pair replaces the
    /// current connection. Ignored once closed.
    pub fn open(&self, bus_url: impl Into<String>, group_name: impl Into<String>) {
        self.submit(SessionCommand::Open {
            bus_url: bus_url.into(),
            group_name: group_name.into(),
        });
    }

    /// Sends `{subject, body, connectionId}` to the device group.
    ///
    /// `connection_id` defaults to this session's id. Dropped with a
    /// warning when no transport is connected.
    pub fn send_request(
        &self,
        subject: impl Into<String>,
        body: Value,
        connection_id: Option<String>,
    ) {
        self.submit(SessionCommand::SendRequest {
            subject: subject.into(),
            body,
            connection_id,
        });
    }

    /// Sends a device command.
    pub fn send_command(&self, command: &DeviceCommand) {
        self.send_request(command.subject(), command.body(), None);
    }

    /// Closes the session. Idempotent.
    ///
    /// Returns immediately; use [`closed`](Self::closed) to wait until the
    /// transport and timer are released.
    pub fn close(&self) {
        self.submit(SessionCommand::Close);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Waits until the session is closed and its resources released.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // An error means the actor is gone, which is closed as well.
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }

    /// Waits until the bus connection is up.
    ///
    /// Returns false if the session closes first.
    pub async fn connected(&self) -> bool {
        let mut state = self.state.clone();
        let connected = state
            .wait_for(|s| s.is_connected() || *s == SessionState::Closed)
            .await
            .map(|s| s.is_connected())
            .unwrap_or(false);
        connected
    }

    fn submit(&self, command: SessionCommand) {
        if self.commands.send(command).is_err() {
            debug!("Session actor stopped, command discarded");
        }
    }
}

// ============================================================================
// Session Actor
// ============================================================================

/// Owns the session state and performs the core's actions.
struct SessionActor {
    core: SessionCore,
    tick_interval: Duration,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    transports: Arc<dyn TransportFactory>,
    transport: Option<Arc<dyn Transport>>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    ticker: Option<Interval>,
    state: watch::Sender<SessionState>,
}

impl SessionActor {
    async fn run(mut self) {
        debug!("Session actor started");

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    match command {
                        Some(SessionCommand::Open { bus_url, group_name }) => {
                            let actions = self.core.open(&bus_url, &group_name);
                            self.perform(actions).await;
                        }
                        Some(SessionCommand::SendRequest { subject, body, connection_id }) => {
                            if let Some(action) = self.core.prepare_request(&subject, body, connection_id) {
                                self.perform(vec![action]).await;
                            }
                        }
                        Some(SessionCommand::Close) | None => {
                            let actions = self.core.close();
                            self.perform(actions).await;
                            self.publish_state();
                            break;
                        }
                    }
                }

                event = next_event(&mut self.events) => {
                    match event {
                        Some(event) => {
                            let actions = self.core.handle_event(event);
                            self.perform(actions).await;
                        }
                        None => {
                            debug!("Transport event stream ended");
                            self.events = None;
                        }
                    }
                }

                _ = next_tick(&mut self.ticker) => {
                    let actions = self.core.on_tick();
                    self.perform(actions).await;
                }
            }

            self.publish_state();
        }

        info!("Session actor stopped");
    }

    async fn perform(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Connect { bus_url } => match self.transports.connect(&bus_url) {
                    Ok(link) => {
                        self.transport = Some(link.transport);
                        self.events = Some(link.events);
                    }
                    Err(e) => self.core.connect_failed(&e.to_string()),
                },
                SessionAction::JoinGroup { group } => {
                    if let Some(transport) = &self.transport {
                        if let Err(e) = transport.join_group(&group).await {
                            warn!(%group, error = %e, "Failed to join group");
                        }
                    }
                }
                SessionAction::Send { group, request } => match &self.transport {
                    Some(transport) => {
                        if let Err(e) = transport.send_to_group(&group, &request).await {
                            warn!(
                                %group,
                                subject = %request.subject,
                                error = %e,
                                "Failed to send request"
                            );
                        }
                    }
                    None => warn!(subject = %request.subject, "Request dropped, no transport"),
                },
                SessionAction::StartHeartbeatTimer => {
                    let mut ticker =
                        interval_at(Instant::now() + self.tick_interval, self.tick_interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.ticker = Some(ticker);
                }
                SessionAction::StopHeartbeatTimer => {
                    self.ticker = None;
                }
                SessionAction::StopTransport => {
                    self.events = None;
                    if let Some(transport) = self.transport.take() {
                        transport.stop().await;
                    }
                }
            }
        }
    }

    fn publish_state(&self) {
        let state = self.core.state();
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(from = %current, to = %state, "Session state changed");
                *current = state;
                true
            }
        });
    }
}

/// Next event from the transport, pending forever while there is none.
async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Next heartbeat tick, pending forever while the timer is stopped.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
