//! Outputs of the session client: state slots and user notifications.
//!
//! Both are injected by the owner. Closures implement the traits directly,
//! so a test can pass `|update| ...` where a sink is expected.

use dunebugger_core::{NotificationLevel, StateUpdate};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Receives every state update produced by a session.
pub trait StateSink: Send + Sync {
    fn publish(&self, update: StateUpdate);
}

impl<F> StateSink for F
where
    F: Fn(StateUpdate) + Send + Sync,
{
    fn publish(&self, update: StateUpdate) {
        self(update)
    }
}

/// Shows transient notifications to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, level: NotificationLevel);
}

impl<F> Notifier for F
where
    F: Fn(&str, NotificationLevel) + Send + Sync,
{
    fn notify(&self, message: &str, level: NotificationLevel) {
        self(message, level)
    }
}

/// Forwards state updates into an unbounded channel.
///
/// Updates published after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StateUpdate>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<StateUpdate>) -> Self {
        Self { tx }
    }

    /// Creates a sink together with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StateUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl StateSink for ChannelSink {
    fn publish(&self, update: StateUpdate) {
        if self.tx.send(update).is_err() {
            debug!("State receiver dropped, discarding update");
        }
    }
}

/// Notifier that writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str, level: NotificationLevel) {
        match level {
            NotificationLevel::Error => error!(notification = message, "Device notification"),
            NotificationLevel::Warning => warn!(notification = message, "Device notification"),
            NotificationLevel::Info | NotificationLevel::Success => {
                info!(notification = message, %level, "Device notification")
            }
        }
    }
}
