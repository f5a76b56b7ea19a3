//! Dunebugger - command line dashboard for remote Dunebugger devices
//!
//! # Usage
//!
//! ```text
//! dunebugger watch                 # Stream device state as text
//! dunebugger watch --json          # One JSON state update per line
//! dunebugger send start            # Send a command and exit
//! dunebugger send "switch 17 on"
//! dunebugger devices               # List configured devices
//! ```
//!
//! Logs go to stderr and are controlled with `RUST_LOG`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use dunebugger_client::transport::WebPubSubTransportFactory;
use dunebugger_client::{
    ChannelSink, ClientConfig, ClientError, DeviceSwitcher, Notifier, SessionClient,
    SessionState, StateSink, TracingNotifier,
};
use dunebugger_core::{DashboardState, StateUpdate};
use dunebugger_protocol::DeviceCommand;

// ============================================================================
// CLI Arguments
// ============================================================================

/// Dunebugger - watch and control Dunebugger devices
#[derive(Parser, Debug)]
#[command(name = "dunebugger")]
#[command(about = "Watch and control Dunebugger devices over Web PubSub")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: $XDG_CONFIG_HOME/dunebugger/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Web PubSub client access URL
    #[arg(long, global = true)]
    bus_url: Option<String>,

    /// Comma separated device groups
    #[arg(long, global = true)]
    devices: Option<String>,

    /// Device to use (default: first configured device)
    #[arg(long, short = 'd', global = true)]
    device: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream device state until interrupted
    Watch {
        /// Print each update as a JSON line
        #[arg(long)]
        json: bool,
    },
    /// Send one command to the device
    Send {
        /// start, stop, start-button-on|off, random-on|off, off, standby,
        /// "switch <pin> on|off", refresh, system-info
        command: String,

        /// Seconds to wait for the bus connection
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
    /// List configured devices
    Devices,
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("dunebugger=info".parse()?)
                .add_directive("dunebugger_client=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = ClientConfig::load(args.config.as_deref())?;
    if let Some(url) = &args.bus_url {
        config.set_bus_url(url.as_str());
    }
    if let Some(devices) = &args.devices {
        config.set_devices(devices);
    }

    match args.command {
        Command::Devices => {
            list_devices(&config);
            Ok(())
        }
        Command::Watch { json } => {
            config.validate()?;
            watch(&config, args.device.as_deref(), json).await
        }
        Command::Send { command, timeout } => {
            config.validate()?;
            let command: DeviceCommand = command.parse()?;
            send(&config, args.device.as_deref(), &command, Duration::from_secs(timeout)).await
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

fn list_devices(config: &ClientConfig) {
    let devices = config.devices();
    if devices.is_empty() {
        println!("No devices configured");
        return;
    }
    for (index, device) in devices.iter().enumerate() {
        let marker = if index == 0 { " (default)" } else { "" };
        println!("{device}{marker}");
    }
}

fn bus_url(config: &ClientConfig) -> Result<&str> {
    config.bus_url.as_deref().context("bus_url is not configured")
}

async fn watch(config: &ClientConfig, device: Option<&str>, json: bool) -> Result<()> {
    let (sink, mut updates) = ChannelSink::channel();
    let sink: Arc<dyn StateSink> = Arc::new(sink);
    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let transports = Arc::new(WebPubSubTransportFactory::new(config.reconnect_policy()));

    let mut switcher = DeviceSwitcher::new(
        bus_url(config)?,
        config.devices(),
        config.session_config(),
        transports,
        sink,
        Some(notifier),
    );
    match device {
        Some(device) => switcher.switch_to(device).await?,
        None => switcher.select_default().await?,
    };
    info!(device = switcher.current_device(), "Watching device");

    let mut state = DashboardState::with_log_capacity(config.log_capacity);
    let mut session_state = switcher.client().map(SessionClient::watch_state);

    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                print_update(&update, json)?;
                let is_sequence = matches!(update, StateUpdate::Sequence(_));
                state.apply(update);
                if is_sequence && !json {
                    print_sequence_summary(&state);
                }
            }
            changed = next_state_change(&mut session_state) => {
                match changed {
                    Some(session) if !json => println!("session {session}"),
                    Some(session) => debug!(%session, "Session state changed"),
                    None => session_state = None,
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "Error waiting for shutdown signal");
                }
                break;
            }
        }
    }

    switcher.shutdown().await;
    debug!(logs = state.logs.len(), "Watch finished");
    Ok(())
}

async fn send(
    config: &ClientConfig,
    device: Option<&str>,
    command: &DeviceCommand,
    timeout: Duration,
) -> Result<()> {
    let devices = config.devices();
    let device = match device {
        Some(device) => devices.resolve(device)?,
        None => devices.default_device()?,
    };

    let sink: Arc<dyn StateSink> = Arc::new(|update: StateUpdate| {
        debug!(slot = update.slot(), "Ignoring update while sending");
    });
    let transports = Arc::new(WebPubSubTransportFactory::new(config.reconnect_policy()));
    let client = SessionClient::spawn(config.session_config(), transports, sink, None);
    client.open(bus_url(config)?, device);

    let connected = tokio::time::timeout(timeout, client.connected()).await;
    if !matches!(connected, Ok(true)) {
        client.close();
        client.closed().await;
        return Err(ClientError::Timeout(format!(
            "the bus connection ({}s)",
            timeout.as_secs()
        ))
        .into());
    }

    client.send_command(command);
    info!(%device, %command, "Command sent");

    client.close();
    client.closed().await;
    Ok(())
}

/// Next session state, pending forever once the session is gone.
async fn next_state_change(
    state: &mut Option<watch::Receiver<SessionState>>,
) -> Option<SessionState> {
    match state {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

// ============================================================================
// Output
// ============================================================================

fn print_update(update: &StateUpdate, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(update)?);
    } else {
        println!("{}", describe(update));
    }
    Ok(())
}

fn describe(update: &StateUpdate) -> String {
    match update {
        StateUpdate::ConnectionId(Some(id)) => format!("connected as {id}"),
        StateUpdate::ConnectionId(None) => "disconnected".to_string(),
        StateUpdate::Liveness(true) => "device online".to_string(),
        StateUpdate::Liveness(false) => "device offline".to_string(),
        StateUpdate::LogAppended(entry) => format!("log: {}", entry.text()),
        StateUpdate::Schedule(snapshot) => format!(
            "schedule (rev {}): {}",
            snapshot.revision,
            compact(&snapshot.body)
        ),
        StateUpdate::GpioStates(value)
        | StateUpdate::SequenceState(value)
        | StateUpdate::Sequence(value)
        | StateUpdate::NextActions(value)
        | StateUpdate::LastExecutedAction(value)
        | StateUpdate::PlayingTime(value)
        | StateUpdate::SystemInfo(value) => format!("{}: {}", update.slot(), compact(value)),
    }
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn print_sequence_summary(state: &DashboardState) {
    match state.sequence_analysis() {
        Some(Ok(analysis)) => {
            println!(
                "sequence: {} events over {}s, {} switches, {} dmx effects",
                analysis.events.len(),
                analysis.total_time,
                analysis.lanes.len(),
                analysis.dmx_effects.len()
            );
            for effect in analysis.overflowing_effects() {
                println!(
                    "  {} {} at {}s runs {}s past the end",
                    effect.action,
                    effect.parameter,
                    effect.start,
                    effect.overflow(analysis.total_time)
                );
            }
        }
        Some(Err(e)) => debug!(error = %e, "Sequence not analysable"),
        None => {}
    }
}

// ============================================================================
// Signals
// ============================================================================

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dunebugger_core::LogEntry;
    use serde_json::json;

    #[test]
    fn test_args_parse_send() {
        let args = Args::parse_from(["dunebugger", "--device", "shop-b", "send", "switch 17 on"]);
        assert_eq!(args.device.as_deref(), Some("shop-b"));
        match args.command {
            Command::Send { command, timeout } => {
                assert_eq!(command, "switch 17 on");
                assert_eq!(timeout, 10);
            }
            other => panic!("Expected send, got {other:?}"),
        }
    }

    #[test]
    fn test_args_parse_watch_json() {
        let args = Args::parse_from(["dunebugger", "watch", "--json"]);
        assert!(matches!(args.command, Command::Watch { json: true }));
    }

    #[tokio::test]
    async fn test_next_state_change_follows_session() {
        let (tx, rx) = watch::channel(SessionState::Idle);
        let mut state = Some(rx);

        tx.send_replace(SessionState::Live);
        assert_eq!(next_state_change(&mut state).await, Some(SessionState::Live));

        drop(tx);
        assert_eq!(next_state_change(&mut state).await, None);
    }

    #[test]
    fn test_describe_updates() {
        assert_eq!(
            describe(&StateUpdate::ConnectionId(Some("c1".to_string()))),
            "connected as c1"
        );
        assert_eq!(describe(&StateUpdate::Liveness(false)), "device offline");
        assert_eq!(
            describe(&StateUpdate::LogAppended(LogEntry::new(
                json!({"message": "Cycle started", "level": "info"})
            ))),
            "log: Cycle started"
        );
        assert_eq!(
            describe(&StateUpdate::PlayingTime(json!(42))),
            "playing_time: 42"
        );
    }
}
