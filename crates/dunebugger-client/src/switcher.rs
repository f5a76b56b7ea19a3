//! Device selection.
//!
//! A user may own several devices but watches one at a time. Switching
//! fully closes the current session before a new one is opened for the
//! next device, so no update from the old group reaches the sink once the
//! switch has returned.

use std::sync::Arc;

use dunebugger_core::DeviceList;
use tracing::info;

use crate::error::Result;
use crate::session::{SessionClient, SessionConfig};
use crate::sink::{Notifier, StateSink};
use crate::transport::TransportFactory;

/// Owns the session for the currently selected device.
pub struct DeviceSwitcher {
    bus_url: String,
    devices: DeviceList,
    config: SessionConfig,
    transports: Arc<dyn TransportFactory>,
    sink: Arc<dyn StateSink>,
    notifier: Option<Arc<dyn Notifier>>,
    active: Option<(String, SessionClient)>,
}

impl DeviceSwitcher {
    pub fn new(
        bus_url: impl Into<String>,
        devices: DeviceList,
        config: SessionConfig,
        transports: Arc<dyn TransportFactory>,
        sink: Arc<dyn StateSink>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            bus_url: bus_url.into(),
            devices,
            config,
            transports,
            sink,
            notifier,
            active: None,
        }
    }

    pub fn devices(&self) -> &DeviceList {
        &self.devices
    }

    pub fn current_device(&self) -> Option<&str> {
        self.active.as_ref().map(|(device, _)| device.as_str())
    }

    /// Session for the current device.
    pub fn client(&self) -> Option<&SessionClient> {
        self.active.as_ref().map(|(_, client)| client)
    }

    /// Selects the first configured device.
    pub async fn select_default(&mut self) -> Result<bool> {
        let device = self.devices.default_device()?.to_string();
        self.switch_to(&device).await
    }

    /// Watches `device` from now on.
    ///
    /// Returns `Ok(false)` when `device` is already selected. On `Ok(true)`
    /// the previous session is closed and released, and callers holding a
    /// `DashboardState` should reset it.
    pub async fn switch_to(&mut self, device: &str) -> Result<bool> {
        let device = self.devices.resolve(device)?;

        if self.current_device() == Some(device) {
            return Ok(false);
        }

        if let Some((previous, client)) = self.active.take() {
            info!(from = %previous, to = device, "Switching device");
            client.close();
            client.closed().await;
        }

        let client = SessionClient::spawn(
            self.config,
            self.transports.clone(),
            self.sink.clone(),
            self.notifier.clone(),
        );
        client.open(self.bus_url.as_str(), device);
        self.active = Some((device.to_string(), client));
        Ok(true)
    }

    /// Closes the current session, if any, and waits for it to finish.
    pub async fn shutdown(&mut self) {
        if let Some((device, client)) = self.active.take() {
            info!(%device, "Closing device session");
            client.close();
            client.closed().await;
        }
    }
}
