//! Discovery-driven link management
//!
//! The bridge keeps one steady-state link per discovered device: a link is
//! opened when discovery reports a device, shut down when discovery reports
//! it removed, and reopened if it ended on its own while the device is still
//! known.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sensor_detect::{
    ChannelListener, DiscoveredDevice, DiscoveryEvent, DiscoveryService, PortRegistry,
    PortTransport,
};
use sensor_link::{connect, ChannelHandler, LinkError, SensorLinkHandle};
use sensor_protocol::SensorEvent;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::settings::Settings;

type Reading = (String, SensorEvent);

/// Owns the links of all discovered devices
pub struct Bridge<T: PortTransport> {
    transport: Arc<T>,
    registry: PortRegistry,
    settings: Settings,
    links: HashMap<String, SensorLinkHandle>,
    readings_tx: mpsc::UnboundedSender<Reading>,
    readings_rx: mpsc::UnboundedReceiver<Reading>,
}

impl<T: PortTransport> Bridge<T> {
    pub fn new(transport: Arc<T>, settings: Settings) -> Self {
        let (readings_tx, readings_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            registry: PortRegistry::new(),
            settings,
            links: HashMap::new(),
            readings_tx,
            readings_rx,
        }
    }

    /// Ports with a running link
    pub fn linked_ports(&self) -> Vec<String> {
        let mut ports: Vec<_> = self
            .links
            .iter()
            .filter(|(_, link)| !link.is_finished())
            .map(|(port, _)| port.clone())
            .collect();
        ports.sort();
        ports
    }

    /// Run until `shutdown` completes
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        tokio::pin!(shutdown);

        if let Some(port) = self.settings.port.clone() {
            info!("Linking configured port {}, discovery disabled", port);
            self.open_link(&port)?;
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    Some((port, reading)) = self.readings_rx.recv() => log_reading(&port, reading),
                }
            }
            self.close_all().await;
            return Ok(());
        }

        let (listener, mut events) = ChannelListener::new();
        let service = Arc::new(DiscoveryService::new(
            self.transport.clone(),
            self.registry.clone(),
            self.settings.discovery.clone(),
            self.settings.supported_types.clone(),
            Arc::new(listener),
        ));
        service.start_background();

        let period = Duration::from_millis(self.settings.discovery.scan_interval_ms.max(1));
        let mut reconcile = interval_at(Instant::now() + period, period);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(event) = events.recv() => self.on_discovery_event(event).await,
                Some((port, reading)) = self.readings_rx.recv() => log_reading(&port, reading),
                _ = reconcile.tick() => match service.try_known_devices() {
                    Some(known) => self.reconcile(&known).await,
                    None => debug!("Discovery round in progress, skipping reconcile"),
                },
            }
        }

        info!("Shutting down");
        service.stop_background().await;
        self.close_all().await;
        Ok(())
    }

    /// Apply one discovery notification
    pub async fn on_discovery_event(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::DeviceFound(device) => {
                info!("{} found on {} ({})", device.label, device.port, device.uid());
                self.ensure_link(&device).await;
            }
            DiscoveryEvent::DeviceRemoved { port, type_id } => {
                info!("{} removed from {}", type_id, port);
                if let Some(link) = self.links.remove(&port) {
                    close(link).await;
                }
            }
        }
    }

    /// Drop links that ended and reopen links for devices still known
    pub async fn reconcile(&mut self, known: &[DiscoveredDevice]) {
        let ended: Vec<String> = self
            .links
            .iter()
            .filter(|(_, link)| link.is_finished())
            .map(|(port, _)| port.clone())
            .collect();
        for port in ended {
            if let Some(link) = self.links.remove(&port) {
                close(link).await;
            }
        }

        for device in known {
            self.ensure_link(device).await;
        }
        debug!("Linked ports: {:?}", self.linked_ports());
    }

    async fn ensure_link(&mut self, device: &DiscoveredDevice) {
        if let Some(link) = self.links.get(&device.port) {
            if !link.is_finished() {
                return;
            }
        }
        if let Some(stale) = self.links.remove(&device.port) {
            close(stale).await;
        }
        if let Err(e) = self.open_link(&device.port) {
            warn!("Failed to open link to {}: {}", device.port, e);
        }
    }

    fn open_link(&mut self, port: &str) -> Result<(), LinkError> {
        let handler = ChannelHandler::with_sender(port, self.readings_tx.clone());
        let link = connect(
            self.transport.as_ref(),
            &self.registry,
            Some(port),
            &[],
            Arc::new(handler),
            self.settings.link.clone(),
        )?;
        self.links.insert(link.port().to_string(), link);
        Ok(())
    }

    async fn close_all(&mut self) {
        for (_, link) in self.links.drain() {
            close(link).await;
        }
    }
}

async fn close(link: SensorLinkHandle) {
    let port = link.port().to_string();
    match link.shutdown().await {
        Ok(()) => debug!("Link to {} closed", port),
        Err(LinkError::Closed) => debug!("Link to {} had already ended", port),
        Err(e) => warn!("Link to {} ended with error: {}", port, e),
    }
}

fn log_reading(port: &str, reading: SensorEvent) {
    match reading {
        SensorEvent::Brightness(v) => info!("{}: brightness {}", port, v),
        SensorEvent::Temperature(v) => info!("{}: temperature {}", port, v),
        SensorEvent::Humidity(v) => info!("{}: humidity {}", port, v),
        SensorEvent::Doorbell(true) => info!("{}: doorbell pressed", port),
        SensorEvent::Doorbell(false) => info!("{}: doorbell released", port),
    }
}
