//! Discovery rounds
//!
//! A round enumerates the host's ports, identifies every port that is free
//! right now (concurrently, one session per port), and compares the confirmed
//! devices with the previous round:
//!
//! - newly confirmed devices are reported as soon as their identification
//!   completes
//! - devices from the previous round that were probed again (or vanished from
//!   enumeration) without confirming are reported as removed once every probe
//!   has finished
//! - devices on ports that could not be probed this round (owned by a link,
//!   failed to open, or known to the listener) are kept as they were
//!
//! Rounds are serialized: a foreground [`DiscoveryService::scan`] and the
//! background task never run at the same time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

use crate::device::{DiscoveredDevice, SupportedTypes};
use crate::error::DetectError;
use crate::identify::{IdentifyConfig, IdentifyOutcome, Identifier};
use crate::registry::PortRegistry;
use crate::transport::{PortTransport, SerialSettings};

/// Receiver of discovery results
pub trait DiscoveryListener: Send + Sync {
    /// A device was confirmed on a port it was not known on before
    fn on_device_found(&self, device: &DiscoveredDevice);

    /// A previously discovered device is gone
    fn on_device_removed(&self, port: &str, type_id: &str);

    /// Ports reported here are not probed; a device already discovered there
    /// is kept
    fn is_already_known(&self, _port: &str) -> bool {
        false
    }
}

/// Discovery notification as a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// See [`DiscoveryListener::on_device_found`]
    DeviceFound(DiscoveredDevice),
    /// See [`DiscoveryListener::on_device_removed`]
    DeviceRemoved { port: String, type_id: String },
}

/// Listener that forwards notifications into a channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<DiscoveryEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DiscoveryListener for ChannelListener {
    fn on_device_found(&self, device: &DiscoveredDevice) {
        let _ = self.tx.send(DiscoveryEvent::DeviceFound(device.clone()));
    }

    fn on_device_removed(&self, port: &str, type_id: &str) {
        let _ = self.tx.send(DiscoveryEvent::DeviceRemoved {
            port: port.to_string(),
            type_id: type_id.to_string(),
        });
    }
}

/// Discovery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Delay before the first background round (milliseconds)
    pub initial_delay_ms: u64,
    /// Delay between the end of one background round and the next
    /// (milliseconds)
    pub scan_interval_ms: u64,
    /// Identification timing
    #[serde(default)]
    pub identify: IdentifyConfig,
    /// Line settings used while probing
    #[serde(default)]
    pub serial: SerialSettings,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 15_000,
            scan_interval_ms: 10_000,
            identify: IdentifyConfig::default(),
            serial: SerialSettings::default(),
        }
    }
}

/// What one round changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Devices reported as found
    pub added: Vec<DiscoveredDevice>,
    /// Devices reported as removed
    pub removed: Vec<DiscoveredDevice>,
    /// Ports skipped because they could not be probed
    pub unavailable: Vec<String>,
    /// Number of ports probed
    pub probed: usize,
}

impl ScanReport {
    /// Whether the round changed nothing
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Commands for the background discovery task
#[derive(Debug)]
enum DiscoveryTaskCommand {
    ScanNow,
    Shutdown,
}

struct BackgroundJob {
    cmd_tx: mpsc::Sender<DiscoveryTaskCommand>,
    handle: JoinHandle<()>,
}

/// Discovery service over a port transport
pub struct DiscoveryService<T: PortTransport> {
    transport: Arc<T>,
    registry: PortRegistry,
    identifier: Identifier,
    config: DiscoveryConfig,
    listener: Arc<dyn DiscoveryListener>,
    known: tokio::sync::Mutex<HashMap<String, DiscoveredDevice>>,
    background: Mutex<Option<BackgroundJob>>,
}

impl<T: PortTransport> DiscoveryService<T> {
    pub fn new(
        transport: Arc<T>,
        registry: PortRegistry,
        config: DiscoveryConfig,
        supported: SupportedTypes,
        listener: Arc<dyn DiscoveryListener>,
    ) -> Self {
        Self {
            transport,
            registry,
            identifier: Identifier::new(config.identify.clone(), supported),
            config,
            listener,
            known: tokio::sync::Mutex::new(HashMap::new()),
            background: Mutex::new(None),
        }
    }

    /// Port ownership table shared with steady-state links
    pub fn registry(&self) -> &PortRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Devices known after the last completed round
    pub async fn known_devices(&self) -> Vec<DiscoveredDevice> {
        let mut devices: Vec<_> = self.known.lock().await.values().cloned().collect();
        devices.sort_by(|a, b| a.port.cmp(&b.port));
        devices
    }

    /// Like [`known_devices`](Self::known_devices), but `None` while a round
    /// is in progress instead of waiting for it
    pub fn try_known_devices(&self) -> Option<Vec<DiscoveredDevice>> {
        let known = self.known.try_lock().ok()?;
        let mut devices: Vec<_> = known.values().cloned().collect();
        devices.sort_by(|a, b| a.port.cmp(&b.port));
        Some(devices)
    }

    /// Run one discovery round
    ///
    /// Waits for a round already in progress. Fails only if ports cannot be
    /// enumerated, in which case nothing changes.
    pub async fn scan(&self) -> Result<ScanReport, DetectError> {
        let mut known = self.known.lock().await;
        let previous = known.clone();

        let ports = self.transport.enumerate_ports()?;
        debug!(
            "Discovery round: {} port(s) visible, {} device(s) known",
            ports.len(),
            previous.len()
        );

        let mut report = ScanReport::default();
        let mut unavailable: HashSet<String> = HashSet::new();
        let mut pending: HashSet<String> = HashSet::new();
        let mut probes = JoinSet::new();

        for port in ports {
            if pending.contains(&port) || unavailable.contains(&port) {
                continue;
            }
            if self.listener.is_already_known(&port) {
                trace!("{}: already known to listener, not probing", port);
                unavailable.insert(port);
                continue;
            }
            let Some(lease) = self.registry.try_claim(&port) else {
                info!("{}: currently in use, ignoring", port);
                unavailable.insert(port);
                continue;
            };
            let mut stream = match self.transport.open(&port, &self.config.serial) {
                Ok(stream) => stream,
                Err(e) => {
                    info!("{}: not available ({}), ignoring", port, e);
                    unavailable.insert(port);
                    continue;
                }
            };

            debug!("{}: sending identification request", port);
            pending.insert(port.clone());
            let identifier = self.identifier.clone();
            probes.spawn(async move {
                let outcome = identifier.identify(&port, &mut stream).await;
                drop(stream);
                drop(lease);
                (port, outcome)
            });
        }
        report.probed = pending.len();

        let mut current: HashMap<String, DiscoveredDevice> = HashMap::new();

        while let Some(joined) = probes.join_next().await {
            let (port, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!("Identification task failed: {}", e);
                    continue;
                }
            };
            pending.remove(&port);

            match outcome {
                Ok(IdentifyOutcome::Identified(ty)) => {
                    let device = DiscoveredDevice::new(port.clone(), &ty);
                    let is_new = match previous.get(&port) {
                        Some(old) if old.type_id == device.type_id => false,
                        Some(old) => {
                            info!("{}: type changed from {}", port, old.type_id);
                            self.listener.on_device_removed(&old.port, &old.type_id);
                            report.removed.push(old.clone());
                            true
                        }
                        None => true,
                    };
                    if is_new {
                        info!("Device discovered: {} on {}", device.label, device.port);
                        self.listener.on_device_found(&device);
                        report.added.push(device.clone());
                    }
                    current.insert(port, device);
                }
                Ok(outcome) => debug!("{}: no supported device ({:?})", port, outcome),
                Err(e) => warn!("{}: identification failed: {}", port, e),
            }
        }

        // Ports whose probe task died give no evidence either way
        unavailable.extend(pending);

        for (port, old) in previous {
            if current.contains_key(&port) {
                continue;
            }
            if unavailable.contains(&port) {
                trace!("{}: keeping {} while port is unavailable", port, old.type_id);
                current.insert(port, old);
                continue;
            }
            info!("Device removed: {} on {}", old.label, old.port);
            self.listener.on_device_removed(&old.port, &old.type_id);
            report.removed.push(old);
        }

        let mut unavailable: Vec<String> = unavailable.into_iter().collect();
        unavailable.sort();
        report.unavailable = unavailable;

        *known = current;
        Ok(report)
    }

    /// Start periodic discovery
    ///
    /// Returns `false` if background discovery is already running.
    pub fn start_background(self: &Arc<Self>) -> bool {
        let mut background = self.lock_background();
        if background
            .as_ref()
            .is_some_and(|job| !job.handle.is_finished())
        {
            debug!("Background discovery already active");
            return false;
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_background(
            Arc::downgrade(self),
            cmd_rx,
            Duration::from_millis(self.config.initial_delay_ms),
            Duration::from_millis(self.config.scan_interval_ms),
        ));
        *background = Some(BackgroundJob { cmd_tx, handle });
        info!("Background discovery started");
        true
    }

    /// Ask the background task to run a round now
    pub fn request_scan(&self) -> bool {
        self.lock_background()
            .as_ref()
            .is_some_and(|job| job.cmd_tx.try_send(DiscoveryTaskCommand::ScanNow).is_ok())
    }

    /// Stop periodic discovery, letting a round in progress finish
    pub async fn stop_background(&self) {
        let job = self.lock_background().take();
        if let Some(job) = job {
            let _ = job.cmd_tx.send(DiscoveryTaskCommand::Shutdown).await;
            let _ = job.handle.await;
            info!("Background discovery stopped");
        }
    }

    /// Whether the background task is running
    pub fn is_background_active(&self) -> bool {
        self.lock_background()
            .as_ref()
            .is_some_and(|job| !job.handle.is_finished())
    }

    fn lock_background(&self) -> std::sync::MutexGuard<'_, Option<BackgroundJob>> {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_background<T: PortTransport>(
    service: Weak<DiscoveryService<T>>,
    mut cmd_rx: mpsc::Receiver<DiscoveryTaskCommand>,
    initial_delay: Duration,
    interval: Duration,
) {
    let next_round = sleep(initial_delay);
    tokio::pin!(next_round);

    loop {
        tokio::select! {
            _ = &mut next_round => {}
            cmd = cmd_rx.recv() => match cmd {
                Some(DiscoveryTaskCommand::ScanNow) => {}
                Some(DiscoveryTaskCommand::Shutdown) | None => break,
            },
        }

        let Some(service) = service.upgrade() else {
            break;
        };
        debug!("Starting background discovery round");
        match service.scan().await {
            Ok(report) if !report.is_unchanged() => debug!(
                "Discovery round: {} added, {} removed",
                report.added.len(),
                report.removed.len()
            ),
            Ok(_) => trace!("Discovery round: no changes"),
            Err(e) => warn!("Discovery round failed: {}", e),
        }
        drop(service);

        next_round.as_mut().reset(Instant::now() + interval);
    }

    debug!("Background discovery task ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    #[derive(Debug, Clone)]
    enum Port {
        Responds(&'static str),
        Silent,
        Refuses,
    }

    #[derive(Default)]
    struct ScriptedTransport {
        ports: Mutex<Vec<(String, Port)>>,
        fail_enumeration: Mutex<bool>,
    }

    impl ScriptedTransport {
        fn set(&self, port: &str, behavior: Port) {
            let mut ports = self.ports.lock().unwrap();
            ports.retain(|(p, _)| p != port);
            ports.push((port.to_string(), behavior));
        }

        fn unplug(&self, port: &str) {
            self.ports.lock().unwrap().retain(|(p, _)| p != port);
        }
    }

    async fn device(mut stream: DuplexStream, behavior: Port) {
        let mut buf = [0u8; 64];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    if let Port::Responds(id) = &behavior {
                        if buf[..n].ends_with(b"TYPEID\n") {
                            let line = format!("TYPEID={}\r\n", id);
                            let _ = stream.write_all(line.as_bytes()).await;
                        }
                    }
                }
            }
        }
    }

    impl PortTransport for ScriptedTransport {
        type Stream = DuplexStream;

        fn enumerate_ports(&self) -> Result<Vec<String>, DetectError> {
            if *self.fail_enumeration.lock().unwrap() {
                return Err(DetectError::EnumerationFailed("no access".into()));
            }
            Ok(self.ports.lock().unwrap().iter().map(|(p, _)| p.clone()).collect())
        }

        fn open(&self, port: &str, _settings: &SerialSettings) -> Result<DuplexStream, DetectError> {
            let behavior = self
                .ports
                .lock()
                .unwrap()
                .iter()
                .find(|(p, _)| p == port)
                .map(|(_, b)| b.clone())
                .ok_or_else(|| DetectError::OpenFailed {
                    port: port.into(),
                    reason: "gone".into(),
                })?;
            if let Port::Refuses = behavior {
                return Err(DetectError::OpenFailed {
                    port: port.into(),
                    reason: "permission denied".into(),
                });
            }
            let (host, dev) = duplex(256);
            tokio::spawn(device(dev, behavior));
            Ok(host)
        }
    }

    fn service(
        transport: Arc<ScriptedTransport>,
    ) -> (
        Arc<DiscoveryService<ScriptedTransport>>,
        mpsc::UnboundedReceiver<DiscoveryEvent>,
    ) {
        let (listener, rx) = ChannelListener::new();
        let service = DiscoveryService::new(
            transport,
            PortRegistry::new(),
            DiscoveryConfig::default(),
            SupportedTypes::default(),
            Arc::new(listener),
        );
        (Arc::new(service), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DiscoveryEvent>) -> Vec<DiscoveryEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn found(port: &str, type_id: &str) -> DiscoveryEvent {
        let types = SupportedTypes::default();
        DiscoveryEvent::DeviceFound(DiscoveredDevice::new(port, types.find(type_id).unwrap()))
    }

    fn removed(port: &str, type_id: &str) -> DiscoveryEvent {
        DiscoveryEvent::DeviceRemoved {
            port: port.into(),
            type_id: type_id.into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_round_reports_supported_devices_only() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.set("P1", Port::Responds("roomsensor"));
        transport.set("P2", Port::Responds("ledcontrol"));
        transport.set("P3", Port::Silent);
        let (service, mut rx) = service(transport);

        let report = service.scan().await.unwrap();

        assert_eq!(report.probed, 3);
        assert_eq!(drain(&mut rx), vec![found("P1", "roomsensor")]);
        let known = service.known_devices().await;
        assert_eq!(known.len(), 1);
        assert_eq!(known[0].port, "P1");
        assert_eq!(known[0].label, "Room Sensor");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_rescan_is_silent() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.set("P1", Port::Responds("roomsensor"));
        transport.set("P2", Port::Responds("doorbell"));
        let (service, mut rx) = service(transport);

        service.scan().await.unwrap();
        assert_eq!(drain(&mut rx).len(), 2);

        let report = service.scan().await.unwrap();
        assert!(report.is_unchanged());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(service.known_devices().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_is_removed_once() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.set("P1", Port::Responds("roomsensor"));
        let (service, mut rx) = service(transport.clone());

        service.scan().await.unwrap();
        drain(&mut rx);

        transport.set("P1", Port::Silent);
        service.scan().await.unwrap();
        assert_eq!(drain(&mut rx), vec![removed("P1", "roomsensor")]);
        assert!(service.known_devices().await.is_empty());

        service.scan().await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unplugged_port_is_removed() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.set("P1", Port::Responds("doorbell"));
        let (service, mut rx) = service(transport.clone());

        service.scan().await.unwrap();
        drain(&mut rx);

        transport.unplug("P1");
        let report = service.scan().await.unwrap();
        assert_eq!(report.removed.len(), 1);
        assert_eq!(drain(&mut rx), vec![removed("P1", "doorbell")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_port_keeps_device() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.set("P1", Port::Responds("roomsensor"));
        let (service, mut rx) = service(transport.clone());

        service.scan().await.unwrap();
        drain(&mut rx);

        // A steady-state link now owns the port and the device no longer
        // answers identification requests
        let _lease = service.registry().claim("P1").unwrap();
        transport.set("P1", Port::Silent);

        let report = service.scan().await.unwrap();
        assert_eq!(report.unavailable, vec!["P1".to_string()]);
        assert_eq!(report.probed, 0);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(service.known_devices().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_keeps_device() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.set("P1", Port::Responds("roomsensor"));
        let (service, mut rx) = service(transport.clone());

        service.scan().await.unwrap();
        drain(&mut rx);

        transport.set("P1", Port::Refuses);
        service.scan().await.unwrap();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(service.known_devices().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_change_reports_remove_then_add() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.set("P1", Port::Responds("roomsensor"));
        let (service, mut rx) = service(transport.clone());

        service.scan().await.unwrap();
        drain(&mut rx);

        transport.set("P1", Port::Responds("doorbell"));
        service.scan().await.unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![removed("P1", "roomsensor"), found("P1", "doorbell")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_enumeration_failure_changes_nothing() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.set("P1", Port::Responds("roomsensor"));
        let (service, mut rx) = service(transport.clone());

        service.scan().await.unwrap();
        drain(&mut rx);

        *transport.fail_enumeration.lock().unwrap() = true;
        assert!(matches!(
            service.scan().await,
            Err(DetectError::EnumerationFailed(_))
        ));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(service.known_devices().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ports_known_to_listener_are_not_probed() {
        struct KnowsP1(ChannelListener);

        impl DiscoveryListener for KnowsP1 {
            fn on_device_found(&self, device: &DiscoveredDevice) {
                self.0.on_device_found(device);
            }
            fn on_device_removed(&self, port: &str, type_id: &str) {
                self.0.on_device_removed(port, type_id);
            }
            fn is_already_known(&self, port: &str) -> bool {
                port == "P1"
            }
        }

        let transport = Arc::new(ScriptedTransport::default());
        transport.set("P1", Port::Responds("roomsensor"));
        transport.set("P2", Port::Responds("doorbell"));
        let (listener, mut rx) = ChannelListener::new();
        let service = DiscoveryService::new(
            transport,
            PortRegistry::new(),
            DiscoveryConfig::default(),
            SupportedTypes::default(),
            Arc::new(KnowsP1(listener)),
        );

        let report = service.scan().await.unwrap();
        assert_eq!(report.probed, 1);
        assert_eq!(drain(&mut rx), vec![found("P2", "doorbell")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_run_concurrently() {
        let transport = Arc::new(ScriptedTransport::default());
        for port in ["P1", "P2", "P3", "P4"] {
            transport.set(port, Port::Silent);
        }
        let (service, _rx) = service(transport);

        let started = Instant::now();
        service.scan().await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_releases_ports() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.set("P1", Port::Responds("roomsensor"));
        transport.set("P2", Port::Silent);
        let (service, _rx) = service(transport);

        service.scan().await.unwrap();
        assert!(!service.registry().is_owned("P1"));
        assert!(!service.registry().is_owned("P2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_does_not_wait_for_round() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.set("P1", Port::Responds("roomsensor"));
        let (service, _rx) = service(transport.clone());
        service.scan().await.unwrap();
        assert_eq!(service.try_known_devices().map(|d| d.len()), Some(1));

        transport.set("P2", Port::Silent);
        let round = tokio::spawn({
            let service = service.clone();
            async move { service.scan().await }
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!round.is_finished());
        assert_eq!(service.try_known_devices(), None);

        round.await.unwrap().unwrap();
        assert_eq!(service.try_known_devices().map(|d| d.len()), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_discovery() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.set("P1", Port::Responds("doorbell"));
        let (service, mut rx) = service(transport.clone());

        assert!(service.start_background());
        assert!(!service.start_background());
        assert!(service.is_background_active());

        let event = rx.recv().await.unwrap();
        assert_eq!(event, found("P1", "doorbell"));

        transport.unplug("P1");
        assert!(service.request_scan());
        let event = rx.recv().await.unwrap();
        assert_eq!(event, removed("P1", "doorbell"));

        service.stop_background().await;
        assert!(!service.is_background_active());
        assert!(!service.request_scan());
    }
}
