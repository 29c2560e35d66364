//! Virtual port transport
//!
//! [`VirtualTransport`] stands in for the host's serial ports. Devices are
//! plugged into named ports; opening a port starts a device task on one end
//! of an in-memory duplex stream and hands the other end to the caller.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use sensor_detect::{DetectError, PortTransport, SerialSettings};
use tokio::io::{duplex, DuplexStream};
use tokio::sync::mpsc;
use tracing::debug;

use crate::device_task::{run_virtual_device_task, VirtualDeviceCommand};
use crate::{VirtualDevice, VirtualDeviceConfig};

const STREAM_BUFFER: usize = 1024;

#[derive(Debug)]
struct VirtualPort {
    config: VirtualDeviceConfig,
    busy: bool,
    opens: usize,
    session: Option<mpsc::Sender<VirtualDeviceCommand>>,
}

/// In-memory set of ports with attached virtual devices
#[derive(Debug, Default)]
pub struct VirtualTransport {
    ports: Mutex<BTreeMap<String, VirtualPort>>,
    enumeration_error: Mutex<Option<String>>,
}

impl VirtualTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device to a port, replacing any device already there
    pub fn plug(&self, port: &str, config: VirtualDeviceConfig) {
        debug!("Plugging {} into {}", config.type_id, port);
        self.lock().insert(
            port.to_string(),
            VirtualPort {
                config,
                busy: false,
                opens: 0,
                session: None,
            },
        );
    }

    /// Remove a port; an open connection sees end of stream
    pub fn unplug(&self, port: &str) -> bool {
        let removed = self.lock().remove(port);
        if let Some(mut removed) = removed {
            debug!("Unplugging {}", port);
            if let Some(session) = removed.session.take() {
                let _ = session.try_send(VirtualDeviceCommand::Shutdown);
            }
            true
        } else {
            false
        }
    }

    /// Make opening a port fail as if another process held it
    pub fn set_busy(&self, port: &str, busy: bool) {
        if let Some(p) = self.lock().get_mut(port) {
            p.busy = busy;
        }
    }

    /// Make the device on a port stop (or resume) answering; applies to the
    /// running session and to future opens
    pub fn set_silent(&self, port: &str, silent: bool) {
        if let Some(p) = self.lock().get_mut(port) {
            p.config.silent = silent;
            if let Some(session) = &p.session {
                let _ = session.try_send(VirtualDeviceCommand::SetSilent(silent));
            }
        }
    }

    /// Make enumeration fail until cleared with `None`
    pub fn set_enumeration_error(&self, error: Option<&str>) {
        *self
            .enumeration_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error.map(str::to_string);
    }

    /// Command sender for the device session on the last opened stream
    pub fn control(&self, port: &str) -> Option<mpsc::Sender<VirtualDeviceCommand>> {
        self.lock()
            .get(port)
            .and_then(|p| p.session.clone())
            .filter(|tx| !tx.is_closed())
    }

    /// How many times a port has been opened
    pub fn open_count(&self, port: &str) -> usize {
        self.lock().get(port).map_or(0, |p| p.opens)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, VirtualPort>> {
        self.ports.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PortTransport for VirtualTransport {
    type Stream = DuplexStream;

    fn enumerate_ports(&self) -> Result<Vec<String>, DetectError> {
        if let Some(reason) = self
            .enumeration_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(DetectError::EnumerationFailed(reason));
        }
        Ok(self.lock().keys().cloned().collect())
    }

    fn open(&self, port: &str, _settings: &SerialSettings) -> Result<DuplexStream, DetectError> {
        let mut ports = self.lock();
        let entry = ports.get_mut(port).ok_or_else(|| DetectError::OpenFailed {
            port: port.to_string(),
            reason: "no such port".to_string(),
        })?;
        if entry.busy {
            return Err(DetectError::OpenFailed {
                port: port.to_string(),
                reason: "resource busy".to_string(),
            });
        }

        let (host, dev) = duplex(STREAM_BUFFER);
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let device = VirtualDevice::new(entry.config.clone());
        tokio::spawn(run_virtual_device_task(dev, device, cmd_rx));

        entry.opens += 1;
        entry.session = Some(cmd_tx);
        debug!("Opened virtual port {} ({} opens)", port, entry.opens);
        Ok(host)
    }
}
