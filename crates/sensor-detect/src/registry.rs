//! Exclusive port ownership
//!
//! A port is used by at most one consumer at a time: either an
//! identification probe or a steady-state link. Consumers hold a
//! [`PortLease`] for as long as the port is open; dropping it releases the
//! port.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::error::DetectError;

/// Shared table of ports currently owned in this process
#[derive(Debug, Clone, Default)]
pub struct PortRegistry {
    owned: Arc<Mutex<HashSet<String>>>,
}

impl PortRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a port, or `None` if someone else owns it
    pub fn try_claim(&self, port: &str) -> Option<PortLease> {
        if !self.lock().insert(port.to_string()) {
            trace!("Port {} already owned", port);
            return None;
        }
        trace!("Port {} claimed", port);
        Some(PortLease {
            port: port.to_string(),
            registry: self.clone(),
        })
    }

    /// Claim a port, failing with [`DetectError::PortBusy`]
    pub fn claim(&self, port: &str) -> Result<PortLease, DetectError> {
        self.try_claim(port)
            .ok_or_else(|| DetectError::PortBusy(port.to_string()))
    }

    /// Whether a port is currently owned
    pub fn is_owned(&self, port: &str) -> bool {
        self.lock().contains(port)
    }

    fn release(&self, port: &str) {
        self.lock().remove(port);
        trace!("Port {} released", port);
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.owned.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ownership of one port; released on drop
#[derive(Debug)]
pub struct PortLease {
    port: String,
    registry: PortRegistry,
}

impl PortLease {
    /// Name of the owned port
    pub fn port(&self) -> &str {
        &self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.registry.release(&self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive() {
        let registry = PortRegistry::new();
        let lease = registry.try_claim("/dev/ttyACM0").unwrap();
        assert_eq!(lease.port(), "/dev/ttyACM0");
        assert!(registry.try_claim("/dev/ttyACM0").is_none());
        assert!(matches!(
            registry.claim("/dev/ttyACM0"),
            Err(DetectError::PortBusy(_))
        ));
        assert!(registry.try_claim("/dev/ttyACM1").is_some());
    }

    #[test]
    fn test_drop_releases() {
        let registry = PortRegistry::new();
        let lease = registry.claim("COM3").unwrap();
        assert!(registry.is_owned("COM3"));
        drop(lease);
        assert!(!registry.is_owned("COM3"));
        assert!(registry.try_claim("COM3").is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let registry = PortRegistry::new();
        let other = registry.clone();
        let _lease = registry.claim("COM4").unwrap();
        assert!(other.is_owned("COM4"));
    }
}
