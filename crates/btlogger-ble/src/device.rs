//! Discovered producer devices and their connection state

use core::fmt;

use btlogger_core::{DeviceAddress, DeviceIdentity};
use tokio::time::Instant;

// ----------------------------------------------------------------------------
// Device Id
// ----------------------------------------------------------------------------

/// Registry key of a device handle. Ids only ever grow, so ordering by id
/// is ordering by discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(u64);

impl DeviceId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Device State Management
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Discovered,
    Connecting,
    Connected,
    Disconnected,
}

/// A producer seen by the scanner
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    id: DeviceId,
    address: DeviceAddress,
    name: String,
    state: ConnectionState,
    rssi: Option<i16>,
    discovered_at: Instant,
    last_seen_at: Instant,
    last_attempt_at: Option<Instant>,
    failed_attempts: u32,
}

impl DeviceHandle {
    pub fn new(id: DeviceId, address: DeviceAddress, name: String, now: Instant) -> Self {
        Self {
            id,
            address,
            name,
            state: ConnectionState::Discovered,
            rssi: None,
            discovered_at: now,
            last_seen_at: now,
            last_attempt_at: None,
            failed_attempts: 0,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    pub fn discovered_at(&self) -> Instant {
        self.discovered_at
    }

    pub fn last_seen_at(&self) -> Instant {
        self.last_seen_at
    }

    pub fn last_attempt_at(&self) -> Option<Instant> {
        self.last_attempt_at
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.address.clone(), self.name.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }

    /// Record a fresh advertisement. A blank name never overwrites a known one.
    pub fn mark_seen(&mut self, name: &str, rssi: Option<i16>, now: Instant) {
        if !name.trim().is_empty() {
            self.name = name.to_string();
        }
        if rssi.is_some() {
            self.rssi = rssi;
        }
        self.last_seen_at = now;
    }

    pub fn start_connection_attempt(&mut self, now: Instant) {
        self.state = ConnectionState::Connecting;
        self.last_attempt_at = Some(now);
    }

    pub fn mark_connected(&mut self, now: Instant) {
        self.state = ConnectionState::Connected;
        self.failed_attempts = 0;
        self.last_seen_at = now;
    }

    /// Roll a failed attempt back to a connectable candidate
    pub fn mark_failed(&mut self) {
        self.state = ConnectionState::Discovered;
        self.failed_attempts += 1;
    }

    pub fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> DeviceHandle {
        DeviceHandle::new(
            DeviceId::new(1),
            DeviceAddress::new("AA:BB:CC:DD:EE:01"),
            "Sensor_v1".to_string(),
            Instant::now(),
        )
    }

    #[test]
    fn test_connection_state_transitions() {
        let mut device = handle();
        assert_eq!(device.state(), ConnectionState::Discovered);

        device.start_connection_attempt(Instant::now());
        assert!(device.is_connecting());
        assert!(device.last_attempt_at().is_some());

        device.mark_failed();
        assert_eq!(device.state(), ConnectionState::Discovered);
        assert_eq!(device.failed_attempts(), 1);

        device.start_connection_attempt(Instant::now());
        device.mark_connected(Instant::now());
        assert!(device.is_connected());
        assert_eq!(device.failed_attempts(), 0);

        device.mark_disconnected();
        assert_eq!(device.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_blank_name_keeps_known_name() {
        let mut device = handle();
        device.mark_seen("", Some(-60), Instant::now());
        assert_eq!(device.name(), "Sensor_v1");
        assert_eq!(device.rssi(), Some(-60));
        assert_eq!(device.to_string(), "Sensor_v1 (AA:BB:CC:DD:EE:01)");
    }
}
