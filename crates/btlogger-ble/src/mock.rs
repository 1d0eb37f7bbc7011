//! Scriptable in-memory link
//!
//! `MockLink` is handed to the connection manager while the paired
//! `MockController` stays with the test, injecting advertisements,
//! notifications and link drops and arranging connection failures.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use btlogger_core::{ConnectError, DeviceAddress, LogRecord, WireCodec};
use uuid::Uuid;

use crate::error::LinkError;
use crate::link::{BleLink, LinkEvent};

/// Step at which a scripted connection attempt fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Link,
    /// `connect` never completes
    Hang,
    /// `connect` succeeds, then channel resolution never completes
    HangResolve,
    MissingService,
    MissingCharacteristic,
    Subscribe,
}

#[derive(Debug, Default)]
struct MockState {
    events: VecDeque<LinkEvent>,
    scanning: bool,
    scan_starts: u32,
    linked: HashSet<DeviceAddress>,
    subscribed: HashSet<DeviceAddress>,
    failures: HashMap<DeviceAddress, MockFailure>,
    connect_calls: Vec<DeviceAddress>,
    disconnect_calls: Vec<DeviceAddress>,
}

type SharedState = Arc<Mutex<MockState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, MockState> {
    // A panicking test thread must not hide the state from the others
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Create a connected link/controller pair
pub fn mock_link() -> (MockLink, MockController) {
    let state = SharedState::default();
    (
        MockLink {
            state: state.clone(),
        },
        MockController { state },
    )
}

// ----------------------------------------------------------------------------
// Mock Link
// ----------------------------------------------------------------------------

pub struct MockLink {
    state: SharedState,
}

#[async_trait]
impl BleLink for MockLink {
    async fn start_scan(&mut self) -> Result<(), LinkError> {
        let mut state = lock(&self.state);
        state.scanning = true;
        state.scan_starts += 1;
        Ok(())
    }

    async fn stop_scan(&mut self) -> Result<(), LinkError> {
        lock(&self.state).scanning = false;
        Ok(())
    }

    async fn connect(&mut self, address: &DeviceAddress) -> Result<(), ConnectError> {
        let failure = {
            let mut state = lock(&self.state);
            state.connect_calls.push(address.clone());
            state.failures.get(address).copied()
        };

        match failure {
            Some(MockFailure::Link) => Err(ConnectError::LinkFailed {
                address: address.to_string(),
                reason: "scripted failure".to_string(),
            }),
            Some(MockFailure::Hang) => {
                std::future::pending::<()>().await;
                Ok(())
            }
            _ => {
                lock(&self.state).linked.insert(address.clone());
                Ok(())
            }
        }
    }

    async fn resolve_log_channel(
        &mut self,
        address: &DeviceAddress,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), ConnectError> {
        let failure = lock(&self.state).failures.get(address).copied();
        match failure {
            Some(MockFailure::HangResolve) => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Some(MockFailure::MissingService) => Err(ConnectError::ServiceNotFound {
                address: address.to_string(),
                service: service.to_string(),
            }),
            Some(MockFailure::MissingCharacteristic) => Err(ConnectError::CharacteristicNotFound {
                address: address.to_string(),
                characteristic: characteristic.to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn subscribe(&mut self, address: &DeviceAddress) -> Result<(), ConnectError> {
        let mut state = lock(&self.state);
        if state.failures.get(address) == Some(&MockFailure::Subscribe) {
            return Err(ConnectError::SubscriptionFailed {
                address: address.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        state.subscribed.insert(address.clone());
        Ok(())
    }

    async fn disconnect(&mut self, address: &DeviceAddress) -> Result<(), LinkError> {
        let mut state = lock(&self.state);
        state.disconnect_calls.push(address.clone());
        state.linked.remove(address);
        state.subscribed.remove(address);
        Ok(())
    }

    async fn is_connected(&mut self, address: &DeviceAddress) -> bool {
        lock(&self.state).linked.contains(address)
    }

    fn poll_event(&mut self) -> Option<LinkEvent> {
        lock(&self.state).events.pop_front()
    }
}

// ----------------------------------------------------------------------------
// Mock Controller
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockController {
    state: SharedState,
}

impl MockController {
    pub fn push_event(&self, event: LinkEvent) {
        lock(&self.state).events.push_back(event);
    }

    /// Advertise a device by name only
    pub fn advertise(&self, address: &str, name: &str) {
        self.push_event(LinkEvent::Advertisement {
            address: DeviceAddress::new(address),
            name: name.to_string(),
            services: Vec::new(),
            rssi: Some(-55),
        });
    }

    /// Advertise a device by the services it offers
    pub fn advertise_services(&self, address: &str, name: &str, services: Vec<Uuid>) {
        self.push_event(LinkEvent::Advertisement {
            address: DeviceAddress::new(address),
            name: name.to_string(),
            services,
            rssi: Some(-55),
        });
    }

    pub fn notify(&self, address: &str, data: Vec<u8>) {
        self.push_event(LinkEvent::Notification {
            address: DeviceAddress::new(address),
            data,
        });
    }

    /// Notify a record in the binary wire format
    pub fn notify_record(&self, address: &str, record: &LogRecord) {
        self.notify(address, WireCodec::encode(record).to_vec());
    }

    /// Drop the link and report it
    pub fn lose_link(&self, address: &str) {
        let address = DeviceAddress::new(address);
        let mut state = lock(&self.state);
        state.linked.remove(&address);
        state.subscribed.remove(&address);
        state.events.push_back(LinkEvent::LinkLost { address });
    }

    /// Drop the link without telling anyone
    pub fn drop_silently(&self, address: &str) {
        let address = DeviceAddress::new(address);
        let mut state = lock(&self.state);
        state.linked.remove(&address);
        state.subscribed.remove(&address);
    }

    pub fn fail_connections(&self, address: &str, failure: MockFailure) {
        lock(&self.state).failures.insert(DeviceAddress::new(address), failure);
    }

    pub fn clear_failures(&self, address: &str) {
        lock(&self.state).failures.remove(&DeviceAddress::new(address));
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.state).scanning
    }

    pub fn scan_starts(&self) -> u32 {
        lock(&self.state).scan_starts
    }

    pub fn is_linked(&self, address: &str) -> bool {
        lock(&self.state).linked.contains(&DeviceAddress::new(address))
    }

    pub fn is_subscribed(&self, address: &str) -> bool {
        lock(&self.state).subscribed.contains(&DeviceAddress::new(address))
    }

    pub fn connect_calls(&self) -> Vec<DeviceAddress> {
        lock(&self.state).connect_calls.clone()
    }

    pub fn disconnect_calls(&self) -> Vec<DeviceAddress> {
        lock(&self.state).disconnect_calls.clone()
    }

    pub fn pending_events(&self) -> usize {
        lock(&self.state).events.len()
    }
}
