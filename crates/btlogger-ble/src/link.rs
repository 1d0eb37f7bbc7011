//! Platform link abstraction
//!
//! The connection manager never talks to a Bluetooth stack directly. A
//! `BleLink` performs the individual GATT steps on request and forwards
//! everything the platform reports asynchronously (advertisements,
//! notifications, dropped links) as `LinkEvent`s, which the manager drains
//! from its own update loop.

use async_trait::async_trait;
use btlogger_core::{ConnectError, DeviceAddress};
use uuid::Uuid;

use crate::error::LinkError;

// ----------------------------------------------------------------------------
// Link Events
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Advertisement {
        address: DeviceAddress,
        name: String,
        services: Vec<Uuid>,
        rssi: Option<i16>,
    },
    Notification {
        address: DeviceAddress,
        data: Vec<u8>,
    },
    LinkLost {
        address: DeviceAddress,
    },
}

// ----------------------------------------------------------------------------
// Link Trait
// ----------------------------------------------------------------------------

#[async_trait]
pub trait BleLink: Send {
    async fn start_scan(&mut self) -> Result<(), LinkError>;

    async fn stop_scan(&mut self) -> Result<(), LinkError>;

    /// Establish the low level link to a previously advertised device
    async fn connect(&mut self, address: &DeviceAddress) -> Result<(), ConnectError>;

    /// Locate the log service and characteristic on a linked device
    async fn resolve_log_channel(
        &mut self,
        address: &DeviceAddress,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), ConnectError>;

    /// Enable notifications on the resolved log characteristic
    async fn subscribe(&mut self, address: &DeviceAddress) -> Result<(), ConnectError>;

    /// Release every resource held for the device. Safe to call on a device
    /// that is not linked.
    async fn disconnect(&mut self, address: &DeviceAddress) -> Result<(), LinkError>;

    async fn is_connected(&mut self, address: &DeviceAddress) -> bool;

    /// Next pending platform event, without waiting
    fn poll_event(&mut self) -> Option<LinkEvent>;
}
