//! `BleLink` on top of btleplug
//!
//! Adapter events and per-device notification streams are consumed by
//! background tasks that only translate and forward; all decisions are left
//! to the connection manager polling `poll_event`.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use btlogger_core::{ConnectError, DeviceAddress};
use futures::stream::{Stream, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::LinkError;
use crate::link::{BleLink, LinkEvent};

type PeripheralMap = Arc<RwLock<HashMap<DeviceAddress, Peripheral>>>;

// ----------------------------------------------------------------------------
// Btleplug Link
// ----------------------------------------------------------------------------

pub struct BtleplugLink {
    adapter: Adapter,
    /// Every peripheral the adapter has reported, keyed by address
    peripherals: PeripheralMap,
    /// Resolved log characteristic per linked device
    channels: HashMap<DeviceAddress, Characteristic>,
    notification_tasks: HashMap<DeviceAddress, JoinHandle<()>>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    event_rx: mpsc::UnboundedReceiver<LinkEvent>,
    event_task: JoinHandle<()>,
}

impl BtleplugLink {
    /// Acquire the first Bluetooth adapter and start listening to it
    pub async fn new() -> Result<Self, LinkError> {
        let manager = Manager::new()
            .await
            .map_err(|e| LinkError::ManagerInit(e.to_string()))?;

        let adapter = manager
            .adapters()
            .await
            .map_err(|e| LinkError::ManagerInit(e.to_string()))?
            .into_iter()
            .next()
            .ok_or(LinkError::AdapterNotAvailable)?;

        let events = adapter
            .events()
            .await
            .map_err(|e| LinkError::EventStream(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let peripherals: PeripheralMap = Arc::new(RwLock::new(HashMap::new()));

        let event_task = tokio::spawn(forward_central_events(
            adapter.clone(),
            events,
            peripherals.clone(),
            event_tx.clone(),
        ));

        info!("BLE adapter initialized");
        Ok(Self {
            adapter,
            peripherals,
            channels: HashMap::new(),
            notification_tasks: HashMap::new(),
            event_tx,
            event_rx,
            event_task,
        })
    }

    async fn peripheral(&self, address: &DeviceAddress) -> Option<Peripheral> {
        self.peripherals.read().await.get(address).cloned()
    }

    async fn linked_peripheral(&self, address: &DeviceAddress) -> Result<Peripheral, ConnectError> {
        self.peripheral(address).await.ok_or_else(|| ConnectError::LinkFailed {
            address: address.to_string(),
            reason: "device not reported by the adapter".to_string(),
        })
    }
}

#[async_trait]
impl BleLink for BtleplugLink {
    async fn start_scan(&mut self) -> Result<(), LinkError> {
        // Unfiltered: producers matched by name may not advertise the service
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| LinkError::Scan(e.to_string()))
    }

    async fn stop_scan(&mut self) -> Result<(), LinkError> {
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| LinkError::Scan(e.to_string()))
    }

    async fn connect(&mut self, address: &DeviceAddress) -> Result<(), ConnectError> {
        let peripheral = self.linked_peripheral(address).await?;
        peripheral.connect().await.map_err(|e| ConnectError::LinkFailed {
            address: address.to_string(),
            reason: e.to_string(),
        })
    }

    async fn resolve_log_channel(
        &mut self,
        address: &DeviceAddress,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), ConnectError> {
        let peripheral = self.linked_peripheral(address).await?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| ConnectError::LinkFailed {
                address: address.to_string(),
                reason: format!("service discovery failed: {}", e),
            })?;

        let services = peripheral.services();
        let log_service = services
            .iter()
            .find(|s| s.uuid == service)
            .ok_or_else(|| ConnectError::ServiceNotFound {
                address: address.to_string(),
                service: service.to_string(),
            })?;

        let log_characteristic = log_service
            .characteristics
            .iter()
            .find(|c| c.uuid == characteristic)
            .cloned()
            .ok_or_else(|| ConnectError::CharacteristicNotFound {
                address: address.to_string(),
                characteristic: characteristic.to_string(),
            })?;

        self.channels.insert(address.clone(), log_characteristic);
        Ok(())
    }

    async fn subscribe(&mut self, address: &DeviceAddress) -> Result<(), ConnectError> {
        let subscription_failed = |reason: String| ConnectError::SubscriptionFailed {
            address: address.to_string(),
            reason,
        };

        let characteristic = self
            .channels
            .get(address)
            .cloned()
            .ok_or_else(|| subscription_failed("log channel not resolved".to_string()))?;
        let peripheral = self.linked_peripheral(address).await?;

        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| subscription_failed(e.to_string()))?;
        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(|e| subscription_failed(e.to_string()))?;

        let event_tx = self.event_tx.clone();
        let device = address.clone();
        let handle = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != characteristic.uuid {
                    continue;
                }
                let event = LinkEvent::Notification {
                    address: device.clone(),
                    data: notification.value,
                };
                if event_tx.send(event).is_err() {
                    break;
                }
            }
            debug!("Notification stream for {} ended", device);
        });

        if let Some(previous) = self.notification_tasks.insert(address.clone(), handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn disconnect(&mut self, address: &DeviceAddress) -> Result<(), LinkError> {
        if let Some(task) = self.notification_tasks.remove(address) {
            task.abort();
        }
        self.channels.remove(address);

        let Some(peripheral) = self.peripheral(address).await else {
            return Ok(());
        };
        if peripheral.is_connected().await.unwrap_or(false) {
            peripheral
                .disconnect()
                .await
                .map_err(|e| LinkError::Platform(e.to_string()))?;
        }
        Ok(())
    }

    async fn is_connected(&mut self, address: &DeviceAddress) -> bool {
        match self.peripheral(address).await {
            Some(peripheral) => peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    fn poll_event(&mut self) -> Option<LinkEvent> {
        self.event_rx.try_recv().ok()
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        self.event_task.abort();
        for (_, task) in self.notification_tasks.drain() {
            task.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Adapter Event Forwarding
// ----------------------------------------------------------------------------

async fn forward_central_events(
    adapter: Adapter,
    mut events: Pin<Box<dyn Stream<Item = CentralEvent> + Send>>,
    peripherals: PeripheralMap,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
) {
    while let Some(event) = events.next().await {
        let forwarded = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let properties = match peripheral.properties().await {
                    Ok(Some(properties)) => properties,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Failed to read advertisement properties: {}", e);
                        continue;
                    }
                };

                let address = DeviceAddress::new(properties.address.to_string());
                peripherals.write().await.insert(address.clone(), peripheral);

                LinkEvent::Advertisement {
                    address,
                    name: properties.local_name.unwrap_or_default(),
                    services: properties.services,
                    rssi: properties.rssi,
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                LinkEvent::LinkLost {
                    address: DeviceAddress::new(peripheral.address().to_string()),
                }
            }
            _ => continue,
        };

        if event_tx.send(forwarded).is_err() {
            break;
        }
    }
    debug!("BLE adapter event stream ended");
}
