//! Producer discovery and connection management
//!
//! `ConnectionManager` owns its link and a registry of every producer seen.
//! It is driven entirely by `update()`: platform events are drained, link
//! health is checked, scanning is cycled and the next automatic connection
//! attempt is made. Decoded records and connection changes leave the manager
//! only through the two registered callbacks.

use std::collections::{BTreeMap, HashMap};

use btlogger_core::{
    ConnectError, DeviceAddress, DeviceIdentity, LinkConfig, LogRecord, WireCodec,
};
use tokio::sync::watch;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::device::{ConnectionState, DeviceHandle, DeviceId};
use crate::error::LinkError;
use crate::link::{BleLink, LinkEvent};
use crate::protocol::DeviceFilter;

/// Frames longer than this are abbreviated in decode warnings
const HEX_DUMP_LIMIT: usize = 16;

pub type LogCallback = Box<dyn FnMut(&LogRecord, &DeviceIdentity) + Send>;
pub type ConnectionCallback = Box<dyn FnMut(&DeviceIdentity, bool) + Send>;

/// Counters exposed for status displays
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub frames_received: u64,
    pub records_decoded: u64,
    pub decode_failures: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub disconnects: u64,
}

// ----------------------------------------------------------------------------
// Connection Manager
// ----------------------------------------------------------------------------

pub struct ConnectionManager<L: BleLink> {
    link: L,
    config: LinkConfig,
    filter: DeviceFilter,
    devices: BTreeMap<DeviceId, DeviceHandle>,
    by_address: HashMap<DeviceAddress, DeviceId>,
    next_id: u64,
    scanning: bool,
    scan_started_at: Instant,
    idle_since: Instant,
    last_health_check: Instant,
    last_auto_connect: Option<Instant>,
    clock_origin: Instant,
    /// Flips to `true` when the owner is shutting down
    shutdown: Option<watch::Receiver<bool>>,
    stats: ConnectionStats,
    on_log_received: Option<LogCallback>,
    on_connection_changed: Option<ConnectionCallback>,
}

impl<L: BleLink> ConnectionManager<L> {
    pub fn new(link: L, config: LinkConfig) -> Self {
        let now = Instant::now();
        Self {
            link,
            filter: DeviceFilter::from_config(&config),
            config,
            devices: BTreeMap::new(),
            by_address: HashMap::new(),
            next_id: 1,
            scanning: false,
            scan_started_at: now,
            idle_since: now,
            last_health_check: now,
            last_auto_connect: None,
            clock_origin: now,
            shutdown: None,
            stats: ConnectionStats::default(),
            on_log_received: None,
            on_connection_changed: None,
        }
    }

    pub fn set_log_callback(&mut self, callback: impl FnMut(&LogRecord, &DeviceIdentity) + Send + 'static) {
        self.on_log_received = Some(Box::new(callback));
    }

    pub fn set_connection_callback(&mut self, callback: impl FnMut(&DeviceIdentity, bool) + Send + 'static) {
        self.on_connection_changed = Some(Box::new(callback));
    }

    /// Abandon any connection attempt in flight once `signal` reads `true`
    pub fn set_shutdown_signal(&mut self, signal: watch::Receiver<bool>) {
        self.shutdown = Some(signal);
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------------

    pub async fn start_scanning(&mut self) -> Result<(), LinkError> {
        if self.scanning {
            return Ok(());
        }
        self.link.start_scan().await?;
        self.scanning = true;
        self.scan_started_at = Instant::now();
        info!("Started scanning for log producers");
        Ok(())
    }

    pub async fn stop_scanning(&mut self) -> Result<(), LinkError> {
        if !self.scanning {
            return Ok(());
        }
        // The scan is over as far as we are concerned even if the stack complains
        self.scanning = false;
        self.idle_since = Instant::now();
        self.link.stop_scan().await?;
        debug!("Stopped scanning");
        Ok(())
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    /// Connect to a discovered device and subscribe to its log channel.
    /// On failure every partial step is undone and the device stays a
    /// candidate.
    pub async fn connect(&mut self, address: &DeviceAddress) -> Result<(), ConnectError> {
        let id = self
            .by_address
            .get(address)
            .copied()
            .ok_or_else(|| ConnectError::UnknownDevice {
                address: address.to_string(),
            })?;

        let now = Instant::now();
        let Some(device) = self.devices.get_mut(&id) else {
            return Err(ConnectError::UnknownDevice {
                address: address.to_string(),
            });
        };
        match device.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Connecting => {
                return Err(ConnectError::AttemptInProgress {
                    address: address.to_string(),
                })
            }
            ConnectionState::Discovered | ConnectionState::Disconnected => {}
        }
        if self.shutdown.as_ref().is_some_and(|shutdown| *shutdown.borrow()) {
            return Err(ConnectError::Cancelled {
                address: address.to_string(),
            });
        }
        device.start_connection_attempt(now);
        self.stats.connect_attempts += 1;
        debug!("Connecting to {}", device);

        let outcome = match self.shutdown.clone() {
            Some(mut shutdown) => tokio::select! {
                biased;
                result = self.establish(address) => result,
                Ok(_) = shutdown.wait_for(|stopping| *stopping) => Err(ConnectError::Cancelled {
                    address: address.to_string(),
                }),
            },
            None => self.establish(address).await,
        };

        match outcome {
            Ok(()) => {
                let Some(device) = self.devices.get_mut(&id) else {
                    return Ok(());
                };
                device.mark_connected(Instant::now());
                let identity = device.identity();
                info!("Connected to {}", identity);
                self.notify_connection(&identity, true);
                Ok(())
            }
            Err(e) => {
                if let Err(release_err) = self.link.disconnect(address).await {
                    debug!("Failed to release link to {}: {}", address, release_err);
                }
                if let Some(device) = self.devices.get_mut(&id) {
                    device.mark_failed();
                }
                self.stats.connect_failures += 1;
                warn!("Connection to {} failed: {}", address, e);
                Err(e)
            }
        }
    }

    /// Link, channel resolution and subscription share one deadline
    async fn establish(&mut self, address: &DeviceAddress) -> Result<(), ConnectError> {
        let connection_timeout = self.config.connection_timeout;
        match timeout(connection_timeout, self.acquire(address)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout {
                address: address.to_string(),
                timeout_ms: connection_timeout.as_millis() as u64,
            }),
        }
    }

    async fn acquire(&mut self, address: &DeviceAddress) -> Result<(), ConnectError> {
        self.link.connect(address).await?;

        let service: Uuid = self.config.service_uuid;
        let characteristic: Uuid = self.config.log_characteristic_uuid;
        self.link
            .resolve_log_channel(address, service, characteristic)
            .await?;
        self.link.subscribe(address).await
    }

    /// Disconnect a device. Disconnecting a device that is not connected is
    /// a no-op.
    pub async fn disconnect(&mut self, address: &DeviceAddress) -> Result<(), ConnectError> {
        let id = self
            .by_address
            .get(address)
            .copied()
            .ok_or_else(|| ConnectError::UnknownDevice {
                address: address.to_string(),
            })?;
        self.release(id, "disconnect requested").await;
        Ok(())
    }

    pub async fn disconnect_all(&mut self) {
        let active: Vec<DeviceId> = self
            .devices
            .values()
            .filter(|d| d.is_connected() || d.is_connecting())
            .map(DeviceHandle::id)
            .collect();
        for id in active {
            self.release(id, "shutting down").await;
        }
    }

    async fn release(&mut self, id: DeviceId, reason: &str) {
        let Some(device) = self.devices.get(&id) else {
            return;
        };
        if !device.is_connected() && !device.is_connecting() {
            return;
        }
        let address = device.address().clone();

        if let Err(e) = self.link.disconnect(&address).await {
            warn!("Failed to release link to {}: {}", address, e);
        }

        if let Some(device) = self.devices.get_mut(&id) {
            device.mark_disconnected();
            let identity = device.identity();
            self.stats.disconnects += 1;
            info!("Disconnected from {} ({})", identity, reason);
            self.notify_connection(&identity, false);
        }
    }

    // ------------------------------------------------------------------------
    // Update Loop
    // ------------------------------------------------------------------------

    /// One unit of connection work
    pub async fn update(&mut self) {
        self.drain_link_events().await;

        let now = Instant::now();
        if now.duration_since(self.last_health_check) >= self.config.health_check_interval {
            self.last_health_check = now;
            self.check_link_health().await;
        }

        if self.scanning && now.duration_since(self.scan_started_at) >= self.config.scan_duration {
            if let Err(e) = self.stop_scanning().await {
                warn!("Failed to stop scan: {}", e);
            }
        } else if !self.scanning
            && self.connected_count() == 0
            && now.duration_since(self.idle_since) >= self.config.scan_restart_interval
        {
            match self.start_scanning().await {
                Ok(()) => {}
                Err(e) => {
                    // Try again after another idle period
                    self.idle_since = now;
                    warn!("Failed to restart scan: {}", e);
                }
            }
        }

        self.prune_candidates(now);
        self.auto_connect(now).await;
    }

    async fn drain_link_events(&mut self) {
        while let Some(event) = self.link.poll_event() {
            match event {
                LinkEvent::Advertisement {
                    address,
                    name,
                    services,
                    rssi,
                } => self.handle_advertisement(address, &name, &services, rssi),
                LinkEvent::Notification { address, data } => self.handle_notification(&address, &data),
                LinkEvent::LinkLost { address } => {
                    if let Some(id) = self.by_address.get(&address).copied() {
                        self.release(id, "link lost").await;
                    }
                }
            }
        }
    }

    fn handle_advertisement(&mut self, address: DeviceAddress, name: &str, services: &[Uuid], rssi: Option<i16>) {
        if !self.filter.matches(name, services) {
            trace!("Ignoring advertisement from {} ({:?})", address, name);
            return;
        }

        let now = Instant::now();
        if let Some(id) = self.by_address.get(&address).copied() {
            match self.devices.get_mut(&id) {
                Some(device) if device.state() != ConnectionState::Disconnected => {
                    device.mark_seen(name, rssi, now);
                    return;
                }
                Some(device) => {
                    // A dropped device coming back is a new candidate
                    let known_name = device.name().to_string();
                    self.devices.remove(&id);
                    let name = if name.trim().is_empty() { known_name.as_str() } else { name };
                    self.register(address, name, rssi, now);
                    return;
                }
                None => {}
            }
        }
        self.register(address, name, rssi, now);
    }

    fn register(&mut self, address: DeviceAddress, name: &str, rssi: Option<i16>, now: Instant) {
        let id = DeviceId::new(self.next_id);
        self.next_id += 1;

        let mut device = DeviceHandle::new(id, address.clone(), name.to_string(), now);
        device.mark_seen(name, rssi, now);
        info!("Discovered {} as {}", device, id);

        self.by_address.insert(address, id);
        self.devices.insert(id, device);
    }

    fn handle_notification(&mut self, address: &DeviceAddress, data: &[u8]) {
        self.stats.frames_received += 1;

        let Some(device) = self.by_address.get(address).and_then(|id| self.devices.get_mut(id)) else {
            debug!("Notification from unknown device {}", address);
            return;
        };
        if !device.is_connected() {
            debug!("Notification from {} which is not connected", device);
            return;
        }

        let received_at_ms = self.clock_origin.elapsed().as_millis() as u32;
        match WireCodec::decode(data, received_at_ms) {
            Ok(record) => {
                let now = Instant::now();
                device.mark_seen("", None, now);
                let identity = device.identity();
                self.stats.records_decoded += 1;
                if let Some(callback) = self.on_log_received.as_mut() {
                    callback(&record, &identity);
                }
            }
            Err(e) => {
                self.stats.decode_failures += 1;
                let shown = &data[..data.len().min(HEX_DUMP_LIMIT)];
                warn!(
                    "Dropping frame of {} bytes from {}: {} [{}]",
                    data.len(),
                    address,
                    e,
                    hex::encode(shown)
                );
            }
        }
    }

    /// Catch links that dropped without the platform reporting it
    async fn check_link_health(&mut self) {
        let connected: Vec<(DeviceId, DeviceAddress)> = self
            .devices
            .values()
            .filter(|d| d.is_connected())
            .map(|d| (d.id(), d.address().clone()))
            .collect();

        for (id, address) in connected {
            if !self.link.is_connected(&address).await {
                self.release(id, "link no longer up").await;
            }
        }
    }

    fn prune_candidates(&mut self, now: Instant) {
        let ttl = self.config.candidate_ttl;
        let stale: Vec<DeviceId> = self
            .devices
            .values()
            .filter(|d| {
                matches!(d.state(), ConnectionState::Discovered | ConnectionState::Disconnected)
                    && now.duration_since(d.last_seen_at()) > ttl
            })
            .map(DeviceHandle::id)
            .collect();

        for id in stale {
            if let Some(device) = self.devices.remove(&id) {
                debug!("Forgetting {} (not seen for {:?})", device, ttl);
                self.by_address.remove(device.address());
            }
        }
    }

    async fn auto_connect(&mut self, now: Instant) {
        if !self.config.auto_connect || self.connected_count() > 0 {
            return;
        }
        if self.devices.values().any(DeviceHandle::is_connecting) {
            return;
        }
        if let Some(last) = self.last_auto_connect {
            if now.duration_since(last) < self.config.retry_interval {
                return;
            }
        }

        // Registry order is discovery order
        let Some(address) = self
            .devices
            .values()
            .find(|d| d.state() == ConnectionState::Discovered)
            .map(|d| d.address().clone())
        else {
            return;
        };

        self.last_auto_connect = Some(now);
        if let Err(e) = self.connect(&address).await {
            debug!("Automatic connection to {} failed: {}", address, e);
        }
    }

    fn notify_connection(&mut self, identity: &DeviceIdentity, connected: bool) {
        if let Some(callback) = self.on_connection_changed.as_mut() {
            callback(identity, connected);
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn connected_count(&self) -> usize {
        self.devices.values().filter(|d| d.is_connected()).count()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Every known device in discovery order
    pub fn devices(&self) -> impl Iterator<Item = &DeviceHandle> {
        self.devices.values()
    }

    pub fn device(&self, address: &DeviceAddress) -> Option<&DeviceHandle> {
        self.by_address.get(address).and_then(|id| self.devices.get(id))
    }

    pub fn connected_devices(&self) -> Vec<DeviceIdentity> {
        self.devices
            .values()
            .filter(|d| d.is_connected())
            .map(DeviceHandle::identity)
            .collect()
    }

    /// Connectable candidates as `"name (address)"`
    pub fn available_devices(&self) -> Vec<String> {
        self.devices
            .values()
            .filter(|d| d.state() == ConnectionState::Discovered)
            .map(|d| d.to_string())
            .collect()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use btlogger_core::config::DEFAULT_SERVICE_UUID;
    use btlogger_core::LogLevel;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::mock::{mock_link, MockController, MockFailure, MockLink};

    const SENSOR: &str = "AA:BB:CC:DD:EE:01";
    const OTHER: &str = "AA:BB:CC:DD:EE:02";

    type Seen<T> = Arc<Mutex<Vec<T>>>;

    struct Fixture {
        manager: ConnectionManager<MockLink>,
        controller: MockController,
        records: Seen<(LogRecord, String)>,
        connections: Seen<(String, bool)>,
    }

    fn fixture(config: LinkConfig) -> Fixture {
        let (link, controller) = mock_link();
        let mut manager = ConnectionManager::new(link, config);
        let records: Seen<(LogRecord, String)> = Arc::default();
        let connections: Seen<(String, bool)> = Arc::default();

        let sink = records.clone();
        manager.set_log_callback(move |record, device| {
            sink.lock().unwrap().push((record.clone(), device.display_name().to_string()));
        });
        let sink = connections.clone();
        manager.set_connection_callback(move |device, connected| {
            sink.lock().unwrap().push((device.display_name().to_string(), connected));
        });

        Fixture {
            manager,
            controller,
            records,
            connections,
        }
    }

    fn manual() -> LinkConfig {
        LinkConfig::default().with_auto_connect(false)
    }

    fn addr(address: &str) -> DeviceAddress {
        DeviceAddress::new(address)
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_filters_and_coalesces() {
        let mut f = fixture(manual());
        f.controller.advertise(SENSOR, "Sensor_v1");
        f.controller.advertise(SENSOR, "Sensor_v1");
        f.controller.advertise(OTHER, "Headphones");
        f.controller
            .advertise_services("AA:BB:CC:DD:EE:03", "", vec![DEFAULT_SERVICE_UUID]);
        f.manager.update().await;

        assert_eq!(f.manager.device_count(), 2);
        assert_eq!(
            f.manager.available_devices(),
            vec![
                "Sensor_v1 (AA:BB:CC:DD:EE:01)".to_string(),
                "AA:BB:CC:DD:EE:03 (AA:BB:CC:DD:EE:03)".to_string()
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_receive() {
        let mut f = fixture(manual());
        f.controller.advertise(SENSOR, "Sensor_v1");
        f.manager.update().await;

        assert_ok!(f.manager.connect(&addr(SENSOR)).await);
        assert!(f.controller.is_subscribed(SENSOR));
        assert_eq!(f.manager.connected_count(), 1);
        assert_eq!(*f.connections.lock().unwrap(), vec![("Sensor_v1".to_string(), true)]);

        let record = LogRecord::new(10, LogLevel::Error, "TEMP", "sensor fail");
        f.controller.notify_record(SENSOR, &record);
        f.manager.update().await;

        let records = f.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], (record, "Sensor_v1".to_string()));
        assert_eq!(f.manager.stats().records_decoded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_unknown_device() {
        let mut f = fixture(manual());
        let err = assert_err!(f.manager.connect(&addr(SENSOR)).await);
        assert!(matches!(err, ConnectError::UnknownDevice { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_twice_is_noop() {
        let mut f = fixture(manual());
        f.controller.advertise(SENSOR, "Sensor_v1");
        f.manager.update().await;

        assert_ok!(f.manager.connect(&addr(SENSOR)).await);
        assert_ok!(f.manager.connect(&addr(SENSOR)).await);
        assert_eq!(f.controller.connect_calls().len(), 1);
        assert_eq!(f.connections.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_steps_roll_back() {
        for failure in [
            MockFailure::Link,
            MockFailure::MissingService,
            MockFailure::MissingCharacteristic,
            MockFailure::Subscribe,
        ] {
            let mut f = fixture(manual());
            f.controller.advertise(SENSOR, "Sensor_v1");
            f.controller.fail_connections(SENSOR, failure);
            f.manager.update().await;

            assert_err!(f.manager.connect(&addr(SENSOR)).await);
            let device = f.manager.device(&addr(SENSOR)).unwrap();
            assert_eq!(device.state(), ConnectionState::Discovered);
            assert_eq!(device.failed_attempts(), 1);
            assert!(!f.controller.is_linked(SENSOR));
            assert!(!f.controller.is_subscribed(SENSOR));
            assert!(f.connections.lock().unwrap().is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let config = manual().with_connection_timeout(Duration::from_millis(200));
        let mut f = fixture(config);
        f.controller.advertise(SENSOR, "Sensor_v1");
        f.controller.fail_connections(SENSOR, MockFailure::Hang);
        f.manager.update().await;

        let err = assert_err!(f.manager.connect(&addr(SENSOR)).await);
        assert_eq!(
            err,
            ConnectError::Timeout {
                address: SENSOR.to_string(),
                timeout_ms: 200
            }
        );
        assert_eq!(
            f.manager.device(&addr(SENSOR)).unwrap().state(),
            ConnectionState::Discovered
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_channel_resolution_times_out() {
        let config = manual().with_connection_timeout(Duration::from_millis(200));
        let mut f = fixture(config);
        f.controller.advertise(SENSOR, "Sensor_v1");
        f.controller.fail_connections(SENSOR, MockFailure::HangResolve);
        f.manager.update().await;

        let started = Instant::now();
        let err = assert_err!(f.manager.connect(&addr(SENSOR)).await);
        assert!(matches!(err, ConnectError::Timeout { timeout_ms: 200, .. }));
        assert!(started.elapsed() < Duration::from_secs(1));

        // The link acquired before the hang is released again
        assert!(!f.controller.is_linked(SENSOR));
        assert_eq!(f.controller.disconnect_calls(), vec![addr(SENSOR)]);
        assert_eq!(
            f.manager.device(&addr(SENSOR)).unwrap().state(),
            ConnectionState::Discovered
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_signal_cancels_connect() {
        let mut f = fixture(manual());
        let (stop_tx, stop_rx) = watch::channel(false);
        f.manager.set_shutdown_signal(stop_rx);
        f.controller.advertise(SENSOR, "Sensor_v1");
        f.controller.fail_connections(SENSOR, MockFailure::Hang);
        f.manager.update().await;

        let started = Instant::now();
        let sensor = addr(SENSOR);
        let (result, ()) = tokio::join!(f.manager.connect(&sensor), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop_tx.send_replace(true);
        });
        let err = assert_err!(result);
        assert_eq!(
            err,
            ConnectError::Cancelled {
                address: SENSOR.to_string()
            }
        );
        assert!(started.elapsed() < f.manager.config().connection_timeout);
        assert!(f.connections.lock().unwrap().is_empty());

        // Once stopping, no new attempt gets under way
        let err = assert_err!(f.manager.connect(&addr(SENSOR)).await);
        assert!(matches!(err, ConnectError::Cancelled { .. }));
        assert_eq!(f.controller.connect_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_connect_is_paced() {
        let mut f = fixture(LinkConfig::default());
        f.controller.advertise(SENSOR, "Sensor_v1");
        f.controller.fail_connections(SENSOR, MockFailure::Link);

        f.manager.update().await;
        assert_eq!(f.controller.connect_calls().len(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        f.manager.update().await;
        assert_eq!(f.controller.connect_calls().len(), 1);

        f.controller.clear_failures(SENSOR);
        tokio::time::advance(Duration::from_secs(3)).await;
        f.manager.update().await;
        assert_eq!(f.controller.connect_calls().len(), 2);
        assert_eq!(f.manager.connected_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_connect_picks_oldest_candidate() {
        let mut f = fixture(LinkConfig::default());
        f.controller.advertise(OTHER, "Weather_v2");
        f.controller.advertise(SENSOR, "Sensor_v1");
        f.manager.update().await;

        assert_eq!(f.controller.connect_calls(), vec![addr(OTHER)]);
        assert!(f.manager.device(&addr(OTHER)).unwrap().is_connected());

        // Nothing more while one device is connected
        tokio::time::advance(Duration::from_secs(5)).await;
        f.manager.update().await;
        assert_eq!(f.controller.connect_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_and_rediscovery() {
        let mut f = fixture(manual());
        f.controller.advertise(SENSOR, "Sensor_v1");
        f.manager.update().await;
        let first_id = f.manager.device(&addr(SENSOR)).unwrap().id();
        assert_ok!(f.manager.connect(&addr(SENSOR)).await);

        f.controller.lose_link(SENSOR);
        f.manager.update().await;
        assert_eq!(
            f.manager.device(&addr(SENSOR)).unwrap().state(),
            ConnectionState::Disconnected
        );
        assert_eq!(
            *f.connections.lock().unwrap(),
            vec![("Sensor_v1".to_string(), true), ("Sensor_v1".to_string(), false)]
        );

        // Re-advertised by service only, so the known name is kept
        f.controller
            .advertise_services(SENSOR, "", vec![DEFAULT_SERVICE_UUID]);
        f.manager.update().await;
        let device = f.manager.device(&addr(SENSOR)).unwrap();
        assert_eq!(device.state(), ConnectionState::Discovered);
        assert_eq!(device.name(), "Sensor_v1");
        assert!(device.id() > first_id);
        assert_eq!(f.manager.device_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_detects_silent_drop() {
        let mut f = fixture(manual());
        f.controller.advertise(SENSOR, "Sensor_v1");
        f.manager.update().await;
        assert_ok!(f.manager.connect(&addr(SENSOR)).await);

        f.controller.drop_silently(SENSOR);
        tokio::time::advance(Duration::from_secs(2)).await;
        f.manager.update().await;

        assert_eq!(f.manager.connected_count(), 0);
        assert_eq!(f.connections.lock().unwrap().last(), Some(&("Sensor_v1".to_string(), false)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let mut f = fixture(manual());
        f.controller.advertise(SENSOR, "Sensor_v1");
        f.manager.update().await;
        assert_ok!(f.manager.connect(&addr(SENSOR)).await);

        assert_ok!(f.manager.disconnect(&addr(SENSOR)).await);
        assert_ok!(f.manager.disconnect(&addr(SENSOR)).await);
        assert_eq!(f.connections.lock().unwrap().len(), 2);
        assert_eq!(f.manager.stats().disconnects, 1);
        assert!(!f.controller.is_linked(SENSOR));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_failures_are_counted() {
        let mut f = fixture(manual());
        f.controller.advertise(SENSOR, "Sensor_v1");
        f.manager.update().await;
        assert_ok!(f.manager.connect(&addr(SENSOR)).await);

        let mut frame = WireCodec::encode(&LogRecord::new(0, LogLevel::Info, "T", "m"));
        frame[5..7].copy_from_slice(&999u16.to_le_bytes());
        f.controller.notify(SENSOR, frame.to_vec());
        f.controller.notify(SENSOR, Vec::new());
        f.manager.update().await;

        assert_eq!(f.manager.stats().decode_failures, 2);
        assert!(f.records.lock().unwrap().is_empty());
        assert_eq!(f.manager.connected_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_legacy_text_frames_are_delivered() {
        let mut f = fixture(manual());
        f.controller.advertise(SENSOR, "Sensor_v1");
        f.manager.update().await;
        assert_ok!(f.manager.connect(&addr(SENSOR)).await);

        f.controller.notify(SENSOR, b"plain text".to_vec());
        f.manager.update().await;

        let records = f.records.lock().unwrap();
        assert_eq!(records[0].0.tag(), "REMOTE");
        assert_eq!(records[0].0.message(), "plain text");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_cycle() {
        let config = manual()
            .with_scan_duration(Duration::from_secs(10))
            .with_scan_restart_interval(Duration::from_secs(30));
        let mut f = fixture(config);

        assert_ok!(f.manager.start_scanning().await);
        assert_ok!(f.manager.start_scanning().await);
        assert_eq!(f.controller.scan_starts(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        f.manager.update().await;
        assert!(!f.manager.is_scanning());
        assert!(!f.controller.is_scanning());

        tokio::time::advance(Duration::from_secs(31)).await;
        f.manager.update().await;
        assert!(f.manager.is_scanning());
        assert_eq!(f.controller.scan_starts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_candidates_are_pruned() {
        let config = manual().with_candidate_ttl(Duration::from_secs(5));
        let mut f = fixture(config);
        f.controller.advertise(SENSOR, "Sensor_v1");
        f.manager.update().await;
        assert_eq!(f.manager.device_count(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        f.manager.update().await;
        assert_eq!(f.manager.device_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_all() {
        let mut f = fixture(manual());
        f.controller.advertise(SENSOR, "Sensor_v1");
        f.controller.advertise(OTHER, "Weather_v2");
        f.manager.update().await;
        assert_ok!(f.manager.connect(&addr(SENSOR)).await);
        assert_ok!(f.manager.connect(&addr(OTHER)).await);
        assert_eq!(f.manager.connected_devices().len(), 2);

        f.manager.disconnect_all().await;
        assert_eq!(f.manager.connected_count(), 0);
        assert_eq!(f.controller.disconnect_calls().len(), 2);
    }
}
