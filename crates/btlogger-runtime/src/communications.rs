//! Communications context
//!
//! Owns the connection manager and the session log. Connection manager
//! callbacks only queue events; the loop applies them to storage and
//! forwards them to the Presentation mailbox once `update()` returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use btlogger_ble::{BleLink, ConnectionManager};
use btlogger_core::{Command, CoreMessage, DeviceIdentity, FileOp, LogRecord, MailboxError, UiEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::mailbox::{Mailbox, MailboxSender, Received};
use crate::session_log::SessionLog;

/// What the connection manager reported during one update
#[derive(Debug)]
enum ManagerEvent {
    Record { record: LogRecord, device: DeviceIdentity },
    Connection { device: DeviceIdentity, connected: bool },
}

// ----------------------------------------------------------------------------
// Communications Task
// ----------------------------------------------------------------------------

pub(crate) struct CommunicationsTask<L: BleLink> {
    manager: ConnectionManager<L>,
    storage: SessionLog,
    mailbox: Mailbox,
    ui: MailboxSender,
    events: mpsc::UnboundedReceiver<ManagerEvent>,
    running: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl<L: BleLink> CommunicationsTask<L> {
    pub(crate) fn new(
        mut manager: ConnectionManager<L>,
        storage: SessionLog,
        mailbox: Mailbox,
        ui: MailboxSender,
        running: Arc<AtomicBool>,
        alive: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();

        let tx = events_tx.clone();
        manager.set_log_callback(move |record, device| {
            let _ = tx.send(ManagerEvent::Record {
                record: record.clone(),
                device: device.clone(),
            });
        });
        manager.set_connection_callback(move |device, connected| {
            let _ = events_tx.send(ManagerEvent::Connection {
                device: device.clone(),
                connected,
            });
        });

        Self {
            manager,
            storage,
            mailbox,
            ui,
            events,
            running,
            alive,
            poll_interval,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("Communications context started");
        if let Err(e) = self.manager.start_scanning().await {
            warn!("Initial scan failed: {}", e);
        }

        while self.running.load(Ordering::Acquire) {
            match self.mailbox.recv_timeout(self.poll_interval).await {
                Received::Message(message) if message.is_shutdown() => {
                    info!("Communications context received shutdown");
                    break;
                }
                Received::Message(message) => self.handle_command(message).await,
                Received::Empty => {}
                Received::Closed => {
                    debug!("Communications mailbox closed");
                    break;
                }
            }

            self.manager.update().await;
            self.apply_events();
        }

        self.manager.disconnect_all().await;
        self.apply_events();
        self.storage.close_all();

        self.alive.store(false, Ordering::Release);
        info!("Communications context stopped");
    }

    async fn handle_command(&mut self, message: CoreMessage) {
        let Some(command) = message.command() else {
            warn!("Ignoring {} on the communications mailbox", message);
            return;
        };

        let outcome = match command {
            Command::Connect(address) => self.manager.connect(&address).await.map_err(|e| e.to_string()),
            Command::Disconnect(address) => self.manager.disconnect(&address).await.map_err(|e| e.to_string()),
            Command::StartScan => self.manager.start_scanning().await.map_err(|e| e.to_string()),
            Command::StopScan => self.manager.stop_scanning().await.map_err(|e| e.to_string()),
            Command::File { op, path } => {
                let event = self.file_operation(op, path);
                self.forward(CoreMessage::ui_event(event));
                Ok(())
            }
            Command::Shutdown => Ok(()),
        };

        if let Err(reason) = outcome {
            self.forward(CoreMessage::ui_event(UiEvent::CommandFailed { reason }));
        }
    }

    fn file_operation(&mut self, op: FileOp, path: String) -> UiEvent {
        let result = match op {
            FileOp::Load => self
                .storage
                .load_session(&path)
                .map(|lines| UiEvent::FileLoaded { path, lines }),
            FileOp::Delete => self
                .storage
                .delete_file(&path)
                .map(|success| UiEvent::FileDeleted { path, success }),
            FileOp::List => Ok(UiEvent::SessionList {
                paths: self.storage.list_sessions().into_iter().map(|f| f.path).collect(),
            }),
        };

        result.unwrap_or_else(|e| {
            warn!("File operation {} failed: {}", op.as_str(), e);
            UiEvent::CommandFailed { reason: e.to_string() }
        })
    }

    /// Persist and forward everything the manager reported
    fn apply_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                ManagerEvent::Record { record, device } => {
                    if let Err(e) = self.storage.append(&device, &record) {
                        warn!("Failed to store record from {}: {}", device, e);
                    }
                    self.forward(CoreMessage::log_received(&record, &device));
                }
                ManagerEvent::Connection { device, connected } => {
                    let stored = if connected {
                        self.storage.start_session(&device).map(|_| ())
                    } else {
                        self.storage.end_session(&device.address).map(|_| ())
                    };
                    if let Err(e) = stored {
                        warn!("Session bookkeeping for {} failed: {}", device, e);
                    }
                    let count = self.manager.connected_count();
                    self.forward(CoreMessage::device_connection(&device, connected, count));
                }
            }
        }
    }

    fn forward(&self, message: CoreMessage) {
        match self.ui.try_send(message) {
            Ok(()) => {}
            Err(MailboxError::Full) => warn!("Presentation mailbox full, dropping message"),
            Err(MailboxError::Closed) => debug!("Presentation mailbox closed"),
        }
    }
}
