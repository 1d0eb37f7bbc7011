//! Console presentation layer
//!
//! Stand-in for a display: every record and connection change is written
//! through `tracing`, alerts at `warn`.

use async_trait::async_trait;
use tracing::{info, warn};

use btlogger_core::{CoreMessage, MessageKind, UiEvent};
use btlogger_runtime::{MailboxSender, PresentationLayer};

#[derive(Debug, Default)]
pub struct ConsolePresentation {
    records: u64,
    alerts: u64,
    connected: u32,
}

impl ConsolePresentation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn alerts(&self) -> u64 {
        self.alerts
    }

    /// Linked producers as of the last connection event
    pub fn connected(&self) -> u32 {
        self.connected
    }

    fn show_ui_event(&self, event: UiEvent) {
        match event {
            UiEvent::FileLoaded { path, lines } => {
                info!("{} ({} lines)", path, lines.len());
                for line in lines {
                    info!("  {}", line);
                }
            }
            UiEvent::FileDeleted { path, success } => {
                if success {
                    info!("Deleted {}", path);
                } else {
                    info!("Nothing to delete at {}", path);
                }
            }
            UiEvent::SessionList { paths } => {
                info!("{} session files", paths.len());
                for path in paths {
                    info!("  {}", path);
                }
            }
            UiEvent::CommandFailed { reason } => warn!("Command failed: {}", reason),
        }
    }
}

#[async_trait]
impl PresentationLayer for ConsolePresentation {
    async fn handle_message(&mut self, message: CoreMessage, _commands: &MailboxSender) {
        match message.kind() {
            MessageKind::LogReceived => {
                let Some(record) = message.log_record() else {
                    warn!("Malformed record message: {}", message);
                    return;
                };
                self.records += 1;
                if record.level().is_alert() {
                    self.alerts += 1;
                    warn!(
                        "[{}] {} {} {}: {}",
                        message.payload_a(),
                        record.timestamp(),
                        record.level(),
                        record.tag(),
                        record.message()
                    );
                } else {
                    info!(
                        "[{}] {} {} {}: {}",
                        message.payload_a(),
                        record.timestamp(),
                        record.level(),
                        record.tag(),
                        record.message()
                    );
                }
            }
            MessageKind::DeviceConnection => {
                self.connected = message.value_b();
                if let Some((name, connected)) = message.connection() {
                    let change = if connected { "connected" } else { "disconnected" };
                    info!("{} {} ({} linked)", name, change, self.connected);
                }
            }
            MessageKind::UiEvent => {
                if let Some(event) = message.ui_event_view() {
                    self.show_ui_event(event);
                }
            }
            _ => {}
        }
    }

    async fn on_shutdown(&mut self) {
        info!("Received {} records, {} alerts", self.records, self.alerts);
    }
}
