//! Scheduler Builder API
//!
//! Collects the configuration of every component, validates it, and wires a
//! connection manager, session log and presentation layer into a
//! `DualContextScheduler`.

use btlogger_ble::{BleLink, ConnectionManager};
use btlogger_core::{LinkConfig, LoggerResult, SchedulerConfig, StorageConfig};
use tracing::info;

use crate::presentation::PresentationLayer;
use crate::scheduler::DualContextScheduler;
use crate::session_log::SessionLog;

// ----------------------------------------------------------------------------
// Scheduler Builder
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SchedulerBuilder {
    scheduler: SchedulerConfig,
    storage: StorageConfig,
    link: LinkConfig,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    pub fn with_storage_config(mut self, config: StorageConfig) -> Self {
        self.storage = config;
        self
    }

    pub fn with_link_config(mut self, config: LinkConfig) -> Self {
        self.link = config;
        self
    }

    /// Set both mailbox capacities
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.scheduler.mailbox_capacity = capacity;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.scheduler.shutdown_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.scheduler.poll_interval = interval;
        self
    }

    /// Validate the configuration and assemble a scheduler around `link`.
    /// Nothing runs until `start()` is called on the result.
    pub fn build<L: BleLink + 'static>(
        self,
        link: L,
        presentation: impl PresentationLayer + 'static,
    ) -> LoggerResult<DualContextScheduler<L>> {
        self.scheduler.validate()?;
        self.storage.validate()?;
        self.link.validate()?;

        info!("Session files under {}", self.storage.root.display());
        let manager = ConnectionManager::new(link, self.link);
        let storage = SessionLog::new(self.storage);

        Ok(DualContextScheduler::new(
            self.scheduler,
            manager,
            storage,
            Box::new(presentation),
        ))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use btlogger_ble::mock::mock_link;
    use btlogger_core::{CoreMessage, LoggerError};

    use super::*;
    use crate::mailbox::MailboxSender;

    struct Silent;

    #[async_trait]
    impl PresentationLayer for Silent {
        async fn handle_message(&mut self, _message: CoreMessage, _commands: &MailboxSender) {}
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_rejected() {
        let (link, _controller) = mock_link();
        let result = SchedulerBuilder::new().mailbox_capacity(0).build(link, Silent);
        assert!(matches!(result, Err(LoggerError::Config(_))));
    }

    #[tokio::test]
    async fn test_build_applies_configuration() {
        let dir = tempfile::TempDir::new().unwrap();
        let (link, _controller) = mock_link();
        let scheduler = SchedulerBuilder::new()
            .with_storage_config(StorageConfig::new(dir.path()))
            .mailbox_capacity(4)
            .build(link, Silent)
            .unwrap();
        assert_eq!(scheduler.config().mailbox_capacity, 4);
        assert!(!scheduler.is_running());
    }
}
