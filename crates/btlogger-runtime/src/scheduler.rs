//! Dual-context scheduler
//!
//! Runs the Communications context (radio and storage I/O) and the
//! Presentation context as two tokio tasks joined only by bounded mailboxes.
//! Shutdown is cooperative: both contexts are told to stop and given a grace
//! period, after which whatever is still running is aborted. A connection
//! attempt in flight is abandoned as soon as shutdown begins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use btlogger_ble::{BleLink, ConnectionManager};
use btlogger_core::{CoreMessage, MailboxError, SchedulerConfig, SchedulerError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info};

use crate::communications::CommunicationsTask;
use crate::mailbox::{mailbox, Mailbox, MailboxSender, Received};
use crate::presentation::PresentationLayer;
use crate::session_log::SessionLog;

pub const COMMUNICATIONS: &str = "communications";
pub const PRESENTATION: &str = "presentation";

/// How `stop()` went
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Both contexts exited on their own
    pub graceful: bool,
    /// Contexts that had to be aborted
    pub forced_contexts: Vec<&'static str>,
    pub elapsed: Duration,
}

/// Everything moved into the two tasks on `start()`
struct Contexts<L: BleLink> {
    manager: ConnectionManager<L>,
    storage: SessionLog,
    presentation: Box<dyn PresentationLayer>,
    communications_mailbox: Mailbox,
    presentation_mailbox: Mailbox,
}

// ----------------------------------------------------------------------------
// Scheduler
// ----------------------------------------------------------------------------

pub struct DualContextScheduler<L: BleLink + 'static> {
    config: SchedulerConfig,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    communications_alive: Arc<AtomicBool>,
    presentation_alive: Arc<AtomicBool>,
    communications_tx: MailboxSender,
    presentation_tx: MailboxSender,
    contexts: Option<Contexts<L>>,
    communications_handle: Option<JoinHandle<()>>,
    presentation_handle: Option<JoinHandle<()>>,
}

impl<L: BleLink + 'static> DualContextScheduler<L> {
    pub fn new(
        config: SchedulerConfig,
        manager: ConnectionManager<L>,
        storage: SessionLog,
        presentation: Box<dyn PresentationLayer>,
    ) -> Self {
        let (communications_tx, communications_mailbox) =
            mailbox(COMMUNICATIONS, config.mailbox_capacity, config.send_timeout);
        let (presentation_tx, presentation_mailbox) =
            mailbox(PRESENTATION, config.mailbox_capacity, config.send_timeout);

        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            communications_alive: Arc::new(AtomicBool::new(false)),
            presentation_alive: Arc::new(AtomicBool::new(false)),
            communications_tx,
            presentation_tx,
            contexts: Some(Contexts {
                manager,
                storage,
                presentation,
                communications_mailbox,
                presentation_mailbox,
            }),
            communications_handle: None,
            presentation_handle: None,
        }
    }

    /// Spawn both contexts. Calling this while running does nothing; a
    /// stopped scheduler cannot be started again.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.is_running() {
            debug!("Scheduler already running");
            return Ok(());
        }
        let mut contexts = self.contexts.take().ok_or(SchedulerError::AlreadyStarted)?;
        contexts.manager.set_shutdown_signal(self.shutdown_tx.subscribe());
        info!("Starting communications and presentation contexts");

        self.running.store(true, Ordering::Release);
        self.communications_alive.store(true, Ordering::Release);
        self.presentation_alive.store(true, Ordering::Release);

        let communications = CommunicationsTask::new(
            contexts.manager,
            contexts.storage,
            contexts.communications_mailbox,
            self.presentation_tx.clone(),
            self.running.clone(),
            self.communications_alive.clone(),
            self.config.poll_interval,
        );
        self.communications_handle = Some(tokio::spawn(communications.run()));

        self.presentation_handle = Some(tokio::spawn(run_presentation(
            contexts.presentation,
            contexts.presentation_mailbox,
            self.communications_tx.clone(),
            self.running.clone(),
            self.presentation_alive.clone(),
            self.config.poll_interval,
        )));

        Ok(())
    }

    /// Stop both contexts, aborting any that outlive the shutdown timeout
    pub async fn stop(&mut self) -> ShutdownReport {
        let started = Instant::now();
        self.running.store(false, Ordering::Release);
        self.shutdown_tx.send_replace(true);

        // A full mailbox is fine: the cleared flag ends the loop as well
        for sender in [&self.communications_tx, &self.presentation_tx] {
            if let Err(e) = sender.try_send(CoreMessage::shutdown()) {
                debug!("Shutdown not queued for {}: {}", sender.name(), e);
            }
        }

        let deadline = started + self.config.shutdown_timeout;
        let mut forced_contexts = Vec::new();
        let handles = [
            (COMMUNICATIONS, self.communications_handle.take()),
            (PRESENTATION, self.presentation_handle.take()),
        ];
        for (name, handle) in handles {
            let Some(mut handle) = handle else {
                continue;
            };
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!("{} context finished", name),
                Ok(Err(e)) => error!("{} context failed: {}", name, e),
                Err(_) => {
                    handle.abort();
                    forced_contexts.push(name);
                }
            }
        }

        self.communications_alive.store(false, Ordering::Release);
        self.presentation_alive.store(false, Ordering::Release);

        if !forced_contexts.is_empty() {
            let err = SchedulerError::ShutdownTimeout {
                timeout: self.config.shutdown_timeout,
                contexts: forced_contexts.iter().map(|c| c.to_string()).collect(),
            };
            error!("{}", err);
        }

        let report = ShutdownReport {
            graceful: forced_contexts.is_empty(),
            forced_contexts,
            elapsed: started.elapsed(),
        };
        info!("Scheduler stopped in {:?}", report.elapsed);
        report
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    pub async fn send_to_communications(&self, message: CoreMessage) -> Result<(), MailboxError> {
        self.communications_tx.send(message).await
    }

    pub async fn send_to_ui(&self, message: CoreMessage) -> Result<(), MailboxError> {
        self.presentation_tx.send(message).await
    }

    pub fn communications_sender(&self) -> MailboxSender {
        self.communications_tx.clone()
    }

    pub fn ui_sender(&self) -> MailboxSender {
        self.presentation_tx.clone()
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_communications_running(&self) -> bool {
        self.communications_alive.load(Ordering::Acquire)
    }

    pub fn is_presentation_running(&self) -> bool {
        self.presentation_alive.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl<L: BleLink + 'static> Drop for DualContextScheduler<L> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.shutdown_tx.send_replace(true);
        for handle in [self.communications_handle.take(), self.presentation_handle.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Presentation Context
// ----------------------------------------------------------------------------

async fn run_presentation(
    mut layer: Box<dyn PresentationLayer>,
    mut mailbox: Mailbox,
    commands: MailboxSender,
    running: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    info!("Presentation context started");

    while running.load(Ordering::Acquire) {
        match mailbox.recv_timeout(poll_interval).await {
            Received::Message(message) if message.is_shutdown() => {
                info!("Presentation context received shutdown");
                break;
            }
            Received::Message(message) => layer.handle_message(message, &commands).await,
            Received::Empty => {}
            Received::Closed => break,
        }
        layer.update(&commands).await;
    }

    layer.on_shutdown().await;
    alive.store(false, Ordering::Release);
    info!("Presentation context stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use btlogger_ble::mock::{mock_link, MockLink};
    use btlogger_core::{LinkConfig, MessageKind, StorageConfig};
    use tempfile::TempDir;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<CoreMessage>>>,
    }

    #[async_trait]
    impl PresentationLayer for Recorder {
        async fn handle_message(&mut self, message: CoreMessage, _commands: &MailboxSender) {
            self.seen.lock().unwrap().push(message);
        }
    }

    fn scheduler(dir: &TempDir, presentation: Box<dyn PresentationLayer>) -> DualContextScheduler<MockLink> {
        let (link, _controller) = mock_link();
        let manager = ConnectionManager::new(link, LinkConfig::default().with_auto_connect(false));
        let storage = SessionLog::new(StorageConfig::new(dir.path()));
        DualContextScheduler::new(SchedulerConfig::default(), manager, storage, presentation)
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = TempDir::new().unwrap();
        let mut scheduler = scheduler(&dir, Box::<Recorder>::default());
        assert!(!scheduler.is_running());

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        assert!(scheduler.is_communications_running());
        assert!(scheduler.is_presentation_running());
        // Starting again while running is a no-op
        scheduler.start().unwrap();

        let report = scheduler.stop().await;
        assert!(report.graceful);
        assert!(report.forced_contexts.is_empty());
        assert!(!scheduler.is_running());
        assert!(!scheduler.is_communications_running());
        assert!(!scheduler.is_presentation_running());

        assert_eq!(scheduler.start(), Err(SchedulerError::AlreadyStarted));
    }

    #[tokio::test]
    async fn test_file_list_reaches_presentation() {
        let dir = TempDir::new().unwrap();
        let recorder = Recorder::default();
        let seen = recorder.seen.clone();
        let mut scheduler = scheduler(&dir, Box::new(recorder));
        scheduler.start().unwrap();

        scheduler
            .send_to_communications(CoreMessage::file_operation(btlogger_core::FileOp::List, ""))
            .await
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline && seen.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.stop().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].kind(), MessageKind::UiEvent);
        assert_eq!(seen[0].payload_a(), "session_list");
        assert_eq!(seen[0].value_a(), 0);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let dir = TempDir::new().unwrap();
        let mut scheduler = scheduler(&dir, Box::<Recorder>::default());
        let report = scheduler.stop().await;
        assert!(report.graceful);
    }
}
