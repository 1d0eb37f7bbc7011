//! Boundary to the latency-sensitive presentation layer

use async_trait::async_trait;
use btlogger_core::CoreMessage;

use crate::mailbox::MailboxSender;

/// Consumer of records and connection events, driven by the Presentation
/// context. Commands go back to the Communications context through
/// `commands`.
#[async_trait]
pub trait PresentationLayer: Send {
    /// Handle one message from the Presentation mailbox
    async fn handle_message(&mut self, message: CoreMessage, commands: &MailboxSender);

    /// Periodic work, called after every mailbox poll
    async fn update(&mut self, _commands: &MailboxSender) {}

    /// Called once when the Presentation context exits normally
    async fn on_shutdown(&mut self) {}
}
