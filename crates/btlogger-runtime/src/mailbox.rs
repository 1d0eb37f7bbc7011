//! Bounded mailboxes between execution contexts
//!
//! A mailbox is a bounded FIFO of owned `CoreMessage`s. Senders never wait
//! longer than the configured send timeout, receivers never wait longer than
//! the poll interval they pass in.

use std::time::Duration;

use btlogger_core::{CoreMessage, MailboxError};
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio::time::timeout;

/// Create a mailbox and its sending half
pub fn mailbox(name: &'static str, capacity: usize, send_timeout: Duration) -> (MailboxSender, Mailbox) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        MailboxSender {
            name,
            tx,
            send_timeout,
        },
        Mailbox { name, rx },
    )
}

/// Outcome of waiting on a mailbox
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    Message(CoreMessage),
    /// Nothing arrived within the wait
    Empty,
    /// Every sender is gone
    Closed,
}

// ----------------------------------------------------------------------------
// Sending Half
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MailboxSender {
    name: &'static str,
    tx: mpsc::Sender<CoreMessage>,
    send_timeout: Duration,
}

impl MailboxSender {
    /// Enqueue, waiting at most the send timeout for space
    pub async fn send(&self, message: CoreMessage) -> Result<(), MailboxError> {
        self.tx
            .send_timeout(message, self.send_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => MailboxError::Full,
                SendTimeoutError::Closed(_) => MailboxError::Closed,
            })
    }

    /// Enqueue only if there is space right now
    pub fn try_send(&self, message: CoreMessage) -> Result<(), MailboxError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => MailboxError::Full,
            TrySendError::Closed(_) => MailboxError::Closed,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ----------------------------------------------------------------------------
// Receiving Half
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct Mailbox {
    name: &'static str,
    rx: mpsc::Receiver<CoreMessage>,
}

impl Mailbox {
    pub async fn recv_timeout(&mut self, wait: Duration) -> Received {
        match timeout(wait, self.rx.recv()).await {
            Ok(Some(message)) => Received::Message(message),
            Ok(None) => Received::Closed,
            Err(_) => Received::Empty,
        }
    }

    pub fn try_recv(&mut self) -> Option<CoreMessage> {
        self.rx.try_recv().ok()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btlogger_core::{FileOp, MessageKind};

    #[tokio::test(start_paused = true)]
    async fn test_send_times_out_when_full() {
        let (tx, mut rx) = mailbox("test", 1, Duration::from_millis(100));
        tx.send(CoreMessage::start_scan()).await.unwrap();

        let started = tokio::time::Instant::now();
        assert_eq!(tx.send(CoreMessage::stop_scan()).await, Err(MailboxError::Full));
        assert!(started.elapsed() >= Duration::from_millis(100));

        assert_eq!(rx.try_recv().map(|m| m.kind()), Some(MessageKind::StartScan));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_try_send_reports_full_and_closed() {
        let (tx, rx) = mailbox("test", 1, Duration::from_millis(100));
        assert!(tx.try_send(CoreMessage::shutdown()).is_ok());
        assert_eq!(tx.try_send(CoreMessage::shutdown()), Err(MailboxError::Full));

        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(
            tx.send(CoreMessage::file_operation(FileOp::List, "")).await,
            Err(MailboxError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_timeout() {
        let (tx, mut rx) = mailbox("test", 4, Duration::from_millis(100));
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)).await, Received::Empty);

        tx.try_send(CoreMessage::shutdown()).unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(10)).await,
            Received::Message(CoreMessage::shutdown())
        );

        drop(tx);
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)).await, Received::Closed);
    }
}
