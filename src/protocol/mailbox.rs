//! Bounded per-agent mailboxes.
//!
//! A mailbox is a FIFO queue with a single consuming side. Producers hold a
//! [`MailboxSender`] and wait when the queue is full instead of dropping messages.
//! Closing the mailbox wakes every waiter on both sides.

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::message::AclMessage;
use crate::error::{Error, Result};

/// Default number of messages a mailbox holds before producers wait.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1000;

/// Producer handle of a mailbox.
#[derive(Debug, Clone)]
pub struct MailboxSender {
    tx: mpsc::Sender<AclMessage>,
    closed: CancellationToken,
}

impl MailboxSender {
    /// Queue a message, waiting for room if the mailbox is full.
    pub async fn deliver(&self, msg: AclMessage) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::inactive("mailbox"));
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::inactive("mailbox")),
            res = self.tx.send(msg) => res.map_err(|_| Error::inactive("mailbox")),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

/// An ordered, bounded message queue.
#[derive(Debug)]
pub struct Mailbox {
    tx: mpsc::Sender<AclMessage>,
    rx: Mutex<mpsc::Receiver<AclMessage>>,
    closed: CancellationToken,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            closed: CancellationToken::new(),
        }
    }

    pub fn sender(&self) -> MailboxSender {
        MailboxSender {
            tx: self.tx.clone(),
            closed: self.closed.clone(),
        }
    }

    /// Queue a message into this mailbox.
    pub async fn deliver(&self, msg: AclMessage) -> Result<()> {
        self.sender().deliver(msg).await
    }

    /// Drain everything currently queued without waiting.
    ///
    /// Returns an empty list when another consumer is parked in
    /// [`receive_blocking`](Self::receive_blocking), since that consumer owns the
    /// next message anyway.
    pub fn receive_all(&self) -> Result<Vec<AclMessage>> {
        self.ensure_open()?;
        let mut msgs = Vec::new();
        if let Ok(mut rx) = self.rx.try_lock() {
            while let Ok(msg) = rx.try_recv() {
                msgs.push(msg);
            }
        }
        Ok(msgs)
    }

    /// Wait for the next message.
    ///
    /// Fails with an inactive error as soon as the mailbox is closed, including
    /// while the caller is already waiting.
    pub async fn receive_blocking(&self) -> Result<AclMessage> {
        self.ensure_open()?;
        let mut rx = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(Error::inactive("mailbox")),
            rx = self.rx.lock() => rx,
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::inactive("mailbox")),
            msg = rx.recv() => msg.ok_or_else(|| Error::inactive("mailbox")),
        }
    }

    /// Mark the mailbox inactive. Calling this more than once is harmless.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            Err(Error::inactive("mailbox"))
        } else {
            Ok(())
        }
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_CAPACITY)
    }
}
