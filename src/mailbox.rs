//! Closeable sender façade over the server inbox.
//!
//! The server closes the mailbox at the start of cleanup. A caller racing
//! that close either lands its message in the buffer before the guarded
//! sender is dropped (and is refused during the drain) or observes `Closed`
//! synchronously; no accepted message is silently lost.

use crossbeam::channel::Sender;
use parking_lot::RwLock;

use crate::error::{WrapperError, WrapperResult};

pub(crate) struct Mailbox<T> {
    sender: RwLock<Option<Sender<T>>>,
}

impl<T> Mailbox<T> {
    pub(crate) fn new(sender: Sender<T>) -> Self {
        Self {
            sender: RwLock::new(Some(sender)),
        }
    }

    pub(crate) fn send(&self, message: T) -> WrapperResult<()> {
        let guard = self.sender.read();
        match guard.as_ref() {
            Some(sender) => sender.send(message).map_err(|_| WrapperError::Closed),
            None => Err(WrapperError::Closed),
        }
    }

    /// Build the message under the read lock, so payloads exported with move
    /// semantics are not consumed when the mailbox is already closed.
    pub(crate) fn send_with(
        &self,
        build: impl FnOnce() -> WrapperResult<T>,
    ) -> WrapperResult<()> {
        let guard = self.sender.read();
        let sender = guard.as_ref().ok_or(WrapperError::Closed)?;
        sender.send(build()?).map_err(|_| WrapperError::Closed)
    }

    pub(crate) fn close(&self) {
        *self.sender.write() = None;
    }
}
