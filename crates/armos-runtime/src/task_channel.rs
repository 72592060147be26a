//! Task channel – the only conduit from the intent unit to the reflex unit.
//!
//! A FIFO, single-producer/single-consumer queue.  The producer side may live
//! on a Tokio task and the consumer on a plain OS thread: neither side ever
//! blocks.  Raw [`CommandMessage`]s are validated on the way in, so the
//! executor only ever sees well-formed [`Command`]s.
//!
//! # Example
//!
//! ```rust
//! use armos_runtime::task_channel;
//! use armos_types::{Command, CommandMessage};
//!
//! let (tx, mut rx) = task_channel::channel();
//! tx.post_message(CommandMessage::Stop).unwrap();
//! assert!(tx.post_message(CommandMessage::Invalid).is_err());
//! assert_eq!(rx.poll(), Some(Command::Stop));
//! assert_eq!(rx.poll(), None);
//! ```

use armos_types::{ArmError, Command, CommandMessage};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Create a connected producer/consumer pair.
pub fn channel() -> (TaskSender, TaskReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TaskSender { tx }, TaskReceiver { rx })
}

/// Producer half.  Deliberately not `Clone`: there is exactly one producer.
#[derive(Debug)]
pub struct TaskSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl TaskSender {
    /// Enqueue an already validated command.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::ChannelClosed`] once the receiver is gone.
    pub fn post(&self, command: Command) -> Result<(), ArmError> {
        debug!(?command, "task posted");
        self.tx.send(command).map_err(|_| ArmError::ChannelClosed)
    }

    /// Validate a raw message and enqueue it.
    ///
    /// # Errors
    ///
    /// * [`ArmError::InvalidCommand`] for `INVALID`, unknown commands and a
    ///   `PICKUP` without a target; nothing is enqueued.
    /// * [`ArmError::ChannelClosed`] once the receiver is gone.
    pub fn post_message(&self, message: CommandMessage) -> Result<(), ArmError> {
        let command = Command::try_from(message).inspect_err(|e| {
            warn!(error = %e, "command rejected at channel boundary");
        })?;
        self.post(command)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned by the reflex unit.
#[derive(Debug)]
pub struct TaskReceiver {
    rx: mpsc::UnboundedReceiver<Command>,
}

impl TaskReceiver {
    /// Take the oldest pending command, if any.  Never blocks.
    pub fn poll(&mut self) -> Option<Command> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_fifo_order() {
        let (tx, mut rx) = channel();
        tx.post(Command::Pickup { target: "apple".into() }).unwrap();
        tx.post(Command::Place { location: None }).unwrap();
        tx.post(Command::Stop).unwrap();
        assert_eq!(rx.poll(), Some(Command::Pickup { target: "apple".into() }));
        assert_eq!(rx.poll(), Some(Command::Place { location: None }));
        assert_eq!(rx.poll(), Some(Command::Stop));
        assert_eq!(rx.poll(), None);
    }

    #[test]
    fn rejects_never_reach_the_consumer() {
        let (tx, mut rx) = channel();
        assert!(tx.post_message(CommandMessage::Unknown).is_err());
        assert!(tx.post_message(CommandMessage::Pickup { target: None }).is_err());
        assert_eq!(rx.poll(), None);
    }

    #[test]
    fn closed_receiver_is_reported() {
        let (tx, rx) = channel();
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.post(Command::Stop), Err(ArmError::ChannelClosed));
    }

    #[test]
    fn producer_on_another_thread() {
        let (tx, mut rx) = channel();
        std::thread::spawn(move || {
            for i in 0..10 {
                tx.post(Command::Pickup { target: format!("obj{i}") }).unwrap();
            }
        })
        .join()
        .unwrap();
        let received: Vec<_> = std::iter::from_fn(|| rx.poll()).collect();
        assert_eq!(received.len(), 10);
        assert_eq!(received[9], Command::Pickup { target: "obj9".into() });
    }
}
