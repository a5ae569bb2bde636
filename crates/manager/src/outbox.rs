//! Queue side shared by the manager, the sender loop and service contexts.

use crate::stats::ManagerStats;
use courier_queue::{Message, PriorityQueue, QueueError};
use crossbeam::channel::{Receiver, Sender, TrySendError};

pub(crate) struct Outbox {
    pub(crate) queue: PriorityQueue,
    pub(crate) stats: ManagerStats,
    doorbell: Sender<()>,
}

impl Outbox {
    /// Returns the outbox and the receiving end of its doorbell.
    pub(crate) fn new(queue: PriorityQueue) -> (Self, Receiver<()>) {
        // One pending ring is enough to wake the sender loop.
        let (doorbell, rx) = crossbeam::channel::bounded(1);
        (
            Self {
                queue,
                stats: ManagerStats::default(),
                doorbell,
            },
            rx,
        )
    }

    pub(crate) fn post(&self, message: Message) -> Result<(), QueueError> {
        if let Err(e) = self.queue.enqueue(message) {
            ManagerStats::record(&self.stats.rejected);
            return Err(e);
        }
        ManagerStats::record(&self.stats.posted);
        self.ring();
        Ok(())
    }

    /// Wake the sender loop.
    pub(crate) fn ring(&self) {
        match self.doorbell.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                tracing::trace!("Doorbell receiver gone");
            }
        }
    }
}
