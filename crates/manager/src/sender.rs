//! The sender loop.
//!
//! One thread per running manager. Each cycle dequeues up to a quota of
//! messages in priority order and hands them to the dispatch; when nothing was
//! dequeued it sleeps on the doorbell, which `post` rings, as does the
//! dispatch once a finished send has released its slot.
//! `poll_interval` bounds that sleep.

use crate::config::Backpressure;
use crate::outbox::Outbox;
use crate::stats::ManagerStats;
use courier_dispatch::{Dispatch, DispatchError};
use courier_queue::{ExecutionFailure, Message, MessageExecutionError};
use crossbeam::channel::{Receiver, TryRecvError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn, Span};

pub(crate) struct SenderLoop<D: Dispatch> {
    pub(crate) outbox: Arc<Outbox>,
    pub(crate) dispatch: Arc<D>,
    pub(crate) block_size: usize,
    pub(crate) poll_interval: Duration,
    pub(crate) backpressure: Backpressure,
    pub(crate) doorbell: Receiver<()>,
    pub(crate) shutdown: Receiver<()>,
    pub(crate) span: Span,
}

impl<D: Dispatch> SenderLoop<D> {
    pub(crate) fn run(self) {
        debug!(parent: &self.span, "Sender loop entering");
        loop {
            match self.shutdown.try_recv() {
                Err(TryRecvError::Empty) => {}
                Ok(()) | Err(TryRecvError::Disconnected) => break,
            }

            if self.cycle() > 0 {
                continue;
            }

            let shutdown = crossbeam::select! {
                recv(self.shutdown) -> _ => true,
                recv(self.doorbell) -> _ => false,
                default(self.poll_interval) => false,
            };
            if shutdown {
                break;
            }
        }
        debug!(
            parent: &self.span,
            pending = self.outbox.queue.len(),
            "Sender loop exiting"
        );
    }

    /// Dequeue and submit one batch. Returns how many messages left the queue.
    fn cycle(&self) -> usize {
        let queued = self.outbox.queue.len();
        if queued == 0 {
            return 0;
        }

        let mut quota = if self.block_size == 0 {
            queued
        } else {
            self.block_size
        };
        if self.backpressure == Backpressure::Block {
            if let Some(capacity) = self.dispatch.capacity() {
                let free = capacity.saturating_sub(self.dispatch.send_queue_depth());
                if free == 0 {
                    trace!(parent: &self.span, capacity, "Send pool saturated");
                    return 0;
                }
                quota = quota.min(free);
            }
        }

        let batch = if quota == 1 {
            self.outbox.queue.dequeue_one().into_iter().collect()
        } else {
            self.outbox.queue.dequeue_up_to(quota)
        };

        let count = batch.len();
        for message in batch {
            self.submit(message);
        }
        count
    }

    fn submit(&self, message: Message) {
        let mut unsent = message.failure(ExecutionFailure::Backpressure);
        let job = self.job(message);
        let submitted = match self.backpressure {
            Backpressure::Block => self.dispatch.spawn_send(job),
            Backpressure::Reject => self.dispatch.try_spawn_send(job),
        };

        match submitted {
            Ok(()) => return,
            Err(DispatchError::Saturated) => {
                ManagerStats::record(&self.outbox.stats.rejected);
            }
            Err(DispatchError::Spawn(reason)) => {
                ManagerStats::record(&self.outbox.stats.failed);
                unsent.failure = ExecutionFailure::Dispatch(reason);
            }
        }
        log_failure(&self.span, &unsent);
    }

    fn job(&self, message: Message) -> impl FnOnce() + Send + 'static {
        let outbox = self.outbox.clone();
        let span = self.span.clone();
        move || execute(message, &outbox.stats, &span)
    }
}

/// Run one message, containing errors and panics from its action and callback.
pub(crate) fn execute(message: Message, stats: &ManagerStats, span: &Span) {
    let priority = message.priority();
    let message_id = message.id();
    let description = message.describe();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| message.send()));
    let error = match outcome {
        Ok(Ok(())) => {
            ManagerStats::record(&stats.sent);
            trace!(parent: span, message = %message_id, priority = %priority, "Message sent");
            return;
        }
        Ok(Err(error)) => error,
        Err(payload) => MessageExecutionError {
            priority,
            message_id,
            description,
            failure: ExecutionFailure::Panicked(panic_message(payload.as_ref())),
        },
    };

    ManagerStats::record(&stats.failed);
    log_failure(span, &error);
}

fn log_failure(span: &Span, error: &MessageExecutionError) {
    warn!(
        parent: span,
        priority = %error.priority,
        message = %error.message_id,
        error = %error,
        "Message execution failed"
    );
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
