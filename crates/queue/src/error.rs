//! Queue and message execution errors.

use crate::message::{ActionError, MessageId};
use crate::priority::Priority;
use thiserror::Error;

/// Errors returned synchronously by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Unknown priority {0}: queue only accepts known priorities")]
    UnknownPriority(Priority),
}

/// What went wrong while executing a dequeued message.
#[derive(Debug, Error)]
pub enum ExecutionFailure {
    #[error("send action failed: {0}")]
    Action(#[source] ActionError),

    #[error("result callback failed: {0}")]
    OnResult(#[source] ActionError),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("rejected by saturated worker pool")]
    Backpressure,

    #[error("could not be handed to a worker: {0}")]
    Dispatch(String),
}

/// A message-level failure, contained by the sender loop.
///
/// Never propagated to the poster; logged with the message priority and a
/// truncated description.
#[derive(Debug, Error)]
#[error("message {message_id} (priority {priority}) failed: {failure} [{description}]")]
pub struct MessageExecutionError {
    pub priority: Priority,
    pub message_id: MessageId,
    pub description: String,
    #[source]
    pub failure: ExecutionFailure,
}
