//! Bucketed priority queue for outbound messages.
//!
//! This crate holds the leaf types of the dispatcher:
//!
//! - [`Message`]: one unit of outbound work (send action + payload + optional
//!   result callback)
//! - [`PriorityBucket`]: FIFO of messages sharing one priority
//! - [`PriorityQueue`]: thread-safe collection of buckets with an ordered
//!   index of the non-empty ones
//!
//! # Ordering
//!
//! Dequeue order is strictly by priority, then FIFO within a priority. The
//! direction of "more urgent" is a [`PriorityOrder`] fixed when the queue is
//! built:
//!
//! ```
//! use courier_queue::{Message, Payload, PriorityOrder, PriorityQueue};
//!
//! let queue = PriorityQueue::new(PriorityOrder::HighestFirst);
//! queue.enqueue(Message::new(1, Payload::single("bulk"), |_| Ok(None))).unwrap();
//! queue.enqueue(Message::new(5, Payload::single("urgent"), |_| Ok(None))).unwrap();
//!
//! let next = queue.dequeue_one().unwrap();
//! assert_eq!(next.priority().get(), 5);
//! ```
//!
//! A permanently non-empty urgent bucket starves the others. That is the
//! intended policy: latency-sensitive traffic never waits behind bulk traffic.

mod bucket;
mod error;
mod message;
mod priority;
mod queue;

pub use bucket::PriorityBucket;
pub use error::{ExecutionFailure, MessageExecutionError, QueueError};
pub use message::{
    ActionError, Message, MessageId, Payload, ResultCallback, SendAction, MAX_DESCRIPTION_LEN,
};
pub use priority::{Priority, PriorityOrder};
pub use queue::{PriorityQueue, QueueSnapshot};
