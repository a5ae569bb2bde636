//! Per-priority FIFO storage.

use crate::message::Message;
use crate::priority::Priority;
use std::collections::VecDeque;

/// FIFO of messages sharing one priority.
///
/// Not synchronized: the owning [`PriorityQueue`](crate::PriorityQueue)
/// serializes every access.
#[derive(Debug)]
pub struct PriorityBucket {
    priority: Priority,
    items: VecDeque<Message>,
}

impl PriorityBucket {
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            items: VecDeque::new(),
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Append to the back.
    pub fn push(&mut self, message: Message) {
        self.items.push_back(message);
    }

    /// Remove the oldest message, `None` if empty.
    pub fn pop(&mut self) -> Option<Message> {
        self.items.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Move up to `max` oldest messages into `out`.
    pub(crate) fn drain_into(&mut self, max: usize, out: &mut Vec<Message>) -> usize {
        let take = max.min(self.items.len());
        out.extend(self.items.drain(..take));
        take
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;

    fn message(tag: i64) -> Message {
        Message::new(0, Payload::single(tag), |_| Ok(None))
    }

    #[test]
    fn test_fifo() {
        let mut bucket = PriorityBucket::new(Priority::new(0));
        bucket.push(message(1));
        bucket.push(message(2));
        assert_eq!(bucket.len(), 2);

        assert_eq!(bucket.pop().unwrap().payload(), &Payload::single(1));
        assert_eq!(bucket.pop().unwrap().payload(), &Payload::single(2));
        assert!(bucket.pop().is_none());
        assert!(bucket.is_empty());
    }

    #[test]
    fn test_drain_into_partial() {
        let mut bucket = PriorityBucket::new(Priority::new(0));
        for tag in 0..5 {
            bucket.push(message(tag));
        }

        let mut out = Vec::new();
        assert_eq!(bucket.drain_into(3, &mut out), 3);
        assert_eq!(bucket.len(), 2);
        assert_eq!(out[0].payload(), &Payload::single(0));
        assert_eq!(out[2].payload(), &Payload::single(2));

        assert_eq!(bucket.drain_into(10, &mut out), 2);
        assert!(bucket.is_empty());
    }
}
