//! Thread-safe priority queue of outbound messages.
//!
//! Messages are kept in one FIFO [`PriorityBucket`] per priority. Buckets are
//! created on first use and kept after draining so a busy priority does not
//! reallocate on every empty/non-empty transition. A separate ordered index
//! holds exactly the priorities whose bucket is non-empty, so finding the
//! next bucket is `O(log P)` in the number of active priorities.
//!
//! Every operation runs under a single mutex. Per-operation work is bounded
//! (`O(log P)` plus the items moved), so contention stays short no matter how
//! many producers and consumers share the queue.

use crate::bucket::PriorityBucket;
use crate::error::QueueError;
use crate::message::Message;
use crate::priority::{Priority, PriorityOrder};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

struct QueueInner {
    buckets: HashMap<Priority, PriorityBucket>,
    /// Priorities whose bucket has at least one message.
    active: BTreeSet<Priority>,
    size: usize,
}

impl QueueInner {
    /// Move up to `quota` messages into `out`, highest precedence first.
    fn take(&mut self, order: PriorityOrder, mut quota: usize, out: &mut Vec<Message>) {
        while quota > 0 {
            let Some(head) = order.head(&self.active) else {
                break;
            };
            let Some(bucket) = self.buckets.get_mut(&head) else {
                // Index and buckets out of sync; drop the stale entry.
                self.active.remove(&head);
                continue;
            };

            let taken = bucket.drain_into(quota, out);
            quota -= taken;
            self.size -= taken;

            if bucket.is_empty() {
                self.active.remove(&head);
            }
        }
    }
}

/// Thread-safe collection of priority buckets.
///
/// Dequeue order: strictly by priority according to the queue's
/// [`PriorityOrder`], FIFO within a priority.
pub struct PriorityQueue {
    order: PriorityOrder,
    known: BTreeSet<Priority>,
    restrict_to_known: bool,
    inner: Mutex<QueueInner>,
}

impl PriorityQueue {
    /// Create an unrestricted queue.
    pub fn new(order: PriorityOrder) -> Self {
        Self::with_known_priorities(order, [], false)
    }

    /// Create a queue with pre-built buckets for `known` priorities.
    ///
    /// With `restrict_to_known`, enqueuing any other priority fails with
    /// [`QueueError::UnknownPriority`]. Restriction only applies when the known
    /// set is non-empty.
    pub fn with_known_priorities<I>(order: PriorityOrder, known: I, restrict_to_known: bool) -> Self
    where
        I: IntoIterator<Item = Priority>,
    {
        let known: BTreeSet<Priority> = known.into_iter().collect();
        let buckets = known
            .iter()
            .map(|&priority| (priority, PriorityBucket::new(priority)))
            .collect();
        let restrict_to_known = restrict_to_known && !known.is_empty();

        Self {
            order,
            known,
            restrict_to_known,
            inner: Mutex::new(QueueInner {
                buckets,
                active: BTreeSet::new(),
                size: 0,
            }),
        }
    }

    pub fn order(&self) -> PriorityOrder {
        self.order
    }

    pub fn is_restricted(&self) -> bool {
        self.restrict_to_known
    }

    /// Whether `priority` would be accepted by [`enqueue`](Self::enqueue).
    pub fn accepts(&self, priority: Priority) -> bool {
        !self.restrict_to_known || self.known.contains(&priority)
    }

    /// Append a message to the bucket of its priority.
    pub fn enqueue(&self, message: Message) -> Result<(), QueueError> {
        let priority = message.priority();
        if !self.accepts(priority) {
            return Err(QueueError::UnknownPriority(priority));
        }

        let mut inner = self.inner.lock();
        let bucket = inner
            .buckets
            .entry(priority)
            .or_insert_with(|| PriorityBucket::new(priority));
        let was_empty = bucket.is_empty();
        bucket.push(message);

        if was_empty {
            inner.active.insert(priority);
        }
        inner.size += 1;
        Ok(())
    }

    /// Remove the next message, `None` if the queue is empty.
    pub fn dequeue_one(&self) -> Option<Message> {
        let mut inner = self.inner.lock();
        if inner.size == 0 {
            return None;
        }
        let mut out = Vec::with_capacity(1);
        inner.take(self.order, 1, &mut out);
        out.pop()
    }

    /// Remove up to `n` messages in dequeue order.
    ///
    /// Drains the most urgent bucket completely before moving to the next, so
    /// the result equals `n` successive [`dequeue_one`](Self::dequeue_one)
    /// calls taken under a single lock.
    pub fn dequeue_up_to(&self, n: usize) -> Vec<Message> {
        let mut inner = self.inner.lock();
        let quota = n.min(inner.size);
        let mut out = Vec::with_capacity(quota);
        inner.take(self.order, quota, &mut out);
        out
    }

    /// Remove every queued message in dequeue order.
    pub fn drain_all(&self) -> Vec<Message> {
        let mut inner = self.inner.lock();
        let quota = inner.size;
        let mut out = Vec::with_capacity(quota);
        inner.take(self.order, quota, &mut out);
        out
    }

    pub fn len(&self) -> usize {
        self.inner.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending counts per priority.
    pub fn snapshot(&self) -> QueueSnapshot {
        let inner = self.inner.lock();
        QueueSnapshot {
            order: self.order,
            total: inner.size,
            pending: inner
                .buckets
                .values()
                .map(|bucket| (bucket.priority(), bucket.len()))
                .collect(),
        }
    }
}

impl fmt::Debug for PriorityQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("order", &self.order)
            .field("restrict_to_known", &self.restrict_to_known)
            .field("len", &self.len())
            .finish()
    }
}

/// Point-in-time view of pending messages per priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub order: PriorityOrder,
    pub total: usize,
    /// Every bucket ever created, including empty ones.
    pub pending: BTreeMap<Priority, usize>,
}

impl QueueSnapshot {
    /// Number of buckets currently holding messages.
    pub fn active_buckets(&self) -> usize {
        self.pending.values().filter(|&&count| count > 0).count()
    }
}

impl fmt::Display for QueueSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "priority queue ({} pending, {})", self.total, self.order)?;
        let mut priorities: Vec<_> = self.pending.iter().collect();
        if self.order == PriorityOrder::HighestFirst {
            priorities.reverse();
        }
        for (priority, count) in priorities {
            write!(f, "\n  priority {} with {} messages", priority, count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use serde_json::Value;
    use std::sync::Arc;
    use std::thread;

    fn message(priority: i64, tag: i64) -> Message {
        Message::new(priority, Payload::single(tag), |_| Ok(None))
    }

    fn tag(message: &Message) -> i64 {
        match message.payload() {
            Payload::Single(Value::Number(n)) => n.as_i64().unwrap(),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    fn drain_one_by_one(queue: &PriorityQueue) -> Vec<(i64, i64)> {
        std::iter::from_fn(|| queue.dequeue_one())
            .map(|m| (m.priority().get(), tag(&m)))
            .collect()
    }

    #[test]
    fn test_priority_precedence_highest_first() {
        let queue = PriorityQueue::new(PriorityOrder::HighestFirst);
        queue.enqueue(message(1, 10)).unwrap();
        queue.enqueue(message(5, 50)).unwrap();
        queue.enqueue(message(1, 11)).unwrap();
        queue.enqueue(message(3, 30)).unwrap();
        queue.enqueue(message(5, 51)).unwrap();

        assert_eq!(
            drain_one_by_one(&queue),
            vec![(5, 50), (5, 51), (3, 30), (1, 10), (1, 11)]
        );
    }

    #[test]
    fn test_priority_precedence_lowest_first() {
        let queue = PriorityQueue::new(PriorityOrder::LowestFirst);
        queue.enqueue(message(2, 20)).unwrap();
        queue.enqueue(message(-1, -10)).unwrap();
        queue.enqueue(message(0, 0)).unwrap();

        assert_eq!(drain_one_by_one(&queue), vec![(-1, -10), (0, 0), (2, 20)]);
    }

    #[test]
    fn test_higher_priority_preempts_between_dequeues() {
        let queue = PriorityQueue::new(PriorityOrder::HighestFirst);
        queue.enqueue(message(1, 1)).unwrap();
        queue.enqueue(message(1, 2)).unwrap();

        assert_eq!(tag(&queue.dequeue_one().unwrap()), 1);
        queue.enqueue(message(9, 90)).unwrap();
        assert_eq!(tag(&queue.dequeue_one().unwrap()), 90);
        assert_eq!(tag(&queue.dequeue_one().unwrap()), 2);
    }

    #[test]
    fn test_fifo_within_priority() {
        let queue = PriorityQueue::new(PriorityOrder::HighestFirst);
        for i in 0..100 {
            queue.enqueue(message(4, i)).unwrap();
        }
        let tags: Vec<i64> = drain_one_by_one(&queue).into_iter().map(|(_, t)| t).collect();
        assert_eq!(tags, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_conservation() {
        let queue = PriorityQueue::new(PriorityOrder::HighestFirst);
        for i in 0..10 {
            queue.enqueue(message(i % 3, i)).unwrap();
        }
        assert_eq!(queue.len(), 10);

        assert!(queue.dequeue_one().is_some());
        assert_eq!(queue.dequeue_up_to(4).len(), 4);
        assert_eq!(queue.len(), 5);

        assert_eq!(queue.dequeue_up_to(100).len(), 5);
        assert_eq!(queue.len(), 0);
        assert!(queue.dequeue_one().is_none());
        assert!(queue.dequeue_up_to(3).is_empty());
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_batch_equivalence() {
        let interleaving = [(1, 0), (5, 1), (3, 2), (5, 3), (1, 4), (3, 5), (5, 6), (2, 7)];

        let batched = PriorityQueue::new(PriorityOrder::HighestFirst);
        let single = PriorityQueue::new(PriorityOrder::HighestFirst);
        for (priority, t) in interleaving {
            batched.enqueue(message(priority, t)).unwrap();
            single.enqueue(message(priority, t)).unwrap();
        }

        let from_batch: Vec<(i64, i64)> = batched
            .dequeue_up_to(6)
            .iter()
            .map(|m| (m.priority().get(), tag(m)))
            .collect();
        let from_single: Vec<(i64, i64)> = (0..6)
            .map(|_| single.dequeue_one().unwrap())
            .map(|m| (m.priority().get(), tag(&m)))
            .collect();

        assert_eq!(from_batch, from_single);
        assert_eq!(batched.len(), 2);
        assert_eq!(drain_one_by_one(&batched), drain_one_by_one(&single));
    }

    #[test]
    fn test_dequeue_up_to_zero_is_empty() {
        let queue = PriorityQueue::new(PriorityOrder::HighestFirst);
        assert!(queue.dequeue_up_to(0).is_empty());

        queue.enqueue(message(4, 0)).unwrap();
        queue.enqueue(message(2, 1)).unwrap();
        assert!(queue.dequeue_up_to(0).is_empty());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.snapshot().active_buckets(), 2);
    }

    #[test]
    fn test_batch_takes_only_highest_bucket_when_it_fills_quota() {
        let queue = PriorityQueue::new(PriorityOrder::HighestFirst);
        let interleaving = [1, 5, 5, 1, 5, 5, 1, 5, 5, 5];
        for (i, priority) in interleaving.iter().enumerate() {
            queue.enqueue(message(*priority, i as i64)).unwrap();
        }

        let batch = queue.dequeue_up_to(7);
        assert!(batch.iter().all(|m| m.priority().get() == 5));
        let tags: Vec<i64> = batch.iter().map(tag).collect();
        assert_eq!(tags, vec![1, 2, 4, 5, 7, 8, 9]);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_restriction_enforced() {
        let known = [Priority::new(1), Priority::new(2)];
        let queue = PriorityQueue::with_known_priorities(PriorityOrder::HighestFirst, known, true);

        queue.enqueue(message(1, 0)).unwrap();
        let err = queue.enqueue(message(3, 0)).unwrap_err();
        assert!(matches!(err, QueueError::UnknownPriority(p) if p == Priority::new(3)));
        assert_eq!(queue.len(), 1);
        assert!(queue.accepts(Priority::new(2)));
        assert!(!queue.accepts(Priority::new(3)));
    }

    #[test]
    fn test_known_without_restriction_accepts_new() {
        let queue =
            PriorityQueue::with_known_priorities(PriorityOrder::HighestFirst, [Priority::new(1)], false);
        queue.enqueue(message(7, 0)).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_restriction_ignored_for_empty_known_set() {
        let queue = PriorityQueue::with_known_priorities(PriorityOrder::HighestFirst, [], true);
        assert!(!queue.is_restricted());
        queue.enqueue(message(42, 0)).unwrap();
    }

    #[test]
    fn test_buckets_persist_after_drain() {
        let queue = PriorityQueue::new(PriorityOrder::HighestFirst);
        queue.enqueue(message(3, 0)).unwrap();
        queue.enqueue(message(8, 0)).unwrap();
        queue.drain_all();

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.pending.len(), 2);
        assert_eq!(snapshot.active_buckets(), 0);

        queue.enqueue(message(3, 1)).unwrap();
        assert_eq!(tag(&queue.dequeue_one().unwrap()), 1);
    }

    #[test]
    fn test_snapshot_display() {
        let queue = PriorityQueue::new(PriorityOrder::HighestFirst);
        queue.enqueue(message(1, 0)).unwrap();
        queue.enqueue(message(2, 0)).unwrap();
        queue.enqueue(message(2, 0)).unwrap();

        let text = queue.snapshot().to_string();
        assert!(text.starts_with("priority queue (3 pending, highest_first)"));
        let p2 = text.find("priority 2 with 2 messages").unwrap();
        let p1 = text.find("priority 1 with 1 messages").unwrap();
        assert!(p2 < p1);
    }

    #[test]
    fn test_concurrent_producers_and_consumers() {
        const PRODUCERS: i64 = 4;
        const PER_PRODUCER: i64 = 500;

        let queue = Arc::new(PriorityQueue::new(PriorityOrder::HighestFirst));

        let received: Vec<Vec<(i64, i64)>> = thread::scope(|s| {
            for p in 0..PRODUCERS {
                let queue = queue.clone();
                s.spawn(move || {
                    for i in 0..PER_PRODUCER {
                        // One priority per producer keeps per-bucket FIFO checkable.
                        queue.enqueue(message(p, i)).unwrap();
                    }
                });
            }

            let consumers: Vec<_> = (0..3)
                .map(|_| {
                    let queue = queue.clone();
                    s.spawn(move || {
                        let mut got = Vec::new();
                        let mut idle = 0;
                        while idle < 1000 {
                            let batch = queue.dequeue_up_to(7);
                            if batch.is_empty() {
                                idle += 1;
                                thread::yield_now();
                            } else {
                                idle = 0;
                                got.extend(batch.iter().map(|m| (m.priority().get(), tag(m))));
                            }
                        }
                        got
                    })
                })
                .collect();

            consumers.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut all: Vec<(i64, i64)> = received.iter().flatten().copied().collect();
        all.extend(drain_one_by_one(&queue));
        assert_eq!(all.len() as i64, PRODUCERS * PER_PRODUCER);

        // Each consumer observed every priority's tags in increasing order.
        for got in &received {
            for p in 0..PRODUCERS {
                let tags: Vec<i64> = got.iter().filter(|(q, _)| *q == p).map(|(_, t)| *t).collect();
                assert!(tags.windows(2).all(|w| w[0] < w[1]));
            }
        }
        assert_eq!(queue.len(), 0);
    }
}
