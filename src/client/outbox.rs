//! Bounded queue of client messages waiting for a live link

use std::collections::VecDeque;

use tracing::warn;

use crate::protocol::ClientMessage;

/// A queued message and how many live links failed to deliver it
#[derive(Debug, Clone, PartialEq)]
pub struct Pending {
    pub message: ClientMessage,
    pub retries: u32,
}

impl Pending {
    pub fn new(message: ClientMessage) -> Self {
        Self {
            message,
            retries: 0,
        }
    }
}

/// FIFO with a fixed capacity; the oldest entry is dropped on overflow
#[derive(Debug)]
pub struct Outbox {
    queue: VecDeque<Pending>,
    capacity: usize,
    max_retries: u32,
}

impl Outbox {
    pub fn new(capacity: usize, max_retries: u32) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            max_retries,
        }
    }

    /// Queue at the back, evicting the oldest entry if full.
    ///
    /// Returns the evicted entry, if any.
    pub fn push(&mut self, pending: Pending) -> Option<Pending> {
        let evicted = if self.queue.len() >= self.capacity {
            self.queue.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            warn!(retries = old.retries, "outbox full, dropping oldest message");
        }
        self.queue.push_back(pending);
        evicted
    }

    /// Put back messages a failed link did not deliver, ahead of everything
    /// queued since, counting the failure against each one.
    pub fn requeue_front(&mut self, undelivered: Vec<Pending>) {
        for mut pending in undelivered.into_iter().rev() {
            pending.retries += 1;
            if self.queue.len() >= self.capacity {
                // Newest entries go first so the older requeued ones survive.
                self.queue.pop_back();
            }
            self.queue.push_front(pending);
        }
    }

    /// Take everything still deliverable, oldest first.
    ///
    /// Entries that already failed more than the retry budget are dropped.
    pub fn drain_deliverable(&mut self) -> Vec<Pending> {
        let max_retries = self.max_retries;
        let mut expired = 0;
        let ready: Vec<Pending> = self
            .queue
            .drain(..)
            .filter(|p| {
                let keep = p.retries <= max_retries;
                if !keep {
                    expired += 1;
                }
                keep
            })
            .collect();
        if expired > 0 {
            warn!(expired, "dropping messages past their retry budget");
        }
        ready
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventFilter;

    fn filter(limit: usize) -> Pending {
        Pending::new(ClientMessage::Filter(EventFilter::new().page(limit, 0)))
    }

    fn limits(items: &[Pending]) -> Vec<usize> {
        items
            .iter()
            .map(|p| match &p.message {
                ClientMessage::Filter(f) => f.limit.unwrap_or_default(),
                _ => 0,
            })
            .collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut outbox = Outbox::new(10, 3);
        for n in 1..=3 {
            outbox.push(filter(n));
        }
        assert_eq!(limits(&outbox.drain_deliverable()), vec![1, 2, 3]);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut outbox = Outbox::new(2, 3);
        outbox.push(filter(1));
        outbox.push(filter(2));
        let evicted = outbox.push(filter(3)).unwrap();
        assert_eq!(limits(&[evicted]), vec![1]);
        assert_eq!(limits(&outbox.drain_deliverable()), vec![2, 3]);
    }

    #[test]
    fn test_requeue_goes_first_and_counts_retries() {
        let mut outbox = Outbox::new(10, 3);
        outbox.push(filter(3));
        outbox.requeue_front(vec![filter(1), filter(2)]);

        let drained = outbox.drain_deliverable();
        assert_eq!(limits(&drained), vec![1, 2, 3]);
        assert_eq!(
            drained.iter().map(|p| p.retries).collect::<Vec<_>>(),
            vec![1, 1, 0]
        );
    }

    #[test]
    fn test_retry_budget_expires_messages() {
        let mut outbox = Outbox::new(10, 1);
        let mut tired = filter(1);
        tired.retries = 1;
        outbox.requeue_front(vec![tired]);
        outbox.push(filter(2));

        assert_eq!(limits(&outbox.drain_deliverable()), vec![2]);
    }
}
