use crate::protocol::frame::LcnAddr;
use bytes::Bytes;
use std::{collections::VecDeque, time::Duration};
use tokio::time::Instant;

/// Command submitted while the bus was not reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PckQueueItem {
    pub addr: LcnAddr,
    pub wants_ack: bool,
    pub data: Bytes,
    pub enqueued_at: Instant,
}

/// Commands held back until the connection is up again. Items older than
/// `max_age` are discarded.
#[derive(Debug)]
pub struct OfflineQueue {
    max_age: Duration,
    items: VecDeque<PckQueueItem>,
}

impl OfflineQueue {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            items: VecDeque::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, addr: LcnAddr, wants_ack: bool, data: Bytes, now: Instant) {
        self.prune(now);
        self.items.push_back(PckQueueItem {
            addr,
            wants_ack,
            data,
            enqueued_at: now,
        });
    }

    /// Takes all items still young enough to be sent, oldest first.
    pub fn drain_fresh(&mut self, now: Instant) -> Vec<PckQueueItem> {
        self.prune(now);
        self.items.drain(..).collect()
    }

    fn prune(&mut self, now: Instant) {
        let before = self.items.len();
        while self
            .items
            .front()
            .is_some_and(|item| now.saturating_duration_since(item.enqueued_at) > self.max_age)
        {
            self.items.pop_front();
        }
        let dropped = before - self.items.len();
        if dropped > 0 {
            tracing::debug!(dropped, "Discarded stale offline commands");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_AGE: Duration = Duration::from_millis(4 * 3_500);

    fn cmd(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn stale_items_are_dropped_on_drain() {
        let t0 = Instant::now();
        let mut queue = OfflineQueue::new(MAX_AGE);
        queue.push(LcnAddr::module(0, 5), true, cmd("A1DI100"), t0);
        queue.push(
            LcnAddr::module(0, 6),
            false,
            cmd("A1DI000"),
            t0 + Duration::from_secs(10),
        );
        queue.push(
            LcnAddr::group(0, 3),
            false,
            cmd("RX"),
            t0 + Duration::from_secs(11),
        );

        let items = queue.drain_fresh(t0 + MAX_AGE + Duration::from_millis(1));
        let payloads: Vec<_> = items.iter().map(|i| i.data.clone()).collect();
        assert_eq!(payloads, [cmd("A1DI000"), cmd("RX")]);
        assert!(queue.is_empty());
    }

    #[test]
    fn order_is_kept() {
        let t0 = Instant::now();
        let mut queue = OfflineQueue::new(MAX_AGE);
        for (i, payload) in ["A", "B", "C"].into_iter().enumerate() {
            queue.push(
                LcnAddr::module(0, 5),
                false,
                cmd(payload),
                t0 + Duration::from_millis(i as u64),
            );
        }
        assert_eq!(queue.len(), 3);
        let items = queue.drain_fresh(t0 + Duration::from_secs(1));
        let payloads: Vec<_> = items.iter().map(|i| i.data.clone()).collect();
        assert_eq!(payloads, [cmd("A"), cmd("B"), cmd("C")]);
    }

    #[test]
    fn push_discards_expired_items() {
        let t0 = Instant::now();
        let mut queue = OfflineQueue::new(Duration::from_millis(100));
        queue.push(LcnAddr::module(0, 5), false, cmd("A"), t0);
        queue.push(
            LcnAddr::module(0, 5),
            false,
            cmd("B"),
            t0 + Duration::from_millis(500),
        );
        assert_eq!(queue.len(), 1);
    }
}
