// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 有界帧队列 (Bounded relay with drop-oldest backpressure)
//!
//! Built on a bounded crossbeam channel. The producer keeps a receiver clone
//! so it can evict the oldest item itself instead of blocking. Each relay has
//! one producer (the camera's ingestor); dropping it closes the relay once
//! the consumer has drained what is left.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Select, Sender, TrySendError};

/// The producer side is gone and nothing is left to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayClosed;

pub struct RelayProducer<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

pub struct RelayConsumer<T> {
    rx: Receiver<T>,
    dropped: Arc<AtomicU64>,
}

/// Creates a relay holding at most `capacity` items (at least one).
pub fn relay<T>(capacity: usize) -> (RelayProducer<T>, RelayConsumer<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        RelayProducer {
            tx,
            rx: rx.clone(),
            capacity,
            dropped: dropped.clone(),
        },
        RelayConsumer {
            rx,
            dropped,
        },
    )
}

impl<T> RelayProducer<T> {
    /// Never blocks. When the relay is full the oldest item is removed first
    /// and returned.
    pub fn push(&self, item: T) -> Option<T> {
        let mut item = item;
        let mut evicted = None;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(back)) => {
                    item = back;
                    // the consumer may have taken one meanwhile, then the retry succeeds
                    if let Ok(old) = self.rx.try_recv() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        evicted = Some(old);
                    }
                }
                // unreachable while we hold `rx`
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> RelayConsumer<T> {
    /// `Ok(None)` means nothing arrived within `timeout`; callers retry.
    pub fn pop(&self, timeout: Duration) -> Result<Option<T>, RelayClosed> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Ok(Some(item)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(RelayClosed),
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Waits on several relays at once. Returns the index of the relay that was
/// ready together with its item, or `RelayClosed` if that relay has finished.
/// `None` on timeout.
pub fn select_pop<T>(
    consumers: &[RelayConsumer<T>],
    timeout: Duration,
) -> Option<(usize, Result<T, RelayClosed>)> {
    if consumers.is_empty() {
        std::thread::sleep(timeout);
        return None;
    }

    let mut sel = Select::new();
    for consumer in consumers {
        sel.recv(&consumer.rx);
    }
    let op = sel.select_timeout(timeout).ok()?;
    let index = op.index();
    let result = op.recv(&consumers[index].rx).map_err(|_| RelayClosed);
    Some((index, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_push_beyond_capacity_keeps_newest() {
        let (producer, consumer) = relay::<u32>(10);

        let start = Instant::now();
        for i in 0..1000 {
            let evicted = producer.push(i);
            assert!(producer.len() <= 10);
            if i < 10 {
                assert_eq!(evicted, None);
            } else {
                assert_eq!(evicted, Some(i - 10));
            }
        }
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(producer.dropped(), 990);
        assert_eq!(consumer.dropped(), 990);

        let mut retained = Vec::new();
        while let Some(v) = consumer.try_pop() {
            retained.push(v);
        }
        assert_eq!(retained, (990..1000).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_capacity_is_promoted() {
        let (producer, consumer) = relay::<u8>(0);
        assert_eq!(producer.capacity(), 1);
        producer.push(1);
        producer.push(2);
        assert_eq!(consumer.try_pop(), Some(2));
    }

    #[test]
    fn test_pop_timeout_is_not_an_error() {
        let (_producer, consumer) = relay::<u8>(2);
        assert_eq!(consumer.pop(Duration::from_millis(5)), Ok(None));
    }

    #[test]
    fn test_closed_after_drain() {
        let (producer, consumer) = relay::<u8>(4);
        producer.push(1);
        producer.push(2);
        drop(producer);

        assert_eq!(consumer.pop(Duration::from_millis(5)), Ok(Some(1)));
        assert_eq!(consumer.pop(Duration::from_millis(5)), Ok(Some(2)));
        assert_eq!(consumer.pop(Duration::from_millis(5)), Err(RelayClosed));
    }

    #[test]
    fn test_concurrent_producer_never_blocks() {
        let (producer, consumer) = relay::<u64>(8);
        let handle = std::thread::spawn(move || {
            for i in 0..50_000u64 {
                producer.push(i);
            }
        });

        let mut last = None;
        loop {
            match consumer.pop(Duration::from_millis(50)) {
                Ok(Some(v)) => {
                    if let Some(prev) = last {
                        assert!(v > prev, "relay must stay FIFO");
                    }
                    last = Some(v);
                }
                Ok(None) => continue,
                Err(RelayClosed) => break,
            }
            assert!(consumer.len() <= 8);
        }
        handle.join().unwrap();
        assert_eq!(last, Some(49_999));
    }

    #[test]
    fn test_select_pop_across_relays() {
        let (p1, c1) = relay::<&str>(2);
        let (p2, c2) = relay::<&str>(2);
        let consumers = vec![c1, c2];

        assert!(select_pop(&consumers, Duration::from_millis(5)).is_none());

        p2.push("b");
        assert_eq!(
            select_pop(&consumers, Duration::from_millis(50)),
            Some((1, Ok("b")))
        );

        drop(p1);
        assert_eq!(
            select_pop(&consumers, Duration::from_millis(50)),
            Some((0, Err(RelayClosed)))
        );
    }
}
