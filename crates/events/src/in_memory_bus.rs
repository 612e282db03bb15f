//! In-process event bus with bounded per-subscriber queues.

use std::sync::{Mutex, mpsc};

use crate::bus::{EventBus, Subscription};

/// Queue depth per subscriber when none is given.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    Poisoned,
}

#[derive(Debug)]
struct Subscribers<M> {
    next_id: u64,
    senders: Vec<(u64, mpsc::SyncSender<M>)>,
}

/// In-memory pub/sub bus.
///
/// Every subscriber gets its own queue of `capacity` messages. When a queue is
/// full, `publish` blocks until that subscriber catches up, so a fast producer
/// (the feed tailer) is held back by a slow consumer (the pipeline) instead of
/// buffering without bound. Subscribers that hung up are dropped on publish.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    capacity: usize,
    subscribers: Mutex<Subscribers<M>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Subscribers {
                next_id: 0,
                senders: Vec::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        // Send outside the lock: a blocked send must not stall `subscribe`.
        let targets: Vec<(u64, mpsc::SyncSender<M>)> = self
            .subscribers
            .lock()
            .map_err(|_| InMemoryBusError::Poisoned)?
            .senders
            .clone();

        let gone: Vec<u64> = targets
            .into_iter()
            .filter_map(|(id, tx)| tx.send(message.clone()).err().map(|_| id))
            .collect();

        if !gone.is_empty() {
            let mut subs = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;
            subs.senders.retain(|(id, _)| !gone.contains(id));
        }
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::sync_channel(self.capacity);

        // A poisoned lock still yields a (silent) subscription.
        if let Ok(mut subs) = self.subscribers.lock() {
            let id = subs.next_id;
            subs.next_id += 1;
            subs.senders.push((id, tx));
        }

        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn every_subscriber_receives_every_message() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(1).unwrap();
        bus.publish(2).unwrap();

        assert_eq!(a.try_recv().unwrap(), 1);
        assert_eq!(a.try_recv().unwrap(), 2);
        assert_eq!(b.try_recv().unwrap(), 1);
        assert_eq!(b.try_recv().unwrap(), 2);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let a = bus.subscribe();
        drop(bus.subscribe());

        bus.publish(7).unwrap();
        assert_eq!(a.try_recv().unwrap(), 7);
        assert_eq!(bus.subscribers.lock().unwrap().senders.len(), 1);
    }

    #[test]
    fn full_queue_blocks_the_publisher_until_drained() {
        let bus: Arc<InMemoryEventBus<u32>> = Arc::new(InMemoryEventBus::with_capacity(2));
        let sub = bus.subscribe();
        let published = Arc::new(AtomicUsize::new(0));

        let producer = {
            let bus = bus.clone();
            let published = published.clone();
            thread::spawn(move || {
                for i in 0..4 {
                    bus.publish(i).unwrap();
                    published.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert_eq!(published.load(Ordering::SeqCst), 2);

        let received: Vec<u32> = (0..4).map(|_| sub.recv().unwrap()).collect();
        producer.join().unwrap();
        assert_eq!(received, [0, 1, 2, 3]);
        assert_eq!(published.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::with_capacity(0);
        assert_eq!(bus.capacity(), 1);
        let sub = bus.subscribe();
        bus.publish(3).unwrap();
        assert_eq!(sub.try_recv().unwrap(), 3);
    }
}
