//! Buffer pool and SPSC handoff ring between the audio callback and the
//! cooperative processor.
//!
//! Two `rtrb` rings back this module: a free-list that recycles
//! [`AudioBlock`]s back to the callback, and a data ring that publishes
//! filled blocks to the processor. Both sides are wait-free; the callback
//! never blocks, locks, or calls the allocator on the success path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use probe_core::AudioBlock;
use rtrb::{Consumer, Producer, RingBuffer};

const INITIAL_CAPACITY: usize = 16;
const HARD_CAP: usize = 32;
const RING_CAPACITY: usize = 8;

/// Shared counters observed by the cooperative context; never touched from
/// the callback beyond simple atomic increments.
#[derive(Debug, Default)]
pub struct PoolStats {
    allocated: AtomicUsize,
    dropped: AtomicUsize,
}

impl PoolStats {
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Callback-side handle: acquires a buffer and publishes it downstream.
pub struct PoolProducer {
    free_rx: Consumer<AudioBlock>,
    data_tx: Producer<AudioBlock>,
    stats: Arc<PoolStats>,
    hard_cap: usize,
    frames: usize,
    channels: usize,
}

/// Processor-side handle: consumes published buffers and returns them.
pub struct PoolConsumer {
    free_tx: Producer<AudioBlock>,
    data_rx: Consumer<AudioBlock>,
    stats: Arc<PoolStats>,
}

/// Build a pool + ring pair. `frames`/`channels` size freshly allocated
/// buffers when the free-list runs dry.
pub fn buffer_pool(frames: usize, channels: usize) -> (PoolProducer, PoolConsumer) {
    let (mut free_tx, free_rx) = RingBuffer::<AudioBlock>::new(HARD_CAP);
    let (data_tx, data_rx) = RingBuffer::<AudioBlock>::new(RING_CAPACITY);
    let stats = Arc::new(PoolStats::default());

    for _ in 0..INITIAL_CAPACITY {
        let _ = free_tx.push(AudioBlock::new(frames, channels));
    }
    stats.allocated.store(INITIAL_CAPACITY, Ordering::Relaxed);

    (
        PoolProducer {
            free_rx,
            data_tx,
            stats: Arc::clone(&stats),
            hard_cap: HARD_CAP,
            frames,
            channels,
        },
        PoolConsumer { free_tx, data_rx, stats },
    )
}

impl PoolProducer {
    /// Acquire a buffer: reuse from the free-list, else allocate up to the
    /// hard cap, else `None` (caller must drop and count it).
    #[inline]
    pub fn acquire(&mut self) -> Option<AudioBlock> {
        if let Ok(buf) = self.free_rx.pop() {
            return Some(buf);
        }
        if self.stats.allocated() < self.hard_cap {
            self.stats.allocated.fetch_add(1, Ordering::Relaxed);
            return Some(AudioBlock::new(self.frames, self.channels));
        }
        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Publish a filled buffer. On ring-full, drop the buffer and count it.
    #[inline]
    pub fn publish(&mut self, block: AudioBlock) {
        if self.data_tx.push(block).is_err() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}

impl PoolConsumer {
    /// Pull the next published buffer, if any.
    #[inline]
    pub fn try_recv(&mut self) -> Option<AudioBlock> {
        self.data_rx.pop().ok()
    }

    /// Return a consumed buffer to the free-list; released to the allocator
    /// if the free-list is already full.
    #[inline]
    pub fn release(&mut self, block: AudioBlock) {
        let _ = self.free_tx.push(block);
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_reuses_then_allocates_then_drops() {
        let (mut producer, mut consumer) = buffer_pool(64, 2);
        let mut held = Vec::new();
        for _ in 0..INITIAL_CAPACITY {
            held.push(producer.acquire().expect("initial capacity"));
        }
        // Free-list exhausted, but below hard cap: allocates fresh blocks.
        for _ in INITIAL_CAPACITY..HARD_CAP {
            held.push(producer.acquire().expect("allocate up to hard cap"));
        }
        assert!(producer.acquire().is_none());
        assert_eq!(producer.stats().allocated(), HARD_CAP);

        for buf in held {
            consumer.release(buf);
        }
        assert!(producer.acquire().is_some());
    }

    #[test]
    fn publish_and_receive_round_trips() {
        let (mut producer, mut consumer) = buffer_pool(32, 1);
        let mut buf = producer.acquire().unwrap();
        buf.as_mut_slice()[0] = 0.25;
        producer.publish(buf);

        let received = consumer.try_recv().expect("published buffer");
        assert_eq!(received.as_slice()[0], 0.25);
        consumer.release(received);
    }

    #[test]
    fn full_data_ring_increments_drop_counter() {
        let (mut producer, _consumer) = buffer_pool(8, 1);
        for _ in 0..RING_CAPACITY {
            let buf = producer.acquire().unwrap();
            producer.publish(buf);
        }
        assert_eq!(producer.stats().dropped(), 0);
        let overflow = producer.acquire().unwrap();
        producer.publish(overflow);
        assert_eq!(producer.stats().dropped(), 1);
    }
}
