//! # Single producer, single consumer ring buffer
//!
//! Frames and scans are handed between threads through fixed-capacity lock-free queues. A buffer
//! created with `N` slots holds at most `N - 1` items: it is full when one more item would make
//! the write position catch up with the read position.
//!
//! The two ends are separate types, [`Producer`] and [`Consumer`], neither of which can be
//! cloned, so there can only ever be one of each.
//!
//! The storage is a [`crossbeam_queue::ArrayQueue`]. Publishing an item and taking it out are
//! paired with release/acquire operations on each slot, so the consumer never sees a slot before
//! the producer has finished writing it, and the producer never reuses a slot the consumer is
//! still reading.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Writing end of a ring buffer.
pub struct Producer<T> {
    queue: Arc<ArrayQueue<T>>,
}

/// Reading end of a ring buffer.
pub struct Consumer<T> {
    queue: Arc<ArrayQueue<T>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RingBufError {
    #[error("A ring buffer needs at least 2 slots, {0} requested")]
    InvalidCapacity(usize),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Create a new ring buffer with the given number of slots, returning its two ends.
pub fn ring_buf<T: Send>(slots: usize) -> Result<(Producer<T>, Consumer<T>), RingBufError> {
    if slots < 2 {
        return Err(RingBufError::InvalidCapacity(slots));
    }

    // One slot is always left free between the write and read positions
    let queue = Arc::new(ArrayQueue::new(slots - 1));

    Ok((
        Producer {
            queue: queue.clone(),
        },
        Consumer { queue },
    ))
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<T: Send> Producer<T> {
    /// Publish an item.
    ///
    /// If the buffer is full the item is handed back and nothing is overwritten.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        self.queue.push(item)
    }

    /// True if the next [`Producer::push`] would be rejected.
    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Number of published items not yet consumed.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Maximum number of items the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

impl<T: Send> Consumer<T> {
    /// Take the oldest published item, if any.
    pub fn pop(&mut self) -> Option<T> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of published items not yet consumed.
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_full_and_empty() -> Result<(), RingBufError> {
        let (mut tx, mut rx) = ring_buf::<u32>(16)?;

        assert!(rx.is_empty());
        assert_eq!(rx.pop(), None);
        assert_eq!(tx.capacity(), 15);

        for i in 0..15 {
            assert_eq!(tx.push(i), Ok(()));
        }

        // The 16th item would make the cursors equal, it must be handed back
        assert!(tx.is_full());
        assert_eq!(tx.push(99), Err(99));
        assert_eq!(tx.len(), 15);

        // Freeing one slot allows exactly one more item
        assert_eq!(rx.pop(), Some(0));
        assert!(!tx.is_full());
        assert_eq!(tx.push(15), Ok(()));
        assert_eq!(tx.push(16), Err(16));

        let drained: Vec<u32> = std::iter::from_fn(|| rx.pop()).collect();
        assert_eq!(drained, (1..16).collect::<Vec<_>>());
        assert!(rx.is_empty());

        Ok(())
    }

    #[test]
    fn test_two_slots() -> Result<(), RingBufError> {
        let (mut tx, mut rx) = ring_buf::<u8>(2)?;

        assert_eq!(tx.capacity(), 1);
        assert_eq!(tx.push(1), Ok(()));
        assert_eq!(tx.push(2), Err(2));
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.pop(), Some(1));
        assert_eq!(tx.push(3), Ok(()));
        assert_eq!(rx.pop(), Some(3));
        assert_eq!(rx.pop(), None);

        Ok(())
    }

    #[test]
    fn test_invalid_capacity() {
        assert!(matches!(
            ring_buf::<u8>(1),
            Err(RingBufError::InvalidCapacity(1))
        ));
    }

    #[test]
    fn test_order_across_threads() -> Result<(), RingBufError> {
        const NUM_ITEMS: u64 = 20_000;

        let (mut tx, mut rx) = ring_buf::<Vec<u64>>(4)?;

        let producer = thread::spawn(move || {
            for i in 0..NUM_ITEMS {
                // A payload large enough that a torn write would be visible
                let mut item = vec![i; 32];
                loop {
                    match tx.push(item) {
                        Ok(()) => break,
                        Err(back) => {
                            item = back;
                            thread::yield_now();
                        }
                    }
                }
            }
        });

        let mut expected = 0;
        while expected < NUM_ITEMS {
            match rx.pop() {
                Some(item) => {
                    assert!(item.iter().all(|v| *v == expected));
                    expected += 1;
                }
                None => thread::yield_now(),
            }
        }

        producer.join().expect("producer panicked");
        assert!(rx.is_empty());

        Ok(())
    }
}
