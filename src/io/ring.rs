// src/io/ring.rs
//
// Fixed-capacity single-producer/single-consumer byte ring.
//
// Serial reader threads and TCP reader tasks write into a ring; the poll loop
// drains it. Index updates happen under a short mutex section so the ring can
// be shared through an `Arc` between any thread and task.

use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
struct RingState {
    data: Box<[u8]>,
    /// Next slot to write
    head: usize,
    /// Next slot to read
    tail: usize,
}

impl RingState {
    fn slots(&self) -> usize {
        self.data.len()
    }

    fn len(&self) -> usize {
        (self.head + self.slots() - self.tail) % self.slots()
    }

    fn is_full(&self) -> bool {
        (self.head + 1) % self.slots() == self.tail
    }

    fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.data[self.head] = byte;
        self.head = (self.head + 1) % self.slots();
        true
    }
}

/// Byte FIFO that refuses writes when full and never overwrites unread data.
#[derive(Debug)]
pub struct RingBuffer {
    state: Mutex<RingState>,
}

impl RingBuffer {
    /// Ring able to hold exactly `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        // One slot stays empty to tell full from empty
        Self {
            state: Mutex::new(RingState {
                data: vec![0u8; capacity + 1].into_boxed_slice(),
                head: 0,
                tail: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingState> {
        // A panicking writer cannot leave the indices inconsistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store one byte. Returns `false` if the ring is full.
    pub fn write(&self, byte: u8) -> bool {
        self.lock().push(byte)
    }

    /// Store as many bytes as fit. Returns the number accepted.
    pub fn write_slice(&self, bytes: &[u8]) -> usize {
        let mut state = self.lock();
        let mut written = 0;
        for &byte in bytes {
            if !state.push(byte) {
                break;
            }
            written += 1;
        }
        written
    }

    /// Take every buffered byte in FIFO order.
    pub fn drain(&self) -> Vec<u8> {
        let mut state = self.lock();
        let mut out = Vec::with_capacity(state.len());
        while state.tail != state.head {
            out.push(state.data[state.tail]);
            state.tail = (state.tail + 1) % state.slots();
        }
        out
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.lock();
        state.head == state.tail
    }

    pub fn is_full(&self) -> bool {
        self.lock().is_full()
    }

    /// Number of bytes the ring can hold
    pub fn capacity(&self) -> usize {
        self.lock().slots() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fill_to_capacity_then_refuse() {
        let ring = RingBuffer::new(4);
        assert!(ring.is_empty());
        for b in 0..4u8 {
            assert!(ring.write(b));
        }
        assert!(ring.is_full());
        assert!(!ring.write(99));
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.drain(), vec![0, 1, 2, 3]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_write_slice_partial() {
        let ring = RingBuffer::new(5);
        assert_eq!(ring.write_slice(&[1, 2, 3]), 3);
        assert_eq!(ring.write_slice(&[4, 5, 6, 7]), 2);
        assert_eq!(ring.drain(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_wraparound() {
        let ring = RingBuffer::new(3);
        for round in 0..10u8 {
            assert_eq!(ring.write_slice(&[round, round + 1]), 2);
            assert_eq!(ring.drain(), vec![round, round + 1]);
        }
        ring.write_slice(&[7, 8]);
        assert_eq!(ring.drain(), vec![7, 8]);
        ring.write_slice(&[1, 2, 3]);
        assert!(ring.is_full());
        assert_eq!(ring.drain(), vec![1, 2, 3]);
    }

    #[test]
    fn test_drain_empty() {
        let ring = RingBuffer::new(8);
        assert!(ring.drain().is_empty());
        assert_eq!(ring.capacity(), 8);
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let ring = Arc::new(RingBuffer::new(64));
        let total = 10_000usize;

        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                let mut sent = 0usize;
                while sent < total {
                    if ring.write((sent % 251) as u8) {
                        sent += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut received = Vec::with_capacity(total);
        while received.len() < total {
            let chunk = ring.drain();
            if chunk.is_empty() {
                std::thread::yield_now();
            }
            received.extend(chunk);
        }
        producer.join().unwrap();

        assert_eq!(received.len(), total);
        for (i, b) in received.iter().enumerate() {
            assert_eq!(*b, (i % 251) as u8);
        }
    }
}
