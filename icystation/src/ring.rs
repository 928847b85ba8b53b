//! Fixed-capacity smoothing buffer for recent audio bytes.
//!
//! Semantically a FIFO that drops its oldest quarter in one step when full,
//! so steady-state writes amortize to a single copy.  The lock is held only
//! for copy operations; there are no blocking waits and overflow never fails.

use std::sync::Mutex;

pub struct RingBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

struct Inner {
    buf: Vec<u8>,
    /// Read cursor (position of the oldest byte).
    head: usize,
    /// Bytes currently stored.
    len: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: vec![0; capacity],
                head: 0,
                len: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("ring lock").len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append bytes, discarding the oldest quarter of the buffer whenever
    /// free space runs out mid-write.
    pub fn write(&self, mut data: &[u8]) {
        let mut inner = self.inner.lock().expect("ring lock");
        let capacity = self.capacity;
        if capacity == 0 {
            return;
        }

        while !data.is_empty() {
            let mut free = capacity - inner.len;
            if free == 0 {
                let discard = (capacity / 4).max(1).min(inner.len);
                inner.head = (inner.head + discard) % capacity;
                inner.len -= discard;
                free = capacity - inner.len;
            }

            let take = data.len().min(free);
            let tail = (inner.head + inner.len) % capacity;
            let contiguous = (capacity - tail).min(take);
            inner.buf[tail..tail + contiguous].copy_from_slice(&data[..contiguous]);
            if contiguous < take {
                inner.buf[..take - contiguous].copy_from_slice(&data[contiguous..take]);
            }

            inner.len += take;
            data = &data[take..];
        }
    }

    /// Contiguous chronological copy of the held bytes, oldest first.
    pub fn snapshot(&self) -> Vec<u8> {
        let inner = self.inner.lock().expect("ring lock");
        let mut out = vec![0; inner.len];
        if inner.len == 0 {
            return out;
        }

        let capacity = self.capacity;
        let contiguous = (capacity - inner.head).min(inner.len);
        out[..contiguous].copy_from_slice(&inner.buf[inner.head..inner.head + contiguous]);
        if contiguous < inner.len {
            out[contiguous..].copy_from_slice(&inner.buf[..inner.len - contiguous]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_without_overflow() {
        let ring = RingBuffer::new(16);
        ring.write(b"hello");
        ring.write(b" world");
        assert_eq!(ring.snapshot(), b"hello world");
        assert_eq!(ring.len(), 11);
    }

    #[test]
    fn overflow_drops_oldest_quarter() {
        let ring = RingBuffer::new(16);
        ring.write(b"0123456789abcdef");
        assert_eq!(ring.len(), 16);

        // One more byte forces a 4-byte drop before the write lands.
        ring.write(b"X");
        assert_eq!(ring.len(), 13);
        assert_eq!(ring.snapshot(), b"456789abcdefX");
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let ring = RingBuffer::new(64);
        for i in 0..100u8 {
            ring.write(&[i; 13]);
            assert!(ring.len() <= 64);
        }
    }

    #[test]
    fn oversized_write_keeps_most_recent_bytes() {
        let ring = RingBuffer::new(8);
        let data: Vec<u8> = (0..32).collect();
        ring.write(&data);

        let snap = ring.snapshot();
        assert!(snap.len() <= 8);
        // Whatever survives must be the tail of the input, in order.
        assert_eq!(&snap[..], &data[32 - snap.len()..]);
    }

    #[test]
    fn snapshot_is_chronological_across_wrap() {
        let ring = RingBuffer::new(8);
        ring.write(b"abcdefgh");
        ring.write(b"ij");
        let snap = ring.snapshot();
        assert_eq!(snap.last(), Some(&b'j'));
        let pos_i = snap.iter().position(|&b| b == b'i').unwrap();
        assert_eq!(snap[pos_i + 1], b'j');
    }

    #[test]
    fn concurrent_writers_stay_bounded() {
        use std::sync::Arc;

        let ring = Arc::new(RingBuffer::new(1024));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let ring = ring.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        ring.write(&[i as u8; 96]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(ring.len() <= 1024);
    }
}
