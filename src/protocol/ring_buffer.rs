//! Fixed-capacity byte ring used to accumulate inbound serial data.
//!
//! The ring never grows. A write that does not fit is rejected as a whole,
//! so callers either feed smaller chunks or let the decoder drain first.
//!
//! # Example
//!
//! ```
//! use teststand::protocol::RingBuffer;
//!
//! let mut ring = RingBuffer::new(8);
//! ring.append(b"abcdef").unwrap();
//! ring.consume(4);
//! ring.append(b"ghij").unwrap(); // wraps around
//!
//! assert_eq!(ring.peek(6).unwrap(), b"efghij");
//! ```

use crate::error::{Result, StationError};

/// Default ring capacity in bytes.
pub const DEFAULT_RING_CAPACITY: usize = 4096;

/// Byte ring with a read index, a length and a fixed backing store.
///
/// The write position is derived as `(read + len) % capacity`.
pub struct RingBuffer {
    storage: Box<[u8]>,
    read: usize,
    len: usize,
}

impl RingBuffer {
    /// Create a ring with the given capacity.
    ///
    /// A zero capacity is bumped to one byte so index math stays defined.
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity.max(1)].into_boxed_slice(),
            read: 0,
            len: 0,
        }
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of buffered bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the ring holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Free space in bytes.
    #[inline]
    pub fn available(&self) -> usize {
        self.capacity() - self.len
    }

    /// Append all of `data`, or nothing.
    ///
    /// # Errors
    ///
    /// Returns `BufferFull` if `data` is longer than the free space.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.available() {
            return Err(StationError::BufferFull {
                requested: data.len(),
                available: self.available(),
            });
        }

        let cap = self.capacity();
        let write = (self.read + self.len) % cap;
        let first = data.len().min(cap - write);
        self.storage[write..write + first].copy_from_slice(&data[..first]);
        self.storage[..data.len() - first].copy_from_slice(&data[first..]);
        self.len += data.len();
        Ok(())
    }

    /// Copy out the first `n` bytes without consuming them.
    ///
    /// Returns `None` if fewer than `n` bytes are buffered.
    pub fn peek(&self, n: usize) -> Option<Vec<u8>> {
        if n > self.len {
            return None;
        }
        let mut out = Vec::with_capacity(n);
        let (head, tail) = self.slices(n);
        out.extend_from_slice(head);
        out.extend_from_slice(tail);
        Some(out)
    }

    /// Drop the first `n` bytes. Consuming everything or more clears the ring.
    pub fn consume(&mut self, n: usize) {
        if n >= self.len {
            self.clear();
            return;
        }
        self.read = (self.read + n) % self.capacity();
        self.len -= n;
    }

    /// Reset to empty.
    pub fn clear(&mut self) {
        self.read = 0;
        self.len = 0;
    }

    /// Byte at logical offset `index` from the read position.
    #[inline]
    pub fn at(&self, index: usize) -> Option<u8> {
        if index >= self.len {
            return None;
        }
        Some(self.storage[(self.read + index) % self.capacity()])
    }

    /// Big-endian u16 at logical offset `index`.
    pub fn be_u16_at(&self, index: usize) -> Option<u16> {
        Some(u16::from_be_bytes([self.at(index)?, self.at(index + 1)?]))
    }

    /// The first `n` buffered bytes as at most two contiguous slices.
    ///
    /// `n` is clamped to the buffered length.
    pub fn slices(&self, n: usize) -> (&[u8], &[u8]) {
        let n = n.min(self.len);
        let cap = self.capacity();
        let first = n.min(cap - self.read);
        (
            &self.storage[self.read..self.read + first],
            &self.storage[..n - first],
        )
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("read", &self.read)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_peek() {
        let mut ring = RingBuffer::new(16);
        ring.append(b"hello").unwrap();

        assert_eq!(ring.len(), 5);
        assert_eq!(ring.peek(5).unwrap(), b"hello");
        assert_eq!(ring.peek(2).unwrap(), b"he");
        // peek never advances
        assert_eq!(ring.len(), 5);
    }

    #[test]
    fn test_append_rejects_whole_write() {
        let mut ring = RingBuffer::new(8);
        ring.append(b"12345").unwrap();

        let result = ring.append(b"6789");
        assert!(matches!(
            result,
            Err(StationError::BufferFull {
                requested: 4,
                available: 3
            })
        ));
        // nothing partial was written
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.peek(5).unwrap(), b"12345");
    }

    #[test]
    fn test_fill_to_exact_capacity() {
        let mut ring = RingBuffer::new(4);
        ring.append(b"abcd").unwrap();
        assert_eq!(ring.available(), 0);
        assert!(ring.append(b"e").is_err());
    }

    #[test]
    fn test_peek_more_than_buffered() {
        let mut ring = RingBuffer::new(8);
        ring.append(b"ab").unwrap();
        assert!(ring.peek(3).is_none());
    }

    #[test]
    fn test_consume_partial_and_all() {
        let mut ring = RingBuffer::new(8);
        ring.append(b"abcdef").unwrap();

        ring.consume(2);
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.at(0), Some(b'c'));

        ring.consume(100);
        assert!(ring.is_empty());
        assert_eq!(ring.at(0), None);
    }

    #[test]
    fn test_wraparound() {
        let mut ring = RingBuffer::new(8);
        ring.append(b"abcdef").unwrap();
        ring.consume(5);
        ring.append(b"ghijkl").unwrap();

        assert_eq!(ring.len(), 7);
        assert_eq!(ring.peek(7).unwrap(), b"fghijkl");

        let (head, tail) = ring.slices(7);
        assert_eq!(head, b"fgh");
        assert_eq!(tail, b"ijkl");

        for (i, expected) in b"fghijkl".iter().enumerate() {
            assert_eq!(ring.at(i), Some(*expected));
        }
    }

    #[test]
    fn test_be_u16_across_wrap() {
        let mut ring = RingBuffer::new(4);
        ring.append(&[0, 0, 0]).unwrap();
        ring.consume(3);
        ring.append(&[0x12, 0x34]).unwrap();

        assert_eq!(ring.be_u16_at(0), Some(0x1234));
        assert_eq!(ring.be_u16_at(1), None);
    }

    #[test]
    fn test_clear_resets_indices() {
        let mut ring = RingBuffer::new(8);
        ring.append(b"abc").unwrap();
        ring.consume(1);
        ring.clear();

        assert!(ring.is_empty());
        assert_eq!(ring.available(), 8);
        ring.append(b"12345678").unwrap();
        assert_eq!(ring.peek(8).unwrap(), b"12345678");
    }
}
