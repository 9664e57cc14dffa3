//! Wire format encoding and decoding.
//!
//! Implements the station frame layout:
//! ```text
//! ┌────────┬──────────┬──────────┬──────────────┬──────────┐
//! │ Marker │ Sequence │ Length   │ Content      │ CRC      │
//! │ 3A 3B  │ uint16 BE│ uint16 BE│ Length bytes │ uint16 BE│
//! └────────┴──────────┴──────────┴──────────────┴──────────┘
//! ```
//!
//! `Length` counts content bytes only. The CRC covers everything before it.
//! All multi-byte integers are Big Endian.

/// First header marker byte.
pub const MARKER_HI: u8 = 0x3A;

/// Second header marker byte.
pub const MARKER_LO: u8 = 0x3B;

/// Fixed header size in bytes (marker + sequence + length).
pub const HEADER_SIZE: usize = 6;

/// Trailing CRC size in bytes.
pub const CRC_SIZE: usize = 2;

/// Smallest possible frame (empty content).
pub const MIN_FRAME_LEN: usize = HEADER_SIZE + CRC_SIZE;

/// Largest content the 16-bit length field can describe.
pub const MAX_CONTENT_LEN: usize = u16::MAX as usize;

/// Byte deployed stations place before the JSON text of a frame's content.
pub const LEGACY_CONTENT_MARKER: u8 = 0x04;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Per-direction sequence number.
    pub sequence: u16,
    /// Content length in bytes.
    pub content_length: u16,
}

impl Header {
    /// Create a new header.
    pub fn new(sequence: u16, content_length: u16) -> Self {
        Self {
            sequence,
            content_length,
        }
    }

    /// Total frame length for this header (header + content + CRC).
    #[inline]
    pub fn frame_len(&self) -> usize {
        MIN_FRAME_LEN + self.content_length as usize
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use teststand::protocol::Header;
    ///
    /// let bytes = Header::new(1, 7).encode();
    /// assert_eq!(bytes, [0x3A, 0x3B, 0x00, 0x01, 0x00, 0x07]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (6 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = MARKER_HI;
        buf[1] = MARKER_LO;
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..6].copy_from_slice(&self.content_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if the buffer is too short or the marker is wrong.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE || !is_marker(buf[0], buf[1]) {
            return None;
        }
        Some(Self {
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            content_length: u16::from_be_bytes([buf[4], buf[5]]),
        })
    }
}

/// Check whether two consecutive bytes form the header marker.
#[inline]
pub fn is_marker(hi: u8, lo: u8) -> bool {
    hi == MARKER_HI && lo == MARKER_LO
}
