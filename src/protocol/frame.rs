//! Outbound frame assembly.
//!
//! Uses `bytes::BytesMut` to build each frame in one allocation and hands
//! out a frozen `Bytes` that the writer task can share without copying.
//!
//! # Example
//!
//! ```
//! use teststand::protocol::{build_frame, MIN_FRAME_LEN};
//!
//! let frame = build_frame(1, br#"{"x":1}"#).unwrap();
//! assert_eq!(frame.len(), MIN_FRAME_LEN + 7);
//! assert_eq!(&frame[..2], &[0x3A, 0x3B]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::checksum::crc16;
use super::wire_format::{Header, MAX_CONTENT_LEN, MIN_FRAME_LEN};
use crate::error::{Result, StationError};

/// Build a complete frame around `content`.
///
/// Content is written verbatim; no document validation happens here.
///
/// # Errors
///
/// Returns `ContentTooLarge` if `content` exceeds the 16-bit length field.
pub fn build_frame(sequence: u16, content: &[u8]) -> Result<Bytes> {
    if content.len() > MAX_CONTENT_LEN {
        return Err(StationError::ContentTooLarge(content.len()));
    }

    let header = Header::new(sequence, content.len() as u16);
    let mut buf = BytesMut::with_capacity(MIN_FRAME_LEN + content.len());
    buf.put_slice(&header.encode());
    buf.put_slice(content);
    let crc = crc16(&buf);
    buf.put_u16(crc);
    Ok(buf.freeze())
}

/// Build a frame whose content is `prefix` followed by `content`.
///
/// Used for the legacy marker byte without an extra copy of the JSON text.
pub fn build_frame_prefixed(sequence: u16, prefix: &[u8], content: &[u8]) -> Result<Bytes> {
    let total = prefix.len() + content.len();
    if total > MAX_CONTENT_LEN {
        return Err(StationError::ContentTooLarge(total));
    }

    let header = Header::new(sequence, total as u16);
    let mut buf = BytesMut::with_capacity(MIN_FRAME_LEN + total);
    buf.put_slice(&header.encode());
    buf.put_slice(prefix);
    buf.put_slice(content);
    let crc = crc16(&buf);
    buf.put_u16(crc);
    Ok(buf.freeze())
}
