//! Protocol module - wire format, framing, and the inbound decoder.
//!
//! This module implements the binary link protocol:
//! - 6-byte header encoding/decoding with CRC-16/CCITT-FALSE trailer
//! - Fixed ring buffer for accumulating partial reads
//! - Resynchronizing frame decoder state machine

mod checksum;
mod decoder;
mod frame;
mod ring_buffer;
mod wire_format;

pub use checksum::{crc16, crc16_chunks};
pub use decoder::{DecodeFault, DecoderStats, FrameDecoder, ParseOutcome, Resync};
pub use frame::{build_frame, build_frame_prefixed};
pub use ring_buffer::{RingBuffer, DEFAULT_RING_CAPACITY};
pub use wire_format::{
    is_marker, Header, CRC_SIZE, HEADER_SIZE, LEGACY_CONTENT_MARKER, MARKER_HI, MARKER_LO,
    MAX_CONTENT_LEN, MIN_FRAME_LEN,
};
