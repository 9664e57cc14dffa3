//! Frame decoder state machine.
//!
//! Bytes go into a fixed [`RingBuffer`]; [`FrameDecoder::try_parse_one`]
//! walks the buffered data through these states:
//!
//! - `Idle`: need at least `MIN_FRAME_LEN` bytes
//! - `FindHeader`: locate the `3A 3B` marker, dropping leading garbage
//! - `ParseHeader`: read sequence and content length
//! - `CheckComplete`: wait until the whole frame is buffered
//! - `VerifyCrc`: compare the trailing CRC, drop only the marker on mismatch
//! - `CheckDuplicate`: apply the [`DuplicatePolicy`]
//! - `ParsePayload`: decode the content as JSON
//! - `BuildCommand`: split `subCommand` and `data` into a [`Command`]
//! - `Consume`: remove the frame and remember its sequence
//! - `Error`: drop one byte of a frame that can never fit
//!
//! A single read may carry several frames, so callers loop until
//! `Incomplete`:
//!
//! ```
//! use teststand::protocol::{build_frame, FrameDecoder, ParseOutcome};
//!
//! let mut decoder = FrameDecoder::new();
//! let frame = build_frame(1, br#"{"subCommand":1,"data":{}}"#).unwrap();
//! decoder.write_buffer(&frame).unwrap();
//!
//! let mut commands = Vec::new();
//! loop {
//!     match decoder.try_parse_one() {
//!         ParseOutcome::Incomplete => break,
//!         ParseOutcome::Success(command) => commands.push(command),
//!         _ => continue,
//!     }
//! }
//! assert_eq!(commands.len(), 1);
//! ```

use bytes::Bytes;
use serde_json::Value;

use super::checksum::crc16_chunks;
use super::frame::{build_frame, build_frame_prefixed};
use super::ring_buffer::{RingBuffer, DEFAULT_RING_CAPACITY};
use super::wire_format::{
    is_marker, Header, CRC_SIZE, HEADER_SIZE, LEGACY_CONTENT_MARKER, MARKER_HI, MIN_FRAME_LEN,
};
use crate::config::DuplicatePolicy;
use crate::error::Result;
use crate::message::{Command, Response};

/// Parser state. Later states carry what earlier states learned.
#[derive(Debug)]
enum State {
    Idle,
    FindHeader,
    ParseHeader,
    CheckComplete(Header),
    VerifyCrc(Header),
    CheckDuplicate(Header),
    ParsePayload(Header),
    BuildCommand(Header, Value),
    Consume(Header, Command),
    Error(Header),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Idle => "Idle",
            State::FindHeader => "FindHeader",
            State::ParseHeader => "ParseHeader",
            State::CheckComplete(_) => "CheckComplete",
            State::VerifyCrc(_) => "VerifyCrc",
            State::CheckDuplicate(_) => "CheckDuplicate",
            State::ParsePayload(_) => "ParsePayload",
            State::BuildCommand(..) => "BuildCommand",
            State::Consume(..) => "Consume",
            State::Error(_) => "Error",
        }
    }
}

/// Why the decoder asked to be called again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resync {
    /// Bytes before the header marker were dropped.
    SkippedGarbage(usize),
    /// CRC mismatch; only the two marker bytes were dropped.
    ChecksumMismatch { computed: u16, received: u16 },
    /// Repeated sequence number rejected by policy; the frame was dropped.
    Duplicate(u16),
    /// Content was not a usable document; the frame was dropped.
    UndecodableContent,
}

/// Unrecoverable condition for the bytes at the front of the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeFault {
    /// No header marker anywhere; the buffered span was dropped.
    NoHeader { dropped: usize },
    /// Announced frame is larger than the ring; one byte was dropped.
    Oversized { content_length: u16 },
}

/// Result of one [`FrameDecoder::try_parse_one`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// More bytes are needed. Nothing was consumed.
    Incomplete,
    /// A frame was decoded and consumed.
    Success(Command),
    /// Some bytes were dropped; call again.
    Retry(Resync),
    /// Bytes were dropped to get past an unusable span; call again.
    Error(DecodeFault),
}

/// Running counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub checksum_failures: u64,
    pub undecodable_frames: u64,
    pub duplicates_dropped: u64,
    pub bytes_discarded: u64,
}

/// Inbound frame decoder and outbound frame encoder.
///
/// Not synchronized; [`Link`](crate::link::Link) wraps it in a mutex so
/// parse and encode calls never interleave.
pub struct FrameDecoder {
    ring: RingBuffer,
    state: State,
    duplicate_policy: DuplicatePolicy,
    last_sequence: Option<u16>,
    report_sequence: u16,
    legacy_marker: bool,
    stats: DecoderStats,
}

impl FrameDecoder {
    /// Create a decoder with the default ring capacity and policies.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }

    /// Create a decoder with a custom ring capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: RingBuffer::new(capacity.max(MIN_FRAME_LEN)),
            state: State::Idle,
            duplicate_policy: DuplicatePolicy::default(),
            last_sequence: None,
            report_sequence: 0,
            legacy_marker: false,
            stats: DecoderStats::default(),
        }
    }

    /// Set the duplicate-sequence policy.
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Prefix outbound content with the legacy 0x04 marker.
    pub fn with_legacy_marker(mut self, enabled: bool) -> Self {
        self.legacy_marker = enabled;
        self
    }

    /// Append inbound bytes.
    ///
    /// # Errors
    ///
    /// Returns `BufferFull` if the ring cannot take all of `data`.
    pub fn write_buffer(&mut self, data: &[u8]) -> Result<()> {
        self.ring.append(data)
    }

    /// Free ring space in bytes.
    #[inline]
    pub fn available(&self) -> usize {
        self.ring.available()
    }

    /// Number of buffered bytes.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// Sequence number of the last accepted frame.
    #[inline]
    pub fn last_sequence(&self) -> Option<u16> {
        self.last_sequence
    }

    /// Diagnostic counters.
    #[inline]
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Drop buffered bytes and forget the last sequence number.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.state = State::Idle;
        self.last_sequence = None;
    }

    /// Try to decode one frame from the front of the buffer.
    pub fn try_parse_one(&mut self) -> ParseOutcome {
        loop {
            match std::mem::replace(&mut self.state, State::Idle) {
                State::Idle => {
                    if self.ring.len() < MIN_FRAME_LEN {
                        return ParseOutcome::Incomplete;
                    }
                    self.state = State::FindHeader;
                }

                State::FindHeader => match self.find_marker() {
                    Some(0) => self.state = State::ParseHeader,
                    Some(offset) => {
                        tracing::debug!("Skipping {} bytes before frame header", offset);
                        self.discard(offset);
                        return ParseOutcome::Retry(Resync::SkippedGarbage(offset));
                    }
                    None => {
                        let len = self.ring.len();
                        // a trailing 0x3A may be the first half of the next marker
                        let keep = usize::from(self.ring.at(len - 1) == Some(MARKER_HI));
                        let dropped = len - keep;
                        tracing::debug!("No frame header in {} buffered bytes", len);
                        self.discard(dropped);
                        return ParseOutcome::Error(DecodeFault::NoHeader { dropped });
                    }
                },

                State::ParseHeader => {
                    let header = match (self.ring.be_u16_at(2), self.ring.be_u16_at(4)) {
                        (Some(sequence), Some(content_length)) => {
                            Header::new(sequence, content_length)
                        }
                        _ => return ParseOutcome::Incomplete,
                    };
                    self.state = if header.frame_len() > self.ring.capacity() {
                        State::Error(header)
                    } else {
                        State::CheckComplete(header)
                    };
                }

                State::CheckComplete(header) => {
                    if self.ring.len() < header.frame_len() {
                        self.state = State::CheckComplete(header);
                        return ParseOutcome::Incomplete;
                    }
                    self.state = State::VerifyCrc(header);
                }

                State::VerifyCrc(header) => {
                    let body_len = header.frame_len() - CRC_SIZE;
                    let (head, tail) = self.ring.slices(body_len);
                    let computed = crc16_chunks([head, tail]);
                    let received = self.ring.be_u16_at(body_len).unwrap_or(!computed);

                    if computed != received {
                        tracing::warn!(
                            "CRC mismatch on frame {}: computed {:#06x}, received {:#06x}",
                            header.sequence,
                            computed,
                            received
                        );
                        self.stats.checksum_failures += 1;
                        self.discard(2);
                        return ParseOutcome::Retry(Resync::ChecksumMismatch { computed, received });
                    }
                    self.state = State::CheckDuplicate(header);
                }

                State::CheckDuplicate(header) => {
                    if self.duplicate_policy == DuplicatePolicy::Reject
                        && self.last_sequence == Some(header.sequence)
                    {
                        tracing::info!("Dropping duplicate frame {}", header.sequence);
                        self.stats.duplicates_dropped += 1;
                        self.discard(header.frame_len());
                        return ParseOutcome::Retry(Resync::Duplicate(header.sequence));
                    }
                    self.state = State::ParsePayload(header);
                }

                State::ParsePayload(header) => {
                    let (head, tail) = self.ring.slices(header.frame_len() - CRC_SIZE);
                    let mut body = Vec::with_capacity(head.len() + tail.len());
                    body.extend_from_slice(head);
                    body.extend_from_slice(tail);

                    match decode_content(&body[HEADER_SIZE..]) {
                        Ok(document) => self.state = State::BuildCommand(header, document),
                        Err(e) => {
                            tracing::warn!("Frame {} content is not JSON: {}", header.sequence, e);
                            return self.drop_undecodable(header);
                        }
                    }
                }

                State::BuildCommand(header, document) => {
                    match Command::from_document(header.sequence, document) {
                        Ok(command) => self.state = State::Consume(header, command),
                        Err(e) => {
                            tracing::warn!("Frame {} rejected: {}", header.sequence, e);
                            return self.drop_undecodable(header);
                        }
                    }
                }

                State::Consume(header, command) => {
                    self.ring.consume(header.frame_len());
                    self.last_sequence = Some(header.sequence);
                    self.stats.frames_decoded += 1;
                    tracing::debug!(
                        "Decoded frame {} ({} content bytes)",
                        header.sequence,
                        header.content_length
                    );
                    return ParseOutcome::Success(command);
                }

                State::Error(header) => {
                    tracing::warn!(
                        "Frame length {} exceeds buffer capacity {}, skipping one byte",
                        header.frame_len(),
                        self.ring.capacity()
                    );
                    self.discard(1);
                    return ParseOutcome::Error(DecodeFault::Oversized {
                        content_length: header.content_length,
                    });
                }
            }
        }
    }

    /// Encode a frame after checking that `content` is a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `Json` if `content` does not parse, `ContentTooLarge` if it
    /// does not fit the length field.
    pub fn encode_frame(&self, content: &[u8], sequence: u16) -> Result<Bytes> {
        serde_json::from_slice::<Value>(content)?;
        self.frame_content(content, sequence)
    }

    /// Encode a response under an explicit sequence number.
    pub fn encode_response(&self, response: &Response, sequence: u16) -> Result<Bytes> {
        let text = response.to_json()?;
        self.frame_content(text.as_bytes(), sequence)
    }

    /// Encode a response under the next outbound report sequence number.
    pub fn encode_report(&mut self, response: &Response) -> Result<Bytes> {
        let sequence = self.report_sequence;
        let frame = self.encode_response(response, sequence)?;
        self.report_sequence = sequence.wrapping_add(1);
        Ok(frame)
    }

    fn frame_content(&self, content: &[u8], sequence: u16) -> Result<Bytes> {
        if self.legacy_marker {
            build_frame_prefixed(sequence, &[LEGACY_CONTENT_MARKER], content)
        } else {
            build_frame(sequence, content)
        }
    }

    fn find_marker(&self) -> Option<usize> {
        let len = self.ring.len();
        (0..len.saturating_sub(1)).find(|&i| match (self.ring.at(i), self.ring.at(i + 1)) {
            (Some(hi), Some(lo)) => is_marker(hi, lo),
            _ => false,
        })
    }

    fn drop_undecodable(&mut self, header: Header) -> ParseOutcome {
        self.stats.undecodable_frames += 1;
        self.discard(header.frame_len());
        ParseOutcome::Retry(Resync::UndecodableContent)
    }

    fn discard(&mut self, n: usize) {
        let n = n.min(self.ring.len());
        self.stats.bytes_discarded += n as u64;
        self.ring.consume(n);
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        self.state.name()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("ring", &self.ring)
            .field("state", &self.state.name())
            .field("last_sequence", &self.last_sequence)
            .field("report_sequence", &self.report_sequence)
            .finish()
    }
}

/// Decode frame content, tolerating the legacy marker byte and NUL padding.
fn decode_content(content: &[u8]) -> serde_json::Result<Value> {
    let content = content.strip_prefix(&[LEGACY_CONTENT_MARKER]).unwrap_or(content);
    let end = content
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    serde_json::from_slice(&content[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CommandType;
    use serde_json::json;

    fn frame(sequence: u16, content: &str) -> Vec<u8> {
        build_frame(sequence, content.as_bytes()).unwrap().to_vec()
    }

    /// Run the decoder until it needs more bytes.
    fn drain(decoder: &mut FrameDecoder) -> (Vec<Command>, Vec<ParseOutcome>) {
        let mut commands = Vec::new();
        let mut others = Vec::new();
        for _ in 0..10_000 {
            match decoder.try_parse_one() {
                ParseOutcome::Incomplete => return (commands, others),
                ParseOutcome::Success(command) => commands.push(command),
                other => others.push(other),
            }
        }
        panic!("decoder did not settle");
    }

    #[test]
    fn test_reference_frame() {
        let mut bytes = vec![0x3A, 0x3B, 0x00, 0x01, 0x00, 0x07];
        bytes.extend_from_slice(br#"{"x":1}"#);
        let crc = crate::protocol::crc16(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());

        let mut decoder = FrameDecoder::new();
        decoder.write_buffer(&bytes).unwrap();

        match decoder.try_parse_one() {
            ParseOutcome::Success(command) => {
                assert_eq!(command.sequence, 1);
                assert_eq!(command.payload, json!({"x": 1}));
                assert_eq!(command.command_type, None);
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.try_parse_one(), ParseOutcome::Incomplete);
    }

    #[test]
    fn test_single_command_frame() {
        let mut decoder = FrameDecoder::new();
        decoder
            .write_buffer(&frame(42, r#"{"subCommand":5,"data":{"type":"storage"}}"#))
            .unwrap();

        let (commands, others) = drain(&mut decoder);
        assert!(others.is_empty());
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command_type, Some(CommandType::SingleTest));
        assert_eq!(commands[0].test_tag(), Some("storage"));
        assert_eq!(decoder.last_sequence(), Some(42));
    }

    #[test]
    fn test_multiple_frames_in_one_write() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = Vec::new();
        for seq in 1..=3 {
            bytes.extend(frame(seq, &format!(r#"{{"subCommand":1,"data":{{"n":{}}}}}"#, seq)));
        }
        decoder.write_buffer(&bytes).unwrap();

        let (commands, _) = drain(&mut decoder);
        let sequences: Vec<u16> = commands.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(commands[2].payload, json!({"n": 3}));
    }

    #[test]
    fn test_byte_at_a_time_never_consumes_early() {
        let mut decoder = FrameDecoder::new();
        let bytes = frame(7, r#"{"subCommand":2,"data":{}}"#);

        for (i, byte) in bytes.iter().enumerate() {
            decoder.write_buffer(&[*byte]).unwrap();
            let outcome = decoder.try_parse_one();
            if i + 1 < bytes.len() {
                assert_eq!(outcome, ParseOutcome::Incomplete, "byte {}", i);
                assert_eq!(decoder.buffered(), i + 1);
            } else {
                assert!(matches!(outcome, ParseOutcome::Success(ref c) if c.sequence == 7));
            }
        }
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_partial_frame_keeps_check_complete_state() {
        let mut decoder = FrameDecoder::new();
        let bytes = frame(1, r#"{"subCommand":1}"#);
        decoder.write_buffer(&bytes[..10]).unwrap();

        assert_eq!(decoder.try_parse_one(), ParseOutcome::Incomplete);
        assert_eq!(decoder.state_name(), "CheckComplete");

        decoder.write_buffer(&bytes[10..]).unwrap();
        assert!(matches!(decoder.try_parse_one(), ParseOutcome::Success(_)));
        assert_eq!(decoder.state_name(), "Idle");
    }

    #[test]
    fn test_resync_consumes_exactly_garbage_plus_frame() {
        let garbage = [0x00, 0xFF, 0x3A, 0x10, 0x3B, 0x99, 0x01];
        let good = frame(3, r#"{"subCommand":1,"data":{}}"#);
        let mut bytes = garbage.to_vec();
        bytes.extend_from_slice(&good);
        bytes.extend_from_slice(&[0x3A, 0x3B, 0x00]); // start of a following frame

        let mut decoder = FrameDecoder::new();
        decoder.write_buffer(&bytes).unwrap();
        let total = decoder.buffered();

        let (commands, others) = drain(&mut decoder);
        assert_eq!(commands.len(), 1);
        assert_eq!(
            others,
            vec![ParseOutcome::Retry(Resync::SkippedGarbage(garbage.len()))]
        );
        assert_eq!(total - decoder.buffered(), garbage.len() + good.len());
    }

    #[test]
    fn test_crc_failure_drops_only_marker() {
        let good = frame(9, r#"{"subCommand":1,"data":{"k":"v"}}"#);

        for bit in 0..(good.len() - MIN_FRAME_LEN) * 8 {
            let mut corrupted = good.clone();
            corrupted[HEADER_SIZE + bit / 8] ^= 1 << (bit % 8);

            let mut decoder = FrameDecoder::new();
            decoder.write_buffer(&corrupted).unwrap();

            let outcome = decoder.try_parse_one();
            assert!(
                matches!(outcome, ParseOutcome::Retry(Resync::ChecksumMismatch { .. })),
                "bit {}: {:?}",
                bit,
                outcome
            );
            assert_eq!(decoder.buffered(), corrupted.len() - 2);
        }
    }

    #[test]
    fn test_crc_failure_recovers_following_frame() {
        let mut bad = frame(1, r#"{"subCommand":1}"#);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let good = frame(2, r#"{"subCommand":2}"#);

        let mut decoder = FrameDecoder::new();
        decoder.write_buffer(&bad).unwrap();
        decoder.write_buffer(&good).unwrap();

        let (commands, others) = drain(&mut decoder);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].sequence, 2);
        assert!(others
            .iter()
            .any(|o| matches!(o, ParseOutcome::Retry(Resync::ChecksumMismatch { .. }))));
        assert_eq!(decoder.stats().checksum_failures, 1);
    }

    #[test]
    fn test_undecodable_content_drops_whole_frame() {
        let bad = frame(4, "not json at all");
        let good = frame(5, r#"{"subCommand":3}"#);

        let mut decoder = FrameDecoder::new();
        decoder.write_buffer(&bad).unwrap();
        decoder.write_buffer(&good).unwrap();

        assert_eq!(
            decoder.try_parse_one(),
            ParseOutcome::Retry(Resync::UndecodableContent)
        );
        assert_eq!(decoder.buffered(), good.len());
        assert!(matches!(decoder.try_parse_one(), ParseOutcome::Success(c) if c.sequence == 5));
    }

    #[test]
    fn test_non_integer_sub_command_is_undecodable() {
        let mut decoder = FrameDecoder::new();
        decoder
            .write_buffer(&frame(1, r#"{"subCommand":"x"}"#))
            .unwrap();
        assert_eq!(
            decoder.try_parse_one(),
            ParseOutcome::Retry(Resync::UndecodableContent)
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_no_header_drops_span() {
        let mut decoder = FrameDecoder::new();
        decoder.write_buffer(&[1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();

        assert_eq!(
            decoder.try_parse_one(),
            ParseOutcome::Error(DecodeFault::NoHeader { dropped: 9 })
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_no_header_keeps_trailing_marker_half() {
        let mut decoder = FrameDecoder::new();
        decoder.write_buffer(&[1, 2, 3, 4, 5, 6, 7, 0x3A]).unwrap();

        assert_eq!(
            decoder.try_parse_one(),
            ParseOutcome::Error(DecodeFault::NoHeader { dropped: 7 })
        );
        assert_eq!(decoder.buffered(), 1);

        let rest = frame(1, r#"{"subCommand":1}"#);
        decoder.write_buffer(&rest[1..]).unwrap();
        assert!(matches!(decoder.try_parse_one(), ParseOutcome::Success(_)));
    }

    #[test]
    fn test_oversized_frame_enters_error_state() {
        let mut decoder = FrameDecoder::with_capacity(64);
        decoder
            .write_buffer(&[0x3A, 0x3B, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00])
            .unwrap();

        assert_eq!(
            decoder.try_parse_one(),
            ParseOutcome::Error(DecodeFault::Oversized {
                content_length: 0x0100
            })
        );
        assert_eq!(decoder.buffered(), 7);
    }

    #[test]
    fn test_duplicate_accept_policy_delivers_twice() {
        let mut decoder = FrameDecoder::new();
        let bytes = frame(11, r#"{"subCommand":1}"#);
        decoder.write_buffer(&bytes).unwrap();
        decoder.write_buffer(&bytes).unwrap();

        let (commands, _) = drain(&mut decoder);
        assert_eq!(commands.len(), 2);
    }

    #[test]
    fn test_duplicate_reject_policy_drops_repeat() {
        let mut decoder = FrameDecoder::new().with_duplicate_policy(DuplicatePolicy::Reject);
        let bytes = frame(11, r#"{"subCommand":1}"#);
        decoder.write_buffer(&bytes).unwrap();
        decoder.write_buffer(&bytes).unwrap();
        decoder.write_buffer(&frame(12, r#"{"subCommand":1}"#)).unwrap();

        let (commands, others) = drain(&mut decoder);
        assert_eq!(commands.len(), 2);
        assert_eq!(others, vec![ParseOutcome::Retry(Resync::Duplicate(11))]);
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.stats().duplicates_dropped, 1);
    }

    #[test]
    fn test_legacy_marker_and_padding_tolerated() {
        let mut content = vec![LEGACY_CONTENT_MARKER];
        content.extend_from_slice(br#"{"subCommand":1,"data":{"a":true}}"#);
        content.push(0);

        let mut decoder = FrameDecoder::new();
        decoder
            .write_buffer(&build_frame(6, &content).unwrap())
            .unwrap();

        match decoder.try_parse_one() {
            ParseOutcome::Success(command) => assert_eq!(command.payload, json!({"a": true})),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let encoder = FrameDecoder::new();
        let content = br#"{"subCommand":15,"data":{"type":"net","list":[1,2,3]}}"#;
        let bytes = encoder.encode_frame(content, 0xABCD).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.write_buffer(&bytes).unwrap();
        match decoder.try_parse_one() {
            ParseOutcome::Success(command) => {
                assert_eq!(command.sequence, 0xABCD);
                assert_eq!(command.command_type, Some(CommandType::CombinedTest));
                assert_eq!(command.payload, json!({"type": "net", "list": [1, 2, 3]}));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_rejects_non_document() {
        let encoder = FrameDecoder::new();
        assert!(encoder.encode_frame(b"{broken", 1).is_err());
    }

    #[test]
    fn test_report_sequence_increments_and_wraps() {
        let mut encoder = FrameDecoder::new();
        encoder.report_sequence = u16::MAX;
        let response = Response::report(0x07, json!({}), true);

        let first = encoder.encode_report(&response).unwrap();
        let second = encoder.encode_report(&response).unwrap();
        assert_eq!(&first[2..4], &[0xFF, 0xFF]);
        assert_eq!(&second[2..4], &[0x00, 0x00]);
    }

    #[test]
    fn test_legacy_marker_encoding_roundtrips() {
        let encoder = FrameDecoder::new().with_legacy_marker(true);
        let bytes = encoder.encode_frame(br#"{"subCommand":1}"#, 2).unwrap();
        assert_eq!(bytes[HEADER_SIZE], LEGACY_CONTENT_MARKER);

        let mut decoder = FrameDecoder::new();
        decoder.write_buffer(&bytes).unwrap();
        assert!(matches!(decoder.try_parse_one(), ParseOutcome::Success(_)));
    }

    #[test]
    fn test_frames_across_ring_wrap() {
        let mut decoder = FrameDecoder::with_capacity(64);
        let bytes = frame(1, r#"{"subCommand":1,"data":{"pad":"xxxxxxxx"}}"#);
        assert!(bytes.len() < 64);

        for _ in 0..10 {
            decoder.write_buffer(&bytes).unwrap();
            let (commands, others) = drain(&mut decoder);
            assert_eq!(commands.len(), 1);
            assert!(others.is_empty());
        }
    }

    #[test]
    fn test_tiny_capacity_still_holds_minimal_frame() {
        let mut decoder = FrameDecoder::with_capacity(2);
        assert_eq!(decoder.available(), MIN_FRAME_LEN);

        decoder.write_buffer(&build_frame(4, b"").unwrap()).unwrap();
        assert!(!matches!(decoder.try_parse_one(), ParseOutcome::Incomplete));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut decoder = FrameDecoder::new();
        decoder.write_buffer(&frame(1, r#"{"subCommand":1}"#)).unwrap();
        let _ = drain(&mut decoder);
        decoder.write_buffer(&[0x3A, 0x3B, 0, 2]).unwrap();

        decoder.reset();
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.last_sequence(), None);
    }
}
