//! Transport-facing adapter around the frame decoder.
//!
//! The byte transport only sees two calls: [`Link::feed`] for inbound bytes
//! and [`Link::drain`] (or the async [`Link::next_outbound`]) for encoded
//! outbound frames. Everything between is synchronous and transport-agnostic.
//!
//! The decoder and its ring sit behind one mutex held for each feed step and
//! each encode, so parsing and encoding never interleave.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::config::{OverflowPolicy, StationConfig};
use crate::error::{Result, StationError};
use crate::message::Response;
use crate::protocol::{DecoderStats, FrameDecoder, ParseOutcome};
use crate::queue::{BoundedQueue, CommandQueue};

/// Shared inbound/outbound endpoint of a station.
pub struct Link {
    decoder: Mutex<FrameDecoder>,
    commands: Arc<CommandQueue>,
    outbound: BoundedQueue<Bytes>,
    outbound_ready: Notify,
}

impl Link {
    /// Create a link that pushes decoded commands into `commands`.
    pub fn new(config: &StationConfig, commands: Arc<CommandQueue>) -> Self {
        let decoder = FrameDecoder::with_capacity(config.ring_capacity)
            .with_duplicate_policy(config.duplicate_policy)
            .with_legacy_marker(config.legacy_content_marker);

        Self {
            decoder: Mutex::new(decoder),
            commands,
            outbound: BoundedQueue::new(config.outbound_capacity, OverflowPolicy::DropOldest),
            outbound_ready: Notify::new(),
        }
    }

    fn decoder(&self) -> MutexGuard<'_, FrameDecoder> {
        self.decoder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push inbound bytes and queue every command they complete.
    ///
    /// Input larger than the ring's free space is fed in slices, parsing
    /// between slices. Commands rejected by a full queue are logged and
    /// dropped. Returns the number of commands queued.
    ///
    /// # Errors
    ///
    /// Returns `QueueClosed` once the station is shutting down.
    pub fn feed(&self, mut bytes: &[u8]) -> Result<usize> {
        let mut queued = 0;

        while !bytes.is_empty() {
            let commands = {
                let mut decoder = self.decoder();
                if decoder.available() == 0 {
                    // parsing always leaves room unless the front is stuck
                    tracing::warn!("Inbound buffer full, discarding {} bytes", decoder.buffered());
                    decoder.reset();
                }

                let take = decoder.available().min(bytes.len());
                decoder.write_buffer(&bytes[..take])?;
                bytes = &bytes[take..];

                let mut commands = Vec::new();
                loop {
                    match decoder.try_parse_one() {
                        ParseOutcome::Incomplete => break,
                        ParseOutcome::Success(command) => commands.push(command),
                        ParseOutcome::Retry(reason) => {
                            tracing::trace!("Decoder retry: {:?}", reason);
                        }
                        ParseOutcome::Error(fault) => {
                            tracing::debug!("Decoder fault: {:?}", fault);
                        }
                    }
                }
                commands
            };

            for command in commands {
                let sequence = command.sequence;
                match self.commands.push(command) {
                    Ok(Some(evicted)) => {
                        tracing::warn!(
                            "Command queue full, evicted frame {} for frame {}",
                            evicted.sequence,
                            sequence
                        );
                        queued += 1;
                    }
                    Ok(None) => queued += 1,
                    Err(StationError::QueueFull { capacity }) => {
                        tracing::warn!(
                            "Command queue full ({}), dropping frame {}",
                            capacity,
                            sequence
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(queued)
    }

    /// Pop the next encoded outbound frame, if any.
    pub fn drain(&self) -> Option<Bytes> {
        self.outbound.try_pop()
    }

    /// Wait for the next outbound frame.
    ///
    /// Returns `None` after [`close`](Self::close) once the backlog is empty.
    pub async fn next_outbound(&self) -> Option<Bytes> {
        loop {
            if let Some(frame) = self.outbound.try_pop() {
                return Some(frame);
            }
            if self.outbound.is_closed() {
                return None;
            }
            self.outbound_ready.notified().await;
        }
    }

    /// Number of encoded frames waiting for the transport.
    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    /// Encode and queue an acknowledgement echoing `sequence`.
    pub fn send_ack(&self, response: &Response, sequence: u16) -> Result<()> {
        let frame = self.decoder().encode_response(response, sequence)?;
        self.enqueue(frame)
    }

    /// Encode and queue a report under the next outbound sequence number.
    pub fn send_report(&self, response: &Response) -> Result<()> {
        let frame = self.decoder().encode_report(response)?;
        self.enqueue(frame)
    }

    /// Validate, encode and queue caller-supplied JSON content.
    pub fn send_raw(&self, content: &[u8], sequence: u16) -> Result<()> {
        let frame = self.decoder().encode_frame(content, sequence)?;
        self.enqueue(frame)
    }

    fn enqueue(&self, frame: Bytes) -> Result<()> {
        if let Some(evicted) = self.outbound.push(frame)? {
            tracing::warn!(
                "Outbound backlog full, dropped oldest frame ({} bytes)",
                evicted.len()
            );
        }
        self.outbound_ready.notify_one();
        Ok(())
    }

    /// Decoder counters.
    pub fn stats(&self) -> DecoderStats {
        self.decoder().stats()
    }

    /// Stop accepting outbound frames and wake the writer.
    pub fn close(&self) {
        self.outbound.close();
        self.outbound_ready.notify_one();
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("decoder", &*self.decoder())
            .field("outbound", &self.outbound)
            .finish()
    }
}
