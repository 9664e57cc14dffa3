//! Async byte-stream pumps between a transport and a [`Link`].
//!
//! Any `AsyncRead`/`AsyncWrite` pair works: a serial device opened as a
//! file, a TCP stream, stdio, or `tokio::io::duplex` in tests.
//!
//! - [`read_loop`] reads chunks and feeds them to the link
//! - [`spawn_writer_task`] drains encoded frames and writes them in batches
//!   with scatter/gather I/O

use std::io::IoSlice;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::error::{Result, StationError};
use crate::link::Link;

/// Maximum frames per vectored write.
const MAX_BATCH_SIZE: usize = 64;

/// Read from `reader` until EOF, feeding every chunk to `link`.
///
/// Returns `Ok(())` on EOF or once the link's command queue is closed.
///
/// With `OverflowPolicy::Block`, a full command queue blocks the calling
/// runtime thread inside `feed`.
pub async fn read_loop<R>(mut reader: R, link: Arc<Link>, read_buffer_size: usize) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; read_buffer_size.max(1)];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("Transport closed by peer");
                return Ok(());
            }
            Ok(n) => n,
            Err(e) => return Err(StationError::Io(e)),
        };

        match link.feed(&buf[..n]) {
            Ok(queued) if queued > 0 => tracing::trace!("Queued {} commands", queued),
            Ok(_) => {}
            Err(StationError::QueueClosed) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

/// Spawn the writer task.
///
/// The task ends with `Ok(())` after [`Link::close`] once the backlog is
/// written, or with the first I/O error.
pub fn spawn_writer_task<W>(writer: W, link: Arc<Link>) -> JoinHandle<Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(writer_loop(writer, link))
}

async fn writer_loop<W>(mut writer: W, link: Arc<Link>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match link.next_outbound().await {
            Some(frame) => frame,
            None => return Ok(()),
        };

        // collect whatever else is already encoded
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match link.drain() {
                Some(frame) => batch.push(frame),
                None => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
        tracing::trace!("Wrote {} frames", batch.len());
    }
}

/// Write a batch of frames with `write_vectored`, resuming after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(Bytes::len).sum();
    if total_size == 0 {
        return Ok(());
    }

    let mut total_written = 0;
    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(StationError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlice array covering everything after the first `skip_bytes` bytes.
fn build_remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut frame_start = 0;

    for frame in batch {
        let frame_end = frame_start + frame.len();
        if skip_bytes < frame_end && !frame.is_empty() {
            let start_in_frame = skip_bytes.saturating_sub(frame_start);
            slices.push(IoSlice::new(&frame[start_in_frame..]));
        }
        frame_start = frame_end;
    }

    slices
}
