//! Stream transport for serial lines, TCP sockets and in-memory pipes.
//!
//! The reader resynchronizes on the frame preamble and drops anything that
//! fails CRC validation; the writer is a dedicated task draining a channel,
//! so at most one write is in flight at any time.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::{RawTap, TransportHandle, FRAME_CHANNEL_SIZE};
use crate::protocol::FrameScanner;

const READ_BUF_SIZE: usize = 4 * 1024;

/// Spawn reader and writer tasks over `stream` and return the handle.
///
/// When `tap` is given, every raw frame read is also copied there.
pub fn start_stream_io<S>(stream: S, tap: Option<RawTap>) -> TransportHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_SIZE);
    let (writer_tx, writer_rx) = mpsc::unbounded_channel();

    tokio::spawn(read_loop(read_half, frames_tx, tap));
    tokio::spawn(write_loop(write_half, writer_rx));

    TransportHandle::new(frames_rx, writer_tx)
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    frames_tx: mpsc::Sender<crate::protocol::RawFrame>,
    mut tap: Option<RawTap>,
) {
    let mut scanner = FrameScanner::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut consumer_gone = false;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break, // EOF
            Ok(n) => n,
            Err(err) => {
                tracing::error!(%err, "stream transport read failed");
                break;
            }
        };

        for frame in scanner.push(&buf[..n]) {
            if let Some(sender) = &tap {
                if sender.send(frame.to_bytes()).await.is_err() {
                    tap = None;
                }
            }
            if !consumer_gone && frames_tx.send(frame).await.is_err() {
                // The consumer went away; keep draining for the tap.
                consumer_gone = true;
                if tap.is_none() {
                    return;
                }
            }
        }

        if consumer_gone && tap.is_none() {
            return;
        }
    }
    tracing::debug!("stream transport reader finished");
}

async fn write_loop<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(bytes) = rx.recv().await {
        if let Err(err) = writer.write_all(&bytes).await {
            tracing::error!(%err, "stream transport write failed");
            return;
        }
        if let Err(err) = writer.flush().await {
            tracing::error!(%err, "stream transport flush failed");
            return;
        }
    }
}
