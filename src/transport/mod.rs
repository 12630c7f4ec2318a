//! Frame transports.
//!
//! A transport is a pair of tasks exchanging fully framed bytes with the
//! outside world: a reader that yields CRC-verified [`RawFrame`]s and a
//! dedicated writer fed through a channel, so writes are serialized without
//! a lock. Both transports accept an optional raw tap that receives a copy
//! of every frame read; the UDP gateway cross-wires two taps to bridge a
//! serial segment and the UDP side without re-parsing.

mod datagram;
mod stream;

pub use datagram::{start_datagram_io, SMARTBUS_UDP_PORT};
pub use stream::start_stream_io;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{BridgeError, Result};
use crate::protocol::RawFrame;

/// Capacity of the inbound frame channel of a transport.
pub(crate) const FRAME_CHANNEL_SIZE: usize = 32;

/// Copy of every raw frame a transport reads, for the gateway.
pub type RawTap = mpsc::Sender<Bytes>;

/// Handle to a running transport.
pub struct TransportHandle {
    frames: mpsc::Receiver<RawFrame>,
    writer: mpsc::UnboundedSender<Bytes>,
}

impl TransportHandle {
    pub(crate) fn new(
        frames: mpsc::Receiver<RawFrame>,
        writer: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self { frames, writer }
    }

    /// Receive the next verified frame. `None` means the transport is
    /// permanently closed.
    pub async fn read(&mut self) -> Option<RawFrame> {
        self.frames.recv().await
    }

    /// Enqueue a validated frame for writing.
    pub fn write(&self, frame: &RawFrame) -> Result<()> {
        self.send_raw(frame.to_bytes())
    }

    /// Inject fully-framed bytes without re-framing (gateway path).
    pub fn send_raw(&self, bytes: Bytes) -> Result<()> {
        self.writer
            .send(bytes)
            .map_err(|_| BridgeError::TransportClosed)
    }

    /// A clonable sender feeding this transport's writer task.
    pub fn raw_sender(&self) -> mpsc::UnboundedSender<Bytes> {
        self.writer.clone()
    }
}
