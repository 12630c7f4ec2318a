//! UDP broadcast transport.
//!
//! Smartbus gateways exchange frames as UDP broadcast datagrams on port
//! 6000. Each datagram carries a fixed 16-byte header (the IPv4 address of
//! the origin plus a `SMARTCLOUD` magic) followed by one complete frame,
//! preamble and CRC included. Datagrams that fail header or CRC validation
//! are dropped silently.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::{RawTap, TransportHandle, FRAME_CHANNEL_SIZE};
use crate::error::Result;
use crate::protocol::RawFrame;

/// The well-known Smartbus UDP port.
pub const SMARTBUS_UDP_PORT: u16 = 6000;

/// Magic identifying Smartbus datagrams, bytes 4..14 of the header.
const DGRAM_MAGIC: &[u8; 10] = b"SMARTCLOUD";

/// Total datagram header length preceding the frame.
const DGRAM_HEADER_SIZE: usize = 16;

/// Synthetic origin address written into outgoing datagram headers.
const DGRAM_ORIGIN: [u8; 4] = [0, 0, 0, 0];

const RECV_BUF_SIZE: usize = 2 * 1024;

/// Bind the Smartbus UDP port and spawn the datagram reader and writer.
///
/// When `tap` is given, every raw frame received is also copied there.
pub async fn start_datagram_io(tap: Option<RawTap>) -> Result<TransportHandle> {
    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], SMARTBUS_UDP_PORT))).await?;
    socket.set_broadcast(true)?;
    let socket = Arc::new(socket);

    let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_SIZE);
    let (writer_tx, writer_rx) = mpsc::unbounded_channel();

    tokio::spawn(recv_loop(socket.clone(), frames_tx, tap));
    tokio::spawn(send_loop(socket, writer_rx));

    Ok(TransportHandle::new(frames_rx, writer_tx))
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    frames_tx: mpsc::Sender<RawFrame>,
    mut tap: Option<RawTap>,
) {
    let mut buf = vec![0u8; RECV_BUF_SIZE];
    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                tracing::error!(%err, "datagram transport receive failed");
                return;
            }
        };
        let Some(frame) = parse_datagram(&buf[..n]) else {
            tracing::trace!(%peer, len = n, "dropping malformed datagram");
            continue;
        };
        if let Some(sender) = &tap {
            if sender.send(frame.to_bytes()).await.is_err() {
                tap = None;
            }
        }
        if frames_tx.send(frame).await.is_err() && tap.is_none() {
            return;
        }
    }
}

async fn send_loop(socket: Arc<UdpSocket>, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    let target = SocketAddrV4::new(Ipv4Addr::BROADCAST, SMARTBUS_UDP_PORT);
    while let Some(frame) = rx.recv().await {
        let datagram = build_datagram(&frame);
        if let Err(err) = socket.send_to(&datagram, target).await {
            tracing::error!(%err, "datagram transport send failed");
            return;
        }
    }
}

/// Validate a received datagram and extract its frame.
fn parse_datagram(datagram: &[u8]) -> Option<RawFrame> {
    if datagram.len() <= DGRAM_HEADER_SIZE {
        return None;
    }
    if &datagram[4..14] != DGRAM_MAGIC {
        return None;
    }
    RawFrame::parse(Bytes::copy_from_slice(&datagram[DGRAM_HEADER_SIZE..])).ok()
}

/// Prefix `frame` with the deterministic synthetic origin header.
fn build_datagram(frame: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(DGRAM_HEADER_SIZE + frame.len());
    datagram.extend_from_slice(&DGRAM_ORIGIN);
    datagram.extend_from_slice(DGRAM_MAGIC);
    datagram.extend_from_slice(&[0, 0]);
    datagram.extend_from_slice(frame);
    datagram
}
