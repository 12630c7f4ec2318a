//! Connection: one transport, many endpoints.
//!
//! The connection owns the transport handle, runs the read loop that
//! decodes every verified frame into a typed message, and fans the result
//! out to the endpoints registered on it. Outbound packets from device
//! handles go straight to the transport's writer channel, so writes stay
//! serialized.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::endpoint::Endpoint;
use crate::message::{decode_frame, Message};
use crate::protocol::MessageHeader;
use crate::transport::TransportHandle;

/// Receiver of decoded packets.
///
/// Sinks are invoked synchronously on the connection's reader task (or, for
/// output sniffers, on the sender's task) and must hand any real work off
/// to their own executor.
pub trait PacketSink: Send + Sync {
    fn deliver(&self, header: &MessageHeader, message: &Message);
}

/// A running connection over one transport.
pub struct Connection {
    endpoints: Arc<Mutex<Vec<Arc<Endpoint>>>>,
    writer: mpsc::UnboundedSender<Bytes>,
    closed: watch::Receiver<bool>,
}

impl Connection {
    /// Take ownership of `transport` and start the read loop.
    pub fn new(mut transport: TransportHandle) -> Self {
        let endpoints: Arc<Mutex<Vec<Arc<Endpoint>>>> = Arc::new(Mutex::new(Vec::new()));
        let writer = transport.raw_sender();
        let (closed_tx, closed) = watch::channel(false);

        let reader_endpoints = endpoints.clone();
        tokio::spawn(async move {
            while let Some(frame) = transport.read().await {
                let (header, message) = match decode_frame(&frame) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        tracing::debug!(%err, "dropping undecodable frame");
                        continue;
                    }
                };
                let subscribers: Vec<Arc<Endpoint>> = reader_endpoints
                    .lock()
                    .expect("endpoint list poisoned")
                    .clone();
                for endpoint in subscribers {
                    endpoint.dispatch(&header, &message);
                }
            }
            tracing::debug!("connection reader finished, closing observers");
            let _ = closed_tx.send(true);
        });

        Self {
            endpoints,
            writer,
            closed,
        }
    }

    /// Register this process under `(subnet, device, device_type)` and get
    /// the endpoint handle for it.
    pub fn make_endpoint(&self, subnet_id: u8, device_id: u8, device_type: u16) -> Arc<Endpoint> {
        let endpoint = Arc::new(Endpoint::new(
            subnet_id,
            device_id,
            device_type,
            self.writer.clone(),
        ));
        self.endpoints
            .lock()
            .expect("endpoint list poisoned")
            .push(endpoint.clone());
        endpoint
    }

    /// Watch channel flipping to `true` when the transport closes.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }
}
