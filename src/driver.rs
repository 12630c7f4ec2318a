//! Bridge driver: transport connector, UDP gateway wiring and the
//! single-writer event loop.
//!
//! The loop owns the [`ModelDispatcher`] and is the only place device
//! models run, so every broker-visible state transition is totally
//! ordered. Inbound packets, broker writes and poll ticks all enter as
//! events on one channel.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;

use crate::connection::{Connection, PacketSink};
use crate::dump::MessageDumper;
use crate::error::{BridgeError, Result};
use crate::message::Message;
use crate::model::{ControlObserver, DeviceRegistry, ModelDispatcher};
use crate::protocol::MessageHeader;
use crate::queue::{tokio_timer_factory, MessageQueue, TimerFactory};
use crate::transport::{start_datagram_io, start_stream_io, TransportHandle};

/// Default bus identity of the bridge process.
pub const DRIVER_SUBNET: u8 = 0x01;
pub const DRIVER_DEVICE_ID: u8 = 0x99;
pub const DRIVER_DEVICE_TYPE: u16 = 0x1234;

/// Request queue parameters used in production.
pub const REQUEST_QUEUE_SIZE: usize = 16;
pub const REQUEST_NUM_RETRIES: u32 = 10;
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

const GATEWAY_TAP_SIZE: usize = 32;

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Transport address: an absolute serial device path, `udp`,
    /// `tcp://host:port` or a bare `host:port`.
    pub address: String,
    /// Forward raw frames between the serial side and UDP port 6000.
    pub udp_gateway: bool,
    pub subnet_id: u8,
    pub device_id: u8,
    pub device_type: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            address: "/dev/ttyNSC1".to_string(),
            udp_gateway: false,
            subnet_id: DRIVER_SUBNET,
            device_id: DRIVER_DEVICE_ID,
            device_type: DRIVER_DEVICE_TYPE,
        }
    }
}

/// Open the transport described by `address`.
///
/// An absolute path opens a serial port at 9600 8E2; the literal `udp`
/// runs without a serial side; `tcp://host:port` and bare `host:port`
/// dial TCP. With `udp_gateway`, a stream transport is paired with the
/// datagram transport and raw frames are forwarded both ways verbatim.
pub async fn connect(address: &str, udp_gateway: bool) -> Result<TransportHandle> {
    if address == "udp" {
        if udp_gateway {
            return Err(BridgeError::Config(
                "cannot provide a UDP gateway in direct udp mode".into(),
            ));
        }
        return start_datagram_io(None).await;
    }
    if address.starts_with('/') {
        let port = tokio_serial::new(address, 9600)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::Even)
            .stop_bits(tokio_serial::StopBits::Two)
            .open_native_async()?;
        return with_gateway(port, udp_gateway).await;
    }
    let target = address.strip_prefix("tcp://").unwrap_or(address);
    if target.is_empty() {
        return Err(BridgeError::Address(address.to_string()));
    }
    let stream = TcpStream::connect(target).await?;
    with_gateway(stream, udp_gateway).await
}

async fn with_gateway<S>(stream: S, udp_gateway: bool) -> Result<TransportHandle>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    if !udp_gateway {
        return Ok(start_stream_io(stream, None));
    }
    tracing::debug!("using UDP gateway mode");
    let (stream_tap_tx, mut stream_tap_rx) = mpsc::channel::<Bytes>(GATEWAY_TAP_SIZE);
    let (dgram_tap_tx, mut dgram_tap_rx) = mpsc::channel::<Bytes>(GATEWAY_TAP_SIZE);
    let stream_io = start_stream_io(stream, Some(stream_tap_tx));
    let dgram_io = start_datagram_io(Some(dgram_tap_tx)).await?;

    let to_stream = stream_io.raw_sender();
    tokio::spawn(async move {
        while let Some(frame) = dgram_tap_rx.recv().await {
            if to_stream.send(frame).is_err() {
                break;
            }
        }
    });
    let to_dgram = dgram_io.raw_sender();
    tokio::spawn(async move {
        while let Some(frame) = stream_tap_rx.recv().await {
            if to_dgram.send(frame).is_err() {
                break;
            }
        }
    });

    Ok(stream_io)
}

enum DriverEvent {
    /// Run a closure on the single-writer loop.
    Sync(Box<dyn FnOnce(&mut ModelDispatcher) + Send>),
    ControlWrite {
        device: String,
        control: String,
        value: String,
    },
    Poll,
    Quit,
}

/// Clonable entry point into the driver loop.
#[derive(Clone)]
pub struct DriverHandle {
    events: mpsc::UnboundedSender<DriverEvent>,
}

impl DriverHandle {
    /// Run `f` on the driver's single-writer task.
    pub fn call_sync(&self, f: impl FnOnce(&mut ModelDispatcher) + Send + 'static) {
        let _ = self.events.send(DriverEvent::Sync(Box::new(f)));
    }

    /// Deliver a broker write to the owning device model.
    pub fn write_control(&self, device: &str, control: &str, value: &str) {
        let _ = self.events.send(DriverEvent::ControlWrite {
            device: device.to_string(),
            control: control.to_string(),
            value: value.to_string(),
        });
    }

    /// Trigger one poll tick across all device models.
    pub fn poll(&self) {
        let _ = self.events.send(DriverEvent::Poll);
    }

    fn quit(&self) {
        let _ = self.events.send(DriverEvent::Quit);
    }
}

/// Endpoint observer feeding packets into the driver loop.
struct DispatchSink {
    handle: DriverHandle,
}

impl PacketSink for DispatchSink {
    fn deliver(&self, header: &MessageHeader, message: &Message) {
        let header = *header;
        let message = message.clone();
        self.handle
            .call_sync(move |dispatcher| dispatcher.handle_packet(&header, &message));
    }
}

/// A running bridge.
pub struct Bridge {
    handle: DriverHandle,
    queue: std::sync::Arc<MessageQueue>,
    task: JoinHandle<Result<()>>,
}

impl Bridge {
    /// Connect to `config.address` and start the bridge with the
    /// production timer factory.
    pub async fn start(config: BridgeConfig, observer: Box<dyn ControlObserver>) -> Result<Self> {
        let transport = connect(&config.address, config.udp_gateway).await?;
        Self::start_with_transport(transport, config, observer, Some(tokio_timer_factory())).await
    }

    /// Start the bridge over an already-open transport.
    pub async fn start_with_transport(
        transport: TransportHandle,
        config: BridgeConfig,
        observer: Box<dyn ControlObserver>,
        timer_factory: Option<TimerFactory>,
    ) -> Result<Self> {
        let connection = Connection::new(transport);
        let endpoint =
            connection.make_endpoint(config.subnet_id, config.device_id, config.device_type);
        let queue = std::sync::Arc::new(MessageQueue::new(
            timer_factory,
            REQUEST_TIMEOUT,
            REQUEST_NUM_RETRIES,
            REQUEST_QUEUE_SIZE,
        ));

        let mut dispatcher = ModelDispatcher::new(
            DeviceRegistry::with_default_models(),
            endpoint.clone(),
            queue.clone(),
            observer,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = DriverHandle { events: events_tx };

        endpoint.observe(DispatchSink {
            handle: handle.clone(),
        });
        endpoint.observe(MessageDumper::new("message for us"));
        endpoint.add_input_sniffer(MessageDumper::new("not for us"));
        endpoint.add_output_sniffer(MessageDumper::new("outgoing"));

        dispatcher.announce_local_devices();
        queue.start().await;
        // Ask every device on the bus to identify itself.
        endpoint.broadcast_device().read_mac_address()?;

        let closed = connection.closed();
        let task = tokio::spawn(run_loop(dispatcher, events_rx, closed));

        Ok(Self {
            handle,
            queue,
            task,
        })
    }

    /// Clonable handle for broker writes and poll ticks.
    pub fn handle(&self) -> DriverHandle {
        self.handle.clone()
    }

    /// Run until the transport closes. Transport closure is an error; a
    /// process-level supervisor is expected to restart the driver.
    pub async fn run(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(%err, "driver loop panicked");
                Err(BridgeError::TransportClosed)
            }
        }
    }

    /// Orderly shutdown: stop the request queue and the driver loop.
    pub async fn stop(self) {
        self.queue.stop().await;
        self.handle.quit();
        let _ = self.task.await;
    }
}

async fn run_loop(
    mut dispatcher: ModelDispatcher,
    mut events: mpsc::UnboundedReceiver<DriverEvent>,
    mut closed: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(DriverEvent::Sync(f)) => f(&mut dispatcher),
                Some(DriverEvent::ControlWrite { device, control, value }) => {
                    dispatcher.accept_control_write(&device, &control, &value);
                }
                Some(DriverEvent::Poll) => dispatcher.poll(),
                Some(DriverEvent::Quit) | None => return Ok(()),
            },
            result = closed.changed() => {
                let _ = result;
                return Err(BridgeError::TransportClosed);
            }
        }
    }
}
