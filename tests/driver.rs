//! End-to-end driver tests.
//!
//! Both sides of the bus are simulated over an in-memory duplex stream:
//! the bridge runs on one end, and test endpoints acting as a DDP panel or
//! a zone beast controller sit on the other. A recording observer stands
//! in for the broker client, and an injected fake-timer factory makes the
//! request queue deterministic where a test needs it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use smartbus_bridge::connection::{Connection, PacketSink};
use smartbus_bridge::dump::format_message;
use smartbus_bridge::endpoint::DeviceHandle;
use smartbus_bridge::message::{
    parse_channel_status, Message, BUTTON_COMMAND_INVALID,
    BUTTON_COMMAND_SINGLE_CHANNEL_LIGHTING, LIGHT_LEVEL_OFF, LIGHT_LEVEL_ON, PANEL_BUTTON_COUNT,
};
use smartbus_bridge::model::{
    Control, ControlObserver, DeviceInfo, DDP_DEVICE_TYPE, NUM_VIRTUAL_RELAYS,
    ZONE_BEAST_DEVICE_TYPE,
};
use smartbus_bridge::protocol::MessageHeader;
use smartbus_bridge::queue::{QueueTimer, TimerFactory};
use smartbus_bridge::transport::start_stream_io;
use smartbus_bridge::{Bridge, BridgeConfig};

const APP_SUBNET: u8 = 0x03;
const APP_DEVICE: u8 = 0xFE;
const APP_DEVICE_TYPE: u16 = 0xFFFE;
const SAMPLE_SUBNET: u8 = 0x01;
const DDP_DEVICE: u8 = 0x14;
const RELAY_DEVICE: u8 = 0x1C;

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    fn record(&self, line: impl Into<String>) {
        self.0.lock().unwrap().push(line.into());
    }

    async fn take(&self, n: usize) -> Vec<String> {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            {
                let mut lines = self.0.lock().unwrap();
                if lines.len() >= n {
                    return lines.drain(..n).collect();
                }
                if std::time::Instant::now() >= deadline {
                    panic!("timed out waiting for {} records, have {:?}", n, *lines);
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn verify<S: AsRef<str>>(&self, expected: &[S]) {
        let got = self.take(expected.len()).await;
        let want: Vec<&str> = expected.iter().map(|s| s.as_ref()).collect();
        assert_eq!(got, want);
    }

    async fn verify_unordered<S: AsRef<str>>(&self, expected: &[S]) {
        let mut got = self.take(expected.len()).await;
        let mut want: Vec<String> = expected.iter().map(|s| s.as_ref().to_string()).collect();
        got.sort();
        want.sort();
        assert_eq!(got, want);
    }

    async fn verify_empty(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let lines = self.0.lock().unwrap();
        assert!(lines.is_empty(), "unexpected records: {:?}", *lines);
    }
}

/// Broker-side observer recording every call.
struct RecordingObserver(Recorder);

impl ControlObserver for RecordingObserver {
    fn on_new_device(&mut self, device: &DeviceInfo) {
        self.0.record(format!("device: {} [{}]", device.name, device.title));
    }

    fn on_new_control(&mut self, device: &DeviceInfo, control: &Control) {
        let readonly = if control.readonly { " readonly" } else { "" };
        self.0.record(format!(
            "new: {}/{} [{}] = {}{}",
            device.name, control.name, control.kind, control.value, readonly
        ));
    }

    fn on_value(&mut self, device: &DeviceInfo, control: &str, value: &str) {
        self.0.record(format!("value: {}/{} = {}", device.name, control, value));
    }
}

/// Bus-side sink recording formatted packets seen by a test endpoint.
#[derive(Clone)]
struct BusSink(Recorder);

impl PacketSink for BusSink {
    fn deliver(&self, header: &MessageHeader, message: &Message) {
        self.0.record(format_message(header, message));
    }
}

#[derive(Clone)]
struct FakeTimers {
    rec: Recorder,
    armed: Arc<Mutex<HashMap<usize, oneshot::Sender<()>>>>,
    next_id: Arc<AtomicUsize>,
}

impl FakeTimers {
    fn new(rec: Recorder) -> Self {
        Self {
            rec,
            armed: Arc::default(),
            next_id: Arc::new(AtomicUsize::new(1)),
        }
    }

    fn factory(&self) -> TimerFactory {
        let fixture = self.clone();
        Arc::new(move |timeout| {
            let id = fixture.next_id.fetch_add(1, Ordering::SeqCst);
            let (fire_tx, fire_rx) = oneshot::channel();
            fixture.armed.lock().unwrap().insert(id, fire_tx);
            fixture
                .rec
                .record(format!("timer {} armed ({} ms)", id, timeout.as_millis()));
            let rec = fixture.rec.clone();
            QueueTimer::new(
                async move {
                    if fire_rx.await.is_err() {
                        std::future::pending::<()>().await;
                    }
                },
                move || rec.record(format!("timer {id} stopped")),
            )
        })
    }

    fn fire(&self, id: usize) {
        let fire_tx = self
            .armed
            .lock()
            .unwrap()
            .remove(&id)
            .expect("firing a timer that is not armed");
        self.rec.record(format!("timer {id} fired"));
        fire_tx.send(()).unwrap();
    }
}

struct Harness {
    obs: Recorder,
    handler: Recorder,
    timers: Option<FakeTimers>,
    bridge: Bridge,
    _conn: Connection,
}

/// Wire the bridge to a simulated remote device endpoint and verify the
/// startup announcements (virtual relays, discovery broadcast).
async fn start_harness(
    use_timer: bool,
    remote_device_id: u8,
    remote_device_type: u16,
) -> (Harness, DeviceHandle, DeviceHandle) {
    let (bridge_side, test_side) = tokio::io::duplex(4096);

    let obs = Recorder::default();
    let handler = Recorder::default();

    // The test side must be listening before the bridge starts, or the
    // discovery broadcast would be lost.
    let conn = Connection::new(start_stream_io(test_side, None));
    let remote_ep = conn.make_endpoint(SAMPLE_SUBNET, remote_device_id, remote_device_type);
    remote_ep.observe(BusSink(handler.clone()));
    let to_app = remote_ep.device(APP_SUBNET, APP_DEVICE);
    let to_all = remote_ep.broadcast_device();

    let timers = use_timer.then(|| FakeTimers::new(obs.clone()));
    let config = BridgeConfig {
        address: "duplex".to_string(),
        udp_gateway: false,
        subnet_id: APP_SUBNET,
        device_id: APP_DEVICE,
        device_type: APP_DEVICE_TYPE,
    };
    let bridge = Bridge::start_with_transport(
        start_stream_io(bridge_side, None),
        config,
        Box::new(RecordingObserver(obs.clone())),
        timers.as_ref().map(|fixture| fixture.factory()),
    )
    .await
    .expect("bridge failed to start");

    // Startup: the virtual relay device and its switches are announced.
    let mut expected = vec!["device: sbusvrelay [Smartbus Virtual Relays]".to_string()];
    for i in 1..=NUM_VIRTUAL_RELAYS {
        expected.push(format!("new: sbusvrelay/VirtualRelay{i} [switch] = 0 readonly"));
    }
    obs.verify(&expected).await;

    // Startup: devices are asked to identify themselves.
    handler
        .verify(&["03/fe (type fffe) -> ff/ff: ReadMACAddress"])
        .await;

    (
        Harness {
            obs,
            handler,
            timers,
            bridge,
            _conn: conn,
        },
        to_app,
        to_all,
    )
}

fn ddp_control_name(button_no: usize) -> String {
    format!("Page{}Button{}", (button_no - 1) / 4 + 1, (button_no - 1) % 4 + 1)
}

/// Discovery plus the full button walk of a DDP panel. Buttons 1..=10
/// come back unassigned; buttons 11..=15 point at virtual relays 1..=5.
async fn run_ddp_discovery(h: &Harness, ddp_to_app: &DeviceHandle, use_timer: bool) {
    ddp_to_app
        .read_mac_address_response([0x53, 0x03, 0, 0, 0, 0, 0x30, 0xC3], vec![0x20, 0x42, 0x42])
        .unwrap();
    h.obs.verify(&["device: ddp0114 [DDP 01:14]"]).await;

    for i in 1..=PANEL_BUTTON_COUNT {
        h.handler
            .verify(&[format!(
                "03/fe (type fffe) -> 01/14: QueryPanelButtonAssignment button={i} function=1"
            )])
            .await;
        if use_timer {
            h.obs.verify(&[format!("timer {i} armed (1000 ms)")]).await;
        }

        let assignment: i32 = if i <= 10 { -1 } else { (i - 10) as i32 };
        if assignment < 0 {
            ddp_to_app
                .query_panel_button_assignment_response(
                    i as u8,
                    1,
                    BUTTON_COMMAND_INVALID,
                    0,
                    0,
                    0,
                    0,
                    0,
                )
                .unwrap();
        } else {
            ddp_to_app
                .query_panel_button_assignment_response(
                    i as u8,
                    1,
                    BUTTON_COMMAND_SINGLE_CHANNEL_LIGHTING,
                    APP_SUBNET,
                    APP_DEVICE,
                    assignment as u8,
                    100,
                    0,
                )
                .unwrap();
        }

        let new_control = format!("new: ddp0114/{} [text] = {}", ddp_control_name(i), assignment);
        if use_timer {
            h.obs
                .verify_unordered(&[format!("timer {i} stopped"), new_control])
                .await;
        } else {
            h.obs.verify(&[new_control]).await;
        }
    }
}

const SET_MODES_FOR_BUTTON_2: &str = "03/fe (type fffe) -> 01/14: SetPanelButtonModes \
     1/1:Invalid,1/2:SingleOnOff,1/3:Invalid,1/4:Invalid,\
     2/1:Invalid,2/2:Invalid,2/3:Invalid,2/4:Invalid,\
     3/1:Invalid,3/2:Invalid,3/3:SingleOnOff,3/4:SingleOnOff,\
     4/1:SingleOnOff,4/2:SingleOnOff,4/3:SingleOnOff";

#[tokio::test]
async fn test_ddp_discovery_assignment_and_virtual_relays() {
    let (h, ddp_to_app, _to_all) = start_harness(false, DDP_DEVICE, DDP_DEVICE_TYPE).await;
    run_ddp_discovery(&h, &ddp_to_app, false).await;

    // A repeated module query after the walk does nothing.
    ddp_to_app.query_modules().unwrap();
    h.handler.verify_empty().await;
    h.obs.verify_empty().await;

    // Broker write: point Page1Button2 at virtual relay 10. The panel is
    // first told the full mode vector, then the assignment.
    h.bridge
        .handle()
        .write_control("ddp0114", "Page1Button2", "10");
    h.handler.verify(&[SET_MODES_FOR_BUTTON_2]).await;

    ddp_to_app.set_panel_button_modes_response(true).unwrap();
    h.handler
        .verify(&["03/fe (type fffe) -> 01/14: AssignPanelButton button=2 function=1 \
                   command=59 target=03/fe channel=10 level=100 duration=0"])
        .await;

    ddp_to_app.assign_panel_button_response(2, 1).unwrap();
    // The canonical value is echoed only after the device confirmed.
    h.obs.verify(&["value: ddp0114/Page1Button2 = 10"]).await;

    // Panel presses drive the virtual relays; the response carries the
    // post-command relay bitmap.
    ddp_to_app
        .single_channel_control(10, LIGHT_LEVEL_ON, 0)
        .unwrap();
    h.handler
        .verify(&["03/fe (type fffe) -> 01/14: SingleChannelControlResponse \
                   channel=10 ok=true level=100 status=---------x-----"])
        .await;
    h.obs.verify(&["value: sbusvrelay/VirtualRelay10 = 1"]).await;

    ddp_to_app
        .single_channel_control(12, LIGHT_LEVEL_ON, 0)
        .unwrap();
    h.handler
        .verify(&["03/fe (type fffe) -> 01/14: SingleChannelControlResponse \
                   channel=12 ok=true level=100 status=---------x-x---"])
        .await;
    h.obs.verify(&["value: sbusvrelay/VirtualRelay12 = 1"]).await;

    ddp_to_app
        .single_channel_control(12, LIGHT_LEVEL_OFF, 0)
        .unwrap();
    h.handler
        .verify(&["03/fe (type fffe) -> 01/14: SingleChannelControlResponse \
                   channel=12 ok=true level=0 status=---------x-----"])
        .await;
    h.obs.verify(&["value: sbusvrelay/VirtualRelay12 = 0"]).await;

    ddp_to_app
        .single_channel_control(10, LIGHT_LEVEL_OFF, 0)
        .unwrap();
    h.handler
        .verify(&["03/fe (type fffe) -> 01/14: SingleChannelControlResponse \
                   channel=10 ok=true level=0 status=---------------"])
        .await;
    h.obs.verify(&["value: sbusvrelay/VirtualRelay10 = 0"]).await;

    h.bridge.stop().await;
}

#[tokio::test]
async fn test_ddp_assignment_is_retried_on_timeout() {
    let (h, ddp_to_app, _to_all) = start_harness(true, DDP_DEVICE, DDP_DEVICE_TYPE).await;
    run_ddp_discovery(&h, &ddp_to_app, true).await;
    let timers = h.timers.as_ref().unwrap();

    h.bridge
        .handle()
        .write_control("ddp0114", "Page1Button2", "10");
    h.handler.verify(&[SET_MODES_FOR_BUTTON_2]).await;
    h.obs.verify(&["timer 16 armed (1000 ms)"]).await;

    // No response: the command is retried with a fresh timer.
    timers.fire(16);
    h.obs
        .verify(&["timer 16 fired", "timer 17 armed (1000 ms)"])
        .await;
    h.handler.verify(&[SET_MODES_FOR_BUTTON_2]).await;

    ddp_to_app.set_panel_button_modes_response(true).unwrap();
    h.obs.verify(&["timer 17 stopped"]).await;
    h.handler
        .verify(&["03/fe (type fffe) -> 01/14: AssignPanelButton button=2 function=1 \
                   command=59 target=03/fe channel=10 level=100 duration=0"])
        .await;
    h.obs.verify(&["timer 18 armed (1000 ms)"]).await;

    ddp_to_app.assign_panel_button_response(2, 1).unwrap();
    h.obs
        .verify_unordered(&["timer 18 stopped", "value: ddp0114/Page1Button2 = 10"])
        .await;

    h.bridge.stop().await;
}

async fn detect_zone_beast(h: &Harness, relay_to_app: &DeviceHandle) {
    relay_to_app
        .read_mac_address_response([0x53, 0x03, 0, 0, 0, 0, 0x42, 0x42], vec![])
        .unwrap();
    h.obs.verify(&["device: zonebeast011c [Zone Beast 01:1c]"]).await;
}

#[tokio::test]
async fn test_zone_beast_channels_and_temperatures() {
    let (h, relay_to_app, relay_to_all) =
        start_harness(false, RELAY_DEVICE, ZONE_BEAST_DEVICE_TYPE).await;
    detect_zone_beast(&h, &relay_to_app).await;

    // The first broadcast reveals four channels.
    relay_to_all
        .zone_beast_broadcast(vec![0], parse_channel_status("---x"))
        .unwrap();
    h.obs
        .verify(&[
            "new: zonebeast011c/Channel 1 [switch] = 0",
            "new: zonebeast011c/Channel 2 [switch] = 0",
            "new: zonebeast011c/Channel 3 [switch] = 0",
            "new: zonebeast011c/Channel 4 [switch] = 1",
        ])
        .await;

    // Later broadcasts only emit changes.
    relay_to_all
        .zone_beast_broadcast(vec![0], parse_channel_status("x---"))
        .unwrap();
    h.obs
        .verify(&[
            "value: zonebeast011c/Channel 1 = 1",
            "value: zonebeast011c/Channel 4 = 0",
        ])
        .await;

    // Broker write: the command goes to the device, the echo follows the
    // response (which carries pre-command status).
    h.bridge
        .handle()
        .write_control("zonebeast011c", "Channel 2", "1");
    h.handler
        .verify(&["03/fe (type fffe) -> 01/1c: SingleChannelControl channel=2 level=100 duration=0"])
        .await;
    relay_to_all
        .single_channel_control_response(2, true, LIGHT_LEVEL_ON, parse_channel_status("x---"))
        .unwrap();
    h.obs.verify(&["value: zonebeast011c/Channel 2 = 1"]).await;

    // The broadcast right after a control response is known stale and is
    // dropped.
    h.bridge
        .handle()
        .write_control("zonebeast011c", "Channel 1", "0");
    h.handler
        .verify(&["03/fe (type fffe) -> 01/1c: SingleChannelControl channel=1 level=0 duration=0"])
        .await;
    relay_to_all
        .single_channel_control_response(1, true, LIGHT_LEVEL_OFF, parse_channel_status("xx--"))
        .unwrap();
    relay_to_all
        .zone_beast_broadcast(vec![0], parse_channel_status("x---"))
        .unwrap();
    h.obs.verify(&["value: zonebeast011c/Channel 1 = 0"]).await;
    h.obs.verify_empty().await;

    // Poll reads temperatures directly, bypassing the queue.
    h.bridge.handle().poll();
    h.handler
        .verify(&["03/fe (type fffe) -> 01/1c: ReadTemperatureValues unit=Celsius"])
        .await;
    relay_to_all
        .read_temperature_values_response(true, vec![22])
        .unwrap();
    h.obs
        .verify(&["new: zonebeast011c/Temp 1 [temperature] = 22 readonly"])
        .await;

    h.bridge.handle().poll();
    h.handler
        .verify(&["03/fe (type fffe) -> 01/1c: ReadTemperatureValues unit=Celsius"])
        .await;
    relay_to_all
        .read_temperature_values_response(true, vec![-2])
        .unwrap();
    h.obs.verify(&["value: zonebeast011c/Temp 1 = -2"]).await;

    h.bridge.stop().await;
}

#[tokio::test]
async fn test_zone_beast_write_is_retried_on_timeout() {
    let (h, relay_to_app, relay_to_all) =
        start_harness(true, RELAY_DEVICE, ZONE_BEAST_DEVICE_TYPE).await;
    detect_zone_beast(&h, &relay_to_app).await;
    relay_to_all
        .zone_beast_broadcast(vec![0], parse_channel_status("----"))
        .unwrap();
    h.obs
        .verify(&[
            "new: zonebeast011c/Channel 1 [switch] = 0",
            "new: zonebeast011c/Channel 2 [switch] = 0",
            "new: zonebeast011c/Channel 3 [switch] = 0",
            "new: zonebeast011c/Channel 4 [switch] = 0",
        ])
        .await;
    let timers = h.timers.as_ref().unwrap();

    h.bridge
        .handle()
        .write_control("zonebeast011c", "Channel 2", "1");
    h.handler
        .verify(&["03/fe (type fffe) -> 01/1c: SingleChannelControl channel=2 level=100 duration=0"])
        .await;
    h.obs.verify(&["timer 1 armed (1000 ms)"]).await;

    timers.fire(1);
    h.obs
        .verify(&["timer 1 fired", "timer 2 armed (1000 ms)"])
        .await;
    h.handler
        .verify(&["03/fe (type fffe) -> 01/1c: SingleChannelControl channel=2 level=100 duration=0"])
        .await;

    relay_to_all
        .single_channel_control_response(2, true, LIGHT_LEVEL_ON, parse_channel_status("x---"))
        .unwrap();
    h.obs
        .verify_unordered(&["timer 2 stopped", "value: zonebeast011c/Channel 2 = 1"])
        .await;

    h.bridge.stop().await;
}

#[tokio::test]
async fn test_panel_write_rejected_before_discovery_completes() {
    let (h, ddp_to_app, _to_all) = start_harness(false, DDP_DEVICE, DDP_DEVICE_TYPE).await;

    ddp_to_app
        .read_mac_address_response([0x53, 0x03, 0, 0, 0, 0, 0x30, 0xC3], vec![])
        .unwrap();
    h.obs.verify(&["device: ddp0114 [DDP 01:14]"]).await;
    h.handler
        .verify(&["03/fe (type fffe) -> 01/14: QueryPanelButtonAssignment button=1 function=1"])
        .await;

    // Only button 1 has reported; a write must be dropped without any bus
    // traffic or echo.
    ddp_to_app
        .query_panel_button_assignment_response(1, 1, BUTTON_COMMAND_INVALID, 0, 0, 0, 0, 0)
        .unwrap();
    h.handler
        .verify(&["03/fe (type fffe) -> 01/14: QueryPanelButtonAssignment button=2 function=1"])
        .await;
    h.obs.verify(&["new: ddp0114/Page1Button1 [text] = -1"]).await;

    h.bridge
        .handle()
        .write_control("ddp0114", "Page1Button2", "10");
    h.obs.verify_empty().await;

    h.bridge.stop().await;
}

/// The gateway forwards raw frames between transports verbatim: a tap on
/// one transport feeds the raw sender of another.
#[tokio::test]
async fn test_raw_tap_forwarding_is_verbatim() {
    let (serial_a, serial_b) = tokio::io::duplex(1024);
    let (other_a, other_b) = tokio::io::duplex(1024);

    let (tap_tx, mut tap_rx) = tokio::sync::mpsc::channel(8);
    let _serial_io = start_stream_io(serial_a, Some(tap_tx));
    let other_io = start_stream_io(other_a, None);

    let to_other = other_io.raw_sender();
    tokio::spawn(async move {
        while let Some(frame) = tap_rx.recv().await {
            if to_other.send(frame).is_err() {
                break;
            }
        }
    });

    // A device on the serial side...
    let serial_conn = Connection::new(start_stream_io(serial_b, None));
    let panel = serial_conn.make_endpoint(SAMPLE_SUBNET, DDP_DEVICE, DDP_DEVICE_TYPE);
    panel.broadcast_device().read_mac_address().unwrap();

    // ...is heard verbatim on the other side of the gateway.
    let mut other_end = start_stream_io(other_b, None);
    let frame = other_end.read().await.expect("forwarded frame");
    let (header, opcode) = frame.header().unwrap();
    assert_eq!(opcode, 0xF003);
    assert_eq!(header.orig_subnet_id, SAMPLE_SUBNET);
    assert!(header.is_broadcast());
}
