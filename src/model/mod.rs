//! Device models and the dispatcher that feeds them.
//!
//! The dispatcher keeps a map from `(subnet, device)` to a concrete device
//! model, minting models on first sight of a known device type. Every model
//! handles inbound messages through a `match` over the decoded [`Message`]
//! sum type and emits broker-visible state through the [`ControlObserver`].
//! All of this runs on the driver's single-writer task, so per-device state
//! transitions are totally ordered and `on_new_control` always precedes
//! `on_value` for the same control.

mod panel;
mod virtual_relay;
mod zone_beast;

pub use panel::{DdpModel, DDP_DEVICE_TYPE};
pub use virtual_relay::VirtualRelayDevice;
pub use zone_beast::{ZoneBeastModel, ZONE_BEAST_DEVICE_TYPE};

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use crate::endpoint::{DeviceHandle, Endpoint};
use crate::message::Message;
use crate::protocol::MessageHeader;
use crate::queue::{MessageQueue, Request};

/// Number of switches exposed by the virtual relay device.
pub const NUM_VIRTUAL_RELAYS: usize = 15;

/// Control kind surfaced to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Switch,
    Text,
    Temperature,
}

impl ControlKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlKind::Switch => "switch",
            ControlKind::Text => "text",
            ControlKind::Temperature => "temperature",
        }
    }
}

impl std::fmt::Display for ControlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata of a freshly surfaced control.
#[derive(Debug, Clone)]
pub struct Control {
    pub name: String,
    pub kind: ControlKind,
    pub value: String,
    pub readonly: bool,
    /// Display order; -1 leaves ordering to the observer.
    pub order: i32,
    pub retained: bool,
}

/// Identity of a device as shown on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub title: String,
}

/// Collaborator receiving broker-visible state changes.
///
/// Called only from the driver's single-writer task.
pub trait ControlObserver: Send + 'static {
    fn on_new_device(&mut self, device: &DeviceInfo);
    fn on_new_control(&mut self, device: &DeviceInfo, control: &Control);
    fn on_value(&mut self, device: &DeviceInfo, control: &str, value: &str);
}

/// The canonical "0"/"1" rendering of a switch state.
pub fn switch_value(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}

/// What a device model may reach while handling an event.
pub struct ModelCx<'a> {
    pub observer: &'a mut dyn ControlObserver,
    pub queue: &'a MessageQueue,
    pub virtual_relays: &'a mut VirtualRelayDevice,
    /// Bus address of this process, for recognizing commands that point
    /// back at the bridge.
    pub endpoint_subnet_id: u8,
    pub endpoint_device_id: u8,
}

impl ModelCx<'_> {
    /// Enqueue a bus command awaiting `expected_opcode`; overflow is
    /// logged and the request dropped.
    pub fn enqueue_request(
        &self,
        name: &str,
        expected_opcode: u16,
        run: impl Fn() + Send + 'static,
    ) {
        if let Err(err) = self.queue.enqueue(Request::new(name, expected_opcode, run)) {
            tracing::error!(%err, request = name, "dropping bus request");
        }
    }
}

/// One mirrored bus device.
pub trait DeviceModel: Send {
    fn device_type(&self) -> u16;
    fn info(&self) -> DeviceInfo;
    /// Periodic poll tick from the external scheduler.
    fn poll(&mut self, cx: &mut ModelCx);
    /// A broker write arrived. Returns whether the write should be echoed
    /// back immediately; `false` defers the echo to the device's response.
    fn accept_on_value(&mut self, cx: &mut ModelCx, control: &str, value: &str) -> bool;
    /// Inbound bus message addressed to (or broadcast at) the bridge.
    fn handle_message(&mut self, cx: &mut ModelCx, header: &MessageHeader, message: &Message);
}

/// Constructor minting a model for one remote device.
pub type DeviceConstructor = fn(DeviceHandle) -> Box<dyn DeviceModel>;

/// Explicit map from device type to model constructor, built at startup.
pub struct DeviceRegistry {
    constructors: HashMap<u16, DeviceConstructor>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with the zone beast and DDP panel models.
    pub fn with_default_models() -> Self {
        let mut registry = Self::new();
        registry.register(ZONE_BEAST_DEVICE_TYPE, ZoneBeastModel::create);
        registry.register(DDP_DEVICE_TYPE, DdpModel::create);
        registry
    }

    pub fn register(&mut self, device_type: u16, construct: DeviceConstructor) {
        self.constructors.insert(device_type, construct);
    }

    fn get(&self, device_type: u16) -> Option<DeviceConstructor> {
        self.constructors.get(&device_type).copied()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn device_key(subnet_id: u8, device_id: u8) -> u16 {
    (u16::from(subnet_id) << 8) | u16::from(device_id)
}

/// Routes decoded messages to per-remote-device models and broker writes
/// back into them.
pub struct ModelDispatcher {
    registry: DeviceRegistry,
    devices: HashMap<u16, Box<dyn DeviceModel>>,
    endpoint: Arc<Endpoint>,
    shared: Shared,
}

/// The state a [`ModelCx`] borrows from.
struct Shared {
    observer: Box<dyn ControlObserver>,
    queue: Arc<MessageQueue>,
    virtual_relays: VirtualRelayDevice,
    endpoint_subnet_id: u8,
    endpoint_device_id: u8,
}

impl Shared {
    fn cx(&mut self) -> ModelCx<'_> {
        ModelCx {
            observer: &mut *self.observer,
            queue: &self.queue,
            virtual_relays: &mut self.virtual_relays,
            endpoint_subnet_id: self.endpoint_subnet_id,
            endpoint_device_id: self.endpoint_device_id,
        }
    }
}

impl ModelDispatcher {
    pub fn new(
        registry: DeviceRegistry,
        endpoint: Arc<Endpoint>,
        queue: Arc<MessageQueue>,
        observer: Box<dyn ControlObserver>,
    ) -> Self {
        let endpoint_subnet_id = endpoint.subnet_id();
        let endpoint_device_id = endpoint.device_id();
        Self {
            registry,
            devices: HashMap::new(),
            endpoint,
            shared: Shared {
                observer,
                queue,
                virtual_relays: VirtualRelayDevice::new(),
                endpoint_subnet_id,
                endpoint_device_id,
            },
        }
    }

    /// Announce the local virtual-relay device and its controls.
    pub fn announce_local_devices(&mut self) {
        let info = self.shared.virtual_relays.info();
        self.shared.observer.on_new_device(&info);
        self.shared
            .virtual_relays
            .publish(&mut *self.shared.observer);
    }

    /// Route one inbound packet to the model for its origin device,
    /// creating the model when the origin's device type is registered.
    pub fn handle_packet(&mut self, header: &MessageHeader, message: &Message) {
        let key = device_key(header.orig_subnet_id, header.orig_device_id);
        let model = match self.devices.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let Some(construct) = self.registry.get(header.orig_device_type) else {
                    tracing::debug!(
                        "unrecognized device type {:04x} @ {:02x}:{:02x}",
                        header.orig_device_type,
                        header.orig_subnet_id,
                        header.orig_device_id
                    );
                    return;
                };
                let handle = self
                    .endpoint
                    .device(header.orig_subnet_id, header.orig_device_id);
                let model = construct(handle);
                let info = model.info();
                tracing::debug!(name = %info.name, title = %info.title, "new device");
                self.shared.observer.on_new_device(&info);
                entry.insert(model)
            }
        };
        let mut cx = self.shared.cx();
        model.handle_message(&mut cx, header, message);
    }

    /// A broker write to `device/control` arrived. Echoes the value back
    /// immediately only when the model asks for it.
    pub fn accept_control_write(&mut self, device_name: &str, control: &str, value: &str) {
        if device_name == self.shared.virtual_relays.info().name {
            // Virtual relays are read-only.
            tracing::warn!(control, "ignoring write to a virtual relay");
            return;
        }
        let Some(model) = self
            .devices
            .values_mut()
            .find(|model| model.info().name == device_name)
        else {
            tracing::error!(device = device_name, control, "control write for unknown device");
            return;
        };
        let mut cx = self.shared.cx();
        if model.accept_on_value(&mut cx, control, value) {
            let info = model.info();
            self.shared.observer.on_value(&info, control, value);
        }
    }

    /// Fan a poll tick out to every known device model.
    pub fn poll(&mut self) {
        for model in self.devices.values_mut() {
            let mut cx = self.shared.cx();
            model.poll(&mut cx);
        }
    }

    /// Number of remote devices seen so far.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}
