//! Bus endpoints and per-remote-device handles.
//!
//! An [`Endpoint`] is this process's identity on the bus. Inbound packets
//! addressed to the endpoint (or broadcast) go to its observers; everything
//! else goes to the input sniffers. Outbound packets built through a
//! [`DeviceHandle`] pass the output sniffers before serialization, so a
//! formatter can log exactly what hits the wire.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::connection::PacketSink;
use crate::error::Result;
use crate::message::{
    encode_frame, AssignPanelButton, AssignPanelButtonResponse, ButtonMode, Message,
    QueryPanelButtonAssignment, QueryPanelButtonAssignmentResponse, ReadMacAddressResponse,
    ReadTemperatureValues, ReadTemperatureValuesResponse, SetPanelButtonModes,
    SetPanelButtonModesResponse, SingleChannelControl, SingleChannelControlResponse,
    ZoneBeastBroadcast, PANEL_BUTTON_COUNT,
};
use crate::protocol::{MessageHeader, BROADCAST_DEVICE, BROADCAST_SUBNET};

/// This process's identity on the bus.
pub struct Endpoint {
    subnet_id: u8,
    device_id: u8,
    device_type: u16,
    observers: Mutex<Vec<Box<dyn PacketSink>>>,
    input_sniffers: Mutex<Vec<Box<dyn PacketSink>>>,
    output_sniffers: Mutex<Vec<Box<dyn PacketSink>>>,
    writer: mpsc::UnboundedSender<Bytes>,
}

impl Endpoint {
    pub(crate) fn new(
        subnet_id: u8,
        device_id: u8,
        device_type: u16,
        writer: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self {
            subnet_id,
            device_id,
            device_type,
            observers: Mutex::new(Vec::new()),
            input_sniffers: Mutex::new(Vec::new()),
            output_sniffers: Mutex::new(Vec::new()),
            writer,
        }
    }

    pub fn subnet_id(&self) -> u8 {
        self.subnet_id
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn device_type(&self) -> u16 {
        self.device_type
    }

    /// Subscribe to packets addressed to this endpoint or broadcast.
    pub fn observe(&self, sink: impl PacketSink + 'static) {
        self.observers.lock().expect("observers poisoned").push(Box::new(sink));
    }

    /// Subscribe to packets addressed to other devices.
    pub fn add_input_sniffer(&self, sink: impl PacketSink + 'static) {
        self.input_sniffers
            .lock()
            .expect("input sniffers poisoned")
            .push(Box::new(sink));
    }

    /// Subscribe to every packet this endpoint sends.
    pub fn add_output_sniffer(&self, sink: impl PacketSink + 'static) {
        self.output_sniffers
            .lock()
            .expect("output sniffers poisoned")
            .push(Box::new(sink));
    }

    /// Route one inbound packet per the addressing rules.
    pub(crate) fn dispatch(&self, header: &MessageHeader, message: &Message) {
        let for_us = header.is_broadcast()
            || (header.target_subnet_id == self.subnet_id
                && header.target_device_id == self.device_id);
        let sinks = if for_us {
            &self.observers
        } else {
            &self.input_sniffers
        };
        for sink in sinks.lock().expect("sink list poisoned").iter() {
            sink.deliver(header, message);
        }
    }

    /// Handle for a specific remote device.
    pub fn device(self: &Arc<Self>, subnet_id: u8, device_id: u8) -> DeviceHandle {
        DeviceHandle {
            endpoint: self.clone(),
            subnet_id,
            device_id,
        }
    }

    /// Handle addressing every device on the bus.
    pub fn broadcast_device(self: &Arc<Self>) -> DeviceHandle {
        self.device(BROADCAST_SUBNET, BROADCAST_DEVICE)
    }

    fn send(&self, target: (u8, u8), message: &Message) -> Result<()> {
        let header = MessageHeader::new((self.subnet_id, self.device_id, self.device_type), target);
        let frame = encode_frame(&header, message)?;
        for sink in self
            .output_sniffers
            .lock()
            .expect("output sniffers poisoned")
            .iter()
        {
            sink.deliver(&header, message);
        }
        self.writer
            .send(frame.to_bytes())
            .map_err(|_| crate::error::BridgeError::TransportClosed)
    }
}

/// Command surface of one remote device, with this endpoint as origin.
///
/// Cheap to clone; device models and queue thunks keep copies.
#[derive(Clone)]
pub struct DeviceHandle {
    endpoint: Arc<Endpoint>,
    subnet_id: u8,
    device_id: u8,
}

impl DeviceHandle {
    /// Target subnet of this handle.
    pub fn subnet_id(&self) -> u8 {
        self.subnet_id
    }

    /// Target device id of this handle.
    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    /// Compose and send an arbitrary message to this device.
    pub fn send(&self, message: &Message) -> Result<()> {
        self.endpoint.send((self.subnet_id, self.device_id), message)
    }

    pub fn single_channel_control(&self, channel_no: u8, level: u8, duration: u16) -> Result<()> {
        self.send(&Message::SingleChannelControl(SingleChannelControl {
            channel_no,
            level,
            duration,
        }))
    }

    pub fn single_channel_control_response(
        &self,
        channel_no: u8,
        success: bool,
        level: u8,
        channel_status: Vec<bool>,
    ) -> Result<()> {
        self.send(&Message::SingleChannelControlResponse(
            SingleChannelControlResponse {
                channel_no,
                success,
                level,
                channel_status,
            },
        ))
    }

    pub fn zone_beast_broadcast(
        &self,
        zone_status: Vec<u8>,
        channel_status: Vec<bool>,
    ) -> Result<()> {
        self.send(&Message::ZoneBeastBroadcast(ZoneBeastBroadcast {
            zone_status,
            channel_status,
        }))
    }

    pub fn query_modules(&self) -> Result<()> {
        self.send(&Message::QueryModules)
    }

    pub fn query_panel_button_assignment(&self, button_no: u8, function_no: u8) -> Result<()> {
        self.send(&Message::QueryPanelButtonAssignment(
            QueryPanelButtonAssignment {
                button_no,
                function_no,
            },
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn query_panel_button_assignment_response(
        &self,
        button_no: u8,
        function_no: u8,
        command: u8,
        command_subnet_id: u8,
        command_device_id: u8,
        channel_no: u8,
        level: u8,
        duration: u16,
    ) -> Result<()> {
        self.send(&Message::QueryPanelButtonAssignmentResponse(
            QueryPanelButtonAssignmentResponse {
                button_no,
                function_no,
                command,
                command_subnet_id,
                command_device_id,
                channel_no,
                level,
                duration,
            },
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn assign_panel_button(
        &self,
        button_no: u8,
        function_no: u8,
        command: u8,
        command_subnet_id: u8,
        command_device_id: u8,
        channel_no: u8,
        level: u8,
        duration: u16,
    ) -> Result<()> {
        self.send(&Message::AssignPanelButton(AssignPanelButton {
            button_no,
            function_no,
            command,
            command_subnet_id,
            command_device_id,
            channel_no,
            level,
            duration,
            reserved: 0,
        }))
    }

    pub fn assign_panel_button_response(&self, button_no: u8, function_no: u8) -> Result<()> {
        self.send(&Message::AssignPanelButtonResponse(
            AssignPanelButtonResponse {
                button_no,
                function_no,
            },
        ))
    }

    pub fn set_panel_button_modes(&self, modes: [ButtonMode; PANEL_BUTTON_COUNT]) -> Result<()> {
        self.send(&Message::SetPanelButtonModes(SetPanelButtonModes { modes }))
    }

    pub fn set_panel_button_modes_response(&self, success: bool) -> Result<()> {
        self.send(&Message::SetPanelButtonModesResponse(
            SetPanelButtonModesResponse { success },
        ))
    }

    pub fn read_mac_address(&self) -> Result<()> {
        self.send(&Message::ReadMacAddress)
    }

    pub fn read_mac_address_response(&self, mac: [u8; 8], remark: Vec<u8>) -> Result<()> {
        self.send(&Message::ReadMacAddressResponse(ReadMacAddressResponse {
            mac,
            remark,
        }))
    }

    pub fn read_temperature_values(&self, celsius: bool) -> Result<()> {
        self.send(&Message::ReadTemperatureValues(ReadTemperatureValues {
            celsius,
        }))
    }

    pub fn read_temperature_values_response(&self, celsius: bool, values: Vec<i8>) -> Result<()> {
        self.send(&Message::ReadTemperatureValuesResponse(
            ReadTemperatureValuesResponse { celsius, values },
        ))
    }
}
