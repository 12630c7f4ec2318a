//! Payload codec: one encode/decode entry per opcode.
//!
//! Numeric conventions on the wire: multi-byte integers are big-endian;
//! channel status is a one-byte channel count followed by a little-endian
//! packed bitmap; command success is `0xF8` (anything else reads as
//! failure, devices send `0xF5`); the temperature unit flag is `0x01` for
//! Celsius.

use bytes::Bytes;

use super::{
    opcode, AssignPanelButton, AssignPanelButtonResponse, ButtonMode, Message,
    PanelControlResponse, QueryChannelStatuses, QueryChannelStatusesResponse, QueryModulesResponse,
    QueryPanelButtonAssignment, QueryPanelButtonAssignmentResponse, ReadMacAddressResponse,
    ReadSensorStatusResponse, ReadTemperatureValues, ReadTemperatureValuesResponse, SceneControl,
    SceneControlResponse, SensorStatusBroadcast, SetPanelButtonModes, SetPanelButtonModesResponse,
    SingleChannelControl, SingleChannelControlResponse, ZoneBeastBroadcast, PANEL_BUTTON_COUNT,
};
use crate::error::{BridgeError, Result};
use crate::protocol::{build_frame, MessageHeader, RawFrame};

const SUCCESS: u8 = 0xF8;
const FAILURE: u8 = 0xF5;

/// Decode a validated frame into its header and typed message.
///
/// Unknown opcodes yield [`Message::Raw`]; a short payload for a known
/// opcode is a decode error.
pub fn decode_frame(frame: &RawFrame) -> Result<(MessageHeader, Message)> {
    let (header, op) = frame.header()?;
    let mut r = Reader::new(op, frame.payload());

    let message = match op {
        opcode::SINGLE_CHANNEL_CONTROL => Message::SingleChannelControl(SingleChannelControl {
            channel_no: r.u8()?,
            level: r.u8()?,
            duration: r.u16()?,
        }),
        opcode::SINGLE_CHANNEL_CONTROL_RESPONSE => {
            Message::SingleChannelControlResponse(SingleChannelControlResponse {
                channel_no: r.u8()?,
                success: r.u8()? == SUCCESS,
                level: r.u8()?,
                channel_status: r.channel_status()?,
            })
        }
        opcode::ZONE_BEAST_BROADCAST => {
            let zone_count = r.u8()? as usize;
            Message::ZoneBeastBroadcast(ZoneBeastBroadcast {
                zone_status: r.take(zone_count)?.to_vec(),
                channel_status: r.channel_status()?,
            })
        }
        opcode::SCENE_CONTROL => Message::SceneControl(SceneControl {
            zone_no: r.u8()?,
            scene_no: r.u8()?,
        }),
        opcode::SCENE_CONTROL_RESPONSE => Message::SceneControlResponse(SceneControlResponse {
            zone_no: r.u8()?,
            scene_no: r.u8()?,
            channel_status: r.channel_status()?,
        }),
        opcode::QUERY_MODULES => Message::QueryModules,
        opcode::QUERY_MODULES_RESPONSE => Message::QueryModulesResponse(QueryModulesResponse {
            controlled_subnet_id: r.u8()?,
            controlled_device_id: r.u8()?,
            device_category: r.u8()?,
            channel_no: r.u8()?,
            hvac_subnet_id: r.u8()?,
            hvac_device_id: r.u8()?,
        }),
        opcode::PANEL_CONTROL_RESPONSE => Message::PanelControlResponse(PanelControlResponse {
            kind: r.u8()?,
            value: r.u8()?,
        }),
        opcode::QUERY_CHANNEL_STATUSES => Message::QueryChannelStatuses(QueryChannelStatuses {
            index: r.u8()?,
        }),
        opcode::QUERY_CHANNEL_STATUSES_RESPONSE => {
            Message::QueryChannelStatusesResponse(QueryChannelStatusesResponse {
                channel_status: r.channel_status()?,
            })
        }
        opcode::QUERY_PANEL_BUTTON_ASSIGNMENT => {
            Message::QueryPanelButtonAssignment(QueryPanelButtonAssignment {
                button_no: r.u8()?,
                function_no: r.u8()?,
            })
        }
        opcode::QUERY_PANEL_BUTTON_ASSIGNMENT_RESPONSE => {
            Message::QueryPanelButtonAssignmentResponse(QueryPanelButtonAssignmentResponse {
                button_no: r.u8()?,
                function_no: r.u8()?,
                command: r.u8()?,
                command_subnet_id: r.u8()?,
                command_device_id: r.u8()?,
                channel_no: r.u8()?,
                level: r.u8()?,
                duration: r.u16()?,
            })
        }
        opcode::ASSIGN_PANEL_BUTTON => Message::AssignPanelButton(AssignPanelButton {
            button_no: r.u8()?,
            function_no: r.u8()?,
            command: r.u8()?,
            command_subnet_id: r.u8()?,
            command_device_id: r.u8()?,
            channel_no: r.u8()?,
            level: r.u8()?,
            duration: r.u16()?,
            reserved: r.u8()?,
        }),
        opcode::ASSIGN_PANEL_BUTTON_RESPONSE => {
            Message::AssignPanelButtonResponse(AssignPanelButtonResponse {
                button_no: r.u8()?,
                function_no: r.u8()?,
            })
        }
        opcode::SET_PANEL_BUTTON_MODES => {
            let mut modes = [ButtonMode::Invalid; PANEL_BUTTON_COUNT];
            for mode in modes.iter_mut() {
                *mode = ButtonMode::from_wire(r.u8()?);
            }
            Message::SetPanelButtonModes(SetPanelButtonModes { modes })
        }
        opcode::SET_PANEL_BUTTON_MODES_RESPONSE => {
            Message::SetPanelButtonModesResponse(SetPanelButtonModesResponse {
                success: r.u8()? == SUCCESS,
            })
        }
        opcode::READ_MAC_ADDRESS => Message::ReadMacAddress,
        opcode::READ_MAC_ADDRESS_RESPONSE => {
            let mut mac = [0u8; 8];
            mac.copy_from_slice(r.take(8)?);
            Message::ReadMacAddressResponse(ReadMacAddressResponse {
                mac,
                remark: r.rest().to_vec(),
            })
        }
        opcode::READ_TEMPERATURE_VALUES => Message::ReadTemperatureValues(ReadTemperatureValues {
            celsius: r.u8()? != 0,
        }),
        opcode::READ_TEMPERATURE_VALUES_RESPONSE => {
            Message::ReadTemperatureValuesResponse(ReadTemperatureValuesResponse {
                celsius: r.u8()? != 0,
                values: r.rest().iter().map(|&b| b as i8).collect(),
            })
        }
        opcode::READ_SENSOR_STATUS => Message::ReadSensorStatus,
        opcode::READ_SENSOR_STATUS_RESPONSE => {
            Message::ReadSensorStatusResponse(ReadSensorStatusResponse {
                success: r.u8()? == SUCCESS,
                temperature: r.u8()?,
                illuminance: r.u16()?,
                movement: r.u8()? != 0,
                dry_contact_1: r.u8()? != 0,
                dry_contact_2: r.u8()? != 0,
            })
        }
        opcode::SENSOR_STATUS_BROADCAST => Message::SensorStatusBroadcast(SensorStatusBroadcast {
            temperature: r.u8()?,
            illuminance: r.u16()?,
            movement: r.u8()? != 0,
            dry_contact_1: r.u8()? != 0,
            dry_contact_2: r.u8()? != 0,
        }),
        _ => Message::Raw {
            opcode: op,
            payload: Bytes::copy_from_slice(frame.payload()),
        },
    };

    Ok((header, message))
}

/// Encode a message into a complete frame addressed by `header`.
pub fn encode_frame(header: &MessageHeader, message: &Message) -> Result<RawFrame> {
    let mut buf = Vec::new();

    match message {
        Message::SingleChannelControl(m) => {
            buf.push(m.channel_no);
            buf.push(m.level);
            buf.extend_from_slice(&m.duration.to_be_bytes());
        }
        Message::SingleChannelControlResponse(m) => {
            buf.push(m.channel_no);
            buf.push(if m.success { SUCCESS } else { FAILURE });
            buf.push(m.level);
            write_channel_status(&mut buf, &m.channel_status);
        }
        Message::ZoneBeastBroadcast(m) => {
            buf.push(m.zone_status.len() as u8);
            buf.extend_from_slice(&m.zone_status);
            write_channel_status(&mut buf, &m.channel_status);
        }
        Message::SceneControl(m) => {
            buf.push(m.zone_no);
            buf.push(m.scene_no);
        }
        Message::SceneControlResponse(m) => {
            buf.push(m.zone_no);
            buf.push(m.scene_no);
            write_channel_status(&mut buf, &m.channel_status);
        }
        Message::QueryModules | Message::ReadMacAddress | Message::ReadSensorStatus => {}
        Message::QueryModulesResponse(m) => {
            buf.push(m.controlled_subnet_id);
            buf.push(m.controlled_device_id);
            buf.push(m.device_category);
            buf.push(m.channel_no);
            buf.push(m.hvac_subnet_id);
            buf.push(m.hvac_device_id);
        }
        Message::PanelControlResponse(m) => {
            buf.push(m.kind);
            buf.push(m.value);
        }
        Message::QueryChannelStatuses(m) => buf.push(m.index),
        Message::QueryChannelStatusesResponse(m) => {
            write_channel_status(&mut buf, &m.channel_status);
        }
        Message::QueryPanelButtonAssignment(m) => {
            buf.push(m.button_no);
            buf.push(m.function_no);
        }
        Message::QueryPanelButtonAssignmentResponse(m) => {
            buf.push(m.button_no);
            buf.push(m.function_no);
            buf.push(m.command);
            buf.push(m.command_subnet_id);
            buf.push(m.command_device_id);
            buf.push(m.channel_no);
            buf.push(m.level);
            buf.extend_from_slice(&m.duration.to_be_bytes());
        }
        Message::AssignPanelButton(m) => {
            buf.push(m.button_no);
            buf.push(m.function_no);
            buf.push(m.command);
            buf.push(m.command_subnet_id);
            buf.push(m.command_device_id);
            buf.push(m.channel_no);
            buf.push(m.level);
            buf.extend_from_slice(&m.duration.to_be_bytes());
            buf.push(m.reserved);
        }
        Message::AssignPanelButtonResponse(m) => {
            buf.push(m.button_no);
            buf.push(m.function_no);
        }
        Message::SetPanelButtonModes(m) => {
            buf.extend(m.modes.iter().map(|mode| mode.to_wire()));
        }
        Message::SetPanelButtonModesResponse(m) => {
            buf.push(if m.success { SUCCESS } else { FAILURE });
        }
        Message::ReadMacAddressResponse(m) => {
            buf.extend_from_slice(&m.mac);
            buf.extend_from_slice(&m.remark);
        }
        Message::ReadTemperatureValues(m) => buf.push(m.celsius as u8),
        Message::ReadTemperatureValuesResponse(m) => {
            buf.push(m.celsius as u8);
            buf.extend(m.values.iter().map(|&v| v as u8));
        }
        Message::ReadSensorStatusResponse(m) => {
            buf.push(if m.success { SUCCESS } else { FAILURE });
            buf.push(m.temperature);
            buf.extend_from_slice(&m.illuminance.to_be_bytes());
            buf.push(m.movement as u8);
            buf.push(m.dry_contact_1 as u8);
            buf.push(m.dry_contact_2 as u8);
        }
        Message::SensorStatusBroadcast(m) => {
            buf.push(m.temperature);
            buf.extend_from_slice(&m.illuminance.to_be_bytes());
            buf.push(m.movement as u8);
            buf.push(m.dry_contact_1 as u8);
            buf.push(m.dry_contact_2 as u8);
        }
        Message::Raw { payload, .. } => buf.extend_from_slice(payload),
    }

    build_frame(header, message.opcode(), &buf)
}

/// One channel-count byte followed by a little-endian packed bitmap.
fn write_channel_status(buf: &mut Vec<u8>, status: &[bool]) {
    buf.push(status.len() as u8);
    let mut packed = vec![0u8; status.len().div_ceil(8)];
    for (i, &on) in status.iter().enumerate() {
        if on {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    buf.extend_from_slice(&packed);
}

/// Checked cursor over a payload slice.
struct Reader<'a> {
    opcode: u16,
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(opcode: u16, data: &'a [u8]) -> Self {
        Self { opcode, data, pos: 0 }
    }

    fn short(&self, needed: usize) -> BridgeError {
        BridgeError::Decode {
            opcode: self.opcode,
            reason: format!(
                "need {} more bytes at offset {}, payload is {} bytes",
                needed,
                self.pos,
                self.data.len()
            ),
        }
    }

    fn u8(&mut self) -> Result<u8> {
        let byte = *self.data.get(self.pos).ok_or_else(|| self.short(1))?;
        self.pos += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16> {
        let hi = self.u8()?;
        let lo = self.u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(self.short(n));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    fn channel_status(&mut self) -> Result<Vec<bool>> {
        let count = self.u8()? as usize;
        let packed = self.take(count.div_ceil(8))?;
        Ok((0..count).map(|i| packed[i / 8] & (1 << (i % 8)) != 0).collect())
    }
}
