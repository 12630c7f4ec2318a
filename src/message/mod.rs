//! Typed Smartbus messages.
//!
//! [`Message`] is a tagged union over the opcodes the bridge understands;
//! each variant implies its opcode, so handlers never see raw opcode
//! numbers. Opcodes the codec does not know about decode into
//! [`Message::Raw`], which device models ignore but sniffers still see.

mod codec;

pub use codec::{decode_frame, encode_frame};

use bytes::Bytes;

/// Opcode constants. Responses are their request plus one, per the bus
/// convention.
pub mod opcode {
    pub const SCENE_CONTROL: u16 = 0x0002;
    pub const SCENE_CONTROL_RESPONSE: u16 = 0x0003;
    pub const SINGLE_CHANNEL_CONTROL: u16 = 0x0031;
    pub const SINGLE_CHANNEL_CONTROL_RESPONSE: u16 = 0x0032;
    pub const QUERY_CHANNEL_STATUSES: u16 = 0x0033;
    pub const QUERY_CHANNEL_STATUSES_RESPONSE: u16 = 0x0034;
    pub const READ_SENSOR_STATUS: u16 = 0x012C;
    pub const READ_SENSOR_STATUS_RESPONSE: u16 = 0x012D;
    pub const QUERY_MODULES: u16 = 0x0286;
    pub const QUERY_MODULES_RESPONSE: u16 = 0x0287;
    pub const SENSOR_STATUS_BROADCAST: u16 = 0x02CA;
    pub const QUERY_PANEL_BUTTON_ASSIGNMENT: u16 = 0xE000;
    pub const QUERY_PANEL_BUTTON_ASSIGNMENT_RESPONSE: u16 = 0xE001;
    pub const ASSIGN_PANEL_BUTTON: u16 = 0xE002;
    pub const ASSIGN_PANEL_BUTTON_RESPONSE: u16 = 0xE003;
    pub const SET_PANEL_BUTTON_MODES: u16 = 0xE00A;
    pub const SET_PANEL_BUTTON_MODES_RESPONSE: u16 = 0xE00B;
    pub const PANEL_CONTROL_RESPONSE: u16 = 0xE3D9;
    pub const READ_TEMPERATURE_VALUES: u16 = 0xE3E7;
    pub const READ_TEMPERATURE_VALUES_RESPONSE: u16 = 0xE3E8;
    pub const READ_MAC_ADDRESS: u16 = 0xF003;
    pub const READ_MAC_ADDRESS_RESPONSE: u16 = 0xF004;
    pub const ZONE_BEAST_BROADCAST: u16 = 0xEFFF;
}

/// Fully-on light level.
pub const LIGHT_LEVEL_ON: u8 = 100;
/// Fully-off light level.
pub const LIGHT_LEVEL_OFF: u8 = 0;

/// Panel button command: single-channel lighting control.
pub const BUTTON_COMMAND_SINGLE_CHANNEL_LIGHTING: u8 = 0x59;
/// Panel button command: unassigned.
pub const BUTTON_COMMAND_INVALID: u8 = 0x00;

/// Number of programmable buttons on a DDP panel (pages of four).
pub const PANEL_BUTTON_COUNT: usize = 15;

/// Operating mode of one panel button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonMode {
    Invalid,
    SingleOnOff,
    SingleOn,
    SingleOff,
    CombinationOn,
    CombinationOff,
    CombinationOnOff,
}

impl ButtonMode {
    pub fn to_wire(self) -> u8 {
        match self {
            ButtonMode::Invalid => 0x00,
            ButtonMode::SingleOnOff => 0x01,
            ButtonMode::SingleOn => 0x02,
            ButtonMode::SingleOff => 0x03,
            ButtonMode::CombinationOn => 0x04,
            ButtonMode::CombinationOff => 0x05,
            ButtonMode::CombinationOnOff => 0x06,
        }
    }

    /// Unknown wire values read as `Invalid`.
    pub fn from_wire(byte: u8) -> Self {
        match byte {
            0x01 => ButtonMode::SingleOnOff,
            0x02 => ButtonMode::SingleOn,
            0x03 => ButtonMode::SingleOff,
            0x04 => ButtonMode::CombinationOn,
            0x05 => ButtonMode::CombinationOff,
            0x06 => ButtonMode::CombinationOnOff,
            _ => ButtonMode::Invalid,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ButtonMode::Invalid => "Invalid",
            ButtonMode::SingleOnOff => "SingleOnOff",
            ButtonMode::SingleOn => "SingleOn",
            ButtonMode::SingleOff => "SingleOff",
            ButtonMode::CombinationOn => "CombinationOn",
            ButtonMode::CombinationOff => "CombinationOff",
            ButtonMode::CombinationOnOff => "CombinationOnOff",
        }
    }
}

impl std::fmt::Display for ButtonMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleChannelControl {
    pub channel_no: u8,
    pub level: u8,
    pub duration: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleChannelControlResponse {
    pub channel_no: u8,
    pub success: bool,
    pub level: u8,
    pub channel_status: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneBeastBroadcast {
    pub zone_status: Vec<u8>,
    pub channel_status: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneControl {
    pub zone_no: u8,
    pub scene_no: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneControlResponse {
    pub zone_no: u8,
    pub scene_no: u8,
    pub channel_status: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryModulesResponse {
    pub controlled_subnet_id: u8,
    pub controlled_device_id: u8,
    pub device_category: u8,
    pub channel_no: u8,
    pub hvac_subnet_id: u8,
    pub hvac_device_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelControlResponse {
    pub kind: u8,
    pub value: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryChannelStatuses {
    pub index: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryChannelStatusesResponse {
    pub channel_status: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPanelButtonAssignment {
    pub button_no: u8,
    pub function_no: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPanelButtonAssignmentResponse {
    pub button_no: u8,
    pub function_no: u8,
    pub command: u8,
    pub command_subnet_id: u8,
    pub command_device_id: u8,
    pub channel_no: u8,
    pub level: u8,
    pub duration: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignPanelButton {
    pub button_no: u8,
    pub function_no: u8,
    pub command: u8,
    pub command_subnet_id: u8,
    pub command_device_id: u8,
    pub channel_no: u8,
    pub level: u8,
    pub duration: u16,
    /// Trailing reserved byte, always written as zero.
    pub reserved: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignPanelButtonResponse {
    pub button_no: u8,
    pub function_no: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetPanelButtonModes {
    pub modes: [ButtonMode; PANEL_BUTTON_COUNT],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetPanelButtonModesResponse {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMacAddressResponse {
    pub mac: [u8; 8],
    pub remark: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadTemperatureValues {
    pub celsius: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadTemperatureValuesResponse {
    pub celsius: bool,
    pub values: Vec<i8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadSensorStatusResponse {
    pub success: bool,
    pub temperature: u8,
    pub illuminance: u16,
    pub movement: bool,
    pub dry_contact_1: bool,
    pub dry_contact_2: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorStatusBroadcast {
    pub temperature: u8,
    pub illuminance: u16,
    pub movement: bool,
    pub dry_contact_1: bool,
    pub dry_contact_2: bool,
}

/// A decoded Smartbus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    SingleChannelControl(SingleChannelControl),
    SingleChannelControlResponse(SingleChannelControlResponse),
    ZoneBeastBroadcast(ZoneBeastBroadcast),
    SceneControl(SceneControl),
    SceneControlResponse(SceneControlResponse),
    QueryModules,
    QueryModulesResponse(QueryModulesResponse),
    PanelControlResponse(PanelControlResponse),
    QueryChannelStatuses(QueryChannelStatuses),
    QueryChannelStatusesResponse(QueryChannelStatusesResponse),
    QueryPanelButtonAssignment(QueryPanelButtonAssignment),
    QueryPanelButtonAssignmentResponse(QueryPanelButtonAssignmentResponse),
    AssignPanelButton(AssignPanelButton),
    AssignPanelButtonResponse(AssignPanelButtonResponse),
    SetPanelButtonModes(SetPanelButtonModes),
    SetPanelButtonModesResponse(SetPanelButtonModesResponse),
    ReadMacAddress,
    ReadMacAddressResponse(ReadMacAddressResponse),
    ReadTemperatureValues(ReadTemperatureValues),
    ReadTemperatureValuesResponse(ReadTemperatureValuesResponse),
    ReadSensorStatus,
    ReadSensorStatusResponse(ReadSensorStatusResponse),
    SensorStatusBroadcast(SensorStatusBroadcast),
    /// An opcode without a codec entry; carried for sniffers, ignored by
    /// device models.
    Raw { opcode: u16, payload: Bytes },
}

impl Message {
    /// The wire opcode implied by this variant.
    pub fn opcode(&self) -> u16 {
        use opcode::*;
        match self {
            Message::SingleChannelControl(_) => SINGLE_CHANNEL_CONTROL,
            Message::SingleChannelControlResponse(_) => SINGLE_CHANNEL_CONTROL_RESPONSE,
            Message::ZoneBeastBroadcast(_) => ZONE_BEAST_BROADCAST,
            Message::SceneControl(_) => SCENE_CONTROL,
            Message::SceneControlResponse(_) => SCENE_CONTROL_RESPONSE,
            Message::QueryModules => QUERY_MODULES,
            Message::QueryModulesResponse(_) => QUERY_MODULES_RESPONSE,
            Message::PanelControlResponse(_) => PANEL_CONTROL_RESPONSE,
            Message::QueryChannelStatuses(_) => QUERY_CHANNEL_STATUSES,
            Message::QueryChannelStatusesResponse(_) => QUERY_CHANNEL_STATUSES_RESPONSE,
            Message::QueryPanelButtonAssignment(_) => QUERY_PANEL_BUTTON_ASSIGNMENT,
            Message::QueryPanelButtonAssignmentResponse(_) => {
                QUERY_PANEL_BUTTON_ASSIGNMENT_RESPONSE
            }
            Message::AssignPanelButton(_) => ASSIGN_PANEL_BUTTON,
            Message::AssignPanelButtonResponse(_) => ASSIGN_PANEL_BUTTON_RESPONSE,
            Message::SetPanelButtonModes(_) => SET_PANEL_BUTTON_MODES,
            Message::SetPanelButtonModesResponse(_) => SET_PANEL_BUTTON_MODES_RESPONSE,
            Message::ReadMacAddress => READ_MAC_ADDRESS,
            Message::ReadMacAddressResponse(_) => READ_MAC_ADDRESS_RESPONSE,
            Message::ReadTemperatureValues(_) => READ_TEMPERATURE_VALUES,
            Message::ReadTemperatureValuesResponse(_) => READ_TEMPERATURE_VALUES_RESPONSE,
            Message::ReadSensorStatus => READ_SENSOR_STATUS,
            Message::ReadSensorStatusResponse(_) => READ_SENSOR_STATUS_RESPONSE,
            Message::SensorStatusBroadcast(_) => SENSOR_STATUS_BROADCAST,
            Message::Raw { opcode, .. } => *opcode,
        }
    }
}

/// Render a channel-status vector as `x`/`-` per channel.
pub fn format_channel_status(status: &[bool]) -> String {
    status.iter().map(|&on| if on { 'x' } else { '-' }).collect()
}

/// Parse a `x`/`-` channel-status string; any non-`x` byte reads as off.
pub fn parse_channel_status(text: &str) -> Vec<bool> {
    text.chars().map(|c| c == 'x').collect()
}
