//! Human-readable rendering of bus traffic.
//!
//! [`format_message`] produces the one-line form used by the sniffer
//! logger and the test harnesses; [`MessageDumper`] is a [`PacketSink`]
//! logging every packet it sees at `debug`.

use crate::connection::PacketSink;
use crate::message::{format_channel_status, Message};
use crate::protocol::MessageHeader;

/// Names of the panel control kinds seen in `PanelControlResponse`.
fn panel_control_kind(kind: u8) -> &'static str {
    match kind {
        0x00 => "Invalid",
        0x01 => "IR Receiver",
        0x02 => "Button Lock",
        0x03 => "AC On/Off",
        0x04 => "Cooling Set Point",
        0x05 => "Fan Speed",
        0x06 => "AC Mode",
        0x07 => "Heat Set Point",
        0x08 => "Auto Set Point",
        0x16 => "Go To Page",
        _ => "unknown",
    }
}

fn temperature_unit(celsius: bool) -> &'static str {
    if celsius {
        "Celsius"
    } else {
        "Fahrenheit"
    }
}

/// Render `header` and `message` as a single log line.
pub fn format_message(header: &MessageHeader, message: &Message) -> String {
    format!("{header}: {}", format_body(message))
}

fn format_body(message: &Message) -> String {
    match message {
        Message::SingleChannelControl(m) => format!(
            "SingleChannelControl channel={} level={} duration={}",
            m.channel_no, m.level, m.duration
        ),
        Message::SingleChannelControlResponse(m) => format!(
            "SingleChannelControlResponse channel={} ok={} level={} status={}",
            m.channel_no,
            m.success,
            m.level,
            format_channel_status(&m.channel_status)
        ),
        Message::ZoneBeastBroadcast(m) => format!(
            "ZoneBeastBroadcast zones={:?} status={}",
            m.zone_status,
            format_channel_status(&m.channel_status)
        ),
        Message::SceneControl(m) => {
            format!("SceneControl zone={} scene={}", m.zone_no, m.scene_no)
        }
        Message::SceneControlResponse(m) => format!(
            "SceneControlResponse zone={} scene={} status={}",
            m.zone_no,
            m.scene_no,
            format_channel_status(&m.channel_status)
        ),
        Message::QueryModules => "QueryModules".to_string(),
        Message::QueryModulesResponse(m) => format!(
            "QueryModulesResponse controlled={:02x}/{:02x} category={:02x} channel={} hvac={:02x}/{:02x}",
            m.controlled_subnet_id,
            m.controlled_device_id,
            m.device_category,
            m.channel_no,
            m.hvac_subnet_id,
            m.hvac_device_id
        ),
        Message::PanelControlResponse(m) => format!(
            "PanelControlResponse {}={}",
            panel_control_kind(m.kind),
            m.value
        ),
        Message::QueryChannelStatuses(m) => {
            format!("QueryChannelStatuses index={}", m.index)
        }
        Message::QueryChannelStatusesResponse(m) => format!(
            "QueryChannelStatusesResponse status={}",
            format_channel_status(&m.channel_status)
        ),
        Message::QueryPanelButtonAssignment(m) => format!(
            "QueryPanelButtonAssignment button={} function={}",
            m.button_no, m.function_no
        ),
        Message::QueryPanelButtonAssignmentResponse(m) => format!(
            "QueryPanelButtonAssignmentResponse button={} function={} command={:02x} target={:02x}/{:02x} channel={} level={} duration={}",
            m.button_no,
            m.function_no,
            m.command,
            m.command_subnet_id,
            m.command_device_id,
            m.channel_no,
            m.level,
            m.duration
        ),
        Message::AssignPanelButton(m) => format!(
            "AssignPanelButton button={} function={} command={:02x} target={:02x}/{:02x} channel={} level={} duration={}",
            m.button_no,
            m.function_no,
            m.command,
            m.command_subnet_id,
            m.command_device_id,
            m.channel_no,
            m.level,
            m.duration
        ),
        Message::AssignPanelButtonResponse(m) => format!(
            "AssignPanelButtonResponse button={} function={}",
            m.button_no, m.function_no
        ),
        Message::SetPanelButtonModes(m) => {
            let modes: Vec<String> = m
                .modes
                .iter()
                .enumerate()
                .map(|(i, mode)| format!("{}/{}:{}", i / 4 + 1, i % 4 + 1, mode))
                .collect();
            format!("SetPanelButtonModes {}", modes.join(","))
        }
        Message::SetPanelButtonModesResponse(m) => {
            format!("SetPanelButtonModesResponse ok={}", m.success)
        }
        Message::ReadMacAddress => "ReadMACAddress".to_string(),
        Message::ReadMacAddressResponse(m) => {
            let mac: Vec<String> = m.mac.iter().map(|b| format!("{b:02x}")).collect();
            let remark: Vec<String> = m.remark.iter().map(|b| format!("{b:02x}")).collect();
            format!(
                "ReadMACAddressResponse mac={} remark=[{}]",
                mac.join(":"),
                remark.join(" ")
            )
        }
        Message::ReadTemperatureValues(m) => format!(
            "ReadTemperatureValues unit={}",
            temperature_unit(m.celsius)
        ),
        Message::ReadTemperatureValuesResponse(m) => {
            let values: Vec<String> = m.values.iter().map(|v| v.to_string()).collect();
            format!(
                "ReadTemperatureValuesResponse unit={} values=[{}]",
                temperature_unit(m.celsius),
                values.join(",")
            )
        }
        Message::ReadSensorStatus => "ReadSensorStatus".to_string(),
        Message::ReadSensorStatusResponse(m) => format!(
            "ReadSensorStatusResponse ok={} temp={} lux={} movement={} dry1={} dry2={}",
            m.success, m.temperature, m.illuminance, m.movement, m.dry_contact_1, m.dry_contact_2
        ),
        Message::SensorStatusBroadcast(m) => format!(
            "SensorStatusBroadcast temp={} lux={} movement={} dry1={} dry2={}",
            m.temperature, m.illuminance, m.movement, m.dry_contact_1, m.dry_contact_2
        ),
        Message::Raw { opcode, payload } => {
            let bytes: Vec<String> = payload.iter().map(|b| format!("{b:02x}")).collect();
            format!("Raw opcode={opcode:04x} payload=[{}]", bytes.join(" "))
        }
    }
}

/// Passive sniffer that logs every packet with a fixed prefix.
pub struct MessageDumper {
    prefix: &'static str,
}

impl MessageDumper {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix }
    }
}

impl PacketSink for MessageDumper {
    fn deliver(&self, header: &MessageHeader, message: &Message) {
        tracing::debug!("{}: {}", self.prefix, format_message(header, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{
        parse_channel_status, SingleChannelControl, SingleChannelControlResponse,
    };

    fn header() -> MessageHeader {
        MessageHeader::new((0x01, 0x14, 0x0095), (0x03, 0xFE))
    }

    #[test]
    fn test_format_command() {
        let message = Message::SingleChannelControl(SingleChannelControl {
            channel_no: 2,
            level: 100,
            duration: 0,
        });
        assert_eq!(
            format_message(&header(), &message),
            "01/14 (type 0095) -> 03/fe: SingleChannelControl channel=2 level=100 duration=0"
        );
    }

    #[test]
    fn test_format_response_with_status() {
        let message = Message::SingleChannelControlResponse(SingleChannelControlResponse {
            channel_no: 10,
            success: true,
            level: 100,
            channel_status: parse_channel_status("---------x-----"),
        });
        assert_eq!(
            format_message(&header(), &message),
            "01/14 (type 0095) -> 03/fe: \
             SingleChannelControlResponse channel=10 ok=true level=100 status=---------x-----"
        );
    }

    #[test]
    fn test_format_raw() {
        let message = Message::Raw {
            opcode: 0xBEEF,
            payload: bytes::Bytes::from_static(&[0x01, 0xFF]),
        };
        assert_eq!(
            format_message(&header(), &message),
            "01/14 (type 0095) -> 03/fe: Raw opcode=beef payload=[01 ff]"
        );
    }
}
