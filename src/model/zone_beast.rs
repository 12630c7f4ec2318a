//! Zone beast: a multi-channel relay/zone controller with temperature
//! sensing.
//!
//! Channel state is learned from `ZoneBeastBroadcast` frames; channels are
//! surfaced lazily as broadcasts reveal them. Writes go through the request
//! queue as `SingleChannelControlCommand`, and the broadcast immediately
//! following a control response is dropped, since zone beasts are known to
//! emit one with pre-command state.

use super::{
    switch_value, Control, ControlKind, ControlObserver, DeviceInfo, DeviceModel, ModelCx,
};
use crate::endpoint::DeviceHandle;
use crate::message::{opcode, Message, LIGHT_LEVEL_OFF, LIGHT_LEVEL_ON};
use crate::protocol::MessageHeader;

pub const ZONE_BEAST_DEVICE_TYPE: u16 = 0x139C;

pub struct ZoneBeastModel {
    dev: DeviceHandle,
    channel_status: Vec<bool>,
    skip_broadcast: bool,
    num_temps: usize,
}

impl ZoneBeastModel {
    pub fn create(dev: DeviceHandle) -> Box<dyn DeviceModel> {
        Box::new(Self {
            dev,
            channel_status: Vec::new(),
            skip_broadcast: false,
            num_temps: 0,
        })
    }

    /// Update one already-known channel (1-based) and emit the change.
    fn update_single_channel(&mut self, observer: &mut dyn ControlObserver, channel_no: usize, on: bool) {
        if channel_no == 0 || channel_no > self.channel_status.len() {
            tracing::error!(channel_no, "zone beast response for unknown channel");
            return;
        }
        if self.channel_status[channel_no - 1] == on {
            return;
        }
        self.channel_status[channel_no - 1] = on;
        observer.on_value(&self.info(), &format!("Channel {channel_no}"), switch_value(on));
    }

    /// Merge a broadcast status vector, surfacing newly revealed channels.
    fn update_channel_status(&mut self, observer: &mut dyn ControlObserver, status: &[bool]) {
        let known = self.channel_status.len().min(status.len());
        for i in 0..known {
            self.update_single_channel(observer, i + 1, status[i]);
        }
        let info = self.info();
        for (i, &on) in status.iter().enumerate().skip(known) {
            self.channel_status.push(on);
            observer.on_new_control(
                &info,
                &Control {
                    name: format!("Channel {}", i + 1),
                    kind: ControlKind::Switch,
                    value: switch_value(on).to_string(),
                    readonly: false,
                    order: -1,
                    retained: true,
                },
            );
        }
    }

    /// Update or surface one temperature control (1-based index).
    ///
    /// Indices arrive in order, so index n is never seen before n-1.
    fn update_temperature(&mut self, observer: &mut dyn ControlObserver, index: usize, value: i8) {
        let name = format!("Temp {index}");
        if index > self.num_temps {
            observer.on_new_control(
                &self.info(),
                &Control {
                    name,
                    kind: ControlKind::Temperature,
                    value: value.to_string(),
                    readonly: true,
                    order: -1,
                    retained: true,
                },
            );
            self.num_temps = index;
        } else {
            observer.on_value(&self.info(), &name, &value.to_string());
        }
    }
}

impl DeviceModel for ZoneBeastModel {
    fn device_type(&self) -> u16 {
        ZONE_BEAST_DEVICE_TYPE
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("zonebeast{:02x}{:02x}", self.dev.subnet_id(), self.dev.device_id()),
            title: format!("Zone Beast {:02x}:{:02x}", self.dev.subnet_id(), self.dev.device_id()),
        }
    }

    fn poll(&mut self, _cx: &mut ModelCx) {
        // Periodic, so no queueing and no retry; the next tick repairs a
        // lost query.
        if let Err(err) = self.dev.read_temperature_values(true) {
            tracing::error!(%err, "failed to poll temperatures");
        }
    }

    fn accept_on_value(&mut self, cx: &mut ModelCx, control: &str, value: &str) -> bool {
        let channel_no: u8 = match control.strip_prefix("Channel ").map(str::parse) {
            Some(Ok(channel_no)) => channel_no,
            _ => {
                tracing::warn!(control, "bad zone beast channel name");
                return false;
            }
        };
        let level = if value == "1" { LIGHT_LEVEL_ON } else { LIGHT_LEVEL_OFF };

        let dev = self.dev.clone();
        cx.enqueue_request(
            "SingleChannelControl",
            opcode::SINGLE_CHANNEL_CONTROL_RESPONSE,
            move || {
                if let Err(err) = dev.single_channel_control(channel_no, level, 0) {
                    tracing::error!(%err, channel_no, "failed to send channel control");
                }
            },
        );

        // The echo follows the device's response, not the write.
        false
    }

    fn handle_message(&mut self, cx: &mut ModelCx, _header: &MessageHeader, message: &Message) {
        match message {
            Message::SingleChannelControlResponse(m) => {
                cx.queue.notify_opcode(opcode::SINGLE_CHANNEL_CONTROL_RESPONSE);
                if !m.success {
                    tracing::error!(channel_no = m.channel_no, "unsuccessful channel control");
                    return;
                }
                self.update_single_channel(cx.observer, m.channel_no as usize, m.level != 0);
                // Zone beasts may follow up with a broadcast carrying
                // pre-command state.
                self.skip_broadcast = true;
            }
            Message::ZoneBeastBroadcast(m) => {
                if !self.skip_broadcast {
                    self.update_channel_status(cx.observer, &m.channel_status);
                }
                self.skip_broadcast = false;
            }
            Message::ReadTemperatureValuesResponse(m) => {
                // Fahrenheit responses answer someone else's query.
                if m.celsius {
                    for (i, &value) in m.values.iter().enumerate() {
                        self.update_temperature(cx.observer, i + 1, value);
                    }
                }
            }
            Message::ReadMacAddressResponse(_) => {
                tracing::debug!(name = %self.info().name, "zone beast answered discovery");
            }
            _ => {}
        }
    }
}
