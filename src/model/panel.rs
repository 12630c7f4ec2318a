//! DDP wall panel: programmable buttons arranged as pages of four.
//!
//! On discovery the model walks every button with a queued
//! `QueryPanelButtonAssignment`, surfacing a `PageXButtonY` text control
//! per button. A broker write to such a control re-targets the button at a
//! virtual relay via the two-step `SetPanelButtonModes` then
//! `AssignPanelButton` sequence, echoing the new value only after the
//! second response. Panels also drive the virtual relay device through
//! `SingleChannelControlCommand`.

use super::{Control, ControlKind, DeviceInfo, DeviceModel, ModelCx, NUM_VIRTUAL_RELAYS};
use crate::endpoint::DeviceHandle;
use crate::message::{
    opcode, Message, ButtonMode, BUTTON_COMMAND_SINGLE_CHANNEL_LIGHTING, PANEL_BUTTON_COUNT,
};
use crate::protocol::MessageHeader;

pub const DDP_DEVICE_TYPE: u16 = 0x0095;

/// Buttons per page on a DDP panel.
const BUTTONS_PER_PAGE: usize = 4;

/// `PageXButtonY` name of a 1-based button number.
fn control_name(button_no: usize) -> String {
    format!(
        "Page{}Button{}",
        (button_no - 1) / BUTTONS_PER_PAGE + 1,
        (button_no - 1) % BUTTONS_PER_PAGE + 1
    )
}

/// `PageXButtonY` back to the 1-based button number.
fn parse_control_name(control: &str) -> Option<usize> {
    let rest = control.strip_prefix("Page")?;
    let (page_text, button_text) = rest.split_once("Button")?;
    let page: usize = page_text.parse().ok()?;
    let page_button: usize = button_text.parse().ok()?;
    if page == 0 || page_button == 0 || page_button > BUTTONS_PER_PAGE {
        return None;
    }
    let button_no = (page - 1) * BUTTONS_PER_PAGE + page_button;
    (button_no <= PANEL_BUTTON_COUNT).then_some(button_no)
}

struct PendingAssignment {
    button_no: usize,
    relay_no: i32,
}

pub struct DdpModel {
    dev: DeviceHandle,
    assignment_received: [bool; PANEL_BUTTON_COUNT],
    /// Virtual relay index per button, -1 when not pointed at the bridge.
    assignment: [i32; PANEL_BUTTON_COUNT],
    walked: bool,
    pending: Option<PendingAssignment>,
}

impl DdpModel {
    pub fn create(dev: DeviceHandle) -> Box<dyn DeviceModel> {
        Box::new(Self {
            dev,
            assignment_received: [false; PANEL_BUTTON_COUNT],
            assignment: [-1; PANEL_BUTTON_COUNT],
            walked: false,
            pending: None,
        })
    }

    /// Kick off the sequential button walk, once per run.
    fn query_buttons(&mut self, cx: &mut ModelCx) {
        if self.walked {
            return;
        }
        self.walked = true;
        self.query_button(cx, 1);
    }

    fn query_button(&self, cx: &mut ModelCx, button_no: u8) {
        let dev = self.dev.clone();
        cx.enqueue_request(
            "QueryPanelButtonAssignment",
            opcode::QUERY_PANEL_BUTTON_ASSIGNMENT_RESPONSE,
            move || {
                // Only the first function slot is queried; combination
                // modes would need the rest.
                if let Err(err) = dev.query_panel_button_assignment(button_no, 1) {
                    tracing::error!(%err, button_no, "failed to query button assignment");
                }
            },
        );
    }
}

impl DeviceModel for DdpModel {
    fn device_type(&self) -> u16 {
        DDP_DEVICE_TYPE
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("ddp{:02x}{:02x}", self.dev.subnet_id(), self.dev.device_id()),
            title: format!("DDP {:02x}:{:02x}", self.dev.subnet_id(), self.dev.device_id()),
        }
    }

    fn poll(&mut self, _cx: &mut ModelCx) {}

    fn accept_on_value(&mut self, cx: &mut ModelCx, control: &str, value: &str) -> bool {
        if self.pending.is_some() {
            tracing::error!(control, "button assignment already in flight, write dropped");
            return false;
        }
        let Some(button_no) = parse_control_name(control) else {
            tracing::error!(control, "bad panel button control name");
            return false;
        };
        let relay_no: i32 = match value.parse() {
            Ok(relay_no) if (1..=NUM_VIRTUAL_RELAYS as i32).contains(&relay_no) => relay_no,
            _ => {
                tracing::error!(value, "bad button assignment value");
                return false;
            }
        };
        if self.assignment_received.iter().any(|&received| !received) {
            tracing::error!("cannot assign button: panel button data not received yet");
            return false;
        }

        self.assignment[button_no - 1] = relay_no;
        let mut modes = [ButtonMode::Invalid; PANEL_BUTTON_COUNT];
        for (mode, &assignment) in modes.iter_mut().zip(self.assignment.iter()) {
            if (1..=NUM_VIRTUAL_RELAYS as i32).contains(&assignment) {
                *mode = ButtonMode::SingleOnOff;
            }
        }

        let dev = self.dev.clone();
        cx.enqueue_request(
            "SetPanelButtonModes",
            opcode::SET_PANEL_BUTTON_MODES_RESPONSE,
            move || {
                if let Err(err) = dev.set_panel_button_modes(modes) {
                    tracing::error!(%err, "failed to send button modes");
                }
            },
        );
        self.pending = Some(PendingAssignment {
            button_no,
            relay_no,
        });

        // Echoed once AssignPanelButtonResponse confirms.
        false
    }

    fn handle_message(&mut self, cx: &mut ModelCx, _header: &MessageHeader, message: &Message) {
        match message {
            Message::ReadMacAddressResponse(_) => {
                tracing::debug!(name = %self.info().name, "panel answered discovery");
                self.query_buttons(cx);
            }
            Message::QueryModules => {
                // A panel plugged in after startup announces itself; a
                // repeat for an already-walked panel does nothing.
                self.query_buttons(cx);
            }
            Message::QueryPanelButtonAssignmentResponse(m) => {
                cx.queue
                    .notify_opcode(opcode::QUERY_PANEL_BUTTON_ASSIGNMENT_RESPONSE);
                let button_no = m.button_no as usize;
                if button_no == 0 || button_no > PANEL_BUTTON_COUNT || m.function_no != 1 {
                    tracing::error!(
                        button_no = m.button_no,
                        function_no = m.function_no,
                        "bad button assignment response"
                    );
                    return;
                }
                let assignment = if m.command == BUTTON_COMMAND_SINGLE_CHANNEL_LIGHTING
                    && m.command_subnet_id == cx.endpoint_subnet_id
                    && m.command_device_id == cx.endpoint_device_id
                {
                    i32::from(m.channel_no)
                } else {
                    -1
                };
                self.assignment[button_no - 1] = assignment;

                let name = control_name(button_no);
                let info = self.info();
                if self.assignment_received[button_no - 1] {
                    cx.observer.on_value(&info, &name, &assignment.to_string());
                } else {
                    self.assignment_received[button_no - 1] = true;
                    cx.observer.on_new_control(
                        &info,
                        &Control {
                            name,
                            kind: ControlKind::Text,
                            value: assignment.to_string(),
                            readonly: false,
                            order: -1,
                            retained: true,
                        },
                    );
                }

                if button_no < PANEL_BUTTON_COUNT {
                    self.query_button(cx, (button_no + 1) as u8);
                }
            }
            Message::SetPanelButtonModesResponse(_) => {
                cx.queue
                    .notify_opcode(opcode::SET_PANEL_BUTTON_MODES_RESPONSE);
                let Some(pending) = &self.pending else {
                    tracing::error!("button modes response without a pending assignment");
                    return;
                };
                let button_no = pending.button_no as u8;
                let relay_no = pending.relay_no as u8;
                let dev = self.dev.clone();
                let subnet_id = cx.endpoint_subnet_id;
                let device_id = cx.endpoint_device_id;
                cx.enqueue_request(
                    "AssignPanelButton",
                    opcode::ASSIGN_PANEL_BUTTON_RESPONSE,
                    move || {
                        if let Err(err) = dev.assign_panel_button(
                            button_no,
                            1,
                            BUTTON_COMMAND_SINGLE_CHANNEL_LIGHTING,
                            subnet_id,
                            device_id,
                            relay_no,
                            100,
                            0,
                        ) {
                            tracing::error!(%err, button_no, "failed to assign button");
                        }
                    },
                );
            }
            Message::AssignPanelButtonResponse(m) => {
                cx.queue.notify_opcode(opcode::ASSIGN_PANEL_BUTTON_RESPONSE);
                match self.pending.take() {
                    Some(pending)
                        if pending.button_no == m.button_no as usize && m.function_no == 1 =>
                    {
                        cx.observer.on_value(
                            &self.info(),
                            &control_name(pending.button_no),
                            &pending.relay_no.to_string(),
                        );
                    }
                    pending => {
                        tracing::error!(
                            button_no = m.button_no,
                            function_no = m.function_no,
                            pending = pending.map(|p| p.button_no).unwrap_or(0),
                            "mismatched assign button response"
                        );
                    }
                }
            }
            Message::SingleChannelControl(m) => {
                cx.virtual_relays
                    .set_relay_on(cx.observer, m.channel_no as usize, m.level > 0);
                // Delivery of this response is best-effort; there is no
                // application-level retry.
                if let Err(err) = self.dev.single_channel_control_response(
                    m.channel_no,
                    true,
                    m.level,
                    cx.virtual_relays.status(),
                ) {
                    tracing::error!(%err, "failed to answer panel channel control");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_name_pages_of_four() {
        assert_eq!(control_name(1), "Page1Button1");
        assert_eq!(control_name(2), "Page1Button2");
        assert_eq!(control_name(4), "Page1Button4");
        assert_eq!(control_name(5), "Page2Button1");
        assert_eq!(control_name(15), "Page4Button3");
    }

    #[test]
    fn test_parse_control_name() {
        assert_eq!(parse_control_name("Page1Button2"), Some(2));
        assert_eq!(parse_control_name("Page4Button3"), Some(15));
        assert_eq!(parse_control_name("Page4Button4"), None); // beyond button 15
        assert_eq!(parse_control_name("Page0Button1"), None);
        assert_eq!(parse_control_name("Page1Button5"), None);
        assert_eq!(parse_control_name("Channel 1"), None);
        assert_eq!(parse_control_name("PageXButtonY"), None);
    }

    #[test]
    fn test_names_roundtrip() {
        for button_no in 1..=PANEL_BUTTON_COUNT {
            assert_eq!(parse_control_name(&control_name(button_no)), Some(button_no));
        }
    }
}
