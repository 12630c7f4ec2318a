//! The virtual relay device.
//!
//! A purely local device exposing read-only switches that mirror the state
//! DDP panels believe they control. Panels flip the switches through
//! `SingleChannelControlCommand`; the broker can only watch.

use super::{switch_value, Control, ControlKind, ControlObserver, DeviceInfo, NUM_VIRTUAL_RELAYS};

pub struct VirtualRelayDevice {
    channel_status: [bool; NUM_VIRTUAL_RELAYS],
}

impl VirtualRelayDevice {
    pub fn new() -> Self {
        Self {
            channel_status: [false; NUM_VIRTUAL_RELAYS],
        }
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "sbusvrelay".to_string(),
            title: "Smartbus Virtual Relays".to_string(),
        }
    }

    /// Surface all relay controls to the observer.
    pub fn publish(&self, observer: &mut dyn ControlObserver) {
        let info = self.info();
        for (i, &on) in self.channel_status.iter().enumerate() {
            observer.on_new_control(
                &info,
                &Control {
                    name: format!("VirtualRelay{}", i + 1),
                    kind: ControlKind::Switch,
                    value: switch_value(on).to_string(),
                    readonly: true,
                    order: -1,
                    retained: true,
                },
            );
        }
    }

    /// Flip one relay; no-op when the state already matches.
    pub fn set_relay_on(&mut self, observer: &mut dyn ControlObserver, channel_no: usize, on: bool) {
        if channel_no < 1 || channel_no > NUM_VIRTUAL_RELAYS {
            tracing::warn!(channel_no, "invalid virtual relay channel");
            return;
        }
        if self.channel_status[channel_no - 1] == on {
            return;
        }
        self.channel_status[channel_no - 1] = on;
        observer.on_value(
            &self.info(),
            &format!("VirtualRelay{channel_no}"),
            switch_value(on),
        );
    }

    /// Snapshot of all relay states.
    pub fn status(&self) -> Vec<bool> {
        self.channel_status.to_vec()
    }
}

impl Default for VirtualRelayDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Rec(Arc<Mutex<Vec<String>>>);

    impl ControlObserver for Rec {
        fn on_new_device(&mut self, device: &DeviceInfo) {
            self.0.lock().unwrap().push(format!("device: {}", device.name));
        }
        fn on_new_control(&mut self, device: &DeviceInfo, control: &Control) {
            self.0.lock().unwrap().push(format!(
                "new: {}/{} [{}] = {} readonly={}",
                device.name, control.name, control.kind, control.value, control.readonly
            ));
        }
        fn on_value(&mut self, device: &DeviceInfo, control: &str, value: &str) {
            self.0
                .lock()
                .unwrap()
                .push(format!("value: {}/{} = {}", device.name, control, value));
        }
    }

    #[test]
    fn test_publish_surfaces_all_relays() {
        let mut rec = Rec::default();
        VirtualRelayDevice::new().publish(&mut rec);
        let lines = rec.0.lock().unwrap().clone();
        assert_eq!(lines.len(), NUM_VIRTUAL_RELAYS);
        assert_eq!(lines[0], "new: sbusvrelay/VirtualRelay1 [switch] = 0 readonly=true");
        assert_eq!(
            lines[NUM_VIRTUAL_RELAYS - 1],
            "new: sbusvrelay/VirtualRelay15 [switch] = 0 readonly=true"
        );
    }

    #[test]
    fn test_set_relay_emits_only_changes() {
        let mut rec = Rec::default();
        let mut relays = VirtualRelayDevice::new();
        relays.set_relay_on(&mut rec, 10, true);
        relays.set_relay_on(&mut rec, 10, true); // unchanged, no event
        relays.set_relay_on(&mut rec, 10, false);
        let lines = rec.0.lock().unwrap().clone();
        assert_eq!(
            lines,
            vec![
                "value: sbusvrelay/VirtualRelay10 = 1",
                "value: sbusvrelay/VirtualRelay10 = 0",
            ]
        );
        assert!(!relays.status()[9]);
    }

    #[test]
    fn test_out_of_range_channel_is_ignored() {
        let mut rec = Rec::default();
        let mut relays = VirtualRelayDevice::new();
        relays.set_relay_on(&mut rec, 0, true);
        relays.set_relay_on(&mut rec, NUM_VIRTUAL_RELAYS + 1, true);
        assert!(rec.0.lock().unwrap().is_empty());
        assert!(relays.status().iter().all(|&on| !on));
    }
}
