//! Broker topic surface.
//!
//! The bridge publishes controls under `/devices/<device>/controls/<control>`
//! with metadata below `.../meta/` and accepts writes on `.../on`. The
//! concrete broker client lives outside this crate; [`TopicLogger`] renders
//! the same surface into the log so the bridge is observable without one.

use crate::model::{Control, ControlObserver, DeviceInfo};

pub fn device_meta_topic(device: &str, key: &str) -> String {
    format!("/devices/{device}/meta/{key}")
}

pub fn control_topic(device: &str, control: &str) -> String {
    format!("/devices/{device}/controls/{control}")
}

pub fn control_meta_topic(device: &str, control: &str, key: &str) -> String {
    format!("/devices/{device}/controls/{control}/meta/{key}")
}

/// The write topic of a control.
pub fn control_on_topic(device: &str, control: &str) -> String {
    format!("/devices/{device}/controls/{control}/on")
}

/// Split a `.../on` write topic into `(device, control)`.
pub fn parse_control_on_topic(topic: &str) -> Option<(&str, &str)> {
    let rest = topic.strip_prefix("/devices/")?;
    let (device, rest) = rest.split_once("/controls/")?;
    let control = rest.strip_suffix("/on")?;
    if device.is_empty() || control.is_empty() || control.contains('/') {
        return None;
    }
    Some((device, control))
}

/// Observer that logs every retained publish as a broker topic line.
pub struct TopicLogger;

impl TopicLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TopicLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlObserver for TopicLogger {
    fn on_new_device(&mut self, device: &DeviceInfo) {
        tracing::info!(
            "{}: [{}] (retained)",
            device_meta_topic(&device.name, "name"),
            device.title
        );
    }

    fn on_new_control(&mut self, device: &DeviceInfo, control: &Control) {
        tracing::info!(
            "{}: [{}] (retained)",
            control_meta_topic(&device.name, &control.name, "type"),
            control.kind
        );
        if control.readonly {
            tracing::info!(
                "{}: [1] (retained)",
                control_meta_topic(&device.name, &control.name, "readonly")
            );
        }
        tracing::info!(
            "{}: [{}] (retained)",
            control_topic(&device.name, &control.name),
            control.value
        );
        if !control.readonly {
            tracing::info!(
                "subscribe: {}",
                control_on_topic(&device.name, &control.name)
            );
        }
    }

    fn on_value(&mut self, device: &DeviceInfo, control: &str, value: &str) {
        tracing::info!("{}: [{}] (retained)", control_topic(&device.name, control), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_shapes() {
        assert_eq!(
            control_topic("zonebeast011c", "Channel 1"),
            "/devices/zonebeast011c/controls/Channel 1"
        );
        assert_eq!(
            control_meta_topic("ddp0114", "Page1Button2", "type"),
            "/devices/ddp0114/controls/Page1Button2/meta/type"
        );
        assert_eq!(
            control_on_topic("ddp0114", "Page1Button2"),
            "/devices/ddp0114/controls/Page1Button2/on"
        );
        assert_eq!(
            device_meta_topic("sbusvrelay", "name"),
            "/devices/sbusvrelay/meta/name"
        );
    }

    #[test]
    fn test_parse_on_topic() {
        assert_eq!(
            parse_control_on_topic("/devices/ddp0114/controls/Page1Button2/on"),
            Some(("ddp0114", "Page1Button2"))
        );
        assert_eq!(
            parse_control_on_topic("/devices/zonebeast011c/controls/Channel 2/on"),
            Some(("zonebeast011c", "Channel 2"))
        );
        assert_eq!(parse_control_on_topic("/devices/x/controls/y"), None);
        assert_eq!(parse_control_on_topic("/devices/x/meta/name"), None);
        assert_eq!(parse_control_on_topic("/devices//controls/y/on"), None);
        assert_eq!(parse_control_on_topic("nonsense"), None);
    }
}
