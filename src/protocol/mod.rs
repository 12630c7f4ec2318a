//! Smartbus frame layer: envelope format, checksum and stream framing.

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, RawFrame};
pub use frame_buffer::FrameScanner;
pub use wire_format::{
    crc16, MessageHeader, BROADCAST_DEVICE, BROADCAST_SUBNET, CRC_SIZE, HEADER_SIZE,
    MAX_PAYLOAD_SIZE, MIN_FRAME_LENGTH, SYNC,
};
