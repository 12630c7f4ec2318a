//! A validated, fully framed Smartbus packet.
//!
//! [`RawFrame`] wraps the complete on-wire bytes (sync preamble through
//! CRC) behind `bytes::Bytes` so the gateway can forward frames verbatim
//! and the codec can borrow the body without copying.

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{
    crc16, MessageHeader, CRC_SIZE, HEADER_SIZE, MAX_PAYLOAD_SIZE, MIN_FRAME_LENGTH, SYNC,
};
use crate::error::{BridgeError, Result};

/// A complete frame whose length and CRC have been verified.
///
/// The only way to obtain one is [`build_frame`] or the stream scanner, so
/// downstream code can rely on the envelope invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame(Bytes);

impl RawFrame {
    /// Wrap bytes that are already known to hold a valid frame.
    ///
    /// Callers outside this module go through [`RawFrame::parse`] instead.
    pub(crate) fn from_verified(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Validate `bytes` as one complete frame.
    pub fn parse(bytes: Bytes) -> Result<Self> {
        if bytes.len() < SYNC.len() + 1 + MIN_FRAME_LENGTH {
            return Err(BridgeError::Frame(format!(
                "frame too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[..2] != SYNC {
            return Err(BridgeError::Frame("missing sync preamble".into()));
        }
        let length = bytes[2] as usize;
        if length < MIN_FRAME_LENGTH || bytes.len() != SYNC.len() + 1 + length {
            return Err(BridgeError::Frame(format!(
                "length byte {} does not match frame of {} bytes",
                length,
                bytes.len()
            )));
        }
        let checked = &bytes[2..bytes.len() - CRC_SIZE];
        let stored = u16::from_be_bytes([bytes[bytes.len() - 2], bytes[bytes.len() - 1]]);
        if crc16(checked) != stored {
            return Err(BridgeError::Frame("CRC mismatch".into()));
        }
        Ok(Self(bytes))
    }

    /// The complete on-wire bytes, preamble and CRC included.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Cheap clone of the on-wire bytes for verbatim re-emission.
    #[inline]
    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }

    /// The body covered by the length byte, without length and CRC:
    /// header, opcode and payload.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.0[3..self.0.len() - CRC_SIZE]
    }

    /// Addressing header and opcode of this frame.
    pub fn header(&self) -> Result<(MessageHeader, u16)> {
        MessageHeader::decode(self.body())
    }

    /// Opcode-specific payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.body()[HEADER_SIZE..]
    }
}

/// Assemble a frame from header, opcode and payload bytes.
///
/// Computes the length byte and the CRC. Fails when the payload exceeds
/// what the one-byte length field can express.
pub fn build_frame(header: &MessageHeader, opcode: u16, payload: &[u8]) -> Result<RawFrame> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(BridgeError::Frame(format!(
            "payload of {} bytes exceeds maximum {}",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }
    let length = MIN_FRAME_LENGTH + payload.len();
    let mut buf = BytesMut::with_capacity(SYNC.len() + 1 + length);
    buf.put_slice(&SYNC);
    buf.put_u8(length as u8);
    buf.put_slice(&header.encode(opcode));
    buf.put_slice(payload);
    let crc = crc16(&buf[2..]);
    buf.put_u16(crc);
    Ok(RawFrame(buf.freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> MessageHeader {
        MessageHeader::new((0x01, 0x14, 0x0095), (0x03, 0xFE))
    }

    #[test]
    fn test_build_and_parse_roundtrip() {
        let frame = build_frame(&sample_header(), 0x0031, &[0x02, 0x64, 0x00, 0x00]).unwrap();
        let parsed = RawFrame::parse(frame.to_bytes()).unwrap();
        let (header, opcode) = parsed.header().unwrap();
        assert_eq!(header, sample_header());
        assert_eq!(opcode, 0x0031);
        assert_eq!(parsed.payload(), &[0x02, 0x64, 0x00, 0x00]);
    }

    #[test]
    fn test_build_frame_envelope_bytes() {
        let frame = build_frame(&sample_header(), 0x0031, &[]).unwrap();
        let bytes = frame.as_bytes();
        assert_eq!(&bytes[..2], &SYNC);
        assert_eq!(bytes[2] as usize, MIN_FRAME_LENGTH);
        assert_eq!(bytes.len(), 2 + 1 + MIN_FRAME_LENGTH);
        // Trailing CRC matches a recomputation over length byte + body.
        let crc = crc16(&bytes[2..bytes.len() - 2]);
        assert_eq!(
            crc,
            u16::from_be_bytes([bytes[bytes.len() - 2], bytes[bytes.len() - 1]])
        );
    }

    #[test]
    fn test_parse_rejects_corrupted_crc() {
        let frame = build_frame(&sample_header(), 0x0031, &[0x01]).unwrap();
        let mut bytes = frame.as_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01; // single bit flip in the CRC
        let result = RawFrame::parse(Bytes::from(bytes));
        assert!(matches!(result, Err(BridgeError::Frame(_))));
    }

    #[test]
    fn test_parse_rejects_bad_preamble() {
        let frame = build_frame(&sample_header(), 0x0031, &[]).unwrap();
        let mut bytes = frame.as_bytes().to_vec();
        bytes[0] = 0xAB;
        assert!(RawFrame::parse(Bytes::from(bytes)).is_err());
    }

    #[test]
    fn test_parse_rejects_truncated_frame() {
        let frame = build_frame(&sample_header(), 0x0031, &[0x01, 0x02]).unwrap();
        let bytes = frame.to_bytes().slice(..frame.as_bytes().len() - 1);
        assert!(RawFrame::parse(bytes).is_err());
    }

    #[test]
    fn test_build_frame_payload_too_large() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(build_frame(&sample_header(), 0x0031, &payload).is_err());
    }
}
