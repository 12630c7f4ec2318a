//! Error types for smartbus-bridge.

use thiserror::Error;

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error on a transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port setup error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Malformed frame (bad preamble, bad length, CRC mismatch).
    #[error("framing error: {0}")]
    Frame(String),

    /// Payload of a known opcode could not be decoded.
    #[error("cannot decode payload of opcode {opcode:#06x}: {reason}")]
    Decode { opcode: u16, reason: String },

    /// The request queue is full; the request was dropped.
    #[error("request queue overflow")]
    QueueOverflow,

    /// The underlying transport is closed.
    #[error("transport closed")]
    TransportClosed,

    /// The transport address could not be understood.
    #[error("invalid transport address: {0}")]
    Address(String),

    /// Invalid combination of configuration options.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
