//! # smartbus-bridge
//!
//! Bridge between an HDL-Buspro ("Smartbus") fieldbus and a pub/sub
//! building-automation broker. The bridge discovers devices on the bus,
//! mirrors each one as a set of named, typed controls, translates broker
//! writes into bus commands and mirrors bus broadcasts back.
//!
//! ## Architecture
//!
//! - **Frame layer** (`protocol`): preamble sync, length and CRC-16
//!   validation over serial/TCP streams and UDP broadcast datagrams, with
//!   an optional gateway forwarding raw frames between the two.
//! - **Packet codec** (`message`): typed messages, one codec entry per
//!   opcode.
//! - **Connection / endpoint** (`connection`, `endpoint`): reader fan-out
//!   to observers and sniffers, per-remote-device command handles.
//! - **Request queue** (`queue`): single-flight command pipeline with
//!   per-attempt timeout and bounded retries, matching responses by
//!   opcode.
//! - **Device models** (`model`): zone/relay controllers, DDP panels and
//!   the local virtual relay device, driven from a single-writer loop
//!   (`driver`).
//!
//! ## Example
//!
//! ```ignore
//! use smartbus_bridge::{Bridge, BridgeConfig};
//! use smartbus_bridge::broker::TopicLogger;
//!
//! #[tokio::main]
//! async fn main() -> smartbus_bridge::Result<()> {
//!     let config = BridgeConfig {
//!         address: "tcp://192.168.1.250:6001".into(),
//!         ..BridgeConfig::default()
//!     };
//!     let bridge = Bridge::start(config, Box::new(TopicLogger::new())).await?;
//!     bridge.run().await
//! }
//! ```

pub mod broker;
pub mod connection;
pub mod driver;
pub mod dump;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod model;
pub mod protocol;
pub mod queue;
pub mod transport;

pub use driver::{connect, Bridge, BridgeConfig, DriverHandle};
pub use error::{BridgeError, Result};
