//! # MQTT Integration Module
//!
//! Everything that touches the message bus: the wire format, the transport seam
//! and the `rumqttc` client behind it.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker endpoint, credentials and client tuning
//! ├── codec.rs            - Topic scheme, status/last-will decoding, command encoding
//! ├── message_manager.rs  - Timestamped message value used for traffic logging
//! ├── transport.rs        - Transport / TransportListener traits
//! └── mqtt_handler.rs     - rumqttc implementation of Transport
//! ```
//!
//! ## Topic Scheme
//!
//! ```text
//! lightstrips/cmd                 broadcast command (only ever cleared)
//! lightstrips/<id>/cmd            per-device command, JSON
//! lightstrips/<id>/sts            per-device status, JSON, subscribed via +
//! lightstrips/<id>/last-will      "online" / "offline", subscribed via +
//! ```
//!
//! The bridge only depends on [`transport::Transport`]; tests swap the real
//! client for an in-memory one.

pub mod codec;
pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
pub mod transport;

pub use codec::{CodecError, MessageKind, OnlineState, StatusUpdate};
pub use config::{MQTTServer, MqttConfig};
pub use message_manager::MQTTMessage;
pub use mqtt_handler::MqttHandler;
pub use transport::{Transport, TransportError, TransportListener};
