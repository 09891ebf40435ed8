//! # Bridge Module
//!
//! Connects the device registry to the message bus and exposes the command API
//! used by presentation code.
//!
//! ## Module Architecture
//!
//! ```text
//! bridge/
//! ├── controller.rs  - BridgeController: connection lifecycle, inbound dispatch, commands
//! ├── events.rs      - BridgeEvent stream, ConnectionState, traffic counters
//! ├── error.rs       - BridgeError and ConnectError
//! ├── probe.rs       - Round-trip latency probe (statum state machine)
//! └── animation.rs   - Rotating-color demonstration frames and their runner
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! broker ──► Transport ──► TransportListener (BridgeController)
//!                                  │
//!                                  ├──► DeviceRegistry (tokio RwLock)
//!                                  └──► broadcast<BridgeEvent> ──► observers
//!
//! observers ──► command API ──► encode ──► Transport::publish ──► broker
//! ```
//!
//! Animation and probe runs share one cancellation slot: starting one cancels
//! the other, and a disconnect cancels both.

pub mod animation;
pub mod controller;
pub mod error;
pub mod events;
pub mod probe;


pub use animation::{AnimationOutcome, AnimationSettings};
pub use controller::{BridgeController, BridgeSettings};
pub use error::{BridgeError, ConnectError};
pub use events::{BridgeEvent, ConnectionState, MQTTStatus};
pub use probe::{ProbeError, ProbeReport, ProbeSettings};
