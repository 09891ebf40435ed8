//! # Device Model
//!
//! In-memory view of the LED strips reachable through the bus.
//!
//! ```text
//! device/
//! ├── color.rs     - Rgb value and its #rrggbb text form
//! ├── strip.rs     - Device state, online flag with change callback
//! └── registry.rs  - DeviceRegistry, discovery order and selected cursor
//! ```
//!
//! The registry is the single owner of [`Device`] values. Everything outside the
//! bridge works with ids and [`DeviceSnapshot`] copies instead of holding devices.

pub mod color;
pub mod registry;
pub mod strip;

pub use color::Rgb;
pub use registry::{DeviceRegistry, RegistryError};
pub use strip::{Device, DeviceSnapshot, OnlineChangeEvent};
