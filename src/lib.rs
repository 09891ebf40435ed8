//! Desktop-side controller for networked LED strips.
//!
//! Strips report their state on `lightstrips/<id>/sts`, announce presence on
//! `lightstrips/<id>/last-will` and take color commands on `lightstrips/<id>/cmd`.
//! [`bridge::BridgeController`] keeps a [`device::DeviceRegistry`] in sync with
//! that traffic and offers the command API a user interface drives.

pub mod bridge;
pub mod config;
pub mod demo;
pub mod device;
pub mod mqtt;
