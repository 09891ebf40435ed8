use thiserror::Error;

use crate::device::RegistryError;
use crate::mqtt::{CodecError, TransportError};

/// Errors returned by the bridge command API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Broker settings may only change while disconnected
    #[error("Broker settings can only be changed while disconnected")]
    SettingsLocked,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Outcome of a failed `connect`. The `Display` text is the status line shown
/// to the user.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("MQTT connection refused")]
    Refused,

    #[error("MQTT connection timed out")]
    Timeout,

    #[error("MQTT connection error: {0}")]
    Other(String),

    #[error("Already connected to MQTT broker")]
    AlreadyConnected,
}

impl From<TransportError> for ConnectError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Refused(_) => ConnectError::Refused,
            TransportError::Timeout => ConnectError::Timeout,
            other => ConnectError::Other(other.to_string()),
        }
    }
}
