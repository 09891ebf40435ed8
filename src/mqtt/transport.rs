//! The seam between the bridge and a publish/subscribe client.

use async_trait::async_trait;
use std::sync::Weak;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection refused: {0}")]
    Refused(String),

    #[error("Connection timed out")]
    Timeout,

    #[error("Not connected to a broker")]
    NotConnected,

    #[error("Client request failed: {0}")]
    Client(String),

    #[error("Transport error: {0}")]
    Other(String),
}

/// Receives the four callbacks a transport delivers from its I/O loop.
#[async_trait]
pub trait TransportListener: Send + Sync {
    async fn on_connect(&self, code: u8);

    async fn on_message(&self, topic: String, payload: Vec<u8>);

    async fn on_publish(&self, message_id: u16);

    async fn on_disconnect(&self, code: u8);
}

/// A message-bus client with connect/publish/subscribe and a background loop.
///
/// `connect` both connects and starts the I/O loop; `disconnect` stops the loop
/// and disconnects. After a successful `connect` the transport calls
/// [`TransportListener::on_connect`] once and, when the loop ends for any reason,
/// [`TransportListener::on_disconnect`] once.
#[async_trait]
pub trait Transport: Send + Sync {
    fn set_credentials(&self, username: &str, password: &str);

    fn set_listener(&self, listener: Weak<dyn TransportListener>);

    async fn connect(&self, address: &str, port: u16) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn subscribe(&self, topic_pattern: &str) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}
