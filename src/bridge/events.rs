use chrono::{DateTime, Local};

/// Lifecycle of the broker connection.
///
/// ```text
/// Disconnected ──► Connecting ──► Connected ──► Disconnected
///                      │                             ▲
///                      └──────── (failure) ──────────┘
/// ```
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Change notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    DeviceAdded { device_id: String },
    OnlineChanged { device_id: String, online: bool },
    LedCountChanged { device_id: String, led_count: usize },
    LightsChanged { device_id: String },
    ConnectionChanged(ConnectionState),
    /// Human-readable connection status line
    Status(String),
}

impl BridgeEvent {
    pub fn device_id(&self) -> Option<&str> {
        match self {
            BridgeEvent::DeviceAdded { device_id }
            | BridgeEvent::OnlineChanged { device_id, .. }
            | BridgeEvent::LedCountChanged { device_id, .. }
            | BridgeEvent::LightsChanged { device_id } => Some(device_id),
            BridgeEvent::ConnectionChanged(_) | BridgeEvent::Status(_) => None,
        }
    }
}

/// Traffic counters and the last status line.
#[derive(Clone, Debug, Default)]
pub struct MQTTStatus {
    pub connection_state: ConnectionState,
    pub status_line: String,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<DateTime<Local>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_device_id() {
        let event = BridgeEvent::LedCountChanged {
            device_id: "devA".to_string(),
            led_count: 3,
        };
        assert_eq!(event.device_id(), Some("devA"));
        assert_eq!(
            BridgeEvent::ConnectionChanged(ConnectionState::Connected).device_id(),
            None
        );
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
