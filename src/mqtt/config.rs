use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Broker endpoint and credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MQTTServer {
    /// Host name or IP of the broker, e.g. `mqtt_broker` or `172.17.0.1`
    pub address: String,
    pub port: u16,
    pub user: String,
    pub pw: String,
}

impl Default for MQTTServer {
    fn default() -> Self {
        Self {
            address: "mqtt_broker".to_string(),
            port: DEFAULT_BROKER_PORT,
            user: "ui".to_string(),
            pw: "password".to_string(),
        }
    }
}

impl fmt::Display for MQTTServer {
    /// `user@address:port`, never the password.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.address, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub server: MQTTServer,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Upper bound for the broker's CONNACK after a connect request
    pub connect_timeout_ms: u64,
    /// Capacity of the request queue between client handle and event loop
    pub channel_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            server: MQTTServer::default(),
            client_id: "lightstrip-controller".to_string(),
            keep_alive_secs: 5,
            connect_timeout_ms: 5000,
            channel_capacity: 100,
        }
    }
}

impl MqttConfig {
    /// Keep-alive interval, never below 5 seconds.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(5))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_hides_password() {
        let server = MQTTServer {
            address: "10.0.0.2".to_string(),
            port: 1884,
            user: "ui".to_string(),
            pw: "secret".to_string(),
        };
        assert_eq!(server.to_string(), "ui@10.0.0.2:1884");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: MqttConfig = toml::from_str(
            r#"
            client_id = "panel"

            [server]
            address = "192.168.1.10"
            "#,
        )
        .unwrap();

        assert_eq!(config.client_id, "panel");
        assert_eq!(config.server.address, "192.168.1.10");
        assert_eq!(config.server.port, DEFAULT_BROKER_PORT);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }
}
