//! Topic and payload translation between the bus and the device model.
//!
//! Everything here is pure: no I/O, no locking, no logging of state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::device::{Device, Rgb};

pub const TOPIC_ROOT: &str = "lightstrips";
pub const STATUS_KIND: &str = "sts";
pub const LAST_WILL_KIND: &str = "last-will";
pub const COMMAND_KIND: &str = "cmd";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error("Invalid LED index: {0}")]
    InvalidIndex(String),

    #[error("Last will message not recognized: {0:?}")]
    UnknownLastWill(String),

    #[error("Invalid color: {0:?}")]
    InvalidColor(String),
}

/// What a per-device topic carries, taken from its last segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Status,
    LastWill,
    Command,
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineState {
    Online,
    Offline,
}

impl OnlineState {
    pub fn is_online(self) -> bool {
        self == OnlineState::Online
    }
}

/// Decoded status report: how many LEDs the device claims and their colors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub led_count: usize,
    pub lights: Vec<(usize, Rgb)>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChannelPayload {
    #[serde(default)]
    red: u8,
    #[serde(default)]
    green: u8,
    #[serde(default)]
    blue: u8,
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    #[serde(default)]
    lights: BTreeMap<String, ChannelPayload>,
}

#[derive(Debug, Serialize)]
struct CommandPayload<'a> {
    #[serde(rename = "device-id")]
    device_id: &'a str,
    lights: BTreeMap<String, ChannelPayload>,
}

pub fn broadcast_command_topic() -> String {
    format!("{}/{}", TOPIC_ROOT, COMMAND_KIND)
}

pub fn command_topic(device_id: &str) -> String {
    format!("{}/{}/{}", TOPIC_ROOT, device_id, COMMAND_KIND)
}

pub fn status_topic(device_id: &str) -> String {
    format!("{}/{}/{}", TOPIC_ROOT, device_id, STATUS_KIND)
}

pub fn last_will_topic(device_id: &str) -> String {
    format!("{}/{}/{}", TOPIC_ROOT, device_id, LAST_WILL_KIND)
}

pub fn status_subscription() -> String {
    status_topic("+")
}

pub fn last_will_subscription() -> String {
    last_will_topic("+")
}

/// Splits `lightstrips/<device-id>/<kind>` into its device id and kind.
pub fn parse_topic(topic: &str) -> Result<(String, MessageKind), CodecError> {
    let parts: Vec<&str> = topic.split('/').collect();

    match parts.as_slice() {
        [root, device_id, kind] if *root == TOPIC_ROOT && !device_id.is_empty() => {
            let kind = match *kind {
                STATUS_KIND => MessageKind::Status,
                LAST_WILL_KIND => MessageKind::LastWill,
                COMMAND_KIND => MessageKind::Command,
                other => MessageKind::Unknown(other.to_string()),
            };
            Ok((device_id.to_string(), kind))
        }
        _ => Err(CodecError::InvalidTopic(topic.to_string())),
    }
}

/// Decodes a status payload. The LED count is the number of entries reported.
pub fn decode_status(payload: &[u8]) -> Result<StatusUpdate, CodecError> {
    let text = std::str::from_utf8(payload).map_err(|_| CodecError::InvalidUtf8)?;
    let status: StatusPayload =
        serde_json::from_str(text).map_err(|e| CodecError::InvalidJson(e.to_string()))?;

    let led_count = status.lights.len();
    let mut lights = status
        .lights
        .into_iter()
        .map(|(index, channels)| {
            let index = index
                .trim()
                .parse::<usize>()
                .map_err(|_| CodecError::InvalidIndex(index.clone()))?;
            Ok((index, Rgb::new(channels.red, channels.green, channels.blue)))
        })
        .collect::<Result<Vec<_>, CodecError>>()?;
    lights.sort_by_key(|(index, _)| *index);

    Ok(StatusUpdate { led_count, lights })
}

/// Builds the command payload for every light of `device`.
///
/// Lights that were never set are sent as off.
pub fn encode_command(device: &Device) -> Result<String, CodecError> {
    let lights = device
        .lights()
        .iter()
        .enumerate()
        .map(|(index, light)| {
            let color = light.unwrap_or(Rgb::OFF);
            (
                index.to_string(),
                ChannelPayload {
                    red: color.red,
                    green: color.green,
                    blue: color.blue,
                },
            )
        })
        .collect();

    let payload = CommandPayload {
        device_id: device.id(),
        lights,
    };
    serde_json::to_string(&payload).map_err(|e| CodecError::InvalidJson(e.to_string()))
}

pub fn decode_last_will(payload: &[u8]) -> Result<OnlineState, CodecError> {
    let text = std::str::from_utf8(payload).map_err(|_| CodecError::InvalidUtf8)?;

    match text.trim() {
        "online" => Ok(OnlineState::Online),
        "offline" => Ok(OnlineState::Offline),
        other => Err(CodecError::UnknownLastWill(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_topics() {
        assert_eq!(broadcast_command_topic(), "lightstrips/cmd");
        assert_eq!(command_topic("devA"), "lightstrips/devA/cmd");
        assert_eq!(status_subscription(), "lightstrips/+/sts");
        assert_eq!(last_will_subscription(), "lightstrips/+/last-will");
    }

    #[test]
    fn test_parse_topic() {
        assert_eq!(
            parse_topic("lightstrips/devA/sts").unwrap(),
            ("devA".to_string(), MessageKind::Status)
        );
        assert_eq!(
            parse_topic("lightstrips/devA/last-will").unwrap(),
            ("devA".to_string(), MessageKind::LastWill)
        );
        assert_eq!(
            parse_topic("lightstrips/devA/telemetry").unwrap(),
            ("devA".to_string(), MessageKind::Unknown("telemetry".to_string()))
        );
    }

    #[test]
    fn test_parse_topic_rejects_foreign_shapes() {
        for topic in [
            "lightstrips/cmd",
            "lightstrips//sts",
            "other/devA/sts",
            "lightstrips/devA/sts/extra",
            "",
        ] {
            assert!(parse_topic(topic).is_err(), "{topic:?} should not parse");
        }
    }

    #[test]
    fn test_decode_two_light_status() {
        let payload = br#"{"lights":{"0":{"red":255,"green":0,"blue":0},"1":{"red":0,"green":255,"blue":0}}}"#;
        let update = decode_status(payload).unwrap();

        assert_eq!(update.led_count, 2);
        assert_eq!(update.lights[0], (0, "#ff0000".parse().unwrap()));
        assert_eq!(update.lights[1], (1, "#00ff00".parse().unwrap()));
    }

    #[test]
    fn test_decode_status_defaults_missing_channels() {
        let update = decode_status(br#"{"lights":{"0":{"blue":7}}}"#).unwrap();
        assert_eq!(update.lights, vec![(0, Rgb::new(0, 0, 7))]);
    }

    #[test]
    fn test_decode_status_sorts_numerically() {
        let payload = json!({
            "lights": {
                "10": {"red": 10}, "2": {"red": 2}, "0": {"red": 0},
                "1": {}, "3": {}, "4": {}, "5": {}, "6": {}, "7": {}, "8": {}, "9": {}
            }
        });
        let update = decode_status(payload.to_string().as_bytes()).unwrap();

        assert_eq!(update.led_count, 11);
        let indices: Vec<_> = update.lights.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, (0..11).collect::<Vec<_>>());
    }

    #[test]
    fn test_decode_status_without_lights_is_empty() {
        let update = decode_status(b"{}").unwrap();
        assert_eq!(update.led_count, 0);
        assert!(update.lights.is_empty());
    }

    #[test]
    fn test_decode_status_errors() {
        assert_eq!(decode_status(&[0xff, 0xfe]), Err(CodecError::InvalidUtf8));
        assert!(matches!(
            decode_status(b"not json"),
            Err(CodecError::InvalidJson(_))
        ));
        assert!(matches!(decode_status(b""), Err(CodecError::InvalidJson(_))));
        assert!(matches!(
            decode_status(br#"{"lights":{"0":{"red":256}}}"#),
            Err(CodecError::InvalidJson(_))
        ));
        assert!(matches!(
            decode_status(br#"{"lights":{"first":{"red":1}}}"#),
            Err(CodecError::InvalidIndex(_))
        ));
    }

    #[test]
    fn test_encode_command_shape() {
        let mut device = Device::new("devA", 3);
        device.update_light(0, Rgb::new(255, 0, 0));
        device.update_light(1, Rgb::new(0, 128, 255));

        let payload: Value = serde_json::from_str(&encode_command(&device).unwrap()).unwrap();
        assert_eq!(
            payload,
            json!({
                "device-id": "devA",
                "lights": {
                    "0": {"red": 255, "green": 0, "blue": 0},
                    "1": {"red": 0, "green": 128, "blue": 255},
                    "2": {"red": 0, "green": 0, "blue": 0}
                }
            })
        );
    }

    #[test]
    fn test_command_decodes_as_status_for_every_channel_value() {
        let mut device = Device::new("devA", 1);
        for v in 0..=255u8 {
            let color = Rgb::new(v, v.wrapping_mul(7), 255 - v);
            device.update_light(0, color);

            let payload = encode_command(&device).unwrap();
            let update = decode_status(payload.as_bytes()).unwrap();
            assert_eq!(update.led_count, 1);
            assert_eq!(update.lights, vec![(0, color)]);
        }
    }

    #[test]
    fn test_decode_last_will() {
        assert_eq!(decode_last_will(b"online"), Ok(OnlineState::Online));
        assert_eq!(decode_last_will(b"offline\n"), Ok(OnlineState::Offline));
        assert_eq!(
            decode_last_will(b"unknown"),
            Err(CodecError::UnknownLastWill("unknown".to_string()))
        );
        assert!(decode_last_will(b"Online").is_err());
    }
}
