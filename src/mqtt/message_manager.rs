use chrono::NaiveDateTime;
use std::fmt;

const PREVIEW_LEN: usize = 48;

/// One message as it crossed the bus, stamped with local time.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MQTTMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
    pub timestamp: NaiveDateTime,
}

impl fmt::Display for MQTTMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} - {}: {}", self.timestamp, self.topic, self.preview())?;
        if self.retain {
            write!(f, " (retained)")?;
        }
        Ok(())
    }
}

impl MQTTMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        MQTTMessage {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
            timestamp: chrono::Local::now().naive_local(),
        }
    }

    pub fn retained(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    fn content(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// First characters of the payload, for single-line log output.
    pub fn preview(&self) -> String {
        if self.payload.is_empty() {
            return "<empty>".to_string();
        }
        let content = self.content();
        match content.char_indices().nth(PREVIEW_LEN) {
            Some((cut, _)) => format!("{}...", &content[..cut]),
            None => content,
        }
    }
}
