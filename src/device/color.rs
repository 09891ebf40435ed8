use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::mqtt::codec::CodecError;

/// A 24-bit color as it travels on the bus: one byte per channel.
///
/// The textual form used by presentation code is `#rrggbb`. [`fmt::Display`]
/// always writes lowercase hex; [`FromStr`] accepts either case.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }
}

impl FromStr for Rgb {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix('#')
            .ok_or_else(|| CodecError::InvalidColor(s.to_string()))?;

        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CodecError::InvalidColor(s.to_string()));
        }

        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| CodecError::InvalidColor(s.to_string()))
        };

        Ok(Rgb::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

/// Parses a fixed palette written as `#rrggbb` literals.
///
/// Used for the compile-time palettes of the probe and the animation, where a
/// bad literal is a programming error caught by the unit tests.
pub(crate) fn palette(colors: &[&str]) -> Vec<Rgb> {
    colors.iter().filter_map(|c| c.parse().ok()).collect()
}
