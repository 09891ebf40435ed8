//! Rotating-color demonstration sequence.
//!
//! Frame generation is pure and deterministic; [`play`] paces the frames and
//! stops at the next delay once its token is cancelled.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::controller::BridgeController;
use super::error::BridgeError;
use crate::device::Rgb;

pub const ANIMATION_PALETTE: [&str; 6] = [
    "#ff0000", "#00ff00", "#0000ff", "#ffff00", "#800080", "#00ffff",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationSettings {
    pub step_delay_ms: u64,
    pub rotations: usize,
}

impl Default for AnimationSettings {
    fn default() -> Self {
        Self {
            step_delay_ms: 100,
            rotations: 3,
        }
    }
}

impl AnimationSettings {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

/// Full light state to show, and how long to hold it before the next frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub lights: Vec<Rgb>,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationOutcome {
    Completed,
    Cancelled,
}

/// Builds the frames of the two patterns followed by one all-off frame.
///
/// Traveling light: per rotation, each LED lights up alone in its palette color.
/// Ring flash: per rotation, the ring fills one LED at a time with that
/// rotation's color, then empties one LED at a time.
pub fn animation_frames(
    led_count: usize,
    palette: &[Rgb],
    rotations: usize,
    step: Duration,
) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut lights = vec![Rgb::OFF; led_count];

    if !palette.is_empty() {
        for _ in 0..rotations {
            for current in 0..led_count {
                lights.fill(Rgb::OFF);
                lights[current] = palette[current % palette.len()];
                frames.push(Frame {
                    lights: lights.clone(),
                    delay: step,
                });
            }
        }

        for rotation in 0..rotations {
            let color = palette[rotation % palette.len()];
            for current in 0..led_count {
                lights[current] = color;
                frames.push(Frame {
                    lights: lights.clone(),
                    delay: step,
                });
            }
            for current in 0..led_count {
                lights[current] = Rgb::OFF;
                frames.push(Frame {
                    lights: lights.clone(),
                    delay: step,
                });
            }
        }
    }

    frames.push(Frame {
        lights: vec![Rgb::OFF; led_count],
        delay: Duration::ZERO,
    });
    frames
}

/// Sleeps for `delay` unless the token fires first. Returns `false` if cancelled.
pub(crate) async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Applies and sends each frame in turn.
pub(crate) async fn play(
    bridge: &BridgeController,
    device_id: &str,
    frames: &[Frame],
    cancel: &CancellationToken,
) -> Result<AnimationOutcome, BridgeError> {
    info!("Starting animation on {} ({} frames)", device_id, frames.len());

    for (step, frame) in frames.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("Animation on {} cancelled at frame {}", device_id, step);
            return Ok(AnimationOutcome::Cancelled);
        }

        bridge.apply_frame(device_id, &frame.lights).await?;
        bridge.send_color(device_id).await?;

        if !pause(cancel, frame.delay).await {
            info!("Animation on {} cancelled at frame {}", device_id, step);
            return Ok(AnimationOutcome::Cancelled);
        }
        debug!("Animation frame {} sent to {}", step, device_id);
    }

    info!("Animation on {} finished", device_id);
    Ok(AnimationOutcome::Completed)
}
