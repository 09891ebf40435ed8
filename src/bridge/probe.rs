//! Round-trip latency probe.
//!
//! Each cycle lights one LED with the next palette color, publishes the command
//! and waits for the device's status echo to show that color. The probe is a
//! statum machine:
//!
//! ```text
//! Preparing ──prepare()──► Measuring ──measure()──► Finished ──finish()──► ProbeReport
//! ```
//!
//! `measure()` always reaches `Finished`, so the LEDs are switched off again even
//! when a cycle fails.

use serde::{Deserialize, Serialize};
use statum::{machine, state};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::animation::pause;
use super::controller::BridgeController;
use super::error::BridgeError;
use super::events::{BridgeEvent, ConnectionState};
use crate::device::color::palette;
use crate::device::Rgb;

pub const PROBE_PALETTE: [&str; 8] = [
    "#ff0000", "#00ff00", "#0000ff", "#ffff00", "#800080", "#00ffff", "#ff00ff", "#ffffff",
];

pub const MAX_CYCLES: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub cycles: usize,
    pub cycle_timeout_ms: u64,
    pub settle_delay_ms: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            cycles: 100,
            cycle_timeout_ms: 5000,
            settle_delay_ms: 1000,
        }
    }
}

impl ProbeSettings {
    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Performance probe is disabled")]
    Disabled,

    #[error("Cycle count must be between 1 and 10000, got {0}")]
    InvalidCycles(usize),

    #[error("Device {0} has no lights")]
    NoLights(String),

    #[error("Not connected to MQTT broker")]
    NotConnected,

    #[error("No echo from {device_id} for LED {led} in cycle {cycle} after {waited:?}")]
    EchoTimeout {
        device_id: String,
        cycle: usize,
        led: usize,
        waited: Duration,
    },

    #[error("Connection lost while probing {0}")]
    Disconnected(String),

    #[error("Performance probe cancelled")]
    Cancelled,

    #[error("Performance probe finished without samples")]
    NoSamples,

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// What `prepare()` found out about the device.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    led_count: usize,
}

#[derive(Debug, Clone)]
pub struct ProbeSamples {
    led_count: usize,
    durations: Vec<Duration>,
    failure: Option<ProbeError>,
}

#[state]
#[derive(Debug, Clone)]
pub enum ProbeState {
    Preparing,
    Measuring(ProbeTarget),
    Finished(ProbeSamples),
}

#[machine]
pub struct PerformanceProbe<S: ProbeState> {
    bridge: Arc<BridgeController>,
    device_id: String,
    cycles: usize,
    settings: ProbeSettings,
    cancel: CancellationToken,
}

impl<S: ProbeState> PerformanceProbe<S> {
    /// Best effort: a failure here is logged, the run's own outcome wins.
    async fn restore_lights(&self) {
        match self.bridge.set_all_lights(&self.device_id, Rgb::OFF).await {
            Ok(()) => debug!("Switched off all LEDs of {}", self.device_id),
            Err(e) => warn!("Could not switch off LEDs of {}: {}", self.device_id, e),
        }
    }
}

impl PerformanceProbe<Preparing> {
    pub fn create(
        bridge: Arc<BridgeController>,
        device_id: &str,
        cycles: usize,
        settings: ProbeSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(bridge, device_id.to_string(), cycles, settings, cancel)
    }

    /// Validates the run and switches every LED off.
    pub async fn prepare(self) -> Result<PerformanceProbe<Measuring>, ProbeError> {
        if !(1..=MAX_CYCLES).contains(&self.cycles) {
            return Err(ProbeError::InvalidCycles(self.cycles));
        }
        if self.bridge.connection_state() != ConnectionState::Connected {
            return Err(ProbeError::NotConnected);
        }

        let led_count = self
            .bridge
            .device(&self.device_id)
            .await
            .ok_or_else(|| BridgeError::UnknownDevice(self.device_id.clone()))?
            .led_count;
        if led_count == 0 {
            return Err(ProbeError::NoLights(self.device_id.clone()));
        }

        info!(
            "Starting performance probe on {} ({} LEDs, {} cycles)",
            self.device_id, led_count, self.cycles
        );
        self.bridge.set_all_lights(&self.device_id, Rgb::OFF).await?;

        if !pause(&self.cancel, self.settings.settle_delay()).await {
            return Err(ProbeError::Cancelled);
        }

        Ok(self.transition_with(ProbeTarget { led_count }))
    }
}

impl PerformanceProbe<Measuring> {
    /// Runs the cycles. Stops at the first failed cycle and keeps what was
    /// measured until then.
    pub async fn measure(self) -> PerformanceProbe<Finished> {
        let led_count = self
            .get_state_data()
            .map(|target| target.led_count)
            .unwrap_or_default();
        let colors = palette(&PROBE_PALETTE);

        let mut durations = Vec::with_capacity(self.cycles);
        let mut failure = None;

        if led_count == 0 || colors.is_empty() {
            failure = Some(ProbeError::NoLights(self.device_id.clone()));
        } else {
            for cycle in 0..self.cycles {
                let color = colors[cycle % colors.len()];
                let led = cycle % led_count;

                match self.run_cycle(cycle, led, color).await {
                    Ok(elapsed) => {
                        debug!("Cycle {} (LED {}, {}) took {:?}", cycle, led, color, elapsed);
                        durations.push(elapsed);
                    }
                    Err(e) => {
                        warn!("Performance probe stopped in cycle {}: {}", cycle, e);
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        self.transition_with(ProbeSamples {
            led_count,
            durations,
            failure,
        })
    }

    async fn run_cycle(&self, cycle: usize, led: usize, color: Rgb) -> Result<Duration, ProbeError> {
        if self.cancel.is_cancelled() {
            return Err(self.interruption());
        }

        // Subscribe before publishing so the echo can't slip past
        let mut events = self.bridge.subscribe();
        let (payload, retain) = self
            .bridge
            .stage_probe_command(&self.device_id, led, color)
            .await?;

        let started = Instant::now();
        let deadline = started + self.settings.cycle_timeout();
        self.bridge
            .publish_command(&self.device_id, payload.into_bytes(), retain)
            .await?;

        loop {
            if self.bridge.light_matches(&self.device_id, led, color).await {
                return Ok(started.elapsed());
            }
            if self.bridge.connection_state() == ConnectionState::Disconnected {
                return Err(ProbeError::Disconnected(self.device_id.clone()));
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(self.interruption()),
                _ = sleep_until(deadline) => {
                    return Err(ProbeError::EchoTimeout {
                        device_id: self.device_id.clone(),
                        cycle,
                        led,
                        waited: started.elapsed(),
                    });
                }
                event = events.recv() => match event {
                    Ok(BridgeEvent::ConnectionChanged(ConnectionState::Disconnected))
                    | Err(RecvError::Closed) => {
                        return Err(ProbeError::Disconnected(self.device_id.clone()));
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Probe skipped {} bridge events", skipped);
                    }
                },
            }
        }
    }

    /// Why the token fired: a lost connection or a user action.
    fn interruption(&self) -> ProbeError {
        if self.bridge.connection_state() == ConnectionState::Disconnected {
            ProbeError::Disconnected(self.device_id.clone())
        } else {
            ProbeError::Cancelled
        }
    }
}

impl PerformanceProbe<Finished> {
    /// Switches the LEDs off and turns the samples into a report.
    pub async fn finish(self) -> Result<ProbeReport, ProbeError> {
        self.restore_lights().await;

        let samples = self.get_state_data().cloned().ok_or(ProbeError::NoSamples)?;
        if let Some(failure) = samples.failure {
            return Err(failure);
        }

        let report = ProbeReport::from_samples(&self.device_id, samples.led_count, samples.durations)
            .ok_or(ProbeError::NoSamples)?;
        info!("{}", report);
        Ok(report)
    }
}

/// Drives one probe run from start to report.
pub async fn run(
    bridge: Arc<BridgeController>,
    device_id: &str,
    cycles: usize,
    settings: ProbeSettings,
    cancel: CancellationToken,
) -> Result<ProbeReport, ProbeError> {
    let probe = PerformanceProbe::create(bridge, device_id, cycles, settings, cancel);
    let measuring = probe.prepare().await?;
    let finished = measuring.measure().await;
    finished.finish().await
}

/// Statistics over the measured round trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub device_id: String,
    pub led_count: usize,
    pub samples: Vec<Duration>,
    pub count: usize,
    pub total: Duration,
    pub max: Duration,
    pub min: Duration,
    pub mean: Duration,
    pub median: Duration,
}

impl ProbeReport {
    /// `None` when there are no samples.
    pub fn from_samples(device_id: &str, led_count: usize, samples: Vec<Duration>) -> Option<Self> {
        let count = samples.len();
        let total: Duration = samples.iter().sum();
        let max = samples.iter().max().copied()?;
        let min = samples.iter().min().copied()?;
        let mean = total / u32::try_from(count).ok()?;

        let mut sorted = samples.clone();
        sorted.sort();
        let middle = count / 2;
        let median = if count % 2 == 0 {
            (sorted[middle - 1] + sorted[middle]) / 2
        } else {
            sorted[middle]
        };

        Some(Self {
            device_id: device_id.to_string(),
            led_count,
            samples,
            count,
            total,
            max,
            min,
            mean,
            median,
        })
    }

    /// Tab-separated `cycles led_count total max min mean median`, times in ms.
    pub fn summary_row(&self) -> String {
        format!(
            "{}\t{}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}",
            self.count,
            self.led_count,
            millis(self.total),
            millis(self.max),
            millis(self.min),
            millis(self.mean),
            millis(self.median)
        )
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Performance probe on {} ({} LEDs, {} cycles)",
            self.device_id, self.led_count, self.count
        )?;
        writeln!(f, "  total:  {:.3} ms", millis(self.total))?;
        writeln!(f, "  max:    {:.3} ms", millis(self.max))?;
        writeln!(f, "  min:    {:.3} ms", millis(self.min))?;
        writeln!(f, "  mean:   {:.3} ms", millis(self.mean))?;
        write!(f, "  median: {:.3} ms", millis(self.median))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_millis).collect()
    }

    #[test]
    fn test_palette_literals_parse() {
        assert_eq!(palette(&PROBE_PALETTE).len(), PROBE_PALETTE.len());
    }

    #[test]
    fn test_report_statistics() {
        let report = ProbeReport::from_samples("devA", 3, ms(&[30, 10, 20])).unwrap();

        assert_eq!(report.count, 3);
        assert_eq!(report.total, Duration::from_millis(60));
        assert_eq!(report.max, Duration::from_millis(30));
        assert_eq!(report.min, Duration::from_millis(10));
        assert_eq!(report.mean, Duration::from_millis(20));
        assert_eq!(report.median, Duration::from_millis(20));
        assert_eq!(report.samples, ms(&[30, 10, 20]));
    }

    #[test]
    fn test_even_median_is_mean_of_middle_pair() {
        let report = ProbeReport::from_samples("devA", 1, ms(&[40, 10, 20, 30])).unwrap();
        assert_eq!(report.median, Duration::from_millis(25));
    }

    #[test]
    fn test_report_needs_samples() {
        assert!(ProbeReport::from_samples("devA", 1, Vec::new()).is_none());
    }

    #[test]
    fn test_summary_row() {
        let report = ProbeReport::from_samples("devA", 12, ms(&[2, 4])).unwrap();
        assert_eq!(
            report.summary_row(),
            "2\t12\t6.000\t4.000\t2.000\t3.000\t3.000"
        );
        assert!(report.to_string().starts_with("Performance probe on devA (12 LEDs, 2 cycles)"));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = ProbeSettings::default();
        assert_eq!(settings.cycles, 100);
        assert_eq!(settings.cycle_timeout(), Duration::from_secs(5));
        assert_eq!(settings.settle_delay(), Duration::from_secs(1));
    }
}
