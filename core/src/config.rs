//! Link configuration.
//!
//! Built once at startup (defaults or a JSON file read by the CLI) and
//! passed by reference into the encoder, decoder and session loops.

use crate::carrier::CarrierShape;
use crate::error::{LinkError, Result};
use crate::framing::FrameLayout;
use crate::poll::WaitPolicy;
use crate::quantize::VoltRange;
use crate::slot::{samples_for, SlotLayout};
use crate::threshold::{DeadZone, DeadZonePolicy, FrontEnd, Level, Polarity, Threshold};
use crate::{
    DEFAULT_A_HIGH, DEFAULT_A_LOW, DEFAULT_CARRIER_HZ, DEFAULT_DURATION_S, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_RENDEZVOUS_PORT, DEFAULT_SAMPLE_RATE, DEFAULT_SLOT_WIDTH_S,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Inclusive channel span of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelRange {
    pub low: u8,
    pub high: u8,
}

impl ChannelRange {
    pub fn single(channel: u8) -> Self {
        Self {
            low: channel,
            high: channel,
        }
    }

    pub fn count(&self) -> usize {
        (self.high as usize + 1).saturating_sub(self.low as usize)
    }
}

/// Behaviour when a frame does not fit the waveform buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TruncationPolicy {
    /// Write the slots that fit and drop the rest.
    #[default]
    Truncate,
    /// Refuse to encode.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub channels: ChannelRange,
    pub sample_rate: u32,
    pub duration_s: f64,
    pub range: VoltRange,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            channels: ChannelRange::single(0),
            sample_rate: DEFAULT_SAMPLE_RATE,
            duration_s: DEFAULT_DURATION_S,
            range: VoltRange::Bip10Volts,
        }
    }
}

impl OutputConfig {
    /// Samples in one waveform buffer.
    pub fn buffer_samples(&self) -> usize {
        samples_for(self.duration_s, self.sample_rate)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Explicit decision level; midpoint of the amplitude pair when absent.
    pub level: Option<f64>,
    pub dead_zone: Option<DeadZone>,
    pub policy: DeadZonePolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub channels: ChannelRange,
    pub sample_rate: u32,
    pub duration_s: f64,
    pub range: VoltRange,
    pub threshold: ThresholdConfig,
    pub front_end: FrontEnd,
    /// Representative sample inside each slot; the first carrier crest past
    /// the slot centre when absent.
    pub sample_offset: Option<usize>,
    /// Shift of the decoder's slot grid against the stream, in samples.
    pub alignment: i64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            channels: ChannelRange::single(0),
            sample_rate: DEFAULT_SAMPLE_RATE,
            duration_s: DEFAULT_DURATION_S,
            range: VoltRange::Bip10Volts,
            threshold: ThresholdConfig::default(),
            front_end: FrontEnd::Rectified,
            sample_offset: None,
            alignment: 0,
        }
    }
}

impl InputConfig {
    pub fn buffer_samples(&self) -> usize {
        samples_for(self.duration_s, self.sample_rate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulationConfig {
    pub a_low: f64,
    pub a_high: f64,
    pub carrier_hz: f64,
    pub slot_width_s: f64,
    pub carrier: CarrierShape,
    pub preamble: Vec<Level>,
    pub polarity: Polarity,
    pub truncation: TruncationPolicy,
}

impl Default for ModulationConfig {
    fn default() -> Self {
        Self {
            a_low: DEFAULT_A_LOW,
            a_high: DEFAULT_A_HIGH,
            carrier_hz: DEFAULT_CARRIER_HZ,
            slot_width_s: DEFAULT_SLOT_WIDTH_S,
            carrier: CarrierShape::Square,
            preamble: FrameLayout::default().preamble().to_vec(),
            polarity: Polarity::LowIsOne,
            truncation: TruncationPolicy::Truncate,
        }
    }
}

impl ModulationConfig {
    pub fn amplitude(&self, level: Level) -> f64 {
        match level {
            Level::Low => self.a_low,
            Level::High => self.a_high,
        }
    }

    pub fn frame_layout(&self) -> FrameLayout {
        FrameLayout::new(self.preamble.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousConfig {
    pub host: String,
    pub port: u16,
    pub message: String,
    /// `None` waits forever.
    pub timeout_ms: Option<u64>,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_RENDEZVOUS_PORT,
            message: "ready".to_string(),
            timeout_ms: None,
        }
    }
}

impl RendezvousConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    /// `None` polls until the scan finishes or the session is cancelled.
    pub max_wait_ms: Option<u64>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_wait_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub output: OutputConfig,
    pub input: InputConfig,
    pub modulation: ModulationConfig,
    pub rendezvous: RendezvousConfig,
    pub poll: PollConfig,
}

impl LinkConfig {
    /// Decision threshold with the configured dead zone applied.
    pub fn threshold(&self) -> Result<Threshold> {
        let m = &self.modulation;
        let base = match self.input.threshold.level {
            Some(level) => Threshold::new(level),
            None => Threshold::midpoint(m.a_low, m.a_high),
        };
        match self.input.threshold.dead_zone {
            Some(zone) => base.with_dead_zone(zone),
            None => Ok(base),
        }
    }

    /// Slot grid of one waveform buffer at the output rate.
    pub fn output_slots(&self) -> Result<SlotLayout> {
        SlotLayout::new(
            self.modulation.slot_width_s,
            self.output.sample_rate,
            self.output.duration_s,
        )
    }

    /// Slot grid of one frame period (the output buffer duration) at the
    /// input rate.
    pub fn input_slots(&self) -> Result<SlotLayout> {
        SlotLayout::new(
            self.modulation.slot_width_s,
            self.input.sample_rate,
            self.output.duration_s,
        )
    }

    /// Within-slot decision sample at the input rate.
    ///
    /// The slot centre of a 200 Hz carrier at 20 kHz is a zero crossing, so
    /// the default moves a quarter carrier period past it onto a crest.
    pub fn decision_offset(&self) -> Result<usize> {
        let slots = self.input_slots()?;
        if let Some(offset) = self.input.sample_offset {
            return Ok(offset);
        }
        let quarter_period = samples_for(0.25 / self.modulation.carrier_hz, self.input.sample_rate);
        Ok((slots.center_offset() + quarter_period) % slots.slot_samples())
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            interval: Duration::from_millis(self.poll.interval_ms),
            limit: self.poll.max_wait_ms.map(Duration::from_millis),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.modulation;
        let invalid = |msg: String| Err(LinkError::InvalidConfig(msg));

        if self.output.sample_rate == 0 || self.input.sample_rate == 0 {
            return invalid("sample rates must be positive".to_string());
        }
        if !(self.output.duration_s > 0.0) || !(self.input.duration_s > 0.0) {
            return invalid("scan durations must be positive".to_string());
        }
        if !(m.carrier_hz > 0.0) {
            return invalid(format!("carrier frequency {} Hz", m.carrier_hz));
        }
        for (name, channels) in [("output", self.output.channels), ("input", self.input.channels)] {
            if channels.count() != 1 {
                return invalid(format!(
                    "{} scan must use exactly one channel, got {}..={}",
                    name, channels.low, channels.high
                ));
            }
        }

        let threshold = self.threshold()?;
        if !(m.a_low < threshold.level() && threshold.level() < m.a_high) {
            return invalid(format!(
                "levels must satisfy A_LOW ({}) < THRESH ({}) < A_HIGH ({})",
                m.a_low,
                threshold.level(),
                m.a_high
            ));
        }

        self.output_slots()?;
        let input_slots = self.input_slots()?;
        if let Some(offset) = self.input.sample_offset {
            if offset >= input_slots.slot_samples() {
                return invalid(format!(
                    "sample offset {} outside a {}-sample slot",
                    offset,
                    input_slots.slot_samples()
                ));
            }
        }
        if self.poll.interval_ms == 0 {
            return invalid("poll interval must be at least 1 ms".to_string());
        }
        Ok(())
    }
}
