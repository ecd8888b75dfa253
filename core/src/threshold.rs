use crate::error::{LinkError, Result};
use serde::{Deserialize, Serialize};

/// One of the two amplitude levels of the keying alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

/// Bit-to-level convention shared by both ends.
///
/// The reference link drives the cell with the low level for a `1`
/// (`LowIsOne`); the receiver applies the same mapping in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Polarity {
    #[default]
    LowIsOne,
    HighIsOne,
}

impl Polarity {
    pub fn level_for(self, bit: bool) -> Level {
        match (self, bit) {
            (Polarity::LowIsOne, true) | (Polarity::HighIsOne, false) => Level::Low,
            (Polarity::LowIsOne, false) | (Polarity::HighIsOne, true) => Level::High,
        }
    }

    pub fn bit_for(self, level: Level) -> bool {
        match self {
            Polarity::LowIsOne => level == Level::Low,
            Polarity::HighIsOne => level == Level::High,
        }
    }
}

/// Signal conditioning applied before a sample is compared to the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrontEnd {
    /// Sample already is an envelope level (photodetector output).
    Level,
    /// Sample is the bipolar drive itself; compare its magnitude.
    #[default]
    Rectified,
}

impl FrontEnd {
    pub fn apply(self, v: f64) -> f64 {
        match self {
            FrontEnd::Level => v,
            FrontEnd::Rectified => v.abs(),
        }
    }
}

/// Voltage band strictly inside which a sample is treated as transition noise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeadZone {
    pub low: f64,
    pub high: f64,
}

impl DeadZone {
    pub fn contains(&self, v: f64) -> bool {
        v > self.low && v < self.high
    }
}

/// What to do with a representative sample that lands in the dead zone.
///
/// Calibration against real cells has not settled which variant is right,
/// so each is kept selectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeadZonePolicy {
    /// Skip the slot; the accumulator silently receives one bit fewer.
    #[default]
    Drop,
    /// Reuse the previous decided level for this slot.
    CarryOver,
    /// Fail with `DecodeAmbiguous`.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Level(Level),
    Ambiguous,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    level: f64,
    dead_zone: Option<DeadZone>,
}

impl Threshold {
    pub fn new(level: f64) -> Self {
        Self {
            level,
            dead_zone: None,
        }
    }

    /// Decision boundary halfway between the two amplitude levels.
    pub fn midpoint(a_low: f64, a_high: f64) -> Self {
        Self::new(a_low + (a_high - a_low) / 2.0)
    }

    pub fn with_dead_zone(mut self, dead_zone: DeadZone) -> Result<Self> {
        if !(dead_zone.low < self.level && self.level < dead_zone.high) {
            return Err(LinkError::InvalidConfig(format!(
                "dead zone ({}, {}) must strictly contain the threshold {}",
                dead_zone.low, dead_zone.high, self.level
            )));
        }
        self.dead_zone = Some(dead_zone);
        Ok(self)
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn dead_zone(&self) -> Option<DeadZone> {
        self.dead_zone
    }

    /// `High` when `v >= THRESH`, ignoring any dead zone.
    pub fn classify(&self, v: f64) -> Level {
        if v >= self.level {
            Level::High
        } else {
            Level::Low
        }
    }

    pub fn decide(&self, v: f64) -> Decision {
        match self.dead_zone {
            Some(zone) if zone.contains(v) => Decision::Ambiguous,
            _ => Decision::Level(self.classify(v)),
        }
    }
}
