//! Slot arithmetic shared by the encoder and the decoder.
//!
//! A slot is a contiguous run of `floor(slot_width * sample_rate)` samples
//! carrying exactly one symbol. Both ends derive the same grid from the same
//! configuration; nothing on the wire marks slot boundaries.

use crate::error::{LinkError, Result};
use std::ops::Range;

/// Guards the floor against binary fractions such as `0.03 * 20000`
/// landing a hair under the integer.
const SAMPLE_EPSILON: f64 = 1e-9;

/// Number of whole samples covering `seconds` at `rate` Hz.
pub fn samples_for(seconds: f64, rate: u32) -> usize {
    let exact = seconds * rate as f64;
    if !exact.is_finite() || exact <= 0.0 {
        return 0;
    }
    (exact + SAMPLE_EPSILON).floor() as usize
}

/// Fixed slot grid over a buffer of `total_samples`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    slot_samples: usize,
    total_samples: usize,
}

impl SlotLayout {
    pub fn new(slot_width_s: f64, sample_rate: u32, duration_s: f64) -> Result<Self> {
        Self::from_samples(
            samples_for(slot_width_s, sample_rate),
            samples_for(duration_s, sample_rate),
        )
    }

    pub fn from_samples(slot_samples: usize, total_samples: usize) -> Result<Self> {
        if slot_samples == 0 {
            return Err(LinkError::InvalidConfig(
                "slot width is shorter than one sample period".to_string(),
            ));
        }
        Ok(Self {
            slot_samples,
            total_samples,
        })
    }

    pub fn slot_samples(&self) -> usize {
        self.slot_samples
    }

    pub fn total_samples(&self) -> usize {
        self.total_samples
    }

    /// Whole slots that fit in the buffer. Never more than `floor(D / w)`.
    pub fn slot_count(&self) -> usize {
        self.total_samples / self.slot_samples
    }

    /// Sample range of slot `k`, or `None` when the slot does not fit.
    pub fn slot_range(&self, k: usize) -> Option<Range<usize>> {
        let start = k.checked_mul(self.slot_samples)?;
        let end = start.checked_add(self.slot_samples)?;
        (end <= self.total_samples).then_some(start..end)
    }

    /// Index of the slot containing sample `index`.
    pub fn slot_of(&self, index: usize) -> usize {
        index / self.slot_samples
    }

    pub fn offset_in_slot(&self, index: usize) -> usize {
        index % self.slot_samples
    }

    /// Default representative sample inside a slot.
    pub fn center_offset(&self) -> usize {
        self.slot_samples / 2
    }
}
