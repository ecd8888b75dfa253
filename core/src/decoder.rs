use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::framing::{byte_from_bits, BitAccumulator, FrameLayout};
use crate::slot::SlotLayout;
use crate::threshold::{Decision, DeadZonePolicy, FrontEnd, Level, Polarity, Threshold};
use crate::DATA_SLOTS;

/// Threshold decoder for the slot-keyed sample stream
///
/// Takes one decision per data slot at a fixed offset inside the slot and
/// flushes every 8 decisions as a byte. The slot grid is laid over the
/// stream once, at position zero (plus the configured alignment), and never
/// adjusted: clock skew between the two ends moves decisions into
/// neighbouring slots without any error being raised.
pub struct FrameDecoder {
    threshold: Threshold,
    dead_zone_policy: DeadZonePolicy,
    front_end: FrontEnd,
    polarity: Polarity,
    frame: FrameLayout,
    slots: SlotLayout,
    sample_offset: usize,
    alignment: i64,
    accumulator: BitAccumulator,
    position: u64,
    last_level: Option<Level>,
    dropped: u64,
}

impl FrameDecoder {
    pub fn new(config: &LinkConfig) -> Result<Self> {
        config.validate()?;
        let slots = config.input_slots()?;
        let sample_offset = config.decision_offset()?;
        Ok(Self {
            threshold: config.threshold()?,
            dead_zone_policy: config.input.threshold.policy,
            front_end: config.input.front_end,
            polarity: config.modulation.polarity,
            frame: config.modulation.frame_layout(),
            sample_offset,
            slots,
            alignment: config.input.alignment,
            accumulator: BitAccumulator::new(),
            position: 0,
            last_level: None,
            dropped: 0,
        })
    }

    /// Samples in one frame period (one output waveform buffer).
    pub fn frame_samples(&self) -> usize {
        self.slots.total_samples().max(1)
    }

    pub fn slot_layout(&self) -> SlotLayout {
        self.slots
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    /// Absolute stream index of the next sample `feed` will see.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn pending_bits(&self) -> usize {
        self.accumulator.len()
    }

    /// Dead-zone samples skipped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn set_alignment(&mut self, alignment: i64) {
        self.alignment = alignment;
    }

    pub fn reset(&mut self) {
        self.accumulator.clear();
        self.position = 0;
        self.last_level = None;
        self.dropped = 0;
    }

    /// Advance over samples that were lost (buffer overrun) without
    /// classifying them.
    pub fn skip(&mut self, count: u64) {
        self.position += count;
    }

    /// Data bit index decided at stream index `index`, if any.
    fn decision_point(&self, index: u64) -> Option<usize> {
        let rel = index as i64 - self.alignment;
        if rel < 0 {
            return None;
        }
        let frame_pos = (rel as u64 % self.frame_samples() as u64) as usize;
        if self.slots.offset_in_slot(frame_pos) != self.sample_offset {
            return None;
        }
        self.frame.data_bit_index(self.slots.slot_of(frame_pos))
    }

    /// Classify one representative sample into a bit, honouring the
    /// dead-zone policy.
    fn decide(&mut self, value: f64, sample_index: u64) -> Result<Option<bool>> {
        let value = self.front_end.apply(value);
        match self.threshold.decide(value) {
            Decision::Level(level) => {
                self.last_level = Some(level);
                Ok(Some(self.polarity.bit_for(level)))
            }
            Decision::Ambiguous => match self.dead_zone_policy {
                DeadZonePolicy::Drop => {
                    self.dropped += 1;
                    log::debug!("Dropped dead-zone sample {} ({:.3} V)", sample_index, value);
                    Ok(None)
                }
                DeadZonePolicy::CarryOver => match self.last_level {
                    Some(level) => Ok(Some(self.polarity.bit_for(level))),
                    None => {
                        self.dropped += 1;
                        Ok(None)
                    }
                },
                DeadZonePolicy::Reject => Err(LinkError::DecodeAmbiguous { sample_index }),
            },
        }
    }

    /// Consume the next run of the stream; returns completed bytes.
    pub fn feed(&mut self, samples: &[f64]) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        for &value in samples {
            let index = self.position;
            self.position += 1;

            if self.decision_point(index).is_none() {
                continue;
            }
            if let Some(bit) = self.decide(value, index)? {
                if let Some(byte) = self.accumulator.push(bit) {
                    log::debug!("Decoded 0x{:02x} at sample {}", byte, index);
                    bytes.push(byte);
                }
            }
        }
        Ok(bytes)
    }

    /// Decode a whole capture from a fresh state.
    pub fn decode_buffer(&mut self, samples: &[f64]) -> Result<Vec<u8>> {
        self.reset();
        self.feed(samples)
    }

    /// Representative sample index of each data slot of the first frame,
    /// shifted by the alignment the same way `feed` shifts its grid.
    pub fn data_offsets(&self) -> Result<[usize; DATA_SLOTS]> {
        let mut offsets = [0usize; DATA_SLOTS];
        for (k, offset) in offsets.iter_mut().enumerate() {
            let in_frame = self.frame.data_slot(k) * self.slots.slot_samples() + self.sample_offset;
            let index = in_frame as i64 + self.alignment;
            if index < 0 {
                return Err(LinkError::InvalidInput(format!(
                    "alignment {} moves data slot {} before the capture start",
                    self.alignment, k
                )));
            }
            *offset = index as usize;
        }
        Ok(offsets)
    }

    /// Single-pass decode of one capture at fixed sample indices
    ///
    /// Bypasses the accumulator timing: the classified values at `offsets`
    /// are the message bits, MSB first. `None` when a dead-zone sample was
    /// dropped and fewer than 8 bits remain.
    pub fn decode_at_offsets(&mut self, samples: &[f64], offsets: &[usize; DATA_SLOTS]) -> Result<Option<u8>> {
        let mut bits = Vec::with_capacity(DATA_SLOTS);
        for &offset in offsets {
            let value = *samples.get(offset).ok_or_else(|| {
                LinkError::InvalidInput(format!(
                    "offset {} outside a {}-sample capture",
                    offset,
                    samples.len()
                ))
            })?;
            if let Some(bit) = self.decide(value, offset as u64)? {
                bits.push(bit);
            }
        }
        if bits.len() < DATA_SLOTS {
            return Ok(None);
        }
        Ok(Some(byte_from_bits(&bits)))
    }
}
