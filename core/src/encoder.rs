use crate::carrier::{carrier, constant_amplitude};
use crate::config::{LinkConfig, ModulationConfig, TruncationPolicy};
use crate::error::{LinkError, Result};
use crate::framing::{bits_msb_first, char_to_byte, FrameLayout};
use crate::slot::SlotLayout;
use crate::threshold::Level;

/// One character's drive waveform, in volts.
///
/// Fully determined before any I/O and never modified afterwards; the output
/// driver consumes it once through [`Waveform::write_into`].
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    samples: Vec<f64>,
    slots_written: usize,
    truncated: bool,
}

impl Waveform {
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Preamble and data slots that made it into the buffer.
    pub fn slots_written(&self) -> usize {
        self.slots_written
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn into_samples(self) -> Vec<f64> {
        self.samples
    }

    /// Quantize into a driver buffer in place. Never writes past `dest`.
    pub fn write_into<F>(&self, dest: &mut [u16], quantize: F) -> Result<usize>
    where
        F: Fn(f64) -> u16,
    {
        if dest.len() < self.samples.len() {
            return Err(LinkError::BufferTooSmall {
                needed: self.samples.len(),
                available: dest.len(),
            });
        }
        for (raw, &volts) in dest.iter_mut().zip(&self.samples) {
            *raw = quantize(volts);
        }
        Ok(self.samples.len())
    }
}

/// Slot envelope encoder: on-off keying of the amplitude of a fixed carrier.
///
/// Each frame is the preamble, then the 8 bits of the character MSB first,
/// then the idle level until the end of the buffer. Pure: the same byte
/// always yields the same samples.
pub struct Encoder {
    modulation: ModulationConfig,
    frame: FrameLayout,
    slots: SlotLayout,
    carrier: Vec<f64>,
    sample_rate: u32,
    duration_s: f64,
}

impl Encoder {
    pub fn new(config: &LinkConfig) -> Result<Self> {
        config.validate()?;
        let m = &config.modulation;
        let carrier = carrier(
            m.carrier,
            m.carrier_hz,
            config.output.sample_rate,
            config.output.duration_s,
        );
        Ok(Self {
            modulation: m.clone(),
            frame: m.frame_layout(),
            slots: config.output_slots()?,
            carrier,
            sample_rate: config.output.sample_rate,
            duration_s: config.output.duration_s,
        })
    }

    pub fn slot_layout(&self) -> SlotLayout {
        self.slots
    }

    pub fn frame_layout(&self) -> &FrameLayout {
        &self.frame
    }

    /// First sample after the frame's idle slot; rewriting the buffer past
    /// this point cannot disturb a frame being played.
    pub fn frame_end_sample(&self) -> usize {
        (self.frame.slot_count() * self.slots.slot_samples()).min(self.carrier.len())
    }

    pub fn encode(&self, byte: u8) -> Result<Waveform> {
        let needed = self.frame.slot_count();
        let available = self.slots.slot_count();
        let truncated = needed > available;
        if truncated {
            match self.modulation.truncation {
                TruncationPolicy::Reject => {
                    return Err(LinkError::FrameTooLong { needed, available });
                }
                TruncationPolicy::Truncate => {
                    log::warn!(
                        "Frame for 0x{:02x} needs {} slots, buffer holds {}; trailing slots dropped",
                        byte,
                        needed,
                        available
                    );
                }
            }
        }

        let polarity = self.modulation.polarity;
        let levels = self
            .frame
            .preamble()
            .iter()
            .copied()
            .chain(bits_msb_first(byte).into_iter().map(|bit| polarity.level_for(bit)));

        let mut samples = self.carrier.clone();
        let mut slots_written = 0;
        for (k, level) in levels.enumerate() {
            let Some(range) = self.slots.slot_range(k) else {
                break;
            };
            let amplitude = self.modulation.amplitude(level);
            for sample in &mut samples[range] {
                *sample *= amplitude;
            }
            slots_written += 1;
        }

        // Idle: flat rest level from the end of the last data slot
        let idle_start = (slots_written * self.slots.slot_samples()).min(samples.len());
        let idle_level = self.modulation.amplitude(Level::Low);
        for sample in &mut samples[idle_start..] {
            *sample = idle_level;
        }

        log::debug!(
            "Encoded 0x{:02x} into {} slots ({} samples)",
            byte,
            slots_written,
            samples.len()
        );

        Ok(Waveform {
            samples,
            slots_written,
            truncated,
        })
    }

    pub fn encode_char(&self, c: char) -> Result<Waveform> {
        let byte = char_to_byte(c).ok_or_else(|| {
            LinkError::InvalidInput(format!("character {:?} does not fit in one byte", c))
        })?;
        self.encode(byte)
    }

    /// One waveform per character.
    pub fn encode_message(&self, message: &str) -> Result<Vec<Waveform>> {
        message.chars().map(|c| self.encode_char(c)).collect()
    }

    /// Zero-amplitude drive written before a scan starts and on cleanup.
    pub fn rest(&self) -> Waveform {
        Waveform {
            samples: constant_amplitude(
                self.modulation.carrier,
                0.0,
                self.modulation.carrier_hz,
                self.sample_rate,
                self.duration_s,
            ),
            slots_written: 0,
            truncated: false,
        }
    }
}
