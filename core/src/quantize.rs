use serde::{Deserialize, Serialize};

/// Analog range a channel is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VoltRange {
    #[default]
    Bip10Volts,
    Bip5Volts,
    Uni10Volts,
    Uni5Volts,
}

impl VoltRange {
    pub fn min(self) -> f64 {
        match self {
            VoltRange::Bip10Volts => -10.0,
            VoltRange::Bip5Volts => -5.0,
            VoltRange::Uni10Volts | VoltRange::Uni5Volts => 0.0,
        }
    }

    pub fn max(self) -> f64 {
        match self {
            VoltRange::Bip10Volts | VoltRange::Uni10Volts => 10.0,
            VoltRange::Bip5Volts | VoltRange::Uni5Volts => 5.0,
        }
    }

    pub fn span(self) -> f64 {
        self.max() - self.min()
    }
}

/// Engineering-unit conversion owned by the driver.
///
/// The encoder only ever sees `volts_to_raw` as an injected function.
pub trait Quantizer {
    fn volts_to_raw(&self, volts: f64) -> u16;
    fn raw_to_volts(&self, raw: u16) -> f64;
}

/// Straight-binary converter spanning the full range, clamped at the rails.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearQuantizer {
    range: VoltRange,
    full_scale: u16,
}

impl LinearQuantizer {
    pub fn new(range: VoltRange, resolution_bits: u8) -> Self {
        let bits = resolution_bits.clamp(1, 16) as u32;
        Self {
            range,
            full_scale: ((1u32 << bits) - 1) as u16,
        }
    }

    pub fn sixteen_bit(range: VoltRange) -> Self {
        Self::new(range, 16)
    }

    pub fn range(&self) -> VoltRange {
        self.range
    }

    /// Volts per code.
    pub fn lsb(&self) -> f64 {
        self.range.span() / self.full_scale as f64
    }
}

impl Quantizer for LinearQuantizer {
    fn volts_to_raw(&self, volts: f64) -> u16 {
        let clamped = volts.clamp(self.range.min(), self.range.max());
        let code = ((clamped - self.range.min()) / self.lsb()).round();
        code.min(self.full_scale as f64) as u16
    }

    fn raw_to_volts(&self, raw: u16) -> f64 {
        let raw = raw.min(self.full_scale);
        self.range.min() + raw as f64 * self.lsb()
    }
}
