use crate::slot::samples_for;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

// Carrier generation for the cell drive.
//
// Liquid-crystal cells degrade under a DC bias, so every drive level is
// applied as a bipolar square wave at a fixed frequency. The amplitude of
// that square wave is what carries information.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CarrierShape {
    #[default]
    Square,
    Sine,
}

/// `sign` with `sign(0) = 0`. `f64::signum` maps `+0.0` to `1.0`.
fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Unit-amplitude carrier over `[0, duration)`.
///
/// Square is `sign(sin(2π f t))`, so the very first sample is `0`.
pub fn carrier(shape: CarrierShape, frequency: f64, sample_rate: u32, duration_s: f64) -> Vec<f64> {
    let num_samples = samples_for(duration_s, sample_rate);
    let sample_rate = sample_rate as f64;

    (0..num_samples)
        .map(|n| {
            let t = n as f64 / sample_rate;
            let s = (2.0 * PI * frequency * t).sin();
            match shape {
                CarrierShape::Square => sign(s),
                CarrierShape::Sine => s,
            }
        })
        .collect()
}

/// Carrier scaled by a single amplitude. Amplitude `0` gives the rest drive.
pub fn constant_amplitude(
    shape: CarrierShape,
    amplitude: f64,
    frequency: f64,
    sample_rate: u32,
    duration_s: f64,
) -> Vec<f64> {
    carrier(shape, frequency, sample_rate, duration_s)
        .into_iter()
        .map(|c| amplitude * c)
        .collect()
}

/// Amplitude staircase for switch-speed calibration
///
/// Steps through `0, step, 2*step, ...` below `a_max`, each level held for
/// an equal share of the buffer. Samples past the last whole step keep the
/// bare carrier, as does the whole buffer when there are more levels than
/// samples.
pub fn staircase(
    shape: CarrierShape,
    a_max: f64,
    step: f64,
    frequency: f64,
    sample_rate: u32,
    duration_s: f64,
) -> Vec<f64> {
    let mut wave = carrier(shape, frequency, sample_rate, duration_s);
    if step <= 0.0 || a_max <= 0.0 {
        return wave;
    }

    let levels: Vec<f64> = (0..)
        .map(|i| i as f64 * step)
        .take_while(|&v| v < a_max)
        .take(wave.len() + 1)
        .collect();
    let hold = wave.len() / levels.len();
    if hold == 0 {
        return wave;
    }

    for (i, level) in levels.iter().enumerate() {
        for sample in &mut wave[i * hold..(i + 1) * hold] {
            *sample *= level;
        }
    }
    wave
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_carrier_shape() {
        let wave = carrier(CarrierShape::Square, 200.0, 20_000, 1.0);
        assert_eq!(wave.len(), 20_000);
        assert_eq!(wave[0], 0.0, "sign(sin(0)) must be zero");

        // 100 samples per period: first half positive, second half negative
        assert!(wave[1..50].iter().all(|&s| s == 1.0));
        assert!(wave[51..100].iter().all(|&s| s == -1.0));
        assert!(wave.iter().all(|&s| s == 0.0 || s.abs() == 1.0));
    }

    #[test]
    fn test_sine_carrier_peak() {
        let wave = carrier(CarrierShape::Sine, 200.0, 20_000, 0.01);
        assert_eq!(wave.len(), 200);
        assert!((wave[25] - 1.0).abs() < 1e-9);
        assert!((wave[75] + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_constant_amplitude_rest_is_silent() {
        let rest = constant_amplitude(CarrierShape::Square, 0.0, 200.0, 20_000, 0.1);
        assert_eq!(rest.len(), 2_000);
        assert!(rest.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_staircase_levels() {
        let wave = staircase(CarrierShape::Square, 6.0, 0.08, 200.0, 20_000, 1.0);
        // 0.00 .. 5.92 is 75 levels, 266 samples each
        let hold = 20_000 / 75;
        assert_eq!(hold, 266);
        assert!(wave[..hold].iter().all(|&s| s == 0.0));
        let last = &wave[74 * hold..75 * hold];
        let peak = last.iter().fold(0.0f64, |m, &s| m.max(s.abs()));
        assert!((peak - 74.0 * 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_staircase_finer_than_buffer_keeps_carrier() {
        let wave = staircase(CarrierShape::Square, 5.0, 1e-12, 200.0, 20_000, 0.01);
        assert_eq!(wave, carrier(CarrierShape::Square, 200.0, 20_000, 0.01));
    }
}
