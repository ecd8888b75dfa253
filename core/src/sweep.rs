//! Switch-speed calibration harness
//!
//! Plays an amplitude staircase on the output and captures one input buffer
//! once the first full buffer has gone by, so the cell has settled into the
//! repeating pattern.

use crate::carrier::staircase;
use crate::config::LinkConfig;
use crate::daq::{DaqDevice, ScanDirection, ScanOptions};
use crate::encoder::Encoder;
use crate::error::{LinkError, Result};
use crate::poll::{poll_until, CancelToken};
use crate::session::{quantize, ScanGuard};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    /// Staircase stops below this amplitude.
    pub a_max: f64,
    pub step: f64,
}

impl SweepPlan {
    /// Steps `0, step, 2*step, ...` below `a_max`.
    pub fn levels(&self) -> f64 {
        (self.a_max / self.step).ceil()
    }
}

impl Default for SweepPlan {
    fn default() -> Self {
        Self {
            a_max: 5.0,
            step: 0.5,
        }
    }
}

/// Input samples (volts) of the second input buffer, plus the drive that
/// produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepCapture {
    pub drive: Vec<f64>,
    pub response: Vec<f64>,
}

pub fn sweep(
    output: &mut dyn DaqDevice,
    input: &mut dyn DaqDevice,
    config: &LinkConfig,
    plan: &SweepPlan,
    cancel: &CancelToken,
) -> Result<SweepCapture> {
    if !(plan.step > 0.0 && plan.a_max > 0.0) {
        return Err(LinkError::InvalidConfig(format!(
            "sweep needs a positive step and maximum, got {} / {}",
            plan.step, plan.a_max
        )));
    }
    let samples = config.output.buffer_samples();
    if plan.levels() > samples as f64 {
        return Err(LinkError::InvalidConfig(format!(
            "{} sweep levels do not fit a {}-sample buffer",
            plan.levels(),
            samples
        )));
    }
    let encoder = Encoder::new(config)?;
    let drive = staircase(
        config.modulation.carrier,
        plan.a_max,
        plan.step,
        config.modulation.carrier_hz,
        config.output.sample_rate,
        config.output.duration_s,
    );
    let policy = config.wait_policy();

    output.set_range(ScanDirection::Output, config.output.range)?;
    input.set_range(ScanDirection::Input, config.input.range)?;

    let rest = quantize(&*output, &encoder.rest())?;
    let mut raw_drive = vec![0u16; drive.len()];
    for (raw, &volts) in raw_drive.iter_mut().zip(&drive) {
        *raw = output.volts_to_raw(ScanDirection::Output, volts);
    }

    let mut out_guard =
        ScanGuard::allocate(output, ScanDirection::Output, drive.len())?.with_rest(rest);
    out_guard.write(0, &raw_drive)?;

    // Two buffers' worth, single pass: the first is discarded
    let len = config.input.buffer_samples();
    let mut in_guard = ScanGuard::allocate(input, ScanDirection::Input, 2 * len)?;

    out_guard.start(config.output.channels, config.output.sample_rate, ScanOptions::continuous())?;
    in_guard.start(
        config.input.channels,
        config.input.sample_rate,
        ScanOptions::default(),
    )?;
    log::info!(
        "Sweeping 0..{} V in {} V steps, capturing {} samples",
        plan.a_max,
        plan.step,
        len
    );

    poll_until(&policy, cancel, || {
        let status = in_guard.status()?;
        Ok((status.scanned_count >= 2 * len as u64 || !status.is_running()).then_some(()))
    })?;

    let mut raw = vec![0u16; len];
    in_guard.read_from(len as u64, &mut raw)?;
    let device = in_guard.device();
    let response = raw
        .iter()
        .map(|&code| device.raw_to_volts(ScanDirection::Input, code))
        .collect();

    in_guard.finish()?;
    out_guard.finish()?;
    Ok(SweepCapture { drive, response })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DeviceSession;
    use crate::sim::{ScaledClock, SimBench, RECEIVER_PRODUCT, SENDER_PRODUCT};
    use std::sync::Arc;

    #[test]
    fn test_sweep_captures_staircase() {
        let bench = SimBench::loopback(Arc::new(ScaledClock::new(20.0)));
        let mut tx = DeviceSession::open(&bench, SENDER_PRODUCT).unwrap();
        let mut rx = DeviceSession::open(&bench, RECEIVER_PRODUCT).unwrap();
        let mut config = LinkConfig::default();
        config.poll.interval_ms = 1;

        let capture = sweep(
            tx.device_mut(),
            rx.device_mut(),
            &config,
            &SweepPlan::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(capture.response.len(), 20_000);
        let peak = capture.response.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        // top step of 0..5 V in 0.5 V steps
        assert!((peak - 4.5).abs() < 0.05, "{}", peak);
    }

    #[test]
    fn test_sweep_rejects_zero_step() {
        let bench = SimBench::loopback(Arc::new(ScaledClock::realtime()));
        let mut tx = DeviceSession::open(&bench, SENDER_PRODUCT).unwrap();
        let mut rx = DeviceSession::open(&bench, RECEIVER_PRODUCT).unwrap();
        let plan = SweepPlan { a_max: 5.0, step: 0.0 };
        let result = sweep(
            tx.device_mut(),
            rx.device_mut(),
            &LinkConfig::default(),
            &plan,
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(LinkError::InvalidConfig(_))));
    }

    #[test]
    fn test_sweep_rejects_more_levels_than_samples() {
        let bench = SimBench::loopback(Arc::new(ScaledClock::realtime()));
        let mut tx = DeviceSession::open(&bench, SENDER_PRODUCT).unwrap();
        let mut rx = DeviceSession::open(&bench, RECEIVER_PRODUCT).unwrap();
        let plan = SweepPlan { a_max: 5.0, step: 1e-12 };
        assert!(plan.levels() > 20_000.0);

        let result = sweep(
            tx.device_mut(),
            rx.device_mut(),
            &LinkConfig::default(),
            &plan,
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(LinkError::InvalidConfig(_))));
        assert_eq!(bench.armed_scans(), 0);
    }
}
