use crate::config::LinkConfig;
use crate::daq::{DaqDevice, ScanDirection, ScanOptions, ScanStatus};
use crate::encoder::Encoder;
use crate::error::{LinkError, Result};
use crate::poll::{poll_until, CancelToken};
use crate::session::{quantize, ScanGuard};

/// Outcome of one transmit session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransmitReport {
    pub chars_sent: usize,
    /// Buffer rewrites that landed after the next loop's frame had begun.
    pub late_writes: usize,
    /// Buffer loop in which the last character played.
    pub last_loop: u64,
}

/// Plays a message one character per output buffer loop.
///
/// The output scan runs continuously over a single waveform buffer. The
/// first character is written before the scan starts; each following one is
/// written while the previous frame sits in its idle tail, so it plays in
/// full on the next loop.
pub struct Transmitter {
    config: LinkConfig,
    encoder: Encoder,
    external_trigger: bool,
}

impl Transmitter {
    pub fn new(config: &LinkConfig) -> Result<Self> {
        Ok(Self {
            encoder: Encoder::new(config)?,
            config: config.clone(),
            external_trigger: false,
        })
    }

    /// Arm the output scan and wait for the bench trigger instead of
    /// starting immediately.
    pub fn external_trigger(mut self, enabled: bool) -> Self {
        self.external_trigger = enabled;
        self
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Play `message` and rest the output.
    ///
    /// Any failure also cancels `cancel`: a receiver or trigger sharing the
    /// token would otherwise wait on a scan that never runs.
    pub fn run(
        &self,
        device: &mut dyn DaqDevice,
        message: &str,
        cancel: &CancelToken,
    ) -> Result<TransmitReport> {
        let result = self.transmit(device, message, cancel);
        if let Err(e) = &result {
            log::error!("Transmit failed: {}", e);
            cancel.cancel();
        }
        result
    }

    fn transmit(
        &self,
        device: &mut dyn DaqDevice,
        message: &str,
        cancel: &CancelToken,
    ) -> Result<TransmitReport> {
        let waves = self.encoder.encode_message(message)?;
        let mut report = TransmitReport::default();
        let Some((first, rest_of_message)) = waves.split_first() else {
            log::info!("Nothing to send");
            return Ok(report);
        };

        let output = &self.config.output;
        device.set_range(ScanDirection::Output, output.range)?;
        let len = output.buffer_samples() as u64;
        let frame_end = self.encoder.frame_end_sample() as u64;
        let policy = self.config.wait_policy();

        let rest = quantize(&*device, &self.encoder.rest())?;
        let first_raw = quantize(&*device, first)?;
        let mut guard = ScanGuard::allocate(device, ScanDirection::Output, len as usize)?.with_rest(rest);
        guard.write(0, &first_raw)?;

        let options = ScanOptions {
            continuous: true,
            external_trigger: self.external_trigger,
        };
        guard.start(output.channels, output.sample_rate, options)?;
        log::info!("Sending {} characters", waves.len());
        report.chars_sent = 1;

        let mut playing_loop = 0u64;
        for wave in rest_of_message {
            let ready_at = playing_loop * len + frame_end;
            let count = poll_until(&policy, cancel, || {
                running_count(guard.status()?, ready_at)
            })?;

            let raw = quantize(guard.device(), wave)?;
            guard.write(0, &raw)?;

            let position = count % len;
            if position < frame_end {
                report.late_writes += 1;
                log::warn!(
                    "Late buffer write at sample {} of loop {}; that frame is mixed",
                    position,
                    count / len
                );
            }
            playing_loop = count / len + 1;
            report.chars_sent += 1;
            log::debug!("Character {} queued for loop {}", report.chars_sent, playing_loop);
        }

        // Let the last frame play out before resting the output
        let ready_at = playing_loop * len + frame_end;
        poll_until(&policy, cancel, || running_count(guard.status()?, ready_at))?;
        report.last_loop = playing_loop;

        guard.finish()?;
        log::info!("Sent {} characters", report.chars_sent);
        Ok(report)
    }
}

fn running_count(status: ScanStatus, ready_at: u64) -> Result<Option<u64>> {
    if !status.is_running() {
        return Err(LinkError::ScanNotRunning);
    }
    Ok((status.scanned_count >= ready_at).then_some(status.scanned_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DeviceSession;
    use crate::sim::{ScaledClock, SimBench, SENDER_PRODUCT};
    use std::sync::Arc;

    fn fast_config() -> LinkConfig {
        let mut config = LinkConfig::default();
        config.poll.interval_ms = 1;
        config.poll.max_wait_ms = Some(10_000);
        config
    }

    #[test]
    fn test_transmit_plays_one_char_per_loop() {
        let bench = SimBench::loopback(Arc::new(ScaledClock::new(10.0)));
        let mut session = DeviceSession::open(&bench, SENDER_PRODUCT).unwrap();
        let transmitter = Transmitter::new(&fast_config()).unwrap();

        let report = transmitter
            .run(session.device_mut(), "abc", &CancelToken::new())
            .unwrap();
        assert_eq!(report.chars_sent, 3);
        assert_eq!(report.late_writes, 0);
        assert_eq!(report.last_loop, 2);
        // output stopped and buffer freed
        assert!(!session.device().status(ScanDirection::Output).unwrap().is_running());
    }

    #[test]
    fn test_empty_message_sends_nothing() {
        let bench = SimBench::loopback(Arc::new(ScaledClock::realtime()));
        let mut session = DeviceSession::open(&bench, SENDER_PRODUCT).unwrap();
        let transmitter = Transmitter::new(&fast_config()).unwrap();
        let report = transmitter
            .run(session.device_mut(), "", &CancelToken::new())
            .unwrap();
        assert_eq!(report, TransmitReport::default());
    }

    #[test]
    fn test_cancel_stops_transmit() {
        let bench = SimBench::loopback(Arc::new(ScaledClock::realtime()));
        let mut session = DeviceSession::open(&bench, SENDER_PRODUCT).unwrap();
        let transmitter = Transmitter::new(&fast_config()).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = transmitter.run(session.device_mut(), "hi", &cancel);
        assert!(matches!(result, Err(LinkError::Cancelled)));
        assert!(!session.device().status(ScanDirection::Output).unwrap().is_running());
    }

    #[test]
    fn test_unencodable_message_cancels_session() {
        let bench = SimBench::loopback(Arc::new(ScaledClock::realtime()));
        let mut session = DeviceSession::open(&bench, SENDER_PRODUCT).unwrap();
        let transmitter = Transmitter::new(&fast_config()).unwrap();
        let cancel = CancelToken::new();

        let result = transmitter.run(session.device_mut(), "a\u{263a}", &cancel);
        assert!(matches!(result, Err(LinkError::InvalidInput(_))));
        assert!(cancel.is_cancelled());
        assert_eq!(bench.armed_scans(), 0);
    }
}
