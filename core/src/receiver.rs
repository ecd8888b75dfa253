use crate::config::LinkConfig;
use crate::daq::{DaqDevice, ScanDirection, ScanOptions};
use crate::decoder::FrameDecoder;
use crate::error::Result;
use crate::framing::byte_to_char;
use crate::poll::{poll_until, CancelToken, Deadline};
use crate::session::ScanGuard;
use std::thread;

/// Why a receive session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    /// A single-pass input scan ran to the end of its buffer.
    ScanIdle,
    MaxChars,
    /// No new samples within the configured wait limit.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveReport {
    pub text: String,
    pub bytes: Vec<u8>,
    /// Polls that found more new samples than the buffer holds.
    pub overruns: u64,
    /// Samples decoded or skipped.
    pub samples: u64,
    pub stop: StopReason,
}

/// Continuous acquisition feeding the frame decoder.
///
/// The slot grid is anchored at the first sample of the scan. Nothing is
/// resynchronised afterwards.
pub struct Receiver {
    config: LinkConfig,
    decoder: FrameDecoder,
    options: ScanOptions,
}

impl Receiver {
    pub fn new(config: &LinkConfig) -> Result<Self> {
        Ok(Self {
            decoder: FrameDecoder::new(config)?,
            config: config.clone(),
            options: ScanOptions::continuous(),
        })
    }

    pub fn external_trigger(mut self, enabled: bool) -> Self {
        self.options.external_trigger = enabled;
        self
    }

    /// Stop after one pass over the input buffer instead of wrapping.
    pub fn single_pass(mut self) -> Self {
        self.options.continuous = false;
        self
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    pub fn run<F>(
        &mut self,
        device: &mut dyn DaqDevice,
        cancel: &CancelToken,
        max_chars: Option<usize>,
        mut on_char: F,
    ) -> Result<ReceiveReport>
    where
        F: FnMut(char),
    {
        let input = &self.config.input;
        device.set_range(ScanDirection::Input, input.range)?;
        let len = input.buffer_samples();
        let policy = self.config.wait_policy();

        let mut guard = ScanGuard::allocate(device, ScanDirection::Input, len)?;
        guard.start(input.channels, input.sample_rate, self.options)?;

        // Coarse alignment: the slot grid starts when the scan leaves idle
        poll_until(&policy, cancel, || Ok(guard.status()?.is_running().then_some(())))?;
        log::info!("Input scan running, decoding");

        self.decoder.reset();
        let mut report = ReceiveReport {
            text: String::new(),
            bytes: Vec::new(),
            overruns: 0,
            samples: 0,
            stop: StopReason::Cancelled,
        };
        let mut raw = Vec::with_capacity(len);
        let mut volts = Vec::with_capacity(len);
        let mut deadline = Deadline::start(&policy);

        let stop = 'acquire: loop {
            if cancel.is_cancelled() {
                log::info!("Receive cancelled");
                break StopReason::Cancelled;
            }

            let status = guard.status()?;
            let scanned = status.scanned_count;
            if scanned > report.samples {
                let mut fresh = scanned - report.samples;
                if fresh > len as u64 {
                    let lost = fresh - len as u64;
                    report.overruns += 1;
                    log::warn!("Input overrun: {} samples lost at {}", lost, report.samples);
                    self.decoder.skip(lost);
                    report.samples += lost;
                    fresh = len as u64;
                }

                raw.resize(fresh as usize, 0);
                guard.read_from(report.samples, &mut raw)?;
                let device = guard.device();
                volts.clear();
                volts.extend(raw.iter().map(|&code| device.raw_to_volts(ScanDirection::Input, code)));
                report.samples = scanned;

                for byte in self.decoder.feed(&volts)? {
                    let c = byte_to_char(byte);
                    log::debug!("Received {:?}", c);
                    on_char(c);
                    report.bytes.push(byte);
                    report.text.push(c);
                    if max_chars.is_some_and(|max| report.bytes.len() >= max) {
                        break 'acquire StopReason::MaxChars;
                    }
                }
                deadline = Deadline::start(&policy);
            } else if deadline.check().is_err() {
                log::warn!("No new samples within {:?}", policy.limit);
                break StopReason::TimedOut;
            }

            if !status.is_running() {
                break StopReason::ScanIdle;
            }
            thread::sleep(policy.interval);
        };

        report.stop = stop;
        guard.finish()?;
        log::info!(
            "Received {} characters from {} samples ({:?})",
            report.bytes.len(),
            report.samples,
            report.stop
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DeviceSession;
    use crate::sim::{ManualClock, ScaledClock, SimBench, RECEIVER_PRODUCT};
    use std::sync::Arc;

    fn fast_config() -> LinkConfig {
        let mut config = LinkConfig::default();
        config.poll.interval_ms = 1;
        config
    }

    #[test]
    fn test_single_pass_on_quiet_line() {
        // 0 V on the line rectifies below threshold: Low, so bit 1 each slot
        let bench = SimBench::loopback(Arc::new(ScaledClock::new(20.0)));
        let mut session = DeviceSession::open(&bench, RECEIVER_PRODUCT).unwrap();
        let mut receiver = Receiver::new(&fast_config()).unwrap().single_pass();

        let report = receiver
            .run(session.device_mut(), &CancelToken::new(), None, |_| {})
            .unwrap();
        assert_eq!(report.stop, StopReason::ScanIdle);
        assert_eq!(report.samples, 20_000);
        assert_eq!(report.bytes, vec![0xFF]);
        assert_eq!(report.overruns, 0);
    }

    #[test]
    fn test_times_out_without_samples() {
        // manual clock never advances, so the scan never produces a sample
        let bench = SimBench::loopback(Arc::new(ManualClock::new()));
        let mut session = DeviceSession::open(&bench, RECEIVER_PRODUCT).unwrap();
        let mut config = fast_config();
        config.poll.max_wait_ms = Some(20);
        let mut receiver = Receiver::new(&config).unwrap();

        let report = receiver
            .run(session.device_mut(), &CancelToken::new(), None, |_| {})
            .unwrap();
        assert_eq!(report.stop, StopReason::TimedOut);
        assert!(report.bytes.is_empty());
        assert!(!session.device().status(ScanDirection::Input).unwrap().is_running());
    }

    #[test]
    fn test_overrun_is_counted_and_skipped() {
        let clock = Arc::new(ManualClock::new());
        let bench = SimBench::loopback(clock.clone());
        let mut session = DeviceSession::open(&bench, RECEIVER_PRODUCT).unwrap();
        let mut config = fast_config();
        config.input.duration_s = 0.5;
        config.poll.max_wait_ms = Some(200);
        let mut receiver = Receiver::new(&config).unwrap();

        // jump 2.2 buffers ahead between two polls
        let cancel = CancelToken::new();
        let ticker = {
            let clock = clock.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(5));
                clock.advance(1.1);
            })
        };
        let report = receiver
            .run(session.device_mut(), &cancel, None, |_| {})
            .unwrap();
        ticker.join().unwrap();

        assert_eq!(report.stop, StopReason::TimedOut);
        assert_eq!(report.overruns, 1);
        assert_eq!(report.samples, 22_000);
        assert_eq!(receiver.decoder().position(), 22_000);
    }
}
