//! Simulated DAQ bench
//!
//! A set of boards sharing one analog line: whatever the output scan plays is
//! what every input scan samples. Scan progress is derived from a [`Clock`]
//! each time a board is touched, so the session loops see the same
//! status/scanned-count behaviour they would see on hardware, just possibly
//! faster.

use crate::config::ChannelRange;
use crate::daq::{
    check_channels, BufferHandle, DaqDevice, DeviceInventory, ScanDirection, ScanOptions,
    ScanState, ScanStatus,
};
use crate::error::{LinkError, Result};
use crate::quantize::{LinearQuantizer, Quantizer, VoltRange};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

pub const SENDER_PRODUCT: &str = "USB-3101FS";
pub const RECEIVER_PRODUCT: &str = "USB-202";

const MAX_BUFFER_SAMPLES: usize = 1 << 24;
const EPSILON: f64 = 1e-9;

/// Source of bench time, in seconds since an arbitrary origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall clock multiplied by a speed-up factor.
#[derive(Debug)]
pub struct ScaledClock {
    origin: Instant,
    speedup: f64,
}

impl ScaledClock {
    pub fn new(speedup: f64) -> Self {
        Self {
            origin: Instant::now(),
            speedup: if speedup > 0.0 { speedup } else { 1.0 },
        }
    }

    pub fn realtime() -> Self {
        Self::new(1.0)
    }

    pub fn speedup(&self) -> f64 {
        self.speedup
    }
}

impl Clock for ScaledClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * self.speedup
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, seconds: f64) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += seconds.max(0.0);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Board description registered on a bench.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDeviceSpec {
    pub name: String,
    pub input_channels: u8,
    pub output_channels: u8,
    pub resolution_bits: u8,
}

impl SimDeviceSpec {
    /// Analog-output-only board on the sending side.
    pub fn usb_3101fs() -> Self {
        Self {
            name: SENDER_PRODUCT.to_string(),
            input_channels: 0,
            output_channels: 4,
            resolution_bits: 16,
        }
    }

    /// Multifunction board on the receiving side.
    pub fn usb_202() -> Self {
        Self {
            name: RECEIVER_PRODUCT.to_string(),
            input_channels: 8,
            output_channels: 2,
            resolution_bits: 12,
        }
    }

    fn channels(&self, direction: ScanDirection) -> u8 {
        match direction {
            ScanDirection::Input => self.input_channels,
            ScanDirection::Output => self.output_channels,
        }
    }
}

#[derive(Debug)]
struct ScanRun {
    rate: u32,
    handle: BufferHandle,
    len: usize,
    continuous: bool,
    /// `None` while armed and waiting for the trigger.
    started_at: Option<f64>,
    count: u64,
}

impl ScanRun {
    fn target(&self, now: f64) -> u64 {
        let Some(t0) = self.started_at else {
            return 0;
        };
        let n = ((now - t0).max(0.0) * self.rate as f64 + EPSILON).floor() as u64;
        if self.continuous {
            n
        } else {
            n.min(self.len as u64)
        }
    }

    fn finished(&self) -> bool {
        !self.continuous && self.count >= self.len as u64
    }

    fn status(&self) -> ScanStatus {
        ScanStatus {
            state: if self.finished() {
                ScanState::Idle
            } else {
                ScanState::Running
            },
            scanned_count: self.count,
            current_index: self.count.saturating_sub(1) as usize % self.len,
        }
    }
}

#[derive(Debug)]
struct SimDevice {
    spec: SimDeviceSpec,
    claimed: bool,
    ranges: HashMap<ScanDirection, VoltRange>,
    buffers: HashMap<u32, Vec<u16>>,
    scans: HashMap<ScanDirection, ScanRun>,
}

impl SimDevice {
    fn new(spec: SimDeviceSpec) -> Self {
        Self {
            spec,
            claimed: false,
            ranges: HashMap::new(),
            buffers: HashMap::new(),
            scans: HashMap::new(),
        }
    }

    fn quantizer(&self, direction: ScanDirection) -> LinearQuantizer {
        let range = self.ranges.get(&direction).copied().unwrap_or_default();
        LinearQuantizer::new(range, self.spec.resolution_bits)
    }

    fn buffer_in_use(&self, handle: BufferHandle) -> Option<ScanDirection> {
        self.scans
            .iter()
            .find(|(_, run)| run.handle == handle)
            .map(|(direction, _)| *direction)
    }
}

/// Rendered output history, indexed by output sample number.
#[derive(Debug, Default)]
struct Line {
    rate: f64,
    started_at: f64,
    origin: u64,
    volts: VecDeque<f64>,
}

impl Line {
    fn drive(&mut self, started_at: f64, rate: u32) {
        self.rate = rate as f64;
        self.started_at = started_at;
        self.origin = 0;
        self.volts.clear();
    }

    fn index_at(&self, t: f64) -> Option<u64> {
        if self.volts.is_empty() || t < self.started_at {
            return None;
        }
        Some(((t - self.started_at) * self.rate + EPSILON).floor() as u64)
    }

    /// Voltage on the line at time `t`. The output holds its last value once
    /// it stops; before anything was played the line rests at 0 V.
    fn volts_at(&self, t: f64) -> f64 {
        let Some(index) = self.index_at(t) else {
            return 0.0;
        };
        let rel = index.saturating_sub(self.origin) as usize;
        self.volts
            .get(rel)
            .or_else(|| self.volts.back())
            .copied()
            .unwrap_or(0.0)
    }

    fn trim_before(&mut self, index: u64) {
        while self.origin < index && self.volts.len() > 1 {
            self.volts.pop_front();
            self.origin += 1;
        }
    }
}

struct Bench {
    clock: Arc<dyn Clock>,
    devices: Vec<SimDevice>,
    line: Line,
    /// Board whose output scan currently drives the line.
    driver: Option<String>,
    next_handle: u32,
}

impl Bench {
    fn device(&self, name: &str) -> Result<&SimDevice> {
        self.devices
            .iter()
            .find(|d| d.spec.name == name && d.claimed)
            .ok_or_else(|| LinkError::DeviceNotFound(name.to_string()))
    }

    fn device_mut(&mut self, name: &str) -> Result<&mut SimDevice> {
        self.devices
            .iter_mut()
            .find(|d| d.spec.name == name && d.claimed)
            .ok_or_else(|| LinkError::DeviceNotFound(name.to_string()))
    }

    /// Bring every running scan up to the current time: outputs are
    /// rendered onto the line first, then inputs sample it.
    fn tick(&mut self) {
        let now = self.clock.now();

        if let Some(name) = &self.driver {
            if let Some(device) = self.devices.iter_mut().find(|d| &d.spec.name == name) {
                render_output(device, &mut self.line, now);
            }
        }

        let mut keep_from: Option<u64> = None;
        for device in &mut self.devices {
            if let Some(next) = capture_input(device, &self.line, now) {
                let index = self.line.index_at(next).unwrap_or(0).saturating_sub(1);
                keep_from = Some(keep_from.map_or(index, |k| k.min(index)));
            }
        }
        let newest = self.line.origin + self.line.volts.len() as u64;
        self.line.trim_before(keep_from.unwrap_or(newest));
    }
}

fn render_output(device: &mut SimDevice, line: &mut Line, now: f64) {
    let quantizer = device.quantizer(ScanDirection::Output);
    let Some(run) = device.scans.get_mut(&ScanDirection::Output) else {
        return;
    };
    let target = run.target(now);
    let buffer = device.buffers.get(&run.handle.0);
    for i in run.count..target {
        let raw = buffer.map_or(0, |b| b[(i % run.len as u64) as usize]);
        line.volts.push_back(quantizer.raw_to_volts(raw));
    }
    run.count = run.count.max(target);
}

/// Sample the line into the input buffer. Returns the time of the next
/// sample still to be taken, if an input scan is running.
fn capture_input(device: &mut SimDevice, line: &Line, now: f64) -> Option<f64> {
    let quantizer = device.quantizer(ScanDirection::Input);
    let run = device.scans.get_mut(&ScanDirection::Input)?;
    let t0 = run.started_at?;
    let target = run.target(now);
    if let Some(buffer) = device.buffers.get_mut(&run.handle.0) {
        for j in run.count..target {
            let t = t0 + j as f64 / run.rate as f64;
            buffer[(j % run.len as u64) as usize] = quantizer.volts_to_raw(line.volts_at(t));
        }
    }
    run.count = run.count.max(target);
    if run.finished() {
        None
    } else {
        Some(t0 + run.count as f64 / run.rate as f64)
    }
}

/// Shared bench; cloning yields another reference to the same boards.
#[derive(Clone)]
pub struct SimBench {
    inner: Arc<Mutex<Bench>>,
}

impl SimBench {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Bench {
                clock,
                devices: Vec::new(),
                line: Line::default(),
                driver: None,
                next_handle: 1,
            })),
        }
    }

    /// Sender and receiver boards wired output-to-input.
    pub fn loopback(clock: Arc<dyn Clock>) -> Self {
        let bench = Self::new(clock);
        bench.add_device(SimDeviceSpec::usb_3101fs());
        bench.add_device(SimDeviceSpec::usb_202());
        bench
    }

    pub fn add_device(&self, spec: SimDeviceSpec) {
        log::debug!("Simulated board {} added", spec.name);
        self.lock().devices.push(SimDevice::new(spec));
    }

    /// Claim a board by product name.
    pub fn claim(&self, product: &str) -> Result<SimulatedDaq> {
        let mut bench = self.lock();
        let device = bench
            .devices
            .iter_mut()
            .find(|d| d.spec.name == product && !d.claimed)
            .ok_or_else(|| LinkError::DeviceNotFound(product.to_string()))?;
        device.claimed = true;
        log::info!("Found DAQ device {}", product);
        Ok(SimulatedDaq {
            name: product.to_string(),
            bench: Arc::clone(&self.inner),
        })
    }

    /// Start every armed scan at the same instant. Returns how many started.
    pub fn fire_trigger(&self) -> usize {
        let mut bench = self.lock();
        bench.tick();
        let now = bench.clock.now();
        let Bench {
            devices,
            line,
            driver,
            ..
        } = &mut *bench;
        let mut fired = 0;
        for device in devices.iter_mut() {
            for (direction, run) in device.scans.iter_mut() {
                if run.started_at.is_some() {
                    continue;
                }
                run.started_at = Some(now);
                fired += 1;
                if *direction == ScanDirection::Output {
                    line.drive(now, run.rate);
                    *driver = Some(device.spec.name.clone());
                }
            }
        }
        log::debug!("Trigger fired, {} scans started", fired);
        fired
    }

    pub fn armed_scans(&self) -> usize {
        self.lock()
            .devices
            .iter()
            .flat_map(|d| d.scans.values())
            .filter(|run| run.started_at.is_none())
            .count()
    }

    /// Voltage currently on the line.
    pub fn line_volts(&self) -> f64 {
        let mut bench = self.lock();
        bench.tick();
        let now = bench.clock.now();
        bench.line.volts_at(now)
    }

    fn lock(&self) -> MutexGuard<'_, Bench> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DeviceInventory for SimBench {
    fn product_names(&self) -> Vec<String> {
        self.lock()
            .devices
            .iter()
            .map(|d| d.spec.name.clone())
            .collect()
    }

    fn open(&self, product: &str) -> Result<Box<dyn DaqDevice>> {
        Ok(Box::new(self.claim(product)?))
    }
}

/// Handle to one claimed board on a [`SimBench`].
pub struct SimulatedDaq {
    name: String,
    bench: Arc<Mutex<Bench>>,
}

impl SimulatedDaq {
    /// Bench state without advancing scans; enough for static lookups.
    fn bench(&self) -> MutexGuard<'_, Bench> {
        self.bench.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bench state with every scan brought up to the current time.
    fn lock(&self) -> MutexGuard<'_, Bench> {
        let mut bench = self.bench();
        bench.tick();
        bench
    }
}

impl DaqDevice for SimulatedDaq {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_channels(&self, direction: ScanDirection) -> u8 {
        self.bench()
            .device(&self.name)
            .map(|d| d.spec.channels(direction))
            .unwrap_or(0)
    }

    fn set_range(&mut self, direction: ScanDirection, range: VoltRange) -> Result<()> {
        let mut bench = self.lock();
        bench.device_mut(&self.name)?.ranges.insert(direction, range);
        Ok(())
    }

    fn allocate_buffer(&mut self, len: usize) -> Result<BufferHandle> {
        if len == 0 || len > MAX_BUFFER_SAMPLES {
            return Err(LinkError::AllocationFailure { len });
        }
        let mut bench = self.lock();
        let id = bench.next_handle;
        bench.device_mut(&self.name)?.buffers.insert(id, vec![0; len]);
        bench.next_handle += 1;
        Ok(BufferHandle(id))
    }

    fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        let mut bench = self.lock();
        let device = bench.device_mut(&self.name)?;
        if let Some(direction) = device.buffer_in_use(handle) {
            return Err(LinkError::InvalidConfig(format!(
                "buffer {} still in use by the {:?} scan",
                handle.0, direction
            )));
        }
        device
            .buffers
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(LinkError::InvalidBufferHandle)
    }

    fn write_buffer(&mut self, handle: BufferHandle, offset: usize, raw: &[u16]) -> Result<()> {
        let mut bench = self.lock();
        let buffer = bench
            .device_mut(&self.name)?
            .buffers
            .get_mut(&handle.0)
            .ok_or(LinkError::InvalidBufferHandle)?;
        let end = offset + raw.len();
        if end > buffer.len() {
            return Err(LinkError::BufferTooSmall {
                needed: end,
                available: buffer.len(),
            });
        }
        buffer[offset..end].copy_from_slice(raw);
        Ok(())
    }

    fn read_buffer(&self, handle: BufferHandle, offset: usize, out: &mut [u16]) -> Result<()> {
        let bench = self.lock();
        let buffer = bench
            .device(&self.name)?
            .buffers
            .get(&handle.0)
            .ok_or(LinkError::InvalidBufferHandle)?;
        let end = offset + out.len();
        if end > buffer.len() {
            return Err(LinkError::BufferTooSmall {
                needed: end,
                available: buffer.len(),
            });
        }
        out.copy_from_slice(&buffer[offset..end]);
        Ok(())
    }

    fn start_scan(
        &mut self,
        direction: ScanDirection,
        channels: ChannelRange,
        rate: u32,
        handle: BufferHandle,
        options: ScanOptions,
    ) -> Result<()> {
        check_channels(&*self, direction, channels)?;
        if rate == 0 {
            return Err(LinkError::ScanStartFailed("sample rate is zero".to_string()));
        }

        let mut bench = self.lock();
        let now = bench.clock.now();
        let name = self.name.clone();
        if direction == ScanDirection::Output {
            if let Some(owner) = bench.driver.as_ref().filter(|owner| **owner != name) {
                return Err(LinkError::ScanStartFailed(format!(
                    "line already driven by {}",
                    owner
                )));
            }
        }

        let device = bench.device_mut(&name)?;
        if device.scans.contains_key(&direction) {
            return Err(LinkError::ScanStartFailed(format!(
                "{:?} scan already running",
                direction
            )));
        }
        let len = device
            .buffers
            .get(&handle.0)
            .map(Vec::len)
            .ok_or(LinkError::InvalidBufferHandle)?;
        let started_at = (!options.external_trigger).then_some(now);
        device.scans.insert(
            direction,
            ScanRun {
                rate,
                handle,
                len,
                continuous: options.continuous,
                started_at,
                count: 0,
            },
        );

        if direction == ScanDirection::Output && started_at.is_some() {
            bench.line.drive(now, rate);
            bench.driver = Some(name);
        }
        log::info!(
            "{} {:?} scan {} at {} Hz over {} samples",
            self.name,
            direction,
            if started_at.is_some() { "started" } else { "armed" },
            rate,
            len
        );
        Ok(())
    }

    fn status(&self, direction: ScanDirection) -> Result<ScanStatus> {
        let bench = self.lock();
        Ok(bench
            .device(&self.name)?
            .scans
            .get(&direction)
            .map_or_else(ScanStatus::idle, ScanRun::status))
    }

    fn stop_scan(&mut self, direction: ScanDirection) -> Result<()> {
        let mut bench = self.lock();
        let name = self.name.clone();
        if bench.device_mut(&name)?.scans.remove(&direction).is_some() {
            log::info!("{} {:?} scan stopped", name, direction);
        }
        if direction == ScanDirection::Output && bench.driver.as_deref() == Some(name.as_str()) {
            bench.driver = None;
        }
        Ok(())
    }

    fn raw_to_volts(&self, direction: ScanDirection, raw: u16) -> f64 {
        let bench = self.bench();
        match bench.device(&self.name) {
            Ok(device) => device.quantizer(direction).raw_to_volts(raw),
            Err(_) => 0.0,
        }
    }

    fn volts_to_raw(&self, direction: ScanDirection, volts: f64) -> u16 {
        let bench = self.bench();
        match bench.device(&self.name) {
            Ok(device) => device.quantizer(direction).volts_to_raw(volts),
            Err(_) => 0,
        }
    }

    fn release(&mut self) -> Result<()> {
        let mut bench = self.lock();
        let name = self.name.clone();
        let device = bench.device_mut(&name)?;
        device.scans.clear();
        device.buffers.clear();
        device.claimed = false;
        if bench.driver.as_deref() == Some(name.as_str()) {
            bench.driver = None;
        }
        log::info!("Released DAQ device {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_bench() -> (Arc<ManualClock>, SimBench) {
        let clock = Arc::new(ManualClock::new());
        let bench = SimBench::loopback(clock.clone());
        (clock, bench)
    }

    #[test]
    fn test_unknown_product_not_found() {
        let (_, bench) = manual_bench();
        assert!(matches!(
            bench.claim("USB-1608"),
            Err(LinkError::DeviceNotFound(_))
        ));
        let _held = bench.claim(RECEIVER_PRODUCT).unwrap();
        // already claimed
        assert!(bench.open(RECEIVER_PRODUCT).is_err());
    }

    #[test]
    fn test_channel_range_checked() {
        let (_, bench) = manual_bench();
        let mut daq = bench.claim(SENDER_PRODUCT).unwrap();
        let handle = daq.allocate_buffer(100).unwrap();
        let err = daq
            .start_scan(
                ScanDirection::Input,
                ChannelRange::single(0),
                1000,
                handle,
                ScanOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, LinkError::ChannelRangeInvalid { available: 0, .. }));
    }

    #[test]
    fn test_allocation_failure() {
        let (_, bench) = manual_bench();
        let mut daq = bench.claim(SENDER_PRODUCT).unwrap();
        assert!(matches!(
            daq.allocate_buffer(0),
            Err(LinkError::AllocationFailure { len: 0 })
        ));
    }

    #[test]
    fn test_single_pass_scan_goes_idle() {
        let (clock, bench) = manual_bench();
        let mut daq = bench.claim(RECEIVER_PRODUCT).unwrap();
        let handle = daq.allocate_buffer(1_000).unwrap();
        daq.start_scan(
            ScanDirection::Input,
            ChannelRange::single(0),
            1_000,
            handle,
            ScanOptions::default(),
        )
        .unwrap();

        clock.advance(0.25);
        let status = daq.status(ScanDirection::Input).unwrap();
        assert!(status.is_running());
        assert_eq!(status.scanned_count, 250);
        assert_eq!(status.current_index, 249);

        clock.advance(5.0);
        let status = daq.status(ScanDirection::Input).unwrap();
        assert_eq!(status.state, ScanState::Idle);
        assert_eq!(status.scanned_count, 1_000);
    }

    #[test]
    fn test_continuous_output_reaches_input() {
        let (clock, bench) = manual_bench();
        let mut tx = bench.claim(SENDER_PRODUCT).unwrap();
        let mut rx = bench.claim(RECEIVER_PRODUCT).unwrap();

        let out = tx.allocate_buffer(100).unwrap();
        let code = tx.volts_to_raw(ScanDirection::Output, 1.6);
        tx.write_buffer(out, 0, &[code; 100]).unwrap();
        let input = rx.allocate_buffer(300).unwrap();

        let options = ScanOptions::continuous().triggered();
        tx.start_scan(ScanDirection::Output, ChannelRange::single(0), 1_000, out, options)
            .unwrap();
        rx.start_scan(ScanDirection::Input, ChannelRange::single(0), 1_000, input, options)
            .unwrap();
        assert_eq!(bench.armed_scans(), 2);

        clock.advance(1.0);
        // nothing moves before the trigger
        assert_eq!(rx.status(ScanDirection::Input).unwrap().scanned_count, 0);
        assert_eq!(bench.fire_trigger(), 2);

        clock.advance(0.5);
        let tx_status = tx.status(ScanDirection::Output).unwrap();
        let rx_status = rx.status(ScanDirection::Input).unwrap();
        assert_eq!(tx_status.scanned_count, 500);
        assert_eq!(rx_status.scanned_count, 500);
        assert_eq!(rx_status.current_index, 499 % 300);

        let mut raw = [0u16; 300];
        rx.read_buffer(input, 0, &mut raw).unwrap();
        for code in raw {
            let volts = rx.raw_to_volts(ScanDirection::Input, code);
            assert!((volts - 1.6).abs() < 0.01, "{}", volts);
        }
    }

    #[test]
    fn test_output_holds_last_value_after_stop() {
        let (clock, bench) = manual_bench();
        let mut tx = bench.claim(SENDER_PRODUCT).unwrap();
        let out = tx.allocate_buffer(10).unwrap();
        let code = tx.volts_to_raw(ScanDirection::Output, 1.4);
        tx.write_buffer(out, 0, &[code; 10]).unwrap();
        tx.start_scan(
            ScanDirection::Output,
            ChannelRange::single(0),
            100,
            out,
            ScanOptions::continuous(),
        )
        .unwrap();
        clock.advance(0.5);
        tx.stop_scan(ScanDirection::Output).unwrap();
        clock.advance(0.5);
        assert!((bench.line_volts() - 1.4).abs() < 0.01);

        // buffer no longer used, so it can be freed
        tx.free_buffer(out).unwrap();
        assert!(matches!(tx.free_buffer(out), Err(LinkError::InvalidBufferHandle)));
    }

    #[test]
    fn test_buffer_in_use_not_freed() {
        let (_, bench) = manual_bench();
        let mut tx = bench.claim(SENDER_PRODUCT).unwrap();
        let out = tx.allocate_buffer(10).unwrap();
        tx.start_scan(
            ScanDirection::Output,
            ChannelRange::single(0),
            100,
            out,
            ScanOptions::continuous(),
        )
        .unwrap();
        assert!(tx.free_buffer(out).is_err());
        tx.release().unwrap();
        // board can be claimed again after release
        bench.claim(SENDER_PRODUCT).unwrap();
    }
}
