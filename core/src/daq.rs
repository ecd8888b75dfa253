//! Driver boundary for data-acquisition boards
//!
//! The codec never talks to hardware directly. Everything it needs from a
//! board (scan buffers, background scans, status polling, engineering-unit
//! conversion) goes through [`DaqDevice`], so a vendor binding and the
//! simulated bench in [`crate::sim`] are interchangeable.

use crate::config::ChannelRange;
use crate::error::{LinkError, Result};
use crate::quantize::VoltRange;

/// Which half of a board a call addresses (analog in or analog out).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Running,
}

/// Snapshot reported by the driver's status call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStatus {
    pub state: ScanState,
    /// Samples moved since the scan started; keeps growing across wraps.
    pub scanned_count: u64,
    /// Buffer index of the most recent sample.
    pub current_index: usize,
}

impl ScanStatus {
    pub fn idle() -> Self {
        Self {
            state: ScanState::Idle,
            scanned_count: 0,
            current_index: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ScanState::Running
    }
}

/// Opaque driver-owned scan buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

/// Scans always run in the background; these pick the remaining modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanOptions {
    /// Wrap around the buffer until stopped instead of going idle.
    pub continuous: bool,
    /// Arm the scan and wait for a trigger edge before sampling.
    pub external_trigger: bool,
}

impl ScanOptions {
    pub fn continuous() -> Self {
        Self {
            continuous: true,
            external_trigger: false,
        }
    }

    pub fn triggered(mut self) -> Self {
        self.external_trigger = true;
        self
    }
}

pub trait DaqDevice: Send {
    /// Product name used to find the board in the inventory.
    fn name(&self) -> &str;

    fn num_channels(&self, direction: ScanDirection) -> u8;

    fn set_range(&mut self, direction: ScanDirection, range: VoltRange) -> Result<()>;

    fn allocate_buffer(&mut self, len: usize) -> Result<BufferHandle>;

    fn free_buffer(&mut self, handle: BufferHandle) -> Result<()>;

    /// Copy raw codes into a buffer starting at `offset`.
    fn write_buffer(&mut self, handle: BufferHandle, offset: usize, raw: &[u16]) -> Result<()>;

    /// Copy raw codes out of a buffer starting at `offset`.
    fn read_buffer(&self, handle: BufferHandle, offset: usize, out: &mut [u16]) -> Result<()>;

    fn start_scan(
        &mut self,
        direction: ScanDirection,
        channels: ChannelRange,
        rate: u32,
        handle: BufferHandle,
        options: ScanOptions,
    ) -> Result<()>;

    fn status(&self, direction: ScanDirection) -> Result<ScanStatus>;

    fn stop_scan(&mut self, direction: ScanDirection) -> Result<()>;

    fn raw_to_volts(&self, direction: ScanDirection, raw: u16) -> f64;

    fn volts_to_raw(&self, direction: ScanDirection, volts: f64) -> u16;

    /// Give the board back to the driver. Further calls are undefined.
    fn release(&mut self) -> Result<()>;
}

/// Boards visible to the driver, looked up by product name.
pub trait DeviceInventory {
    fn product_names(&self) -> Vec<String>;

    /// Claim the first board whose product name matches.
    fn open(&self, product: &str) -> Result<Box<dyn DaqDevice>>;
}

/// Reject channel spans the board does not have.
pub fn check_channels(
    device: &dyn DaqDevice,
    direction: ScanDirection,
    channels: ChannelRange,
) -> Result<()> {
    let available = device.num_channels(direction);
    if channels.low > channels.high || channels.high >= available {
        return Err(LinkError::ChannelRangeInvalid {
            low: channels.low,
            high: channels.high,
            available,
        });
    }
    Ok(())
}

/// Fill `out` from absolute scan position `from` of a
/// circular buffer of `len` samples, splitting at the wrap.
pub fn read_circular(
    device: &dyn DaqDevice,
    handle: BufferHandle,
    len: usize,
    from: u64,
    out: &mut [u16],
) -> Result<()> {
    if out.len() > len {
        return Err(LinkError::BufferTooSmall {
            needed: out.len(),
            available: len,
        });
    }
    let start = (from % len as u64) as usize;
    let first = out.len().min(len - start);
    let (head, tail) = out.split_at_mut(first);
    device.read_buffer(handle, start, head)?;
    if !tail.is_empty() {
        device.read_buffer(handle, 0, tail)?;
    }
    Ok(())
}
