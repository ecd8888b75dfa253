//! Scoped ownership of driver resources
//!
//! Every exit path (normal completion, a driver error, cancellation) goes
//! through the same cleanup: the scan guard rests the output, stops the scan
//! and frees its buffer, and the device session hands the board back.

use crate::config::ChannelRange;
use crate::daq::{
    read_circular, BufferHandle, DaqDevice, DeviceInventory, ScanDirection, ScanOptions,
    ScanStatus,
};
use crate::encoder::Waveform;
use crate::error::{LinkError, Result};

/// A claimed board, released on drop.
pub struct DeviceSession {
    device: Box<dyn DaqDevice>,
}

impl DeviceSession {
    pub fn open(inventory: &dyn DeviceInventory, product: &str) -> Result<Self> {
        let device = inventory.open(product).map_err(|e| {
            if matches!(e, LinkError::DeviceNotFound(_)) {
                log::error!(
                    "No {} board; visible products: {:?}",
                    product,
                    inventory.product_names()
                );
            }
            e
        })?;
        Ok(Self { device })
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }

    pub fn device(&self) -> &dyn DaqDevice {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> &mut dyn DaqDevice {
        self.device.as_mut()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Err(e) = self.device.release() {
            log::warn!("Failed to release {}: {}", self.device.name(), e);
        }
    }
}

/// Quantize a waveform with the board's own output conversion.
pub fn quantize(device: &dyn DaqDevice, wave: &Waveform) -> Result<Vec<u16>> {
    let mut raw = vec![0u16; wave.len()];
    wave.write_into(&mut raw, |v| device.volts_to_raw(ScanDirection::Output, v))?;
    Ok(raw)
}

/// One scan buffer and, once started, its background scan.
pub struct ScanGuard<'a> {
    device: &'a mut dyn DaqDevice,
    direction: ScanDirection,
    handle: BufferHandle,
    len: usize,
    rest: Option<Vec<u16>>,
    scanning: bool,
    released: bool,
}

impl<'a> ScanGuard<'a> {
    pub fn allocate(device: &'a mut dyn DaqDevice, direction: ScanDirection, len: usize) -> Result<Self> {
        let handle = device.allocate_buffer(len)?;
        log::debug!("{} {:?} buffer of {} samples allocated", device.name(), direction, len);
        Ok(Self {
            device,
            direction,
            handle,
            len,
            rest: None,
            scanning: false,
            released: false,
        })
    }

    /// Raw codes written over the buffer before the scan is stopped.
    pub fn with_rest(mut self, raw: Vec<u16>) -> Self {
        self.rest = Some(raw);
        self
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn device(&self) -> &dyn DaqDevice {
        &*self.device
    }

    pub fn write(&mut self, offset: usize, raw: &[u16]) -> Result<()> {
        self.device.write_buffer(self.handle, offset, raw)
    }

    pub fn start(&mut self, channels: ChannelRange, rate: u32, options: ScanOptions) -> Result<()> {
        self.device
            .start_scan(self.direction, channels, rate, self.handle, options)?;
        self.scanning = true;
        Ok(())
    }

    pub fn status(&self) -> Result<ScanStatus> {
        self.device.status(self.direction)
    }

    /// Fill `out` from absolute scan position `from`, across the wrap.
    pub fn read_from(&self, from: u64, out: &mut [u16]) -> Result<()> {
        read_circular(&*self.device, self.handle, self.len, from, out)
    }

    /// Stop the scan, rest the output and free the buffer. Unlike drop this
    /// reports the first failure.
    pub fn finish(mut self) -> Result<()> {
        self.cleanup()
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut first_error = None;
        if let Some(rest) = self.rest.take() {
            if let Err(e) = self.device.write_buffer(self.handle, 0, &rest) {
                first_error.get_or_insert(e);
            }
        }
        if self.scanning {
            self.scanning = false;
            if let Err(e) = self.device.stop_scan(self.direction) {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.device.free_buffer(self.handle) {
            first_error.get_or_insert(e);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            log::warn!("{:?} scan cleanup failed: {}", self.direction, e);
        }
    }
}
