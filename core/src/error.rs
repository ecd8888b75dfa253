use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("DAQ device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to allocate scan buffer of {len} samples")]
    AllocationFailure { len: usize },

    #[error("Channel range {low}..={high} invalid, device has {available} channels")]
    ChannelRangeInvalid { low: u8, high: u8, available: u8 },

    #[error("Scan failed to start: {0}")]
    ScanStartFailed(String),

    #[error("Ambiguous sample at stream index {sample_index}")]
    DecodeAmbiguous { sample_index: u64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Frame needs {needed} slots but the waveform holds {available}")]
    FrameTooLong { needed: usize, available: usize },

    #[error("Destination buffer too small: need {needed} samples, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Unknown or released buffer handle")]
    InvalidBufferHandle,

    #[error("Scan is not running")]
    ScanNotRunning,

    #[error("Operation timeout")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Task panicked: {0}")]
    TaskPanicked(String),
}

impl LinkError {
    /// Driver-side failures end the session; decode and wait errors do not
    /// imply anything about the hardware.
    pub fn is_device_fault(&self) -> bool {
        matches!(
            self,
            LinkError::DeviceNotFound(_)
                | LinkError::AllocationFailure { .. }
                | LinkError::ChannelRangeInvalid { .. }
                | LinkError::ScanStartFailed(_)
                | LinkError::InvalidBufferHandle
        )
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_faults() {
        assert!(LinkError::DeviceNotFound("USB-202".to_string()).is_device_fault());
        assert!(LinkError::AllocationFailure { len: 0 }.is_device_fault());
        assert!(!LinkError::Timeout.is_device_fault());
        assert!(!LinkError::InvalidInput("\u{263a}".to_string()).is_device_fault());
    }
}
