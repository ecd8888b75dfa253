//! Liquid-crystal optical link over DAQ analog I/O
//!
//! Characters are sent one frame per output buffer: a fixed-frequency
//! bipolar carrier whose amplitude is keyed between two levels in fixed-width
//! slots (preamble, 8 data bits MSB first, idle). The receiver samples the
//! line continuously and takes one threshold decision per data slot.

pub mod carrier;
pub mod config;
pub mod daq;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod framing;
pub mod poll;
pub mod quantize;
pub mod receiver;
pub mod session;
pub mod sim;
pub mod slot;
pub mod sweep;
pub mod task;
pub mod threshold;
pub mod transmitter;

pub use config::LinkConfig;
pub use daq::{DaqDevice, DeviceInventory, ScanDirection, ScanOptions, ScanStatus};
pub use decoder::FrameDecoder;
pub use encoder::{Encoder, Waveform};
pub use error::{LinkError, Result};
pub use poll::{CancelToken, WaitPolicy};
pub use receiver::{ReceiveReport, Receiver, StopReason};
pub use session::{DeviceSession, ScanGuard};
pub use task::Task;
pub use transmitter::{TransmitReport, Transmitter};

// Default timing
pub const DEFAULT_SAMPLE_RATE: u32 = 20_000;
pub const DEFAULT_DURATION_S: f64 = 1.0;
pub const DEFAULT_CARRIER_HZ: f64 = 200.0;
pub const DEFAULT_SLOT_WIDTH_S: f64 = 0.03;

// Drive levels (V); the cell is near its switching knee here
pub const DEFAULT_A_LOW: f64 = 1.4;
pub const DEFAULT_A_HIGH: f64 = 1.6;

// Frame configuration
pub const DATA_SLOTS: usize = 8;
pub const IDLE_SLOTS: usize = 1;

pub const DEFAULT_RENDEZVOUS_PORT: u16 = 5555;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
