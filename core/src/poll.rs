use crate::error::{LinkError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared stop flag, raised from an interrupt handler or a peer task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the flag is raised.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(LinkError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Fixed-period polling with an optional upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    /// `None` blocks until the probe succeeds or the token is cancelled.
    pub limit: Option<Duration>,
}

impl WaitPolicy {
    pub fn indefinite(interval: Duration) -> Self {
        Self {
            interval,
            limit: None,
        }
    }

    pub fn bounded(interval: Duration, limit: Duration) -> Self {
        Self {
            interval,
            limit: Some(limit),
        }
    }
}

/// Deadline tracker for loops that poll on their own schedule.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn start(policy: &WaitPolicy) -> Self {
        Self {
            started: Instant::now(),
            limit: policy.limit,
        }
    }

    pub fn check(&self) -> Result<()> {
        match self.limit {
            Some(limit) if self.started.elapsed() >= limit => Err(LinkError::Timeout),
            _ => Ok(()),
        }
    }
}

/// Call `probe` every `policy.interval` until it yields a value.
///
/// Cancellation is checked before every probe; the limit after every
/// unsuccessful one.
pub fn poll_until<T, F>(policy: &WaitPolicy, cancel: &CancelToken, mut probe: F) -> Result<T>
where
    F: FnMut() -> Result<Option<T>>,
{
    let deadline = Deadline::start(policy);
    loop {
        cancel.check()?;
        if let Some(value) = probe()? {
            return Ok(value);
        }
        deadline.check()?;
        std::thread::sleep(policy.interval);
    }
}
