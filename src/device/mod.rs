//! Device placement for super-network trainable state.
//!
//! Tracks which device a model's parameters live on and models the two
//! transfer modes the finalizer relies on: a blocking move that completes
//! before returning, and a non-blocking move that is only enqueued and
//! completes on the next synchronization point.
//!
//! # Example
//! ```
//! use kolosal_nas::device::{Device, Placement, TransferMode};
//!
//! let mut placement = Placement::new(Device::Cuda(0));
//! placement.request(Device::Cpu, TransferMode::NonBlocking);
//! assert_eq!(placement.current(), Device::Cuda(0));
//! assert_eq!(placement.pending(), Some(Device::Cpu));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// A compute device that can hold trainable state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Device {
    /// Host memory
    #[default]
    Cpu,
    /// CUDA accelerator with ordinal
    Cuda(usize),
    /// Apple Metal accelerator
    Metal,
}

impl Device {
    /// Whether this device is host memory
    pub fn is_host(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
            Device::Metal => write!(f, "metal"),
        }
    }
}

/// How a device transfer is performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMode {
    /// Return only after the transfer has completed
    Blocking,
    /// Enqueue the transfer and return immediately; the caller must
    /// synchronize before relying on the new placement
    NonBlocking,
}

/// Current residency of a model plus at most one in-flight transfer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    current: Device,
    pending: Option<Device>,
}

impl Placement {
    /// Create a placement resident on `device` with nothing in flight
    pub fn new(device: Device) -> Self {
        Self {
            current: device,
            pending: None,
        }
    }

    /// Device the state is resident on right now
    pub fn current(&self) -> Device {
        self.current
    }

    /// Target of the in-flight transfer, if any
    pub fn pending(&self) -> Option<Device> {
        self.pending
    }

    /// Request a transfer to `target`.
    ///
    /// Returns the device the state must be moved to immediately, if any.
    /// A blocking request supersedes an in-flight transfer and completes
    /// before returning. A non-blocking request replaces whatever was in
    /// flight.
    pub fn request(&mut self, target: Device, mode: TransferMode) -> Option<Device> {
        match mode {
            TransferMode::Blocking => {
                self.pending = None;
                if self.current == target {
                    None
                } else {
                    self.current = target;
                    Some(target)
                }
            }
            TransferMode::NonBlocking => {
                self.pending = (self.current != target).then_some(target);
                None
            }
        }
    }

    /// Complete the in-flight transfer, returning its target
    pub fn synchronize(&mut self) -> Option<Device> {
        let target = self.pending.take()?;
        self.current = target;
        Some(target)
    }
}
