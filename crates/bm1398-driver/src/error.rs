//! Error types for chain driver operations

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;

/// Chain bring-up stage, as reported in [`DriverError::ChainInitFailure`]
/// and by [`crate::ChainController::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainState {
    /// Not yet touched, or a previous bring-up failed.
    Uninitialized,
    /// Reset line pulse.
    HardwareReset,
    /// Stage 1: broadcast soft reset and ticket mask.
    SoftReset,
    /// Stage 2: enumeration, clocks, baud, core reset.
    Configure,
    /// Accepting work.
    Ready,
}

impl std::fmt::Display for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::HardwareReset => "hardware reset",
            Self::SoftReset => "soft reset",
            Self::Configure => "configure",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during driver operations
#[derive(Debug, Error)]
pub enum DriverError {
    /// Bad index, length or argument, or use before the device is initialized.
    /// No hardware access happened.
    #[error("Validation failed: {reason}")]
    Validation {
        /// What was wrong
        reason: String,
    },

    /// The command trigger's ready bit never cleared
    #[error("Command bus timeout on chain {chain} after {waited:?}")]
    CommandTimeout {
        /// Chain the frame was addressed to
        chain: u8,
        /// How long the driver polled
        waited: Duration,
    },

    /// Work FIFO never reported space, or the nonce FIFO stayed empty
    #[error("FIFO timeout on chain {chain} after {waited:?}: {what}")]
    FifoTimeout {
        /// Chain being waited on
        chain: u8,
        /// Which FIFO condition was awaited
        what: &'static str,
        /// How long the driver polled
        waited: Duration,
    },

    /// A mandatory bring-up step failed
    #[error("Chain {chain} init failed in {stage}: {source}")]
    ChainInitFailure {
        /// Chain being brought up
        chain: u8,
        /// Stage that was running
        stage: ChainState,
        /// Underlying error
        #[source]
        source: Box<DriverError>,
    },

    /// No validated PLL vector exists for the requested frequency
    #[error("Unsupported frequency {requested_mhz} MHz (validated: {fallback_mhz} MHz)")]
    UnsupportedFrequency {
        /// Requested frequency
        requested_mhz: u32,
        /// Operating point used instead
        fallback_mhz: u32,
    },

    /// FPGA device node missing
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// Mapping the register window failed
    #[error("Failed to map register window: {reason}")]
    MapFailed {
        /// Reason for failure
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl DriverError {
    /// Create a validation error
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create a map failed error
    pub fn map_failed(reason: impl Into<String>) -> Self {
        Self::MapFailed {
            reason: reason.into(),
        }
    }

    /// Wrap `self` as a bring-up failure of `chain` in `stage`
    #[must_use]
    pub fn during(self, chain: u8, stage: ChainState) -> Self {
        Self::ChainInitFailure {
            chain,
            stage,
            source: Box::new(self),
        }
    }

    /// Whether this is a timeout of either kind
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::CommandTimeout { .. } | Self::FifoTimeout { .. })
    }
}
