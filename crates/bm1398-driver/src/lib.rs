//! Userspace driver for BM1398 hash chains on the Antminer S19 control board.
//!
//! The FPGA exposes a 4608-byte register window. Everything the driver does
//! goes through it: chip commands are pushed through a 12-byte command
//! buffer, work through a FIFO port, and nonces come back through a second
//! FIFO.
//!
//! # Layers
//!
//! ```text
//! RegisterWindow (MmapWindow | SimWindow)
//!   └─ Device            logical register map, boot verification, chain table
//!        ├─ bus          CRC5 command frames under the bus lock
//!        ├─ freq         PLL0 and UART baud
//!        ├─ chain        HardwareReset → SoftReset → Configure → Ready
//!        └─ work         work FIFO feed, nonce FIFO drain
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use bm1398_driver::{ChainId, Device, DriverConfig};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // PSU and DC-DC must already be on.
//! let dev = Device::open(DriverConfig::from_env())?;
//! let chain = ChainId::new(0).ok_or("bad chain")?;
//! dev.init_chain(chain)?;
//!
//! dev.send_work(chain, 0, &[0u8; 12], &[[0u8; 32]; 4])?;
//! dev.wait_for_nonces(chain, Duration::from_secs(5))?;
//! for nonce in dev.drain_nonces(64)? {
//!     println!("{nonce:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Timing (per chain, 114 chips)
//!
//! | Stage | Settle time |
//! |-------|-------------|
//! | Hardware reset | 802 ms |
//! | Soft reset | 110 ms |
//! | Configure | ~4.4 s (enumeration alone 1.15 s) |

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod bus;
mod chain;
pub mod clock;
mod config;
mod device;
mod error;
mod freq;
pub mod pattern;
pub mod sim;
mod window;
mod work;

pub use bm1398_chip::{ChainId, Frame, NonceResponse, Target};
pub use bus::{COMMAND_POLL_INTERVAL, COMMAND_TIMEOUT, REPLY_POLL_INTERVAL};
pub use chain::ChainController;
pub use clock::{Clock, SystemClock, VirtualClock};
pub use config::{DriverConfig, DEFAULT_DEVICE_PATH};
pub use device::{Chain, Device};
pub use error::{ChainState, DriverError, Result};
pub use freq::resolve_frequency;
pub use pattern::{Correlation, PatternEntry, PatternSet};
pub use sim::SimWindow;
pub use window::{check_word_access, MmapWindow, RegisterWindow};
pub use work::{FIFO_POLL_INTERVAL, STALE_DRAIN_ROUNDS, WORK_SPACE_TIMEOUT};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        ChainController, ChainId, ChainState, Correlation, Device, DriverConfig, DriverError,
        NonceResponse, PatternSet, RegisterWindow, Result, Target,
    };
}
