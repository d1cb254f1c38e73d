//! Device context and register access layer
//!
//! [`Device`] owns the FPGA register window for its whole lifetime. It
//! provides logical (table-mapped) and direct register access, runs the
//! boot-state verification on open, and tracks per-chain state. The command
//! bus, frequency/baud and work/nonce operations are implemented on the same
//! type in their own modules.

use crate::clock::{Clock, SystemClock};
use crate::config::DriverConfig;
use crate::error::{ChainState, DriverError, Result};
use crate::window::{MmapWindow, RegisterWindow};
use bm1398_chip::asic::{self, ChainId, MAX_CHAINS};
use bm1398_chip::regs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One hashboard slot as seen by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chain {
    /// Slot number
    pub id: ChainId,
    /// Chips expected on the board
    pub chip_count: usize,
    /// Step between enumerated chip addresses
    pub address_interval: u16,
    /// Whether the hash-on-plug register reports a board in this slot
    pub detected: bool,
}

impl Chain {
    fn new(id: ChainId, chip_count: usize, detected: bool) -> Self {
        Self {
            id,
            chip_count,
            address_interval: asic::address_interval(chip_count),
            detected,
        }
    }
}

/// FPGA device context
///
/// Generic over the register window so the same driver code runs against
/// the mapped device node and against [`crate::sim::SimWindow`].
///
/// `Device` is `Sync`. After chain bring-up one thread may submit work while
/// another drains nonces; command-bus traffic is serialised internally.
#[derive(Debug)]
pub struct Device<W: RegisterWindow = MmapWindow> {
    window: W,
    clock: Arc<dyn Clock>,
    config: DriverConfig,
    initialized: AtomicBool,
    pub(crate) bus: Mutex<()>,
    pub(crate) nonce_reader: Mutex<()>,
    chains: Mutex<[Chain; MAX_CHAINS]>,
    states: Mutex<[ChainState; MAX_CHAINS]>,
    pub(crate) work_send_enabled: AtomicBool,
}

impl Device<MmapWindow> {
    /// Map the FPGA device node named in `config` and run boot verification
    ///
    /// # Errors
    ///
    /// Returns error if the device node is missing, cannot be mapped, or a
    /// boot-state register access fails.
    pub fn open(config: DriverConfig) -> Result<Self> {
        tracing::debug!("Opening FPGA device {}", config.device_path.display());
        let window = MmapWindow::open(&config.device_path, regs::WINDOW_SIZE)?;
        let device = Self::with_window(window, Arc::new(SystemClock::new()), config)?;
        device.initialize()?;
        Ok(device)
    }
}

impl<W: RegisterWindow> Device<W> {
    /// Wrap an existing window. The device starts uninitialized; call
    /// [`Device::initialize`] before using logical registers.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Validation`] if the window is smaller than the
    /// FPGA register file.
    pub fn with_window(window: W, clock: Arc<dyn Clock>, config: DriverConfig) -> Result<Self> {
        if window.size() < regs::WINDOW_SIZE {
            return Err(DriverError::validation(format!(
                "register window is {:#x} bytes, need {:#x}",
                window.size(),
                regs::WINDOW_SIZE
            )));
        }
        let chips = config.chips_per_chain;
        let chains = ChainId::ALL.map(|id| Chain::new(id, chips, false));
        Ok(Self {
            window,
            clock,
            config,
            initialized: AtomicBool::new(false),
            bus: Mutex::new(()),
            nonce_reader: Mutex::new(()),
            chains: Mutex::new(chains),
            states: Mutex::new([ChainState::Uninitialized; MAX_CHAINS]),
            work_send_enabled: AtomicBool::new(false),
        })
    }

    /// Verify and prepare the FPGA boot state, then detect chains.
    ///
    /// Sets the chip-init bit in the control word if clear, checks the work
    /// routing and timeout control registers against their golden values,
    /// pulses bit 31 of work routing, rewrites timeout control if it drifted,
    /// and programs the FPGA work path. Safe to call again.
    ///
    /// # Errors
    ///
    /// Propagates register access failures.
    pub fn initialize(&self) -> Result<()> {
        tracing::info!("Initializing FPGA register window");

        let control = self.read_direct(regs::CONTROL)?;
        if control & regs::control::CHIP_INIT == 0 {
            tracing::debug!("Control word {control:#010x}: enabling chip init path");
            self.write_direct(regs::CONTROL, control | regs::control::CHIP_INIT)?;
            self.settle_ms(100);
        }

        let routing = self.read_direct(regs::WORK_ROUTING)?;
        if routing != regs::WORK_ROUTING_GOLDEN {
            tracing::warn!(
                "Work routing is {routing:#010x}, expected {:#010x}",
                regs::WORK_ROUTING_GOLDEN
            );
        }
        let timeout = self.read_direct(regs::TIMEOUT_CONTROL)?;
        if timeout != regs::TIMEOUT_CONTROL_GOLDEN {
            tracing::warn!(
                "Timeout control is {timeout:#010x}, expected {:#010x}",
                regs::TIMEOUT_CONTROL_GOLDEN
            );
        }

        self.write_direct(regs::WORK_ROUTING, routing | regs::routing::TOGGLE)?;
        self.settle_ms(10);
        self.write_direct(regs::WORK_ROUTING, routing & !regs::routing::TOGGLE)?;
        self.settle_ms(10);

        if self.read_direct(regs::TIMEOUT_CONTROL)? != regs::TIMEOUT_CONTROL_GOLDEN {
            tracing::info!("Restoring timeout control to {:#010x}", regs::TIMEOUT_CONTROL_GOLDEN);
            self.write_direct(regs::TIMEOUT_CONTROL, regs::TIMEOUT_CONTROL_GOLDEN)?;
            self.settle_ms(100);
        }

        // The work path is programmed through the logical map.
        self.initialized.store(true, Ordering::SeqCst);
        if let Err(e) = self.configure_work_path() {
            self.initialized.store(false, Ordering::SeqCst);
            return Err(e);
        }
        let detected = self.detect_chains()?;
        tracing::info!("FPGA ready, hash-on-plug {detected:#05b}");
        Ok(())
    }

    fn configure_work_path(&self) -> Result<()> {
        self.write_indirect(regs::IDX_INIT_18, regs::WORK_PATH_INIT)?;
        self.settle_ms(10);
        let ctrl = self.read_indirect(regs::IDX_WORK_CONTROL)?;
        self.write_indirect(
            regs::IDX_WORK_CONTROL,
            (ctrl & regs::work_control::KEEP_MASK) | regs::work_control::ENABLE_BITS,
        )?;
        let chips = u32::try_from(self.config.chips_per_chain).unwrap_or(u32::MAX) & 0xFF;
        self.write_indirect(regs::IDX_CHAIN_WORK_CONFIG, chips << 8)?;
        self.write_indirect(regs::IDX_WORK_QUEUE_PARAM, regs::WORK_QUEUE_PARAM)?;
        Ok(())
    }

    /// Whether boot verification has completed
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(DriverError::validation("device is not initialized"))
        }
    }

    // ── Register access ─────────────────────────────────────────────────────

    /// Read a register through the logical map
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Validation`] without touching hardware if the
    /// device is uninitialized or `index` is outside the map.
    pub fn read_indirect(&self, index: usize) -> Result<u32> {
        let offset = self.resolve(index)?;
        self.window.read_u32(offset)
    }

    /// Write a register through the logical map
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Validation`] without touching hardware if the
    /// device is uninitialized or `index` is outside the map.
    pub fn write_indirect(&self, index: usize, value: u32) -> Result<()> {
        let offset = self.resolve(index)?;
        tracing::trace!("reg[{index}] ({offset:#05x}) <- {value:#010x}");
        self.window.write_u32(offset, value)
    }

    fn resolve(&self, index: usize) -> Result<usize> {
        self.ensure_initialized()?;
        regs::physical_offset(index).ok_or_else(|| {
            DriverError::validation(format!(
                "logical register {index} outside map of {}",
                regs::REGISTER_MAP_SIZE
            ))
        })
    }

    /// Read a register by byte offset
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Validation`] for unaligned or out-of-window
    /// offsets.
    pub fn read_direct(&self, offset: usize) -> Result<u32> {
        self.window.read_u32(offset)
    }

    /// Write a register by byte offset
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Validation`] for unaligned or out-of-window
    /// offsets.
    pub fn write_direct(&self, offset: usize, value: u32) -> Result<()> {
        self.window.write_u32(offset, value)
    }

    // ── Chains ──────────────────────────────────────────────────────────────

    /// Read the hash-on-plug register and refresh the chain table.
    ///
    /// Returns the raw 3-bit detect mask.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Validation`] if the device is uninitialized.
    pub fn detect_chains(&self) -> Result<u32> {
        self.ensure_initialized()?;
        let mask = self.read_direct(regs::HASH_ON_PLUG)? & ((1 << MAX_CHAINS) - 1);
        let mut chains = lock(&self.chains);
        for chain in chains.iter_mut() {
            let detected = mask & (1 << chain.id.get()) != 0;
            *chain = Chain::new(chain.id, self.config.chips_per_chain, detected);
        }
        tracing::debug!("Detected chain mask {mask:#05b}");
        Ok(mask)
    }

    /// Snapshot of one slot
    pub fn chain(&self, id: ChainId) -> Chain {
        lock(&self.chains)[id.index()]
    }

    /// Snapshot of every slot
    pub fn chains(&self) -> Vec<Chain> {
        lock(&self.chains).to_vec()
    }

    /// Bring-up state of a chain
    pub fn chain_state(&self, id: ChainId) -> ChainState {
        lock(&self.states)[id.index()]
    }

    pub(crate) fn set_chain_state(&self, id: ChainId, state: ChainState) {
        lock(&self.states)[id.index()] = state;
    }

    /// Running count of CRC errors seen by the FPGA on returning frames
    ///
    /// # Errors
    ///
    /// Propagates register access failures.
    pub fn crc_error_count(&self) -> Result<u32> {
        self.read_direct(regs::CRC_ERROR_COUNT)
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    /// Register window
    pub fn window(&self) -> &W {
        &self.window
    }

    /// Time source
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Active configuration
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub(crate) fn settle_ms(&self, ms: u64) {
        self.clock.sleep(Duration::from_millis(ms));
    }
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
