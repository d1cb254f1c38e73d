//! Chain bring-up state machine
//!
//! ```text
//! Uninitialized ─▶ HardwareReset ─▶ SoftReset ─▶ Configure ─▶ Ready
//!        ▲               │              │            │
//!        └───────────────┴──── failure ─┴────────────┘
//! ```
//!
//! Each stage is a method that can be run on its own (tests drive them one
//! at a time), but stages must run in order and none can be resumed halfway.
//! A failure wraps the cause in [`DriverError::ChainInitFailure`] and drops
//! the chain back to `Uninitialized`; retrying from the start is always safe
//! because every stage rewrites the registers it owns.
//!
//! Power sequencing (PSU on, DC-DC enable) must be done before bring-up.

use crate::device::Device;
use crate::error::{ChainState, DriverError, Result};
use crate::window::RegisterWindow;
use bm1398_chip::asic::{self, core_config, core_param, ChainId};
use bm1398_chip::cmd::Target;
use bm1398_chip::regs;
use tracing::{debug, info, warn};

/// Reset line timing: (line high, hold ms). Preceded by a 700 ms wait.
const RESET_PULSE: [(bool, u64); 4] = [(false, 10), (true, 72), (false, 10), (true, 10)];
const RESET_LEAD_IN_MS: u64 = 700;

/// Drives one chain through bring-up
#[derive(Debug)]
pub struct ChainController<'d, W: RegisterWindow> {
    device: &'d Device<W>,
    chain: ChainId,
}

impl<'d, W: RegisterWindow> ChainController<'d, W> {
    /// Controller for `chain` on `device`
    pub fn new(device: &'d Device<W>, chain: ChainId) -> Self {
        Self { device, chain }
    }

    /// Chain being driven
    pub const fn chain(&self) -> ChainId {
        self.chain
    }

    /// Current bring-up state
    pub fn state(&self) -> ChainState {
        self.device.chain_state(self.chain)
    }

    /// Run every remaining stage through to `Ready`.
    ///
    /// Always starts from the hardware reset, whatever state the chain is in.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::ChainInitFailure`] naming the stage that failed.
    pub fn run(&mut self) -> Result<()> {
        info!("{}: bring-up starting", self.chain);
        self.device.set_chain_state(self.chain, ChainState::Uninitialized);
        self.hardware_reset()?;
        self.soft_reset()?;
        self.configure()?;
        info!("{}: ready", self.chain);
        Ok(())
    }

    /// Pulse the chain's reset line.
    ///
    /// # Errors
    ///
    /// [`DriverError::ChainInitFailure`] if the device is not initialized,
    /// the chain is not `Uninitialized`, or a register access fails.
    pub fn hardware_reset(&mut self) -> Result<()> {
        self.stage(ChainState::Uninitialized, ChainState::HardwareReset, Self::pulse_reset_line)
    }

    /// Stage 1: broadcast soft reset, then an all-ones ticket mask.
    ///
    /// # Errors
    ///
    /// [`DriverError::ChainInitFailure`] if the chain is not past the
    /// hardware reset, or a command fails.
    pub fn soft_reset(&mut self) -> Result<()> {
        self.stage(ChainState::HardwareReset, ChainState::SoftReset, Self::run_soft_reset)
    }

    /// Stage 2: enumerate chips, set clocks and baud, reset the cores.
    /// The chain is `Ready` afterwards.
    ///
    /// # Errors
    ///
    /// [`DriverError::ChainInitFailure`] if the chain is not past stage 1,
    /// or a mandatory step fails.
    pub fn configure(&mut self) -> Result<()> {
        self.stage(ChainState::SoftReset, ChainState::Configure, Self::run_configure)?;
        self.device.set_chain_state(self.chain, ChainState::Ready);
        Ok(())
    }

    fn stage(&mut self, from: ChainState, to: ChainState, body: fn(&Self) -> Result<()>) -> Result<()> {
        let chain = self.chain.get();
        self.device.ensure_initialized().map_err(|e| e.during(chain, to))?;
        let current = self.state();
        if current != from {
            return Err(DriverError::validation(format!("expected state {from}, found {current}")).during(chain, to));
        }

        info!("{}: {to}", self.chain);
        self.device.set_chain_state(self.chain, to);
        let start = self.device.clock().now();
        if let Err(e) = body(self) {
            self.device.set_chain_state(self.chain, ChainState::Uninitialized);
            return Err(e.during(chain, to));
        }
        debug!("{}: {to} took {:?}", self.chain, self.device.clock().now() - start);
        Ok(())
    }

    // ── Stage bodies ────────────────────────────────────────────────────────

    fn pulse_reset_line(&self) -> Result<()> {
        self.device.settle_ms(RESET_LEAD_IN_MS);
        let bit = 1u32 << self.chain.get();
        for (high, hold_ms) in RESET_PULSE {
            let current = self.device.read_indirect(regs::IDX_RESET_HASHBOARD)?;
            let next = if high { current | bit } else { current & !bit };
            self.device.write_indirect(regs::IDX_RESET_HASHBOARD, next)?;
            self.device.settle_ms(hold_ms);
        }
        Ok(())
    }

    fn run_soft_reset(&self) -> Result<()> {
        for (reg, value) in asic::SOFT_RESET_SEQUENCE {
            self.broadcast(reg, value)?;
            self.device.settle_ms(10);
        }
        self.device.set_ticket_mask(self.chain, asic::TICKET_MASK_ALL)?;
        self.device.settle_ms(50);
        Ok(())
    }

    fn run_configure(&self) -> Result<()> {
        let cfg = self.device.config().clone();
        let dev = self.device;

        self.broadcast(asic::DIODE_MUX, u32::from(cfg.diode_mux_sel))?;
        dev.settle_ms(10);

        dev.chain_inactive(self.chain)?;
        dev.settle_ms(10);

        dev.set_baud_rate(self.chain, cfg.low_baud)?;
        self.enumerate(cfg.chips_per_chain)?;

        self.broadcast(asic::CORE_REGISTER_CONTROL, core_config::RESET_STEP_1)?;
        dev.settle_ms(10);
        self.broadcast(asic::CORE_REGISTER_CONTROL, core_config::RESET_STEP_2)?;
        dev.settle_ms(10);

        let core_cfg = core_config::with_pulse_mode(1);
        self.broadcast(asic::CORE_REGISTER_CONTROL, core_cfg)?;
        dev.settle_ms(10);
        self.broadcast(asic::CORE_PARAM, core_param::STOCK)?;
        dev.settle_ms(10);

        if let Err(e) = self.broadcast(asic::IO_DRIVER, asic::IO_DRIVER_CLKO_DS1) {
            warn!("{}: IO driver strength not set: {e}", self.chain);
        }
        dev.settle_ms(10);

        for reg in asic::PLL_PARAMETER_REGS {
            self.broadcast(reg, 0)?;
            dev.settle_ms(10);
        }

        dev.set_frequency(self.chain, cfg.frequency_mhz)?;
        dev.settle_ms(500);

        dev.set_baud_rate(self.chain, cfg.high_baud)?;
        let stale = dev.discard_stale_nonces()?;
        if stale > 0 {
            debug!("{}: dropped {stale} stale FIFO entries", self.chain);
        }

        let core_reset = [
            (asic::SOFT_RESET, asic::SOFT_RESET_MASK),
            (asic::CLOCK_ORDER_CONTROL, asic::CLOCK_CONTROL_BASE),
            (asic::CORE_REGISTER_CONTROL, core_cfg),
            (asic::CORE_PARAM, core_param::STOCK),
            (asic::CORE_REGISTER_CONTROL, core_config::ENABLE),
        ];
        for (reg, value) in core_reset {
            self.broadcast(reg, value)?;
            dev.settle_ms(100);
        }
        dev.settle_ms(2000);

        // FPGA nonce timeout stays at its power-on value.
        dev.set_ticket_mask(self.chain, asic::TICKET_MASK_ALL)?;
        dev.settle_ms(10);
        self.broadcast(asic::CORE_REGISTER_CONTROL, core_config::NONCE_OVERFLOW_DISABLED)?;
        dev.settle_ms(10);
        Ok(())
    }

    /// Address every chip: chain-inactive first, then one set-address frame
    /// per chip with a 10 ms relay delay after each.
    fn enumerate(&self, chips: usize) -> Result<()> {
        let dev = self.device;
        dev.chain_inactive(self.chain)?;
        dev.settle_ms(10);
        let mut count = 0usize;
        for addr in asic::chip_addresses(chips) {
            dev.set_address(self.chain, addr)?;
            dev.settle_ms(10);
            count += 1;
        }
        info!(
            "{}: addressed {count} chips, interval {}",
            self.chain,
            asic::address_interval(chips)
        );
        Ok(())
    }

    fn broadcast(&self, reg: u8, value: u32) -> Result<()> {
        self.device.write_register(self.chain, Target::Broadcast, reg, value)
    }
}

impl<W: RegisterWindow> Device<W> {
    /// Bring `chain` from power-on to `Ready`
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::ChainInitFailure`] naming the failed stage.
    pub fn init_chain(&self, chain: ChainId) -> Result<()> {
        ChainController::new(self, chain).run()
    }
}
