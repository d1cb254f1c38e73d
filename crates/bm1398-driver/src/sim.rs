//! Simulated FPGA register window
//!
//! [`SimWindow`] behaves enough like the control board's FPGA for the whole
//! driver to run against it: the command trigger self-clears, frames are
//! decoded and applied to a per-chain model of the chip registers, register
//! reads queue a reply in the nonce FIFO, and the work FIFO port captures
//! every word written to it. Every MMIO write is logged for assertions.
//!
//! Used by the unit and integration tests; also handy for dry-running the
//! bring-up sequence without a board.

use crate::device::lock;
use crate::error::Result;
use crate::window::{check_word_access, RegisterWindow};
use bm1398_chip::asic::{self, MAX_CHAINS};
use bm1398_chip::cmd::{preamble, Frame, Target};
use bm1398_chip::regs::{self, bc_command, nonce_fifo};
use bm1398_chip::NonceResponse;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Reply to a chip-address read: chip id in the top half, address in the low byte.
const CHIP_ID_WORD: u32 = 0x1398_0000;

#[derive(Debug)]
struct SimState {
    regs: Vec<u32>,
    writes: Vec<(usize, u32)>,
    frames: Vec<(u8, Frame)>,
    work_fifo: Vec<u32>,
    nonce_fifo: VecDeque<u32>,
    broadcast: HashMap<(u8, u8), u32>,
    unicast: HashMap<(u8, u8, u8), u32>,
    addresses: [Vec<u8>; MAX_CHAINS],
    stalled: bool,
    muted: bool,
}

impl SimState {
    fn chip_register(&self, chain: u8, chip: u8, reg: u8) -> Option<u32> {
        self.unicast
            .get(&(chain, chip, reg))
            .or_else(|| self.broadcast.get(&(chain, reg)))
            .copied()
    }

    fn trigger(&mut self, value: u32) {
        let word = regs::BC_WRITE_COMMAND / 4;
        if self.stalled {
            self.regs[word] = value;
            return;
        }
        self.regs[word] = value & !bc_command::BUFFER_READY;

        let base = regs::BC_COMMAND_BUFFER / 4;
        let words = [self.regs[base], self.regs[base + 1], self.regs[base + 2]];
        let Some(frame) = Frame::from_words(&words) else {
            return;
        };
        let chain = ((value >> 16) & 0xF) as u8;
        self.frames.push((chain, frame));
        self.apply(chain, &frame);
    }

    fn apply(&mut self, chain: u8, frame: &Frame) {
        let slot = usize::from(chain).min(MAX_CHAINS - 1);
        let bytes = frame.as_bytes();
        match frame.preamble() {
            preamble::CHAIN_INACTIVE => self.addresses[slot].clear(),
            preamble::SET_ADDRESS => self.addresses[slot].push(bytes[2]),
            _ => {}
        }

        if let Some((target, reg, value)) = frame.as_register_write() {
            match target {
                Target::Broadcast => {
                    self.unicast.retain(|&(c, _, r), _| c != chain || r != reg);
                    self.broadcast.insert((chain, reg), value);
                }
                Target::Chip(addr) => {
                    self.unicast.insert((chain, addr, reg), value);
                }
            }
        } else if let Some((target, reg)) = frame.as_register_read() {
            if self.muted {
                return;
            }
            let chip = match target {
                Target::Chip(addr) => addr,
                Target::Broadcast => self.addresses[slot].first().copied().unwrap_or(0),
            };
            let value = match self.chip_register(chain, chip, reg) {
                Some(v) => v,
                None if reg == asic::CHIP_ADDRESS => CHIP_ID_WORD | u32::from(chip),
                None => 0,
            };
            let meta = (u32::from(chain) << 24) | (u32::from(chip) << 16) | u32::from(reg);
            self.nonce_fifo.push_back(value);
            self.nonce_fifo.push_back(meta);
        }
    }
}

/// In-memory FPGA register file with command-bus and FIFO behaviour
#[derive(Debug)]
pub struct SimWindow {
    state: Mutex<SimState>,
}

impl Default for SimWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWindow {
    /// Register file in the stock post-boot state: golden routing and
    /// timeout words, all three chains present, every FIFO with room, and
    /// FPGA auto-pattern generation on.
    pub fn new() -> Self {
        let mut regs = vec![0u32; regs::WINDOW_WORDS];
        regs[regs::WORK_ROUTING / 4] = regs::WORK_ROUTING_GOLDEN;
        regs[regs::TIMEOUT_CONTROL / 4] = regs::TIMEOUT_CONTROL_GOLDEN;
        regs[regs::HASH_ON_PLUG / 4] = 0b111;
        regs[regs::BUFFER_SPACE / 4] = 0b111;
        regs[regs::WORK_CONTROL / 4] = regs::work_control::AUTO_GEN;
        Self {
            state: Mutex::new(SimState {
                regs,
                writes: Vec::new(),
                frames: Vec::new(),
                work_fifo: Vec::new(),
                nonce_fifo: VecDeque::new(),
                broadcast: HashMap::new(),
                unicast: HashMap::new(),
                addresses: Default::default(),
                stalled: false,
                muted: false,
            }),
        }
    }

    /// Present only the chains set in `mask`.
    #[must_use]
    pub fn with_chains(self, mask: u32) -> Self {
        self.set_register(regs::HASH_ON_PLUG, mask);
        self
    }

    /// Preset a register without logging a write.
    pub fn set_register(&self, offset: usize, value: u32) {
        lock(&self.state).regs[offset / 4] = value;
    }

    /// Set the per-chain buffer-space bits.
    pub fn set_buffer_space(&self, mask: u32) {
        self.set_register(regs::BUFFER_SPACE, mask);
    }

    /// Keep the command trigger's ready bit set, as a hung FPGA would.
    pub fn stall_command_bus(&self, stalled: bool) {
        lock(&self.state).stalled = stalled;
    }

    /// Drop register-read replies instead of queueing them.
    pub fn mute_replies(&self, muted: bool) {
        lock(&self.state).muted = muted;
    }

    /// Queue a nonce entry as a chip would return it.
    pub fn push_nonce(&self, response: NonceResponse) {
        let mut st = lock(&self.state);
        st.nonce_fifo.push_back(response.nonce);
        st.nonce_fifo.push_back(response.meta());
    }

    /// Every MMIO write so far, as `(offset, value)`.
    pub fn writes(&self) -> Vec<(usize, u32)> {
        lock(&self.state).writes.clone()
    }

    /// Every frame transmitted so far, with its chain.
    pub fn frames(&self) -> Vec<(u8, Frame)> {
        lock(&self.state).frames.clone()
    }

    /// Register writes sent to `chain`, in order.
    pub fn register_writes(&self, chain: u8) -> Vec<(Target, u8, u32)> {
        lock(&self.state)
            .frames
            .iter()
            .filter(|(c, _)| *c == chain)
            .filter_map(|(_, f)| f.as_register_write())
            .collect()
    }

    /// Words captured at the work FIFO port.
    pub fn work_fifo(&self) -> Vec<u32> {
        lock(&self.state).work_fifo.clone()
    }

    /// Chip addresses assigned on `chain` since its last chain-inactive.
    pub fn addresses(&self, chain: u8) -> Vec<u8> {
        let slot = usize::from(chain).min(MAX_CHAINS - 1);
        lock(&self.state).addresses[slot].clone()
    }

    /// Last value written to `reg` of chip `chip` on `chain`, whether
    /// unicast or broadcast.
    pub fn chip_register(&self, chain: u8, chip: u8, reg: u8) -> Option<u32> {
        lock(&self.state).chip_register(chain, chip, reg)
    }
}

impl RegisterWindow for SimWindow {
    fn size(&self) -> usize {
        regs::WINDOW_SIZE
    }

    fn read_u32(&self, offset: usize) -> Result<u32> {
        check_word_access(offset, regs::WINDOW_SIZE)?;
        let mut st = lock(&self.state);
        let value = match offset {
            regs::NONCE_NUMBER_IN_FIFO => {
                u32::try_from(st.nonce_fifo.len() / 2).unwrap_or(u32::MAX) & nonce_fifo::COUNT_MASK
            }
            regs::RETURN_NONCE => st.nonce_fifo.pop_front().unwrap_or(0),
            _ => st.regs[offset / 4],
        };
        Ok(value)
    }

    fn write_u32(&self, offset: usize, value: u32) -> Result<()> {
        check_word_access(offset, regs::WINDOW_SIZE)?;
        let mut st = lock(&self.state);
        st.writes.push((offset, value));
        match offset {
            regs::TW_WRITE_COMMAND => st.work_fifo.push(value),
            regs::BC_WRITE_COMMAND if value & bc_command::BUFFER_READY != 0 => st.trigger(value),
            _ => st.regs[offset / 4] = value,
        }
        Ok(())
    }
}
