//! BM1398 on-chip registers, init constants and chain addressing.
//!
//! Register addresses are the 8-bit values carried in command frames. Values
//! are the words the stock bring-up writes; they were captured from a working
//! S19 hashboard and are treated as opaque.

// ── Chain geometry ───────────────────────────────────────────────────────────

/// Chips on a stock S19 hashboard.
pub const CHIPS_PER_CHAIN: usize = 114;

/// Hashboard slots on the control board.
pub const MAX_CHAINS: usize = 3;

/// Address space of the chain. Chip addresses are `0..ADDRESS_SPACE`.
pub const ADDRESS_SPACE: u32 = 256;

/// Step between consecutive chip addresses for a chain of `chips` chips.
///
/// Always at least 1, so a zero or oversized count still yields a usable
/// step.
#[must_use]
pub const fn address_interval(chips: usize) -> u16 {
    if chips == 0 || chips >= ADDRESS_SPACE as usize {
        1
    } else {
        (ADDRESS_SPACE as usize / chips) as u16
    }
}

/// Chip addresses assigned during enumeration: `0, step, 2*step, ...`,
/// exactly `chips` of them, all below 256.
pub fn chip_addresses(chips: usize) -> impl Iterator<Item = u8> {
    let step = address_interval(chips) as usize;
    let count = chips.min(ADDRESS_SPACE as usize);
    (0..count).map(move |i| (i * step) as u8)
}

/// Hashboard slot number, `0..MAX_CHAINS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(u8);

impl ChainId {
    /// Every slot, in order.
    pub const ALL: [Self; MAX_CHAINS] = [Self(0), Self(1), Self(2)];

    /// Validate a raw slot number.
    #[must_use]
    pub const fn new(raw: u8) -> Option<Self> {
        if (raw as usize) < MAX_CHAINS {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Raw slot number.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Slot as an array index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chain {}", self.0)
    }
}

// ── Register addresses ───────────────────────────────────────────────────────

/// Chip address / id.
pub const CHIP_ADDRESS: u8 = 0x00;
/// PLL0 parameter word (hashing clock).
pub const PLL0_PARAMETER: u8 = 0x08;
/// Hash counting number.
pub const HASH_COUNTING_NUMBER: u8 = 0x10;
/// Ticket mask. All-ones reports every nonce.
pub const TICKET_MASK: u8 = 0x14;
/// Clock control: baud divisor and reference select.
pub const CLOCK_ORDER_CONTROL: u8 = 0x18;
/// Work rolling control.
pub const WORK_ROLLING: u8 = 0x1C;
/// Work configuration.
pub const WORK_CONFIG: u8 = 0x20;
/// UART relay / baud configuration.
pub const BAUD_CONFIG: u8 = 0x28;
/// Chip reset control.
pub const RESET_CONTROL: u8 = 0x34;
/// Core register control.
pub const CORE_REGISTER_CONTROL: u8 = 0x3C;
/// Core register value / timing parameter.
pub const CORE_PARAM: u8 = 0x44;
/// Temperature diode mux select.
pub const DIODE_MUX: u8 = 0x54;
/// IO driver strength.
pub const IO_DRIVER: u8 = 0x58;
/// PLL1 parameter word.
pub const PLL1_PARAMETER: u8 = 0x60;
/// PLL2 parameter word.
pub const PLL2_PARAMETER: u8 = 0x64;
/// PLL3 parameter word (UART reference when running above 3 Mbaud).
pub const PLL3_PARAMETER: u8 = 0x68;
/// Version rolling.
pub const VERSION_ROLLING: u8 = 0xA4;
/// Soft reset control.
pub const SOFT_RESET: u8 = 0xA8;

/// The four PLL parameter registers, zeroed before the frequency is set.
pub const PLL_PARAMETER_REGS: [u8; 4] =
    [PLL0_PARAMETER, PLL1_PARAMETER, PLL2_PARAMETER, PLL3_PARAMETER];

// ── Init values ──────────────────────────────────────────────────────────────

/// Every nonce is reported.
pub const TICKET_MASK_ALL: u32 = 0xFFFF_FFFF;

/// Stage-one (soft reset) broadcast writes, in order. Each is followed by a
/// 10 ms settle.
pub const SOFT_RESET_SEQUENCE: [(u8, u32); 6] = [
    // soft reset disable
    (CLOCK_ORDER_CONTROL, 0x0000_0000),
    // clear power-control bit
    (RESET_CONTROL, 0x0000_0000),
    // core reset enable
    (CLOCK_ORDER_CONTROL, 0x0F40_0000),
    // core reset disable
    (CLOCK_ORDER_CONTROL, CLOCK_CONTROL_BASE),
    // soft reset enable
    (CLOCK_ORDER_CONTROL, CLOCK_CONTROL_BASE_SOFT_RESET),
    // set power-control bit
    (RESET_CONTROL, 0x0000_0008),
];

/// Clock control after core reset release.
pub const CLOCK_CONTROL_BASE: u32 = 0xF000_0000;
/// Clock control with soft reset enabled; also the low-speed UART base.
pub const CLOCK_CONTROL_BASE_SOFT_RESET: u32 = 0xF000_0400;

/// Core config register (0x3C) values.
pub mod core_config {
    /// Base value; pulse mode sits at bit 4, clock select in bits 2:0.
    pub const BASE: u32 = 0x8000_8700;
    /// Shift of the 2-bit pulse mode field.
    pub const PULSE_MODE_SHIFT: u32 = 4;
    /// First step of the reset that must precede pulse-mode configuration.
    pub const RESET_STEP_1: u32 = 0x8000_851F;
    /// Second reset step.
    pub const RESET_STEP_2: u32 = 0x8000_0600;
    /// Core enable after reset.
    pub const ENABLE: u32 = 0x8000_82AA;
    /// Nonce overflow reporting disabled.
    pub const NONCE_OVERFLOW_DISABLED: u32 = 0x8000_8D15;

    /// Core config word for `pulse_mode` with clock select 0.
    #[must_use]
    pub const fn with_pulse_mode(pulse_mode: u8) -> u32 {
        BASE | (((pulse_mode & 0x3) as u32) << PULSE_MODE_SHIFT)
    }
}

/// Core timing register (0x44) encoding.
pub mod core_param {
    /// swpf mode enable bit.
    pub const SWPF_MODE: u32 = 1 << 0;
    const PWTH_SEL_SHIFT: u32 = 3;
    const CCDLY_SEL_SHIFT: u32 = 6;

    /// Timing word for the given pulse-width and clock-delay selects.
    #[must_use]
    pub const fn encode(pwth_sel: u8, ccdly_sel: u8, swpf_mode: bool) -> u32 {
        let mut v = (((pwth_sel & 0x7) as u32) << PWTH_SEL_SHIFT)
            | (((ccdly_sel & 0x3) as u32) << CCDLY_SEL_SHIFT);
        if swpf_mode {
            v |= SWPF_MODE;
        }
        v
    }

    /// Stock timing: `pwth_sel = 1`, `ccdly_sel = 1`, swpf off.
    pub const STOCK: u32 = encode(1, 1, false);
}

/// Soft reset register (0xA8) mask, bits 8:4.
pub const SOFT_RESET_MASK: u32 = 0x0000_01F0;

/// IO driver word with clock-output strength `clko_ds = 1` (bits 7:4).
pub const IO_DRIVER_CLKO_DS1: u32 = 0x0000_0010;

/// Diode mux selection applied at the start of configuration.
pub const DIODE_MUX_DEFAULT: u8 = 3;
