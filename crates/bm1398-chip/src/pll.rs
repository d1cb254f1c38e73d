//! Hashing PLL and UART baud configuration.
//!
//! ## PLL0 word layout
//!
//! ```text
//! bit 30        always set
//! bit 28        high VCO range (2400..=3200 MHz)
//! bits 27:16    fbdiv
//! bits 13:8     postdiv1
//! bits  6:4     refdiv
//! bits  2:0     postdiv2
//! ```
//!
//! `VCO = 25 MHz / (refdiv + 1) * fbdiv`. Only one operating point has been
//! validated on hardware (525 MHz); every other request falls back to it.

/// Crystal reference feeding the PLLs, in MHz.
pub const REFERENCE_MHZ: u32 = 25;

/// VCO lock range, in MHz.
pub const VCO_RANGE_MHZ: std::ops::RangeInclusive<u32> = 1600..=3200;

/// Lower bound of the high VCO range, in MHz.
pub const VCO_HIGH_RANGE_MIN_MHZ: u32 = 2400;

const PLL_FIXED_BITS: u32 = 1 << 30;
const PLL_HIGH_RANGE: u32 = 1 << 28;

/// Divider settings for PLL0, in register encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllParams {
    /// Reference divider, stored minus one.
    pub refdiv: u8,
    /// Feedback divider.
    pub fbdiv: u16,
    /// First post divider, stored minus one.
    pub postdiv1: u8,
    /// Second post divider, stored minus one.
    pub postdiv2: u8,
}

impl PllParams {
    /// The validated 525 MHz operating point.
    pub const MHZ_525: Self = Self { refdiv: 0, fbdiv: 84, postdiv1: 1, postdiv2: 0 };

    /// Frequency of the only validated operating point.
    pub const VALIDATED_MHZ: u32 = 525;

    /// Parameters for `freq_mhz`, or `None` if no validated vector exists.
    #[must_use]
    pub const fn for_frequency(freq_mhz: u32) -> Option<Self> {
        match freq_mhz {
            525 => Some(Self::MHZ_525),
            _ => None,
        }
    }

    /// VCO frequency in MHz.
    #[must_use]
    pub const fn vco_mhz(&self) -> u32 {
        REFERENCE_MHZ * self.fbdiv as u32 / (self.refdiv as u32 + 1)
    }

    /// Whether the VCO sits inside the lockable range.
    #[must_use]
    pub fn vco_in_range(&self) -> bool {
        VCO_RANGE_MHZ.contains(&self.vco_mhz())
    }

    /// Whether the high VCO range bit must be set.
    #[must_use]
    pub const fn high_vco_range(&self) -> bool {
        let vco = self.vco_mhz();
        vco >= VCO_HIGH_RANGE_MIN_MHZ && vco <= 3200
    }

    /// PLL0 register word, or `None` if the VCO is out of range.
    #[must_use]
    pub fn register_value(&self) -> Option<u32> {
        if !self.vco_in_range() {
            return None;
        }
        let mut word = PLL_FIXED_BITS
            | (self.postdiv2 as u32 & 0x7)
            | ((self.refdiv as u32 & 0x7) << 4)
            | ((self.postdiv1 as u32 & 0x3F) << 8)
            | ((self.fbdiv as u32 & 0xFFF) << 16);
        if self.high_vco_range() {
            word |= PLL_HIGH_RANGE;
        }
        Some(word)
    }
}

// ── UART ─────────────────────────────────────────────────────────────────────

/// Baud rates above this use the 400 MHz reference from PLL3.
pub const HIGH_SPEED_THRESHOLD: u32 = 3_000_000;

/// Enumeration and early bring-up speed.
pub const LOW_BAUD: u32 = 115_200;

/// Steady-state speed.
pub const HIGH_BAUD: u32 = 12_000_000;

const LOW_SPEED_REF_HZ: u32 = 25_000_000;
const HIGH_SPEED_REF_HZ: u32 = 400_000_000;

const CLK_CTRL_HIGH_SPEED_BASE: u32 = 0xF000_0000;
const CLK_CTRL_LOW_SPEED_BASE: u32 = 0xF000_0400;
const CLK_CTRL_HIGH_SPEED: u32 = 1 << 16;

/// PLL3 word that routes a 400 MHz clock to the UART.
pub const PLL3_UART_400MHZ: u32 = 0xC070_0111;

/// BAUD_CONFIG word for high-speed mode.
pub const BAUD_CONFIG_HIGH_SPEED: u32 = 0x0600_8F0F;

/// Baud rate settings for one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaudConfig {
    baud: u32,
    divisor: u32,
}

impl BaudConfig {
    /// Settings for `baud`, or `None` if the rate is zero or too fast for the
    /// reference clock.
    #[must_use]
    pub const fn new(baud: u32) -> Option<Self> {
        if baud == 0 {
            return None;
        }
        let reference = if baud > HIGH_SPEED_THRESHOLD {
            HIGH_SPEED_REF_HZ
        } else {
            LOW_SPEED_REF_HZ
        };
        let Some(step) = baud.checked_mul(8) else {
            return None;
        };
        let ratio = reference / step;
        if ratio == 0 {
            return None;
        }
        Some(Self { baud, divisor: ratio - 1 })
    }

    /// Requested baud rate.
    #[must_use]
    pub const fn baud(&self) -> u32 {
        self.baud
    }

    /// UART divisor: `floor(reference / (baud * 8)) - 1`.
    #[must_use]
    pub const fn divisor(&self) -> u32 {
        self.divisor
    }

    /// Whether this rate runs from the 400 MHz reference.
    #[must_use]
    pub const fn is_high_speed(&self) -> bool {
        self.baud > HIGH_SPEED_THRESHOLD
    }

    /// CLK_CTRL (0x18) word: divisor bits 8:5 at 27:24, bits 4:0 at 12:8.
    #[must_use]
    pub const fn clock_control(&self) -> u32 {
        let fields = (((self.divisor >> 5) & 0xF) << 24) | ((self.divisor & 0x1F) << 8);
        if self.is_high_speed() {
            CLK_CTRL_HIGH_SPEED_BASE | fields | CLK_CTRL_HIGH_SPEED
        } else {
            CLK_CTRL_LOW_SPEED_BASE | fields
        }
    }
}
