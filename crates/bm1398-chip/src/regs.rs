//! FPGA register map for the S19 control board.
//!
//! The FPGA exposes a 4608-byte word-addressable window. Most of the driver
//! touches it through *logical* register indices, which a fixed 110-entry
//! table translates into physical word offsets. A handful of registers sit
//! outside the table and are addressed directly by byte offset.
//!
//! ## Window layout (byte offsets)
//!
//! ```text
//! 0x000  control / version                direct
//! 0x008  hash-on-plug (chain detect)      direct
//! 0x00C  buffer space (per-chain ready)   direct
//! 0x010  nonce FIFO data                  direct   nonce word, then metadata word
//! 0x018  nonce count (15 bit)             direct
//! 0x034  hashboard reset                  logical 13
//! 0x040  work FIFO write port             logical 16 / 17
//! 0x080  work routing / init toggle       direct
//! 0x088  timeout control                  direct
//! 0x08C  nonce timeout                    logical 20
//! 0x0C0  command trigger                  direct
//! 0x0C4  command buffer (3 words)         direct
//! 0x0F8  CRC error count                  direct
//! 0x118  work control / auto-gen          logical 35
//! ```

// ── Window ───────────────────────────────────────────────────────────────────

/// Size of the mapped register window in bytes.
pub const WINDOW_SIZE: usize = 0x1200;

/// Number of 32-bit words in the window.
pub const WINDOW_WORDS: usize = WINDOW_SIZE / 4;

// ── Direct registers (byte offsets) ──────────────────────────────────────────

/// Control / hardware version word. Bit 30 enables the chip-side init path.
pub const CONTROL: usize = 0x000;
/// Fan tachometer.
pub const FAN_SPEED: usize = 0x004;
/// Chain-detect bitmask, one bit per hashboard slot.
pub const HASH_ON_PLUG: usize = 0x008;
/// Per-chain work FIFO ready bits.
pub const BUFFER_SPACE: usize = 0x00C;
/// Nonce FIFO data port. Each entry is read as two consecutive words.
pub const RETURN_NONCE: usize = 0x010;
/// Number of complete entries waiting in the nonce FIFO (15-bit field).
pub const NONCE_NUMBER_IN_FIFO: usize = 0x018;
/// Nonce FIFO interrupt control.
pub const NONCE_FIFO_INTERRUPT: usize = 0x01C;
/// I2C bridge command word (power collaborators only).
pub const IIC_COMMAND: usize = 0x030;
/// Hashboard reset lines, one bit per chain.
pub const RESET_HASHBOARD_COMMAND: usize = 0x034;
/// Work FIFO write port.
pub const TW_WRITE_COMMAND: usize = 0x040;
/// Work routing / init control. Bit 31 is toggled once at open.
pub const WORK_ROUTING: usize = 0x080;
/// Timeout control.
pub const TIMEOUT_CONTROL: usize = 0x088;
/// FPGA nonce timeout.
pub const NONCE_TIMEOUT: usize = 0x08C;
/// Command trigger / status word.
pub const BC_WRITE_COMMAND: usize = 0x0C0;
/// First word of the 12-byte command buffer.
pub const BC_COMMAND_BUFFER: usize = 0x0C4;
/// Number of words in the command buffer.
pub const BC_COMMAND_BUFFER_WORDS: usize = 3;
/// FPGA chip id.
pub const FPGA_CHIP_ID: usize = 0x0F0;
/// Running count of CRC errors seen on returning frames.
pub const CRC_ERROR_COUNT: usize = 0x0F8;
/// Work control / auto-pattern enable.
pub const WORK_CONTROL: usize = 0x118;

// ── Logical register indices ─────────────────────────────────────────────────

/// Control word.
pub const IDX_CONTROL: usize = 0;
/// Hashboard reset lines (word 13, 0x034).
pub const IDX_RESET_HASHBOARD: usize = 13;
/// Work FIFO write port (word 16, 0x040).
pub const IDX_TW_WRITE_FIRST: usize = 16;
/// Alias of [`IDX_TW_WRITE_FIRST`]; resolves to the same physical word.
pub const IDX_TW_WRITE_REST: usize = 17;
/// Init register (word 33, 0x084).
pub const IDX_INIT_18: usize = 18;
/// Nonce timeout (word 35, 0x08C).
pub const IDX_NONCE_TIMEOUT: usize = 20;
/// Work control / auto-gen enable (word 70, 0x118).
pub const IDX_WORK_CONTROL: usize = 35;
/// Chain work configuration (word 71, 0x11C).
pub const IDX_CHAIN_WORK_CONFIG: usize = 36;
/// Work queue parameter (word 80, 0x140).
pub const IDX_WORK_QUEUE_PARAM: usize = 42;

/// Number of entries in the logical register map.
pub const REGISTER_MAP_SIZE: usize = 110;

/// Logical index → physical word offset.
///
/// Several indices alias one physical word: 16 and 17 both land on the work
/// FIFO port and 24 lands on the control word. The FPGA decodes them that way.
/// Slots 108 and 109 are unpopulated and resolve to word 0.
pub const REGISTER_MAP: [u16; REGISTER_MAP_SIZE] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, // [0-15]
    16, 16, 33, 34, 35, 36, 37, 38, 0, 48, 49, 60, 62, 63, 64, 65, // [16-31]
    66, 68, 69, 70, 71, 72, 73, 76, 77, 78, 80, 96, 97, 98, 99, 100, // [32-47]
    101, 102, 103, 104, 105, 106, 107, 108, 109, 110, 111, 112, 113, 114, 115, 116, // [48-63]
    117, 118, 119, 124, 125, 126, 127, 128, 129, 130, 132, 133, 134, 135, 136, 137, // [64-79]
    138, 139, 140, 141, 142, 143, 144, 145, 146, 147, 148, 149, 150, 151, 152, 153, // [80-95]
    154, 155, 156, 157, 158, 159, 164, 165, 166, 167, 168, 169, 0, 0, // [96-109]
];

/// Physical byte offset for a logical register index, or `None` if the index
/// is outside the table.
#[must_use]
pub const fn physical_offset(logical_index: usize) -> Option<usize> {
    if logical_index < REGISTER_MAP_SIZE {
        Some(REGISTER_MAP[logical_index] as usize * 4)
    } else {
        None
    }
}

// ── Boot-state golden values ─────────────────────────────────────────────────

/// Expected [`WORK_ROUTING`] value after the stock boot sequence.
pub const WORK_ROUTING_GOLDEN: u32 = 0x0080_800F;
/// Expected [`TIMEOUT_CONTROL`] value after the stock boot sequence.
pub const TIMEOUT_CONTROL_GOLDEN: u32 = 0x8001_FFFF;

// ── Work path setup ──────────────────────────────────────────────────────────

/// Value written to [`IDX_INIT_18`] when the window is opened.
pub const WORK_PATH_INIT: u32 = 0x8080_8000;
/// Value written to [`IDX_WORK_QUEUE_PARAM`] when the window is opened.
pub const WORK_QUEUE_PARAM: u32 = 0x0000_3648;

// ── Bit definitions ──────────────────────────────────────────────────────────

pub mod control {
    /// Chip-side init path enable.
    pub const CHIP_INIT: u32 = 1 << 30;
}

pub mod routing {
    /// Work routing enable toggle.
    pub const TOGGLE: u32 = 1 << 31;
}

pub mod bc_command {
    /// Set by software to start a transfer; cleared by the FPGA when done.
    pub const BUFFER_READY: u32 = 1 << 31;
    /// Route the frame to the chain named in the chain-id field.
    pub const EN_CHAIN_ID: u32 = 1 << 23;
    /// Transmit null work alongside the command.
    pub const EN_NULL_WORK: u32 = 1 << 22;

    /// Chain-id field (bits 19:16).
    #[must_use]
    pub const fn chain_id(chain: u8) -> u32 {
        ((chain as u32) & 0xF) << 16
    }

    /// Trigger word for a command on `chain`.
    #[must_use]
    pub const fn trigger(chain: u8) -> u32 {
        BUFFER_READY | EN_CHAIN_ID | chain_id(chain)
    }
}

pub mod work_control {
    /// FPGA-side auto-pattern generation. Must be clear for external work.
    pub const AUTO_GEN: u32 = 1 << 14;
    /// Bits preserved when the work path is set up at open.
    pub const KEEP_MASK: u32 = 0xFFFF_709F;
    /// Bits set when the work path is set up at open.
    pub const ENABLE_BITS: u32 = 0x0000_8060;
}

pub mod nonce_fifo {
    /// Valid bits of the nonce count register.
    pub const COUNT_MASK: u32 = 0x7FFF;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_fifo_indices_alias_one_word() {
        assert_eq!(physical_offset(IDX_TW_WRITE_FIRST), Some(TW_WRITE_COMMAND));
        assert_eq!(physical_offset(IDX_TW_WRITE_REST), Some(TW_WRITE_COMMAND));
    }

    #[test]
    fn documented_anchors() {
        assert_eq!(physical_offset(IDX_RESET_HASHBOARD), Some(RESET_HASHBOARD_COMMAND));
        assert_eq!(physical_offset(IDX_INIT_18), Some(0x084));
        assert_eq!(physical_offset(IDX_NONCE_TIMEOUT), Some(NONCE_TIMEOUT));
        assert_eq!(physical_offset(IDX_WORK_CONTROL), Some(WORK_CONTROL));
        assert_eq!(physical_offset(IDX_CHAIN_WORK_CONFIG), Some(0x11C));
        assert_eq!(physical_offset(IDX_WORK_QUEUE_PARAM), Some(0x140));
    }

    #[test]
    fn map_bounds() {
        assert_eq!(physical_offset(REGISTER_MAP_SIZE), None);
        assert!(REGISTER_MAP
            .iter()
            .all(|&w| (w as usize) * 4 + 4 <= WINDOW_SIZE));
    }

    #[test]
    fn trigger_word() {
        assert_eq!(bc_command::trigger(2), 0x8082_0000);
    }
}
