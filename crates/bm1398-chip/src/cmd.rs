//! Command frames for the chip bus.
//!
//! Every frame is `{preamble, length, chip_addr, reg_addr, [value BE], crc5}`
//! and fits the FPGA's 12-byte command buffer. Frames are built, sent and
//! dropped; nothing here holds state.
//!
//! ```text
//! chain inactive   53 05 00   00   crc
//! set address      40 05 addr 00   crc
//! write register   41 09 chip reg  v3 v2 v1 v0 crc     (51 = broadcast)
//! read register    42 09 chip reg  00 00 00 00 crc     (52 = broadcast)
//! ```

use crate::crc::crc5;

/// Size of the FPGA command buffer.
pub const MAX_FRAME_LEN: usize = 12;

/// Frame preambles.
pub mod preamble {
    /// Assign an address to the next unaddressed chip.
    pub const SET_ADDRESS: u8 = 0x40;
    /// Unicast register write.
    pub const WRITE_REGISTER: u8 = 0x41;
    /// Unicast register read.
    pub const READ_REGISTER: u8 = 0x42;
    /// Broadcast register write.
    pub const WRITE_BROADCAST: u8 = 0x51;
    /// Broadcast register read.
    pub const READ_BROADCAST: u8 = 0x52;
    /// Put every chip into the unaddressed state.
    pub const CHAIN_INACTIVE: u8 = 0x53;
}

/// Addressee of a register command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// One chip, by its enumerated address.
    Chip(u8),
    /// Every chip on the chain.
    Broadcast,
}

impl Target {
    const fn chip_addr(self) -> u8 {
        match self {
            Self::Chip(addr) => addr,
            Self::Broadcast => 0,
        }
    }
}

/// A CRC-terminated command frame of at most [`MAX_FRAME_LEN`] bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl Frame {
    /// Frame from a body without its CRC. The CRC byte is appended.
    ///
    /// Returns `None` if body plus CRC would not fit the command buffer.
    #[must_use]
    pub fn from_body(body: &[u8]) -> Option<Self> {
        if body.is_empty() || body.len() >= MAX_FRAME_LEN {
            return None;
        }
        let mut bytes = [0u8; MAX_FRAME_LEN];
        bytes[..body.len()].copy_from_slice(body);
        bytes[body.len()] = crc5(body);
        Some(Self { bytes, len: body.len() + 1 })
    }

    /// Reset every chip's address latch.
    #[must_use]
    pub fn chain_inactive() -> Self {
        Self::short(preamble::CHAIN_INACTIVE, 0, 0)
    }

    /// Give the next unaddressed chip the address `addr`.
    #[must_use]
    pub fn set_address(addr: u8) -> Self {
        Self::short(preamble::SET_ADDRESS, addr, 0)
    }

    /// Write `value` to register `reg`.
    #[must_use]
    pub fn write_register(target: Target, reg: u8, value: u32) -> Self {
        let pre = match target {
            Target::Chip(_) => preamble::WRITE_REGISTER,
            Target::Broadcast => preamble::WRITE_BROADCAST,
        };
        Self::long(pre, target.chip_addr(), reg, value)
    }

    /// Ask for the contents of register `reg`.
    #[must_use]
    pub fn read_register(target: Target, reg: u8) -> Self {
        let pre = match target {
            Target::Chip(_) => preamble::READ_REGISTER,
            Target::Broadcast => preamble::READ_BROADCAST,
        };
        Self::long(pre, target.chip_addr(), reg, 0)
    }

    fn short(pre: u8, addr: u8, reg: u8) -> Self {
        let body = [pre, 0x05, addr, reg];
        let mut bytes = [0u8; MAX_FRAME_LEN];
        bytes[..4].copy_from_slice(&body);
        bytes[4] = crc5(&body);
        Self { bytes, len: 5 }
    }

    fn long(pre: u8, addr: u8, reg: u8, value: u32) -> Self {
        let v = value.to_be_bytes();
        let body = [pre, 0x09, addr, reg, v[0], v[1], v[2], v[3]];
        let mut bytes = [0u8; MAX_FRAME_LEN];
        bytes[..8].copy_from_slice(&body);
        bytes[8] = crc5(&body);
        Self { bytes, len: 9 }
    }

    /// Frame bytes including the CRC.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Frame length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Always `false`; frames carry at least a preamble and CRC.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Preamble byte.
    #[must_use]
    pub const fn preamble(&self) -> u8 {
        self.bytes[0]
    }

    /// Whether the trailing byte matches the CRC of the body.
    #[must_use]
    pub fn crc_ok(&self) -> bool {
        self.len >= 2 && crc5(&self.bytes[..self.len - 1]) == self.bytes[self.len - 1]
    }

    /// The command buffer words: bytes packed big-endian, zero-padded.
    #[must_use]
    pub fn words(&self) -> [u32; MAX_FRAME_LEN / 4] {
        let mut out = [0u32; MAX_FRAME_LEN / 4];
        for (word, chunk) in out.iter_mut().zip(self.bytes.chunks_exact(4)) {
            *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        out
    }

    /// Rebuild a frame from command buffer words, taking the length from the
    /// frame's own length byte.
    #[must_use]
    pub fn from_words(words: &[u32; MAX_FRAME_LEN / 4]) -> Option<Self> {
        let mut bytes = [0u8; MAX_FRAME_LEN];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        let len = bytes[1] as usize;
        if len < 2 || len > MAX_FRAME_LEN {
            return None;
        }
        Some(Self { bytes, len })
    }

    /// Decode a register write: `(target, reg, value)`.
    #[must_use]
    pub fn as_register_write(&self) -> Option<(Target, u8, u32)> {
        if self.len != 9 {
            return None;
        }
        let target = match self.bytes[0] {
            preamble::WRITE_REGISTER => Target::Chip(self.bytes[2]),
            preamble::WRITE_BROADCAST => Target::Broadcast,
            _ => return None,
        };
        let value = u32::from_be_bytes([self.bytes[4], self.bytes[5], self.bytes[6], self.bytes[7]]);
        Some((target, self.bytes[3], value))
    }

    /// Decode a register read: `(target, reg)`.
    #[must_use]
    pub fn as_register_read(&self) -> Option<(Target, u8)> {
        if self.len != 9 {
            return None;
        }
        match self.bytes[0] {
            preamble::READ_REGISTER => Some((Target::Chip(self.bytes[2]), self.bytes[3])),
            preamble::READ_BROADCAST => Some((Target::Broadcast, self.bytes[3])),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame[")?;
        for (i, b) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{b:02X}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_inactive_matches_capture() {
        assert_eq!(Frame::chain_inactive().as_bytes(), &[0x53, 0x05, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn set_address_frame() {
        assert_eq!(Frame::set_address(2).as_bytes(), &[0x40, 0x05, 0x02, 0x00, 0x01]);
    }

    #[test]
    fn broadcast_ticket_mask_write() {
        let f = Frame::write_register(Target::Broadcast, 0x14, 0xFFFF_FFFF);
        assert_eq!(f.as_bytes(), &[0x51, 0x09, 0x00, 0x14, 0xFF, 0xFF, 0xFF, 0xFF, 0x19]);
        assert!(f.crc_ok());
        assert_eq!(f.as_register_write(), Some((Target::Broadcast, 0x14, 0xFFFF_FFFF)));
    }

    #[test]
    fn words_are_big_endian_and_padded() {
        let f = Frame::write_register(Target::Broadcast, 0x08, 0x4054_0100);
        assert_eq!(f.words(), [0x5109_0008, 0x4054_0100, 0x0B00_0000]);
        assert_eq!(Frame::from_words(&f.words()), Some(f));
    }

    #[test]
    fn unicast_read() {
        let f = Frame::read_register(Target::Chip(4), 0x00);
        assert_eq!(f.preamble(), preamble::READ_REGISTER);
        assert_eq!(f.len(), 9);
        assert_eq!(f.as_register_read(), Some((Target::Chip(4), 0x00)));
    }

    #[test]
    fn oversized_frames_are_rejected() {
        assert!(Frame::from_body(&[]).is_none());
        assert!(Frame::from_body(&[0u8; 12]).is_none());
        assert!(Frame::from_body(&[0u8; 11]).is_some());
        assert_eq!(
            Frame::from_body(&[0x53, 0x05, 0x00, 0x00]),
            Some(Frame::chain_inactive())
        );
    }
}
