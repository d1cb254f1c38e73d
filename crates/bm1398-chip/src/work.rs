//! Work packets and nonce responses.
//!
//! ## Work packet (148 bytes, 37 words)
//!
//! ```text
//! byte 0       type = 0x01
//! byte 1       chain_id | 0x80
//! bytes 2-3    reserved
//! bytes 4-7    work_id << 3
//! bytes 8-19   last 12 bytes of the block header
//! bytes 20-147 four 32-byte midstates
//! ```
//!
//! The FPGA takes the packet as 37 big-endian words written one after
//! another into the work FIFO port.
//!
//! ## Nonce FIFO entry
//!
//! Two consecutive reads of the nonce port. The first is the nonce, the
//! second carries `chain_id[31:24] chip_id[23:16] core_id[15:8] work_id[7:0]`.

/// Packet length in bytes.
pub const WORK_PACKET_LEN: usize = 148;

/// Packet length in FIFO words.
pub const WORK_PACKET_WORDS: usize = WORK_PACKET_LEN / 4;

/// Midstates carried per packet.
pub const MIDSTATES: usize = 4;

/// Length of the header tail.
pub const HEADER_TAIL_LEN: usize = 12;

const WORK_TYPE: u8 = 0x01;
const CHAIN_FLAG: u8 = 0x80;
const WORK_ID_SHIFT: u32 = 3;

/// One unit of work for a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPacket {
    /// Chain the work is addressed to.
    pub chain: u8,
    /// Caller-chosen work id, before the on-wire shift.
    pub work_id: u32,
    /// Last 12 bytes of the block header.
    pub header_tail: [u8; HEADER_TAIL_LEN],
    /// SHA-256 midstates.
    pub midstates: [[u8; 32]; MIDSTATES],
}

impl WorkPacket {
    /// Packet bytes in wire order.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; WORK_PACKET_LEN] {
        let mut out = [0u8; WORK_PACKET_LEN];
        out[0] = WORK_TYPE;
        out[1] = self.chain | CHAIN_FLAG;
        out[4..8].copy_from_slice(&(self.work_id << WORK_ID_SHIFT).to_be_bytes());
        out[8..20].copy_from_slice(&self.header_tail);
        for (i, m) in self.midstates.iter().enumerate() {
            let at = 20 + i * 32;
            out[at..at + 32].copy_from_slice(m);
        }
        out
    }

    /// FIFO words, each 4-byte group read big-endian.
    #[must_use]
    pub fn to_words(&self) -> [u32; WORK_PACKET_WORDS] {
        let bytes = self.to_bytes();
        let mut words = [0u32; WORK_PACKET_WORDS];
        for (w, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *w = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        words
    }

    /// Rebuild a packet from FIFO words. Returns `None` if the type byte or
    /// chain flag is missing.
    ///
    /// The top three bits of the work id are lost to the on-wire shift.
    #[must_use]
    pub fn from_words(words: &[u32; WORK_PACKET_WORDS]) -> Option<Self> {
        let mut bytes = [0u8; WORK_PACKET_LEN];
        for (chunk, w) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&w.to_be_bytes());
        }
        if bytes[0] != WORK_TYPE || bytes[1] & CHAIN_FLAG == 0 {
            return None;
        }
        let mut header_tail = [0u8; HEADER_TAIL_LEN];
        header_tail.copy_from_slice(&bytes[8..20]);
        let mut midstates = [[0u8; 32]; MIDSTATES];
        for (i, m) in midstates.iter_mut().enumerate() {
            let at = 20 + i * 32;
            m.copy_from_slice(&bytes[at..at + 32]);
        }
        let shifted = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Some(Self {
            chain: bytes[1] & !CHAIN_FLAG,
            work_id: shifted >> WORK_ID_SHIFT,
            header_tail,
            midstates,
        })
    }
}

/// Work id a chip is expected to echo for a packet submitted with `work_id`.
#[must_use]
pub const fn expected_work_id(work_id: u32) -> u8 {
    ((work_id << WORK_ID_SHIFT) & 0xFF) as u8
}

/// A nonce reported by a chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NonceResponse {
    /// Nonce value.
    pub nonce: u32,
    /// Chain that found it.
    pub chain_id: u8,
    /// Chip address on the chain.
    pub chip_id: u8,
    /// Core within the chip.
    pub core_id: u8,
    /// Low byte of the on-wire work id.
    pub work_id: u8,
}

impl NonceResponse {
    /// Decode the two words of a nonce FIFO entry.
    #[must_use]
    pub const fn decode(nonce: u32, meta: u32) -> Self {
        Self {
            nonce,
            chain_id: (meta >> 24) as u8,
            chip_id: (meta >> 16) as u8,
            core_id: (meta >> 8) as u8,
            work_id: meta as u8,
        }
    }

    /// Metadata word for this response.
    #[must_use]
    pub const fn meta(&self) -> u32 {
        ((self.chain_id as u32) << 24)
            | ((self.chip_id as u32) << 16)
            | ((self.core_id as u32) << 8)
            | self.work_id as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorkPacket {
        let mut midstates = [[0u8; 32]; MIDSTATES];
        for (i, m) in midstates.iter_mut().enumerate() {
            for (j, b) in m.iter_mut().enumerate() {
                *b = (i * 32 + j) as u8;
            }
        }
        WorkPacket {
            chain: 1,
            work_id: 5,
            header_tail: [0xA0, 0xA1, 0xA2, 0xA3, 0xB0, 0xB1, 0xB2, 0xB3, 0xC0, 0xC1, 0xC2, 0xC3],
            midstates,
        }
    }

    #[test]
    fn packet_header_words() {
        let words = sample().to_words();
        assert_eq!(words.len(), 37);
        assert_eq!(words[0], 0x0181_0000);
        assert_eq!(words[1], 5 << 3);
        assert_eq!(words[2], 0xA0A1_A2A3);
        assert_eq!(words[5], 0x0001_0203);
    }

    #[test]
    fn packet_survives_fifo_words() {
        let p = sample();
        assert_eq!(WorkPacket::from_words(&p.to_words()), Some(p));
    }

    #[test]
    fn non_work_words_are_rejected() {
        assert_eq!(WorkPacket::from_words(&[0u32; WORK_PACKET_WORDS]), None);
    }

    #[test]
    fn nonce_metadata_fields() {
        let r = NonceResponse::decode(0xDEAD_BEEF, 0x0207_1328);
        assert_eq!(r.nonce, 0xDEAD_BEEF);
        assert_eq!(r.chain_id, 2);
        assert_eq!(r.chip_id, 7);
        assert_eq!(r.core_id, 0x13);
        assert_eq!(r.work_id, 0x28);
        assert_eq!(r.meta(), 0x0207_1328);
    }

    #[test]
    fn echoed_work_id() {
        assert_eq!(expected_work_id(5), 0x28);
        assert_eq!(expected_work_id(0x20), 0x00);
    }
}
