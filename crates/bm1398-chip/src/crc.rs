//! CRC5 over command frames.
//!
//! Polynomial `x^5 + x^2 + 1` (0x05), seed `0x1F`, bits consumed MSB-first
//! within each byte, no final XOR. The trailing CRC byte of a frame is not
//! part of its own checksum.

const SEED: u8 = 0x1F;
const POLY: u8 = 0x05;

/// CRC5 of the first `bits` bits of `data`.
///
/// `bits` beyond `data.len() * 8` are ignored.
#[must_use]
pub fn crc5_bits(data: &[u8], bits: usize) -> u8 {
    let bits = bits.min(data.len() * 8);
    let mut crc = SEED;
    for i in 0..bits {
        let bit = (data[i / 8] >> (7 - (i % 8))) & 1;
        let top = (crc >> 4) & 1;
        crc = if top == bit { crc << 1 } else { (crc << 1) ^ POLY };
        crc &= 0x1F;
    }
    crc
}

/// CRC5 of every bit of `data`.
#[must_use]
pub fn crc5(data: &[u8]) -> u8 {
    crc5_bits(data, data.len() * 8)
}
