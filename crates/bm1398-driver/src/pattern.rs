//! Golden pattern records and nonce correlation
//!
//! A pattern file holds one row per core, each row eight 116-byte records.
//! Only the first `patterns_per_core` records of a row are used. Every
//! record carries a block-header tail, a midstate, and the nonce the chip
//! must find for them.
//!
//! ```text
//! 0x00  header[15]
//! 0x0F  work_data[12]   last 12 bytes of the block header
//! 0x1B  midstate[32]
//! 0x3B  reserved[29]
//! 0x58  nonce (u32 LE)
//! 0x5C  trailer[24]
//! ```

use crate::error::{DriverError, Result};
use crate::window::RegisterWindow;
use crate::Device;
use bm1398_chip::asic::ChainId;
use bm1398_chip::work::expected_work_id;
use bm1398_chip::NonceResponse;
use bytemuck::{Pod, Zeroable};
use std::path::Path;
use tracing::{debug, info, warn};

/// On-disk size of one pattern record.
pub const PATTERN_ENTRY_LEN: usize = 116;
/// Record slots per core row.
pub const PATTERN_SLOTS_PER_CORE: usize = 8;
/// Cores on a BM1398.
pub const CORES_PER_CHIP: usize = 80;

/// One golden test vector, laid out exactly as on disk
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PatternEntry {
    /// Record header
    pub header: [u8; 15],
    /// Last 12 bytes of the block header
    pub work_data: [u8; 12],
    /// SHA-256 midstate
    pub midstate: [u8; 32],
    /// Reserved
    pub reserved: [u8; 29],
    nonce: [u8; 4],
    /// Trailer
    pub trailer: [u8; 24],
}

const _: () = assert!(std::mem::size_of::<PatternEntry>() == PATTERN_ENTRY_LEN);

impl PatternEntry {
    /// Nonce the chip is expected to return.
    pub fn expected_nonce(&self) -> u32 {
        u32::from_le_bytes(self.nonce)
    }

    /// Midstate repeated into all four packet slots.
    pub fn midstates(&self) -> [[u8; 32]; 4] {
        [self.midstate; 4]
    }
}

/// Outcome of matching one returned nonce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// The nonce belongs to pattern `index`.
    Match {
        /// Pattern index
        index: usize,
        /// Whether the returned work id was the expected one. Hardware is
        /// loose about the low bits, so a mismatch is only worth a warning.
        work_id_matched: bool,
    },
    /// No pattern has this nonce.
    Unknown,
}

/// Patterns loaded for one chip, in submission order
#[derive(Debug, Clone)]
pub struct PatternSet {
    entries: Vec<PatternEntry>,
    hits: Vec<u32>,
    patterns_per_core: usize,
}

impl PatternSet {
    /// Read a pattern file.
    ///
    /// # Errors
    ///
    /// - [`DriverError::Io`] if the file cannot be read
    /// - [`DriverError::Validation`] if it is too short or the counts are bad
    pub fn load(path: impl AsRef<Path>, cores: usize, patterns_per_core: usize) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let set = Self::from_bytes(&bytes, cores, patterns_per_core)?;
        info!(
            "Loaded {} patterns ({cores} cores x {patterns_per_core}) from {}",
            set.len(),
            path.display()
        );
        Ok(set)
    }

    /// Parse pattern rows from memory.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Validation`] if `patterns_per_core` is zero or
    /// more than a row holds, or `bytes` is shorter than `cores` rows.
    pub fn from_bytes(bytes: &[u8], cores: usize, patterns_per_core: usize) -> Result<Self> {
        if patterns_per_core == 0 || patterns_per_core > PATTERN_SLOTS_PER_CORE {
            return Err(DriverError::validation(format!(
                "patterns per core must be 1..={PATTERN_SLOTS_PER_CORE}, got {patterns_per_core}"
            )));
        }
        let row_len = PATTERN_SLOTS_PER_CORE * PATTERN_ENTRY_LEN;
        let needed = cores
            .checked_mul(row_len)
            .ok_or_else(|| DriverError::validation(format!("{cores} cores of patterns overflow")))?;
        if bytes.len() < needed {
            return Err(DriverError::validation(format!(
                "pattern data is {} bytes, {cores} cores need {needed}",
                bytes.len()
            )));
        }

        let mut entries = Vec::with_capacity(cores * patterns_per_core);
        for row in bytes[..needed].chunks_exact(row_len) {
            for record in row.chunks_exact(PATTERN_ENTRY_LEN).take(patterns_per_core) {
                entries.push(bytemuck::pod_read_unaligned::<PatternEntry>(record));
            }
        }
        let hits = vec![0; entries.len()];
        Ok(Self {
            entries,
            hits,
            patterns_per_core,
        })
    }

    /// Number of patterns
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no patterns were loaded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Patterns in submission order
    pub fn entries(&self) -> &[PatternEntry] {
        &self.entries
    }

    /// `(core, slot)` of pattern `index`
    pub fn position(&self, index: usize) -> (usize, usize) {
        (index / self.patterns_per_core, index % self.patterns_per_core)
    }

    /// Match a returned nonce against the set without recording it.
    ///
    /// Matches on the nonce value. Among patterns sharing a nonce, one whose
    /// expected work id also matches is preferred.
    pub fn correlate(&self, response: &NonceResponse) -> Correlation {
        let mut candidates = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.expected_nonce() == response.nonce)
            .map(|(i, _)| i)
            .peekable();

        let Some(&first) = candidates.peek() else {
            return Correlation::Unknown;
        };
        match candidates.find(|&i| expected_work_id(pattern_work_id(i)) == response.work_id) {
            Some(index) => Correlation::Match {
                index,
                work_id_matched: true,
            },
            None => Correlation::Match {
                index: first,
                work_id_matched: false,
            },
        }
    }

    /// Correlate and count a hit on a match.
    pub fn record(&mut self, response: &NonceResponse) -> Correlation {
        let outcome = self.correlate(response);
        match outcome {
            Correlation::Match { index, work_id_matched } => {
                self.hits[index] += 1;
                let (core, slot) = self.position(index);
                if work_id_matched {
                    debug!("Nonce {:#010x} matches pattern {index} (core {core}, slot {slot})", response.nonce);
                } else {
                    warn!(
                        "Nonce {:#010x} matches pattern {index} but work id is {:#04x}, expected {:#04x}",
                        response.nonce,
                        response.work_id,
                        expected_work_id(pattern_work_id(index))
                    );
                }
            }
            Correlation::Unknown => debug!("Nonce {:#010x} matches no pattern", response.nonce),
        }
        outcome
    }

    /// Hits recorded for pattern `index`
    pub fn hits(&self, index: usize) -> u32 {
        self.hits.get(index).copied().unwrap_or(0)
    }

    /// Patterns that have returned at least one nonce
    pub fn patterns_hit(&self) -> usize {
        self.hits.iter().filter(|&&h| h > 0).count()
    }
}

/// Work id under which pattern `index` is submitted.
fn pattern_work_id(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

impl<W: RegisterWindow> Device<W> {
    /// Submit every pattern in `set` to `chain`, pattern `i` as work id `i`.
    ///
    /// # Errors
    ///
    /// See [`Device::send_work`].
    pub fn send_patterns(&self, chain: ChainId, set: &PatternSet) -> Result<()> {
        for (i, entry) in set.entries().iter().enumerate() {
            self.send_work(chain, pattern_work_id(i), &entry.work_data, &entry.midstates())?;
        }
        info!("{chain}: sent {} patterns", set.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn record(nonce: u32, fill: u8) -> [u8; PATTERN_ENTRY_LEN] {
        let mut r = [fill; PATTERN_ENTRY_LEN];
        r[0x58..0x5C].copy_from_slice(&nonce.to_le_bytes());
        r
    }

    /// `cores` rows, slot `s` of core `c` carrying nonce `c * 100 + s`.
    fn file_bytes(cores: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for c in 0..cores {
            for s in 0..PATTERN_SLOTS_PER_CORE {
                out.extend_from_slice(&record((c * 100 + s) as u32, s as u8));
            }
        }
        out
    }

    fn response(nonce: u32, work_id: u8) -> NonceResponse {
        NonceResponse {
            nonce,
            chain_id: 0,
            chip_id: 0,
            core_id: 0,
            work_id,
        }
    }

    #[test]
    fn field_offsets() {
        let mut raw = record(0x1234_5678, 0);
        raw[0x0F] = 0xAA;
        raw[0x1B] = 0xBB;
        let entry: PatternEntry = bytemuck::pod_read_unaligned(&raw);
        assert_eq!(entry.work_data[0], 0xAA);
        assert_eq!(entry.midstate[0], 0xBB);
        assert_eq!(entry.expected_nonce(), 0x1234_5678);
    }

    #[test]
    fn only_leading_slots_are_used() {
        let set = PatternSet::from_bytes(&file_bytes(3), 3, 2).unwrap();
        let nonces: Vec<u32> = set.entries().iter().map(PatternEntry::expected_nonce).collect();
        assert_eq!(nonces, vec![0, 1, 100, 101, 200, 201]);
        assert_eq!(set.position(3), (1, 1));
    }

    #[test]
    fn short_file_is_rejected() {
        let bytes = file_bytes(2);
        assert!(PatternSet::from_bytes(&bytes, 3, 8).is_err());
        assert!(PatternSet::from_bytes(&bytes, 2, 9).is_err());
        assert!(PatternSet::from_bytes(&bytes, 2, 0).is_err());
        assert!(matches!(
            PatternSet::from_bytes(&bytes, usize::MAX, 8),
            Err(DriverError::Validation { .. })
        ));
    }

    #[test]
    fn work_id_mismatch_still_matches() {
        let mut set = PatternSet::from_bytes(&file_bytes(2), 2, 8).unwrap();
        assert_eq!(
            set.record(&response(101, expected_work_id(9))),
            Correlation::Match { index: 9, work_id_matched: true }
        );
        assert_eq!(
            set.record(&response(101, 0)),
            Correlation::Match { index: 9, work_id_matched: false }
        );
        assert_eq!(set.record(&response(0xFFFF, 0)), Correlation::Unknown);
        assert_eq!(set.hits(9), 2);
        assert_eq!(set.patterns_hit(), 1);
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&file_bytes(CORES_PER_CHIP)).unwrap();
        let set = PatternSet::load(file.path(), CORES_PER_CHIP, 8).unwrap();
        assert_eq!(set.len(), 640);
        assert_eq!(set.entries()[639].expected_nonce(), 7907);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = PatternSet::load("/nonexistent/btc-asic-000.bin", 1, 1).unwrap_err();
        assert!(matches!(err, DriverError::Io { .. }));
    }
}
