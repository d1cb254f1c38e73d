//! Work submission and nonce collection
//!
//! The work FIFO and the nonce FIFO are separate hardware queues. Once a
//! chain is `Ready`, one thread can feed work while another drains nonces
//! without any lock between them. Neither path touches the command bus.

use crate::clock::poll_until;
use crate::device::{lock, Device};
use crate::error::{ChainState, DriverError, Result};
use crate::window::RegisterWindow;
use bm1398_chip::asic::ChainId;
use bm1398_chip::regs::{self, nonce_fifo, work_control};
use bm1398_chip::work::{HEADER_TAIL_LEN, MIDSTATES};
use bm1398_chip::{NonceResponse, WorkPacket};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Poll interval for FIFO conditions.
pub const FIFO_POLL_INTERVAL: Duration = Duration::from_millis(1);
/// How long a submission waits for work FIFO space.
pub const WORK_SPACE_TIMEOUT: Duration = Duration::from_secs(1);
/// Count snapshots drained before a stale flush gives up.
pub const STALE_DRAIN_ROUNDS: usize = 4;

impl<W: RegisterWindow> Device<W> {
    /// Turn off FPGA auto-pattern generation so external work is accepted.
    ///
    /// [`Device::send_work`] does this before the first submission.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Validation`] if the device is uninitialized.
    pub fn enable_work_send(&self) -> Result<()> {
        let ctrl = self.read_indirect(regs::IDX_WORK_CONTROL)?;
        if ctrl & work_control::AUTO_GEN != 0 {
            self.write_indirect(regs::IDX_WORK_CONTROL, ctrl & !work_control::AUTO_GEN)?;
        }
        self.work_send_enabled.store(true, Ordering::SeqCst);
        info!("External work enabled (work control {:#010x})", ctrl & !work_control::AUTO_GEN);
        Ok(())
    }

    /// Wait until the FPGA reports room for a packet on `chain`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::FifoTimeout`] after one second without space.
    pub fn wait_for_work_space(&self, chain: ChainId) -> Result<()> {
        let bit = 1u32 << chain.get();
        let ready = poll_until(self.clock(), FIFO_POLL_INTERVAL, WORK_SPACE_TIMEOUT, || {
            Ok(self.read_direct(regs::BUFFER_SPACE)? & bit != 0)
        })?;
        if ready {
            Ok(())
        } else {
            Err(DriverError::FifoTimeout {
                chain: chain.get(),
                what: "work FIFO space",
                waited: WORK_SPACE_TIMEOUT,
            })
        }
    }

    /// Submit one unit of work to `chain`.
    ///
    /// All 37 packet words go to the single work FIFO port.
    ///
    /// # Errors
    ///
    /// - [`DriverError::Validation`] if `chain` is not `Ready`
    /// - [`DriverError::FifoTimeout`] if the FIFO never reports space
    pub fn send_work(
        &self,
        chain: ChainId,
        work_id: u32,
        header_tail: &[u8; HEADER_TAIL_LEN],
        midstates: &[[u8; 32]; MIDSTATES],
    ) -> Result<()> {
        let state = self.chain_state(chain);
        if state != ChainState::Ready {
            return Err(DriverError::validation(format!("{chain} is {state}, not ready for work")));
        }
        if !self.work_send_enabled.load(Ordering::SeqCst) {
            self.enable_work_send()?;
        }
        self.wait_for_work_space(chain)?;

        let packet = WorkPacket {
            chain: chain.get(),
            work_id,
            header_tail: *header_tail,
            midstates: *midstates,
        };
        for word in packet.to_words() {
            self.write_indirect(regs::IDX_TW_WRITE_FIRST, word)?;
        }
        trace!("{chain}: work {work_id} queued");
        Ok(())
    }

    // ── Nonce FIFO ──────────────────────────────────────────────────────────

    /// Entries waiting in the nonce FIFO.
    ///
    /// # Errors
    ///
    /// Propagates register access failures.
    pub fn nonce_count(&self) -> Result<u32> {
        Ok(self.read_direct(regs::NONCE_NUMBER_IN_FIFO)? & nonce_fifo::COUNT_MASK)
    }

    /// Read up to `max` entries from the nonce FIFO.
    ///
    /// # Errors
    ///
    /// Propagates register access failures.
    pub fn drain_nonces(&self, max: usize) -> Result<Vec<NonceResponse>> {
        let _fifo = lock(&self.nonce_reader);
        let available = usize::try_from(self.nonce_count()?).unwrap_or(usize::MAX);
        let take = available.min(max);
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            let nonce = self.read_direct(regs::RETURN_NONCE)?;
            let meta = self.read_direct(regs::RETURN_NONCE)?;
            let response = NonceResponse::decode(nonce, meta);
            trace!("nonce {nonce:#010x} meta {meta:#010x}");
            out.push(response);
        }
        Ok(out)
    }

    /// Read one entry, if any is waiting.
    ///
    /// # Errors
    ///
    /// Propagates register access failures.
    pub fn read_nonce(&self) -> Result<Option<NonceResponse>> {
        Ok(self.drain_nonces(1)?.into_iter().next())
    }

    /// Empty the nonce FIFO, returning how many entries were dropped.
    ///
    /// Drains at most [`STALE_DRAIN_ROUNDS`] snapshots of the entry count, so
    /// a count register that never falls (stuck FPGA, chips still hashing)
    /// costs a bounded number of reads and a warning.
    ///
    /// # Errors
    ///
    /// Propagates register access failures.
    pub fn discard_stale_nonces(&self) -> Result<usize> {
        let mut dropped = 0;
        for _ in 0..STALE_DRAIN_ROUNDS {
            let batch = self.drain_nonces(usize::MAX)?.len();
            if batch == 0 {
                if dropped > 0 {
                    debug!("Discarded {dropped} stale nonce FIFO entries");
                }
                return Ok(dropped);
            }
            dropped += batch;
        }
        warn!(
            "Nonce FIFO still reports {} entries after discarding {dropped}; continuing",
            self.nonce_count()?
        );
        Ok(dropped)
    }

    /// Wait until the nonce FIFO holds at least one entry for anyone.
    /// `chain` only labels the timeout.
    ///
    /// Returns the number of entries waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::FifoTimeout`] if nothing arrives within `timeout`.
    pub fn wait_for_nonces(&self, chain: ChainId, timeout: Duration) -> Result<u32> {
        let mut count = 0;
        let arrived = poll_until(self.clock(), FIFO_POLL_INTERVAL, timeout, || {
            count = self.nonce_count()?;
            Ok(count > 0)
        })?;
        if arrived {
            Ok(count)
        } else {
            Err(DriverError::FifoTimeout {
                chain: chain.get(),
                what: "nonce",
                waited: timeout,
            })
        }
    }
}
