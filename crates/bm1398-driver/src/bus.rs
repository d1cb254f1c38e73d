//! Command bus layer
//!
//! Frames travel to the chips through a 12-byte command buffer and a trigger
//! word. The buffer is shared by all chains, so every transmission, and
//! every read that waits for its reply, runs under the device's bus lock.

use crate::clock::poll_until;
use crate::device::{lock, Device};
use crate::error::{DriverError, Result};
use crate::window::RegisterWindow;
use bm1398_chip::asic::{self, ChainId};
use bm1398_chip::cmd::{Frame, Target, MAX_FRAME_LEN};
use bm1398_chip::regs;
use std::time::Duration;

/// Poll interval while waiting for the trigger's ready bit to clear.
pub const COMMAND_POLL_INTERVAL: Duration = Duration::from_micros(1);
/// Ceiling on a single frame transmission.
pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(10);
/// Poll interval while waiting for a register read reply.
pub const REPLY_POLL_INTERVAL: Duration = Duration::from_micros(100);

impl<W: RegisterWindow> Device<W> {
    /// Transmit one frame on `chain`.
    ///
    /// # Errors
    ///
    /// - [`DriverError::Validation`] if the device is uninitialized
    /// - [`DriverError::CommandTimeout`] if the FPGA never clears the ready bit
    pub fn send_frame(&self, chain: ChainId, frame: &Frame) -> Result<()> {
        self.ensure_initialized()?;
        let _bus = lock(&self.bus);
        self.transmit(chain, frame)
    }

    /// Transmit a frame built from `body`, with the CRC appended.
    ///
    /// For commands outside the built-in catalogue.
    ///
    /// # Errors
    ///
    /// - [`DriverError::Validation`] if `body` is empty or the frame would
    ///   not fit the 12-byte command buffer; nothing is sent
    /// - see [`Device::send_frame`]
    pub fn send_command(&self, chain: ChainId, body: &[u8]) -> Result<()> {
        let frame = Frame::from_body(body).ok_or_else(|| {
            DriverError::validation(format!(
                "command of {} bytes does not fit the {MAX_FRAME_LEN}-byte buffer with its CRC",
                body.len()
            ))
        })?;
        self.send_frame(chain, &frame)
    }

    /// Caller holds the bus lock.
    fn transmit(&self, chain: ChainId, frame: &Frame) -> Result<()> {
        tracing::debug!("{chain} <- {frame:?}");
        for (i, word) in frame.words().into_iter().enumerate() {
            self.write_direct(regs::BC_COMMAND_BUFFER + i * 4, word)?;
        }
        self.write_direct(regs::BC_WRITE_COMMAND, regs::bc_command::trigger(chain.get()))?;

        let done = poll_until(self.clock(), COMMAND_POLL_INTERVAL, COMMAND_TIMEOUT, || {
            Ok(self.read_direct(regs::BC_WRITE_COMMAND)? & regs::bc_command::BUFFER_READY == 0)
        })?;
        if done {
            Ok(())
        } else {
            Err(DriverError::CommandTimeout {
                chain: chain.get(),
                waited: COMMAND_TIMEOUT,
            })
        }
    }

    /// Write a chip register, unicast or broadcast
    ///
    /// # Errors
    ///
    /// See [`Device::send_frame`].
    pub fn write_register(&self, chain: ChainId, target: Target, reg: u8, value: u32) -> Result<()> {
        self.send_frame(chain, &Frame::write_register(target, reg, value))
    }

    /// Read a chip register.
    ///
    /// The reply arrives through the nonce FIFO; its first word is the
    /// register value. The bus lock is held for the whole exchange so no other
    /// command can interleave with it. Replies compete with a concurrent
    /// nonce drain, so read registers before hashing starts.
    ///
    /// # Errors
    ///
    /// - [`DriverError::CommandTimeout`] if the read frame cannot be sent
    /// - [`DriverError::FifoTimeout`] if no reply arrives within
    ///   [`crate::DriverConfig::register_read_timeout`]
    pub fn read_register(&self, chain: ChainId, target: Target, reg: u8) -> Result<u32> {
        self.ensure_initialized()?;
        let _bus = lock(&self.bus);
        self.transmit(chain, &Frame::read_register(target, reg))?;

        let timeout = self.config().register_read_timeout;
        let arrived = poll_until(self.clock(), REPLY_POLL_INTERVAL, timeout, || {
            Ok(self.read_direct(regs::NONCE_NUMBER_IN_FIFO)? & regs::nonce_fifo::COUNT_MASK > 0)
        })?;
        if !arrived {
            return Err(DriverError::FifoTimeout {
                chain: chain.get(),
                what: "register read reply",
                waited: timeout,
            });
        }

        let _fifo = lock(&self.nonce_reader);
        let value = self.read_direct(regs::RETURN_NONCE)?;
        let meta = self.read_direct(regs::RETURN_NONCE)?;
        tracing::debug!("{chain} reg {reg:#04x} -> {value:#010x} (meta {meta:#010x})");
        Ok(value)
    }

    /// Put every chip on `chain` into the unaddressed state
    ///
    /// # Errors
    ///
    /// See [`Device::send_frame`].
    pub fn chain_inactive(&self, chain: ChainId) -> Result<()> {
        self.send_frame(chain, &Frame::chain_inactive())
    }

    /// Give the next unaddressed chip on `chain` the address `addr`
    ///
    /// # Errors
    ///
    /// See [`Device::send_frame`].
    pub fn set_address(&self, chain: ChainId, addr: u8) -> Result<()> {
        self.send_frame(chain, &Frame::set_address(addr))
    }

    /// Broadcast a ticket mask to every chip on `chain`
    ///
    /// # Errors
    ///
    /// See [`Device::send_frame`].
    pub fn set_ticket_mask(&self, chain: ChainId, mask: u32) -> Result<()> {
        self.write_register(chain, Target::Broadcast, asic::TICKET_MASK, mask)
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::VirtualClock;
    use crate::sim::SimWindow;
    use crate::{Device, DriverConfig, DriverError};
    use bm1398_chip::cmd::{Frame, Target};
    use bm1398_chip::{asic, regs, ChainId};
    use std::sync::Arc;

    fn ready_device() -> Device<SimWindow> {
        let dev = Device::with_window(SimWindow::new(), Arc::new(VirtualClock::new()), DriverConfig::default()).unwrap();
        dev.initialize().unwrap();
        dev
    }

    fn chain(n: u8) -> ChainId {
        ChainId::new(n).unwrap()
    }

    #[test]
    fn frame_words_and_trigger() {
        let dev = ready_device();
        let start = dev.window().writes().len();
        dev.chain_inactive(chain(1)).unwrap();
        let all = dev.window().writes();
        assert_eq!(
            &all[start..],
            &[
                (regs::BC_COMMAND_BUFFER, 0x5305_0000),
                (regs::BC_COMMAND_BUFFER + 4, 0x0300_0000),
                (regs::BC_COMMAND_BUFFER + 8, 0),
                (regs::BC_WRITE_COMMAND, 0x8081_0000),
            ]
        );
    }

    #[test]
    fn stalled_bus_times_out() {
        let dev = ready_device();
        dev.window().stall_command_bus(true);
        let err = dev.chain_inactive(chain(0)).unwrap_err();
        assert!(matches!(err, DriverError::CommandTimeout { chain: 0, .. }));
    }

    #[test]
    fn register_round_trip_through_sim() {
        let dev = ready_device();
        dev.write_register(chain(0), Target::Broadcast, asic::TICKET_MASK, 0xFFFF_FFFF).unwrap();
        let v = dev.read_register(chain(0), Target::Chip(0), asic::TICKET_MASK).unwrap();
        assert_eq!(v, 0xFFFF_FFFF);
    }

    #[test]
    fn missing_reply_is_a_fifo_timeout() {
        let dev = ready_device();
        dev.window().mute_replies(true);
        let err = dev.read_register(chain(2), Target::Broadcast, asic::CHIP_ADDRESS).unwrap_err();
        assert!(matches!(err, DriverError::FifoTimeout { chain: 2, .. }));
    }

    #[test]
    fn oversized_command_is_a_validation_error() {
        let dev = ready_device();
        let err = dev.send_command(chain(0), &[0u8; 12]).unwrap_err();
        assert!(matches!(err, DriverError::Validation { .. }));
        assert!(matches!(dev.send_command(chain(0), &[]), Err(DriverError::Validation { .. })));
        assert!(dev.window().frames().is_empty());

        dev.send_command(chain(0), &[0x53, 0x05, 0x00, 0x00]).unwrap();
        assert_eq!(dev.window().frames(), vec![(0, Frame::chain_inactive())]);
    }

    #[test]
    fn uninitialized_bus_is_rejected() {
        let dev = Device::with_window(SimWindow::new(), Arc::new(VirtualClock::new()), DriverConfig::default()).unwrap();
        assert!(matches!(dev.chain_inactive(chain(0)), Err(DriverError::Validation { .. })));
        assert!(dev.window().frames().is_empty());
    }
}
