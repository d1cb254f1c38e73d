//! Frequency and baud configuration
//!
//! Baud changes rewrite the chain's CLK_CTRL register (and, above 3 Mbaud,
//! route a 400 MHz clock to the UART first). Frequency changes write PLL0.
//! Only the 525 MHz PLL vector is validated; any other request is logged
//! and served with that vector.

use crate::device::Device;
use crate::error::{DriverError, Result};
use crate::window::RegisterWindow;
use bm1398_chip::asic::{self, ChainId};
use bm1398_chip::cmd::Target;
use bm1398_chip::pll::{self, BaudConfig, PllParams};

/// PLL parameters for `freq_mhz`.
///
/// # Errors
///
/// Returns [`DriverError::UnsupportedFrequency`] if no validated vector
/// exists. The error names the fallback operating point.
pub fn resolve_frequency(freq_mhz: u32) -> Result<PllParams> {
    PllParams::for_frequency(freq_mhz).ok_or(DriverError::UnsupportedFrequency {
        requested_mhz: freq_mhz,
        fallback_mhz: PllParams::VALIDATED_MHZ,
    })
}

impl<W: RegisterWindow> Device<W> {
    /// Switch the UART of every chip on `chain` to `baud`.
    ///
    /// Settles 50 ms after the final write.
    ///
    /// # Errors
    ///
    /// - [`DriverError::Validation`] if no divisor exists for `baud`
    /// - command bus errors from the register writes
    pub fn set_baud_rate(&self, chain: ChainId, baud: u32) -> Result<BaudConfig> {
        let cfg = BaudConfig::new(baud)
            .ok_or_else(|| DriverError::validation(format!("no UART divisor for {baud} baud")))?;

        tracing::debug!(
            "{chain}: {baud} baud, divisor {} ({})",
            cfg.divisor(),
            if cfg.is_high_speed() { "400 MHz ref" } else { "25 MHz ref" }
        );

        if cfg.is_high_speed() {
            self.write_register(chain, Target::Broadcast, asic::PLL3_PARAMETER, pll::PLL3_UART_400MHZ)?;
            self.settle_ms(10);
            self.write_register(chain, Target::Broadcast, asic::BAUD_CONFIG, pll::BAUD_CONFIG_HIGH_SPEED)?;
            self.settle_ms(10);
        }
        self.write_register(chain, Target::Broadcast, asic::CLOCK_ORDER_CONTROL, cfg.clock_control())?;
        self.settle_ms(50);
        Ok(cfg)
    }

    /// Program PLL0 on every chip of `chain` for `freq_mhz`.
    ///
    /// Unvalidated frequencies fall back to 525 MHz with a warning. Returns
    /// the frequency actually programmed.
    ///
    /// # Errors
    ///
    /// - [`DriverError::Validation`] if the PLL vector's VCO is out of range
    /// - command bus errors from the register write
    pub fn set_frequency(&self, chain: ChainId, freq_mhz: u32) -> Result<u32> {
        let (params, actual) = match resolve_frequency(freq_mhz) {
            Ok(p) => (p, freq_mhz),
            Err(e) => {
                tracing::warn!("{e}; using the validated operating point");
                (PllParams::MHZ_525, PllParams::VALIDATED_MHZ)
            }
        };

        let word = params.register_value().ok_or_else(|| {
            DriverError::validation(format!(
                "VCO {} MHz outside {:?} MHz",
                params.vco_mhz(),
                pll::VCO_RANGE_MHZ
            ))
        })?;

        tracing::info!("{chain}: PLL0 = {word:#010x} ({actual} MHz, VCO {} MHz)", params.vco_mhz());
        self.write_register(chain, Target::Broadcast, asic::PLL0_PARAMETER, word)?;
        self.settle_ms(10);
        Ok(actual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::sim::SimWindow;
    use crate::DriverConfig;
    use std::sync::Arc;

    fn ready_device() -> Device<SimWindow> {
        let dev = Device::with_window(SimWindow::new(), Arc::new(VirtualClock::new()), DriverConfig::default()).unwrap();
        dev.initialize().unwrap();
        dev
    }

    #[test]
    fn unsupported_frequency_names_fallback() {
        match resolve_frequency(650) {
            Err(DriverError::UnsupportedFrequency { requested_mhz, fallback_mhz }) => {
                assert_eq!(requested_mhz, 650);
                assert_eq!(fallback_mhz, 525);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fallback_programs_validated_vector() {
        let dev = ready_device();
        let chain = ChainId::new(0).unwrap();
        assert_eq!(dev.set_frequency(chain, 700).unwrap(), 525);
        assert_eq!(dev.window().chip_register(0, 0, asic::PLL0_PARAMETER), Some(0x4054_0100));
    }

    #[test]
    fn high_speed_baud_writes_uart_pll_first() {
        let dev = ready_device();
        let chain = ChainId::new(1).unwrap();
        dev.set_baud_rate(chain, 12_000_000).unwrap();
        let regs: Vec<u8> = dev
            .window()
            .register_writes(1)
            .into_iter()
            .map(|(_, reg, _)| reg)
            .collect();
        assert_eq!(regs, vec![asic::PLL3_PARAMETER, asic::BAUD_CONFIG, asic::CLOCK_ORDER_CONTROL]);
        assert_eq!(dev.window().chip_register(1, 0, asic::CLOCK_ORDER_CONTROL), Some(0xF001_0300));
    }

    #[test]
    fn low_speed_baud_is_one_write() {
        let dev = ready_device();
        let chain = ChainId::new(0).unwrap();
        let before = dev.clock().now();
        let cfg = dev.set_baud_rate(chain, 115_200).unwrap();
        assert_eq!(cfg.divisor(), 26);
        assert_eq!(dev.window().register_writes(0).len(), 1);
        assert_eq!(dev.clock().now() - before, std::time::Duration::from_millis(50));
    }

    #[test]
    fn zero_baud_is_rejected() {
        let dev = ready_device();
        let err = dev.set_baud_rate(ChainId::new(0).unwrap(), 0).unwrap_err();
        assert!(matches!(err, DriverError::Validation { .. }));
    }
}
