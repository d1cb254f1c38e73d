//! Driver configuration
//!
//! Defaults match a stock S19 control board. A few fields can be overridden
//! from the environment:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `X19_FPGA_DEVICE` | [`DriverConfig::device_path`] |
//! | `X19_CHIPS_PER_CHAIN` | [`DriverConfig::chips_per_chain`] |
//! | `X19_FREQUENCY_MHZ` | [`DriverConfig::frequency_mhz`] |
//! | `X19_BAUD_RATE` | [`DriverConfig::high_baud`] |

use bm1398_chip::{asic, pll};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Default FPGA device node.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/axi_fpga_dev";

/// Chain driver settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// FPGA device node to map.
    pub device_path: PathBuf,
    /// Chips on each detected chain.
    pub chips_per_chain: usize,
    /// Requested hashing frequency. Unvalidated values fall back to 525 MHz.
    pub frequency_mhz: u32,
    /// UART rate for enumeration.
    pub low_baud: u32,
    /// UART rate after configuration.
    pub high_baud: u32,
    /// Temperature diode mux selection.
    pub diode_mux_sel: u8,
    /// How long a register read waits for its reply.
    pub register_read_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from(DEFAULT_DEVICE_PATH),
            chips_per_chain: asic::CHIPS_PER_CHAIN,
            frequency_mhz: pll::PllParams::VALIDATED_MHZ,
            low_baud: pll::LOW_BAUD,
            high_baud: pll::HIGH_BAUD,
            diode_mux_sel: asic::DIODE_MUX_DEFAULT,
            register_read_timeout: Duration::from_millis(100),
        }
    }
}

impl DriverConfig {
    /// Defaults with environment overrides applied.
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with overrides from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(path) = lookup("X19_FPGA_DEVICE") {
            cfg.device_path = PathBuf::from(path);
        }
        override_parsed(&lookup, "X19_CHIPS_PER_CHAIN", &mut cfg.chips_per_chain);
        override_parsed(&lookup, "X19_FREQUENCY_MHZ", &mut cfg.frequency_mhz);
        override_parsed(&lookup, "X19_BAUD_RATE", &mut cfg.high_baud);
        cfg
    }

    /// Use `path` as the device node.
    #[must_use]
    pub fn with_device_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.device_path = path.into();
        self
    }

    /// Use `chips` chips per chain.
    #[must_use]
    pub fn with_chips_per_chain(mut self, chips: usize) -> Self {
        self.chips_per_chain = chips;
        self
    }

    /// Request `mhz` as the hashing frequency.
    #[must_use]
    pub fn with_frequency(mut self, mhz: u32) -> Self {
        self.frequency_mhz = mhz;
        self
    }
}

fn override_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => warn!("Ignoring {key}={raw:?}: not a valid number"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = DriverConfig::default();
        assert_eq!(cfg.device_path, PathBuf::from("/dev/axi_fpga_dev"));
        assert_eq!(cfg.chips_per_chain, 114);
        assert_eq!(cfg.frequency_mhz, 525);
        assert_eq!(cfg.low_baud, 115_200);
        assert_eq!(cfg.high_baud, 12_000_000);
        assert_eq!(cfg.diode_mux_sel, 3);
    }

    #[test]
    fn overrides_apply() {
        let cfg = DriverConfig::from_lookup(lookup(&[
            ("X19_FPGA_DEVICE", "/tmp/fpga"),
            ("X19_CHIPS_PER_CHAIN", "76"),
            ("X19_BAUD_RATE", " 6000000 "),
        ]));
        assert_eq!(cfg.device_path, PathBuf::from("/tmp/fpga"));
        assert_eq!(cfg.chips_per_chain, 76);
        assert_eq!(cfg.high_baud, 6_000_000);
        assert_eq!(cfg.frequency_mhz, 525);
    }

    #[test]
    fn bad_values_keep_defaults() {
        let cfg = DriverConfig::from_lookup(lookup(&[("X19_FREQUENCY_MHZ", "fast")]));
        assert_eq!(cfg.frequency_mhz, 525);
    }
}
