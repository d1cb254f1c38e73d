//! `x19`: bring-up and pattern-test tool for S19 hash chains.
//!
//! ```text
//! USAGE:
//!   x19 detect                       Show which chain slots hold a board
//!   x19 init <chain>                 Reset and configure one chain
//!   x19 status <chain>               Read chip id words from a chain
//!   x19 pattern <chain> <file>       Bring up a chain and run a golden pattern file
//! ```
//!
//! PSU and hashboard DC-DC must be powered before `init` or `pattern`.
//! Configuration comes from `X19_*` environment variables; see
//! `bm1398_driver::DriverConfig`.

use anyhow::{bail, Context, Result};
use bm1398_chip::asic;
use bm1398_driver::prelude::*;
use bm1398_driver::{SimWindow, VirtualClock};
use clap::{Parser, Subcommand};
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "x19", about = "S19 hash chain bring-up CLI", version)]
struct Cli {
    /// FPGA device node (overrides X19_FPGA_DEVICE).
    #[arg(long, global = true)]
    device: Option<PathBuf>,
    /// Run against the in-memory FPGA model with virtual time.
    #[arg(long, global = true)]
    simulate: bool,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Show which chain slots report a board.
    Detect,
    /// Run the full reset and configuration sequence on one chain.
    Init {
        /// Chain slot (0-2).
        chain: u8,
    },
    /// Read chip id words from the first chips of a chain.
    Status {
        /// Chain slot (0-2).
        chain: u8,
        /// How many chips to query.
        #[arg(long, default_value_t = 4)]
        chips: usize,
    },
    /// Bring up a chain, send golden patterns and count matching nonces.
    Pattern {
        /// Chain slot (0-2).
        chain: u8,
        /// Pattern file (e.g. /tmp/BM1398-pattern/btc-asic-000.bin).
        file: PathBuf,
        /// Core rows in the file.
        #[arg(long, default_value_t = 80)]
        cores: usize,
        /// Patterns used per core (at most 8).
        #[arg(long, default_value_t = 8)]
        patterns: usize,
        /// How long to collect nonces.
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let mut config = DriverConfig::from_env();
    if let Some(path) = cli.device {
        config = config.with_device_path(path);
    }

    if cli.simulate {
        info!("Using the simulated FPGA with virtual time");
        let dev = Device::with_window(SimWindow::new(), Arc::new(VirtualClock::new()), config)?;
        dev.initialize()?;
        run(&dev, cli.command)
    } else {
        let dev = Device::open(config)
            .context("opening the FPGA register window (is the FPGA driver loaded?)")?;
        run(&dev, cli.command)
    }
}

fn run<W: RegisterWindow + Debug>(dev: &Device<W>, command: Cmd) -> Result<()> {
    match command {
        Cmd::Detect => cmd_detect(dev),
        Cmd::Init { chain } => cmd_init(dev, parse_chain(chain)?),
        Cmd::Status { chain, chips } => cmd_status(dev, parse_chain(chain)?, chips),
        Cmd::Pattern {
            chain,
            file,
            cores,
            patterns,
            timeout_secs,
        } => cmd_pattern(dev, parse_chain(chain)?, &file, cores, patterns, Duration::from_secs(timeout_secs)),
    }
}

fn parse_chain(raw: u8) -> Result<ChainId> {
    ChainId::new(raw).with_context(|| format!("chain {raw} does not exist (valid: 0-2)"))
}

fn cmd_detect<W: RegisterWindow + Debug>(dev: &Device<W>) -> Result<()> {
    let mask = dev.detect_chains()?;
    println!("Hash-on-plug: {mask:#05b}");
    for chain in dev.chains() {
        let present = if chain.detected { "present" } else { "empty" };
        println!(
            "  {}  {present:<8} {} chips, address interval {}",
            chain.id, chain.chip_count, chain.address_interval
        );
    }
    println!("CRC errors: {}", dev.crc_error_count()?);
    Ok(())
}

fn cmd_init<W: RegisterWindow + Debug>(dev: &Device<W>, chain: ChainId) -> Result<()> {
    require_board(dev, chain)?;
    let start = dev.clock().now();
    dev.init_chain(chain)?;
    let took = dev.clock().now() - start;
    info!("{chain}: bring-up finished in {took:?}");
    println!("{chain} ready in {:.1} s", took.as_secs_f64());
    Ok(())
}

fn cmd_status<W: RegisterWindow + Debug>(dev: &Device<W>, chain: ChainId, chips: usize) -> Result<()> {
    println!("{chain}: {}", dev.chain_state(chain));
    let interval = asic::address_interval(dev.config().chips_per_chain);
    for addr in asic::chip_addresses(dev.config().chips_per_chain).take(chips) {
        match dev.read_register(chain, Target::Chip(addr), asic::CHIP_ADDRESS) {
            Ok(word) => println!("  chip {addr:3}  id word {word:#010x}"),
            Err(e) if e.is_timeout() => println!("  chip {addr:3}  no reply"),
            Err(e) => return Err(e.into()),
        }
    }
    println!("Address interval {interval}, nonce FIFO {}, CRC errors {}", dev.nonce_count()?, dev.crc_error_count()?);
    Ok(())
}

fn cmd_pattern<W: RegisterWindow + Debug>(
    dev: &Device<W>,
    chain: ChainId,
    file: &std::path::Path,
    cores: usize,
    patterns: usize,
    timeout: Duration,
) -> Result<()> {
    let mut set = PatternSet::load(file, cores, patterns)
        .with_context(|| format!("loading {}", file.display()))?;
    require_board(dev, chain)?;
    dev.init_chain(chain)?;
    dev.send_patterns(chain, &set)?;

    println!("Collecting nonces for {} s", timeout.as_secs());
    let mut total = 0usize;
    let mut unknown = 0usize;
    let deadline = dev.clock().now() + timeout;
    while dev.clock().now() < deadline {
        for nonce in dev.drain_nonces(100)? {
            total += 1;
            if set.record(&nonce) == Correlation::Unknown {
                unknown += 1;
            }
        }
        dev.clock().sleep(Duration::from_millis(100));
    }

    if unknown > 0 {
        warn!("{chain}: {unknown} of {total} nonces matched no pattern");
    }
    let hit = set.patterns_hit();
    println!("Patterns sent:   {}", set.len());
    println!("Nonces received: {total} ({unknown} unknown)");
    #[allow(clippy::cast_precision_loss)]
    let rate = hit as f64 * 100.0 / set.len().max(1) as f64;
    println!("Patterns hit:    {hit} ({rate:.1}%)");
    if hit == 0 {
        bail!("no pattern nonces returned on {chain}");
    }
    Ok(())
}

fn require_board<W: RegisterWindow + Debug>(dev: &Device<W>, chain: ChainId) -> Result<()> {
    dev.detect_chains()?;
    if !dev.chain(chain).detected {
        bail!("no hashboard detected on {chain}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn pattern_defaults() {
        let cli = Cli::try_parse_from(["x19", "--simulate", "pattern", "1", "p.bin"]).unwrap();
        assert!(cli.simulate);
        match cli.command {
            Cmd::Pattern { chain, cores, patterns, timeout_secs, .. } => {
                assert_eq!((chain, cores, patterns, timeout_secs), (1, 80, 8, 60));
            }
            _ => panic!("expected pattern"),
        }
    }

    #[test]
    fn chain_out_of_range_is_rejected() {
        assert!(parse_chain(2).is_ok());
        assert!(parse_chain(3).is_err());
    }

    #[test]
    fn simulated_init_runs_to_ready() {
        let dev = Device::with_window(SimWindow::new(), Arc::new(VirtualClock::new()), DriverConfig::default())
            .unwrap();
        dev.initialize().unwrap();
        run(&dev, Cmd::Init { chain: 0 }).unwrap();
        assert_eq!(dev.chain_state(parse_chain(0).unwrap()), ChainState::Ready);
    }
}
