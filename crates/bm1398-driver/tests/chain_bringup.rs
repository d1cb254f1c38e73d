//! Chain bring-up against the simulated FPGA
//!
//! Runs the full reset and configuration sequence with a virtual clock and
//! checks what reached the chips.

use bm1398_chip::asic;
use bm1398_driver::prelude::*;
use bm1398_driver::{SimWindow, VirtualClock};
use std::sync::Arc;
use std::time::Duration;

fn device() -> Device<SimWindow> {
    let dev = Device::with_window(SimWindow::new(), Arc::new(VirtualClock::new()), DriverConfig::default())
        .expect("sim window");
    dev.initialize().expect("initialize");
    dev
}

fn chain(n: u8) -> ChainId {
    ChainId::new(n).expect("chain id")
}

#[test]
fn full_bring_up_reaches_ready() {
    let dev = device();
    let start = dev.clock().now();
    dev.init_chain(chain(0)).expect("bring-up");

    assert_eq!(dev.chain_state(chain(0)), ChainState::Ready);
    assert_eq!(dev.clock().now() - start, Duration::from_millis(802 + 110 + 4410));

    let sim = dev.window();
    assert_eq!(sim.chip_register(0, 0, asic::PLL0_PARAMETER), Some(0x4054_0100));
    assert_eq!(sim.chip_register(0, 0, asic::CORE_PARAM), Some(0x48));
    assert_eq!(sim.chip_register(0, 0, asic::DIODE_MUX), Some(3));
    assert_eq!(
        sim.chip_register(0, 0, asic::CORE_REGISTER_CONTROL),
        Some(asic::core_config::NONCE_OVERFLOW_DISABLED)
    );
    assert_eq!(sim.chip_register(0, 0, asic::PLL3_PARAMETER), Some(0xC070_0111));
}

#[test]
fn ticket_mask_reads_back_after_stage_one() {
    let dev = device();
    let mut ctl = ChainController::new(&dev, chain(1));
    ctl.hardware_reset().unwrap();
    ctl.soft_reset().unwrap();
    assert_eq!(ctl.state(), ChainState::SoftReset);

    let mask = dev
        .read_register(chain(1), Target::Chip(0), asic::TICKET_MASK)
        .unwrap();
    assert_eq!(mask, 0xFFFF_FFFF);
}

#[test]
fn enumeration_addresses_every_chip() {
    let dev = device();
    dev.init_chain(chain(2)).unwrap();

    let addrs = dev.window().addresses(2);
    assert_eq!(addrs.len(), 114);
    assert_eq!(addrs.first(), Some(&0));
    assert_eq!(addrs.last(), Some(&226));
    assert!(addrs.windows(2).all(|w| w[1] - w[0] == 2));
}

#[test]
fn small_chain_uses_wider_interval() {
    let dev = Device::with_window(
        SimWindow::new(),
        Arc::new(VirtualClock::new()),
        DriverConfig::default().with_chips_per_chain(3),
    )
    .unwrap();
    dev.initialize().unwrap();
    dev.init_chain(chain(0)).unwrap();
    assert_eq!(dev.window().addresses(0), vec![0, 85, 170]);
}

#[test]
fn unvalidated_frequency_falls_back() {
    let dev = Device::with_window(
        SimWindow::new(),
        Arc::new(VirtualClock::new()),
        DriverConfig::default().with_frequency(600),
    )
    .unwrap();
    dev.initialize().unwrap();
    dev.init_chain(chain(0)).unwrap();
    assert_eq!(dev.window().chip_register(0, 0, asic::PLL0_PARAMETER), Some(0x4054_0100));
}

#[test]
fn stale_nonces_are_flushed_during_configure() {
    let dev = device();
    dev.window()
        .push_nonce(NonceResponse::decode(0x1111_1111, 0x0000_0000));
    dev.init_chain(chain(0)).unwrap();
    assert_eq!(dev.nonce_count().unwrap(), 0);
}

#[test]
fn failed_bring_up_can_be_retried() {
    let dev = device();
    dev.window().stall_command_bus(true);
    let err = dev.init_chain(chain(0)).unwrap_err();
    assert!(matches!(
        err,
        DriverError::ChainInitFailure { chain: 0, stage: ChainState::SoftReset, .. }
    ));
    assert_eq!(dev.chain_state(chain(0)), ChainState::Uninitialized);

    dev.window().stall_command_bus(false);
    dev.init_chain(chain(0)).unwrap();
    assert_eq!(dev.chain_state(chain(0)), ChainState::Ready);
}

#[test]
fn bring_up_needs_initialized_device() {
    let dev = Device::with_window(SimWindow::new(), Arc::new(VirtualClock::new()), DriverConfig::default())
        .unwrap();
    let err = dev.init_chain(chain(0)).unwrap_err();
    assert!(matches!(
        err,
        DriverError::ChainInitFailure { stage: ChainState::HardwareReset, .. }
    ));
    assert!(dev.window().writes().is_empty());
}

#[test]
#[ignore] // Requires an S19 control board with a powered hashboard on chain 0
fn hardware_bring_up() {
    let dev = Device::open(DriverConfig::from_env()).expect("open FPGA device");
    let detected = dev.detect_chains().expect("detect");
    assert_ne!(detected & 1, 0, "no board on chain 0");
    dev.init_chain(chain(0)).expect("bring-up");
    let id = dev
        .read_register(chain(0), Target::Chip(0), asic::CHIP_ADDRESS)
        .expect("chip id");
    println!("Chip 0 id word {id:#010x}, CRC errors {}", dev.crc_error_count().unwrap());
}
