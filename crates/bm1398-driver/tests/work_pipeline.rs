//! Work submission, nonce collection and pattern correlation
//!
//! The simulated FPGA does not hash, so tests play the chip's part by
//! pushing nonce entries into its FIFO.

use bm1398_chip::work::expected_work_id;
use bm1398_chip::WorkPacket;
use bm1398_driver::pattern::{PATTERN_ENTRY_LEN, PATTERN_SLOTS_PER_CORE};
use bm1398_driver::prelude::*;
use bm1398_driver::{SimWindow, VirtualClock};
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn ready_chain(n: u8) -> (Arc<Device<SimWindow>>, ChainId) {
    let dev = Device::with_window(SimWindow::new(), Arc::new(VirtualClock::new()), DriverConfig::default())
        .expect("sim window");
    dev.initialize().expect("initialize");
    let chain = ChainId::new(n).expect("chain id");
    dev.init_chain(chain).expect("bring-up");
    (Arc::new(dev), chain)
}

/// Pattern file where core `c`, slot `s` expects nonce `0xA000_0000 | c << 8 | s`.
fn pattern_file(cores: usize) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    for c in 0..cores {
        for s in 0..PATTERN_SLOTS_PER_CORE {
            let mut rec = [0u8; PATTERN_ENTRY_LEN];
            rec[0x0F..0x1B].copy_from_slice(&[c as u8; 12]);
            rec[0x1B..0x3B].copy_from_slice(&[s as u8; 32]);
            let nonce = 0xA000_0000 | ((c as u32) << 8) | s as u32;
            rec[0x58..0x5C].copy_from_slice(&nonce.to_le_bytes());
            file.write_all(&rec).expect("write record");
        }
    }
    file
}

#[test]
fn send_work_writes_one_packet() {
    let (dev, chain) = ready_chain(0);
    let tail = [0x5A; 12];
    let mids = [[1; 32], [2; 32], [3; 32], [4; 32]];
    dev.send_work(chain, 0x20, &tail, &mids).unwrap();

    let words = dev.window().work_fifo();
    assert_eq!(words.len(), 37);
    let words: [u32; 37] = words.try_into().unwrap();
    let packet = WorkPacket::from_words(&words).unwrap();
    assert_eq!(packet.chain, 0);
    assert_eq!(packet.work_id, 0x20);
    assert_eq!(packet.header_tail, tail);
    assert_eq!(packet.midstates, mids);
}

#[test]
fn pattern_nonce_is_decoded_and_matched() {
    let (dev, chain) = ready_chain(1);
    let file = pattern_file(4);
    let mut set = PatternSet::load(file.path(), 4, 2).unwrap();
    dev.send_patterns(chain, &set).unwrap();
    assert_eq!(dev.window().work_fifo().len(), 8 * 37);

    // Core 3, slot 1 is pattern 7.
    let index = 7;
    let expected = set.entries()[index].expected_nonce();
    dev.window().push_nonce(NonceResponse {
        nonce: expected,
        chain_id: 1,
        chip_id: 0x10,
        core_id: 3,
        work_id: expected_work_id(7),
    });

    assert_eq!(dev.wait_for_nonces(chain, Duration::from_secs(1)).unwrap(), 1);
    let got = dev.drain_nonces(16).unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!((got[0].chain_id, got[0].chip_id, got[0].core_id), (1, 0x10, 3));
    assert_eq!(
        set.record(&got[0]),
        Correlation::Match { index, work_id_matched: true }
    );
    assert_eq!(set.position(index), (3, 1));
    assert_eq!(set.patterns_hit(), 1);
}

#[test]
fn feeder_and_drainer_run_concurrently() {
    let (dev, chain) = ready_chain(0);
    for n in 0..50 {
        dev.window()
            .push_nonce(NonceResponse::decode(n, 0x0001_0200 | (n & 0xFF)));
    }

    let feeder = {
        let dev = Arc::clone(&dev);
        thread::spawn(move || {
            for id in 0..20 {
                dev.send_work(chain, id, &[0; 12], &[[0; 32]; 4])?;
            }
            Ok::<_, DriverError>(())
        })
    };
    let drainer = {
        let dev = Arc::clone(&dev);
        thread::spawn(move || {
            let mut seen = Vec::new();
            while seen.len() < 50 {
                seen.extend(dev.drain_nonces(8)?);
            }
            Ok::<_, DriverError>(seen)
        })
    };

    feeder.join().unwrap().unwrap();
    let seen = drainer.join().unwrap().unwrap();
    assert_eq!(dev.window().work_fifo().len(), 20 * 37);
    let nonces: Vec<u32> = seen.iter().map(|r| r.nonce).collect();
    assert_eq!(nonces, (0..50).collect::<Vec<_>>());
    assert!(seen.iter().all(|r| r.chip_id == 1 && r.core_id == 2));
}

#[test]
#[ignore] // Requires an S19 control board, a powered hashboard and /tmp/BM1398-pattern
fn hardware_pattern_test() {
    let dev = Device::open(DriverConfig::from_env()).expect("open FPGA device");
    let chain = ChainId::new(0).expect("chain id");
    let mut set = PatternSet::load("/tmp/BM1398-pattern/btc-asic-000.bin", 80, 8).expect("patterns");
    dev.init_chain(chain).expect("bring-up");
    dev.send_patterns(chain, &set).expect("send");

    let deadline = dev.clock().now() + Duration::from_secs(60);
    while dev.clock().now() < deadline {
        for nonce in dev.drain_nonces(100).expect("drain") {
            set.record(&nonce);
        }
        dev.clock().sleep(Duration::from_millis(100));
    }
    println!("{} of {} patterns returned", set.patterns_hit(), set.len());
    assert!(set.patterns_hit() > 0);
}
