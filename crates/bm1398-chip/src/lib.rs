//! Silicon model for the BM1398 hash chain on the Antminer S19 control board.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the silicon and its FPGA bridge: register addresses, the
//! logical register map, command frame encoding, CRC5, PLL and baud math,
//! and the work/nonce wire formats.
//!
//! Values were established from bus captures of a stock hashboard and the
//! factory test tooling.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | FPGA window layout, 110-entry logical register map, bit definitions |
//! | [`asic`] | BM1398 register addresses, init words, chain addressing |
//! | [`crc`] | CRC5 over command frames |
//! | [`cmd`] | Command frame construction and decoding |
//! | [`pll`] | PLL0 encoding, VCO rules, UART baud divisors |
//! | [`work`] | 148-byte work packets, nonce FIFO entries |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod asic;
pub mod cmd;
pub mod crc;
pub mod pll;
pub mod regs;
pub mod work;

pub use asic::ChainId;
pub use cmd::{Frame, Target};
pub use pll::{BaudConfig, PllParams};
pub use work::{NonceResponse, WorkPacket};
