//! Gadget Lab - USB gadget lab tool
//!
//! Turns a Linux board with a USB Device Controller into a composite USB
//! peripheral: a mass storage device backed by a disk image plus a HID
//! keyboard driven from the operator's terminal.

pub mod config;
pub mod error;
pub mod hid;
pub mod msd;
pub mod otg;
pub mod session;
pub mod shell;
pub mod writer;

pub use error::{AppError, Result};
