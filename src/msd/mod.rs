//! MSD (Mass Storage Device) module
//!
//! Exposes a selected disk image through the gadget's mass storage function.

pub mod controller;

pub use controller::MsdController;
