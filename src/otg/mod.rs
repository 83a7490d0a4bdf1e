//! OTG USB Gadget management
//!
//! Builds a single composite gadget exposing:
//! - HID boot keyboard (`hid.keyboard`, /dev/hidg0)
//! - MSD single-LUN mass storage (`mass_storage.0`)
//!
//! Architecture:
//! ```text
//! OtgGadgetManager (gadget lifecycle, GadgetState)
//!     ├── HidFunction (keyboard)
//!     └── MsdFunction (mass storage, lun.0)
//! ```
//!
//! Only one gadget instance exists per machine: ConfigFS has no locking for
//! concurrent writers, so every mutation goes through the one manager owned
//! by the session.

pub mod configfs;
pub mod function;
pub mod hid;
pub mod manager;
pub mod msd;
pub mod report_desc;

pub use function::GadgetFunction;
pub use hid::HidFunction;
pub use manager::{GadgetDescriptor, GadgetState, OtgGadgetManager, TeardownReport};
pub use msd::MsdFunction;
pub use report_desc::KEYBOARD;
