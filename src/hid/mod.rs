//! HID keyboard module
//!
//! Turns operator keystrokes into USB HID boot keyboard reports and writes
//! them to the gadget's HID character device.
//!
//! Architecture:
//! ```text
//! Terminal --> KeySource --> keymap::encode --> KeyStroke --> /dev/hidg0 --> Target PC
//!                  |                                            |
//!                  +---------- hid-capture worker thread -------+
//! ```

pub mod keymap;
pub mod transport;
pub mod types;

pub use keymap::{encode, encode_byte};
pub use transport::{CaptureExit, CaptureSummary, FdSource, HidTransport, Input, KeySource};
pub use types::{modifiers, KeyStroke, KeyboardReport};
