//! HID keyboard Function implementation for USB Gadget

use std::path::Path;
use tracing::debug;

use super::configfs::{create_dir, write_bytes, write_file};
use super::function::GadgetFunction;
use super::report_desc::KEYBOARD;
use crate::error::Result;

/// HID protocol: keyboard
pub const HID_PROTOCOL_KEYBOARD: u8 = 1;

/// HID subclass: boot interface
pub const HID_SUBCLASS_BOOT: u8 = 1;

/// Boot keyboard input report length
pub const KEYBOARD_REPORT_LENGTH: u8 = 8;

/// Boot-protocol HID keyboard function
#[derive(Debug, Clone)]
pub struct HidFunction {
    name: String,
}

impl HidFunction {
    /// Create the keyboard function
    pub fn keyboard() -> Self {
        Self {
            name: "hid.keyboard".to_string(),
        }
    }
}

impl GadgetFunction for HidFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, gadget_path: &Path) -> Result<()> {
        let func_path = self.function_path(gadget_path);
        create_dir(&func_path)?;

        write_file(&func_path.join("protocol"), &HID_PROTOCOL_KEYBOARD.to_string())?;
        write_file(&func_path.join("subclass"), &HID_SUBCLASS_BOOT.to_string())?;
        write_file(
            &func_path.join("report_length"),
            &KEYBOARD_REPORT_LENGTH.to_string(),
        )?;

        // Binary attribute: written as-is, no trailing newline
        write_bytes(&func_path.join("report_desc"), KEYBOARD)?;

        debug!(
            "Created HID function: {} at {}",
            self.name(),
            func_path.display()
        );
        Ok(())
    }
}
