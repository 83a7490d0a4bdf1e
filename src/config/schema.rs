use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::otg::configfs::{
    CONFIGFS_PATH, DEFAULT_GADGET_NAME, DEFAULT_USB_BCD_DEVICE, DEFAULT_USB_PRODUCT_ID,
    DEFAULT_USB_VENDOR_ID, UDC_CLASS_PATH, USB_BCD_USB,
};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// USB gadget (ConfigFS) settings
    pub gadget: GadgetConfig,
    /// Keyboard capture settings
    pub keyboard: KeyboardConfig,
    /// Image writer settings
    pub writer: WriterConfig,
}

/// USB gadget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GadgetConfig {
    /// ConfigFS usb_gadget root
    pub configfs_path: PathBuf,
    /// Gadget directory name
    pub name: String,
    /// Directory listing available UDCs
    pub udc_class_path: PathBuf,
    /// HID character device created by the kernel on bind
    pub hid_device: PathBuf,
    /// How long to wait for the HID device node after binding
    pub device_wait_ms: u64,
    /// Kernel module sysfs directory, used to see what is loaded
    pub module_sys_path: PathBuf,
    /// Legacy gadget drivers to unload first (they hold the UDC)
    pub unload_modules: Vec<String>,
    /// Modules to load before building the gadget
    pub load_modules: Vec<String>,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// USB device version (bcdDevice)
    pub bcd_device: u16,
    /// USB spec version (bcdUSB)
    pub bcd_usb: u16,
    pub serial_number: String,
    pub manufacturer: String,
    pub product: String,
}

impl Default for GadgetConfig {
    fn default() -> Self {
        Self {
            configfs_path: PathBuf::from(CONFIGFS_PATH),
            name: DEFAULT_GADGET_NAME.to_string(),
            udc_class_path: PathBuf::from(UDC_CLASS_PATH),
            hid_device: PathBuf::from("/dev/hidg0"),
            device_wait_ms: 2000,
            module_sys_path: PathBuf::from("/sys/module"),
            unload_modules: vec!["g_multi".to_string()],
            load_modules: vec!["libcomposite".to_string()],
            vendor_id: DEFAULT_USB_VENDOR_ID,
            product_id: DEFAULT_USB_PRODUCT_ID,
            bcd_device: DEFAULT_USB_BCD_DEVICE,
            bcd_usb: USB_BCD_USB,
            serial_number: "pinephone123456".to_string(),
            manufacturer: "Pine64".to_string(),
            product: "Pinephone Lab Tool".to_string(),
        }
    }
}

/// Keyboard capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyboardConfig {
    /// Upper bound on how long `keyboard stop` waits for the capture worker
    pub poll_interval_ms: u64,
    /// Input byte that ends the capture session (default Ctrl-])
    pub escape_byte: u8,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            escape_byte: 0x1d,
        }
    }
}

/// Image writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Path to the `dd` binary
    pub dd_path: PathBuf,
    /// Block size passed as `bs=`
    pub block_size: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            dd_path: PathBuf::from("dd"),
            block_size: "4M".to_string(),
        }
    }
}
