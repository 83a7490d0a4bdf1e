//! OTG Gadget Manager - composite HID + MSD gadget lifecycle

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::configfs::{
    create_dir, find_udc, is_configfs_available, read_file, remove_dir, remove_file, set_mode,
    subdirs, symlinks, write_file, LANG_EN_US,
};
use super::function::GadgetFunction;
use super::hid::HidFunction;
use super::msd::MsdFunction;
use crate::config::GadgetConfig;
use crate::error::{AppError, Result};

/// Mode applied to the HID device node so non-root users can write reports
const HID_DEVICE_MODE: u32 = 0o666;

/// Gadget lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GadgetState {
    /// No gadget object exists in ConfigFS
    Absent,
    /// Directory tree is being built
    Configuring,
    /// Bound to a UDC and live on the bus
    Bound,
    /// Being unbound and removed
    TearingDown,
}

impl GadgetState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: GadgetState) -> bool {
        use GadgetState::*;
        matches!(
            (self, next),
            (Absent, Configuring)
                | (Configuring, Bound)
                | (Configuring, TearingDown)
                | (Bound, TearingDown)
                | (TearingDown, Absent)
        )
    }
}

impl fmt::Display for GadgetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GadgetState::Absent => "absent",
            GadgetState::Configuring => "configuring",
            GadgetState::Bound => "bound",
            GadgetState::TearingDown => "tearing down",
        };
        f.write_str(s)
    }
}

/// USB Gadget device descriptor configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GadgetDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub bcd_usb: u16,
    pub serial_number: String,
    pub manufacturer: String,
    pub product: String,
}

impl From<&GadgetConfig> for GadgetDescriptor {
    fn from(config: &GadgetConfig) -> Self {
        Self {
            vendor_id: config.vendor_id,
            product_id: config.product_id,
            bcd_device: config.bcd_device,
            bcd_usb: config.bcd_usb,
            serial_number: config.serial_number.clone(),
            manufacturer: config.manufacturer.clone(),
            product: config.product.clone(),
        }
    }
}

/// Outcome of a best-effort teardown
///
/// Teardown never fails its caller; steps that could not be completed are
/// collected here so they can be logged or shown.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Whether a gadget directory existed when teardown started
    pub existed: bool,
    /// Steps that failed, with their error
    pub failures: Vec<String>,
}

impl TeardownReport {
    /// True if every step succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, step: &str, e: AppError) {
        warn!("Teardown step '{}' failed: {}", step, e);
        self.failures.push(format!("{}: {}", step, e));
    }
}

/// OTG Gadget Manager - owns the single composite gadget
pub struct OtgGadgetManager {
    /// Gadget name
    gadget_name: String,
    /// ConfigFS usb_gadget root
    configfs_path: PathBuf,
    /// Gadget path in ConfigFS
    gadget_path: PathBuf,
    /// Configuration path
    config_path: PathBuf,
    /// Directory listing UDCs
    udc_class_path: PathBuf,
    /// HID character device created on bind
    hid_device: PathBuf,
    /// Kernel module sysfs directory (`/sys/module`)
    module_sys_path: PathBuf,
    /// Legacy gadget drivers removed before building the gadget
    unload_modules: Vec<String>,
    /// Modules loaded before building the gadget
    load_modules: Vec<String>,
    /// Maximum wait for the HID device node
    device_wait: Duration,
    /// Device descriptor
    descriptor: GadgetDescriptor,
    hid: HidFunction,
    msd: MsdFunction,
    /// Lifecycle state
    state: GadgetState,
    /// Bound UDC name
    bound_udc: Option<String>,
}

impl OtgGadgetManager {
    /// Create a manager from gadget configuration; no ConfigFS access happens here
    pub fn new(config: &GadgetConfig) -> Self {
        let gadget_path = config.configfs_path.join(&config.name);
        let config_path = gadget_path.join("configs/c.1");

        Self {
            gadget_name: config.name.clone(),
            configfs_path: config.configfs_path.clone(),
            gadget_path,
            config_path,
            udc_class_path: config.udc_class_path.clone(),
            hid_device: config.hid_device.clone(),
            module_sys_path: config.module_sys_path.clone(),
            unload_modules: config.unload_modules.clone(),
            load_modules: config.load_modules.clone(),
            device_wait: Duration::from_millis(config.device_wait_ms),
            descriptor: GadgetDescriptor::from(config),
            hid: HidFunction::keyboard(),
            msd: MsdFunction::new(),
            state: GadgetState::Absent,
            bound_udc: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> GadgetState {
        self.state
    }

    /// Check if the gadget is live on a UDC
    pub fn is_bound(&self) -> bool {
        self.state == GadgetState::Bound
    }

    /// Check if the gadget directory exists
    pub fn gadget_exists(&self) -> bool {
        self.gadget_path.exists()
    }

    pub fn gadget_path(&self) -> &Path {
        &self.gadget_path
    }

    pub fn hid_device_path(&self) -> &Path {
        &self.hid_device
    }

    pub fn msd_function(&self) -> &MsdFunction {
        &self.msd
    }

    pub fn bound_udc(&self) -> Option<&str> {
        self.bound_udc.as_deref()
    }

    fn transition(&mut self, next: GadgetState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(AppError::InvalidState(format!(
                "gadget cannot go from {} to {}",
                self.state, next
            )));
        }
        debug!("Gadget {}: {} -> {}", self.gadget_name, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Build, link and bind the gadget
    ///
    /// Any existing gadget with the same name is torn down first. On
    /// failure the partial tree is torn down again before the error is
    /// returned, leaving the manager in `Absent`.
    pub fn activate(&mut self) -> Result<()> {
        info!("Activating USB gadget: {}", self.gadget_name);

        self.reset();
        self.transition(GadgetState::Configuring)?;

        match self.configure() {
            Ok(udc) => {
                self.bound_udc = Some(udc);
                self.transition(GadgetState::Bound)?;
                info!(
                    "USB gadget {} bound to {}",
                    self.gadget_name,
                    self.bound_udc.as_deref().unwrap_or_default()
                );
                Ok(())
            }
            Err(e) => {
                error!("USB gadget activation failed: {}", e);
                let report = self.teardown();
                if !report.is_clean() {
                    warn!(
                        "Cleanup after failed activation left {} step(s) incomplete",
                        report.failures.len()
                    );
                }
                Err(e)
            }
        }
    }

    /// Run each activation step in order; returns the bound UDC name
    fn configure(&self) -> Result<String> {
        if !is_configfs_available(&self.configfs_path) {
            return Err(AppError::Configuration(format!(
                "ConfigFS not available at {}. Is libcomposite loaded?",
                self.configfs_path.display()
            )));
        }

        step("create gadget directory", create_dir(&self.gadget_path))?;
        step("set device descriptors", self.set_device_descriptors())?;
        step("create strings", self.create_strings())?;
        step("create HID function", self.hid.create(&self.gadget_path))?;
        step("create mass storage function", self.msd.create(&self.gadget_path))?;
        step("create configuration", self.create_configuration())?;
        step(
            "link functions",
            self.hid
                .link(&self.config_path, &self.gadget_path)
                .and_then(|_| self.msd.link(&self.config_path, &self.gadget_path)),
        )?;

        let udc = find_udc(&self.udc_class_path).ok_or(AppError::NoUdcAvailable)?;
        info!("Binding gadget to UDC: {}", udc);
        step("bind UDC", write_file(&self.gadget_path.join("UDC"), &udc))?;

        if !wait_for_device(&self.hid_device, self.device_wait) {
            return Err(AppError::Configuration(format!(
                "HID device {} did not appear within {} ms",
                self.hid_device.display(),
                self.device_wait.as_millis()
            )));
        }
        step(
            "relax HID device permissions",
            set_mode(&self.hid_device, HID_DEVICE_MODE),
        )?;

        Ok(udc)
    }

    /// Set USB device descriptors
    fn set_device_descriptors(&self) -> Result<()> {
        let d = &self.descriptor;
        write_file(&self.gadget_path.join("idVendor"), &format!("0x{:04x}", d.vendor_id))?;
        write_file(&self.gadget_path.join("idProduct"), &format!("0x{:04x}", d.product_id))?;
        write_file(&self.gadget_path.join("bcdDevice"), &format!("0x{:04x}", d.bcd_device))?;
        write_file(&self.gadget_path.join("bcdUSB"), &format!("0x{:04x}", d.bcd_usb))?;
        debug!("Set device descriptors");
        Ok(())
    }

    /// Create USB strings
    fn create_strings(&self) -> Result<()> {
        let strings_path = self.gadget_path.join("strings").join(LANG_EN_US);
        create_dir(&strings_path)?;

        write_file(&strings_path.join("serialnumber"), &self.descriptor.serial_number)?;
        write_file(&strings_path.join("manufacturer"), &self.descriptor.manufacturer)?;
        write_file(&strings_path.join("product"), &self.descriptor.product)?;
        debug!("Created USB strings");
        Ok(())
    }

    /// Create configuration
    fn create_configuration(&self) -> Result<()> {
        create_dir(&self.config_path)?;

        let strings_path = self.config_path.join("strings").join(LANG_EN_US);
        create_dir(&strings_path)?;
        write_file(&strings_path.join("configuration"), "Config 1: HID + Mass Storage")?;

        // Set max power (500mA)
        write_file(&self.config_path.join("MaxPower"), "500")?;

        debug!("Created configuration c.1");
        Ok(())
    }

    /// Remove any stale gadget and get the kernel modules into shape
    ///
    /// Runs teardown, then unloads legacy gadget drivers that would hold
    /// the UDC and loads the composite framework. Module steps are best
    /// effort and recorded in the returned report.
    pub fn reset(&mut self) -> TeardownReport {
        let mut report = self.teardown();
        self.prepare_modules(&mut report);
        report
    }

    fn prepare_modules(&self, report: &mut TeardownReport) {
        for module in &self.unload_modules {
            if !self.module_sys_path.join(module).exists() {
                continue;
            }
            info!("Unloading legacy gadget module: {}", module);
            if let Err(e) = run_module_tool("rmmod", module) {
                report.record("unload module", e);
            }
        }

        for module in &self.load_modules {
            if self.module_sys_path.join(module).exists() {
                debug!("Module {} already loaded", module);
                continue;
            }
            info!("Loading kernel module: {}", module);
            if let Err(e) = run_module_tool("modprobe", module) {
                report.record("load module", e);
            }
        }
    }

    /// Unbind and remove the gadget, best effort
    ///
    /// Safe to call in any state, including when no gadget exists. Symlinks
    /// are removed before the directories they live in, and directories
    /// deepest first, as ConfigFS requires. Failed steps are reported, not
    /// returned as errors; the state always ends at `Absent`.
    pub fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        if self.state != GadgetState::Absent && self.state != GadgetState::TearingDown {
            // Bound/Configuring -> TearingDown is always legal
            self.state = GadgetState::TearingDown;
        }

        if self.gadget_exists() {
            report.existed = true;
            info!("Tearing down USB gadget: {}", self.gadget_name);
            self.remove_tree(&mut report);
        }

        self.bound_udc = None;
        if self.state == GadgetState::TearingDown {
            self.state = GadgetState::Absent;
        }

        if report.existed {
            if report.is_clean() {
                info!("USB gadget teardown complete");
            } else {
                warn!(
                    "USB gadget teardown incomplete ({} step(s) failed)",
                    report.failures.len()
                );
            }
        }
        report
    }

    fn remove_tree(&self, report: &mut TeardownReport) {
        // Unbind from UDC first; an already-unbound gadget rejects the write
        let udc_attr = self.gadget_path.join("UDC");
        let bound = read_file(&udc_attr).map(|s| !s.is_empty()).unwrap_or(true);
        if bound {
            if let Err(e) = write_file(&udc_attr, "") {
                report.record("unbind UDC", e);
            }
        }

        let functions: [&dyn GadgetFunction; 2] = [&self.hid, &self.msd];
        let configs = subdirs(&self.gadget_path.join("configs"));

        for function in functions {
            if let Err(e) = function.unlink(&self.config_path) {
                report.record("unlink function", e);
            }
        }
        // Links left by other tools or an older layout
        for config in &configs {
            for link in symlinks(config) {
                if let Err(e) = remove_file(&link) {
                    report.record("remove stray function link", e);
                }
            }
        }

        for config in &configs {
            for strings in subdirs(&config.join("strings")) {
                if let Err(e) = remove_dir(&strings) {
                    report.record("remove configuration strings", e);
                }
            }
            if let Err(e) = remove_dir(config) {
                report.record("remove configuration", e);
            }
        }

        for function in functions {
            if let Err(e) = function.cleanup(&self.gadget_path) {
                report.record("remove function", e);
            }
        }
        let known: Vec<PathBuf> = functions
            .iter()
            .map(|f| f.function_path(&self.gadget_path))
            .collect();
        for function in subdirs(&self.gadget_path.join("functions")) {
            if known.contains(&function) {
                continue;
            }
            if let Err(e) = remove_dir(&function) {
                report.record("remove stray function", e);
            }
        }

        for strings in subdirs(&self.gadget_path.join("strings")) {
            if let Err(e) = remove_dir(&strings) {
                report.record("remove gadget strings", e);
            }
        }

        if let Err(e) = remove_dir(&self.gadget_path) {
            report.record("remove gadget directory", e);
        }
    }
}

impl Drop for OtgGadgetManager {
    fn drop(&mut self) {
        if self.state != GadgetState::Absent {
            let report = self.teardown();
            if !report.is_clean() {
                error!("Failed to fully clean up USB gadget on drop");
            }
        }
    }
}

/// Run `modprobe`/`rmmod` for one module
fn run_module_tool(tool: &str, module: &str) -> Result<()> {
    let output = Command::new(tool)
        .arg(module)
        .output()
        .map_err(|e| AppError::Configuration(format!("Failed to run {} {}: {}", tool, module, e)))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(AppError::Configuration(format!(
            "{} {} exited with {}: {}",
            tool,
            module,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

/// Prefix a ConfigFS error with the activation step that produced it
fn step<T>(name: &str, result: Result<T>) -> Result<T> {
    result.map_err(|e| match e {
        AppError::Configuration(msg) => AppError::Configuration(format!("{}: {}", name, msg)),
        other => other,
    })
}

/// Wait for a device node to appear
///
/// Uses exponential backoff starting from 10ms, capped at 100ms.
pub fn wait_for_device(path: &Path, timeout: Duration) -> bool {
    let start = Instant::now();
    let mut delay_ms = 10u64;
    const MAX_DELAY_MS: u64 = 100;

    loop {
        if path.exists() {
            return true;
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return false;
        }

        std::thread::sleep(Duration::from_millis(delay_ms).min(remaining));
        delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
    }
}
