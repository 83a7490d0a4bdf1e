//! MSD (Mass Storage Device) Function implementation for USB Gadget

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::configfs::{create_dir, read_file, remove_dir, write_file};
use super::function::GadgetFunction;
use crate::error::{AppError, Result};

/// Only LUN 0 is exposed
pub const LUN: u8 = 0;

/// MSD Function for USB Gadget (single LUN)
#[derive(Debug, Clone)]
pub struct MsdFunction {
    name: String,
}

impl MsdFunction {
    /// Create a new MSD function
    pub fn new() -> Self {
        Self {
            name: "mass_storage.0".to_string(),
        }
    }

    /// Get LUN path
    pub fn lun_path(&self, gadget_path: &Path) -> PathBuf {
        self.function_path(gadget_path).join(format!("lun.{}", LUN))
    }

    /// Write the backing file path into the LUN
    ///
    /// The write retries on EBUSY: the host may still hold the previous
    /// medium for a short while after it was ejected.
    pub fn set_lun_file(&self, gadget_path: &Path, file: &Path) -> Result<()> {
        let file_attr = self.lun_path(gadget_path).join("file");
        let value = file.to_string_lossy();

        let mut attempt = 0u32;
        loop {
            match write_file(&file_attr, value.as_ref()) {
                Ok(()) => {
                    info!("LUN {} configured with file: {}", LUN, file.display());
                    return Ok(());
                }
                Err(e) if is_busy(&e) && attempt < 4 => {
                    warn!("LUN {} file write busy, retrying (attempt {}/5)", LUN, attempt + 1);
                    // Exponential backoff: 50, 100, 200, 400ms
                    std::thread::sleep(std::time::Duration::from_millis(50 << attempt));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Clear the LUN backing file
    pub fn clear_lun_file(&self, gadget_path: &Path) -> Result<()> {
        let lun_path = self.lun_path(gadget_path);
        if lun_path.exists() {
            write_file(&lun_path.join("file"), "")?;
            info!("LUN {} disconnected", LUN);
        }
        Ok(())
    }

    /// Get current LUN file path
    pub fn get_lun_file(&self, gadget_path: &Path) -> Option<PathBuf> {
        read_file(&self.lun_path(gadget_path).join("file"))
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }
}

impl Default for MsdFunction {
    fn default() -> Self {
        Self::new()
    }
}

fn is_busy(e: &AppError) -> bool {
    let msg = e.to_string();
    msg.contains("Device or resource busy") || msg.contains("os error 16")
}

impl GadgetFunction for MsdFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, gadget_path: &Path) -> Result<()> {
        let func_path = self.function_path(gadget_path);
        create_dir(&func_path)?;

        // The kernel creates lun.0 with the function; mirrors need it made
        let lun_path = self.lun_path(gadget_path);
        if !lun_path.exists() {
            create_dir(&lun_path)?;
        }

        // Not every UDC driver exposes the attribute
        if let Err(e) = write_file(&lun_path.join("removable"), "1") {
            warn!("Failed to mark LUN {} removable: {}", LUN, e);
        }

        debug!("Created MSD function: {}", self.name());
        Ok(())
    }

    fn cleanup(&self, gadget_path: &Path) -> Result<()> {
        if let Err(e) = self.clear_lun_file(gadget_path) {
            warn!("Failed to clear LUN {} before removal: {}", LUN, e);
        }
        remove_dir(&self.function_path(gadget_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_msd_function_name() {
        let msd = MsdFunction::new();
        assert_eq!(msd.name(), "mass_storage.0");
        assert_eq!(
            msd.lun_path(Path::new("/g1")),
            PathBuf::from("/g1/functions/mass_storage.0/lun.0")
        );
    }

    #[test]
    fn test_lun_file_roundtrip() {
        let dir = tempdir().unwrap();
        let msd = MsdFunction::new();
        msd.create(dir.path()).unwrap();
        assert_eq!(msd.get_lun_file(dir.path()), None);

        msd.set_lun_file(dir.path(), Path::new("/images/disk.img")).unwrap();
        assert_eq!(
            msd.get_lun_file(dir.path()),
            Some(PathBuf::from("/images/disk.img"))
        );

        msd.clear_lun_file(dir.path()).unwrap();
        assert_eq!(msd.get_lun_file(dir.path()), None);
    }

    #[test]
    fn test_clear_without_function_is_noop() {
        let dir = tempdir().unwrap();
        MsdFunction::new().clear_lun_file(dir.path()).unwrap();
    }

    #[test]
    fn test_create_tolerates_missing_removable_attribute() {
        let dir = tempdir().unwrap();
        let msd = MsdFunction::new();
        // A directory in place of the attribute makes the write fail
        std::fs::create_dir_all(msd.lun_path(dir.path()).join("removable")).unwrap();

        msd.create(dir.path()).unwrap();
        msd.set_lun_file(dir.path(), Path::new("/srv/disk.img")).unwrap();
        assert_eq!(
            msd.get_lun_file(dir.path()),
            Some(PathBuf::from("/srv/disk.img"))
        );
    }
}
