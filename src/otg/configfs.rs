//! ConfigFS file operations for USB Gadget

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::error::{AppError, Result};

/// ConfigFS base path for USB gadgets
pub const CONFIGFS_PATH: &str = "/sys/kernel/config/usb_gadget";

/// Directory listing USB Device Controllers
pub const UDC_CLASS_PATH: &str = "/sys/class/udc";

/// Default gadget name
pub const DEFAULT_GADGET_NAME: &str = "g1";

/// USB Vendor ID (Pine64) - default value
pub const DEFAULT_USB_VENDOR_ID: u16 = 0x1f3a;

/// USB Product ID (generic device) - default value
pub const DEFAULT_USB_PRODUCT_ID: u16 = 0x1001;

/// USB device version - default value
pub const DEFAULT_USB_BCD_DEVICE: u16 = 0x0100;

/// USB spec version (USB 2.0)
pub const USB_BCD_USB: u16 = 0x0200;

/// String descriptor language (en-US)
pub const LANG_EN_US: &str = "0x409";

/// Check if ConfigFS is available
pub fn is_configfs_available(configfs_path: &Path) -> bool {
    configfs_path.exists()
}

/// List available UDCs (USB Device Controllers), sorted by name
pub fn list_udcs(udc_class_path: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(udc_class_path) else {
        return Vec::new();
    };

    let mut udcs: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    udcs.sort();
    udcs
}

/// Find the first available UDC
pub fn find_udc(udc_class_path: &Path) -> Option<String> {
    list_udcs(udc_class_path).into_iter().next()
}

/// Write string content to a ConfigFS attribute
///
/// ConfigFS attributes take the value from a single write() call, so the
/// complete buffer (including the trailing newline) is built up front.
/// An empty value is written as a bare newline, which the kernel treats as
/// "clear" for UDC and lun file attributes.
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    // Some special files reject O_TRUNC; fall back to a plain O_WRONLY open,
    // then to create for regular files.
    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .or_else(|_| OpenOptions::new().write(true).open(path))
        .or_else(|e| {
            if path.exists() {
                Err(e)
            } else {
                File::create(path)
            }
        })
        .map_err(|e| AppError::configfs("open", path, e))?;

    let data: std::borrow::Cow<[u8]> = if content.ends_with('\n') {
        content.as_bytes().into()
    } else {
        let mut buf = content.as_bytes().to_vec();
        buf.push(b'\n');
        buf.into()
    };

    file.write_all(&data)
        .map_err(|e| AppError::configfs("write to", path, e))?;

    file.flush()
        .map_err(|e| AppError::configfs("flush", path, e))?;

    Ok(())
}

/// Write binary content to a file
pub fn write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| AppError::configfs("create", path, e))?;

    file.write_all(data)
        .map_err(|e| AppError::configfs("write to", path, e))?;

    Ok(())
}

/// Read string content from a file
pub fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| AppError::configfs("read", path, e))
}

/// Create directory if not exists
pub fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| AppError::configfs("create directory", path, e))
}

/// Remove directory
pub fn remove_dir(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir(path).map_err(|e| AppError::configfs("remove directory", path, e))?;
    }
    Ok(())
}

/// Remove symlink or file
pub fn remove_file(path: &Path) -> Result<()> {
    if path.symlink_metadata().is_ok() {
        fs::remove_file(path).map_err(|e| AppError::configfs("remove", path, e))?;
    }
    Ok(())
}

/// Create symlink
pub fn create_symlink(src: &Path, dest: &Path) -> Result<()> {
    std::os::unix::fs::symlink(src, dest).map_err(|e| {
        AppError::Configuration(format!(
            "Failed to create symlink {} -> {}: {}",
            dest.display(),
            src.display(),
            e
        ))
    })
}

/// Change file mode bits (e.g. 0o666 on a device node)
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| AppError::configfs("chmod", path, e))
}

/// List immediate subdirectories of `path` (symlinks excluded), sorted
pub fn subdirs(path: &Path) -> Vec<std::path::PathBuf> {
    let Ok(entries) = fs::read_dir(path) else {
        return Vec::new();
    };

    let mut dirs: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs
}

/// List symlinks directly under `path`
pub fn symlinks(path: &Path) -> Vec<std::path::PathBuf> {
    let Ok(entries) = fs::read_dir(path) else {
        return Vec::new();
    };

    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_symlink()).unwrap_or(false))
        .map(|e| e.path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_file_appends_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idVendor");
        write_file(&path, "0x1f3a").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0x1f3a\n");
        assert_eq!(read_file(&path).unwrap(), "0x1f3a");

        write_file(&path, "").unwrap();
        assert_eq!(read_file(&path).unwrap(), "");
    }

    #[test]
    fn test_find_udc_sorted_and_missing() {
        let dir = tempdir().unwrap();
        assert_eq!(find_udc(&dir.path().join("absent")), None);

        create_dir(&dir.path().join("musb-hdrc.2.auto")).unwrap();
        create_dir(&dir.path().join("fe980000.usb")).unwrap();
        assert_eq!(find_udc(dir.path()).as_deref(), Some("fe980000.usb"));
        assert_eq!(list_udcs(dir.path()).len(), 2);
    }

    #[test]
    fn test_symlinks_and_subdirs() {
        let dir = tempdir().unwrap();
        let func = dir.path().join("functions/hid.keyboard");
        let config = dir.path().join("configs/c.1");
        create_dir(&func).unwrap();
        create_dir(&config).unwrap();
        create_symlink(&func, &config.join("hid.keyboard")).unwrap();

        assert_eq!(symlinks(&config), vec![config.join("hid.keyboard")]);
        assert!(subdirs(&config).is_empty());

        remove_file(&config.join("hid.keyboard")).unwrap();
        assert!(symlinks(&config).is_empty());
        // Removing a missing entry is not an error
        remove_file(&config.join("hid.keyboard")).unwrap();
    }
}
