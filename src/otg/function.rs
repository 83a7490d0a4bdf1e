//! USB Gadget Function trait definition

use std::path::{Path, PathBuf};

use super::configfs::{create_symlink, remove_dir, remove_file};
use crate::error::Result;

/// USB Gadget Function trait
pub trait GadgetFunction: Send + Sync {
    /// Get function directory name (e.g., "hid.keyboard", "mass_storage.0")
    fn name(&self) -> &str;

    /// Create function directory and write its attributes in ConfigFS
    fn create(&self, gadget_path: &Path) -> Result<()>;

    /// Get function path in gadget
    fn function_path(&self, gadget_path: &Path) -> PathBuf {
        gadget_path.join("functions").join(self.name())
    }

    /// Link function to configuration
    fn link(&self, config_path: &Path, gadget_path: &Path) -> Result<()> {
        let link_path = config_path.join(self.name());
        if link_path.symlink_metadata().is_err() {
            create_symlink(&self.function_path(gadget_path), &link_path)?;
        }
        Ok(())
    }

    /// Unlink function from configuration
    fn unlink(&self, config_path: &Path) -> Result<()> {
        remove_file(&config_path.join(self.name()))
    }

    /// Remove the function directory
    fn cleanup(&self, gadget_path: &Path) -> Result<()> {
        remove_dir(&self.function_path(gadget_path))
    }
}
