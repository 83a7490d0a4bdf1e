//! MSD Controller
//!
//! Binds a backing image to the gadget's mass storage LUN. All I/O on the
//! image is done by the kernel mass storage function; this controller only
//! writes the `lun.0/file` attribute.

use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::otg::OtgGadgetManager;

/// MSD Controller
#[derive(Debug, Default)]
pub struct MsdController {
    /// Image currently bound to lun.0
    binding: Option<PathBuf>,
}

impl MsdController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently bound image, as recorded by this controller
    pub fn binding(&self) -> Option<&Path> {
        self.binding.as_deref()
    }

    /// Bind an image to the LUN
    ///
    /// The gadget must be bound, and the image must exist and be readable now.
    pub fn bind_image(&mut self, gadget: &OtgGadgetManager, image: &Path) -> Result<()> {
        if !gadget.is_bound() {
            return Err(AppError::GadgetNotActive);
        }

        // Absolute, not canonical: a symlinked image is bound by the given name
        let image = std::path::absolute(image)
            .map_err(|_| AppError::ImageUnavailable(image.to_path_buf()))?;
        File::open(&image).map_err(|_| AppError::ImageUnavailable(image.clone()))?;

        gadget
            .msd_function()
            .set_lun_file(gadget.gadget_path(), &image)?;

        info!("Image bound to mass storage LUN: {}", image.display());
        self.binding = Some(image);
        Ok(())
    }

    /// Clear the LUN backing file; idempotent
    pub fn unbind(&mut self, gadget: &OtgGadgetManager) -> Result<()> {
        gadget.msd_function().clear_lun_file(gadget.gadget_path())?;
        if let Some(image) = self.binding.take() {
            debug!("Image unbound: {}", image.display());
        }
        Ok(())
    }

    /// Read the binding back from ConfigFS
    pub fn current_binding(&self, gadget: &OtgGadgetManager) -> Option<PathBuf> {
        gadget.msd_function().get_lun_file(gadget.gadget_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otg::manager::tests::Mirror;
    use std::fs;

    #[test]
    fn test_bind_requires_bound_gadget() {
        let mirror = Mirror::new();
        let image = mirror.dir.path().join("disk.img");
        fs::write(&image, b"data").unwrap();

        let gadget = OtgGadgetManager::new(&mirror.config);
        let mut msd = MsdController::new();
        let err = msd.bind_image(&gadget, &image).unwrap_err();
        assert!(matches!(err, AppError::GadgetNotActive));
        assert!(msd.binding().is_none());
    }

    #[test]
    fn test_bind_and_unbind() {
        let mirror = Mirror::new();
        let image = mirror.dir.path().join("disk.img");
        fs::write(&image, b"data").unwrap();

        let mut gadget = OtgGadgetManager::new(&mirror.config);
        gadget.activate().unwrap();

        let mut msd = MsdController::new();
        msd.bind_image(&gadget, &image).unwrap();
        let expected = std::path::absolute(&image).unwrap();
        assert_eq!(msd.binding(), Some(expected.as_path()));
        assert_eq!(msd.current_binding(&gadget), Some(expected));

        msd.unbind(&gadget).unwrap();
        assert!(msd.binding().is_none());
        assert_eq!(msd.current_binding(&gadget), None);
        assert_eq!(mirror.read("functions/mass_storage.0/lun.0/file"), "\n");

        // Idempotent
        msd.unbind(&gadget).unwrap();
    }

    #[test]
    fn test_missing_image_is_unavailable() {
        let mirror = Mirror::new();
        let mut gadget = OtgGadgetManager::new(&mirror.config);
        gadget.activate().unwrap();

        let mut msd = MsdController::new();
        let err = msd
            .bind_image(&gadget, &mirror.dir.path().join("gone.img"))
            .unwrap_err();
        assert!(matches!(err, AppError::ImageUnavailable(_)));
        assert_eq!(msd.current_binding(&gadget), None);
    }

    #[test]
    fn test_symlinked_image_bound_by_link_path() {
        let mirror = Mirror::new();
        let target = mirror.dir.path().join("ubuntu-24.04.iso");
        fs::write(&target, b"data").unwrap();
        let link = mirror.dir.path().join("disk.img");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let mut gadget = OtgGadgetManager::new(&mirror.config);
        gadget.activate().unwrap();

        let mut msd = MsdController::new();
        msd.bind_image(&gadget, &link).unwrap();
        assert_eq!(msd.current_binding(&gadget), Some(link.clone()));
        assert_eq!(msd.binding(), Some(link.as_path()));
    }
}
