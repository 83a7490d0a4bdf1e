//! Lab session state
//!
//! Single owner of the gadget, the mass storage binding and the keyboard
//! transport. Every gadget-mutating command goes through `&mut Session`, so
//! commands are serialized by construction.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::hid::{CaptureSummary, HidTransport, KeySource};
use crate::msd::MsdController;
use crate::otg::{GadgetState, OtgGadgetManager};
use crate::writer::WriteJob;

/// Decides whether privileged commands may run
pub trait Privilege: Send {
    fn is_privileged(&self) -> bool;
}

/// Privileged when running with effective uid 0
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectiveUid;

impl Privilege for EffectiveUid {
    fn is_privileged(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }
}

/// Privilege fixed at construction (development against a ConfigFS mirror)
#[derive(Debug, Clone, Copy)]
pub struct Granted(pub bool);

impl Privilege for Granted {
    fn is_privileged(&self) -> bool {
        self.0
    }
}

/// Snapshot of the session for the `status` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub selected_image: Option<PathBuf>,
    pub gadget_state: GadgetState,
    pub udc: Option<String>,
    pub keyboard_active: bool,
    pub emulating: bool,
    pub lun_file: Option<PathBuf>,
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Yes"
    } else {
        "No"
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Lab Tool Status:")?;
        match &self.selected_image {
            Some(image) => writeln!(f, "Selected ISO: {}", image.display())?,
            None => writeln!(f, "Selected ISO: None")?,
        }
        write!(
            f,
            "USB Gadget Configured: {}",
            yes_no(self.gadget_state == GadgetState::Bound)
        )?;
        match &self.udc {
            Some(udc) => writeln!(f, " ({})", udc)?,
            None => writeln!(f)?,
        }
        writeln!(f, "Keyboard Active: {}", yes_no(self.keyboard_active))?;
        write!(
            f,
            "ISO Emulation: {}",
            if self.emulating { "Active" } else { "Inactive" }
        )?;
        if let Some(lun) = &self.lun_file {
            write!(f, " ({})", lun.display())?;
        }
        Ok(())
    }
}

/// Lab session
pub struct Session {
    gadget: OtgGadgetManager,
    msd: MsdController,
    keyboard: HidTransport,
    selected_image: Option<PathBuf>,
    emulating: bool,
    privilege: Box<dyn Privilege>,
}

impl Session {
    /// Create a session, removing any gadget left behind by an earlier run
    pub fn new(config: &AppConfig, privilege: Box<dyn Privilege>) -> Self {
        let mut gadget = OtgGadgetManager::new(&config.gadget);
        if privilege.is_privileged() {
            let report = gadget.reset();
            if report.existed {
                info!("Removed stale gadget at {}", gadget.gadget_path().display());
            }
        } else {
            debug!("Skipping stale gadget cleanup without privileges");
        }

        Self {
            gadget,
            msd: MsdController::new(),
            keyboard: HidTransport::new(&config.keyboard),
            selected_image: None,
            emulating: false,
            privilege,
        }
    }

    fn require_privilege(&self) -> Result<()> {
        if self.privilege.is_privileged() {
            Ok(())
        } else {
            Err(AppError::PermissionDenied(
                "this command requires root privileges".to_string(),
            ))
        }
    }

    fn ensure_gadget(&mut self) -> Result<()> {
        if self.gadget.is_bound() {
            return Ok(());
        }
        info!("Configuring USB gadget...");
        self.gadget.activate()
    }

    pub fn selected_image(&self) -> Option<&Path> {
        self.selected_image.as_deref()
    }

    pub fn gadget(&self) -> &OtgGadgetManager {
        &self.gadget
    }

    pub fn is_emulating(&self) -> bool {
        self.emulating
    }

    pub fn is_keyboard_active(&self) -> bool {
        self.keyboard.is_active()
    }

    /// Select the image used by `emulate` and `write`
    ///
    /// Returns the absolute path that was stored. Symlinks are kept as given.
    pub fn select_image(&mut self, path: &Path) -> Result<&Path> {
        if !path.exists() {
            return Err(AppError::FileNotFound(path.to_path_buf()));
        }
        let image =
            std::path::absolute(path).map_err(|_| AppError::FileNotFound(path.to_path_buf()))?;
        info!("Selected image: {}", image.display());
        Ok(self.selected_image.insert(image).as_path())
    }

    /// Expose the selected image over USB mass storage
    pub fn emulate_start(&mut self) -> Result<()> {
        self.require_privilege()?;
        let image = self
            .selected_image
            .clone()
            .ok_or(AppError::ImageNotSelected)?;

        self.ensure_gadget()?;
        self.msd.bind_image(&self.gadget, &image)?;
        self.emulating = true;
        Ok(())
    }

    /// Detach the image; the gadget stays bound
    pub fn emulate_stop(&mut self) -> Result<()> {
        self.require_privilege()?;
        if self.gadget.is_bound() {
            self.msd.unbind(&self.gadget)?;
        }
        self.emulating = false;
        Ok(())
    }

    /// Start forwarding keystrokes from `input` to the host
    pub fn keyboard_start(&mut self, input: Box<dyn KeySource>) -> Result<()> {
        self.require_privilege()?;
        if self.keyboard.is_active() {
            return Err(AppError::InvalidState("keyboard already active".to_string()));
        }
        self.ensure_gadget()?;
        self.keyboard.start(&self.gadget, input)
    }

    /// Stop the keyboard; returns `None` if it was not running
    pub fn keyboard_stop(&mut self) -> Result<Option<CaptureSummary>> {
        self.require_privilege()?;
        Ok(self.keyboard.stop())
    }

    /// Turns `true` once the capture worker exits on its own (escape byte, EOF)
    pub fn keyboard_exit_signal(&self) -> Option<watch::Receiver<bool>> {
        self.keyboard.exit_signal()
    }

    /// Validate a `write` request
    pub fn prepare_write(&self, device: &Path) -> Result<WriteJob> {
        self.require_privilege()?;
        let image = self
            .selected_image
            .clone()
            .ok_or(AppError::ImageNotSelected)?;
        if !device.exists() {
            return Err(AppError::FileNotFound(device.to_path_buf()));
        }
        Ok(WriteJob {
            image,
            device: device.to_path_buf(),
        })
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            selected_image: self.selected_image.clone(),
            gadget_state: self.gadget.state(),
            udc: self.gadget.bound_udc().map(str::to_string),
            keyboard_active: self.keyboard.is_active(),
            emulating: self.emulating,
            lun_file: self.msd.binding().map(Path::to_path_buf),
        }
    }

    /// Stop everything and remove the gadget
    pub fn shutdown(&mut self) {
        self.keyboard.stop();
        if self.emulating {
            if let Err(e) = self.msd.unbind(&self.gadget) {
                warn!("Failed to unbind image during shutdown: {}", e);
            }
            self.emulating = false;
        }

        if !self.privilege.is_privileged() {
            debug!("Skipping gadget teardown without privileges");
            return;
        }
        let report = self.gadget.teardown();
        if !report.is_clean() {
            warn!("Gadget teardown left {} failure(s)", report.failures.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::hid::FdSource;
    use crate::otg::manager::tests::Mirror;
    use std::fs::{self, File};
    use std::io::Write;
    use std::time::{Duration, Instant};

    fn session(mirror: &Mirror, privileged: bool) -> Session {
        let config = AppConfig {
            gadget: mirror.config.clone(),
            ..AppConfig::default()
        };
        Session::new(&config, Box::new(Granted(privileged)))
    }

    fn image(mirror: &Mirror) -> PathBuf {
        let path = mirror.dir.path().join("disk.img");
        fs::write(&path, vec![0u8; 512]).unwrap();
        path
    }

    #[test]
    fn test_select_image() {
        let mirror = Mirror::new();
        let mut session = session(&mirror, true);
        let path = image(&mirror);

        let selected = session.select_image(&path).unwrap().to_path_buf();
        assert!(selected.is_absolute());
        assert_eq!(selected, std::path::absolute(&path).unwrap());

        let err = session
            .select_image(&mirror.dir.path().join("nope.img"))
            .unwrap_err();
        assert!(matches!(err, AppError::FileNotFound(_)));
        // A failed selection keeps the previous one
        assert_eq!(session.selected_image(), Some(selected.as_path()));
        assert_eq!(session.gadget().state(), GadgetState::Absent);
    }

    #[test]
    fn test_emulate_start_stop() {
        let mirror = Mirror::new();
        let mut session = session(&mirror, true);
        let path = image(&mirror);
        session.select_image(&path).unwrap();

        session.emulate_start().unwrap();
        assert_eq!(session.gadget().state(), GadgetState::Bound);
        assert!(session.is_emulating());
        let abs = std::path::absolute(&path).unwrap();
        assert_eq!(
            mirror.read("functions/mass_storage.0/lun.0/file"),
            format!("{}\n", abs.display())
        );

        session.emulate_stop().unwrap();
        assert!(!session.is_emulating());
        assert_eq!(mirror.read("functions/mass_storage.0/lun.0/file"), "\n");
        assert_eq!(session.gadget().state(), GadgetState::Bound);
    }

    #[test]
    fn test_emulate_keeps_symlinked_path() {
        let mirror = Mirror::new();
        let mut session = session(&mirror, true);
        let target = image(&mirror);
        let link = mirror.dir.path().join("current.img");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert_eq!(session.select_image(&link).unwrap(), link.as_path());
        session.emulate_start().unwrap();
        assert_eq!(
            mirror.read("functions/mass_storage.0/lun.0/file"),
            format!("{}\n", link.display())
        );
    }

    #[test]
    fn test_emulate_without_image_creates_nothing() {
        let mirror = Mirror::new();
        let mut session = session(&mirror, true);

        let err = session.emulate_start().unwrap_err();
        assert!(matches!(err, AppError::ImageNotSelected));
        assert_eq!(session.gadget().state(), GadgetState::Absent);
        assert!(!mirror.gadget().exists());
    }

    #[test]
    fn test_unprivileged_commands_have_no_side_effects() {
        let mirror = Mirror::new();
        let mut session = session(&mirror, false);
        session.select_image(&image(&mirror)).unwrap();

        assert!(matches!(
            session.emulate_start().unwrap_err(),
            AppError::PermissionDenied(_)
        ));
        let (read_end, _write_end) = nix::unistd::pipe().unwrap();
        assert!(matches!(
            session
                .keyboard_start(Box::new(FdSource::new(read_end)))
                .unwrap_err(),
            AppError::PermissionDenied(_)
        ));
        assert!(matches!(
            session.prepare_write(mirror.dir.path()).unwrap_err(),
            AppError::PermissionDenied(_)
        ));
        assert!(!mirror.gadget().exists());
        assert!(!session.is_keyboard_active());
    }

    #[test]
    fn test_keyboard_without_image_activates_gadget() {
        let mirror = Mirror::new();
        let mut session = session(&mirror, true);
        let (read_end, write_end) = nix::unistd::pipe().unwrap();

        session
            .keyboard_start(Box::new(FdSource::new(read_end)))
            .unwrap();
        assert_eq!(session.gadget().state(), GadgetState::Bound);
        assert!(session.is_keyboard_active());
        assert!(session.status().keyboard_active);

        let mut input = File::from(write_end);
        input.write_all(b"Hi 1\n").unwrap();
        drop(input);

        let rx = session.keyboard_exit_signal().unwrap();
        let start = Instant::now();
        while !*rx.borrow() {
            assert!(start.elapsed() < Duration::from_secs(5));
            std::thread::sleep(Duration::from_millis(5));
        }

        let summary = session.keyboard_stop().unwrap().unwrap();
        assert_eq!(summary.keystrokes, 5);
        assert_eq!(fs::read(&mirror.config.hid_device).unwrap().len(), 80);
        assert!(session.keyboard_stop().unwrap().is_none());
    }

    #[test]
    fn test_keyboard_requires_udc() {
        let mirror = Mirror::without_udc();
        let mut session = session(&mirror, true);
        let (read_end, _write_end) = nix::unistd::pipe().unwrap();

        let err = session
            .keyboard_start(Box::new(FdSource::new(read_end)))
            .unwrap_err();
        assert!(matches!(err, AppError::NoUdcAvailable));
        assert_eq!(session.gadget().state(), GadgetState::Absent);
        assert!(!session.is_keyboard_active());
    }

    #[test]
    fn test_prepare_write() {
        let mirror = Mirror::new();
        let mut session = session(&mirror, true);
        let device = mirror.dir.path().join("sdx");

        assert!(matches!(
            session.prepare_write(&device).unwrap_err(),
            AppError::ImageNotSelected
        ));

        let path = image(&mirror);
        session.select_image(&path).unwrap();
        assert!(matches!(
            session.prepare_write(&device).unwrap_err(),
            AppError::FileNotFound(_)
        ));

        fs::write(&device, b"").unwrap();
        let job = session.prepare_write(&device).unwrap();
        assert_eq!(job.image, std::path::absolute(&path).unwrap());
        assert_eq!(job.device, device);
    }

    #[test]
    fn test_shutdown_tears_down() {
        let mirror = Mirror::new();
        let mut session = session(&mirror, true);
        session.select_image(&image(&mirror)).unwrap();
        session.emulate_start().unwrap();

        session.shutdown();
        assert!(!session.is_emulating());
        assert_eq!(session.gadget().state(), GadgetState::Absent);
        assert_eq!(mirror.read("UDC"), "\n");
    }

    #[test]
    fn test_status_display() {
        let mirror = Mirror::new();
        let mut session = session(&mirror, true);
        let text = session.status().to_string();
        assert!(text.contains("Selected ISO: None"));
        assert!(text.contains("USB Gadget Configured: No"));
        assert!(text.contains("Keyboard Active: No"));
        assert!(text.contains("ISO Emulation: Inactive"));

        session.select_image(&image(&mirror)).unwrap();
        session.emulate_start().unwrap();
        let status = session.status();
        assert_eq!(status.udc.as_deref(), Some("musb-hdrc.2.auto"));
        let text = status.to_string();
        assert!(text.contains("USB Gadget Configured: Yes (musb-hdrc.2.auto)"));
        assert!(text.contains("ISO Emulation: Active"));
    }
}
