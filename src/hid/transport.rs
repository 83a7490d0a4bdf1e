//! HID keyboard transport
//!
//! Owns the HID character device while a key capture session is active and
//! runs the capture worker: read a byte from the operator's input, encode it,
//! write the reports to /dev/hidgN.
//!
//! Error Recovery:
//! - EAGAIN: the host is not polling the endpoint; the keystroke is dropped
//!   and logged, the device stays open.
//! - ESHUTDOWN: the endpoint went away (e.g. during re-enumeration); the
//!   handle is closed and reopened on the next keystroke.

use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Read, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::keymap::encode_byte;
use super::types::KeyboardReport;
use crate::config::KeyboardConfig;
use crate::error::{AppError, Result};
use crate::otg::OtgGadgetManager;

/// One poll of the input source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Byte(u8),
    Timeout,
    Eof,
}

/// Operator keystroke source
pub trait KeySource: Send + 'static {
    /// Wait up to `timeout` for the next byte
    fn next(&mut self, timeout: Duration) -> io::Result<Input>;

    /// Switch the source to no-echo, non-canonical mode if it is a terminal
    fn raw_mode(&self) -> Result<Option<RawModeGuard>> {
        Ok(None)
    }
}

/// Keystroke source backed by a file descriptor (stdin, a pipe)
///
/// Reads go straight to the descriptor, one byte at a time, so nothing is
/// buffered behind `poll`'s back.
pub struct FdSource {
    file: File,
}

impl FdSource {
    pub fn new(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
        }
    }

    /// Source reading from a duplicate of the process's stdin
    pub fn stdin() -> Result<Self> {
        let fd = io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .map_err(|e| AppError::Transport(format!("Failed to duplicate stdin: {}", e)))?;
        Ok(Self::new(fd))
    }
}

impl KeySource for FdSource {
    fn next(&mut self, timeout: Duration) -> io::Result<Input> {
        let ms = timeout.as_millis().min(u16::MAX as u128) as u16;
        let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
        if poll(&mut fds, PollTimeout::from(ms)).map_err(io::Error::from)? == 0 {
            return Ok(Input::Timeout);
        }

        let mut byte = [0u8; 1];
        match self.file.read(&mut byte)? {
            0 => Ok(Input::Eof),
            _ => Ok(Input::Byte(byte[0])),
        }
    }

    fn raw_mode(&self) -> Result<Option<RawModeGuard>> {
        if self.file.is_terminal() {
            RawModeGuard::enable(self.file.as_fd()).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Terminal in no-echo, non-canonical mode; restores the original mode on drop
///
/// Signal generation (ISIG) stays on so Ctrl-C still reaches the shell.
pub struct RawModeGuard {
    fd: OwnedFd,
    original: Termios,
}

impl RawModeGuard {
    pub fn enable(fd: BorrowedFd<'_>) -> Result<Self> {
        let original = termios::tcgetattr(fd)
            .map_err(|e| AppError::Transport(format!("Failed to read terminal mode: {}", e)))?;

        let mut raw = original.clone();
        raw.local_flags.remove(LocalFlags::ECHO | LocalFlags::ICANON);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(fd, SetArg::TCSANOW, &raw)
            .map_err(|e| AppError::Transport(format!("Failed to set raw mode: {}", e)))?;

        let fd = fd.try_clone_to_owned()?;
        debug!("Terminal switched to raw mode");
        Ok(Self { fd, original })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        match termios::tcsetattr(&self.fd, SetArg::TCSANOW, &self.original) {
            Ok(()) => debug!("Terminal mode restored"),
            Err(e) => warn!("Failed to restore terminal mode: {}", e),
        }
    }
}

/// HID character device writer
struct HidDevice {
    path: PathBuf,
    file: Option<File>,
}

impl HidDevice {
    fn open(path: &Path) -> Result<Self> {
        let file = Self::open_file(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    /// Open with read/write access, non-blocking so a host that is not
    /// polling the endpoint cannot stall the capture worker
    fn open_file(path: &Path) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| {
                AppError::Transport(format!("Failed to open HID device {}: {}", path.display(), e))
            })
    }

    fn write_report(&mut self, report: &KeyboardReport) -> Result<()> {
        let file = match self.file {
            Some(ref mut file) => file,
            None => {
                let file = Self::open_file(&self.path)?;
                info!("Reopened HID device: {}", self.path.display());
                self.file.insert(file)
            }
        };

        let data = report.to_bytes();
        match file.write_all(&data) {
            Ok(()) => {
                trace!("Sent keyboard report: {:02X?}", data);
                Ok(())
            }
            Err(e) => Err(self.write_failed(e)),
        }
    }

    /// Classify a failed write; ESHUTDOWN drops the handle so the next
    /// report reopens the device
    fn write_failed(&mut self, e: io::Error) -> AppError {
        let reason = match e.raw_os_error() {
            Some(libc::ESHUTDOWN) => {
                debug!("Keyboard ESHUTDOWN, closing for recovery");
                self.file = None;
                "endpoint shut down"
            }
            Some(libc::EAGAIN) => "device busy",
            _ => "write failed",
        };
        AppError::Transport(format!("{} ({}): {}", self.path.display(), reason, e))
    }
}

/// Why the capture worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureExit {
    /// `stop()` was requested
    #[default]
    Stopped,
    /// The escape byte was typed
    Escape,
    /// Input reached end of file
    Eof,
    /// Reading input failed
    InputError,
}

/// Counters for one capture session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Characters that were encoded and sent
    pub keystrokes: usize,
    /// Characters without a mapping
    pub ignored: usize,
    /// Report writes that failed
    pub write_errors: usize,
    pub exit: CaptureExit,
}

/// Active key capture session
struct KeySession {
    stop: Arc<AtomicBool>,
    worker: JoinHandle<CaptureSummary>,
    exited: watch::Receiver<bool>,
    /// Restored after the worker is joined
    _raw_mode: Option<RawModeGuard>,
}

/// HID keyboard transport
pub struct HidTransport {
    poll_interval: Duration,
    escape_byte: u8,
    session: Option<KeySession>,
}

impl HidTransport {
    pub fn new(config: &KeyboardConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            escape_byte: config.escape_byte,
            session: None,
        }
    }

    /// Whether the capture worker is running
    pub fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| !s.worker.is_finished())
            .unwrap_or(false)
    }

    /// Receiver that turns `true` once the capture worker has exited
    pub fn exit_signal(&self) -> Option<watch::Receiver<bool>> {
        self.session.as_ref().map(|s| s.exited.clone())
    }

    /// Start capturing keystrokes into the gadget's HID device
    pub fn start(&mut self, gadget: &OtgGadgetManager, input: Box<dyn KeySource>) -> Result<()> {
        if !gadget.is_bound() {
            return Err(AppError::GadgetNotActive);
        }
        self.start_on(gadget.hid_device_path(), input)
    }

    pub(crate) fn start_on(&mut self, device: &Path, input: Box<dyn KeySource>) -> Result<()> {
        if self.is_active() {
            return Err(AppError::InvalidState("keyboard already active".to_string()));
        }
        // A worker that exited on its own still needs joining
        self.stop();

        let device_path = device.to_path_buf();
        let device = HidDevice::open(device)?;
        let raw_mode = input.raw_mode()?;

        let stop = Arc::new(AtomicBool::new(false));
        let (exit_tx, exited) = watch::channel(false);
        let worker = {
            let stop = stop.clone();
            let poll_interval = self.poll_interval;
            let escape_byte = self.escape_byte;
            std::thread::Builder::new()
                .name("hid-capture".to_string())
                .spawn(move || capture_loop(input, device, stop, poll_interval, escape_byte, exit_tx))?
        };

        info!("Keyboard capture started on {}", device_path.display());
        self.session = Some(KeySession {
            stop,
            worker,
            exited,
            _raw_mode: raw_mode,
        });
        Ok(())
    }

    /// Stop the capture worker and restore the terminal
    ///
    /// Returns within about one poll interval. Safe to call when no session
    /// exists or the worker has already exited.
    pub fn stop(&mut self) -> Option<CaptureSummary> {
        let session = self.session.take()?;
        session.stop.store(true, Ordering::Release);

        let summary = match session.worker.join() {
            Ok(summary) => summary,
            Err(_) => {
                warn!("Keyboard capture worker panicked");
                CaptureSummary::default()
            }
        };
        drop(session._raw_mode);

        info!(
            "Keyboard capture stopped ({:?}): {} keys sent, {} ignored, {} write errors",
            summary.exit, summary.keystrokes, summary.ignored, summary.write_errors
        );
        Some(summary)
    }
}

impl Drop for HidTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    mut input: Box<dyn KeySource>,
    mut device: HidDevice,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
    escape_byte: u8,
    exit_tx: watch::Sender<bool>,
) -> CaptureSummary {
    let mut summary = CaptureSummary::default();

    summary.exit = loop {
        if stop.load(Ordering::Acquire) {
            break CaptureExit::Stopped;
        }

        match input.next(poll_interval) {
            Ok(Input::Timeout) => continue,
            Ok(Input::Eof) => break CaptureExit::Eof,
            Ok(Input::Byte(b)) if b == escape_byte => break CaptureExit::Escape,
            Ok(Input::Byte(b)) => {
                let Some(stroke) = encode_byte(b) else {
                    trace!("No key mapping for byte 0x{:02x}", b);
                    summary.ignored += 1;
                    continue;
                };
                summary.keystrokes += 1;
                // The release is sent even if the press failed
                for report in stroke.reports() {
                    if let Err(e) = device.write_report(&report) {
                        summary.write_errors += 1;
                        warn!("Failed to send key report: {}", e);
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Keyboard input error: {}", e);
                break CaptureExit::InputError;
            }
        }
    };

    exit_tx.send_replace(true);
    summary
}
