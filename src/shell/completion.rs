//! Tab completion for the shell prompt

use std::fs;
use std::path::{Path, PathBuf};

use rustyline::completion::Completer;
use rustyline::{Context, Helper, Highlighter, Hinter, Validator};

const COMMANDS: &[&str] = &[
    "iso", "write", "emulate", "keyboard", "status", "help", "exit",
];
const TOGGLES: &[&str] = &["start", "stop"];
const IMAGE_EXTENSIONS: &[&str] = &["iso", "img"];
const DEVICE_PREFIX: &str = "sd";

/// Completes command names, image paths for `iso` and block devices for
/// `write`
#[derive(Helper, Hinter, Highlighter, Validator)]
pub struct LabHelper {
    device_dir: PathBuf,
}

impl LabHelper {
    pub fn new() -> Self {
        Self {
            device_dir: PathBuf::from("/dev"),
        }
    }

    /// Offer devices from another directory (tests)
    pub fn with_device_dir(device_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_dir: device_dir.into(),
        }
    }

    /// Replacement start offset and sorted candidates for `line`
    fn candidates(&self, line: &str) -> (usize, Vec<String>) {
        let Some((command, rest)) = line.split_once(char::is_whitespace) else {
            return (0, matching(COMMANDS, line));
        };
        let arg = rest.trim_start();
        let start = line.len() - arg.len();
        let candidates = match command {
            "iso" => image_candidates(arg),
            "write" => self.device_candidates(arg),
            "emulate" | "keyboard" => matching(TOGGLES, arg),
            _ => Vec::new(),
        };
        (start, candidates)
    }

    fn device_candidates(&self, arg: &str) -> Vec<String> {
        let dir_prefix = format!("{}/", self.device_dir.display());
        let name_prefix = if let Some(name) = arg.strip_prefix(dir_prefix.as_str()) {
            name
        } else if dir_prefix.starts_with(arg) {
            ""
        } else {
            return Vec::new();
        };

        let mut devices: Vec<String> = entry_names(&self.device_dir)
            .into_iter()
            .filter(|(name, _)| name.starts_with(DEVICE_PREFIX) && name.starts_with(name_prefix))
            .map(|(name, _)| format!("{}{}", dir_prefix, name))
            .collect();
        devices.sort();
        devices
    }
}

impl Default for LabHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl Completer for LabHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        Ok(self.candidates(&line[..pos]))
    }
}

fn matching(words: &[&str], prefix: &str) -> Vec<String> {
    words
        .iter()
        .filter(|word| word.starts_with(prefix))
        .map(|word| word.to_string())
        .collect()
}

/// Directories (to descend into) and image files under the typed prefix
fn image_candidates(arg: &str) -> Vec<String> {
    let (dir_part, stem) = match arg.rfind('/') {
        Some(i) => arg.split_at(i + 1),
        None => ("", arg),
    };
    let dir = if dir_part.is_empty() {
        Path::new(".")
    } else {
        Path::new(dir_part)
    };

    let mut images: Vec<String> = entry_names(dir)
        .into_iter()
        .filter(|(name, _)| name.starts_with(stem) && (!stem.is_empty() || !name.starts_with('.')))
        .filter_map(|(name, path)| {
            if path.is_dir() {
                Some(format!("{}{}/", dir_part, name))
            } else if is_image(&path) {
                Some(format!("{}{}", dir_part, name))
            } else {
                None
            }
        })
        .collect();
    images.sort();
    images
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// UTF-8 entry names with their paths; unreadable directories yield nothing
fn entry_names(dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            Some((name, entry.path()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_command_names() {
        let helper = LabHelper::new();
        assert_eq!(helper.candidates(""), (0, matching(COMMANDS, "")));
        assert_eq!(helper.candidates("e"), (0, vec!["emulate".to_string(), "exit".to_string()]));
        assert_eq!(helper.candidates("st"), (0, vec!["status".to_string()]));
        assert_eq!(helper.candidates("xyz"), (0, Vec::<String>::new()));
    }

    #[test]
    fn test_toggle_arguments() {
        let helper = LabHelper::new();
        assert_eq!(helper.candidates("emulate s"), (8, vec!["start".to_string(), "stop".to_string()]));
        assert_eq!(helper.candidates("keyboard  sto"), (10, vec!["stop".to_string()]));
        assert_eq!(helper.candidates("status x"), (7, Vec::<String>::new()));
    }

    #[test]
    fn test_iso_completes_images_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("debian.iso"));
        touch(&dir.path().join("disk.IMG"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join(".hidden.iso"));
        fs::create_dir(dir.path().join("distros")).unwrap();

        let base = format!("{}/", dir.path().display());
        let (start, candidates) = LabHelper::new().candidates(&format!("iso {}", base));
        assert_eq!(start, 4);
        assert_eq!(
            candidates,
            vec![
                format!("{}debian.iso", base),
                format!("{}disk.IMG", base),
                format!("{}distros/", base),
            ]
        );

        let (_, candidates) = LabHelper::new().candidates(&format!("iso {}de", base));
        assert_eq!(candidates, vec![format!("{}debian.iso", base)]);

        let (_, candidates) = LabHelper::new().candidates(&format!("iso {}.h", base));
        assert_eq!(candidates, vec![format!("{}.hidden.iso", base)]);
    }

    #[test]
    fn test_iso_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let line = format!("iso {}/nowhere/", dir.path().display());
        assert!(LabHelper::new().candidates(&line).1.is_empty());
    }

    #[test]
    fn test_write_completes_sd_devices() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["sda", "sda1", "sdb", "mmcblk0", "hidg0"] {
            touch(&dir.path().join(name));
        }
        let helper = LabHelper::with_device_dir(dir.path());
        let base = format!("{}/", dir.path().display());

        let (start, candidates) = helper.candidates("write ");
        assert_eq!(start, 6);
        assert_eq!(
            candidates,
            vec![format!("{}sda", base), format!("{}sda1", base), format!("{}sdb", base)]
        );

        let (_, candidates) = helper.candidates(&format!("write {}sdb", base));
        assert_eq!(candidates, vec![format!("{}sdb", base)]);

        assert!(helper.candidates("write /elsewhere/sd").1.is_empty());
    }
}
