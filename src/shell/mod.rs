//! Interactive command shell
//!
//! Line-oriented front end over [`Session`], with history and tab
//! completion. Command errors are printed and never end the loop; `exit`
//! and end of input both shut the session down.

mod completion;

use std::path::PathBuf;
use std::str::FromStr;

use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{CompletionType, Config, Editor};
use thiserror::Error;
use tokio::task::block_in_place;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::hid::FdSource;
use crate::session::Session;
use crate::writer::ImageWriter;

pub use completion::LabHelper;

pub const PROMPT: &str = "lab> ";

const INTRO: &str = "\
Pinephone Lab Tool - USB Gadget and ISO Tool
Type help or ? to list commands.

Examples:
  lab> iso ubuntu.iso               # Select an ISO file
  lab> write /dev/sda               # Write ISO to USB drive
  lab> emulate start                # Share ISO over USB
  lab> keyboard start               # Start USB keyboard
  lab> status                       # Show current status
";

const HELP: &str = "\
Commands:
  iso [path]                 Select an image, or show the current selection
  write <device>             Write the selected image to a block device (dd)
  emulate [start|stop]       Share the selected image over USB mass storage
  keyboard [start|stop]      Forward keystrokes to the host (Ctrl-] or Ctrl-C ends)
  status                     Show current status
  help                       Show this help
  exit                       Clean up the USB gadget and quit";

/// `start`/`stop` argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Start,
    Stop,
}

/// One parsed shell line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Iso(Option<PathBuf>),
    Write(PathBuf),
    Emulate(Toggle),
    Keyboard(Toggle),
    Status,
    Help,
    Exit,
    /// Blank line
    Empty,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseCommandError {
    #[error("Unknown command: {0}. Type 'help' for a list of commands.")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),
}

fn parse_toggle(arg: Option<&str>, usage: &'static str) -> std::result::Result<Toggle, ParseCommandError> {
    match arg {
        None | Some("start") => Ok(Toggle::Start),
        Some("stop") => Ok(Toggle::Stop),
        Some(_) => Err(ParseCommandError::Usage(usage)),
    }
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Command::Empty);
        }

        let (name, arg) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, Some(rest.trim()).filter(|a| !a.is_empty())),
            None => (line, None),
        };

        match name {
            "iso" => Ok(Command::Iso(arg.map(PathBuf::from))),
            "write" => arg
                .map(|dev| Command::Write(PathBuf::from(dev)))
                .ok_or(ParseCommandError::Usage("write <device>")),
            "emulate" => parse_toggle(arg, "emulate [start|stop]").map(Command::Emulate),
            "keyboard" => parse_toggle(arg, "keyboard [start|stop]").map(Command::Keyboard),
            "status" => Ok(Command::Status),
            "help" | "?" => Ok(Command::Help),
            "exit" | "quit" => Ok(Command::Exit),
            other => Err(ParseCommandError::Unknown(other.to_string())),
        }
    }
}

/// Interactive shell
pub struct Shell {
    session: Session,
    writer: ImageWriter,
}

impl Shell {
    pub fn new(session: Session, writer: ImageWriter) -> Self {
        Self { session, writer }
    }

    /// Read and run commands until `exit` or end of input
    ///
    /// Line editing and gadget commands block the calling thread, so this
    /// must run on the multi-threaded runtime.
    pub async fn run(mut self) -> Result<()> {
        println!("{}", INTRO);
        let config = Config::builder()
            .auto_add_history(true)
            .completion_type(CompletionType::List)
            .build();
        let mut editor: Editor<LabHelper, DefaultHistory> = Editor::with_config(config)?;
        editor.set_helper(Some(LabHelper::new()));

        loop {
            let line = match block_in_place(|| editor.readline(PROMPT)) {
                Ok(line) => line,
                // Ctrl-C at the prompt clears the line
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(e) => {
                    block_in_place(|| self.session.shutdown());
                    return Err(e.into());
                }
            };

            match line.parse::<Command>() {
                Ok(Command::Exit) => break,
                Ok(command) => {
                    debug!("Command: {:?}", command);
                    if let Err(e) = self.execute(command).await {
                        println!("{}", e);
                    }
                }
                Err(e) => println!("{}", e),
            }
        }

        block_in_place(|| self.session.shutdown());
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Iso(None) => match self.session.selected_image() {
                Some(image) => println!("Currently selected ISO: {}", image.display()),
                None => println!("No ISO file selected"),
            },
            Command::Iso(Some(path)) => {
                let image = self.session.select_image(&path)?;
                println!("Selected ISO: {}", image.display());
            }
            Command::Write(device) => {
                let job = self.session.prepare_write(&device)?;
                println!("Writing {} to {}", job.image.display(), job.device.display());
                println!("Press Ctrl+C to cancel");
                match self.writer.write(&job).await {
                    Ok(()) => println!("\nWrite completed successfully"),
                    Err(AppError::WriteCancelled) => println!("\nWrite cancelled"),
                    Err(e) => println!("\nError writing ISO: {}", e),
                }
            }
            Command::Emulate(Toggle::Start) => {
                block_in_place(|| self.session.emulate_start())?;
                if let Some(name) = self
                    .session
                    .selected_image()
                    .and_then(|p| p.file_name())
                {
                    println!("Emulating {} over USB", name.to_string_lossy());
                }
            }
            Command::Emulate(Toggle::Stop) => {
                let was_emulating = self.session.is_emulating();
                block_in_place(|| self.session.emulate_stop())?;
                if was_emulating {
                    println!("ISO emulation stopped");
                }
            }
            Command::Keyboard(Toggle::Start) => self.capture_keyboard().await?,
            Command::Keyboard(Toggle::Stop) => match block_in_place(|| self.session.keyboard_stop())? {
                Some(_) => println!("Virtual keyboard stopped"),
                None => println!("Virtual keyboard is not active"),
            },
            Command::Status => println!("{}", self.session.status()),
            Command::Help => println!("{}", HELP),
            Command::Exit | Command::Empty => {}
        }
        Ok(())
    }

    /// Hand the terminal to the capture worker until it exits or Ctrl-C
    async fn capture_keyboard(&mut self) -> Result<()> {
        let input = Box::new(FdSource::stdin()?);
        block_in_place(|| self.session.keyboard_start(input))?;
        println!("Virtual keyboard started. Type to send keys, Ctrl-] or Ctrl+C to stop.");

        if let Some(mut exited) = self.session.keyboard_exit_signal() {
            tokio::select! {
                result = exited.wait_for(|done| *done) => {
                    if result.is_err() {
                        warn!("Keyboard worker exit signal dropped");
                    }
                }
                _ = tokio::signal::ctrl_c() => {}
            }
        }

        if let Some(summary) = block_in_place(|| self.session.keyboard_stop())? {
            println!(
                "\nVirtual keyboard stopped ({} keys sent, {} ignored)",
                summary.keystrokes, summary.ignored
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, WriterConfig};
    use crate::otg::manager::tests::Mirror;
    use crate::otg::GadgetState;
    use crate::session::Granted;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_emulate_commands_on_runtime() {
        let mirror = Mirror::new();
        let config = AppConfig {
            gadget: mirror.config.clone(),
            ..AppConfig::default()
        };
        let session = Session::new(&config, Box::new(Granted(true)));
        let mut shell = Shell::new(session, ImageWriter::new(&WriterConfig::default()));

        let image = mirror.dir.path().join("disk.img");
        std::fs::write(&image, vec![0u8; 512]).unwrap();
        shell.execute(Command::Iso(Some(image))).await.unwrap();

        shell.execute(Command::Emulate(Toggle::Start)).await.unwrap();
        assert!(shell.session.is_emulating());
        assert_eq!(shell.session.gadget().state(), GadgetState::Bound);

        shell.execute(Command::Emulate(Toggle::Stop)).await.unwrap();
        assert!(!shell.session.is_emulating());
        assert_eq!(mirror.read("functions/mass_storage.0/lun.0/file"), "\n");
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "iso ubuntu.iso".parse::<Command>().unwrap(),
            Command::Iso(Some(PathBuf::from("ubuntu.iso")))
        );
        assert_eq!("iso".parse::<Command>().unwrap(), Command::Iso(None));
        assert_eq!(
            "  write   /dev/sda ".parse::<Command>().unwrap(),
            Command::Write(PathBuf::from("/dev/sda"))
        );
        assert_eq!("status".parse::<Command>().unwrap(), Command::Status);
        assert_eq!("?".parse::<Command>().unwrap(), Command::Help);
        assert_eq!("exit".parse::<Command>().unwrap(), Command::Exit);
        assert_eq!("   ".parse::<Command>().unwrap(), Command::Empty);
    }

    #[test]
    fn test_toggle_defaults_to_start() {
        assert_eq!(
            "emulate".parse::<Command>().unwrap(),
            Command::Emulate(Toggle::Start)
        );
        assert_eq!(
            "emulate stop".parse::<Command>().unwrap(),
            Command::Emulate(Toggle::Stop)
        );
        assert_eq!(
            "keyboard start".parse::<Command>().unwrap(),
            Command::Keyboard(Toggle::Start)
        );
        assert_eq!(
            "keyboard restart".parse::<Command>().unwrap_err(),
            ParseCommandError::Usage("keyboard [start|stop]")
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "write".parse::<Command>().unwrap_err(),
            ParseCommandError::Usage("write <device>")
        );
        assert!(matches!(
            "flash /dev/sda".parse::<Command>().unwrap_err(),
            ParseCommandError::Unknown(name) if name == "flash"
        ));
    }

    #[test]
    fn test_path_with_spaces() {
        assert_eq!(
            "iso my image.iso".parse::<Command>().unwrap(),
            Command::Iso(Some(PathBuf::from("my image.iso")))
        );
    }
}
