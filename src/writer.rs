//! Image writer
//!
//! Copies the selected image onto a block device with `dd`, streaming its
//! progress to the terminal.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::WriterConfig;
use crate::error::{AppError, Result};

/// A validated image-to-device copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteJob {
    pub image: PathBuf,
    pub device: PathBuf,
}

/// Runs `dd` for a [`WriteJob`]
#[derive(Debug, Clone)]
pub struct ImageWriter {
    dd_path: PathBuf,
    block_size: String,
}

impl ImageWriter {
    pub fn new(config: &WriterConfig) -> Self {
        Self {
            dd_path: config.dd_path.clone(),
            block_size: config.block_size.clone(),
        }
    }

    fn build_args(&self, job: &WriteJob) -> Vec<String> {
        vec![
            format!("if={}", job.image.display()),
            format!("of={}", job.device.display()),
            format!("bs={}", self.block_size),
            "status=progress".to_string(),
        ]
    }

    /// Write the image, cancelling on Ctrl-C
    pub async fn write(&self, job: &WriteJob) -> Result<()> {
        self.write_until(job, tokio::signal::ctrl_c()).await
    }

    /// Write the image, killing `dd` if `cancel` resolves first
    pub async fn write_until<F>(&self, job: &WriteJob, cancel: F) -> Result<()>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let args = self.build_args(job);
        info!("Starting {} {}", self.dd_path.display(), args.join(" "));

        let mut child = Command::new(&self.dd_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::WriteFailed(format!("failed to start {}: {}", self.dd_path.display(), e))
            })?;

        tokio::select! {
            biased;

            result = cancel => {
                if let Err(e) = result {
                    warn!("Interrupt handler failed: {}", e);
                }
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", self.dd_path.display(), e);
                }
                info!("Image write cancelled");
                Err(AppError::WriteCancelled)
            }
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    info!("Wrote {} to {}", job.image.display(), job.device.display());
                    Ok(())
                } else {
                    Err(AppError::WriteFailed(format!("dd exited with {}", status)))
                }
            }
        }
    }
}
