//! Screenshot side channel.
//!
//! Every code message the engine logs is preceded by an image of the screen
//! that motivated it. Capture mechanics are platform-specific and stay
//! behind [`ScreenshotProvider`]; the engine only needs "give me a path to
//! a fresh image" and tolerates failure.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail};
use chrono::Local;
use deskpilot_core::Result;

/// Zero-argument capture returning the path of a freshly written image.
/// Failures are non-fatal to callers; the engine swallows them.
pub trait ScreenshotProvider: Send + Sync {
    fn capture(&self) -> Result<PathBuf>;
}

/// Capture backed by an external command (`screencapture -x {path}`,
/// `grim {path}`, ...). `{path}` tokens are replaced with a timestamped
/// target file under the capture directory.
pub struct CommandCapture {
    dir: PathBuf,
    command: Vec<String>,
}

impl CommandCapture {
    pub fn new(dir: impl Into<PathBuf>, command: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            command,
        }
    }

    fn next_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S%3f");
        self.dir.join(format!("screen_{stamp}.png"))
    }
}

impl ScreenshotProvider for CommandCapture {
    fn capture(&self) -> Result<PathBuf> {
        if self.command.is_empty() {
            bail!("no capture command configured");
        }
        fs::create_dir_all(&self.dir)?;
        let path = self.next_path();
        let rendered = render_command(&self.command, &path);
        let program = &rendered[0];

        let status = Command::new(program).args(&rendered[1..]).status()?;
        if !status.success() {
            bail!("capture command `{program}` exited with {status}");
        }
        if !path.exists() {
            bail!(
                "capture command `{program}` produced no file at {}",
                path.display()
            );
        }
        Ok(path)
    }
}

/// Provider that hands out an existing image, unchanged. Useful wherever a
/// deterministic path matters more than a live screen grab.
pub struct FixedCapture {
    path: PathBuf,
}

impl FixedCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScreenshotProvider for FixedCapture {
    fn capture(&self) -> Result<PathBuf> {
        if !self.path.exists() {
            return Err(anyhow!("fixed capture image {} missing", self.path.display()));
        }
        Ok(self.path.clone())
    }
}

/// Builds the capture command for `path` relative to a capture dir; split
/// out so the path templating stays testable without running anything.
#[must_use]
pub fn render_command(command: &[String], target: &Path) -> Vec<String> {
    let target = target.display().to_string();
    command
        .iter()
        .map(|token| token.replace("{path}", &target))
        .collect()
}
