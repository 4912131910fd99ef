use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::schema::{ProgressMessage, Status, StatusMessage};

/// Writes protocol lines to the orchestrator, one JSON object per line.
pub struct Reporter<'a> {
    out: &'a mut (dyn Write + Send),
}

impl<'a> Reporter<'a> {
    pub fn new(out: &'a mut (dyn Write + Send)) -> Self {
        Reporter { out }
    }

    /// Report progress as a percentage, clamped to 100.
    pub fn progress(&mut self, progress: u8, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        tracing::debug!(progress, %message, "progress");
        self.write_json(&ProgressMessage {
            progress: progress.min(100),
            message: Some(message).filter(|m| !m.is_empty()),
        })
    }

    pub fn status(
        &mut self,
        status: Status,
        reason: Option<&str>,
        message: Option<String>,
    ) -> Result<()> {
        self.write_json(&StatusMessage {
            status,
            reason: reason.map(str::to_string),
            message,
        })
    }

    pub fn write_json<T: Serialize>(&mut self, value: &T) -> Result<()> {
        serde_json::to_writer(&mut *self.out, value).context("Could not write message")?;
        self.write_line("")
    }

    /// Write `line` followed by a newline and flush.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{}", line).context("Could not write to standard output")?;
        self.out.flush().context("Could not flush standard output")
    }
}

/// Progress of `done` out of `total` steps, as a percentage.
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}
