//! Per-run human-readable log.

use std::fmt;
use std::fs;
use std::path::Path;
use time::OffsetDateTime;

use crate::error::{ReleaseError, Result};

const RULE_WIDTH: usize = 70;

/// Host local time, or UTC when the offset cannot be determined.
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Success,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Success => "SUCCESS",
        })
    }
}

/// Lines of one pipeline run: `[HH:MM:SS] [LEVEL] message`.
///
/// Owned by a single run and dropped with it; nothing is shared between runs.
#[derive(Debug, Default)]
pub struct RunLog {
    lines: Vec<String>,
    echo: bool,
}

impl RunLog {
    /// Echoes every line to stdout as it is recorded.
    pub fn new() -> Self {
        Self {
            lines: Vec::new(),
            echo: true,
        }
    }

    /// Records without printing.
    pub fn quiet() -> Self {
        Self::default()
    }

    pub fn log(&mut self, level: Level, message: impl AsRef<str>) {
        let now = local_now();
        let line = format!(
            "[{:02}:{:02}:{:02}] [{}] {}",
            now.hour(),
            now.minute(),
            now.second(),
            level,
            message.as_ref()
        );
        if self.echo {
            println!("{line}");
        }
        self.lines.push(line);
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        self.log(Level::Info, message);
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        self.log(Level::Warn, message);
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        self.log(Level::Error, message);
    }

    pub fn success(&mut self, message: impl AsRef<str>) {
        self.log(Level::Success, message);
    }

    /// Blank line, rule, indented title, rule.
    pub fn section(&mut self, title: &str) {
        let rule = "=".repeat(RULE_WIDTH);
        self.info("");
        self.info(&rule);
        self.info(format!("  {title}"));
        self.info(&rule);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Whether any recorded line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ReleaseError::packaging(parent, e))?;
        }
        let mut text = self.lines.join("\n");
        text.push('\n');
        fs::write(path, text).map_err(|e| ReleaseError::packaging(path, e))
    }
}
