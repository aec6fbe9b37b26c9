//! Run log and report artifacts.
//!
//! The run log is an append-only text file created at run start. Every
//! write reopens it in append mode, writes one line and closes it again;
//! the same line is echoed to stdout. Failing to open the log is an error
//! for the caller, never swallowed.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Handle to the append-only log of one run. Holds no open file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    /// Create (or truncate) the log and write the run header.
    pub fn create(path: impl Into<PathBuf>, save_path: &str) -> Result<Self> {
        Self::create_at(path, save_path, Utc::now())
    }

    pub fn create_at(path: impl Into<PathBuf>, save_path: &str, started_at: DateTime<Utc>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
        }
        let header = format!(
            "Training Start:{}\n{}\n",
            started_at.format("%a, %d %b %Y %H:%M:%S +0000"),
            save_path
        );
        std::fs::write(&path, header).with_context(|| format!("write {:?}", path))?;
        Ok(Self { path })
    }

    /// Attach to an existing log without touching its contents.
    pub fn attach(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Echo `line` to stdout and append it to the log.
    pub fn log_print(&self, line: &str) -> Result<()> {
        println!("{}", line);
        self.append(line)
    }

    /// Append `line` to the log only.
    pub fn append(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open run log {:?}", self.path))?;
        writeln!(file, "{}", line).with_context(|| format!("append to {:?}", self.path))?;
        Ok(())
    }
}

/// Space-joined `name: value` pairs, values to four decimals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricLine {
    fields: Vec<(&'static str, f64)>,
}

impl MetricLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, name: &'static str, value: f64) -> Self {
        self.fields.push((name, value));
        self
    }

    pub fn render(&self) -> String {
        self.fields
            .iter()
            .map(|(name, value)| format!("{}: {:.4}", name, value))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for MetricLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Write any serialisable report as pretty JSON.
pub fn write_json_report<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_line_format_is_stable() {
        let line = MetricLine::new()
            .push("SS", 0.5)
            .push("UU", 0.123_456)
            .push("H", 1.0);
        assert_eq!(line.render(), "SS: 0.5000 UU: 0.1235 H: 1.0000");
        assert_eq!(line.to_string(), line.render());
    }

    #[test]
    fn nan_renders_without_panicking() {
        let line = MetricLine::new().push("H", f64::NAN);
        assert_eq!(line.render(), "H: NaN");
    }

    #[test]
    fn log_has_header_and_appends_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("runs").join("logcub.txt");
        let started = DateTime::parse_from_rfc3339("2026-01-01T12:30:00Z")
            .expect("parse RFC3339")
            .with_timezone(&Utc);
        let log = RunLog::create_at(&path, "checkpoints/cub", started).expect("create");
        log.log_print("first").expect("first");
        log.append("second").expect("second");

        let content = std::fs::read_to_string(&path).expect("read");
        assert_eq!(
            content,
            "Training Start:Thu, 01 Jan 2026 12:30:00 +0000\ncheckpoints/cub\nfirst\nsecond\n"
        );
    }

    #[test]
    fn missing_log_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = RunLog::attach(dir.path().join("absent").join("log.txt"));
        let err = log.log_print("line").unwrap_err();
        assert!(err.to_string().contains("open run log"));
    }

    #[test]
    fn json_report_is_pretty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.json");
        write_json_report(&path, &serde_json::json!({"h": 0.5})).expect("write");
        let raw = std::fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"h\": 0.5"));
    }
}
