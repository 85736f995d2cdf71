//! HTTP access log in Apache combined format.
//!
//! ```text
//! 192.168.1.20 - - [17/Oct/2026:10:15:32 +0200] "GET /eSCL/ScannerStatus" 200 812 "-" "AirScanScanner/3.0"
//! ```
//!
//! Document responses are logged once the page has been streamed, so the
//! byte count reflects what the client actually received.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Local};
use parking_lot::Mutex;

/// One served request.
#[derive(Debug, Clone)]
pub struct AccessEntry {
    pub peer: Option<IpAddr>,
    pub time: DateTime<Local>,
    pub method: String,
    pub uri: String,
    pub status: u16,
    /// `None` renders as `-`.
    pub bytes: Option<u64>,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
}

impl AccessEntry {
    /// Renders the entry as one combined-format line, without line terminator.
    pub fn format_combined(&self) -> String {
        let peer = self
            .peer
            .map_or_else(|| "-".to_owned(), |ip| ip.to_string());
        let bytes = self
            .bytes
            .filter(|&b| b > 0)
            .map_or_else(|| "-".to_owned(), |b| b.to_string());
        format!(
            "{peer} - - [{time}] \"{method} {uri}\" {status} {bytes} \"{referer}\" \"{agent}\"",
            time = self.time.format("%d/%b/%Y:%H:%M:%S %z"),
            method = self.method,
            uri = self.uri,
            status = self.status,
            referer = quoted(self.referer.as_deref()),
            agent = quoted(self.user_agent.as_deref()),
        )
    }
}

fn quoted(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.replace('"', "\\\""),
        _ => "-".to_owned(),
    }
}

/// Access log target.
#[derive(Debug)]
pub enum AccessLog {
    Disabled,
    Stdout,
    File(Mutex<File>),
}

impl AccessLog {
    /// `""` disables logging, `"-"` writes to stdout, anything else is a
    /// file path opened for appending.
    pub fn open(target: &str) -> Result<Self> {
        match target {
            "" => Ok(Self::Disabled),
            "-" => Ok(Self::Stdout),
            path => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(Path::new(path))
                    .map_err(|e| anyhow::anyhow!("failed to open access log {}: {}", path, e))?;
                Ok(Self::File(Mutex::new(file)))
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Appends one entry. Write failures are logged and otherwise ignored.
    pub fn record(&self, entry: &AccessEntry) {
        let result = match self {
            Self::Disabled => return,
            Self::Stdout => writeln!(io::stdout().lock(), "{}", entry.format_combined()),
            Self::File(file) => writeln!(file.lock(), "{}", entry.format_combined()),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to write access log entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry() -> AccessEntry {
        AccessEntry {
            peer: Some("192.168.1.20".parse().unwrap()),
            time: Local.with_ymd_and_hms(2026, 10, 17, 10, 15, 32).unwrap(),
            method: "GET".to_owned(),
            uri: "/eSCL/ScannerStatus".to_owned(),
            status: 200,
            bytes: Some(812),
            referer: None,
            user_agent: Some("AirScanScanner/3.0".to_owned()),
        }
    }

    #[test]
    fn combined_format_fields() {
        let line = entry().format_combined();
        assert!(line.starts_with("192.168.1.20 - - [17/Oct/2026:10:15:32 "));
        assert!(line.ends_with("] \"GET /eSCL/ScannerStatus\" 200 812 \"-\" \"AirScanScanner/3.0\""));
    }

    #[test]
    fn missing_values_render_as_dash() {
        let mut entry = entry();
        entry.peer = None;
        entry.bytes = Some(0);
        entry.user_agent = Some(String::new());
        let line = entry.format_combined();
        assert!(line.starts_with("- - - ["));
        assert!(line.ends_with(" 200 - \"-\" \"-\""));
    }

    #[test]
    fn quotes_in_user_agent_are_escaped() {
        let mut entry = entry();
        entry.user_agent = Some("evil\" agent".to_owned());
        assert!(entry.format_combined().ends_with("\"evil\\\" agent\""));
    }

    #[test]
    fn file_target_appends_lines() {
        // Given
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        let log = AccessLog::open(path.to_str().unwrap()).unwrap();
        assert!(log.is_enabled());

        // When
        log.record(&entry());
        log.record(&entry());

        // Then
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn empty_target_disables_logging() {
        let log = AccessLog::open("").unwrap();
        assert!(!log.is_enabled());
        log.record(&entry());
    }
}
