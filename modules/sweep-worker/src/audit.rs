use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::SecondsFormat;
use tracing::info;

use sweep_common::{Detection, SweepError};

const HEADER: [&str; 3] = ["Timestamp", "Username", "Detection Reason"];

/// Written in place of an unreadable handle.
const UNKNOWN_HANDLE: &str = "(unknown)";

/// Append-only CSV record of every invalid verdict.
pub struct AuditSink {
    path: PathBuf,
}

impl AuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one row per detection. The header is written once, when the
    /// file is first created. Returns the number of rows written.
    pub fn append(&self, detections: &[Detection]) -> Result<usize, SweepError> {
        if detections.is_empty() {
            return Ok(0);
        }
        let persistence = |e: std::io::Error| SweepError::Persistence(e.to_string());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(persistence)?;
        let fresh = file.metadata().map_err(persistence)?.len() == 0;

        let mut out = String::new();
        if fresh {
            push_row(&mut out, &HEADER);
        }
        for d in detections {
            let timestamp = d.detected_at.to_rfc3339_opts(SecondsFormat::Secs, true);
            let handle = if d.handle.is_empty() {
                UNKNOWN_HANDLE
            } else {
                d.handle.as_str()
            };
            push_row(&mut out, &[timestamp.as_str(), handle, d.reason.label()]);
        }

        file.write_all(out.as_bytes()).map_err(persistence)?;
        file.flush().map_err(persistence)?;

        info!(
            path = %self.path.display(),
            rows = detections.len(),
            "Appended detections to audit export"
        );
        Ok(detections.len())
    }
}

fn push_row(out: &mut String, fields: &[&str]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape(field));
    }
    out.push('\n');
}

/// Quote a field when it contains a delimiter, quote or line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
