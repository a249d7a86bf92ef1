//! Per-cycle trace records, written as JSON lines.
//!
//! ```text
//! {"timestamp":1760000000.0,"checks":[{"name":"keyboard","enabled":true,"alive":false}],"decision":"waiting","idle_in_secs":540.0}
//! ```

use crate::error::Result;
use crate::idle::IdleDecision;
use crate::monitor::{CheckVerdict, CycleReport};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One polling cycle.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub checks: Vec<CheckVerdict>,
    pub decision: &'static str,
    /// Seconds until the idle action runs if nothing happens.
    pub idle_in_secs: f64,
}

impl TraceRecord {
    pub fn new(report: &CycleReport, idle_in: Duration, at: SystemTime) -> Self {
        Self {
            timestamp: at
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_secs_f64(),
            checks: report.verdicts.clone(),
            decision: match report.decision {
                IdleDecision::Active => "active",
                IdleDecision::Waiting { .. } => "waiting",
                IdleDecision::Fire => "fire",
                IdleDecision::NoChecksEnabled => "no_checks_enabled",
            },
            idle_in_secs: idle_in.as_secs_f64(),
        }
    }
}

/// Appends trace records to a file.
pub struct TraceWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl TraceWriter {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, record: &TraceRecord) -> Result<()> {
        serde_json::to_writer(&mut self.out, record).map_err(std::io::Error::from)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}
