//! CSV audit report for dry runs.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use unitmap_core::OutcomeRow;

pub const DEFAULT_REPORT_PATH: &str = "dry_run_bu_assignments.csv";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("writing report {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("flushing report {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct AuditReport {
    path: PathBuf,
}

impl Default for AuditReport {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_PATH)
    }
}

impl AuditReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrites the report with a header plus one line per row and returns the row count.
    /// Nothing is written when `rows` is empty.
    pub fn write(&self, rows: &[OutcomeRow]) -> Result<usize, ReportError> {
        if rows.is_empty() {
            info!(path = %self.path.display(), "no rows to write to report");
            return Ok(0);
        }

        let csv_err = |source| ReportError::Csv {
            path: self.path.clone(),
            source,
        };
        let mut writer = csv::Writer::from_path(&self.path).map_err(csv_err)?;
        for row in rows {
            writer.serialize(row).map_err(csv_err)?;
        }
        writer.flush().map_err(|source| ReportError::Io {
            path: self.path.clone(),
            source,
        })?;

        info!(path = %self.path.display(), rows = rows.len(), "wrote dry-run report");
        Ok(rows.len())
    }
}
