//! Split report model.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Counters and diagnostics for one `split_workbook` run.
#[derive(Debug, Default, Clone)]
pub struct ReportSplit {
    /// Source sheet that was split.
    pub sheet_name: String,
    /// 1-based row where data starts.
    pub n_row_data_start: usize,
    /// Total rows held by the source sheet.
    pub cnt_rows_scanned: u64,
    /// Header rows copied into every output.
    pub cnt_rows_header: u64,
    /// Rows passing the identifier rule.
    pub cnt_rows_valid: u64,
    /// Rows at or below the boundary that were dropped.
    pub cnt_rows_dropped: u64,
    /// Row count of each planned chunk, in order.
    pub chunk_sizes: Vec<usize>,
    /// Output files written, in order. Empty on dry run.
    pub files_written: Vec<PathBuf>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
    /// Whether the run planned only.
    pub if_dry_run: bool,
    /// Wall time of the whole call.
    pub duration_elapsed: Duration,
}

impl ReportSplit {
    /// Record a warning and emit it through `tracing`.
    pub fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }

    /// Number of planned chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunk_sizes.len()
    }

    /// Number of collected warnings.
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    /// Machine-readable counters.
    pub fn to_dict(&self) -> BTreeMap<String, u64> {
        let mut dict_counts = BTreeMap::new();
        dict_counts.insert("cnt_rows_scanned".to_string(), self.cnt_rows_scanned);
        dict_counts.insert("cnt_rows_header".to_string(), self.cnt_rows_header);
        dict_counts.insert("cnt_rows_valid".to_string(), self.cnt_rows_valid);
        dict_counts.insert("cnt_rows_dropped".to_string(), self.cnt_rows_dropped);
        dict_counts.insert("cnt_chunks".to_string(), self.chunk_count() as u64);
        dict_counts.insert("cnt_files".to_string(), self.files_written.len() as u64);
        dict_counts.insert("cnt_warnings".to_string(), self.warning_count() as u64);
        dict_counts
    }

    /// Human-readable one-line summary.
    pub fn format(&self, prefix: &str) -> String {
        let dict_counts = self.to_dict();
        format!(
            "{prefix} sheet={:?} data_start={} scanned={} header={} valid={} dropped={} chunks={} files={} warnings={} elapsed={:.3}s",
            self.sheet_name,
            self.n_row_data_start,
            dict_counts["cnt_rows_scanned"],
            dict_counts["cnt_rows_header"],
            dict_counts["cnt_rows_valid"],
            dict_counts["cnt_rows_dropped"],
            dict_counts["cnt_chunks"],
            dict_counts["cnt_files"],
            dict_counts["cnt_warnings"],
            self.duration_elapsed.as_secs_f64()
        )
    }
}

impl fmt::Display for ReportSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format("[SPLIT]"))
    }
}
