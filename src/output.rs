//! Output types for an enrichment run.
//!
//! Everything here is plain serialisable data: the CLI's `--json` mode and
//! host applications (desktop shells, services) persist or transmit these
//! structs directly, so they must round-trip through serde without loss.

use crate::error::RowError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The result of processing a single data row.
///
/// A record exists for every data row of the input, including skipped ones —
/// the run output mirrors the workbook row-for-row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowRecord {
    /// 1-based worksheet row number (header is row 1, first data row is 2).
    pub row: u32,
    /// The URL read from the website column, after coercion to a display
    /// string. Empty for skipped rows.
    pub url: String,
    /// What happened to the row.
    pub outcome: RowOutcome,
    /// Wall-clock time spent on this row (snapshot + extraction + write).
    pub duration_ms: u64,
    /// Extraction retries consumed before success or giving up.
    pub retries: u8,
}

/// Per-row outcome: enriched, skipped, or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RowOutcome {
    /// All result cells were written with extracted values.
    Enriched,
    /// The URL cell was empty; the row was bypassed untouched.
    Skipped,
    /// Snapshot or extraction failed; result cells carry the error text.
    Failed(RowError),
}

impl RowOutcome {
    /// True when the row's result cells hold extracted values.
    pub fn is_enriched(&self) -> bool {
        matches!(self, RowOutcome::Enriched)
    }
}

/// Aggregate statistics for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentStats {
    /// Data rows in the input workbook (header excluded).
    pub total_rows: usize,
    /// Rows enriched without error.
    pub processed_rows: usize,
    /// Rows whose snapshot or extraction failed.
    pub failed_rows: usize,
    /// Rows skipped for an empty URL cell.
    pub skipped_rows: usize,
    /// Wall-clock duration of the whole run.
    pub total_duration_ms: u64,
    /// Time spent inside snapshot capture across all rows.
    pub snapshot_duration_ms: u64,
    /// Time spent inside extraction calls across all rows.
    pub extraction_duration_ms: u64,
}

/// The complete result of a successful enrichment run.
///
/// "Successful" means the run terminated normally — individual rows may
/// still have failed; check [`EnrichmentStats::failed_rows`] or scan
/// [`EnrichmentOutput::rows`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentOutput {
    /// Where the enriched workbook was written.
    pub output_path: PathBuf,
    /// Ordered, human-readable run log (one entry per notable event).
    pub logs: Vec<String>,
    /// Per-row records in worksheet order.
    pub rows: Vec<RowRecord>,
    /// Aggregate statistics.
    pub stats: EnrichmentStats,
}

/// Workbook metadata returned by [`crate::enrich::inspect`].
///
/// Cheap to produce: no browser, no LLM provider, no output file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbookInfo {
    /// Worksheet names in workbook order.
    pub sheet_names: Vec<String>,
    /// Header-row column names of the first worksheet (empty cells skipped).
    pub columns: Vec<String>,
    /// Data-row count of the first worksheet (header excluded).
    pub total_rows: usize,
}
