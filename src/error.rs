//! Error types for the sheetvision library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`EnrichError`] — **Fatal**: the run cannot proceed at all (unreadable
//!   input workbook, target column missing, output file unwritable, provider
//!   not configured). Returned as `Err(EnrichError)` from the top-level
//!   `enrich*` functions.
//!
//! * [`RowError`] — **Non-fatal**: a single row failed (navigation error,
//!   capture timeout, malformed model response) but all other rows are fine.
//!   Stored inside [`crate::output::RowRecord`] and written as error text
//!   into that row's result cells, so callers get partial success rather
//!   than losing the whole spreadsheet to one bad row.
//!
//! The one asymmetry worth knowing: a failure while *persisting* the output
//! workbook is always fatal ([`EnrichError::Persistence`]), even mid-run —
//! once the durable sink is gone there is no safe way to keep recording
//! results.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the sheetvision library.
///
/// Row-level failures use [`RowError`] and are stored in
/// [`crate::output::RowRecord`] rather than propagated here.
#[derive(Debug, Error)]
pub enum EnrichError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input workbook was not found at the given path.
    #[error("Workbook not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// Process does not have read permission on the input file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not an xlsx workbook.
    #[error("File is not a valid xlsx workbook: '{path}'\nFirst bytes: {magic:?}")]
    NotAWorkbook { path: PathBuf, magic: [u8; 4] },

    /// The workbook could not be parsed.
    #[error("Failed to parse workbook '{path}': {detail}")]
    WorkbookParse { path: PathBuf, detail: String },

    /// The workbook contains no worksheets.
    #[error("Workbook '{path}' contains no worksheets")]
    NoWorksheet { path: PathBuf },

    // ── Pre-flight errors ─────────────────────────────────────────────────
    /// The configured website column does not match any header cell.
    ///
    /// Matching is exact (after coercing the header cell to its display
    /// string) — no case folding, no prefix matching. The available headers
    /// are carried so the caller can present a useful correction hint.
    #[error("Website column \"{column}\" not found in workbook\nAvailable columns: {}", .available.join(", "))]
    ColumnNotFound {
        column: String,
        available: Vec<String>,
    },

    // ── Provider errors ───────────────────────────────────────────────────
    /// The configured extraction provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not write the enriched workbook.
    ///
    /// Fatal even when it happens after some rows already succeeded: the
    /// crash-safety contract is that the output file trails the run by at
    /// most one row, and that cannot be honoured without a writable sink.
    #[error("Failed to write output workbook '{path}': {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single row.
///
/// Stored alongside [`crate::output::RowRecord`] when a row fails, and
/// written (prefixed with `Error processing: `) into every result cell of
/// that row. The overall run continues regardless.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum RowError {
    /// The browser could not navigate to the row's URL.
    #[error("Row {row}: navigation to '{url}' failed: {detail}")]
    Navigation {
        row: u32,
        url: String,
        detail: String,
    },

    /// Snapshot capture exceeded the configured timeout.
    #[error("Row {row}: capture of '{url}' timed out after {secs}s")]
    CaptureTimeout { row: u32, url: String, secs: u64 },

    /// The page loaded but the screenshot could not be taken or written.
    #[error("Row {row}: snapshot capture failed: {detail}")]
    Capture { row: u32, detail: String },

    /// The extraction call failed after all retries.
    #[error("Row {row}: extraction failed after {retries} retries: {detail}")]
    Extraction {
        row: u32,
        retries: u8,
        detail: String,
    },

    /// The model responded, but not with the requested JSON shape.
    ///
    /// This is an error, not a partial result: a response we cannot map
    /// back to field names would silently misalign columns.
    #[error("Row {row}: malformed extraction response: {detail}")]
    MalformedResponse { row: u32, detail: String },
}

impl RowError {
    /// The prefixed message written into each result cell of a failed row.
    pub fn cell_text(&self) -> String {
        format!("Error processing: {}", self)
    }
}
