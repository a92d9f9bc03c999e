//! Progress-callback trait for per-row enrichment events.
//!
//! Inject an [`Arc<dyn EnrichmentProgressCallback>`] via
//! [`crate::config::EnrichmentConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline works through each row.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a Tokio broadcast channel, an IPC bridge to a desktop
//! shell, a database record, or a terminal progress bar — without the library
//! knowing anything about how the host application communicates. The sink is
//! strictly fire-and-forget: every method returns `()`, so a sink cannot
//! fail or stall the pipeline by construction.
//!
//! # Example
//!
//! ```rust
//! use sheetvision::EnrichmentProgressCallback;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl EnrichmentProgressCallback for CountingCallback {
//!     fn on_row_complete(&self, row_index: usize, total_rows: usize) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("Row {}/{} done ({} so far)", row_index + 1, total_rows, done);
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the enrichment pipeline as it processes each row.
///
/// Implementations must be `Send + Sync` (the callback is shared behind an
/// `Arc` and may be invoked from a spawned task). All methods have default
/// no-op implementations so callers only override what they care about.
///
/// Rows are processed strictly sequentially, so within one run the events
/// arrive in row order and `row_index` is monotonically increasing.
/// `row_index` is 0-based among data rows (the header row is not counted).
pub trait EnrichmentProgressCallback: Send + Sync {
    /// Called once before any row is processed.
    ///
    /// # Arguments
    /// * `total_rows` — number of data rows in the workbook
    fn on_run_start(&self, total_rows: usize) {
        let _ = total_rows;
    }

    /// Called just before a row's snapshot is captured.
    ///
    /// # Arguments
    /// * `row_index`  — 0-based data-row index
    /// * `total_rows` — total data rows
    /// * `message`    — human-readable description naming the row's URL
    fn on_row_start(&self, row_index: usize, total_rows: usize, message: &str) {
        let _ = (row_index, total_rows, message);
    }

    /// Called when a row's result cells have been written successfully.
    fn on_row_complete(&self, row_index: usize, total_rows: usize) {
        let _ = (row_index, total_rows);
    }

    /// Called when a row fails (snapshot or extraction) after all retries.
    ///
    /// The row's result cells carry the same error text; the run continues.
    fn on_row_error(&self, row_index: usize, total_rows: usize, error: String) {
        let _ = (row_index, total_rows, error);
    }

    /// Called when a row is skipped because its URL cell is empty.
    ///
    /// Skipped rows get no snapshot, no extraction, and empty result cells.
    fn on_row_skipped(&self, row_index: usize, total_rows: usize) {
        let _ = (row_index, total_rows);
    }

    /// Called once after all rows have been attempted.
    ///
    /// # Arguments
    /// * `total_rows`    — total data rows in the workbook
    /// * `success_count` — rows enriched without error
    fn on_run_complete(&self, total_rows: usize, success_count: usize) {
        let _ = (total_rows, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl EnrichmentProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::EnrichmentConfig`].
pub type ProgressCallback = Arc<dyn EnrichmentProgressCallback>;
