//! # sheetvision
//!
//! Enrich spreadsheets with data extracted from website screenshots using
//! Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Spreadsheets full of company URLs are everywhere — CRM exports, lead
//! lists, supplier registers — and the questions people ask of them
//! ("what does this company do?", "do they list pricing?") live on the
//! websites, not in the cells. This crate visits each row's URL in a
//! headless browser, captures a full-page screenshot, lets a VLM read the
//! page as a human would, and writes the answers into new columns of an
//! enriched copy of the workbook.
//!
//! ## Pipeline Overview
//!
//! ```text
//! workbook.xlsx
//!  │
//!  ├─ 1. Load      read the workbook, resolve the URL column (fail fast)
//!  ├─ 2. Columns   append one result column per extraction field
//!  └─ 3. Per row   (strictly sequential)
//!      ├─ Snapshot  full-page PNG via headless Chromium
//!      ├─ Extract   ONE batched VLM call for all fields → JSON object
//!      ├─ Write     one cell per field (errors become cell text)
//!      └─ Persist   save the whole workbook (crash loses ≤ 1 row)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sheetvision::{enrich, EnrichmentConfig, FieldSpec};
//! use sheetvision::snapshot::{ChromiumSnapshotter, SnapshotterConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let browser = Arc::new(ChromiumSnapshotter::launch(SnapshotterConfig::default()).await?);
//!
//!     let config = EnrichmentConfig::builder()
//!         .website_column("Website")
//!         .field(FieldSpec::new("Summary", "Summarize what this company does"))
//!         .field(FieldSpec::new("Industry", "What industry is this company in?"))
//!         .output_path("enriched.xlsx")
//!         .snapshot_dir("screenshots")
//!         .snapshot_provider(browser.clone())
//!         .build()?;
//!
//!     let output = enrich("companies.xlsx", &config).await?;
//!     println!("Wrote {}", output.output_path.display());
//!     eprintln!(
//!         "{}/{} rows enriched, {} failed",
//!         output.stats.processed_rows, output.stats.total_rows, output.stats.failed_rows
//!     );
//!
//!     // Release the browser once all runs are done (the config holds a
//!     // clone of the handle, so it must be dropped first).
//!     drop(config);
//!     if let Ok(browser) = Arc::try_unwrap(browser) {
//!         browser.close().await;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Failure model
//!
//! One bad row never aborts a run: its result cells carry the error text
//! and the loop continues. Fatal errors are confined to pre-flight (input
//! unreadable, URL column missing — nothing written yet) and persistence
//! (the output file stopped being writable). See [`error`] for the full
//! taxonomy.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `sheetvision` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! sheetvision = { version = "0.4", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod enrich;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EnrichmentConfig, EnrichmentConfigBuilder, FieldSpec, WorkspaceConfig};
pub use enrich::{enrich, enrich_sync, inspect};
pub use error::{EnrichError, RowError};
pub use output::{EnrichmentOutput, EnrichmentStats, RowOutcome, RowRecord, WorkbookInfo};
pub use pipeline::extract::{
    ExtractError, ExtractionOutcome, ExtractionProvider, UsageMeter, VisionExtractor,
};
pub use pipeline::sheet::{CellValue, SheetDocument, COMPLEX_VALUE_MARKER};
pub use pipeline::snapshot;
pub use pipeline::snapshot::{SnapshotError, SnapshotProvider};
pub use progress::{EnrichmentProgressCallback, NoopProgressCallback, ProgressCallback};
