//! Eager (full-run) enrichment entry points and the row loop.
//!
//! ## The shape of a run
//!
//! One run = one input workbook, processed strictly row by row. Rows are
//! never processed concurrently: the browser page and the extraction call
//! are the expensive, rate-sensitive resources, and the crash-safety
//! contract (persist the whole workbook after every row) requires that no
//! two rows race to serialise the same document. The suspension points —
//! snapshot capture, extraction, save — are awaited before the next row
//! begins.
//!
//! ## Failure isolation
//!
//! A row's snapshot/extraction failure is contained to that row: the error
//! text lands in its result cells, the log records it, and the loop moves
//! on. [`crate::error::EnrichError::ColumnNotFound`] aborts before the
//! output file exists; once rows are being processed, the only fatal error
//! is a failed save ([`crate::error::EnrichError::Persistence`]), because
//! without a writable output the partial-results guarantee is void.

use crate::config::EnrichmentConfig;
use crate::error::{EnrichError, RowError};
use crate::output::{EnrichmentOutput, EnrichmentStats, RowOutcome, RowRecord, WorkbookInfo};
use crate::pipeline::extract::{
    ExtractError, ExtractionOutcome, ExtractionProvider, VisionExtractor,
};
use crate::pipeline::sheet::SheetDocument;
use crate::pipeline::snapshot::{SnapshotError, SnapshotProvider};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Enrich a workbook: one snapshot + one extraction call per data row,
/// results appended as new columns, output persisted after every row.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `input`  — Path to the input xlsx workbook
/// * `config` — Run configuration (column, fields, providers, output path)
///
/// # Returns
/// `Ok(EnrichmentOutput)` when the run terminates normally, even if some
/// rows failed (check `output.stats.failed_rows`).
///
/// # Errors
/// Returns `Err(EnrichError)` only for fatal errors:
/// - Input missing / unreadable / not a workbook
/// - Website column not found (before any output is written)
/// - Output workbook could not be persisted
pub async fn enrich(
    input: impl AsRef<Path>,
    config: &EnrichmentConfig,
) -> Result<EnrichmentOutput, EnrichError> {
    let total_start = Instant::now();
    let input = input.as_ref();
    info!("Starting enrichment run: {}", input.display());

    // ── Step 1: Resolve providers ────────────────────────────────────────
    let snapshotter = config.snapshot_provider.clone().ok_or_else(|| {
        EnrichError::InvalidConfig("A snapshot provider must be injected".into())
    })?;
    let extractor = resolve_extractor(config)?;

    // ── Step 2: Load the workbook ────────────────────────────────────────
    let mut doc = SheetDocument::load(input)?;
    let mut logs: Vec<String> = Vec::new();

    // ── Step 3: Resolve the website column (fail fast) ───────────────────
    // Deliberately ahead of any output side effect: a typo'd column name
    // must not leave a half-created output file behind.
    let website_col = doc.find_column(&config.website_column).ok_or_else(|| {
        EnrichError::ColumnNotFound {
            column: config.website_column.clone(),
            available: doc.header_columns(),
        }
    })?;
    logs.push(format!(
        "Found website column \"{}\" at index {}",
        config.website_column, website_col
    ));

    // ── Step 4: Append result columns ────────────────────────────────────
    // The field → column mapping is captured exactly once, here. Result
    // writes use this mapping; nothing re-derives indices from the column
    // count later, so nothing can shift if the sheet grows.
    let mut result_columns: Vec<u32> = Vec::with_capacity(config.fields.len());
    for field in &config.fields {
        let col = doc.append_header_column(&field.column_name);
        logs.push(format!(
            "Added new column: \"{}\" at column index {}",
            field.column_name, col
        ));
        result_columns.push(col);
    }

    // ── Step 5: Header-only workbook is a valid terminal state ───────────
    let total_rows = doc.data_row_count();
    if total_rows == 0 {
        logs.push("No data rows found in the workbook.".to_string());
        doc.save(&config.output_path)?;
        logs.push(format!(
            "Saved file with headers (no data rows) to {}",
            config.output_path.display()
        ));
        if let Some(ref cb) = config.progress_callback {
            cb.on_run_start(0);
            cb.on_run_complete(0, 0);
        }
        return Ok(EnrichmentOutput {
            output_path: config.output_path.clone(),
            logs,
            rows: Vec::new(),
            stats: EnrichmentStats {
                total_duration_ms: total_start.elapsed().as_millis() as u64,
                ..Default::default()
            },
        });
    }

    std::fs::create_dir_all(&config.snapshot_dir).map_err(|e| {
        EnrichError::Internal(format!(
            "Failed to create snapshot directory {}: {e}",
            config.snapshot_dir.display()
        ))
    })?;

    logs.push(format!("Starting to process {total_rows} rows..."));
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(total_rows);
    }

    // ── Step 6: The row loop ─────────────────────────────────────────────
    let mut rows: Vec<RowRecord> = Vec::with_capacity(total_rows);
    let mut stats = EnrichmentStats {
        total_rows,
        ..Default::default()
    };

    for sheet_row in 2..=doc.row_count() {
        let row_index = (sheet_row - 2) as usize;
        let row_start = Instant::now();

        let url = doc.display_string(sheet_row, website_col);
        if url.trim().is_empty() {
            logs.push(format!("Row {sheet_row}: Empty website URL, skipping..."));
            stats.skipped_rows += 1;
            if let Some(ref cb) = config.progress_callback {
                cb.on_row_skipped(row_index, total_rows);
            }
            rows.push(RowRecord {
                row: sheet_row,
                url: String::new(),
                outcome: RowOutcome::Skipped,
                duration_ms: 0,
                retries: 0,
            });
            continue;
        }

        if let Some(ref cb) = config.progress_callback {
            let message = format!(
                "Processing row {} of {}: {}",
                row_index + 1,
                total_rows,
                url
            );
            cb.on_row_start(row_index, total_rows, &message);
        }
        logs.push(format!("Row {sheet_row}: Processing website \"{url}\"..."));

        let snapshot_path = config
            .snapshot_dir
            .join(format!("screenshot-row-{sheet_row}.png"));
        logs.push(format!(
            "Row {sheet_row}: Capturing snapshot of \"{url}\"..."
        ));

        let mut retries = 0u8;
        let outcome = match run_row(
            snapshotter.as_ref(),
            extractor.as_ref(),
            sheet_row,
            &url,
            &snapshot_path,
            config,
            &mut stats,
        )
        .await
        {
            Ok(extraction) => {
                logs.push(format!(
                    "Row {sheet_row}: Snapshot saved to \"{}\"",
                    snapshot_path.display()
                ));
                for (i, field) in config.fields.iter().enumerate() {
                    let value = extraction
                        .values
                        .get(&field.column_name)
                        .cloned()
                        .unwrap_or_default();
                    doc.set_cell_text(sheet_row, result_columns[i], &value);
                    logs.push(format!(
                        "Row {sheet_row}: Extracted value for \"{}\"",
                        field.column_name
                    ));
                }
                logs.push(format!("Row {sheet_row}: Processing completed"));
                retries = extraction.retries;
                stats.processed_rows += 1;
                if let Some(ref cb) = config.progress_callback {
                    cb.on_row_complete(row_index, total_rows);
                }
                RowOutcome::Enriched
            }
            Err(row_error) => {
                // Row-failure isolation: the error becomes cell content and
                // a log entry; it never aborts the run.
                let cell_text = row_error.cell_text();
                for &col in &result_columns {
                    doc.set_cell_text(sheet_row, col, &cell_text);
                }
                logs.push(format!("Row {sheet_row}: Error processing - {row_error}"));
                warn!("Row {sheet_row} failed: {row_error}");
                stats.failed_rows += 1;
                if let Some(ref cb) = config.progress_callback {
                    cb.on_row_error(row_index, total_rows, row_error.to_string());
                }
                RowOutcome::Failed(row_error)
            }
        };

        rows.push(RowRecord {
            row: sheet_row,
            url,
            outcome,
            duration_ms: row_start.elapsed().as_millis() as u64,
            retries,
        });

        // Persist after every row, success or failure: a crash costs at
        // most the in-flight row. A save failure is fatal.
        doc.save(&config.output_path)?;
        logs.push(format!(
            "Row {sheet_row}: Saved intermediate progress to {}",
            config.output_path.display()
        ));
    }

    // ── Step 7: Final save and summary ───────────────────────────────────
    logs.push("All rows processed, saving final enriched file...".to_string());
    doc.save(&config.output_path)?;
    logs.push(format!(
        "Enriched file saved to {}",
        config.output_path.display()
    ));

    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    info!(
        "Enrichment complete: {}/{} rows, {}ms total",
        stats.processed_rows, total_rows, stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(total_rows, stats.processed_rows);
    }

    Ok(EnrichmentOutput {
        output_path: config.output_path.clone(),
        logs,
        rows,
        stats,
    })
}

/// Synchronous wrapper around [`enrich`].
///
/// Creates a temporary tokio runtime internally.
pub fn enrich_sync(
    input: impl AsRef<Path>,
    config: &EnrichmentConfig,
) -> Result<EnrichmentOutput, EnrichError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| EnrichError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(enrich(input, config))
}

/// Read workbook metadata without enriching anything.
///
/// Does not require a browser or an LLM provider.
pub async fn inspect(input: impl AsRef<Path>) -> Result<WorkbookInfo, EnrichError> {
    let path = input.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || {
        let doc = SheetDocument::load(&path)?;
        Ok(WorkbookInfo {
            sheet_names: doc.sheet_names(),
            columns: doc.header_columns(),
            total_rows: doc.data_row_count(),
        })
    })
    .await
    .map_err(|e| EnrichError::Internal(format!("Inspect task panicked: {e}")))?
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Capture and extract for one row. Snapshot failure short-circuits:
/// extraction is never attempted against a missing or partial snapshot.
async fn run_row(
    snapshotter: &dyn SnapshotProvider,
    extractor: &dyn ExtractionProvider,
    sheet_row: u32,
    url: &str,
    snapshot_path: &Path,
    config: &EnrichmentConfig,
    stats: &mut EnrichmentStats,
) -> Result<ExtractionOutcome, RowError> {
    let snap_start = Instant::now();
    snapshotter
        .capture(url, snapshot_path)
        .await
        .map_err(|e| snapshot_row_error(sheet_row, e))?;
    stats.snapshot_duration_ms += snap_start.elapsed().as_millis() as u64;

    let extract_start = Instant::now();
    let outcome = extractor
        .extract(snapshot_path, url, &config.fields)
        .await
        .map_err(|e| extract_row_error(sheet_row, e))?;
    stats.extraction_duration_ms += extract_start.elapsed().as_millis() as u64;

    Ok(outcome)
}

/// Attach row context to a provider-level snapshot error.
fn snapshot_row_error(row: u32, e: SnapshotError) -> RowError {
    match e {
        SnapshotError::Navigation { url, detail } => RowError::Navigation { row, url, detail },
        SnapshotError::Timeout { url, secs } => RowError::CaptureTimeout { row, url, secs },
        SnapshotError::Capture { detail } => RowError::Capture { row, detail },
    }
}

/// Attach row context to a provider-level extraction error.
fn extract_row_error(row: u32, e: ExtractError) -> RowError {
    match e {
        ExtractError::Encode(err) => RowError::Extraction {
            row,
            retries: 0,
            detail: err.to_string(),
        },
        ExtractError::Failed { retries, detail } => RowError::Extraction {
            row,
            retries,
            detail,
        },
        ExtractError::MalformedResponse { detail } => RowError::MalformedResponse { row, detail },
    }
}

/// Resolve the extraction provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.extraction_provider`) — the caller
///    constructed and configured it entirely; used as-is. This is how tests
///    substitute a fake, and how hosts add middleware (caching, metering).
///
/// 2. **Named provider + model** (`config.provider_name`) — resolved via
///    [`ProviderFactory::create_llm_provider`], which reads the matching
///    API key (`OPENAI_API_KEY`, etc.) from the environment.
///
/// 3. **Full auto-detection** — an `OPENAI_API_KEY` wins when present (the
///    common multi-key setup), otherwise [`ProviderFactory::from_env`] scans
///    all known key variables and picks the first available provider.
fn resolve_extractor(
    config: &EnrichmentConfig,
) -> Result<Arc<dyn ExtractionProvider>, EnrichError> {
    if let Some(ref provider) = config.extraction_provider {
        return Ok(Arc::clone(provider));
    }

    let llm = resolve_llm_provider(config)?;
    Ok(Arc::new(VisionExtractor::from_config(llm, config)))
}

fn resolve_llm_provider(config: &EnrichmentConfig) -> Result<Arc<dyn LLMProvider>, EnrichError> {
    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-mini");
        return create_vision_provider(name, model);
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-mini");
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| EnrichError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {e}"
            ),
        })?;

    Ok(llm_provider)
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, EnrichError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        EnrichError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_errors_map_to_row_errors() {
        let e = snapshot_row_error(
            4,
            SnapshotError::Timeout {
                url: "acme.com".into(),
                secs: 60,
            },
        );
        match e {
            RowError::CaptureTimeout { row, secs, .. } => {
                assert_eq!(row, 4);
                assert_eq!(secs, 60);
            }
            other => panic!("expected CaptureTimeout, got {other:?}"),
        }
    }

    #[test]
    fn extract_errors_keep_retry_count() {
        let e = extract_row_error(
            2,
            ExtractError::Failed {
                retries: 3,
                detail: "HTTP 503".into(),
            },
        );
        match e {
            RowError::Extraction { row, retries, .. } => {
                assert_eq!(row, 2);
                assert_eq!(retries, 3);
            }
            other => panic!("expected Extraction, got {other:?}"),
        }
    }

    #[test]
    fn malformed_response_maps_to_its_own_variant() {
        let e = extract_row_error(
            2,
            ExtractError::MalformedResponse {
                detail: "expected a JSON object".into(),
            },
        );
        assert!(matches!(e, RowError::MalformedResponse { row: 2, .. }));
    }
}
