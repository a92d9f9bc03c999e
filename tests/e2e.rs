//! End-to-end integration tests for sheetvision.
//!
//! The bulk of these run the real pipeline — real xlsx files on disk, real
//! per-row persistence — against fake snapshot/extraction providers, so
//! they are fast, deterministic, and always on.
//!
//! The final test drives a live headless browser and a live LLM API. It is
//! gated behind the `E2E_ENABLED` environment variable so it does not run
//! in CI unless explicitly requested:
//!
//!   E2E_ENABLED=1 OPENAI_API_KEY=sk-... cargo test --test e2e -- --nocapture

use async_trait::async_trait;
use sheetvision::snapshot::{SnapshotError, SnapshotProvider};
use sheetvision::{
    enrich, inspect, EnrichError, EnrichmentConfig, EnrichmentProgressCallback, ExtractError,
    ExtractionOutcome, ExtractionProvider, FieldSpec, RowOutcome, SheetDocument,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Test fakes ───────────────────────────────────────────────────────────────

/// Snapshot fake: records URLs, writes a stub PNG, fails for URLs
/// containing `fail_on`.
#[derive(Default)]
struct FakeBrowser {
    fail_on: Option<String>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl SnapshotProvider for FakeBrowser {
    async fn capture(&self, url: &str, output_path: &Path) -> Result<PathBuf, SnapshotError> {
        if let Some(ref needle) = self.fail_on {
            if url.contains(needle.as_str()) {
                return Err(SnapshotError::Navigation {
                    url: url.to_string(),
                    detail: "net::ERR_NAME_NOT_RESOLVED".into(),
                });
            }
        }
        self.calls.lock().unwrap().push(url.to_string());
        std::fs::write(output_path, b"\x89PNG\r\n\x1a\n").map_err(|e| SnapshotError::Capture {
            detail: e.to_string(),
        })?;
        Ok(output_path.to_path_buf())
    }
}

/// Extraction fake: returns `"{field} of {url}"` per field, fails for URLs
/// containing `fail_on`, and can run an assertion hook before answering.
#[derive(Default)]
struct FakeExtractor {
    fail_on: Option<String>,
    calls: Mutex<Vec<String>>,
    /// Invoked with the URL before producing values (used to observe
    /// on-disk state mid-run).
    hook: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

#[async_trait]
impl ExtractionProvider for FakeExtractor {
    async fn extract(
        &self,
        image_path: &Path,
        url: &str,
        fields: &[FieldSpec],
    ) -> Result<ExtractionOutcome, ExtractError> {
        assert!(image_path.exists(), "extraction must see the snapshot file");
        if let Some(ref hook) = self.hook {
            hook(url);
        }
        if let Some(ref needle) = self.fail_on {
            if url.contains(needle.as_str()) {
                return Err(ExtractError::Failed {
                    retries: 3,
                    detail: "HTTP 503".into(),
                });
            }
        }
        self.calls.lock().unwrap().push(url.to_string());
        let mut values = HashMap::new();
        for field in fields {
            values.insert(field.column_name.clone(), format!("{} of {url}", field.column_name));
        }
        Ok(ExtractionOutcome { values, retries: 0 })
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Write an xlsx with the given rows (row 0 is the header) and return its path.
fn write_workbook(dir: &TempDir, rows: &[&[&str]]) -> PathBuf {
    let path = dir.path().join("input.xlsx");
    let mut doc = SheetDocument::new_in_memory();
    for (r, cells) in rows.iter().enumerate() {
        for (c, value) in cells.iter().enumerate() {
            if !value.is_empty() {
                doc.set_cell_text((r + 1) as u32, (c + 1) as u32, value);
            }
        }
    }
    doc.save(&path).expect("write input workbook");
    path
}

struct TestRun {
    dir: TempDir,
    browser: Arc<FakeBrowser>,
    extractor: Arc<FakeExtractor>,
}

impl TestRun {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
            browser: Arc::new(FakeBrowser::default()),
            extractor: Arc::new(FakeExtractor::default()),
        }
    }

    fn output_path(&self) -> PathBuf {
        self.dir.path().join("enriched.xlsx")
    }

    fn config(&self, column: &str, fields: Vec<FieldSpec>) -> EnrichmentConfig {
        EnrichmentConfig::builder()
            .website_column(column)
            .fields(fields)
            .output_path(self.output_path())
            .snapshot_dir(self.dir.path().join("screenshots"))
            .snapshot_provider(self.browser.clone() as Arc<dyn SnapshotProvider>)
            .extraction_provider(self.extractor.clone() as Arc<dyn ExtractionProvider>)
            .build()
            .expect("valid config")
    }
}

fn summary_field() -> FieldSpec {
    FieldSpec::new("Summary", "Summarize the homepage")
}

// ── Scenario A: basic enrichment ─────────────────────────────────────────────

#[tokio::test]
async fn enriches_one_row_and_appends_header() {
    let run = TestRun::new();
    let input = write_workbook(&run.dir, &[&["Company", "Website"], &["Acme", "acme.com"]]);
    let config = run.config("Website", vec![summary_field()]);

    let output = enrich(&input, &config).await.expect("run should succeed");

    assert_eq!(output.stats.total_rows, 1);
    assert_eq!(output.stats.processed_rows, 1);
    assert_eq!(output.stats.failed_rows, 0);
    assert!(output.rows[0].outcome.is_enriched());

    let enriched = SheetDocument::load(&output.output_path).expect("load output");
    assert_eq!(
        enriched.header_columns(),
        vec!["Company", "Website", "Summary"]
    );
    assert_eq!(enriched.display_string(2, 1), "Acme");
    assert_eq!(enriched.display_string(2, 2), "acme.com");
    assert_eq!(enriched.display_string(2, 3), "Summary of acme.com");

    // One snapshot, one extraction call, both for the row's URL.
    assert_eq!(run.browser.calls.lock().unwrap().as_slice(), &["acme.com"]);
    assert_eq!(run.extractor.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn appends_fields_in_definition_order() {
    let run = TestRun::new();
    let input = write_workbook(&run.dir, &[&["Company", "Website"], &["Acme", "acme.com"]]);
    let config = run.config(
        "Website",
        vec![
            summary_field(),
            FieldSpec::new("Industry", "What industry?"),
        ],
    );

    let output = enrich(&input, &config).await.expect("run should succeed");

    let enriched = SheetDocument::load(&output.output_path).expect("load output");
    assert_eq!(
        enriched.header_columns(),
        vec!["Company", "Website", "Summary", "Industry"]
    );
    assert_eq!(enriched.display_string(2, 3), "Summary of acme.com");
    assert_eq!(enriched.display_string(2, 4), "Industry of acme.com");
}

// ── Scenario B: empty URL skip ───────────────────────────────────────────────

#[tokio::test]
async fn skips_rows_with_empty_url() {
    let run = TestRun::new();
    let input = write_workbook(
        &run.dir,
        &[
            &["Company", "Website"],
            &["NoSite Ltd", ""],
            &["Acme", "acme.com"],
        ],
    );
    let config = run.config("Website", vec![summary_field()]);

    let output = enrich(&input, &config).await.expect("run should succeed");

    assert_eq!(output.stats.skipped_rows, 1);
    assert_eq!(output.stats.processed_rows, 1);
    assert!(matches!(output.rows[0].outcome, RowOutcome::Skipped));

    // The skipped row's result cell stays empty — not error text.
    let enriched = SheetDocument::load(&output.output_path).expect("load output");
    assert_eq!(enriched.display_string(2, 3), "");
    assert_eq!(enriched.display_string(3, 3), "Summary of acme.com");

    // No snapshot or extraction was attempted for the empty row.
    assert_eq!(run.browser.calls.lock().unwrap().as_slice(), &["acme.com"]);
    assert_eq!(run.extractor.calls.lock().unwrap().as_slice(), &["acme.com"]);

    assert!(
        output
            .logs
            .iter()
            .any(|l| l.contains("Row 2") && l.contains("Empty website URL, skipping")),
        "log should record the skip: {:#?}",
        output.logs
    );
}

// ── Scenario C: column not found ─────────────────────────────────────────────

#[tokio::test]
async fn unknown_column_fails_before_writing_output() {
    let run = TestRun::new();
    let input = write_workbook(&run.dir, &[&["Company", "Website"], &["Acme", "acme.com"]]);
    let config = run.config("WebsiteURL", vec![summary_field()]);

    let err = enrich(&input, &config).await.unwrap_err();
    match err {
        EnrichError::ColumnNotFound { column, available } => {
            assert_eq!(column, "WebsiteURL");
            assert_eq!(available, vec!["Company", "Website"]);
        }
        other => panic!("expected ColumnNotFound, got {other:?}"),
    }

    // Fatal pre-flight: no output file, no snapshots, no extractions.
    assert!(!run.output_path().exists());
    assert!(run.browser.calls.lock().unwrap().is_empty());
    assert!(run.extractor.calls.lock().unwrap().is_empty());
}

// ── Scenario D: row-failure isolation ────────────────────────────────────────

#[tokio::test]
async fn one_failing_row_does_not_abort_the_run() {
    let run = TestRun::new();
    let input = write_workbook(
        &run.dir,
        &[
            &["Company", "Website"],
            &["A", "a.example"],
            &["B", "b.example"],
            &["C", "c-broken.example"],
            &["D", "d.example"],
            &["E", "e.example"],
        ],
    );
    let browser = Arc::new(FakeBrowser {
        fail_on: Some("broken".into()),
        ..Default::default()
    });
    let config = EnrichmentConfig::builder()
        .website_column("Website")
        .fields(vec![summary_field(), FieldSpec::new("Industry", "Which?")])
        .output_path(run.output_path())
        .snapshot_dir(run.dir.path().join("screenshots"))
        .snapshot_provider(browser.clone() as Arc<dyn SnapshotProvider>)
        .extraction_provider(run.extractor.clone() as Arc<dyn ExtractionProvider>)
        .build()
        .expect("valid config");

    let output = enrich(&input, &config).await.expect("run should succeed");

    assert_eq!(output.stats.total_rows, 5);
    assert_eq!(output.stats.processed_rows, 4);
    assert_eq!(output.stats.failed_rows, 1);
    assert!(matches!(output.rows[2].outcome, RowOutcome::Failed(_)));

    let enriched = SheetDocument::load(&output.output_path).expect("load output");

    // Healthy rows have values.
    assert_eq!(enriched.display_string(2, 3), "Summary of a.example");
    assert_eq!(enriched.display_string(6, 3), "Summary of e.example");

    // Every result cell of the failed row carries the same prefixed error.
    let err_summary = enriched.display_string(4, 3);
    let err_industry = enriched.display_string(4, 4);
    assert!(
        err_summary.starts_with("Error processing: "),
        "got: {err_summary}"
    );
    assert_eq!(err_summary, err_industry);

    // The failed row never reached extraction.
    assert!(!run
        .extractor
        .calls
        .lock()
        .unwrap()
        .iter()
        .any(|u| u.contains("broken")));

    assert!(output
        .logs
        .iter()
        .any(|l| l.contains("Row 4") && l.contains("Error processing")));
}

#[tokio::test]
async fn extraction_failure_is_isolated_too() {
    let run = TestRun::new();
    let input = write_workbook(
        &run.dir,
        &[
            &["Company", "Website"],
            &["A", "a.example"],
            &["B", "b-flaky.example"],
        ],
    );
    let extractor = Arc::new(FakeExtractor {
        fail_on: Some("flaky".into()),
        ..Default::default()
    });
    let config = EnrichmentConfig::builder()
        .website_column("Website")
        .field(summary_field())
        .output_path(run.output_path())
        .snapshot_dir(run.dir.path().join("screenshots"))
        .snapshot_provider(run.browser.clone() as Arc<dyn SnapshotProvider>)
        .extraction_provider(extractor as Arc<dyn ExtractionProvider>)
        .build()
        .expect("valid config");

    let output = enrich(&input, &config).await.expect("run should succeed");

    assert_eq!(output.stats.processed_rows, 1);
    assert_eq!(output.stats.failed_rows, 1);

    let enriched = SheetDocument::load(&output.output_path).expect("load output");
    assert!(enriched.display_string(3, 3).contains("HTTP 503"));
}

// ── Scenario E: duplicate field names ────────────────────────────────────────

#[tokio::test]
async fn duplicate_field_names_do_not_corrupt_other_columns() {
    let run = TestRun::new();
    let input = write_workbook(&run.dir, &[&["Company", "Website"], &["Acme", "acme.com"]]);
    let config = run.config(
        "Website",
        vec![
            FieldSpec::new("X", "first instruction"),
            FieldSpec::new("X", "second instruction"),
        ],
    );

    let output = enrich(&input, &config).await.expect("run should succeed");

    let enriched = SheetDocument::load(&output.output_path).expect("load output");
    // Both duplicates get their own column; originals are untouched.
    assert_eq!(enriched.header_columns(), vec!["Company", "Website", "X", "X"]);
    assert_eq!(enriched.display_string(2, 1), "Acme");
    assert_eq!(enriched.display_string(2, 2), "acme.com");
    assert_eq!(enriched.display_string(2, 3), "X of acme.com");
    assert_eq!(enriched.display_string(2, 4), "X of acme.com");
}

// ── Header-only input ────────────────────────────────────────────────────────

#[tokio::test]
async fn header_only_workbook_is_a_valid_terminal_state() {
    let run = TestRun::new();
    let input = write_workbook(&run.dir, &[&["Company", "Website"]]);
    let config = run.config("Website", vec![summary_field()]);

    let output = enrich(&input, &config).await.expect("run should succeed");

    assert_eq!(output.stats.total_rows, 0);
    assert!(output.rows.is_empty());
    assert!(output
        .logs
        .iter()
        .any(|l| l.contains("No data rows found")));

    let enriched = SheetDocument::load(&output.output_path).expect("load output");
    assert_eq!(
        enriched.header_columns(),
        vec!["Company", "Website", "Summary"]
    );
    assert_eq!(enriched.data_row_count(), 0);
    assert!(run.browser.calls.lock().unwrap().is_empty());
}

// ── Row-count invariant ──────────────────────────────────────────────────────

#[tokio::test]
async fn output_has_exactly_the_input_rows() {
    let run = TestRun::new();
    let input = write_workbook(
        &run.dir,
        &[
            &["Company", "Website"],
            &["A", "a.example"],
            &["B", ""],
            &["C", "c.example"],
        ],
    );
    let config = run.config("Website", vec![summary_field()]);

    let output = enrich(&input, &config).await.expect("run should succeed");

    let enriched = SheetDocument::load(&output.output_path).expect("load output");
    assert_eq!(enriched.data_row_count(), 3);
    assert_eq!(output.rows.len(), 3);
    // Order preserved: company names still in input order.
    assert_eq!(enriched.display_string(2, 1), "A");
    assert_eq!(enriched.display_string(3, 1), "B");
    assert_eq!(enriched.display_string(4, 1), "C");
}

// ── Crash-safety: incremental persistence ────────────────────────────────────

#[tokio::test]
async fn earlier_rows_are_persisted_before_later_rows_run() {
    let run = TestRun::new();
    let input = write_workbook(
        &run.dir,
        &[
            &["Company", "Website"],
            &["A", "first.example"],
            &["B", "second.example"],
        ],
    );

    // While row 2 ("second") is being extracted, row 1's result must
    // already be on disk — the output trails the run by at most one row.
    let output_path = run.output_path();
    let observed = Arc::new(Mutex::new(Vec::<String>::new()));
    let observed_in_hook = observed.clone();
    let extractor = Arc::new(FakeExtractor {
        hook: Some(Box::new(move |url: &str| {
            if url.contains("second") {
                let on_disk = SheetDocument::load(&output_path).expect("mid-run output");
                observed_in_hook
                    .lock()
                    .unwrap()
                    .push(on_disk.display_string(2, 3));
            }
        })),
        ..Default::default()
    });

    let config = EnrichmentConfig::builder()
        .website_column("Website")
        .field(summary_field())
        .output_path(run.output_path())
        .snapshot_dir(run.dir.path().join("screenshots"))
        .snapshot_provider(run.browser.clone() as Arc<dyn SnapshotProvider>)
        .extraction_provider(extractor as Arc<dyn ExtractionProvider>)
        .build()
        .expect("valid config");

    enrich(&input, &config).await.expect("run should succeed");

    assert_eq!(
        observed.lock().unwrap().as_slice(),
        &["Summary of first.example".to_string()],
        "row 1's value must be on disk before row 2 extracts"
    );
}

// ── Progress events ──────────────────────────────────────────────────────────

#[tokio::test]
async fn progress_events_arrive_in_row_order() {
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }
    impl EnrichmentProgressCallback for Recorder {
        fn on_run_start(&self, total: usize) {
            self.events.lock().unwrap().push(format!("start {total}"));
        }
        fn on_row_start(&self, row_index: usize, _total: usize, _message: &str) {
            self.events.lock().unwrap().push(format!("row {row_index}"));
        }
        fn on_row_complete(&self, row_index: usize, _total: usize) {
            self.events.lock().unwrap().push(format!("done {row_index}"));
        }
        fn on_row_skipped(&self, row_index: usize, _total: usize) {
            self.events.lock().unwrap().push(format!("skip {row_index}"));
        }
        fn on_run_complete(&self, _total: usize, success: usize) {
            self.events.lock().unwrap().push(format!("complete {success}"));
        }
    }

    let run = TestRun::new();
    let input = write_workbook(
        &run.dir,
        &[
            &["Company", "Website"],
            &["A", "a.example"],
            &["B", ""],
            &["C", "c.example"],
        ],
    );
    let recorder = Arc::new(Recorder::default());
    let config = EnrichmentConfig::builder()
        .website_column("Website")
        .field(summary_field())
        .output_path(run.output_path())
        .snapshot_dir(run.dir.path().join("screenshots"))
        .snapshot_provider(run.browser.clone() as Arc<dyn SnapshotProvider>)
        .extraction_provider(run.extractor.clone() as Arc<dyn ExtractionProvider>)
        .progress_callback(recorder.clone() as Arc<dyn EnrichmentProgressCallback>)
        .build()
        .expect("valid config");

    enrich(&input, &config).await.expect("run should succeed");

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "start 3", "row 0", "done 0", "skip 1", "row 2", "done 2", "complete 2"
        ]
    );
}

// ── Inspect ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn inspect_reports_columns_and_row_count() {
    let run = TestRun::new();
    let input = write_workbook(
        &run.dir,
        &[
            &["Company", "Website"],
            &["Acme", "acme.com"],
            &["Globex", "globex.example"],
        ],
    );

    let info = inspect(&input).await.expect("inspect should succeed");
    assert_eq!(info.columns, vec!["Company", "Website"]);
    assert_eq!(info.total_rows, 2);
    assert!(!info.sheet_names.is_empty());
}

#[tokio::test]
async fn inspect_nonexistent_file_fails() {
    let result = inspect("/definitely/not/a/real/file.xlsx").await;
    assert!(matches!(result, Err(EnrichError::InputNotFound { .. })));
}

// ── JSON serialisation of the run output ─────────────────────────────────────

#[tokio::test]
async fn run_output_is_json_serialisable() {
    let run = TestRun::new();
    let input = write_workbook(&run.dir, &[&["Company", "Website"], &["Acme", "acme.com"]]);
    let config = run.config("Website", vec![summary_field()]);

    let output = enrich(&input, &config).await.expect("run should succeed");

    let json = serde_json::to_string_pretty(&output).expect("must serialise to JSON");
    let back: sheetvision::EnrichmentOutput =
        serde_json::from_str(&json).expect("JSON must deserialise back");
    assert_eq!(back.stats.total_rows, output.stats.total_rows);
    assert_eq!(back.rows.len(), output.rows.len());
}

// ── Live e2e (gated) ─────────────────────────────────────────────────────────

/// Full stack: real headless browser, real vision LLM.
///
/// Requirements: `E2E_ENABLED=1`, a Chrome/Chromium install, and an API key
/// (`OPENAI_API_KEY` or another provider the factory can detect).
#[tokio::test]
async fn live_enrichment_of_example_com() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP — set E2E_ENABLED=1 to run live e2e tests");
        return;
    }
    if std::env::var("OPENAI_API_KEY").is_err() && std::env::var("ANTHROPIC_API_KEY").is_err() {
        println!("SKIP — no API key set");
        return;
    }

    use sheetvision::snapshot::{ChromiumSnapshotter, SnapshotterConfig};

    let dir = TempDir::new().expect("tempdir");
    let input = write_workbook(&dir, &[&["Company", "Website"], &["IANA", "example.com"]]);

    let browser = Arc::new(
        ChromiumSnapshotter::launch(SnapshotterConfig::default())
            .await
            .expect("browser must launch"),
    );

    let config = EnrichmentConfig::builder()
        .website_column("Website")
        .field(FieldSpec::new(
            "Summary",
            "Summarize this page in one sentence",
        ))
        .output_path(dir.path().join("enriched.xlsx"))
        .snapshot_dir(dir.path().join("screenshots"))
        .snapshot_provider(browser.clone() as Arc<dyn SnapshotProvider>)
        .max_retries(2)
        .build()
        .expect("valid config");

    let result = enrich(&input, &config).await;

    drop(config);
    if let Ok(browser) = Arc::try_unwrap(browser) {
        browser.close().await;
    }

    let output = result.expect("live run should succeed");
    assert_eq!(output.stats.processed_rows, 1);

    let enriched = SheetDocument::load(&output.output_path).expect("load output");
    let summary = enriched.display_string(2, 3);
    assert!(!summary.trim().is_empty(), "summary must not be empty");
    assert!(!summary.starts_with("Error processing:"), "got: {summary}");
    println!("Live summary for example.com: {summary}");
}
