//! Configuration types for spreadsheet enrichment.
//!
//! All run behaviour is controlled through [`EnrichmentConfig`], built via
//! its [`EnrichmentConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across threads, serialise the plain parts for
//! logging, and diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely
//! on well-documented defaults for the rest.
//!
//! [`WorkspaceConfig`] is the on-disk `config.json` a host application drops
//! into a workspace directory; it maps onto the builder plus an input path.

use crate::error::EnrichError;
use crate::pipeline::extract::{ExtractionProvider, UsageMeter};
use crate::pipeline::snapshot::SnapshotProvider;
use crate::progress::ProgressCallback;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One named extraction field: produces one output column per run.
///
/// Identity is the `column_name`; the pipeline does not deduplicate names
/// (two fields with the same name each get their own appended column and
/// receive the same extracted value).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    /// Header text of the appended output column.
    pub column_name: String,
    /// Instruction handed to the vision model for this field.
    #[serde(alias = "prompt")]
    pub instruction: String,
}

impl FieldSpec {
    pub fn new(column_name: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            column_name: column_name.into(),
            instruction: instruction.into(),
        }
    }
}

/// Configuration for one enrichment run.
///
/// Built via [`EnrichmentConfig::builder()`].
///
/// # Example
/// ```rust,no_run
/// use sheetvision::{EnrichmentConfig, FieldSpec};
/// use sheetvision::snapshot::ChromiumSnapshotter;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let snapshotter = Arc::new(ChromiumSnapshotter::launch(Default::default()).await?);
/// let config = EnrichmentConfig::builder()
///     .website_column("Website")
///     .field(FieldSpec::new("Summary", "Summarize the homepage"))
///     .output_path("enriched.xlsx")
///     .snapshot_dir("screenshots")
///     .snapshot_provider(snapshotter)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EnrichmentConfig {
    /// Header name of the column holding each row's website URL.
    ///
    /// Matched exactly against the header cells' display strings — no case
    /// folding, no partial matching. A miss is a fatal pre-flight error.
    pub website_column: String,

    /// Extraction fields, in output-column order.
    pub fields: Vec<FieldSpec>,

    /// Where the enriched workbook is written (after every row).
    pub output_path: PathBuf,

    /// Directory for per-row snapshot PNGs (`screenshot-row-{n}.png`).
    /// Created if missing. The files are left behind for inspection.
    pub snapshot_dir: PathBuf,

    /// The browser-automation handle. Always injected by the caller — the
    /// pipeline never launches a browser itself, so tests can substitute a
    /// fake and hosts can share one browser across several runs.
    pub snapshot_provider: Option<Arc<dyn SnapshotProvider>>,

    /// Pre-constructed extraction provider. Takes precedence over
    /// `provider_name`; if both are unset the provider is auto-detected from
    /// the environment at run start.
    pub extraction_provider: Option<Arc<dyn ExtractionProvider>>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses the
    /// provider default.
    pub model: Option<String>,

    /// Sampling temperature for the extraction completion. Default: 0.1.
    ///
    /// Low temperature keeps the model faithful to what is actually on the
    /// page — exactly what you want when the answer lands in a spreadsheet
    /// cell someone will filter and sort on.
    pub temperature: f32,

    /// Maximum tokens the model may generate per row. Default: 1024.
    ///
    /// Covers a generous handful of sentence-length field values; raise it
    /// if your instructions ask for long-form answers.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient extraction failure. Default: 3.
    ///
    /// Most 5xx and timeout errors are transient. Permanent errors (bad API
    /// key, 400) surface as a [`crate::error::RowError`] for that row.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s.
    pub retry_backoff_ms: u64,

    /// Per-row navigation/quiescence timeout in seconds. Default: 60.
    ///
    /// A page that never reaches network-idle within this bound is captured
    /// anyway; a page that cannot even finish navigating fails the row.
    pub capture_timeout_secs: u64,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Progress sink. Fire-and-forget; `None` means no events are emitted.
    pub progress_callback: Option<ProgressCallback>,

    /// Optional usage meter, invoked after each successful extraction.
    /// Metering failures never fail the extraction.
    pub usage_meter: Option<Arc<dyn UsageMeter>>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            website_column: String::new(),
            fields: Vec::new(),
            output_path: PathBuf::new(),
            snapshot_dir: PathBuf::new(),
            snapshot_provider: None,
            extraction_provider: None,
            provider_name: None,
            model: None,
            temperature: 0.1,
            max_tokens: 1024,
            max_retries: 3,
            retry_backoff_ms: 500,
            capture_timeout_secs: 60,
            system_prompt: None,
            progress_callback: None,
            usage_meter: None,
        }
    }
}

impl fmt::Debug for EnrichmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrichmentConfig")
            .field("website_column", &self.website_column)
            .field("fields", &self.fields)
            .field("output_path", &self.output_path)
            .field("snapshot_dir", &self.snapshot_dir)
            .field(
                "snapshot_provider",
                &self.snapshot_provider.as_ref().map(|_| "<dyn SnapshotProvider>"),
            )
            .field(
                "extraction_provider",
                &self
                    .extraction_provider
                    .as_ref()
                    .map(|_| "<dyn ExtractionProvider>"),
            )
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("capture_timeout_secs", &self.capture_timeout_secs)
            .finish()
    }
}

impl EnrichmentConfig {
    /// Create a new builder for `EnrichmentConfig`.
    pub fn builder() -> EnrichmentConfigBuilder {
        EnrichmentConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`EnrichmentConfig`].
pub struct EnrichmentConfigBuilder {
    config: EnrichmentConfig,
}

impl EnrichmentConfigBuilder {
    pub fn website_column(mut self, name: impl Into<String>) -> Self {
        self.config.website_column = name.into();
        self
    }

    /// Append one extraction field (call repeatedly, in column order).
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.config.fields.push(field);
        self
    }

    /// Replace the whole field list.
    pub fn fields(mut self, fields: Vec<FieldSpec>) -> Self {
        self.config.fields = fields;
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_path = path.into();
        self
    }

    pub fn snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.snapshot_dir = dir.into();
        self
    }

    pub fn snapshot_provider(mut self, provider: Arc<dyn SnapshotProvider>) -> Self {
        self.config.snapshot_provider = Some(provider);
        self
    }

    pub fn extraction_provider(mut self, provider: Arc<dyn ExtractionProvider>) -> Self {
        self.config.extraction_provider = Some(provider);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn capture_timeout_secs(mut self, secs: u64) -> Self {
        self.config.capture_timeout_secs = secs.max(1);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn usage_meter(mut self, meter: Arc<dyn UsageMeter>) -> Self {
        self.config.usage_meter = Some(meter);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<EnrichmentConfig, EnrichError> {
        let c = &self.config;
        if c.website_column.trim().is_empty() {
            return Err(EnrichError::InvalidConfig(
                "Website column name must not be empty".into(),
            ));
        }
        if c.fields.is_empty() {
            return Err(EnrichError::InvalidConfig(
                "At least one extraction field is required".into(),
            ));
        }
        if c.output_path.as_os_str().is_empty() {
            return Err(EnrichError::InvalidConfig("Output path is required".into()));
        }
        if c.snapshot_dir.as_os_str().is_empty() {
            return Err(EnrichError::InvalidConfig(
                "Snapshot directory is required".into(),
            ));
        }
        if c.snapshot_provider.is_none() {
            return Err(EnrichError::InvalidConfig(
                "A snapshot provider must be injected (the pipeline never launches a browser itself)"
                    .into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Workspace config file ────────────────────────────────────────────────

/// The `config.json` a host application writes into a workspace directory.
///
/// Field names are camelCase on disk for compatibility with existing
/// workspace files; `aiPrompts[].prompt` is accepted as an alias for
/// `instruction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Path of the input workbook.
    pub original_file_path: PathBuf,
    /// Workspace directory; receives the output file and `screenshots/`.
    pub workspace_path: PathBuf,
    /// Header name of the website-URL column.
    pub website_column_name: String,
    /// Extraction fields, in output-column order.
    #[serde(alias = "aiPrompts")]
    pub fields: Vec<FieldSpec>,
    /// Optional output file name override (placed inside the workspace).
    #[serde(default)]
    pub output_file_name: Option<String>,
    /// Optional extraction-provider credential. Applied to the provider's
    /// key environment variable when that variable is not already set.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl WorkspaceConfig {
    /// Read and parse a workspace `config.json`.
    pub fn load(path: &Path) -> Result<Self, EnrichError> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EnrichError::InputNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                EnrichError::Internal(format!("Failed to read {}: {e}", path.display()))
            }
        })?;
        serde_json::from_str(&data).map_err(|e| {
            EnrichError::InvalidConfig(format!("Failed to parse {}: {e}", path.display()))
        })
    }

    /// Resolve the output workbook path.
    ///
    /// Uses the configured name when present, otherwise
    /// `enriched-{timestamp}-{input_file_name}` inside the workspace.
    pub fn output_file_path(&self) -> PathBuf {
        let name = match &self.output_file_name {
            Some(name) => name.clone(),
            None => {
                let timestamp = Utc::now()
                    .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
                    .replace([':', '.'], "-");
                let input_name = self
                    .original_file_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "workbook.xlsx".to_string());
                format!("enriched-{timestamp}-{input_name}")
            }
        };
        self.workspace_path.join(name)
    }

    /// The snapshot directory inside the workspace.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.workspace_path.join("screenshots")
    }
}
