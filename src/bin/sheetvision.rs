//! CLI binary for sheetvision.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `EnrichmentConfig`, owns the browser for the duration of the run, and
//! prints results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sheetvision::snapshot::{ChromiumSnapshotter, SnapshotterConfig};
use sheetvision::{
    enrich, inspect, EnrichmentConfig, EnrichmentProgressCallback, FieldSpec, ProgressCallback,
    WorkspaceConfig,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: renders a live progress bar plus one log line
/// per row. Rows are strictly sequential, so lines always arrive in order.
struct CliProgressCallback {
    /// The single progress bar anchored at the bottom of the terminal.
    bar: ProgressBar,
    /// Count of rows that errored out.
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Create a callback whose progress-bar length is set dynamically by
    /// `on_run_start` (called before any row is processed).
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_run_start

        // Initial style: spinner only (no counter until we know the total).
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening workbook…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    /// Switch to the full progress-bar style once we know `total`.
    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} rows  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Enriching");
        self.bar.reset_eta();
    }
}

impl EnrichmentProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_rows: usize) {
        self.activate_bar(total_rows);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting enrichment of {total_rows} rows…"))
        ));
    }

    fn on_row_start(&self, _row_index: usize, _total: usize, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn on_row_complete(&self, row_index: usize, total: usize) {
        self.bar.println(format!(
            "  {} Row {:>3}/{:<3}",
            green("✓"),
            row_index + 1,
            total,
        ));
        self.bar.inc(1);
    }

    fn on_row_skipped(&self, row_index: usize, total: usize) {
        self.bar.println(format!(
            "  {} Row {:>3}/{:<3}  {}",
            dim("∅"),
            row_index + 1,
            total,
            dim("empty URL, skipped"),
        ));
        self.bar.inc(1);
    }

    fn on_row_error(&self, row_index: usize, total: usize, error: String) {
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg = if error.len() > 80 {
            format!("{}\u{2026}", &error[..79])
        } else {
            error
        };

        self.bar.println(format!(
            "  {} Row {:>3}/{:<3}  {}",
            red("✗"),
            row_index + 1,
            total,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_rows: usize, success_count: usize) {
        let failed = self.errors.load(Ordering::SeqCst);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} rows enriched successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} rows enriched  ({} failed)",
                if success_count == 0 { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_rows,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Enrich a workbook with one field
  sheetvision companies.xlsx --column Website \
      --field "Summary=Summarize what this company does" -o enriched.xlsx

  # Several fields, specific model
  sheetvision leads.xlsx --column URL \
      --field "Summary=Summarize the homepage" \
      --field "Pricing=Does the site list pricing? Answer yes or no" \
      --model gpt-4.1 --provider openai

  # Run from a workspace config.json (desktop-app layout)
  sheetvision --config ~/Documents/workspace-1/config.json

  # Inspect workbook columns and row count (no API key, no browser)
  sheetvision --inspect-only companies.xlsx

  # JSON run report on stdout
  sheetvision companies.xlsx --column Website \
      --field "Summary=Summarize the homepage" --json > report.json

FIELD SYNTAX:
  --field "NAME=INSTRUCTION" appends one output column NAME whose value is
  extracted with INSTRUCTION. Repeat the flag for more columns; order is
  preserved.

SUPPORTED PROVIDERS & MODELS:
  Provider     Model                  Vision
  ─────────    ─────────────────────  ──────
  openai       gpt-4.1-mini (default) ✓
  openai       gpt-4.1 / gpt-4o       ✓
  anthropic    claude-sonnet-4-20250514         ✓
  gemini       gemini-2.0-flash       ✓
  ollama       llava, llama3.2-vision ✓

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  SHEETVISION_CHROME      Path to a Chrome/Chromium/Edge binary

SETUP:
  1. Set API key:     export OPENAI_API_KEY=sk-...
  2. Enrich:          sheetvision companies.xlsx --column Website \
                          --field "Summary=Summarize the homepage"

  A Chrome or Chromium installation is required for snapshots; sheetvision
  finds it automatically, or set SHEETVISION_CHROME to point at one.
"#;

/// Enrich spreadsheets from website screenshots using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "sheetvision",
    version,
    about = "Enrich spreadsheets with data extracted from website screenshots using Vision LLMs",
    long_about = "Visit the website URL found in each row of a spreadsheet, capture a full-page \
screenshot in a headless browser, extract named fields from it with a Vision Language Model, \
and write the results into new columns of an enriched copy. Supports OpenAI, Anthropic, Google \
Gemini, Azure OpenAI, and any OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input xlsx workbook. Optional when --config is used.
    input: Option<PathBuf>,

    /// Workspace config.json (desktop-app layout); replaces most flags.
    #[arg(long, conflicts_with_all = ["column", "field"])]
    config: Option<PathBuf>,

    /// Header name of the website-URL column (exact match).
    #[arg(short, long)]
    column: Option<String>,

    /// Extraction field as NAME=INSTRUCTION. Repeatable, order preserved.
    #[arg(short, long = "field")]
    field: Vec<String>,

    /// Write the enriched workbook here instead of the default
    /// enriched-{timestamp}-{input} next to the input.
    #[arg(short, long, env = "SHEETVISION_OUTPUT")]
    output: Option<PathBuf>,

    /// Workspace directory for screenshots and the default output file.
    /// Defaults to the input file's directory.
    #[arg(long, env = "SHEETVISION_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Vision LLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "SHEETVISION_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    /// Auto-detected from API key env vars if not set.
    #[arg(long, env = "SHEETVISION_PROVIDER")]
    provider: Option<String>,

    /// Path to a Chrome/Chromium/Edge binary.
    #[arg(long, env = "SHEETVISION_CHROME")]
    chrome: Option<PathBuf>,

    /// Per-row navigation timeout in seconds.
    #[arg(long, env = "SHEETVISION_CAPTURE_TIMEOUT", default_value_t = 60)]
    capture_timeout: u64,

    /// Max LLM output tokens per row.
    #[arg(long, env = "SHEETVISION_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "SHEETVISION_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per row on LLM failure.
    #[arg(long, env = "SHEETVISION_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "SHEETVISION_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Output a structured JSON run report instead of human-readable text.
    #[arg(long, env = "SHEETVISION_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SHEETVISION_NO_PROGRESS")]
    no_progress: bool,

    /// Print workbook metadata only, no enrichment.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SHEETVISION_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SHEETVISION_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let input = cli
            .input
            .as_ref()
            .context("--inspect-only requires an input workbook")?;
        let info = inspect(input).await.context("Failed to inspect workbook")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialise metadata")?
            );
        } else {
            println!("File:         {}", input.display());
            println!("Sheets:       {}", info.sheet_names.join(", "));
            println!("Columns:      {}", info.columns.join(", "));
            println!("Data rows:    {}", info.total_rows);
        }
        return Ok(());
    }

    // ── Resolve run inputs (flags or workspace config) ───────────────────
    let (input, website_column, fields, output_path, snapshot_dir) = resolve_run(&cli)?;

    // ── Launch the browser (owned here, released here) ───────────────────
    let snapshotter_config = SnapshotterConfig {
        chrome_executable: cli.chrome.clone(),
        nav_timeout_secs: cli.capture_timeout,
        ..Default::default()
    };
    let snapshotter = Arc::new(
        ChromiumSnapshotter::launch(snapshotter_config)
            .await
            .context("Failed to launch headless browser")?,
    );

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn EnrichmentProgressCallback>)
    } else {
        None
    };

    let system_prompt = match cli.system_prompt {
        Some(ref path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {path:?}"))?,
        ),
        None => None,
    };

    let mut builder = EnrichmentConfig::builder()
        .website_column(website_column)
        .fields(fields)
        .output_path(&output_path)
        .snapshot_dir(snapshot_dir)
        .snapshot_provider(snapshotter.clone())
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .capture_timeout_secs(cli.capture_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress_cb {
        builder = builder.progress_callback(cb);
    }

    let config = builder.build().context("Invalid configuration")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let result = enrich(&input, &config).await;

    // Release the browser before reporting, even on failure. The config
    // holds a clone of the handle, so it must go first.
    drop(config);
    if let Ok(snapshotter) = Arc::try_unwrap(snapshotter) {
        snapshotter.close().await;
    }

    let output = result.context("Enrichment failed")?;

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(json.as_bytes()).ok();
        handle.write_all(b"\n").ok();
    } else if !cli.quiet {
        eprintln!(
            "{}  {}/{} rows  {}ms  →  {}",
            if output.stats.failed_rows == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            output.stats.processed_rows,
            output.stats.total_rows,
            output.stats.total_duration_ms,
            bold(&output.output_path.display().to_string()),
        );
        if output.stats.skipped_rows > 0 {
            eprintln!(
                "   {}",
                dim(&format!("{} rows skipped (empty URL)", output.stats.skipped_rows))
            );
        }
    }

    Ok(())
}

/// Resolve (input, column, fields, output, snapshot_dir) from flags or a
/// workspace config file.
fn resolve_run(cli: &Cli) -> Result<(PathBuf, String, Vec<FieldSpec>, PathBuf, PathBuf)> {
    if let Some(ref config_path) = cli.config {
        let ws = WorkspaceConfig::load(config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?;
        if let Some(ref key) = ws.api_key {
            let var = match cli.provider.as_deref() {
                Some("anthropic") => "ANTHROPIC_API_KEY",
                Some("gemini") => "GEMINI_API_KEY",
                _ => "OPENAI_API_KEY",
            };
            if std::env::var(var).map(|v| v.is_empty()).unwrap_or(true) {
                std::env::set_var(var, key);
            }
        }
        let output = match cli.output {
            Some(ref o) => o.clone(),
            None => ws.output_file_path(),
        };
        return Ok((
            ws.original_file_path.clone(),
            ws.website_column_name.clone(),
            ws.fields.clone(),
            output,
            ws.snapshot_dir(),
        ));
    }

    let input = cli
        .input
        .clone()
        .context("An input workbook is required (or use --config)")?;
    let column = cli
        .column
        .clone()
        .context("--column is required (or use --config)")?;
    if cli.field.is_empty() {
        bail!("At least one --field NAME=INSTRUCTION is required (or use --config)");
    }
    let fields = cli
        .field
        .iter()
        .map(|raw| parse_field(raw))
        .collect::<Result<Vec<_>>>()?;

    let workspace = match cli.workspace {
        Some(ref w) => w.clone(),
        None => input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    // Reuse the workspace naming convention for the default output file.
    let ws = WorkspaceConfig {
        original_file_path: input.clone(),
        workspace_path: workspace,
        website_column_name: column.clone(),
        fields: fields.clone(),
        output_file_name: None,
        api_key: None,
    };
    let output = match cli.output {
        Some(ref o) => o.clone(),
        None => ws.output_file_path(),
    };

    Ok((input, column, fields, output, ws.snapshot_dir()))
}

/// Parse `--field NAME=INSTRUCTION`.
fn parse_field(raw: &str) -> Result<FieldSpec> {
    match raw.split_once('=') {
        Some((name, instruction)) if !name.trim().is_empty() && !instruction.trim().is_empty() => {
            Ok(FieldSpec::new(name.trim(), instruction.trim()))
        }
        _ => bail!("Invalid --field '{raw}': expected NAME=INSTRUCTION"),
    }
}
