//! VLM interaction: build the batched extraction request and parse results.
//!
//! One request per row, never one per field: every inference call pays
//! material latency and cost, and the visual context (the snapshot) is
//! shared across all fields anyway. The request describes every field and
//! demands a single JSON object keyed by field name; the response parser is
//! strict — a reply that cannot be mapped back to field names is an error,
//! not a partial result, because misaligned values silently land in the
//! wrong spreadsheet columns.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent.
//! Exponential backoff (`retry_backoff_ms * 2^attempt`) avoids hammering a
//! recovering endpoint: with 500 ms base and 3 retries the wait sequence is
//! 500 ms → 1 s → 2 s. A malformed (but delivered) response is not retried —
//! the model answered; asking again mostly burns tokens.

use crate::config::{EnrichmentConfig, FieldSpec};
use crate::pipeline::encode::{encode_snapshot, EncodeError};
use crate::prompts::{extraction_request, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Errors an extraction provider can produce for one row.
///
/// Row context is added by the pipeline when it converts these into
/// [`crate::error::RowError`]s.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The snapshot file could not be encoded for the request.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The provider call failed after all retries.
    #[error("extraction call failed after {retries} retries: {detail}")]
    Failed { retries: u8, detail: String },

    /// The provider answered, but not with the requested JSON shape.
    #[error("malformed extraction response: {detail}")]
    MalformedResponse { detail: String },
}

/// The values extracted for one row, plus how hard it was to get them.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    /// Field name → extracted value. Fields the model omitted are absent;
    /// the pipeline writes an empty string for those.
    pub values: HashMap<String, String>,
    /// Retries consumed before the successful call.
    pub retries: u8,
}

/// Capability to extract named field values from a page snapshot.
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    /// Extract all `fields` from the snapshot at `image_path` in one call.
    async fn extract(
        &self,
        image_path: &Path,
        url: &str,
        fields: &[FieldSpec],
    ) -> Result<ExtractionOutcome, ExtractError>;
}

/// Usage metering hook, invoked after each successful extraction.
///
/// Sink-shaped on purpose: the method returns `()`, so a metering backend
/// that is down can never fail or stall an extraction. Implementations
/// swallow and log their own errors.
pub trait UsageMeter: Send + Sync {
    /// Record one successful extraction of `field_count` fields for `url`.
    fn record_extraction(&self, url: &str, field_count: usize);
}

/// Production [`ExtractionProvider`] over an [`edgequake_llm`] vision model.
pub struct VisionExtractor {
    provider: Arc<dyn LLMProvider>,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    meter: Option<Arc<dyn UsageMeter>>,
}

impl VisionExtractor {
    /// Wrap a vision provider with the run's extraction knobs.
    pub fn from_config(provider: Arc<dyn LLMProvider>, config: &EnrichmentConfig) -> Self {
        Self {
            provider,
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            meter: config.usage_meter.clone(),
        }
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExtractionProvider for VisionExtractor {
    async fn extract(
        &self,
        image_path: &Path,
        url: &str,
        fields: &[FieldSpec],
    ) -> Result<ExtractionOutcome, ExtractError> {
        let image = encode_snapshot(image_path)?;

        let system_prompt = self
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user_with_images(extraction_request(url, fields), vec![image]),
        ];
        let options = self.build_options();

        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Extraction for {url}: retry {attempt}/{} after {backoff}ms",
                    self.max_retries
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "Extraction for {url}: {} in / {} out tokens",
                        response.prompt_tokens, response.completion_tokens
                    );
                    let values = parse_field_map(&response.content, fields)?;

                    if let Some(ref meter) = self.meter {
                        meter.record_extraction(url, fields.len());
                    }

                    return Ok(ExtractionOutcome {
                        values,
                        retries: attempt as u8,
                    });
                }
                Err(e) => {
                    let msg = e.to_string();
                    warn!("Extraction for {url}: attempt {} failed — {msg}", attempt + 1);
                    last_err = Some(msg);
                }
            }
        }

        Err(ExtractError::Failed {
            retries: self.max_retries as u8,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

// ── Response parsing ─────────────────────────────────────────────────────

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").expect("valid fence regex")
});

/// Strip a single Markdown code fence wrapping the whole response, if any.
///
/// Vision models love to wrap JSON in fenced `json` blocks no matter how
/// firmly the prompt forbids it.
fn strip_code_fence(content: &str) -> &str {
    match CODE_FENCE.captures(content) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(content),
        None => content.trim(),
    }
}

/// Parse the model response into field-name → value.
///
/// The response must be one JSON object. Missing fields are tolerated
/// (callers substitute an empty string); anything that is not an object is
/// a [`ExtractError::MalformedResponse`].
fn parse_field_map(
    content: &str,
    fields: &[FieldSpec],
) -> Result<HashMap<String, String>, ExtractError> {
    let body = strip_code_fence(content);

    let parsed: serde_json::Value =
        serde_json::from_str(body).map_err(|e| ExtractError::MalformedResponse {
            detail: format!("{e} (response starts: {:.120})", body),
        })?;

    let object = parsed
        .as_object()
        .ok_or_else(|| ExtractError::MalformedResponse {
            detail: format!("expected a JSON object, got {:.120}", body),
        })?;

    let mut values = HashMap::new();
    for field in fields {
        match object.get(&field.column_name) {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::String(s)) => {
                values.insert(field.column_name.clone(), s.clone());
            }
            // Numbers, booleans, and stray nested values: keep their JSON
            // rendering rather than dropping data the model produced.
            Some(other) => {
                values.insert(field.column_name.clone(), other.to_string());
            }
        }
    }
    Ok(values)
}
