//! Prompts for VLM-based field extraction from page snapshots.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the default behaviour (e.g.
//!    tightening the JSON-only rule or the not-determinable convention)
//!    requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can import and inspect prompts directly
//!    without spinning up a real VLM, making prompt regressions easy to catch.
//!
//! Callers can override the default via
//! [`crate::config::EnrichmentConfig::system_prompt`]; the constants here are
//! used only when no override is provided.

use crate::config::FieldSpec;

/// Default system prompt for extracting named fields from a web-page snapshot.
///
/// This prompt is used when `EnrichmentConfig::system_prompt` is `None`.
///
/// The JSON-object response shape is load-bearing: the pipeline maps values
/// back to spreadsheet columns by field name, so the model must echo every
/// requested key exactly and add nothing else.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert web-page analyst. You are shown a full-page screenshot of a website and a list of named extraction fields, each with an instruction.

Follow these rules precisely:

1. GROUNDING
   - Answer ONLY from what is visible in the screenshot
   - Do NOT guess facts that are not on the page
   - If a field cannot be determined from the page, use an empty string ""

2. FIELDS
   - Produce exactly one value per requested field
   - Each value is a single plain-text string (no markdown, no nested objects)
   - Keep values concise unless the field's instruction asks for detail

3. OUTPUT FORMAT
   - Respond with ONLY a JSON object
   - The object's keys are EXACTLY the requested field names, nothing more
   - Do NOT wrap the object in ```json fences
   - Do NOT add commentary, explanations, or trailing text"#;

/// Build the user message describing the page and the requested fields.
///
/// Sent alongside the snapshot image as the single user turn of the request.
pub fn extraction_request(url: &str, fields: &[FieldSpec]) -> String {
    let mut msg = format!(
        "Screenshot of: {url}\n\nExtract the following {} field(s) and respond with one JSON object:\n",
        fields.len()
    );
    for field in fields {
        msg.push_str(&format!(
            "- \"{}\": {}\n",
            field.column_name, field.instruction
        ));
    }
    msg.push_str("\nJSON keys must be exactly: ");
    let names: Vec<&str> = fields.iter().map(|f| f.column_name.as_str()).collect();
    msg.push_str(&names.join(", "));
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, instruction: &str) -> FieldSpec {
        FieldSpec {
            column_name: name.to_string(),
            instruction: instruction.to_string(),
        }
    }

    #[test]
    fn request_names_every_field() {
        let fields = vec![
            field("Summary", "Summarize the homepage"),
            field("Industry", "What industry is this company in?"),
        ];
        let msg = extraction_request("https://acme.com", &fields);

        assert!(msg.contains("https://acme.com"));
        assert!(msg.contains("\"Summary\": Summarize the homepage"));
        assert!(msg.contains("\"Industry\": What industry is this company in?"));
        assert!(msg.contains("exactly: Summary, Industry"));
    }

    #[test]
    fn request_counts_fields() {
        let fields = vec![field("Summary", "Summarize the homepage")];
        let msg = extraction_request("acme.com", &fields);
        assert!(msg.contains("1 field(s)"));
    }

    #[test]
    fn system_prompt_forbids_fences() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("Do NOT wrap"));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("JSON object"));
    }
}
