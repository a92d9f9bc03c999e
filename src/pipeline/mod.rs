//! Pipeline stages for spreadsheet enrichment.
//!
//! Each submodule implements exactly one concern. Keeping stages separate
//! makes each independently testable and lets us swap implementations
//! (e.g. substitute a fake browser in tests) without touching other stages.
//!
//! ## Data Flow (per row)
//!
//! ```text
//! sheet ──▶ snapshot ──▶ encode ──▶ extract ──▶ sheet ──▶ save
//! (URL cell) (browser)   (base64)   (VLM JSON)  (cells)  (xlsx)
//! ```
//!
//! 1. [`sheet`]    — workbook load/save and typed cell access; the only
//!    module that touches `umya_spreadsheet`
//! 2. [`snapshot`] — full-page screenshot of the row's URL via a headless
//!    browser owned by the caller
//! 3. [`encode`]   — PNG file → base64 `ImageData` for the multimodal
//!    request body
//! 4. [`extract`]  — one batched VLM call per row with retry/backoff; the
//!    only stage with network I/O
//!
//! The row loop that drives these lives in [`crate::enrich`].

pub mod encode;
pub mod extract;
pub mod sheet;
pub mod snapshot;
