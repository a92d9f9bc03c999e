//! Workbook access: load, header lookup, cell read/write, save.
//!
//! This module is the only place that touches `umya_spreadsheet` types; the
//! rest of the pipeline sees a small synchronous surface (`SheetDocument`)
//! plus one tagged value type ([`CellValue`]) with one coercion function.
//!
//! ## The coercion rule
//!
//! Spreadsheet cells are a union of scalars, dates, and rich-text objects.
//! Everything the pipeline reads (the URL column, header names) goes through
//! [`CellValue::to_display_string`], which renders:
//!
//! * empty/missing         → empty string
//! * dates                 → ISO-8601 (`2024-01-01T00:00:00.000Z`)
//! * numbers and booleans  → default string conversion
//! * rich text             → concatenation of its text runs, or the literal
//!   `[Complex Value]` marker when the runs cannot be recovered
//! * formula errors        → empty string
//!
//! Column lookup is an exact string match against the coerced header cells —
//! deliberately no case folding or prefix matching, so "Website" never
//! silently binds to "WebsiteURL".

use crate::error::EnrichError;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::io::Read;
use std::path::Path;
use tracing::debug;
use umya_spreadsheet::{CellRawValue, Spreadsheet};

/// Marker written when a rich-text cell's runs cannot be recovered.
pub const COMPLEX_VALUE_MARKER: &str = "[Complex Value]";

/// A typed spreadsheet cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDateTime),
    RichText(Vec<String>),
}

impl CellValue {
    /// Coerce the cell value to its display string.
    pub fn to_display_string(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Date(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            CellValue::RichText(runs) => runs.concat(),
        }
    }
}

/// Convert an Excel serial date to a calendar date-time.
///
/// Serial 0 is 1899-12-30 (the offset absorbs Excel's phantom 1900-02-29);
/// the fractional part is the time of day.
fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let days = serial.floor() as i64;
    let secs = ((serial - serial.floor()) * 86_400.0).round() as i64;
    let midnight = epoch.checked_add_signed(Duration::days(days))?.and_hms_opt(0, 0, 0)?;
    midnight.checked_add_signed(Duration::seconds(secs))
}

/// Heuristic: does this number-format code render a date or time?
///
/// Bracketed sections (`[Red]`, `[$€-407]`) and quoted literals are ignored;
/// the remainder is a date format when it carries day/year/hour tokens, or
/// month/minute tokens alongside a separator.
fn is_date_format_code(code: &str) -> bool {
    let mut stripped = String::with_capacity(code.len());
    let mut in_bracket = false;
    let mut in_quote = false;
    for ch in code.chars() {
        match ch {
            '[' if !in_quote => in_bracket = true,
            ']' if !in_quote => in_bracket = false,
            '"' if !in_bracket => in_quote = !in_quote,
            c if !in_bracket && !in_quote => stripped.push(c.to_ascii_lowercase()),
            _ => {}
        }
    }
    if stripped.contains("general") {
        return false;
    }
    stripped.contains('y')
        || stripped.contains('d')
        || stripped.contains('h')
        || (stripped.contains('m')
            && (stripped.contains(':') || stripped.contains('/') || stripped.contains('-')))
}

/// The spreadsheet error literals (`=1/0` renders as `#DIV/0!` etc.).
fn is_error_literal(s: &str) -> bool {
    matches!(
        s,
        "#NULL!" | "#DIV/0!" | "#VALUE!" | "#REF!" | "#NAME?" | "#NUM!" | "#N/A"
    )
}

/// The in-memory tabular document: first worksheet of an xlsx workbook.
///
/// Exclusively owned by the pipeline for the duration of a run; every
/// mutation happens through this wrapper and is flushed with [`save`].
///
/// [`save`]: SheetDocument::save
#[derive(Debug)]
pub struct SheetDocument {
    book: Spreadsheet,
}

impl SheetDocument {
    /// Load a workbook from disk, validating existence and ZIP magic bytes.
    pub fn load(path: &Path) -> Result<Self, EnrichError> {
        if !path.exists() {
            return Err(EnrichError::InputNotFound {
                path: path.to_path_buf(),
            });
        }

        // Check read permission and magic bytes before handing the file to
        // the parser, so callers get a targeted error rather than a generic
        // parse failure.
        match std::fs::File::open(path) {
            Ok(mut f) => {
                let mut magic = [0u8; 4];
                if f.read_exact(&mut magic).is_ok() && &magic != b"PK\x03\x04" {
                    return Err(EnrichError::NotAWorkbook {
                        path: path.to_path_buf(),
                        magic,
                    });
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(EnrichError::PermissionDenied {
                    path: path.to_path_buf(),
                });
            }
            Err(_) => {
                return Err(EnrichError::InputNotFound {
                    path: path.to_path_buf(),
                });
            }
        }

        let book = umya_spreadsheet::reader::xlsx::read(path).map_err(|e| {
            EnrichError::WorkbookParse {
                path: path.to_path_buf(),
                detail: e.to_string(),
            }
        })?;

        if book.get_sheet(&0).is_none() {
            return Err(EnrichError::NoWorksheet {
                path: path.to_path_buf(),
            });
        }

        debug!("Loaded workbook: {}", path.display());
        Ok(Self { book })
    }

    /// A fresh single-sheet workbook (used by tests and fixtures).
    pub fn new_in_memory() -> Self {
        Self {
            book: umya_spreadsheet::new_file(),
        }
    }

    /// Worksheet names in workbook order.
    pub fn sheet_names(&self) -> Vec<String> {
        self.book
            .get_sheet_collection()
            .iter()
            .map(|s| s.get_name().to_string())
            .collect()
    }

    fn sheet(&self) -> &umya_spreadsheet::Worksheet {
        // Presence of sheet 0 is validated in `load`; `new_in_memory` always
        // has one.
        self.book.get_sheet(&0).expect("workbook has a first sheet")
    }

    fn sheet_mut(&mut self) -> &mut umya_spreadsheet::Worksheet {
        self.book
            .get_sheet_mut(&0)
            .expect("workbook has a first sheet")
    }

    /// Highest populated row number (1-based; 0 for an empty sheet).
    /// The header, when present, is row 1.
    pub fn row_count(&self) -> u32 {
        self.sheet().get_highest_row()
    }

    /// Data rows, i.e. everything below the header.
    pub fn data_row_count(&self) -> usize {
        self.row_count().saturating_sub(1) as usize
    }

    /// Highest populated column number (1-based; 0 for an empty sheet).
    pub fn column_count(&self) -> u32 {
        self.sheet().get_highest_column()
    }

    /// Read a cell as a typed [`CellValue`]. 1-based row and column.
    pub fn cell_value(&self, row: u32, col: u32) -> CellValue {
        let cell = match self.sheet().get_cell((col, row)) {
            Some(c) => c,
            None => return CellValue::Empty,
        };

        match cell.get_cell_value().get_raw_value() {
            CellRawValue::Empty => CellValue::Empty,
            CellRawValue::String(s) => {
                let s = s.to_string();
                if s.is_empty() {
                    CellValue::Empty
                } else {
                    CellValue::Text(s)
                }
            }
            CellRawValue::Bool(b) => CellValue::Bool(*b),
            CellRawValue::Numeric(n) => {
                let is_date = cell
                    .get_style()
                    .get_number_format()
                    .map(|nf| is_date_format_code(nf.get_format_code()))
                    .unwrap_or(false);
                if is_date {
                    match excel_serial_to_datetime(*n) {
                        Some(dt) => CellValue::Date(dt),
                        None => CellValue::Number(*n),
                    }
                } else {
                    CellValue::Number(*n)
                }
            }
            CellRawValue::RichText(rt) => {
                let runs: Vec<String> = rt
                    .get_rich_text_elements()
                    .iter()
                    .map(|el| el.get_text().to_string())
                    .collect();
                if runs.is_empty() {
                    // The runs are gone but the cell is not empty: surface
                    // the marker rather than inventing content.
                    let flat = cell.get_value();
                    if flat.is_empty() {
                        CellValue::RichText(runs)
                    } else {
                        CellValue::Text(COMPLEX_VALUE_MARKER.to_string())
                    }
                } else {
                    CellValue::RichText(runs)
                }
            }
            other => {
                // Formula errors (#DIV/0! and friends) have no usable text;
                // anything else unknown keeps its string rendering.
                let s = other.to_string();
                if s.is_empty() || is_error_literal(&s) {
                    CellValue::Empty
                } else {
                    CellValue::Text(s)
                }
            }
        }
    }

    /// Read a cell coerced to its display string. 1-based row and column.
    pub fn display_string(&self, row: u32, col: u32) -> String {
        self.cell_value(row, col).to_display_string()
    }

    /// Write a text value into a cell. 1-based row and column.
    ///
    /// Always stored as a string, so numeric-looking extraction results
    /// ("2024", "3.5") keep their exact text.
    pub fn set_cell_text(&mut self, row: u32, col: u32, text: &str) {
        self.sheet_mut()
            .get_cell_mut((col, row))
            .set_value_string(text);
    }

    /// Header-row column names in order, skipping empty cells.
    pub fn header_columns(&self) -> Vec<String> {
        let mut names = Vec::new();
        for col in 1..=self.column_count() {
            let name = self.display_string(1, col);
            if !name.is_empty() {
                names.push(name);
            }
        }
        names
    }

    /// Find a column by exact header match. Returns the 1-based column index.
    pub fn find_column(&self, name: &str) -> Option<u32> {
        (1..=self.column_count()).find(|&col| self.display_string(1, col) == name)
    }

    /// Append a header cell after the last populated column.
    ///
    /// Returns the 1-based index of the new column. The caller records the
    /// returned indices once, right after appending — result-cell writes use
    /// that mapping, never re-derived column arithmetic.
    pub fn append_header_column(&mut self, name: &str) -> u32 {
        let col = self.column_count() + 1;
        self.set_cell_text(1, col, name);
        col
    }

    /// Serialise the whole workbook to `path`.
    ///
    /// Called after every processed row; a failure here is fatal to the run.
    pub fn save(&self, path: &Path) -> Result<(), EnrichError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| EnrichError::Persistence {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            }
        }
        umya_spreadsheet::writer::xlsx::write(&self.book, path).map_err(|e| {
            EnrichError::Persistence {
                path: path.to_path_buf(),
                source: std::io::Error::other(e.to_string()),
            }
        })
    }
}
