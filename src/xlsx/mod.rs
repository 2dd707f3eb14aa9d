//! Minimal single-sheet XLSX access: enough to read the published report and
//! to keep the base dataset and increment archives in the same format.

pub mod reader;
pub mod writer;

use chrono::{Duration, NaiveDate};
use thiserror::Error;

pub use reader::read_sheet;
pub use writer::write_table;

pub type XlsxResult<T> = std::result::Result<T, XlsxError>;

#[derive(Debug, Error)]
pub enum XlsxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Missing required part: {0}")]
    MissingPart(String),
    #[error("Sheet '{0}' not found in workbook")]
    SheetNotFound(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Only produced by callers building a table for writing; the reader
    /// yields date cells as their serial `Number`.
    Date(NaiveDate),
}

static EMPTY: Cell = Cell::Empty;

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(t) => t.trim().is_empty(),
            _ => false,
        }
    }

    /// Cell rendered as text, the way a header or identifier column reads it.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(t) => {
                let t = t.trim();
                (!t.is_empty()).then(|| t.to_string())
            }
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
            Cell::Number(n) => Some(n.to_string()),
            Cell::Bool(b) => Some(b.to_string()),
            Cell::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) if n.is_finite() => Some(*n),
            Cell::Text(t) => t.trim().replace(',', ".").parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }
}

/// Header row plus data rows, addressed by position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Table {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }

    /// Cell at `(row, col)`; positions past the end of a short row read as empty.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }
}

fn serial_epoch() -> NaiveDate {
    // 1899-12-30 absorbs the 1900 leap-year bug for every serial after Feb 1900.
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or_default()
}

pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let days = Duration::try_days(serial.floor() as i64)?;
    serial_epoch().checked_add_signed(days)
}

pub fn date_to_serial(date: NaiveDate) -> f64 {
    (date - serial_epoch()).num_days() as f64
}

/// `0 -> "A"`, `26 -> "AA"`.
pub fn column_name(mut idx: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (idx % 26) as u8);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Zero-based column of an A1-style reference (`"C12" -> 2`).
pub fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: Vec<u8> = cell_ref
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .map(|b| b.to_ascii_uppercase())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let mut idx = 0usize;
    for b in letters {
        idx = idx * 26 + (b - b'A' + 1) as usize;
    }
    Some(idx - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_names_round_trip() {
        for (idx, name) in [(0, "A"), (8, "I"), (25, "Z"), (26, "AA"), (701, "ZZ"), (702, "AAA")] {
            assert_eq!(column_name(idx), name);
            assert_eq!(column_index(&format!("{}7", name)), Some(idx));
        }
        assert_eq!(column_index("12"), None);
    }

    #[test]
    fn serial_dates() {
        let d = NaiveDate::from_ymd_opt(2021, 11, 3).unwrap();
        assert_eq!(date_to_serial(d), 44503.0);
        assert_eq!(serial_to_date(44503.0), Some(d));
        assert_eq!(serial_to_date(44503.75), Some(d));
        assert_eq!(serial_to_date(0.0), None);
        assert_eq!(serial_to_date(2958465.0), NaiveDate::from_ymd_opt(9999, 12, 31));
        assert_eq!(serial_to_date(1e15), None);
        assert_eq!(serial_to_date(f64::MAX), None);
    }

    #[test]
    fn cell_text_and_numbers() {
        assert_eq!(Cell::Number(1234567.0).as_text().as_deref(), Some("1234567"));
        assert_eq!(Cell::Text("  ".into()).as_text(), None);
        assert_eq!(Cell::Text("12,5".into()).as_number(), Some(12.5));
        assert_eq!(Cell::Text("n/a".into()).as_number(), None);
        assert!(Cell::Text(" ".into()).is_empty());
    }

    #[test]
    fn short_rows_read_as_empty() {
        let mut t = Table::new(vec!["a".into(), "b".into()]);
        t.rows.push(vec![Cell::Number(1.0)]);
        assert_eq!(t.cell(0, 0), &Cell::Number(1.0));
        assert_eq!(t.cell(0, 5), &Cell::Empty);
        assert_eq!(t.cell(3, 0), &Cell::Empty);
        assert_eq!(t.column(" b"), None);
        assert_eq!(t.column("b"), Some(1));
    }
}
