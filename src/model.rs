use chrono::{NaiveDate, NaiveDateTime};

use crate::xlsx::{serial_to_date, Cell};

// Source sheet headings.
pub const COL_INDICATOR: &str = "Код показника";
pub const COL_ENTITY_ID: &str = "ЄДРПОУ";
pub const COL_REGION: &str = "Регіон";
pub const COL_FACILITY: &str = "Назва закладу";
pub const COL_REPORT_DATE: &str = "Звітна дата";

/// Unheaded value columns; what they hold depends on the indicator code.
pub const BALANCE_SLOT: usize = 6;
pub const USED_SLOT: usize = 8;

// Persisted record headings (base dataset and increment archives).
pub const COL_RAPID_BALANCE: &str = "Поточний залишок (Швидкі)";
pub const COL_RAPID_USED: &str = "Використано за добу (Швидкі)";
pub const COL_PCR_BALANCE: &str = "Поточний залишок (ПЛР)";
pub const COL_PCR_USED: &str = "Використано за добу (ПЛР)";
pub const COL_AMPLIFIER_BALANCE: &str = "Поточний залишок (Ампліфікатори)";

pub const RECORD_HEADERS: [&str; 9] = [
    COL_ENTITY_ID,
    COL_REGION,
    COL_FACILITY,
    COL_REPORT_DATE,
    COL_RAPID_BALANCE,
    COL_RAPID_USED,
    COL_PCR_BALANCE,
    COL_PCR_USED,
    COL_AMPLIFIER_BALANCE,
];

/// Resource category a source row reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Rapid,
    Pcr,
    Amplifier,
}

impl Family {
    pub const ALL: [Family; 3] = [Family::Rapid, Family::Pcr, Family::Amplifier];

    pub fn code(self) -> &'static str {
        match self {
            Family::Rapid => "rapid_tests_current",
            Family::Pcr => "rcp_current",
            Family::Amplifier => "delivery156",
        }
    }

    /// Exact match only; any other tag is not one of ours.
    pub fn from_code(code: &str) -> Option<Family> {
        Family::ALL.into_iter().find(|f| f.code() == code)
    }
}

/// Join key shared by every category and by persisted records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FacilityKey {
    pub entity_id: String,
    pub region: String,
    pub facility_name: String,
    pub report_date: NaiveDate,
}

/// Meaning attached to a source row's value slots by its indicator code.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Rapid { balance: Option<f64>, used: Option<f64> },
    Pcr { balance: Option<f64>, used: Option<f64> },
    Amplifier { balance: Option<f64> },
    /// Indicator outside the three families; counted by extraction, then dropped.
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub indicator_code: String,
    pub key: FacilityKey,
    pub reading: Reading,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RapidRow {
    pub key: FacilityKey,
    pub rapid_balance: Option<f64>,
    pub rapid_used: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PcrRow {
    pub key: FacilityKey,
    pub pcr_balance: Option<f64>,
    pub pcr_used: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmplifierRow {
    pub key: FacilityKey,
    pub amplifier_balance: Option<f64>,
}

/// One facility report, as built from an increment or read from the base
/// dataset. `None` means "not reported", never zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplyRecord {
    pub key: FacilityKey,
    pub rapid_balance: Option<f64>,
    pub rapid_used: Option<f64>,
    pub pcr_balance: Option<f64>,
    pub pcr_used: Option<f64>,
    pub amplifier_balance: Option<f64>,
}

impl SupplyRecord {
    pub fn empty(key: FacilityKey) -> Self {
        SupplyRecord {
            key,
            rapid_balance: None,
            rapid_used: None,
            pcr_balance: None,
            pcr_used: None,
            amplifier_balance: None,
        }
    }

    pub fn values(&self) -> [Option<f64>; 5] {
        [
            self.rapid_balance,
            self.rapid_used,
            self.pcr_balance,
            self.pcr_used,
            self.amplifier_balance,
        ]
    }

    /// Cells in `RECORD_HEADERS` order.
    pub fn to_cells(&self) -> Vec<Cell> {
        let mut cells = vec![
            Cell::Text(self.key.entity_id.clone()),
            Cell::Text(self.key.region.clone()),
            Cell::Text(self.key.facility_name.clone()),
            Cell::Date(self.key.report_date),
        ];
        cells.extend(
            self.values()
                .into_iter()
                .map(|v| v.map(Cell::Number).unwrap_or(Cell::Empty)),
        );
        cells
    }
}

/// Report dates arrive as spreadsheet serials or as text.
pub fn cell_date(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        Cell::Date(d) => Some(*d),
        Cell::Number(n) => serial_to_date(*n),
        Cell::Text(t) => parse_date_text(t.trim()),
        _ => None,
    }
}

fn parse_date_text(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d.%m.%Y"))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}
