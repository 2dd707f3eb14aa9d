use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::model::*;
use crate::xlsx::{column_name, Table};

/// Per-family rows, value slots already named.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SubTables {
    pub rapid: Vec<RapidRow>,
    pub pcr: Vec<PcrRow>,
    pub amplifier: Vec<AmplifierRow>,
    /// Rows whose indicator is none of the three families.
    pub ignored: usize,
}

struct Columns {
    indicator: usize,
    entity_id: usize,
    region: usize,
    facility: usize,
    report_date: usize,
}

fn locate_columns(table: &Table) -> PipelineResult<Columns> {
    let find = |name: &'static str| table.column(name).ok_or(name);
    let located = [
        find(COL_INDICATOR),
        find(COL_ENTITY_ID),
        find(COL_REGION),
        find(COL_FACILITY),
        find(COL_REPORT_DATE),
    ];
    let missing: Vec<&str> = located.iter().filter_map(|r| r.err()).collect();
    if !missing.is_empty() {
        return Err(PipelineError::MalformedSheet(format!(
            "missing columns: {}",
            missing.join(", ")
        )));
    }
    // Value slots carry no heading, so the header row may stop short of them.
    let width = table
        .rows
        .iter()
        .map(Vec::len)
        .fold(table.headers.len(), usize::max);
    if width <= BALANCE_SLOT {
        return Err(PipelineError::MalformedSheet(format!(
            "expected value columns at {} and {}, sheet has {} columns",
            column_name(BALANCE_SLOT),
            column_name(USED_SLOT),
            width
        )));
    }
    for slot in [BALANCE_SLOT, USED_SLOT] {
        if let Some(h) = table.headers.get(slot).filter(|h| !h.trim().is_empty()) {
            warn!(column = %column_name(slot), heading = %h, "value column is unexpectedly headed");
        }
    }

    let [indicator, entity_id, region, facility, report_date] = located.map(|r| r.unwrap_or(0));
    Ok(Columns {
        indicator,
        entity_id,
        region,
        facility,
        report_date,
    })
}

/// Decode the report sheet into typed rows. The positional value slots are
/// given their meaning here and nowhere else.
///
/// Rows missing any key field cannot be joined or deduplicated and are skipped.
pub fn decode_rows(table: &Table) -> PipelineResult<Vec<SourceRow>> {
    let cols = locate_columns(table)?;
    let mut rows = Vec::with_capacity(table.rows.len());
    let mut skipped = 0usize;

    for i in 0..table.rows.len() {
        let indicator_code = table.cell(i, cols.indicator).as_text().unwrap_or_default();
        let key = (|| {
            Some(FacilityKey {
                entity_id: table.cell(i, cols.entity_id).as_text()?,
                region: table.cell(i, cols.region).as_text()?,
                facility_name: table.cell(i, cols.facility).as_text()?,
                report_date: cell_date(table.cell(i, cols.report_date))?,
            })
        })();
        let Some(key) = key else {
            skipped += 1;
            continue;
        };

        let balance = table.cell(i, BALANCE_SLOT).as_number();
        let used = table.cell(i, USED_SLOT).as_number();
        let reading = match Family::from_code(&indicator_code) {
            Some(Family::Rapid) => Reading::Rapid { balance, used },
            Some(Family::Pcr) => Reading::Pcr { balance, used },
            Some(Family::Amplifier) => Reading::Amplifier { balance },
            None => Reading::Other,
        };
        rows.push(SourceRow {
            indicator_code,
            key,
            reading,
        });
    }

    if skipped > 0 {
        warn!(skipped, "source rows without a complete facility key were skipped");
    }
    debug!(rows = rows.len(), "decoded source rows");
    Ok(rows)
}

/// Split decoded rows into the three category sub-tables. A family whose tag
/// never occurs yields an empty sub-table.
pub fn extract(rows: &[SourceRow]) -> SubTables {
    let mut out = SubTables::default();
    let mut other_codes = BTreeSet::new();
    for row in rows {
        let key = row.key.clone();
        match row.reading {
            Reading::Rapid { balance, used } => out.rapid.push(RapidRow {
                key,
                rapid_balance: balance,
                rapid_used: used,
            }),
            Reading::Pcr { balance, used } => out.pcr.push(PcrRow {
                key,
                pcr_balance: balance,
                pcr_used: used,
            }),
            Reading::Amplifier { balance } => out.amplifier.push(AmplifierRow {
                key,
                amplifier_balance: balance,
            }),
            Reading::Other => {
                out.ignored += 1;
                other_codes.insert(row.indicator_code.as_str());
            }
        }
    }
    if out.ignored > 0 {
        debug!(rows = out.ignored, codes = ?other_codes, "rows with other indicators ignored");
    }
    debug!(
        rapid = out.rapid.len(),
        pcr = out.pcr.len(),
        amplifier = out.amplifier.len(),
        "extracted category sub-tables"
    );
    out
}
