use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::PipelineResult;
use crate::extract::SubTables;
use crate::model::{FacilityKey, SupplyRecord};
use crate::store::ArchiveStore;

/// Increment for one run, already archived.
#[derive(Debug)]
pub struct Increment {
    pub records: Vec<SupplyRecord>,
    pub archive_path: PathBuf,
}

/// Full outer join of the three sub-tables on the facility key: rapid with pcr
/// first, then the result with amplifier. A key missing from a family keeps
/// that family's values null.
///
/// Output is ordered by key. A key repeated inside one family keeps its last
/// row.
pub fn join(subs: &SubTables) -> Vec<SupplyRecord> {
    let mut merged: BTreeMap<FacilityKey, SupplyRecord> = BTreeMap::new();
    let mut repeats = 0usize;

    let mut seen = std::collections::HashSet::new();
    for row in &subs.rapid {
        repeats += usize::from(!seen.insert(&row.key));
        let rec = entry(&mut merged, &row.key);
        rec.rapid_balance = row.rapid_balance;
        rec.rapid_used = row.rapid_used;
    }

    seen.clear();
    for row in &subs.pcr {
        repeats += usize::from(!seen.insert(&row.key));
        let rec = entry(&mut merged, &row.key);
        rec.pcr_balance = row.pcr_balance;
        rec.pcr_used = row.pcr_used;
    }

    seen.clear();
    for row in &subs.amplifier {
        repeats += usize::from(!seen.insert(&row.key));
        entry(&mut merged, &row.key).amplifier_balance = row.amplifier_balance;
    }

    if repeats > 0 {
        warn!(repeats, "facility key reported more than once for the same indicator");
    }
    merged.into_values().collect()
}

fn entry<'a>(
    merged: &'a mut BTreeMap<FacilityKey, SupplyRecord>,
    key: &FacilityKey,
) -> &'a mut SupplyRecord {
    merged
        .entry(key.clone())
        .or_insert_with(|| SupplyRecord::empty(key.clone()))
}

/// Join the sub-tables and archive the result before handing it back, so the
/// increment survives a later consolidation failure.
pub fn build(subs: &SubTables, archive: &ArchiveStore) -> PipelineResult<Increment> {
    let records = join(subs);
    let archive_path = archive.save(&records)?;
    info!(
        records = records.len(),
        path = %archive_path.display(),
        "increment archived"
    );
    Ok(Increment {
        records,
        archive_path,
    })
}
