use tracing::{debug, info};

use crate::model::SupplyRecord;

/// Decides which records may enter consolidation.
pub trait CompletenessPolicy {
    fn admits(&self, record: &SupplyRecord) -> bool;
}

/// Every value column must be present. A facility that reported only some
/// categories on a date is dropped entirely, even when it is the newest
/// record for that facility.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequireAllColumns;

impl CompletenessPolicy for RequireAllColumns {
    fn admits(&self, record: &SupplyRecord) -> bool {
        record.values().iter().all(Option::is_some)
    }
}

/// Admits partial records; nulls are carried into the base dataset.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepPartial;

impl CompletenessPolicy for KeepPartial {
    fn admits(&self, _record: &SupplyRecord) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Consolidated {
    pub records: Vec<SupplyRecord>,
    /// Records rejected by the completeness policy.
    pub dropped: usize,
}

/// Merge an increment into the base dataset, keeping one record per facility:
/// the one with the latest report date (SCD type 1).
///
/// Base records come first in the working set and the sort is stable, so on
/// an equal `(entity_id, report_date)` the increment's record wins.
pub fn consolidate(
    increment: Vec<SupplyRecord>,
    base: Vec<SupplyRecord>,
    policy: &dyn CompletenessPolicy,
) -> Consolidated {
    let total = base.len() + increment.len();
    let mut working: Vec<SupplyRecord> = base
        .into_iter()
        .chain(increment)
        .filter(|r| policy.admits(r))
        .collect();
    let dropped = total - working.len();

    working.sort_by(|a, b| {
        (&a.key.entity_id, a.key.report_date).cmp(&(&b.key.entity_id, b.key.report_date))
    });

    let mut records: Vec<SupplyRecord> = Vec::with_capacity(working.len());
    for rec in working {
        match records.last_mut() {
            Some(last) if last.key.entity_id == rec.key.entity_id => *last = rec,
            _ => records.push(rec),
        }
    }

    debug!(total, dropped, "completeness filter applied");
    info!(
        input = total,
        kept = records.len(),
        dropped,
        "merged and deduplicated base and increment"
    );
    Consolidated { records, dropped }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::FacilityKey;

    fn rec(id: &str, date: &str, v: f64) -> SupplyRecord {
        SupplyRecord {
            key: FacilityKey {
                entity_id: id.into(),
                region: "Полтавська".into(),
                facility_name: format!("Заклад {}", id),
                report_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            },
            rapid_balance: Some(v),
            rapid_used: Some(0.0),
            pcr_balance: Some(0.0),
            pcr_used: Some(0.0),
            amplifier_balance: Some(0.0),
        }
    }

    #[test]
    fn newer_increment_replaces_base() {
        let out = consolidate(
            vec![rec("E1", "2024-01-02", 3.0)],
            vec![rec("E1", "2024-01-01", 5.0)],
            &RequireAllColumns,
        );
        assert_eq!(out.records, vec![rec("E1", "2024-01-02", 3.0)]);
        assert_eq!(out.dropped, 0);
    }

    #[test]
    fn late_arrival_does_not_replace_newer_base() {
        let out = consolidate(
            vec![rec("E1", "2024-01-01", 5.0)],
            vec![rec("E1", "2024-01-02", 3.0)],
            &RequireAllColumns,
        );
        assert_eq!(out.records, vec![rec("E1", "2024-01-02", 3.0)]);
    }

    #[test]
    fn keeps_the_maximum_date_per_entity() {
        let base = vec![
            rec("B", "2024-01-05", 1.0),
            rec("A", "2024-01-03", 2.0),
            rec("B", "2024-01-09", 3.0),
        ];
        let increment = vec![
            rec("A", "2024-01-01", 4.0),
            rec("B", "2024-01-07", 5.0),
            rec("C", "2024-01-02", 6.0),
            rec("A", "2024-01-04", 7.0),
        ];
        let out = consolidate(increment, base, &RequireAllColumns);
        assert_eq!(
            out.records,
            vec![
                rec("A", "2024-01-04", 7.0),
                rec("B", "2024-01-09", 3.0),
                rec("C", "2024-01-02", 6.0),
            ]
        );
    }

    #[test]
    fn incomplete_records_never_survive() {
        let mut newest = rec("E1", "2024-01-09", 1.0);
        newest.pcr_used = None;
        let out = consolidate(
            vec![newest.clone()],
            vec![rec("E1", "2024-01-01", 5.0)],
            &RequireAllColumns,
        );
        assert_eq!(out.records, vec![rec("E1", "2024-01-01", 5.0)]);
        assert_eq!(out.dropped, 1);

        let out = consolidate(vec![newest.clone()], vec![], &RequireAllColumns);
        assert!(out.records.is_empty());

        let out = consolidate(
            vec![newest.clone()],
            vec![rec("E1", "2024-01-01", 5.0)],
            &KeepPartial,
        );
        assert_eq!(out.records, vec![newest]);
        assert_eq!(out.dropped, 0);
    }

    #[test]
    fn empty_increment_only_deduplicates_base() {
        let base = vec![
            rec("Z", "2024-01-01", 1.0),
            rec("A", "2024-01-01", 2.0),
            rec("A", "2024-01-02", 3.0),
        ];
        let out = consolidate(vec![], base, &RequireAllColumns);
        assert_eq!(
            out.records,
            vec![rec("A", "2024-01-02", 3.0), rec("Z", "2024-01-01", 1.0)]
        );

        let again = consolidate(vec![], out.records.clone(), &RequireAllColumns);
        assert_eq!(again, out);
    }

    #[test]
    fn same_date_tie_goes_to_increment() {
        let out = consolidate(
            vec![rec("E1", "2024-01-02", 9.0)],
            vec![rec("E1", "2024-01-02", 1.0)],
            &RequireAllColumns,
        );
        assert_eq!(out.records, vec![rec("E1", "2024-01-02", 9.0)]);
    }

    #[test]
    fn renamed_facility_still_deduplicates_on_id() {
        let mut renamed = rec("E1", "2024-01-03", 2.0);
        renamed.key.facility_name = "Нова назва".into();
        renamed.key.region = "Інша".into();
        let out = consolidate(
            vec![renamed.clone()],
            vec![rec("E1", "2024-01-01", 1.0)],
            &RequireAllColumns,
        );
        assert_eq!(out.records, vec![renamed]);
    }
}
