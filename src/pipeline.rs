use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::info;

use crate::consolidate::{consolidate, CompletenessPolicy, KeepPartial, RequireAllColumns};
use crate::error::{PipelineError, PipelineResult};
use crate::fetch::Fetcher;
use crate::locator::{HeadingSiblingLink, ReportLocator};
use crate::model::SupplyRecord;
use crate::settings::Settings;
use crate::store::{self, DataLayout, BASE_FILE_NAME};
use crate::xlsx::{self, XlsxError};
use crate::{extract, increment};

pub struct RunOptions {
    /// Report URL or local path; `None` means discover it on the landing page.
    pub document: Option<String>,
    pub keep_partial: bool,
    /// Calendar day the increment archive is named after.
    pub run_date: NaiveDate,
}

#[derive(Debug)]
pub struct MergeSummary {
    pub base_before: usize,
    pub base_after: usize,
    pub dropped: usize,
}

#[derive(Debug)]
pub struct RunSummary {
    pub source: String,
    pub rapid: usize,
    pub pcr: usize,
    pub amplifier: usize,
    pub increment_records: usize,
    pub archive_path: PathBuf,
    pub merge: MergeSummary,
}

impl RunSummary {
    pub fn print(&self) {
        println!(
            "Extracted {} rapid, {} PCR, {} amplifier rows -> {} increment records.",
            self.rapid, self.pcr, self.amplifier, self.increment_records
        );
        println!("Increment archived at {}", self.archive_path.display());
        self.merge.print();
    }
}

impl MergeSummary {
    pub fn print(&self) {
        println!(
            "Base dataset: {} -> {} records ({} incomplete records dropped).",
            self.base_before, self.base_after, self.dropped
        );
    }
}

/// What happens once a run is over, successful or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnCompletion {
    /// Hold the console window open until the operator presses Enter.
    Pause,
    Exit,
}

impl OnCompletion {
    pub fn new(pause: bool) -> Self {
        if pause {
            OnCompletion::Pause
        } else {
            OnCompletion::Exit
        }
    }

    pub fn finish(self) {
        if self == OnCompletion::Pause {
            print!("Press Enter to close the window and finish execution");
            let _ = io::stdout().flush();
            let mut line = String::new();
            let _ = io::stdin().read_line(&mut line);
        }
    }
}

pub fn missing_base_guidance(path: &Path) -> String {
    format!(
        "Main data file is absent. Please, insert it in {} with respect to main file name convention ('{}') and restart the program",
        path.display(),
        BASE_FILE_NAME
    )
}

pub fn first_run_guidance(layout: &DataLayout) -> String {
    format!(
        "This program will fail now. Please, place base data in xlsx format with name '{}' in directory {}",
        BASE_FILE_NAME,
        layout.root().display()
    )
}

fn policy(keep_partial: bool) -> &'static dyn CompletenessPolicy {
    if keep_partial {
        &KeepPartial
    } else {
        &RequireAllColumns
    }
}

/// Create the data directories, announcing anything that had to be created.
pub fn bootstrap(layout: &DataLayout) -> PipelineResult<()> {
    let report = layout.bootstrap()?;
    if report.created_root {
        println!("Created base directory for COVID19 supply data: {}", layout.root().display());
    }
    if report.created_archive_dir {
        println!(
            "Created directory for COVID19 supply data increments history: {}",
            layout.archive_dir().display()
        );
    }
    if report.first_run() {
        println!("{}", first_run_guidance(layout));
    }
    Ok(())
}

pub async fn locate_latest(fetcher: &Fetcher, settings: &Settings) -> PipelineResult<String> {
    let html = fetcher.page(&settings.page_url).await?;
    let locator = HeadingSiblingLink::new(&settings.base_url, settings.heading_index);
    let url = locator.locate(&html)?;
    info!(url = %url, "located latest report");
    Ok(url)
}

/// Fetch, extract, archive, consolidate, persist. Strictly sequential.
pub async fn run(settings: &Settings, opts: &RunOptions) -> PipelineResult<RunSummary> {
    let layout = DataLayout::new(&settings.data_dir);
    bootstrap(&layout)?;

    let fetcher = Fetcher::new();
    let source = match &opts.document {
        Some(doc) => doc.clone(),
        None => locate_latest(&fetcher, settings).await?,
    };
    let bytes = fetcher.document(&source).await?;
    let table = xlsx::read_sheet(Cursor::new(bytes), &settings.sheet_name).map_err(|e| match e {
        XlsxError::SheetNotFound(name) => {
            PipelineError::MalformedSheet(format!("sheet '{}' not found in {}", name, source))
        }
        other => other.into(),
    })?;
    info!(rows = table.rows.len(), sheet = %settings.sheet_name, "report sheet loaded");

    let rows = extract::decode_rows(&table)?;
    let subs = extract::extract(&rows);
    let inc = increment::build(&subs, &layout.archive(opts.run_date))?;
    let increment_records = inc.records.len();

    println!("Reading the main data from Excel sheet");
    let merge = merge_into_base(&layout, inc.records, opts.keep_partial)?;

    Ok(RunSummary {
        source,
        rapid: subs.rapid.len(),
        pcr: subs.pcr.len(),
        amplifier: subs.amplifier.len(),
        increment_records,
        archive_path: inc.archive_path,
        merge,
    })
}

/// Consolidate `increment` into the base dataset and overwrite it. Nothing is
/// written when the base dataset is missing.
pub fn merge_into_base(
    layout: &DataLayout,
    increment: Vec<SupplyRecord>,
    keep_partial: bool,
) -> PipelineResult<MergeSummary> {
    let base_path = layout.base_path();
    let base = store::read_base(&base_path)?;
    let base_before = base.len();

    println!("Merging and deduplicating data from base and incremental sheets");
    let out = consolidate(increment, base, policy(keep_partial));
    println!("Saving data to path: {}", base_path.display());
    store::save_base(&base_path, &out.records)?;

    Ok(MergeSummary {
        base_before,
        base_after: out.records.len(),
        dropped: out.dropped,
    })
}

/// Re-apply an archived increment, e.g. one whose consolidation failed
/// after archiving.
pub fn merge_archive(
    settings: &Settings,
    archive: &Path,
    keep_partial: bool,
) -> PipelineResult<MergeSummary> {
    let layout = DataLayout::new(&settings.data_dir);
    let increment = store::read_records(archive)?;
    info!(path = %archive.display(), records = increment.len(), "loaded archived increment");
    merge_into_base(&layout, increment, keep_partial)
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::extract::tests::report_table;
    use crate::model::FacilityKey;
    use crate::xlsx::Cell;

    fn settings(data_dir: &Path) -> Settings {
        Settings {
            page_url: "http://127.0.0.1:9/unused".into(),
            base_url: "http://127.0.0.1:9".into(),
            sheet_name: "Дані по лікарням".into(),
            heading_index: 2,
            data_dir: data_dir.to_path_buf(),
            pause_on_exit: false,
        }
    }

    fn write_report(path: &Path, sheet: &str) {
        // All report rows are dated 2024-01-01.
        let table = report_table(&[
            ("rapid_tests_current", "100", "A", Cell::Number(10.0), Cell::Number(1.0)),
            ("rcp_current", "100", "A", Cell::Number(20.0), Cell::Number(2.0)),
            ("delivery156", "100", "A", Cell::Number(3.0), Cell::Empty),
            ("rapid_tests_current", "200", "B", Cell::Number(5.0), Cell::Number(5.0)),
        ]);
        xlsx::write_table(&table, sheet, File::create(path).unwrap()).unwrap();
    }

    fn base_record(id: &str, day: u32) -> SupplyRecord {
        SupplyRecord {
            key: FacilityKey {
                entity_id: id.into(),
                region: "Львівська".into(),
                facility_name: "A".into(),
                report_date: NaiveDate::from_ymd_opt(2023, 12, day).unwrap(),
            },
            rapid_balance: Some(1.0),
            rapid_used: Some(1.0),
            pcr_balance: Some(1.0),
            pcr_used: Some(1.0),
            amplifier_balance: Some(1.0),
        }
    }

    fn opts(report: &Path) -> RunOptions {
        RunOptions {
            document: Some(report.to_string_lossy().to_string()),
            keep_partial: false,
            run_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        }
    }

    #[tokio::test]
    async fn full_run_from_local_report() {
        let tmp = tempfile::tempdir().unwrap();
        let s = settings(&tmp.path().join("data"));
        let layout = DataLayout::new(&s.data_dir);
        layout.bootstrap().unwrap();
        store::save_base(&layout.base_path(), &[base_record("100", 30), base_record("300", 31)]).unwrap();

        let report = tmp.path().join("report.xlsx");
        write_report(&report, &s.sheet_name);

        let summary = run(&s, &opts(&report)).await.unwrap();
        assert_eq!((summary.rapid, summary.pcr, summary.amplifier), (2, 1, 1));
        assert_eq!(summary.increment_records, 2);
        assert_eq!(summary.merge.base_before, 2);
        // Facility 200 has no PCR or amplifier report and is dropped.
        assert_eq!(summary.merge.dropped, 1);
        assert_eq!(summary.merge.base_after, 2);
        assert!(summary.archive_path.ends_with("increment_history/covid19_supply_increment_2024-01-02.xlsx"));

        let base = store::read_base(&layout.base_path()).unwrap();
        let ids: Vec<(&str, NaiveDate)> = base
            .iter()
            .map(|r| (r.key.entity_id.as_str(), r.key.report_date))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("100", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
                ("300", NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()),
            ]
        );
        assert_eq!(base[0].rapid_balance, Some(10.0));
        assert_eq!(base[0].pcr_used, Some(2.0));
        // The amplifier "used" slot is never read.
        assert_eq!(base[0].amplifier_balance, Some(3.0));

        let archived = store::read_records(&summary.archive_path).unwrap();
        assert_eq!(archived.len(), 2);
        assert_eq!(archived[1].pcr_balance, None);
    }

    #[tokio::test]
    async fn missing_base_keeps_archive_and_writes_no_base() {
        let tmp = tempfile::tempdir().unwrap();
        let s = settings(&tmp.path().join("data"));
        let report = tmp.path().join("report.xlsx");
        write_report(&report, &s.sheet_name);

        let err = run(&s, &opts(&report)).await.unwrap_err();
        let layout = DataLayout::new(&s.data_dir);
        match err {
            PipelineError::MissingBaseDataset { path } => assert_eq!(path, layout.base_path()),
            other => panic!("expected MissingBaseDataset, got {:?}", other),
        }
        assert!(!layout.base_path().exists());
        assert!(layout
            .archive_dir()
            .join("covid19_supply_increment_2024-01-02.xlsx")
            .exists());
        assert!(missing_base_guidance(&layout.base_path()).contains(&layout.base_path().display().to_string()));
    }

    #[tokio::test]
    async fn wrong_sheet_is_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        let s = settings(&tmp.path().join("data"));
        let report = tmp.path().join("report.xlsx");
        write_report(&report, "Інший лист");

        let err = run(&s, &opts(&report)).await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedSheet(_)));
    }

    #[tokio::test]
    async fn second_run_same_day_gets_its_own_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let s = settings(&tmp.path().join("data"));
        let layout = DataLayout::new(&s.data_dir);
        layout.bootstrap().unwrap();
        store::save_base(&layout.base_path(), &[]).unwrap();
        let report = tmp.path().join("report.xlsx");
        write_report(&report, &s.sheet_name);

        let first = run(&s, &opts(&report)).await.unwrap();
        let second = run(&s, &opts(&report)).await.unwrap();
        assert_ne!(first.archive_path, second.archive_path);
        assert!(first.archive_path.exists() && second.archive_path.exists());
        assert_eq!(second.merge.base_before, first.merge.base_after);
        assert_eq!(second.merge.base_after, first.merge.base_after);
    }

    #[test]
    fn merge_archive_replays_an_increment() {
        let tmp = tempfile::tempdir().unwrap();
        let s = settings(tmp.path());
        let layout = DataLayout::new(&s.data_dir);
        let archive = layout.archive(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        let mut newer = base_record("100", 31);
        newer.rapid_balance = Some(42.0);
        let path = archive.save(&[newer.clone()]).unwrap();
        store::save_base(&layout.base_path(), &[base_record("100", 1)]).unwrap();

        let summary = merge_archive(&s, &path, false).unwrap();
        assert_eq!((summary.base_before, summary.base_after), (1, 1));
        assert_eq!(store::read_base(&layout.base_path()).unwrap(), vec![newer]);
    }

    #[test]
    fn completion_mode_from_flag() {
        assert_eq!(OnCompletion::new(true), OnCompletion::Pause);
        assert_eq!(OnCompletion::new(false), OnCompletion::Exit);
        OnCompletion::Exit.finish();
    }
}
