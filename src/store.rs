use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::model::*;
use crate::xlsx::{self, reader::read_sheet_file, Table};

pub const BASE_FILE_NAME: &str = "covid19_supply_main_data.xlsx";
pub const ARCHIVE_DIR_NAME: &str = "increment_history";
const ARCHIVE_PREFIX: &str = "covid19_supply_increment_";
const RECORD_SHEET: &str = "Sheet1";

/// Where a run keeps its state: one base file and a directory of archives.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

/// What `DataLayout::bootstrap` had to create.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Bootstrap {
    pub created_root: bool,
    pub created_archive_dir: bool,
}

impl Bootstrap {
    /// The archive directory is only missing before the very first run, and
    /// then there is no base dataset yet either.
    pub fn first_run(&self) -> bool {
        self.created_archive_dir
    }
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DataLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_path(&self) -> PathBuf {
        self.root.join(BASE_FILE_NAME)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_DIR_NAME)
    }

    pub fn archive(&self, run_date: NaiveDate) -> ArchiveStore {
        ArchiveStore::new(self.archive_dir(), run_date)
    }

    pub fn bootstrap(&self) -> io::Result<Bootstrap> {
        let mut report = Bootstrap::default();
        report.created_root = ensure_directory(&self.root)?;
        if report.created_root {
            info!(path = %self.root.display(), "created base data directory");
        }
        let archive_dir = self.archive_dir();
        report.created_archive_dir = ensure_directory(&archive_dir)?;
        if report.created_archive_dir {
            info!(path = %archive_dir.display(), "created increment archive directory");
        }
        Ok(report)
    }
}

/// Returns whether the directory had to be created.
fn ensure_directory(dir: &Path) -> io::Result<bool> {
    if dir.exists() {
        if !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("path exists but is not a directory: {}", dir.display()),
            ));
        }
        return Ok(false);
    }
    fs::create_dir_all(dir)?;
    Ok(true)
}

/// Write-once store of per-run increments, one file per run named by the
/// calendar day it ran on.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
    run_date: NaiveDate,
}

impl ArchiveStore {
    pub fn new(dir: impl Into<PathBuf>, run_date: NaiveDate) -> Self {
        ArchiveStore {
            dir: dir.into(),
            run_date,
        }
    }

    /// `<prefix><date>.xlsx` for the first run of the day, then `_2`, `_3`...
    fn candidate(&self, n: usize) -> PathBuf {
        let stem = format!("{}{}", ARCHIVE_PREFIX, self.run_date.format("%Y-%m-%d"));
        let name = if n <= 1 {
            format!("{stem}.xlsx")
        } else {
            format!("{stem}_{n}.xlsx")
        };
        self.dir.join(name)
    }

    /// Archive `records` under a name no earlier run has used. Files are
    /// claimed with `create_new`, so an existing archive is never replaced.
    pub fn save(&self, records: &[SupplyRecord]) -> PipelineResult<PathBuf> {
        ensure_directory(&self.dir)?;
        let mut n = 1;
        let (path, file) = loop {
            let path = self.candidate(n);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e.into()),
            }
        };
        info!(path = %path.display(), "saving increment archive");
        write_or_remove(&path, file, records)?;
        Ok(path)
    }
}

/// Load the base dataset. Its absence stops the run: there is nothing to
/// consolidate into.
pub fn read_base(path: &Path) -> PipelineResult<Vec<SupplyRecord>> {
    if !path.is_file() {
        return Err(PipelineError::MissingBaseDataset {
            path: path.to_path_buf(),
        });
    }
    info!(path = %path.display(), "reading base dataset");
    read_records(path)
}

/// Read a base or archive file. Columns are matched by heading, so files
/// re-saved by a spreadsheet tool with reordered columns still load.
pub fn read_records(path: &Path) -> PipelineResult<Vec<SupplyRecord>> {
    let table = read_sheet_file(path, None)?;
    records_from_table(&table)
}

fn records_from_table(table: &Table) -> PipelineResult<Vec<SupplyRecord>> {
    let mut cols = [0usize; RECORD_HEADERS.len()];
    let mut missing = Vec::new();
    for (slot, name) in RECORD_HEADERS.iter().enumerate() {
        match table.column(name) {
            Some(c) => cols[slot] = c,
            None => missing.push(*name),
        }
    }
    if !missing.is_empty() {
        return Err(PipelineError::MalformedSheet(format!(
            "record file is missing columns: {}",
            missing.join(", ")
        )));
    }

    let mut records = Vec::with_capacity(table.rows.len());
    let mut skipped = 0usize;
    for i in 0..table.rows.len() {
        let cell = |slot: usize| table.cell(i, cols[slot]);
        let key = (|| {
            Some(FacilityKey {
                entity_id: cell(0).as_text()?,
                region: cell(1).as_text()?,
                facility_name: cell(2).as_text()?,
                report_date: cell_date(cell(3))?,
            })
        })();
        let Some(key) = key else {
            skipped += 1;
            continue;
        };
        records.push(SupplyRecord {
            key,
            rapid_balance: cell(4).as_number(),
            rapid_used: cell(5).as_number(),
            pcr_balance: cell(6).as_number(),
            pcr_used: cell(7).as_number(),
            amplifier_balance: cell(8).as_number(),
        });
    }
    if skipped > 0 {
        warn!(skipped, "stored records without a complete facility key were skipped");
    }
    Ok(records)
}

pub fn records_to_table(records: &[SupplyRecord]) -> Table {
    let mut table = Table::new(RECORD_HEADERS.iter().map(|h| h.to_string()).collect());
    table.rows = records.iter().map(SupplyRecord::to_cells).collect();
    table
}

fn write_records(file: File, records: &[SupplyRecord]) -> PipelineResult<()> {
    let mut out = BufWriter::new(file);
    xlsx::write_table(&records_to_table(records), RECORD_SHEET, &mut out)?;
    out.flush()?;
    Ok(())
}

/// A failed write leaves no partial workbook behind under `path`.
fn write_or_remove(path: &Path, file: File, records: &[SupplyRecord]) -> PipelineResult<()> {
    write_records(file, records).inspect_err(|_| {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "could not remove partial workbook");
        }
    })
}

/// Replace the base dataset with `records`, in their current order.
///
/// The new content goes to a sibling temp file that is renamed over the base
/// file, so an interrupted write never leaves a truncated base. There is no
/// locking: two runs against the same directory still race.
pub fn save_base(path: &Path, records: &[SupplyRecord]) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }
    let tmp = path.with_extension("xlsx.tmp");
    info!(path = %path.display(), records = records.len(), "saving base dataset");
    write_or_remove(&tmp, File::create(&tmp)?, records)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
