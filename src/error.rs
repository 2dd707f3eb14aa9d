use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::xlsx::XlsxError;

/// Failures a pipeline run can end with.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The landing page no longer has the structure the locator expects.
    #[error("report link not found on landing page: {0}")]
    SourceLayoutMismatch(String),
    #[error("base dataset not found at {}", path.display())]
    MissingBaseDataset { path: PathBuf },
    #[error("malformed report sheet: {0}")]
    MalformedSheet(String),
    #[error(transparent)]
    Workbook(#[from] XlsxError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
