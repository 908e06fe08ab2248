use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::config::OutputFormat;
use crate::formatter::{render_csv, render_json_pretty, render_markdown, render_table, TableStyle};
use crate::query_executor::QueryResult;

const MAX_NAME_ATTEMPTS: usize = 100;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to create export file at {path}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write export file at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReceipt {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub rows: usize,
}

#[must_use]
pub fn unix_timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[must_use]
pub fn export_file_name(format: OutputFormat, unix_secs: u64) -> String {
    format!("export_{unix_secs}.{}", format.extension())
}

/// Text written for `format`; JSON is pretty-printed for files.
#[must_use]
pub fn export_content(format: OutputFormat, result: &QueryResult, style: &TableStyle) -> String {
    match format {
        OutputFormat::Table => render_table(result.columns(), result.rows(), style),
        OutputFormat::Csv => render_csv(result.columns(), result.rows()),
        OutputFormat::Json => render_json_pretty(result.columns(), result.rows()),
        OutputFormat::Markdown => render_markdown(result.columns(), result.rows()),
    }
}

/// Writes `result` into `directory` as `export_<unixtime>.<ext>`, picking a
/// numbered variant when that name is taken.
pub fn export_result(
    directory: &Path,
    format: OutputFormat,
    result: &QueryResult,
    style: &TableStyle,
) -> Result<ExportReceipt, ExportError> {
    let content = export_content(format, result, style);
    let (path, file) = create_unique(directory, format, unix_timestamp_secs())?;
    write_content(&path, file, &content)?;

    tracing::info!(path = %path.display(), rows = result.row_count(), "exported results");
    Ok(ExportReceipt {
        path,
        format,
        rows: result.row_count(),
    })
}

/// Writes an export to an explicit path, replacing any existing file.
pub fn export_to_path(
    path: &Path,
    format: OutputFormat,
    result: &QueryResult,
    style: &TableStyle,
) -> Result<ExportReceipt, ExportError> {
    let file = File::create(path).map_err(|source| ExportError::FileCreateFailed {
        path: path.to_path_buf(),
        source,
    })?;
    write_content(path, file, &export_content(format, result, style))?;
    Ok(ExportReceipt {
        path: path.to_path_buf(),
        format,
        rows: result.row_count(),
    })
}

fn create_unique(
    directory: &Path,
    format: OutputFormat,
    unix_secs: u64,
) -> Result<(PathBuf, File), ExportError> {
    let mut path = directory.join(export_file_name(format, unix_secs));
    for attempt in 1..=MAX_NAME_ATTEMPTS {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                path = directory.join(format!(
                    "export_{unix_secs}_{attempt}.{}",
                    format.extension()
                ));
            }
            Err(source) => return Err(ExportError::FileCreateFailed { path, source }),
        }
    }

    Err(ExportError::FileCreateFailed {
        path,
        source: io::Error::new(io::ErrorKind::AlreadyExists, "no free export file name"),
    })
}

fn write_content(path: &Path, mut file: File, content: &str) -> Result<(), ExportError> {
    file.write_all(content.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|source| ExportError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })
}
