use crate::error::AppError;
use crate::pipeline::RefinedRecord;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Destination for refined records, one call per batch.
pub trait RecordSink {
    fn append(&mut self, records: &[RefinedRecord]) -> Result<(), AppError>;
}

impl RecordSink for Vec<RefinedRecord> {
    fn append(&mut self, records: &[RefinedRecord]) -> Result<(), AppError> {
        self.extend_from_slice(records);
        Ok(())
    }
}

/// Appends records as JSON lines to a file, creating it (and its directory) on first use.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop anything written by a previous run.
    pub fn truncate(&self) -> Result<(), AppError> {
        write_json_lines::<RefinedRecord>(&self.path, &[], false)
    }
}

impl RecordSink for JsonLinesSink {
    fn append(&mut self, records: &[RefinedRecord]) -> Result<(), AppError> {
        write_json_lines(&self.path, records, true)
    }
}

/// Write `items` as JSON lines, appending or replacing the file.
pub fn write_json_lines<T: Serialize>(
    path: &Path,
    items: &[T],
    append: bool,
) -> Result<(), AppError> {
    let write_err = |source| AppError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(write_err)?;

    let mut writer = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut writer, item)?;
        writer.write_all(b"\n").map_err(write_err)?;
    }
    writer.flush().map_err(write_err)
}
