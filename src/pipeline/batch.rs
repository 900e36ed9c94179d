use crate::assets::AssetError;
use crate::pipeline::RawRow;
use std::path::Path;
use tracing::warn;

/// Read newline-delimited JSON fixes. Blank lines are ignored and unparsable
/// lines are skipped with a warning.
pub fn read_rows(path: impl AsRef<Path>) -> Result<Vec<RawRow>, AssetError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| AssetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_rows(&contents))
}

pub fn parse_rows(contents: &str) -> Vec<RawRow> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| match serde_json::from_str::<RawRow>(line) {
            Ok(row) => Some(row),
            Err(err) => {
                warn!(line = index + 1, error = %err, "Skipping unparsable row");
                None
            }
        })
        .collect()
}

/// Replay a recorded stream in batches: rows are sorted by timestamp (stable)
/// and a new batch starts once a row is more than `gap_secs` after the row
/// that opened the current batch.
pub fn split_into_batches(mut rows: Vec<RawRow>, gap_secs: i64) -> Vec<Vec<RawRow>> {
    rows.sort_by_key(|row| row.timestamp);

    let mut batches: Vec<Vec<RawRow>> = Vec::new();
    let mut cut = None;
    for row in rows {
        match cut {
            Some(opened) if row.timestamp.saturating_sub(opened) <= gap_secs => {}
            _ => {
                cut = Some(row.timestamp);
                batches.push(Vec::new());
            }
        }
        if let Some(batch) = batches.last_mut() {
            batch.push(row);
        }
    }
    batches
}
