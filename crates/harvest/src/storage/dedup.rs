//! Identifier extraction and de-duplication from CSV input.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::error::{HarvestError, Result};

/// Default identifier column.
pub const DEFAULT_ID_COLUMN: &str = "conversation_id";

/// Unique, non-blank values in order of first appearance.
///
/// Values are trimmed; blank and missing entries are dropped silently.
pub fn unique_identifiers<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique = Vec::new();
    for value in values.into_iter().flatten() {
        let value = value.as_ref().trim();
        if value.is_empty() {
            continue;
        }
        if seen.insert(value.to_string()) {
            unique.push(value.to_string());
        }
    }
    unique
}

/// Read unique identifiers from `column` of a CSV stream with a header row.
pub fn read_identifiers<R: Read>(reader: R, column: &str) -> Result<Vec<String>> {
    let mut csv = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let index = csv
        .headers()?
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| {
            HarvestError::InputFormat(format!("CSV must contain a '{column}' column"))
        })?;

    let mut values = Vec::new();
    for record in csv.records() {
        let record = record?;
        // Short rows leave the cell missing.
        values.push(record.get(index).map(str::to_string));
    }

    let total = values.len();
    let unique = unique_identifiers(values);
    debug!(rows = total, unique = unique.len(), column, "Extracted identifiers");
    Ok(unique)
}

/// Load unique identifiers from `column` of the CSV file at `path`.
pub fn load_identifiers(path: &Path, column: &str) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(HarvestError::SourceNotFound(path.to_path_buf()));
    }
    let file = std::fs::File::open(path)?;
    read_identifiers(file, column)
}
