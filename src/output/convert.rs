//! Conversion of JSON-lines output to CSV

use crate::site::{Record, SOURCE_URL_KEY};
use crate::storage::read_records;
use crate::HarvestError;
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// What a conversion did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
    pub columns: Vec<String>,
    pub rows_read: usize,
    pub rows_written: usize,
    pub malformed_lines: usize,
    pub exact_duplicates: usize,
    pub key_duplicates: usize,
}

/// Converts one or more JSON-lines files into a single CSV file
///
/// Columns are `sourceUrl` followed by the union of field names in the order
/// they are first seen. Malformed lines are skipped and logged. Rows that are
/// identical in every column are written once; with `key`, a row whose key
/// cell was already written is dropped as well (the first one wins). Rows with
/// an empty key cell are never dropped by the key rule.
pub fn convert_jsonl_to_csv(
    inputs: &[PathBuf],
    output: &Path,
    key: Option<&str>,
) -> Result<ConversionReport, HarvestError> {
    let mut report = ConversionReport::default();
    let mut records: Vec<Record> = Vec::new();

    for input in inputs {
        let (mut found, skipped) = read_records(input)?;
        tracing::info!(
            input = %input.display(),
            records = found.len(),
            skipped,
            "Read JSON-lines input"
        );
        report.malformed_lines += skipped;
        records.append(&mut found);
    }
    report.rows_read = records.len();

    report.columns = collect_columns(&records);
    let key_index = match key {
        Some(name) => {
            let index = report.columns.iter().position(|c| c == name).ok_or_else(|| {
                crate::ConfigError::Validation(format!(
                    "dedup key '{}' is not a column of the input",
                    name
                ))
            })?;
            Some(index)
        }
        None => None,
    };

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_writer(File::create(output)?);
    writer.write_record(&report.columns).map_err(std::io::Error::from)?;

    let mut rows_seen: HashSet<Vec<String>> = HashSet::new();
    let mut keys_seen: HashSet<String> = HashSet::new();

    for record in &records {
        let row = to_row(record, &report.columns);

        if rows_seen.contains(&row) {
            report.exact_duplicates += 1;
            continue;
        }
        if let Some(index) = key_index {
            let value = &row[index];
            if !value.is_empty() && !keys_seen.insert(value.clone()) {
                report.key_duplicates += 1;
                continue;
            }
        }

        writer.write_record(&row).map_err(std::io::Error::from)?;
        rows_seen.insert(row);
        report.rows_written += 1;
    }
    writer.flush()?;

    tracing::info!(
        output = %output.display(),
        rows = report.rows_written,
        exact_duplicates = report.exact_duplicates,
        key_duplicates = report.key_duplicates,
        "CSV written"
    );

    Ok(report)
}

fn collect_columns(records: &[Record]) -> Vec<String> {
    let mut columns = vec![SOURCE_URL_KEY.to_string()];
    for record in records {
        for name in record.field_names() {
            if !columns.iter().any(|c| c == name) {
                columns.push(name.to_string());
            }
        }
    }
    columns
}

fn to_row(record: &Record, columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .map(|column| {
            if column == SOURCE_URL_KEY {
                record.source_url().to_string()
            } else {
                record.get(column).map(|v| v.to_cell()).unwrap_or_default()
            }
        })
        .collect()
}
