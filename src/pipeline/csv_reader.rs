//! CSV ingestion into prompt items

use super::config::PromptItem;
use crate::error::{helpers::file_not_found, ErrorCode, PipelineError};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: u8,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

fn csv_error(message: impl Into<String>) -> PipelineError {
    PipelineError::validation_with_code(ErrorCode::VALIDATION_CSV, "input.from.path", message)
}

/// Parse CSV text; the first row names the fields
///
/// Short rows are padded with empty strings and surplus cells are dropped
/// with a warning. Blank lines are skipped.
pub fn parse_csv(content: &str, options: CsvOptions) -> Result<Vec<PromptItem>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| csv_error(format!("Failed to read CSV header: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return Err(csv_error("CSV input needs a header row"));
    }
    let mut seen = HashSet::new();
    for header in &headers {
        if header.is_empty() {
            return Err(csv_error("CSV header contains an empty column name"));
        }
        if !seen.insert(header.as_str()) {
            return Err(csv_error(format!("Duplicate CSV column '{}'", header)));
        }
    }

    let mut items = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| csv_error(format!("Malformed CSV row {}: {}", index + 2, e)))?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        if record.len() > headers.len() {
            warn!(
                "CSV row {} has {} cells but only {} columns; extra cells ignored",
                index + 2,
                record.len(),
                headers.len()
            );
        }
        let item: PromptItem = headers
            .iter()
            .enumerate()
            .map(|(i, header)| (header.clone(), record.get(i).unwrap_or("").to_string()))
            .collect();
        items.push(item);
    }
    debug!("Parsed {} CSV rows with columns {:?}", items.len(), headers);
    Ok(items)
}

pub fn read_csv_file(path: &Path, options: CsvOptions) -> Result<Vec<PromptItem>, PipelineError> {
    if !path.exists() {
        return Err(file_not_found(path, "CSV file"));
    }
    let content = std::fs::read_to_string(path)?;
    // Spreadsheet exports often start with a byte order mark
    parse_csv(content.trim_start_matches('\u{feff}'), options)
}
