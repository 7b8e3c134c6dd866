// 📄 Tabular Parser
// Delimited text → ordered header row + row records (header → cell).

use crate::delimiter::Delimiter;
use crate::error::Result;
use csv::{ReaderBuilder, WriterBuilder};
use std::collections::HashMap;
use std::io;

// ============================================================================
// CORE TYPES
// ============================================================================

/// One data row. Every header of the table has an entry; cells missing from
/// a short line are stored as empty strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Line in the decoded text where this row starts (1-indexed)
    pub line_number: usize,
    cells: HashMap<String, String>,
}

impl Record {
    /// Cell for `header`, or "" when the header is not part of the table.
    pub fn get(&self, header: &str) -> &str {
        self.cells.get(header).map(String::as_str).unwrap_or("")
    }

    pub fn contains(&self, header: &str) -> bool {
        self.cells.contains_key(header)
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTable {
    /// Header row in file order, original casing, duplicates kept
    pub headers: Vec<String>,
    pub rows: Vec<Record>,
    /// Rows that had more fields than the header; extra fields are dropped.
    pub overflow_rows: usize,
}

impl ParsedTable {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.rows.is_empty()
    }

    /// True when there is no usable header row at all.
    pub fn has_header_row(&self) -> bool {
        self.headers.iter().any(|h| !h.trim().is_empty())
    }

    /// Serialize back to delimited text (header row first, standard quoting).
    pub fn to_csv(&self, delimiter: Delimiter) -> Result<String> {
        let mut writer = WriterBuilder::new()
            .delimiter(delimiter.as_byte())
            .from_writer(Vec::new());

        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(self.headers.iter().map(|h| row.get(h)))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| csv::Error::from(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        Ok(text)
    }
}

// ============================================================================
// PARSER
// ============================================================================

/// Parse `text` with the given delimiter. The first record is the header row;
/// short lines are padded with empty cells, never dropped. Empty input yields
/// an empty table.
pub fn parse(text: &str, delimiter: Delimiter) -> Result<ParsedTable> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter.as_byte())
        .from_reader(text.as_bytes());

    let mut records = reader.records();

    let headers: Vec<String> = match records.next() {
        Some(result) => result?.iter().map(str::to_string).collect(),
        None => return Ok(ParsedTable::default()),
    };

    let mut rows = Vec::new();
    let mut overflow_rows = 0;

    for result in records {
        let record = result?;
        let line_number = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(rows.len() + 2);

        if record.len() > headers.len() {
            overflow_rows += 1;
        }

        // Later duplicate headers overwrite earlier ones
        let mut cells = HashMap::with_capacity(headers.len());
        for (idx, header) in headers.iter().enumerate() {
            let value = record.get(idx).unwrap_or("").to_string();
            cells.insert(header.clone(), value);
        }

        rows.push(Record { line_number, cells });
    }

    if overflow_rows > 0 {
        tracing::warn!(overflow_rows, "rows with more fields than headers; extras dropped");
    }
    tracing::debug!(headers = headers.len(), rows = rows.len(), "parsed table");

    Ok(ParsedTable {
        headers,
        rows,
        overflow_rows,
    })
}

// ============================================================================
// TESTS
// ============================================================================
