use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use crate::error::IngestError;

pub const TIMESTAMP_COLUMN: &str = "datetime";

const BYTE_ORDER_MARK: char = '\u{feff}';

/// Header renames applied before rows reach the builder. Older EUC World releases
/// wrote `totaldistance`.
pub fn default_aliases() -> HashMap<String, String> {
    HashMap::from([("totaldistance".to_string(), "total_distance".to_string())])
}

/// A data row together with the (normalized) header of the file it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRow {
    pub header: Arc<[String]>,
    pub fields: Vec<String>,
    /// 1-based line in the source file, for logging.
    pub line: u64,
}

/// Single pass, streaming reader over one telemetry CSV file.
///
/// Construction reads the header and fails with `MalformedHeader` unless its first
/// column is `datetime`. Iterating yields rows one at a time, without buffering the
/// file. Rows may be shorter or longer than the header.
pub struct FileParser<R: Read> {
    file: String,
    header: Arc<[String]>,
    records: csv::ByteRecordsIntoIter<R>,
}

impl<R: Read> FileParser<R> {
    pub fn new(
        file: &str,
        reader: R,
        aliases: &HashMap<String, String>,
    ) -> Result<Self, IngestError> {
        // csv skips blank lines, so the first record is the first non-empty line
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut record = csv::ByteRecord::new();
        let found = reader
            .read_byte_record(&mut record)
            .map_err(|e| IngestError::Transport(format!("failed to read {file}: {e}")))?;
        if !found {
            return Err(IngestError::MalformedHeader {
                file: file.to_owned(),
                reason: "file has no header line".to_string(),
            });
        }

        let header: Vec<String> = record
            .iter()
            .map(|field| {
                let name = String::from_utf8_lossy(field);
                let name = name.trim_start_matches(BYTE_ORDER_MARK).trim();
                aliases
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| name.to_owned())
            })
            .collect();

        match header.first() {
            Some(first) if first == TIMESTAMP_COLUMN => {}
            first => {
                return Err(IngestError::MalformedHeader {
                    file: file.to_owned(),
                    reason: format!(
                        "expected first column {TIMESTAMP_COLUMN:?}, found {:?}",
                        first.map(String::as_str).unwrap_or_default()
                    ),
                })
            }
        }

        Ok(Self {
            file: file.to_owned(),
            header: header.into(),
            records: reader.into_byte_records(),
        })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }
}

impl<R: Read> Iterator for FileParser<R> {
    type Item = Result<ParsedRow, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => {
                return Some(Err(IngestError::Transport(format!(
                    "failed to read {}: {e}",
                    self.file
                ))))
            }
        };

        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let fields = record
            .iter()
            .map(|field| String::from_utf8_lossy(field).into_owned())
            .collect();

        Some(Ok(ParsedRow {
            header: self.header.clone(),
            fields,
            line,
        }))
    }
}
