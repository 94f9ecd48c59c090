//! CSV decoding and record normalization.
//!
//! Input flows `decode_csv` -> `normalize_record` -> `ImportBatch`. Decoding
//! is all-or-nothing: a malformed row fails the whole input before anything
//! is normalized. Normalization is a pure function of the raw record and the
//! registry.

use std::io::Read;

use cms_db::DbValue;
use csv::ReaderBuilder;
use tracing::debug;

use crate::error::{ImportError, Result};
use crate::registry::SchemaRegistry;

/// One input row as `(raw header, raw value)` pairs in column order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRecord {
    pairs: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<H, V> FromIterator<(H, V)> for RawRecord
where
    H: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (H, V)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(h, v)| (h.into(), v.into())).collect())
    }
}

/// A record with exactly one slot per canonical field, in registry order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecord {
    values: Vec<Option<String>>,
}

impl NormalizedRecord {
    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the field at a registry position.
    pub fn get(&self, position: usize) -> Option<&str> {
        self.values.get(position).and_then(|v| v.as_deref())
    }

    /// Value of a field addressed by any spelling the registry resolves.
    pub fn get_by_name(&self, registry: &SchemaRegistry, name: &str) -> Option<&str> {
        registry.position(name).and_then(|i| self.get(i))
    }

    pub fn non_null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    pub fn to_db_values(&self) -> Vec<DbValue> {
        self.values.iter().cloned().map(DbValue::from).collect()
    }
}

/// Normalized records ready for a single bulk insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBatch {
    columns: Vec<String>,
    records: Vec<NormalizedRecord>,
    total_rows: usize,
}

impl ImportBatch {
    /// Canonical column list shared by every record.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Data rows seen by the decoder, kept or not.
    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    /// Rows excluded because no canonical field carried a value.
    pub fn skipped_rows(&self) -> usize {
        self.total_rows - self.records.len()
    }

    pub fn to_db_rows(&self) -> Vec<Vec<DbValue>> {
        self.records.iter().map(NormalizedRecord::to_db_values).collect()
    }
}

/// Decode delimited text with a header row into raw records.
///
/// Rows must all have the header's field count and be valid UTF-8, and every
/// quoted field must be closed before the input ends. Input with no bytes, or
/// only a header, decodes to zero records.
pub fn decode_csv<R: Read>(mut reader: R) -> Result<Vec<RawRecord>> {
    let mut input = Vec::new();
    reader
        .read_to_end(&mut input)
        .map_err(|e| ImportError::Decode(format!("failed to read input: {}", e)))?;
    check_quotes_closed(&input)?;

    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(input.as_slice());

    let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();

    let mut records = Vec::new();
    for row in csv_reader.records() {
        let row = row?;
        let pairs = headers
            .iter()
            .cloned()
            .zip(row.iter().map(str::to_string))
            .collect();
        records.push(RawRecord::new(pairs));
    }

    debug!(columns = headers.len(), rows = records.len(), "decoded CSV input");
    Ok(records)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    FieldStart,
    Unquoted,
    Quoted,
    /// A quote inside a quoted field: either `""` or the closing quote.
    QuoteInQuoted,
}

/// Fail when the input ends inside a quoted field.
///
/// The `csv` reader accepts such input and returns everything up to EOF as
/// the field's value. Quotes only open a field at its first byte, matching
/// the reader's default dialect.
fn check_quotes_closed(input: &[u8]) -> Result<()> {
    let body = input.strip_prefix(b"\xef\xbb\xbf").unwrap_or(input);

    let mut state = QuoteState::FieldStart;
    let mut line = 1usize;
    let mut opened_on = 1usize;
    for &byte in body {
        if byte == b'\n' {
            line += 1;
        }
        state = match (state, byte) {
            (QuoteState::FieldStart, b'"') => {
                opened_on = line;
                QuoteState::Quoted
            }
            (QuoteState::FieldStart | QuoteState::Unquoted, b',' | b'\n' | b'\r') => {
                QuoteState::FieldStart
            }
            (QuoteState::FieldStart | QuoteState::Unquoted, _) => QuoteState::Unquoted,
            (QuoteState::Quoted, b'"') => QuoteState::QuoteInQuoted,
            (QuoteState::Quoted, _) => QuoteState::Quoted,
            (QuoteState::QuoteInQuoted, b'"') => QuoteState::Quoted,
            (QuoteState::QuoteInQuoted, b',' | b'\n' | b'\r') => QuoteState::FieldStart,
            (QuoteState::QuoteInQuoted, _) => QuoteState::Unquoted,
        };
    }

    if state == QuoteState::Quoted {
        return Err(ImportError::Decode(format!(
            "unterminated quoted field starting on line {}",
            opened_on
        )));
    }
    Ok(())
}

/// Project a raw record onto the canonical field set.
///
/// Unknown headers are dropped, empty values become null, and a later header
/// resolving to the same field overwrites an earlier one. Returns `None` when
/// no field ends up with a value.
pub fn normalize_record(registry: &SchemaRegistry, raw: &RawRecord) -> Option<NormalizedRecord> {
    let mut values: Vec<Option<String>> = vec![None; registry.len()];
    for (header, value) in raw.pairs() {
        if let Some(position) = registry.position(header) {
            values[position] = if value.is_empty() {
                None
            } else {
                Some(value.clone())
            };
        }
    }

    if values.iter().all(Option::is_none) {
        return None;
    }
    Some(NormalizedRecord { values })
}

/// Normalize raw records into a batch, preserving input order.
pub fn build_batch(registry: &SchemaRegistry, raws: &[RawRecord]) -> ImportBatch {
    let records: Vec<NormalizedRecord> = raws
        .iter()
        .filter_map(|raw| normalize_record(registry, raw))
        .collect();

    let batch = ImportBatch {
        columns: registry.column_names().into_iter().map(str::to_string).collect(),
        records,
        total_rows: raws.len(),
    };
    debug!(
        total_rows = batch.total_rows(),
        kept = batch.len(),
        skipped = batch.skipped_rows(),
        "built import batch"
    );
    batch
}

pub fn batch_from_reader<R: Read>(registry: &SchemaRegistry, reader: R) -> Result<ImportBatch> {
    let raws = decode_csv(reader)?;
    Ok(build_batch(registry, &raws))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImportError;
    use crate::registry::FieldDescriptor;

    fn people() -> SchemaRegistry {
        SchemaRegistry::new(
            "PEOPLE",
            vec![
                FieldDescriptor::key("ref_no", 64),
                FieldDescriptor::bounded("name", 100),
                FieldDescriptor::bounded("age", 10),
            ],
        )
        .unwrap()
    }

    #[test]
    fn empty_values_become_null() {
        let registry = people();
        let raw: RawRecord = [("Name", "Alice"), ("Age", "")].into_iter().collect();
        let record = normalize_record(&registry, &raw).unwrap();
        assert_eq!(record.len(), 3);
        assert_eq!(record.get_by_name(&registry, "name"), Some("Alice"));
        assert_eq!(record.get_by_name(&registry, "age"), None);
        assert_eq!(record.get_by_name(&registry, "ref_no"), None);
    }

    #[test]
    fn all_empty_row_is_excluded() {
        let registry = people();
        let raw: RawRecord = [("Name", ""), ("Age", ""), ("Unknown", "x")]
            .into_iter()
            .collect();
        assert!(normalize_record(&registry, &raw).is_none());
    }

    #[test]
    fn later_duplicate_header_wins() {
        let registry = people();
        let raw: RawRecord = [("name", "first"), ("NAME ", "second")].into_iter().collect();
        let record = normalize_record(&registry, &raw).unwrap();
        assert_eq!(record.get(1), Some("second"));

        // An empty later duplicate still overwrites.
        let raw: RawRecord = [("Age", "40"), ("Name", "Bo"), ("age", "")].into_iter().collect();
        let record = normalize_record(&registry, &raw).unwrap();
        assert_eq!(record.get(2), None);
        assert_eq!(record.non_null_count(), 1);
    }

    #[test]
    fn decode_header_only_and_empty_input() {
        assert!(decode_csv("".as_bytes()).unwrap().is_empty());
        assert!(decode_csv("name,age\n".as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_unequal_rows() {
        let err = decode_csv("name,age\nAlice,30\nBob\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ImportError::Decode(_)), "{err}");
    }

    #[test]
    fn decode_rejects_unterminated_quote() {
        let err = decode_csv("name,age\nAlice,\"30\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ImportError::Decode(_)), "{err}");
        assert!(err.to_string().contains("line 2"), "{err}");

        let err = decode_csv("name\n\"Alice\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ImportError::Decode(_)), "{err}");

        // The opening quote may sit several lines before the end.
        let err = decode_csv("name,age\nA,1\n\"B,2\nC,3\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
    }

    #[test]
    fn decode_accepts_closed_and_literal_quotes() {
        let input = "name,note\n\"Smith, J\",\"said \"\"hi\"\"\nthen left\"\nBo,5\" tall\n";
        let records = decode_csv(input.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pairs()[0].1, "Smith, J");
        assert_eq!(records[0].pairs()[1].1, "said \"hi\"\nthen left");
        assert_eq!(records[1].pairs()[1].1, "5\" tall");

        let with_bom = "\u{feff}\"name\",age\n\"Al\",1\n";
        assert_eq!(decode_csv(with_bom.as_bytes()).unwrap().len(), 1);
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let input: &[u8] = b"name,age\n\xff\xfe,30\n";
        let err = decode_csv(input).unwrap_err();
        assert!(matches!(err, ImportError::Decode(_)), "{err}");
    }

    #[test]
    fn batch_counts_skipped_rows() {
        let registry = people();
        let input = "Ref No,Name,Age,Extra\n,Alice,,x\n,,,y\nR-2,Bob,41,\n";
        let batch = batch_from_reader(&registry, input.as_bytes()).unwrap();
        assert_eq!(batch.total_rows(), 3);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.skipped_rows(), 1);
        assert_eq!(batch.columns(), &["ref_no", "name", "age"]);
        assert!(batch.records().iter().all(|r| r.len() == 3));
        assert_eq!(batch.records()[1].get(0), Some("R-2"));
    }

    #[test]
    fn bom_prefixed_header_resolves() {
        let registry = people();
        let input = "\u{feff}Name,Age\nAlice,30\n";
        let batch = batch_from_reader(&registry, input.as_bytes()).unwrap();
        assert_eq!(batch.records()[0].get(1), Some("Alice"));
    }

    #[test]
    fn batch_is_deterministic() {
        let registry = people();
        let input = "name,age\nA,1\nB,\n,\n";
        let a = batch_from_reader(&registry, input.as_bytes()).unwrap();
        let b = batch_from_reader(&registry, input.as_bytes()).unwrap();
        assert_eq!(a, b);
    }
}
