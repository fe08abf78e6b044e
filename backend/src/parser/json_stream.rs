//! JSON and NDJSON readers.
//!
//! A JSON document is parsed whole and its record array is located with the
//! `root` option (a JSON pointer such as `/data/items`, or a dotted path).
//! NDJSON is read line by line.

use encoding_rs::Encoding;
use serde_json::Value;
use std::io::{BufRead, BufReader, Read};

use super::{decode_content, sniff, Sniffed};
use crate::dsl::FormatOptions;
use crate::error::{RecordError, SourceError, SourceResult};
use crate::models::Record;

/// Boxed stream of parsed JSON records.
pub type JsonRecords = Box<dyn Iterator<Item = Result<Record, RecordError>> + Send>;

/// Open a JSON or NDJSON stream over `reader`.
pub fn open_json<R: Read + Send + 'static>(
    reader: R,
    options: &FormatOptions,
) -> SourceResult<JsonRecords> {
    let (encoding, mut reader) = sniff(reader, options.encoding.as_deref())?;

    if options.ndjson {
        return Ok(Box::new(NdjsonIter::new(reader, encoding)));
    }

    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).map_err(|e| SourceError::Parse {
        format: "json".into(),
        message: format!("Cannot read input: {}", e),
    })?;
    let text = decode_content(&bytes, encoding);
    let document: Value = serde_json::from_str(text.trim_start_matches('\u{feff}'))
        .map_err(|e| SourceError::Parse {
            format: "json".into(),
            message: e.to_string(),
        })?;

    records_from_value(document, options.root.as_deref())
}

/// Records of an already parsed document.
///
/// An array yields one record per element, an object is a single record.
pub fn records_from_value(document: Value, root: Option<&str>) -> SourceResult<JsonRecords> {
    let located = match root.map(str::trim).filter(|r| !r.is_empty()) {
        None => document,
        Some(root) => {
            let pointer = to_pointer(root);
            document
                .pointer(&pointer)
                .cloned()
                .ok_or_else(|| SourceError::Parse {
                    format: "json".into(),
                    message: format!("Root '{}' not found in document", root),
                })?
        }
    };

    let items = match located {
        Value::Array(items) => items,
        Value::Object(_) => vec![located],
        other => {
            return Err(SourceError::Parse {
                format: "json".into(),
                message: format!("Expected an array or object of records, got {}", other),
            })
        }
    };

    Ok(Box::new(items.into_iter().enumerate().map(|(i, item)| {
        as_record(item, i as u64 + 1)
    })))
}

fn to_pointer(root: &str) -> String {
    if root.starts_with('/') {
        root.to_string()
    } else {
        root.split('.')
            .map(|segment| format!("/{}", segment.replace('~', "~0").replace('/', "~1")))
            .collect()
    }
}

fn as_record(item: Value, line: u64) -> Result<Record, RecordError> {
    match item {
        Value::Object(record) => Ok(record),
        other => Err(RecordError::Parse {
            line,
            message: format!("Record is not an object: {}", other),
        }),
    }
}

/// Line-by-line JSON records. Blank lines are skipped.
pub struct NdjsonIter<R: Read> {
    reader: BufReader<Sniffed<R>>,
    encoding: &'static Encoding,
    line: u64,
    done: bool,
}

impl<R: Read> NdjsonIter<R> {
    pub fn new(reader: Sniffed<R>, encoding: &'static Encoding) -> Self {
        Self {
            reader: BufReader::new(reader),
            encoding,
            line: 0,
            done: false,
        }
    }
}

impl<R: Read> Iterator for NdjsonIter<R> {
    type Item = Result<Record, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = Vec::new();
        while !self.done {
            buf.clear();
            self.line += 1;
            match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    let text = decode_content(&buf, self.encoding);
                    let text = text.trim().trim_start_matches('\u{feff}');
                    if text.is_empty() {
                        continue;
                    }
                    let parsed = serde_json::from_str::<Value>(text)
                        .map_err(|e| RecordError::Parse {
                            line: self.line,
                            message: e.to_string(),
                        })
                        .and_then(|v| as_record(v, self.line));
                    return Some(parsed);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(RecordError::Parse {
                        line: self.line,
                        message: e.to_string(),
                    }));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn collect(records: JsonRecords) -> Vec<Result<Record, RecordError>> {
        records.collect()
    }

    #[test]
    fn test_array_document() {
        let input = br#"[{"a": 1}, {"a": 2}]"#.to_vec();
        let rows = collect(open_json(Cursor::new(input), &FormatOptions::default()).unwrap());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].as_ref().unwrap()["a"], json!(2));
    }

    #[test]
    fn test_root_pointer_and_dotted_path() {
        let doc = json!({ "data": { "items": [{ "id": 1 }] } });

        let rows = collect(records_from_value(doc.clone(), Some("/data/items")).unwrap());
        assert_eq!(rows.len(), 1);

        let rows = collect(records_from_value(doc.clone(), Some("data.items")).unwrap());
        assert_eq!(rows[0].as_ref().unwrap()["id"], json!(1));

        assert!(records_from_value(doc, Some("data.missing")).is_err());
    }

    #[test]
    fn test_single_object_is_one_record() {
        let rows = collect(records_from_value(json!({ "a": 1 }), None).unwrap());
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_scalar_items_fail_per_record() {
        let rows = collect(records_from_value(json!([{ "a": 1 }, 5]), None).unwrap());
        assert!(rows[0].is_ok());
        assert!(matches!(rows[1], Err(RecordError::Parse { line: 2, .. })));
    }

    #[test]
    fn test_invalid_document_is_source_error() {
        let result = open_json(Cursor::new(b"{not json".to_vec()), &FormatOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_ndjson_lines() {
        let options = FormatOptions {
            ndjson: true,
            ..FormatOptions::default()
        };
        let input = b"{\"a\":1}\n\nnot json\n{\"a\":3}\n".to_vec();
        let rows = collect(open_json(Cursor::new(input), &options).unwrap());

        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_ok());
        assert!(matches!(rows[1], Err(RecordError::Parse { line: 3, .. })));
        assert_eq!(rows[2].as_ref().unwrap()["a"], json!(3));
    }
}
