//! Streaming CSV reader.
//!
//! Rows are read as raw byte records and decoded field by field, so inputs in
//! any single-byte charset stream without being loaded whole.

use csv::{ByteRecord, Reader, ReaderBuilder, Trim};
use encoding_rs::Encoding;
use serde_json::Value;
use std::io::Read;

use super::{infer_scalar, sniff, Sniffed};
use crate::dsl::FormatOptions;
use crate::error::{RecordError, SourceError, SourceResult};
use crate::models::Record;

/// Iterator of CSV rows as records.
///
/// With `has_header` the first row names the columns and extra cells are
/// ignored; without it columns are named `"0"`, `"1"`, ...
pub struct CsvRecordIter<R: Read> {
    reader: Reader<R>,
    encoding: &'static Encoding,
    headers: Option<Vec<String>>,
    infer_types: bool,
    row: ByteRecord,
    done: bool,
}

/// Open a CSV stream over `reader` with the given options.
pub fn open_csv<R: Read>(
    reader: R,
    options: &FormatOptions,
) -> SourceResult<CsvRecordIter<Sniffed<R>>> {
    let (encoding, reader) = sniff(reader, options.encoding.as_deref())?;

    let mut builder = ReaderBuilder::new();
    builder
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .delimiter(option_byte("delimiter", Some(&options.delimiter), b',')?);
    if options.quote.is_some() {
        builder.quote(option_byte("quote", options.quote.as_deref(), b'"')?);
    }
    if options.escape.is_some() {
        builder
            .escape(Some(option_byte("escape", options.escape.as_deref(), b'\\')?))
            .double_quote(false);
    }
    let mut reader = builder.from_reader(reader);

    let headers = if options.has_header {
        let mut first = ByteRecord::new();
        let found = reader.read_byte_record(&mut first).map_err(|e| SourceError::Parse {
            format: "csv".into(),
            message: format!("Cannot read header: {}", e),
        })?;
        if !found {
            return Err(SourceError::Parse {
                format: "csv".into(),
                message: "Empty CSV file".into(),
            });
        }
        let mut names: Vec<String> = first.iter().map(|f| decode(encoding, f)).collect();
        if let Some(name) = names.first_mut() {
            *name = name.trim_start_matches('\u{feff}').to_string();
        }
        Some(names)
    } else {
        None
    };

    Ok(CsvRecordIter {
        reader,
        encoding,
        headers,
        infer_types: options.infer_types,
        row: ByteRecord::new(),
        done: false,
    })
}

/// A one-character CSV option as a byte.
pub fn option_byte(name: &str, value: Option<&str>, default: u8) -> SourceResult<u8> {
    let value = match value {
        None => return Ok(default),
        Some(v) => v,
    };
    match value.as_bytes() {
        [b] if b.is_ascii() => Ok(*b),
        _ => Err(SourceError::Parse {
            format: "csv".into(),
            message: format!("Option '{}' must be a single ASCII character, got '{}'", name, value),
        }),
    }
}

fn decode(encoding: &'static Encoding, bytes: &[u8]) -> String {
    let (text, _) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}

impl<R: Read> CsvRecordIter<R> {
    /// Column names, when the input has a header row.
    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    fn cell(&self, raw: &[u8]) -> Value {
        let text = decode(self.encoding, raw);
        if self.infer_types {
            infer_scalar(&text)
        } else {
            Value::String(text)
        }
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new();
        match &self.headers {
            Some(headers) => {
                for (i, name) in headers.iter().enumerate() {
                    let value = self
                        .row
                        .get(i)
                        .map(|raw| self.cell(raw))
                        .unwrap_or_else(|| Value::String(String::new()));
                    record.insert(name.clone(), value);
                }
            }
            None => {
                for (i, raw) in self.row.iter().enumerate() {
                    record.insert(i.to_string(), self.cell(raw));
                }
            }
        }
        record
    }
}

impl<R: Read> Iterator for CsvRecordIter<R> {
    type Item = Result<Record, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut row = std::mem::take(&mut self.row);
        let outcome = self.reader.read_byte_record(&mut row);
        self.row = row;

        match outcome {
            Ok(true) => Some(Ok(self.to_record())),
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                // Reader state is unknown after an I/O failure.
                if e.is_io_error() {
                    self.done = true;
                }
                Some(Err(RecordError::Parse {
                    line,
                    message: e.to_string(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn rows(input: &[u8], options: &FormatOptions) -> Vec<Record> {
        open_csv(Cursor::new(input.to_vec()), options)
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_header_rows_with_inference() {
        let rows = rows(b"name,price\nLamp,10\nDesk,12.5\n", &FormatOptions::default());

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], json!("Lamp"));
        assert_eq!(rows[0]["price"], json!(10));
        assert_eq!(rows[1]["price"], json!(12.5));
    }

    #[test]
    fn test_no_inference_keeps_strings() {
        let options = FormatOptions {
            infer_types: false,
            ..FormatOptions::default()
        };
        let rows = rows(b"code\n007\n", &options);
        assert_eq!(rows[0]["code"], json!("007"));
    }

    #[test]
    fn test_headerless_columns_are_indexed() {
        let options = FormatOptions {
            has_header: false,
            delimiter: ";".into(),
            ..FormatOptions::default()
        };
        let rows = rows(b"a;b\n1;2;3\n", &options);
        assert_eq!(Value::Object(rows[0].clone()), json!({ "0": "a", "1": "b" }));
        assert_eq!(rows[1]["2"], json!(3));
    }

    #[test]
    fn test_missing_cells_are_empty_and_extra_ignored() {
        let rows = rows(b"a,b,c\n1\n1,2,3,4\n", &FormatOptions::default());
        assert_eq!(rows[0]["b"], json!(""));
        assert_eq!(rows[1].len(), 3);
    }

    #[test]
    fn test_quoted_values_and_bom() {
        let rows = rows(
            "\u{feff}name,value\n\"Alice\",\"Hello, World\"\n".as_bytes(),
            &FormatOptions::default(),
        );
        assert_eq!(rows[0]["name"], json!("Alice"));
        assert_eq!(rows[0]["value"], json!("Hello, World"));
    }

    #[test]
    fn test_latin1_input_decoded() {
        let options = FormatOptions {
            encoding: Some("latin1".into()),
            ..FormatOptions::default()
        };
        let rows = rows(&[b'n', b'\n', 0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9, b'\n'], &options);
        assert_eq!(rows[0]["n"], json!("Société"));
    }

    #[test]
    fn test_empty_input_is_source_error() {
        assert!(open_csv(Cursor::new(Vec::new()), &FormatOptions::default()).is_err());
    }

    #[test]
    fn test_option_byte() {
        assert_eq!(option_byte("delimiter", Some("\t"), b',').unwrap(), b'\t');
        assert_eq!(option_byte("quote", None, b'"').unwrap(), b'"');
        assert!(option_byte("delimiter", Some(";;"), b',').is_err());
        assert!(option_byte("delimiter", Some("é"), b',').is_err());
    }
}
