//! Format parsing and serialization.
//!
//! - `csv_stream`: record-at-a-time CSV reading with charset decoding
//! - `json_stream`: JSON documents and NDJSON lines
//! - `writer`: CSV and JSON output for format destinations
//!
//! Charset handling is shared: an explicit `encoding` option is resolved with
//! `encoding_rs`, otherwise the first chunk of input is sniffed with `chardet`.

pub mod csv_stream;
pub mod json_stream;
pub mod writer;

use encoding_rs::Encoding;
use serde_json::{Number, Value};
use std::io::{Chain, Cursor, Read};

use crate::error::{SourceError, SourceResult};

pub use csv_stream::{open_csv, CsvRecordIter};
pub use json_stream::{open_json, records_from_value, NdjsonIter};
pub use writer::{write_csv, write_json};

/// Bytes read ahead for charset detection.
const SNIFF_LEN: u64 = 64 * 1024;

/// A reader whose first chunk has already been consumed for sniffing.
pub type Sniffed<R> = Chain<Cursor<Vec<u8>>, R>;

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    // Normalize charset names
    match charset.to_lowercase().as_str() {
        "" | "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Resolve an encoding label, e.g. `"utf-8"` or `"latin1"`.
pub fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Encoding for `sample`: the explicit label when given, otherwise sniffed.
pub fn resolve_encoding(label: Option<&str>, sample: &[u8]) -> SourceResult<&'static Encoding> {
    match label {
        Some(label) => encoding_for_label(label).ok_or_else(|| SourceError::Parse {
            format: "text".into(),
            message: format!("Unknown encoding '{}'", label),
        }),
        None => Ok(encoding_for_label(&detect_encoding(sample)).unwrap_or(encoding_rs::UTF_8)),
    }
}

/// Decode bytes to a string. Malformed sequences become U+FFFD.
pub fn decode_content(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

/// Read ahead a sample of `reader` and pick its encoding.
///
/// The returned reader yields the full input, sample included.
pub fn sniff<R: Read>(
    mut reader: R,
    label: Option<&str>,
) -> SourceResult<(&'static Encoding, Sniffed<R>)> {
    let mut sample = Vec::new();
    reader
        .by_ref()
        .take(SNIFF_LEN)
        .read_to_end(&mut sample)
        .map_err(|e| SourceError::Parse {
            format: "text".into(),
            message: format!("Cannot read input: {}", e),
        })?;
    let encoding = resolve_encoding(label, &sample)?;
    Ok((encoding, Cursor::new(sample).chain(reader)))
}

/// Turn a cell into a JSON number when its canonical numeric form round-trips.
///
/// `"10"` and `"2.5"` become numbers; `"007"`, `"1e3"` and `""` stay strings.
pub fn infer_scalar(cell: &str) -> Value {
    if let Ok(i) = cell.parse::<i64>() {
        if i.to_string() == cell {
            return Value::Number(i.into());
        }
    }
    if let Some(n) = cell.parse::<f64>().ok().and_then(Number::from_f64) {
        if n.to_string() == cell {
            return Value::Number(n);
        }
    }
    Value::String(cell.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_scalar() {
        assert_eq!(infer_scalar("10"), json!(10));
        assert_eq!(infer_scalar("-3"), json!(-3));
        assert_eq!(infer_scalar("2.5"), json!(2.5));
        assert_eq!(infer_scalar("007"), json!("007"));
        assert_eq!(infer_scalar("1e3"), json!("1e3"));
        assert_eq!(infer_scalar(""), json!(""));
        assert_eq!(infer_scalar("abc"), json!("abc"));
    }

    #[test]
    fn test_latin1_decoding() {
        // "Société" in ISO-8859-1
        let bytes: &[u8] = &[0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9];
        let encoding = encoding_for_label("iso-8859-1").unwrap();
        assert_eq!(decode_content(bytes, encoding), "Société");
    }

    #[test]
    fn test_unknown_label_rejected() {
        assert!(resolve_encoding(Some("klingon-8"), b"").is_err());
        assert_eq!(resolve_encoding(None, b"plain ascii").unwrap(), encoding_rs::UTF_8);
    }

    #[test]
    fn test_sniff_keeps_full_input() {
        let (_, mut reader) = sniff(Cursor::new(b"a,b\n1,2\n".to_vec()), None).unwrap();
        let mut all = String::new();
        reader.read_to_string(&mut all).unwrap();
        assert_eq!(all, "a,b\n1,2\n");
    }
}
