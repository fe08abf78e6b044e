//! CSV and JSON serialization of buffered output rows.

use csv::{QuoteStyle, WriterBuilder};
use serde_json::Value;

use super::csv_stream::option_byte;
use crate::coercion::stringify;
use crate::dsl::FormatOptions;
use crate::error::{PipelineError, PipelineResult};
use crate::models::Record;

/// Write rows as CSV.
///
/// Columns are the union of all row keys in first-seen order; a row missing a
/// column gets an empty cell.
pub fn write_csv(rows: &[Record], options: &FormatOptions) -> PipelineResult<Vec<u8>> {
    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let delimiter = option_byte("delimiter", Some(&options.delimiter), b',').map_err(output_error)?;
    let quote = option_byte("quote", options.quote.as_deref(), b'"').map_err(output_error)?;

    let mut builder = WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote(quote)
        .quote_style(QuoteStyle::Necessary);
    if let Some(escape) = options.escape.as_deref() {
        builder
            .escape(option_byte("escape", Some(escape), b'\\').map_err(output_error)?)
            .double_quote(false);
    }
    let mut writer = builder.from_writer(Vec::new());

    if options.has_header {
        writer.write_record(&columns).map_err(output_error)?;
    }
    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| row.get(*c).map(stringify).unwrap_or_default())
            .collect();
        writer.write_record(&cells).map_err(output_error)?;
    }

    writer
        .into_inner()
        .map_err(|e| PipelineError::Output(e.to_string()))
}

/// Write rows as a JSON array.
pub fn write_json(rows: &[Record]) -> PipelineResult<Vec<u8>> {
    let array: Vec<Value> = rows.iter().cloned().map(Value::Object).collect();
    Ok(serde_json::to_vec(&array)?)
}

fn output_error(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Output(e.to_string())
}
