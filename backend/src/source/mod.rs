//! Source adapters.
//!
//! [`open_source`] turns a step's `from` definition into a lazy
//! [`RecordStream`]. HTTP bodies are streamed through [`http::BodyReader`].
//! Opening can fail as a whole ([`SourceError`], the run is
//! `Failed`); once open, each item fails or succeeds on its own.

pub mod http;

use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::time::Duration;

use crate::dsl::{Auth, Filter, FormatSpec, FormatType, FromDef, SourceConfig};
use crate::error::{RecordError, SourceError, SourceResult};
use crate::models::Record;
use crate::parser::{open_csv, open_json, records_from_value};
use crate::store::EntityStore;

/// Finite, lazy stream of extracted records.
pub type RecordStream = Box<dyn Iterator<Item = Result<Record, RecordError>> + Send>;

/// Body pushed to an `api` source with a run request.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiPayload {
    /// Already parsed JSON.
    Json(Value),
    /// Raw text, parsed according to the step format.
    Text(String),
}

impl ApiPayload {
    /// A JSON string becomes raw text, anything else stays JSON.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text),
            other => Self::Json(other),
        }
    }
}

/// What a source may need besides its definition.
pub struct SourceContext<'a> {
    pub store: &'a dyn EntityStore,
    pub payload: Option<&'a ApiPayload>,
    pub http_timeout: Duration,
}

/// Open the source of a step.
pub async fn open_source(from: &FromDef, ctx: &SourceContext<'_>) -> SourceResult<RecordStream> {
    match from {
        FromDef::Entity { entity_definition, filter, .. } => {
            query_entities(ctx.store, entity_definition, filter.as_ref())
        }

        FromDef::Format { source, format, .. } => match source {
            SourceConfig::Entity(entity) => {
                query_entities(ctx.store, &entity.entity_definition, entity.filter.as_ref())
            }

            SourceConfig::Uri(uri) => {
                open_uri(&uri.uri, uri.auth.as_ref(), format, ctx.http_timeout).await
            }

            SourceConfig::Api(api) => match (ctx.payload, &api.endpoint) {
                (Some(payload), _) => parse_payload(payload, format),
                (None, Some(endpoint)) => open_uri(endpoint, None, format, ctx.http_timeout).await,
                (None, None) => Err(SourceError::MissingPayload),
            },
        },
    }
}

fn query_entities(
    store: &dyn EntityStore,
    entity_type: &str,
    filter: Option<&Filter>,
) -> SourceResult<RecordStream> {
    let found = store.query_by_filter(entity_type, filter)?;
    Ok(Box::new(found.into_iter().map(|e| Ok(e.snapshot()))))
}

/// Where a URI points.
#[derive(Debug, Clone, PartialEq)]
enum Location {
    Http(String),
    File(String),
}

fn locate(uri: &str) -> SourceResult<Location> {
    let trimmed = uri.trim();
    let lower = trimmed.to_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Ok(Location::Http(trimmed.to_string()))
    } else if let Some(path) = trimmed.strip_prefix("file://") {
        Ok(Location::File(path.to_string()))
    } else if let Some((scheme, _)) = trimmed.split_once("://") {
        Err(SourceError::UnsupportedScheme(scheme.to_string()))
    } else if trimmed.is_empty() {
        Err(SourceError::UnsupportedScheme(String::new()))
    } else {
        Ok(Location::File(trimmed.to_string()))
    }
}

/// Whether a URI names a supported location.
pub fn is_supported_uri(uri: &str) -> bool {
    locate(uri).is_ok()
}

async fn open_uri(
    uri: &str,
    auth: Option<&Auth>,
    format: &FormatSpec,
    timeout: Duration,
) -> SourceResult<RecordStream> {
    match locate(uri)? {
        Location::File(path) => {
            let file = File::open(&path).map_err(|source| SourceError::Io {
                path: path.clone(),
                source,
            })?;
            parse_reader(BufReader::new(file), format)
        }
        Location::Http(url) => parse_reader(http::open_body(&url, auth, timeout).await?, format),
    }
}

fn parse_reader<R: Read + Send + 'static>(
    reader: R,
    format: &FormatSpec,
) -> SourceResult<RecordStream> {
    match format.format_type {
        FormatType::Csv => Ok(Box::new(open_csv(reader, &format.options)?)),
        FormatType::Json => open_json(reader, &format.options),
    }
}

fn parse_payload(payload: &ApiPayload, format: &FormatSpec) -> SourceResult<RecordStream> {
    match (payload, format.format_type) {
        (ApiPayload::Json(value), FormatType::Json) => {
            records_from_value(value.clone(), format.options.root.as_deref())
        }
        (ApiPayload::Json(_), FormatType::Csv) => {
            Err(SourceError::PayloadFormat(FormatType::Csv.as_str().into()))
        }
        (ApiPayload::Text(text), _) => parse_reader(Cursor::new(text.clone().into_bytes()), format),
    }
}
