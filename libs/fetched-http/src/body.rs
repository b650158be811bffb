//! Request bodies and the body encoder.
//!
//! Bodies the transport can send as they are (text, bytes, blobs, forms,
//! search parameters) pass through untouched. Structured [`Value`]s are
//! encoded according to the request's declared `content-type`:
//! multipart form, url-encoded parameters, or JSON (the default).

use crate::error::FetchError;
use crate::form::{FormData, FormValue};
use crate::params::SearchParams;
use crate::value::{self, Blob, Value};
use bytes::Bytes;
use http::HeaderMap;
use http::header::{CONTENT_TYPE, HeaderValue};
use serde::Serialize;

/// Record key naming the file for blob entries of a multipart body.
///
/// The key itself is not sent as a form field.
pub const FILENAME_KEY: &str = "$filename";

/// Field name used when a scalar value is sent as a multipart form.
const SCALAR_FIELD: &str = "data";

const JSON_CONTENT_TYPE: &str = "application/json";
const MULTIPART_MARKER: &str = "multipart/form-data";
const URLENCODED_MARKER: &str = "application/x-www-form-urlencoded";

/// A request body
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Text(String),
    Bytes(Bytes),
    Blob(Blob),
    Form(FormData),
    Params(SearchParams),
    /// Structured data, encoded according to the request's content type
    Value(Value),
}

impl Body {
    /// Structured body from any serializable value.
    ///
    /// # Errors
    /// Returns `FetchError::Json` if `value` cannot be represented as JSON data.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, FetchError> {
        Ok(Body::Value(Value::from(serde_json::to_value(value)?)))
    }

    /// Whether the transport can send this body without encoding.
    #[must_use]
    pub fn is_native(&self) -> bool {
        match self {
            Body::Value(value) => matches!(
                value,
                Value::String(_) | Value::Bytes(_) | Value::Blob(_) | Value::Params(_)
            ),
            _ => true,
        }
    }

    /// Convert into the bytes sent on the wire.
    ///
    /// Fills in the `content-type` the body implies when the caller did not
    /// declare one. A multipart form always sets its own header because it
    /// carries the boundary.
    pub(crate) fn into_wire(self, headers: &mut HeaderMap) -> Result<Bytes, FetchError> {
        let bytes = match self {
            Body::Text(text) => {
                default_content_type(headers, "text/plain;charset=UTF-8");
                Bytes::from(text)
            }
            Body::Bytes(bytes) => bytes,
            Body::Blob(blob) => {
                if !headers.contains_key(CONTENT_TYPE)
                    && let Some(content_type) = blob.content_type()
                {
                    headers.insert(CONTENT_TYPE, HeaderValue::try_from(content_type)?);
                }
                blob.data().clone()
            }
            Body::Form(form) => {
                let (content_type, bytes) = form.to_multipart();
                headers.insert(CONTENT_TYPE, HeaderValue::try_from(content_type)?);
                bytes
            }
            Body::Params(params) => {
                default_content_type(headers, "application/x-www-form-urlencoded;charset=UTF-8");
                Bytes::from(params.to_string())
            }
            Body::Value(value) => match native(value) {
                Native::Body(Some(body)) => return body.into_wire(headers),
                Native::Body(None) => Bytes::new(),
                Native::Structured(value) => {
                    default_content_type(headers, JSON_CONTENT_TYPE);
                    Bytes::from(value::jsonify(&value)?)
                }
            },
        };
        Ok(bytes)
    }
}

fn default_content_type(headers: &mut HeaderMap, content_type: &'static str) {
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
}

enum Native {
    Body(Option<Body>),
    Structured(Value),
}

fn native(value: Value) -> Native {
    match value {
        Value::Null => Native::Body(None),
        Value::String(text) => Native::Body(Some(Body::Text(text))),
        Value::Bytes(bytes) => Native::Body(Some(Body::Bytes(bytes))),
        Value::Blob(blob) => Native::Body(Some(Body::Blob(blob))),
        Value::Params(params) => Native::Body(Some(Body::Params(params))),
        other => Native::Structured(other),
    }
}

/// Encode a body for sending.
///
/// Native bodies are returned unchanged. A structured body gets
/// `content-type: application/json` when none is declared and is then
/// encoded according to that header (matched case-insensitively):
/// a multipart form (the header is removed so the transport can write one
/// with its boundary), url-encoded parameters, or JSON text. A url-encoded
/// body whose entries are not all primitive pairs is sent as JSON text under
/// the declared header.
///
/// # Errors
/// Returns `FetchError::Json` when JSON serialization fails.
pub fn encode_body(
    body: Option<Body>,
    headers: &mut Option<HeaderMap>,
) -> Result<Option<Body>, FetchError> {
    let value = match body {
        None => return Ok(None),
        Some(Body::Value(value)) => match native(value) {
            Native::Body(body) => return Ok(body),
            Native::Structured(value) => value,
        },
        Some(body) => return Ok(Some(body)),
    };

    let headers = headers.get_or_insert_with(HeaderMap::new);
    let content_type = if let Some(declared) = headers.get(CONTENT_TYPE) {
        String::from_utf8_lossy(declared.as_bytes()).to_ascii_lowercase()
    } else {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        JSON_CONTENT_TYPE.to_owned()
    };

    if content_type.contains(MULTIPART_MARKER) {
        headers.remove(CONTENT_TYPE);
        return Ok(Some(Body::Form(form_from_value(value)?)));
    }
    if content_type.contains(URLENCODED_MARKER) && is_key_value_pairs(&value) {
        return Ok(Some(Body::Params(SearchParams::from_value(&value)?)));
    }
    Ok(Some(Body::Text(value::jsonify(&value)?)))
}

/// Entries that fit `name=value` pairs: a record or map of primitives, or a
/// list of two-element arrays of primitives.
fn is_key_value_pairs(value: &Value) -> bool {
    match value {
        Value::Record(record) => record.values().all(value::is_primitive),
        Value::Map(entries) => entries
            .iter()
            .all(|(key, entry)| value::is_primitive(key) && value::is_primitive(entry)),
        Value::Array(items) => items.iter().all(|item| {
            matches!(
                item,
                Value::Array(pair) if pair.len() == 2 && pair.iter().all(value::is_primitive)
            )
        }),
        _ => false,
    }
}

/// Build a multipart form from the value's own entries.
fn form_from_value(value: Value) -> Result<FormData, FetchError> {
    let entries: Vec<(String, Value)> = match value {
        Value::Record(record) => record.into_iter().collect(),
        Value::Map(entries) => entries
            .into_iter()
            .map(|(key, entry)| Ok((value::jsonify(&key)?, entry)))
            .collect::<Result<_, FetchError>>()?,
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| (index.to_string(), item))
            .collect(),
        scalar => vec![(SCALAR_FIELD.to_owned(), scalar)],
    };

    let file_name = entries
        .iter()
        .find(|(name, _)| name == FILENAME_KEY)
        .map(|(_, name)| value::jsonify(name))
        .transpose()?;

    let mut form = FormData::new();
    for (name, entry) in entries {
        if name == FILENAME_KEY {
            continue;
        }
        let field = match entry {
            Value::String(text) => FormValue::Text(text),
            Value::Blob(blob) => match (&file_name, blob.file_name()) {
                (Some(file_name), None) => FormValue::Blob(blob.with_file_name(file_name.clone())),
                _ => FormValue::Blob(blob),
            },
            other => FormValue::Text(value::jsonify(&other)?),
        };
        form.append(name, field);
    }
    Ok(form)
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Text(value.to_owned())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value)
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Bytes(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(value))
    }
}

impl From<Blob> for Body {
    fn from(value: Blob) -> Self {
        Body::Blob(value)
    }
}

impl From<FormData> for Body {
    fn from(value: FormData) -> Self {
        Body::Form(value)
    }
}

impl From<SearchParams> for Body {
    fn from(value: SearchParams) -> Self {
        Body::Params(value)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Value(value)
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Body::Value(Value::from(value))
    }
}
