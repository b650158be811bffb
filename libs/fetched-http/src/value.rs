//! Structured values accepted as request bodies.
//!
//! [`Value`] is a closed set of shapes a caller can hand to the body encoder:
//! JSON-like data plus the binary, date, URL, search-parameter and header
//! containers that have their own wire representation. The helpers in this
//! module classify values and turn them into JSON text.

use crate::error::FetchError;
use crate::params::SearchParams;
use bytes::Bytes;
use http::HeaderMap;
use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::SystemTime;
use url::Url;

/// Ordered string-keyed record
pub type Record = IndexMap<String, Value>;

/// Binary payload with optional media type and file name.
///
/// A blob with a file name is file-like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    data: Bytes,
    content_type: Option<String>,
    file_name: Option<String>,
}

impl Blob {
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            content_type: None,
            file_name: None,
        }
    }

    /// Create a named (file-like) blob
    #[must_use]
    pub fn file(data: impl Into<Bytes>, file_name: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            content_type: None,
            file_name: Some(file_name.into()),
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Canonical type tag of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Kind {
    /// Absent / null value
    Nullish,
    Boolean,
    Number,
    String,
    Array,
    /// Plain string-keyed record
    Object,
    Map,
    Set,
    Bytes,
    Blob,
    /// Named blob
    File,
    Date,
    Url,
    SearchParams,
    Headers,
}

/// A structured value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Record(Record),
    /// Keyed collection whose keys are arbitrary values
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Bytes(Bytes),
    Blob(Blob),
    Date(SystemTime),
    Url(Url),
    Params(SearchParams),
    Headers(HeaderMap),
}

/// Canonical type tag for `value`.
///
/// `serde_json::Number` cannot hold NaN, so [`Kind::Nullish`] is produced
/// for `Null` only.
#[must_use]
pub fn classify(value: &Value) -> Kind {
    match value {
        Value::Null => Kind::Nullish,
        Value::Bool(_) => Kind::Boolean,
        Value::Number(_) => Kind::Number,
        Value::String(_) => Kind::String,
        Value::Array(_) => Kind::Array,
        Value::Record(_) => Kind::Object,
        Value::Map(_) => Kind::Map,
        Value::Set(_) => Kind::Set,
        Value::Bytes(_) => Kind::Bytes,
        Value::Blob(blob) if blob.file_name.is_some() => Kind::File,
        Value::Blob(_) => Kind::Blob,
        Value::Date(_) => Kind::Date,
        Value::Url(_) => Kind::Url,
        Value::Params(_) => Kind::SearchParams,
        Value::Headers(_) => Kind::Headers,
    }
}

/// True for null, booleans, numbers and strings.
#[must_use]
pub fn is_primitive(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

/// True only for a plain string-keyed record.
#[must_use]
pub fn is_plain_record(value: &Value) -> bool {
    matches!(value, Value::Record(_))
}

/// Deferred values are futures and never live inside a [`Value`].
///
/// Callbacks always return a future that the dispatcher awaits, so this is
/// `false` for every value.
#[must_use]
pub fn is_promise_like(_value: &Value) -> bool {
    false
}

/// True for values a multipart form can carry verbatim: strings and blobs.
#[must_use]
pub fn is_form_value(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Blob(_))
}

/// Recursively copy a value.
///
/// Containers are rebuilt element by element and binary buffers are copied
/// into fresh storage, so the result shares no allocation with `value`.
#[must_use]
pub fn deep_clone(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(deep_clone).collect()),
        Value::Set(items) => Value::Set(items.iter().map(deep_clone).collect()),
        Value::Record(record) => Value::Record(
            record
                .iter()
                .map(|(k, v)| (k.clone(), deep_clone(v)))
                .collect(),
        ),
        Value::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (deep_clone(k), deep_clone(v)))
                .collect(),
        ),
        Value::Bytes(bytes) => Value::Bytes(Bytes::copy_from_slice(bytes)),
        Value::Blob(blob) => Value::Blob(Blob {
            data: Bytes::copy_from_slice(&blob.data),
            content_type: blob.content_type.clone(),
            file_name: blob.file_name.clone(),
        }),
        Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Date(_)
        | Value::Url(_)
        | Value::Params(_)
        | Value::Headers(_) => value.clone(),
    }
}

/// Convert a value to JSON text.
///
/// Primitives produce their plain string form (a string is returned as is,
/// without quotes). Everything else is serialized as JSON after maps become
/// objects and other iterables become arrays.
///
/// # Errors
/// Returns `FetchError::Json` if serialization fails.
pub fn jsonify(value: &Value) -> Result<String, FetchError> {
    Ok(match value {
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other)?,
    })
}

fn key_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => jsonify(other).unwrap_or_default(),
    }
}

fn format_date(time: SystemTime) -> String {
    humantime::format_rfc3339_millis(time).to_string()
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) | Value::Set(items) => serializer.collect_seq(items),
            Value::Record(record) => serializer.collect_map(record),
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(&key_string(key), value)?;
                }
                map.end()
            }
            Value::Bytes(bytes) => serializer.collect_seq(bytes.iter()),
            // Blobs carry no JSON representation beyond an empty object
            Value::Blob(_) => serializer.serialize_map(Some(0))?.end(),
            Value::Date(time) => serializer.serialize_str(&format_date(*time)),
            Value::Url(url) => serializer.serialize_str(url.as_str()),
            Value::Params(params) => params.serialize(serializer),
            Value::Headers(headers) => {
                let mut seq = serializer.serialize_seq(Some(headers.len()))?;
                for (name, value) in headers {
                    let text = String::from_utf8_lossy(value.as_bytes());
                    seq.serialize_element(&(name.as_str(), text.as_ref()))?;
                }
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Record(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value.into())
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Number(value.into())
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Bytes(value)
    }
}

impl From<Blob> for Value {
    fn from(value: Blob) -> Self {
        Value::Blob(value)
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Value::Record(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl From<SystemTime> for Value {
    fn from(value: SystemTime) -> Self {
        Value::Date(value)
    }
}

impl From<Url> for Value {
    fn from(value: Url) -> Self {
        Value::Url(value)
    }
}

impl From<SearchParams> for Value {
    fn from(value: SearchParams) -> Self {
        Value::Params(value)
    }
}

impl From<HeaderMap> for Value {
    fn from(value: HeaderMap) -> Self {
        Value::Headers(value)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_classify_tags() {
        assert_eq!(classify(&Value::Null), Kind::Nullish);
        assert_eq!(classify(&Value::from("x")), Kind::String);
        assert_eq!(classify(&Value::from(json!([1, 2]))), Kind::Array);
        assert_eq!(classify(&Value::from(json!({ "a": 1 }))), Kind::Object);
        assert_eq!(classify(&Value::Blob(Blob::new("raw"))), Kind::Blob);
        assert_eq!(
            classify(&Value::Blob(Blob::file("raw", "a.txt"))),
            Kind::File
        );
        assert_eq!(
            classify(&Value::Params(SearchParams::new())),
            Kind::SearchParams
        );
    }

    #[test]
    fn test_primitive_and_record_predicates() {
        assert!(is_primitive(&Value::Null));
        assert!(is_primitive(&Value::from(3_i64)));
        assert!(!is_primitive(&Value::from(json!([]))));
        assert!(is_plain_record(&Value::from(json!({}))));
        assert!(!is_plain_record(&Value::Map(Vec::new())));
        assert!(!is_promise_like(&Value::from(json!({ "then": 1 }))));
    }

    #[test]
    fn test_form_value_predicate() {
        assert!(is_form_value(&Value::from("text")));
        assert!(is_form_value(&Value::Blob(Blob::file("x", "f.bin"))));
        assert!(!is_form_value(&Value::from(1_i64)));
        assert!(!is_form_value(&Value::from(json!({ "a": 1 }))));
    }

    #[test]
    fn test_jsonify_primitives_use_plain_form() {
        assert_eq!(jsonify(&Value::from("abc")).unwrap(), "abc");
        assert_eq!(jsonify(&Value::from(5_i64)).unwrap(), "5");
        assert_eq!(jsonify(&Value::Null).unwrap(), "null");
        assert_eq!(jsonify(&Value::from(true)).unwrap(), "true");
    }

    #[test]
    fn test_jsonify_is_idempotent_on_json_data() {
        let data = json!({ "x": 1, "list": [1, "two", null], "nested": { "y": false } });
        let once = jsonify(&Value::from(data.clone())).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&once).unwrap();
        assert_eq!(parsed, data);
        let twice = jsonify(&Value::from(parsed)).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_jsonify_map_and_set() {
        let map = Value::Map(vec![
            (Value::from("a"), Value::from(1_i64)),
            (Value::from(2_i64), Value::from("two")),
        ]);
        assert_eq!(jsonify(&map).unwrap(), r#"{"a":1,"2":"two"}"#);

        let set = Value::Set(vec![Value::from(1_i64), Value::from(2_i64)]);
        assert_eq!(jsonify(&set).unwrap(), "[1,2]");
    }

    #[test]
    fn test_jsonify_wrappers() {
        let date = SystemTime::UNIX_EPOCH + Duration::from_millis(1_500);
        assert_eq!(
            jsonify(&Value::from(vec![Value::Date(date)])).unwrap(),
            r#"["1970-01-01T00:00:01.500Z"]"#
        );

        let url = Url::parse("https://api.test/a?b=1").unwrap();
        let record = Value::from(Record::from([("u".to_owned(), Value::Url(url))]));
        assert_eq!(jsonify(&record).unwrap(), r#"{"u":"https://api.test/a?b=1"}"#);

        let params = SearchParams::from([("a", "1")]);
        assert_eq!(jsonify(&Value::Params(params)).unwrap(), r#"[["a","1"]]"#);

        assert_eq!(jsonify(&Value::Blob(Blob::new("bin"))).unwrap(), "{}");
    }

    #[test]
    fn test_deep_clone_copies_buffers() {
        let original = Value::from(vec![
            Value::Bytes(Bytes::from_static(b"abc")),
            Value::from(json!({ "k": [1, 2] })),
        ]);
        let copy = deep_clone(&original);
        assert_eq!(copy, original);

        let (Value::Array(a), Value::Array(b)) = (&original, &copy) else {
            panic!("expected arrays");
        };
        let (Value::Bytes(a), Value::Bytes(b)) = (&a[0], &b[0]) else {
            panic!("expected bytes");
        };
        assert_ne!(a.as_ptr(), b.as_ptr(), "buffer must not be shared");
    }

    #[test]
    fn test_deserialize_keeps_key_order() {
        let value: Value = serde_json::from_str(r#"{"z":1,"a":2}"#).unwrap();
        let Value::Record(record) = value else {
            panic!("expected record");
        };
        let keys: Vec<&str> = record.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a"]);
    }
}
