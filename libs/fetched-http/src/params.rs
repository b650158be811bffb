//! Ordered URL search parameters.
//!
//! [`SearchParams`] keeps `(name, value)` pairs in insertion order and allows
//! repeated names. It is used both for query strings and for
//! `application/x-www-form-urlencoded` request bodies.

use crate::error::FetchError;
use crate::value::{self, Value};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use url::form_urlencoded;

/// Ordered multimap of URL search parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    pairs: Vec<(String, String)>,
}

impl SearchParams {
    /// Create an empty parameter list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a query string; a leading `?` is ignored.
    #[must_use]
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self {
            pairs: form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        }
    }

    /// Build parameters from any value that serializes as a flat record.
    ///
    /// # Errors
    /// Returns `FetchError::FormEncode` if the value is nested or otherwise not
    /// representable as `name=value` pairs.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, FetchError> {
        let encoded = serde_urlencoded::to_string(value)?;
        Ok(Self::parse(&encoded))
    }

    /// Build parameters directly from a structured value.
    ///
    /// Records and maps contribute one pair per entry, arrays of two-element
    /// arrays contribute one pair per element. Values must be primitives and
    /// are used in their plain string form; no JSON encoding is applied.
    ///
    /// # Errors
    /// Returns `FetchError::FormEncode` if a value is not a primitive or the
    /// value has no entries to iterate.
    pub fn from_value(value: &Value) -> Result<Self, FetchError> {
        let mut params = Self::new();
        match value {
            Value::Params(existing) => return Ok(existing.clone()),
            Value::Record(record) => {
                for (name, entry) in record {
                    params.append(name.clone(), scalar(name, entry)?);
                }
            }
            Value::Map(entries) => {
                for (key, entry) in entries {
                    let name = scalar("<key>", key)?;
                    let text = scalar(&name, entry)?;
                    params.append(name, text);
                }
            }
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::Array(pair) if pair.len() == 2 => {
                            let name = scalar("<key>", &pair[0])?;
                            let text = scalar(&name, &pair[1])?;
                            params.append(name, text);
                        }
                        other => {
                            return Err(unsupported(&format!(
                                "expected [name, value] pair, got {:?}",
                                value::classify(other)
                            )));
                        }
                    }
                }
            }
            other => {
                return Err(unsupported(&format!(
                    "cannot build search params from {:?}",
                    value::classify(other)
                )));
            }
        }
        Ok(params)
    }

    /// Append a pair, keeping existing pairs with the same name
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// Replace all pairs named `name` with a single pair.
    ///
    /// The new pair takes the position of the first existing one, or is
    /// appended when the name is not present.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.pairs.iter().position(|(n, _)| *n == name) {
            Some(first) => {
                self.pairs[first].1 = value;
                let mut index = 0;
                self.pairs.retain(|(n, _)| {
                    let keep = index <= first || *n != name;
                    index += 1;
                    keep
                });
            }
            None => self.pairs.push((name, value)),
        }
    }

    /// Apply every pair of `other` with [`set`](Self::set) semantics.
    pub fn merge_set(&mut self, other: &SearchParams) {
        let mut seen: Vec<&str> = Vec::new();
        for (name, _) in &other.pairs {
            if seen.contains(&name.as_str()) {
                continue;
            }
            seen.push(name);
            self.pairs.retain(|(n, _)| n != name);
            self.pairs.extend(
                other
                    .pairs
                    .iter()
                    .filter(|(n, _)| n == name)
                    .cloned(),
            );
        }
    }

    /// First value for `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name` in insertion order
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Whether any pair is named `name`
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.pairs.iter().any(|(n, _)| n == name)
    }

    /// Remove all pairs named `name`
    pub fn remove(&mut self, name: &str) {
        self.pairs.retain(|(n, _)| n != name);
    }

    /// Iterate over pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn scalar(name: &str, value: &Value) -> Result<String, FetchError> {
    if value::is_primitive(value) {
        value::jsonify(value)
    } else {
        Err(unsupported(&format!(
            "value for '{name}' is {:?}, expected a primitive",
            value::classify(value)
        )))
    }
}

fn unsupported(reason: &str) -> FetchError {
    FetchError::FormEncode(serde_urlencoded::ser::Error::Custom(reason.to_owned().into()))
}

/// `application/x-www-form-urlencoded` serialization of the pairs
impl fmt::Display for SearchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs.iter())
            .finish();
        f.write_str(&encoded)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SearchParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for SearchParams {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl Serialize for SearchParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.pairs.iter())
    }
}

/// Accepts either a map (`{ page: 1 }`) or a list of pairs (`[["a", "1"]]`).
impl<'de> Deserialize<'de> for SearchParams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ParamsVisitor;

        impl<'de> Visitor<'de> for ParamsVisitor {
            type Value = SearchParams;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of parameters or a list of [name, value] pairs")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(SearchParams::parse(v))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut params = SearchParams::new();
                while let Some((name, value)) = map.next_entry::<String, serde_json::Value>()? {
                    params.append(name, json_scalar::<A::Error>(value)?);
                }
                Ok(params)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut params = SearchParams::new();
                while let Some((name, value)) = seq.next_element::<(String, serde_json::Value)>()? {
                    params.append(name, json_scalar::<A::Error>(value)?);
                }
                Ok(params)
            }
        }

        deserializer.deserialize_any(ParamsVisitor)
    }
}

fn json_scalar<E: de::Error>(value: serde_json::Value) -> Result<String, E> {
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            Err(E::custom("search parameter values must be scalars"))
        }
        other => Ok(other.to_string()),
    }
}
