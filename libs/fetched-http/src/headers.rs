//! Header merging.
//!
//! Headers reach a request from several layers (instance, method, call site)
//! and in several shapes. [`merge_headers`] folds them into one [`HeaderMap`]
//! in order, either overwriting (`Set`) or accumulating (`Append`) values.

use crate::error::FetchError;
use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};

/// A collection of headers in one of the accepted shapes
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderSource {
    /// Native header container; may hold several values per name
    Map(HeaderMap),
    /// Ordered `(name, value)` pairs
    Pairs(Vec<(String, String)>),
    /// Plain record of name to value
    Record(IndexMap<String, String>),
}

/// How a source's pairs are applied to the accumulated headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMode {
    /// Replace any existing values for the name
    Set,
    /// Add alongside existing values
    Append,
}

impl HeaderSource {
    /// Add one header, converting a native map into pairs first.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        match self {
            HeaderSource::Pairs(pairs) => pairs.push((name.into(), value.into())),
            HeaderSource::Record(record) => {
                record.insert(name.into(), value.into());
            }
            HeaderSource::Map(map) => {
                let mut pairs: Vec<(String, String)> = map
                    .iter()
                    .map(|(n, v)| {
                        (
                            n.as_str().to_owned(),
                            String::from_utf8_lossy(v.as_bytes()).into_owned(),
                        )
                    })
                    .collect();
                pairs.push((name.into(), value.into()));
                *self = HeaderSource::Pairs(pairs);
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            HeaderSource::Map(map) => map.is_empty(),
            HeaderSource::Pairs(pairs) => pairs.is_empty(),
            HeaderSource::Record(record) => record.is_empty(),
        }
    }

    fn apply(&self, mode: HeaderMode, target: &mut HeaderMap) -> Result<(), FetchError> {
        match self {
            HeaderSource::Map(map) => match mode {
                HeaderMode::Set => {
                    for name in map.keys() {
                        target.remove(name);
                        for value in map.get_all(name) {
                            target.append(name.clone(), value.clone());
                        }
                    }
                }
                HeaderMode::Append => {
                    for (name, value) in map {
                        target.append(name.clone(), value.clone());
                    }
                }
            },
            HeaderSource::Pairs(pairs) => {
                for (name, value) in pairs {
                    put(target, mode, name, value)?;
                }
            }
            HeaderSource::Record(record) => {
                for (name, value) in record {
                    put(target, mode, name, value)?;
                }
            }
        }
        Ok(())
    }
}

fn put(
    target: &mut HeaderMap,
    mode: HeaderMode,
    name: &str,
    value: &str,
) -> Result<(), FetchError> {
    let name = HeaderName::try_from(name)?;
    let value = HeaderValue::try_from(value)?;
    match mode {
        HeaderMode::Set => {
            target.insert(name, value);
        }
        HeaderMode::Append => {
            target.append(name, value);
        }
    }
    Ok(())
}

/// Fold header sources into a single map, in order.
///
/// Returns `Ok(None)` when there are no sources at all. Names are compared
/// case-insensitively.
///
/// # Errors
/// Returns `FetchError::InvalidHeaderName` or `FetchError::InvalidHeaderValue`
/// for pairs that are not valid HTTP headers.
pub fn merge_headers<'a, I>(sources: I) -> Result<Option<HeaderMap>, FetchError>
where
    I: IntoIterator<Item = (HeaderMode, &'a HeaderSource)>,
{
    let mut merged: Option<HeaderMap> = None;
    for (mode, source) in sources {
        source.apply(mode, merged.get_or_insert_with(HeaderMap::new))?;
    }
    Ok(merged)
}

impl From<HeaderMap> for HeaderSource {
    fn from(map: HeaderMap) -> Self {
        HeaderSource::Map(map)
    }
}

impl From<Vec<(String, String)>> for HeaderSource {
    fn from(pairs: Vec<(String, String)>) -> Self {
        HeaderSource::Pairs(pairs)
    }
}

impl From<IndexMap<String, String>> for HeaderSource {
    fn from(record: IndexMap<String, String>) -> Self {
        HeaderSource::Record(record)
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for HeaderSource {
    fn from(pairs: [(K, V); N]) -> Self {
        HeaderSource::Pairs(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Settings files express headers as a record or as a list of pairs.
impl<'de> Deserialize<'de> for HeaderSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Record(IndexMap<String, String>),
            Pairs(Vec<(String, String)>),
        }

        Ok(match Shape::deserialize(deserializer)? {
            Shape::Record(record) => HeaderSource::Record(record),
            Shape::Pairs(pairs) => HeaderSource::Pairs(pairs),
        })
    }
}
