//! `multipart/form-data` bodies.

use crate::value::Blob;
use bytes::{BufMut, Bytes, BytesMut};

/// File name used for blob parts that carry none.
const DEFAULT_BLOB_NAME: &str = "blob";

/// A single form field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    Text(String),
    Blob(Blob),
}

impl From<&str> for FormValue {
    fn from(value: &str) -> Self {
        FormValue::Text(value.to_owned())
    }
}

impl From<String> for FormValue {
    fn from(value: String) -> Self {
        FormValue::Text(value)
    }
}

impl From<Blob> for FormValue {
    fn from(value: Blob) -> Self {
        FormValue::Blob(value)
    }
}

/// Ordered multipart form
///
/// # Example
///
/// ```ignore
/// let mut form = FormData::new();
/// form.append("title", "report");
/// form.append("file", Blob::file(bytes, "report.pdf").with_content_type("application/pdf"));
///
/// api.post("/upload").body(form).send().await?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    entries: Vec<(String, FormValue)>,
}

impl FormData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field; repeated names are kept
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<FormValue>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Append a blob field sent under `file_name`
    pub fn append_file(
        &mut self,
        name: impl Into<String>,
        blob: Blob,
        file_name: impl Into<String>,
    ) {
        self.entries
            .push((name.into(), FormValue::Blob(blob.with_file_name(file_name))));
    }

    /// First value for `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// All values for `name`
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&FormValue> {
        self.entries
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &FormValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode the form with a freshly generated boundary.
    ///
    /// Returns the `content-type` header value (carrying the boundary) and
    /// the encoded body.
    #[must_use]
    pub fn to_multipart(&self) -> (String, Bytes) {
        let boundary = generate_boundary();
        let body = self.encode(&boundary);
        (format!("multipart/form-data; boundary={boundary}"), body)
    }

    pub(crate) fn encode(&self, boundary: &str) -> Bytes {
        let mut buf = BytesMut::new();
        for (name, value) in &self.entries {
            buf.put_slice(b"--");
            buf.put_slice(boundary.as_bytes());
            buf.put_slice(b"\r\nContent-Disposition: form-data; name=\"");
            buf.put_slice(escape(name).as_bytes());
            buf.put_slice(b"\"");
            match value {
                FormValue::Text(text) => {
                    buf.put_slice(b"\r\n\r\n");
                    buf.put_slice(text.as_bytes());
                }
                FormValue::Blob(blob) => {
                    let file_name = blob.file_name().unwrap_or(DEFAULT_BLOB_NAME);
                    buf.put_slice(b"; filename=\"");
                    buf.put_slice(escape(file_name).as_bytes());
                    buf.put_slice(b"\"\r\nContent-Type: ");
                    buf.put_slice(
                        blob.content_type()
                            .unwrap_or("application/octet-stream")
                            .as_bytes(),
                    );
                    buf.put_slice(b"\r\n\r\n");
                    buf.put_slice(blob.data());
                }
            }
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"--");
        buf.put_slice(boundary.as_bytes());
        buf.put_slice(b"--\r\n");
        buf.freeze()
    }
}

impl<N: Into<String>, V: Into<FormValue>> FromIterator<(N, V)> for FormData {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

fn generate_boundary() -> String {
    let a = rand::random::<u64>();
    let b = rand::random::<u64>();
    format!("----fetched-http-{a:016x}{b:016x}")
}

/// Escape a field or file name for a quoted `Content-Disposition` parameter.
fn escape(name: &str) -> String {
    name.replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}
