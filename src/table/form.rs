//! Form body parsing for the two content types the store table accepts:
//! `application/x-www-form-urlencoded` and `multipart/form-data`.
//!
//! Both parsers produce the same shape: an ordered sequence of named parts,
//! each either a text field or an uploaded file with declared media type.
//! Part order is preserved because the table's value/file tie-break is a
//! first-match linear scan over the parts.

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use thiserror::Error;

use crate::http::Headers;

/// Media type of URL-encoded form bodies.
pub const URLENCODED: &str = "application/x-www-form-urlencoded";

/// Media type of multipart form bodies.
pub const MULTIPART: &str = "multipart/form-data";

/// Errors produced while parsing a form body.
#[derive(Debug, Error)]
pub enum FormError {
    #[error("unsupported form content type: {0}")]
    UnsupportedContentType(String),

    #[error("multipart content type is missing a boundary parameter")]
    MissingBoundary,

    #[error("malformed form body: {0}")]
    Malformed(&'static str),
}

/// The payload of one form part.
#[derive(Debug, Clone)]
pub enum PartValue {
    /// A plain text field.
    Text(String),
    /// An uploaded file: raw bytes plus the declared media type.
    File {
        content_type: String,
        bytes: Bytes,
    },
}

/// One named part of a parsed form, in submission order.
#[derive(Debug, Clone)]
pub struct Part {
    pub name: String,
    pub value: PartValue,
}

impl Part {
    /// Returns the text content of this part.
    ///
    /// File bytes decode lossily; a file part's "decoded text" is what the
    /// table compares against the `value` field during the tie-break scan.
    pub fn text(&self) -> String {
        match &self.value {
            PartValue::Text(s) => s.clone(),
            PartValue::File { bytes, .. } => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Returns `true` when this part is an uploaded file.
    pub fn is_file(&self) -> bool {
        matches!(self.value, PartValue::File { .. })
    }
}

/// A parsed form body: named parts in submission order.
#[derive(Debug, Clone, Default)]
pub struct Form {
    parts: Vec<Part>,
}

impl Form {
    /// Parses `body` according to the request's `Content-Type` header value.
    ///
    /// The media type is matched ignoring parameters and ASCII case; the
    /// boundary parameter is read when the type is multipart.
    ///
    /// # Errors
    ///
    /// - [`FormError::UnsupportedContentType`] — neither supported type.
    /// - [`FormError::MissingBoundary`] — multipart without a boundary.
    /// - [`FormError::Malformed`] — body does not follow the declared format.
    pub fn parse(content_type: &str, body: &Bytes) -> Result<Self, FormError> {
        let media = media_type(content_type);
        if media.eq_ignore_ascii_case(URLENCODED) {
            parse_urlencoded(body)
        } else if media.eq_ignore_ascii_case(MULTIPART) {
            let boundary = boundary_param(content_type).ok_or(FormError::MissingBoundary)?;
            parse_multipart(body, &boundary)
        } else {
            Err(FormError::UnsupportedContentType(media.to_owned()))
        }
    }

    /// Returns all parts in submission order.
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Returns the first part with the given name, matching what a form
    /// lookup by field name yields.
    pub fn first(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.name == name)
    }

    /// Returns the first text field with the given name, or `None` when the
    /// name is absent or names a file.
    pub fn first_text(&self, name: &str) -> Option<&str> {
        match &self.first(name)?.value {
            PartValue::Text(s) => Some(s.as_str()),
            PartValue::File { .. } => None,
        }
    }
}

/// Returns the media type of a `Content-Type` value: everything before the
/// first `;`, trimmed.
pub fn media_type(content_type: &str) -> &str {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
}

// Reads the boundary parameter from a multipart content type, unquoting if
// necessary.
fn boundary_param(content_type: &str) -> Option<String> {
    for param in content_type.split(';').skip(1) {
        let mut kv = param.splitn(2, '=');
        let key = kv.next()?.trim();
        if key.eq_ignore_ascii_case("boundary") {
            let value = kv.next()?.trim();
            let value = value.strip_prefix('"').unwrap_or(value);
            let value = value.strip_suffix('"').unwrap_or(value);
            if value.is_empty() {
                return None;
            }
            return Some(value.to_owned());
        }
    }
    None
}

// `key=value&key2=value2` with `+` as space and percent escapes in both keys
// and values. Every part is a text field.
fn parse_urlencoded(body: &Bytes) -> Result<Form, FormError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| FormError::Malformed("urlencoded body is not valid UTF-8"))?;

    let mut parts = Vec::new();
    for pair in text.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut kv = pair.splitn(2, '=');
        let name = form_decode(kv.next().unwrap_or(""));
        let value = form_decode(kv.next().unwrap_or(""));
        parts.push(Part {
            name,
            value: PartValue::Text(value),
        });
    }

    Ok(Form { parts })
}

fn form_decode(s: &str) -> String {
    let plus_decoded = s.replace('+', " ");
    percent_decode_str(&plus_decoded).decode_utf8_lossy().into_owned()
}

// RFC 7578 multipart parsing, just deep enough for form submissions: split
// on the dash-boundary, read each part's headers up to the blank line, and
// classify by the presence of a filename in Content-Disposition.
fn parse_multipart(body: &Bytes, boundary: &str) -> Result<Form, FormError> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    if find(body, delimiter).is_none() {
        return Err(FormError::Malformed("multipart body has no boundary"));
    }

    let mut chunks = split_on(body, delimiter);
    // Everything before the first boundary is preamble.
    let _ = chunks.next();

    let mut parts = Vec::new();
    for chunk in chunks {
        if chunk.starts_with(b"--") {
            // Close delimiter: done.
            break;
        }
        let chunk = strip_crlf_prefix(chunk);
        let chunk = strip_crlf_suffix(chunk);

        let header_end = find(chunk, b"\r\n\r\n")
            .ok_or(FormError::Malformed("multipart part has no header block"))?;
        let (raw_headers, content) = (&chunk[..header_end], &chunk[header_end + 4..]);

        let headers = parse_part_headers(raw_headers)?;
        let disposition = headers
            .get("content-disposition")
            .ok_or(FormError::Malformed("part is missing Content-Disposition"))?;
        let name = disposition_param(disposition, "name")
            .ok_or(FormError::Malformed("part is missing a field name"))?;

        let value = if disposition_param(disposition, "filename").is_some() {
            let content_type = headers
                .get("content-type")
                .unwrap_or("application/octet-stream")
                .to_owned();
            PartValue::File {
                content_type,
                bytes: Bytes::copy_from_slice(content),
            }
        } else {
            PartValue::Text(String::from_utf8_lossy(content).into_owned())
        };

        parts.push(Part { name, value });
    }

    Ok(Form { parts })
}

fn parse_part_headers(raw: &[u8]) -> Result<Headers, FormError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| FormError::Malformed("part headers are not valid UTF-8"))?;

    let mut headers = Headers::new();
    for line in text.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or(FormError::Malformed("part header line has no colon"))?;
        headers.insert(name.trim(), value.trim());
    }
    Ok(headers)
}

// Reads a quoted parameter such as `name="value"` out of a
// Content-Disposition header value.
fn disposition_param(disposition: &str, param: &str) -> Option<String> {
    for piece in disposition.split(';').skip(1) {
        let mut kv = piece.splitn(2, '=');
        let key = kv.next()?.trim();
        if key.eq_ignore_ascii_case(param) {
            let value = kv.next()?.trim();
            let value = value.strip_prefix('"').unwrap_or(value);
            let value = value.strip_suffix('"').unwrap_or(value);
            return Some(value.to_owned());
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// Iterator over the pieces of `data` separated by `sep`.
fn split_on<'a>(data: &'a [u8], sep: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
    let mut rest = Some(data);
    std::iter::from_fn(move || {
        let data = rest?;
        match find(data, sep) {
            Some(pos) => {
                rest = Some(&data[pos + sep.len()..]);
                Some(&data[..pos])
            }
            None => {
                rest = None;
                Some(data)
            }
        }
    })
}

fn strip_crlf_prefix(data: &[u8]) -> &[u8] {
    data.strip_prefix(b"\r\n").unwrap_or(data)
}

fn strip_crlf_suffix(data: &[u8]) -> &[u8] {
    data.strip_suffix(b"\r\n").unwrap_or(data)
}
