//! Character encoding detection for fetched documents.
//!
//! A byte order mark always wins. Otherwise the `charset` parameter of the
//! Content-Type header and the declaration found in the first bytes of the
//! document are compared; when they are both missing or disagree the
//! configured default is used.

use crate::constants::ENCODING_PRESCAN_BYTES;
use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use serde::Serialize;

static META_CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta\b[^>]*?charset\s*=\s*["']?\s*([A-Za-z0-9_.:-]+)"#)
        .expect("meta charset pattern")
});

static XML_DECL_ENCODING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<\?xml\b[^>]*?encoding\s*=\s*["']([A-Za-z0-9_.:-]+)["']"#)
        .expect("xml declaration pattern")
});

/// Where the chosen encoding came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingOrigin {
    ByteOrderMark,
    Header,
    Document,
    Default,
}

#[derive(Debug, Clone, Copy)]
pub struct DetectedEncoding {
    pub encoding: &'static Encoding,
    pub origin: EncodingOrigin,
}

/// Pull the charset parameter out of a Content-Type value
pub fn charset_from_content_type(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches(|c| c == '"' || c == '\''))
        } else {
            None
        }
    })
}

/// Look for `<meta charset>`, `<meta http-equiv>` or `<?xml encoding?>` in the leading bytes
pub fn declared_in_document(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(ENCODING_PRESCAN_BYTES)];
    let caps = XML_DECL_ENCODING
        .captures(head)
        .or_else(|| META_CHARSET.captures(head))?;
    let label = caps.get(1)?;
    Some(String::from_utf8_lossy(label.as_bytes()).into_owned())
}

pub fn detect(
    bytes: &[u8],
    content_type: Option<&str>,
    default: &'static Encoding,
) -> DetectedEncoding {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return DetectedEncoding {
            encoding,
            origin: EncodingOrigin::ByteOrderMark,
        };
    }

    let from_header = content_type
        .and_then(charset_from_content_type)
        .and_then(|label| Encoding::for_label(label.as_bytes()));
    // a declaration readable as ASCII cannot mean UTF-16
    let from_document = declared_in_document(bytes)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .map(Encoding::output_encoding);

    match (from_header, from_document) {
        (Some(h), Some(d)) if h == d => DetectedEncoding {
            encoding: h,
            origin: EncodingOrigin::Header,
        },
        (Some(h), None) => DetectedEncoding {
            encoding: h,
            origin: EncodingOrigin::Header,
        },
        (None, Some(d)) => DetectedEncoding {
            encoding: d,
            origin: EncodingOrigin::Document,
        },
        _ => DetectedEncoding {
            encoding: default,
            origin: EncodingOrigin::Default,
        },
    }
}

/// Decode without replacement characters. A leading BOM matching `encoding` is dropped.
pub fn decode_strict(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    let body = match Encoding::for_bom(bytes) {
        Some((bom_encoding, bom_len)) if bom_encoding == encoding => &bytes[bom_len..],
        _ => bytes,
    };
    encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .map(|text| text.into_owned())
}
