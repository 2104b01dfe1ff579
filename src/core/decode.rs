use std::borrow::Cow;
use std::fmt;
use std::ops::RangeInclusive;

use encoding_rs::WINDOWS_874;
use serde::{Deserialize, Serialize};

use crate::core::utils::{format_hex, format_hex_spaced};

/// The card pads and separates name parts with this character.
pub const BLANK_MARKER: char = '#';

/// Bytes that `WINDOWS_874` maps to punctuation or a no-break space but
/// TIS-620 leaves undefined.
const TIS620_UNDEFINED: RangeInclusive<u8> = 0x80..=0xA0;

/// Undefined in `WINDOWS_874`, so it always decodes to U+FFFD.
const REPLACEMENT_BYTE: u8 = 0xFF;

/// Decoded result of one field read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Binary(Vec<u8>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            FieldValue::Binary(_) => None,
        }
    }

    /// Text as-is, binary as upper-case hex.
    pub fn into_text(self) -> String {
        match self {
            FieldValue::Text(text) => text,
            FieldValue::Binary(bytes) => format_hex(&bytes),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            FieldValue::Text(text) => text.into_bytes(),
            FieldValue::Binary(bytes) => bytes,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

/// Decode card text (TIS-620) into a trimmed Unicode string.
///
/// Blank markers become spaces and runs of whitespace collapse to one space,
/// so `นาย#สมชาย##ใจดี` reads as `นาย สมชาย ใจดี`. Undecodable bytes are
/// replaced with U+FFFD, including the `0x80..=0xA0` range that only the
/// Windows code page defines.
pub fn thai_to_unicode(bytes: &[u8]) -> String {
    let input: Cow<'_, [u8]> = if bytes.iter().any(|b| TIS620_UNDEFINED.contains(b)) {
        bytes
            .iter()
            .map(|&b| if TIS620_UNDEFINED.contains(&b) { REPLACEMENT_BYTE } else { b })
            .collect()
    } else {
        Cow::Borrowed(bytes)
    };

    let (decoded, had_errors) = WINDOWS_874.decode_without_bom_handling(&input);
    if had_errors {
        log::warn!(
            "Replaced undecodable bytes in field data: {}",
            format_hex_spaced(bytes)
        );
    }

    decoded
        .replace(BLANK_MARKER, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Default decoder for text fields.
pub fn decode_text(bytes: &[u8]) -> FieldValue {
    FieldValue::Text(thai_to_unicode(bytes))
}

/// Decoder for binary payloads such as photo segments.
pub fn decode_raw(bytes: &[u8]) -> FieldValue {
    FieldValue::Binary(bytes.to_vec())
}
