//! Encrypted value codec.
//!
//! A field value travels as `<type>/<base64(encrypt(plaintext))>`, where the
//! plaintext is the value's canonical serialization:
//!
//! | tag | plaintext |
//! |---|---|
//! | `text` | UTF-8 string |
//! | `number` | decimal string |
//! | `date` | decimal Unix-epoch seconds |
//! | `bytes`, `image` | raw bytes |
//! | `dictionary`, `array` | JSON |
//! | `entity` | referenced record id |
//! | `null` | empty |
//!
//! `mdictionary` and `marray` are accepted on decode as aliases.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::crypto::{Cipher, CryptoError};
use crate::error::Result;
use crate::models::FieldValue;

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Reasons a wire value is "unable to decode"
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unable to decode: missing type separator")]
    MissingSeparator,
    #[error("unable to decode: unknown type tag '{0}'")]
    UnknownTag(String),
    #[error("unable to decode: malformed base64")]
    MalformedBase64,
    #[error("unable to decode: {0}")]
    Decrypt(#[from] CryptoError),
    #[error("unable to decode: malformed {0} payload")]
    MalformedPayload(&'static str),
}

/// Converts field values to and from their encrypted wire form
#[derive(Clone)]
pub struct ValueCodec {
    cipher: Arc<dyn Cipher>,
}

impl ValueCodec {
    pub fn new(cipher: Arc<dyn Cipher>) -> Self {
        Self { cipher }
    }

    pub fn encode(&self, value: &FieldValue) -> Result<String> {
        let (tag, plaintext) = match value {
            FieldValue::Null => ("null", Vec::new()),
            FieldValue::Text(text) => ("text", text.as_bytes().to_vec()),
            FieldValue::Integer(number) => ("number", number.to_string().into_bytes()),
            FieldValue::Double(number) => ("number", format_double(*number).into_bytes()),
            FieldValue::Date(date) => ("date", format_epoch_seconds(date).into_bytes()),
            FieldValue::Bytes(bytes) => ("bytes", bytes.clone()),
            FieldValue::Image(bytes) => ("image", bytes.clone()),
            FieldValue::Dictionary(map) => ("dictionary", serde_json::to_vec(map)?),
            FieldValue::Array(items) => ("array", serde_json::to_vec(items)?),
            FieldValue::Entity(id) => ("entity", id.as_bytes().to_vec()),
        };

        let encrypted = self.cipher.encrypt(&plaintext)?;
        Ok(format!("{tag}/{}", BASE64_STANDARD.encode(encrypted)))
    }

    pub fn decode(&self, wire: &str) -> std::result::Result<FieldValue, DecodeError> {
        // base64 may itself contain '/', so only the first one separates the tag
        let (tag, payload) = wire.split_once('/').ok_or(DecodeError::MissingSeparator)?;
        if !is_known_tag(tag) {
            return Err(DecodeError::UnknownTag(tag.to_string()));
        }
        if tag == "null" {
            return Ok(FieldValue::Null);
        }

        let encrypted = BASE64_STANDARD
            .decode(payload.trim())
            .map_err(|_| DecodeError::MalformedBase64)?;
        let plaintext = self.cipher.decrypt(&encrypted)?;

        match tag {
            "text" => Ok(FieldValue::Text(utf8(plaintext, "text")?)),
            "number" => parse_number(&utf8(plaintext, "number")?),
            "date" => parse_epoch_seconds(&utf8(plaintext, "date")?).map(FieldValue::Date),
            "bytes" => Ok(FieldValue::Bytes(plaintext)),
            "image" => Ok(FieldValue::Image(plaintext)),
            "dictionary" | "mdictionary" => serde_json::from_slice(&plaintext)
                .map(FieldValue::Dictionary)
                .map_err(|_| DecodeError::MalformedPayload("dictionary")),
            "array" | "marray" => serde_json::from_slice(&plaintext)
                .map(FieldValue::Array)
                .map_err(|_| DecodeError::MalformedPayload("array")),
            "entity" => Ok(FieldValue::Entity(utf8(plaintext, "entity")?)),
            _ => Err(DecodeError::UnknownTag(tag.to_string())),
        }
    }
}

fn is_known_tag(tag: &str) -> bool {
    matches!(
        tag,
        "text"
            | "number"
            | "date"
            | "bytes"
            | "image"
            | "dictionary"
            | "mdictionary"
            | "array"
            | "marray"
            | "entity"
            | "null"
    )
}

fn utf8(bytes: Vec<u8>, kind: &'static str) -> std::result::Result<String, DecodeError> {
    String::from_utf8(bytes).map_err(|_| DecodeError::MalformedPayload(kind))
}

/// Doubles always carry a `.` or exponent so they decode back as doubles.
fn format_double(value: f64) -> String {
    format!("{value:?}")
}

fn parse_number(text: &str) -> std::result::Result<FieldValue, DecodeError> {
    let text = text.trim();
    let looks_fractional = text.chars().any(|c| matches!(c, '.' | 'e' | 'E'));

    if !looks_fractional {
        if let Ok(value) = text.parse::<i64>() {
            return Ok(FieldValue::Integer(value));
        }
    }
    // Non-finite doubles have no JSON form in the record table
    text.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(FieldValue::Double)
        .ok_or(DecodeError::MalformedPayload("number"))
}

fn format_epoch_seconds(date: &DateTime<Utc>) -> String {
    let nanos = i128::from(date.timestamp()) * NANOS_PER_SECOND
        + i128::from(date.timestamp_subsec_nanos());
    let sign = if nanos < 0 { "-" } else { "" };
    let magnitude = nanos.unsigned_abs();
    let whole = magnitude / NANOS_PER_SECOND.unsigned_abs();
    let fraction = magnitude % NANOS_PER_SECOND.unsigned_abs();

    if fraction == 0 {
        format!("{sign}{whole}")
    } else {
        let digits = format!("{fraction:09}");
        format!("{sign}{whole}.{}", digits.trim_end_matches('0'))
    }
}

fn parse_epoch_seconds(text: &str) -> std::result::Result<DateTime<Utc>, DecodeError> {
    let malformed = || DecodeError::MalformedPayload("date");
    let text = text.trim();
    let (negative, unsigned) = text
        .strip_prefix('-')
        .map_or((false, text), |rest| (true, rest));
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));

    if whole.is_empty()
        || !whole.chars().all(|c| c.is_ascii_digit())
        || fraction.len() > 9
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(malformed());
    }

    let whole: i128 = whole.parse().map_err(|_| malformed())?;
    let fraction: i128 = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<9}").parse().map_err(|_| malformed())?
    };

    let mut nanos = whole * NANOS_PER_SECOND + fraction;
    if negative {
        nanos = -nanos;
    }

    let seconds = i64::try_from(nanos.div_euclid(NANOS_PER_SECOND)).map_err(|_| malformed())?;
    let subsec = u32::try_from(nanos.rem_euclid(NANOS_PER_SECOND)).map_err(|_| malformed())?;
    DateTime::from_timestamp(seconds, subsec).ok_or_else(malformed)
}
