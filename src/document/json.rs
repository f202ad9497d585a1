//! JSON decoder
//!
//! Bundled `Decoder` implementation backed by serde_json. Object fields come
//! out sorted by name; RFC 3339 strings are promoted to date-time nodes so
//! the difference engine can categorize them.

use chrono::DateTime;
use serde_json::Value as JsonValue;

use super::{DecodeError, Decoder, Document, Field, Value};

/// Decoder for JSON payloads; accepts any model name
#[derive(Debug, Clone, Default)]
pub struct JsonDecoder {
    /// Keep RFC 3339 strings as text instead of date-times
    pub plain_strings: bool,
}

impl JsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn convert(&self, value: JsonValue) -> Value {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => {
                if !self.plain_strings {
                    if let Some(dt) = parse_datetime(&s) {
                        return Value::DateTime(dt);
                    }
                }
                Value::Text(s)
            }
            JsonValue::Array(items) => {
                Value::Collection(items.into_iter().map(|v| self.convert(v)).collect())
            }
            JsonValue::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(name, v)| Field::new(name, self.convert(v)))
                    .collect(),
            ),
        }
    }
}

/// Only strings that look like full timestamps are promoted
fn parse_datetime(s: &str) -> Option<DateTime<chrono::FixedOffset>> {
    if s.len() < 20 || !s.as_bytes()[..4].iter().all(u8::is_ascii_digit) {
        return None;
    }
    DateTime::parse_from_rfc3339(s).ok()
}

impl Decoder for JsonDecoder {
    fn decode(&self, model: &str, raw: &[u8]) -> Result<Document, DecodeError> {
        let trimmed = raw
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .map(|start| &raw[start..])
            .unwrap_or_default();
        if trimmed.is_empty() {
            return Err(DecodeError::Empty);
        }

        let parsed: JsonValue =
            serde_json::from_slice(trimmed).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        Ok(Document::new(model, self.convert(parsed)))
    }
}
