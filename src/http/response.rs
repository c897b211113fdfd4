//! Response types and header parsing.
//!
//! # Responsibilities
//! - Build the lower-cased header map from raw name/value pairs
//! - Coerce literal header values (numbers, booleans) without evaluating them
//! - Hold the immutable, fully buffered response returned to callers

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::TunnelResult;

/// A single response header value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl HeaderValue {
    /// Coerce a literal header value into its natural type.
    ///
    /// Tries integer, then float, then boolean; anything else stays text.
    pub fn coerce(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(n) = trimmed.parse::<i64>() {
            return HeaderValue::Integer(n);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            // "inf" / "NaN" parse as floats but are not numeric literals on the wire
            if f.is_finite() {
                return HeaderValue::Float(f);
            }
        }
        match trimmed {
            "true" => HeaderValue::Bool(true),
            "false" => HeaderValue::Bool(false),
            _ => HeaderValue::Text(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Text(s) => f.write_str(s),
            HeaderValue::Integer(n) => write!(f, "{}", n),
            HeaderValue::Float(v) => write!(f, "{}", v),
            HeaderValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Response headers keyed by lower-cased name.
pub type HeaderMap = BTreeMap<String, HeaderValue>;

/// Build a header map from raw `(name, value)` pairs.
///
/// Repeated names keep the last value.
pub fn parse_headers(raw: &[(String, String)], evaluate: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in raw {
        let value = if evaluate {
            HeaderValue::coerce(value)
        } else {
            HeaderValue::Text(value.clone())
        };
        headers.insert(name.to_ascii_lowercase(), value);
    }
    headers
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Body {
    Text(String),
    Json(serde_json::Value),
}

/// A complete response. Non-2xx statuses are ordinary responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Body,
}

impl Response {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(&name.to_ascii_lowercase())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body as text; JSON bodies are re-serialized.
    pub fn text(&self) -> String {
        match &self.body {
            Body::Text(s) => s.clone(),
            Body::Json(v) => v.to_string(),
        }
    }

    /// Deserialize the body into a caller type.
    pub fn json<T: DeserializeOwned>(&self) -> TunnelResult<T> {
        let value = match &self.body {
            Body::Json(v) => serde_json::from_value(v.clone())?,
            Body::Text(s) => serde_json::from_str(s)?,
        };
        Ok(value)
    }
}
