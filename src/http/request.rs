//! Request options and HTTP/1.1 request framing.
//!
//! # Responsibilities
//! - Collect per-request options (method, headers, query, body, timeout)
//! - Merge explicit query parameters over those embedded in the URL
//! - Serialize the full request frame into a single buffer
//!
//! # Design Decisions
//! - The whole frame is built before writing so it goes out in one write
//! - Caller header names are lower-cased; `content-type` and
//!   `content-length` supplied by the caller suppress the computed ones

use std::time::Duration;
use url::form_urlencoded;
use url::Url;

use crate::net::endpoint::TargetEndpoint;

const ACCEPT: &str = "*/*";
const ACCEPT_ENCODING: &str = "br;q=1.0, gzip;q=0.8, deflate;q=0.6, *;q=0.1";

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Written verbatim.
    Text(String),
    /// Serialized as JSON with `Content-Type: application/json`.
    Json(serde_json::Value),
}

/// Options for a single request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub form: Option<Vec<(String, String)>>,
    pub body: Option<RequestBody>,
    pub timeout: Option<Duration>,
    pub parse_json: bool,
    pub evaluate_headers: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            headers: Vec::new(),
            query: Vec::new(),
            form: None,
            body: None,
            timeout: None,
            parse_json: false,
            evaluate_headers: true,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into().to_ascii_uppercase();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.headers.push((name.into(), value.to_string()));
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn form(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.form
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn parse_json(mut self, enabled: bool) -> Self {
        self.parse_json = enabled;
        self
    }

    pub fn evaluate_headers(mut self, enabled: bool) -> Self {
        self.evaluate_headers = enabled;
        self
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

/// Build `path?query` with explicit query keys overriding URL keys.
pub fn request_target(url: &Url, explicit: &[(String, String)]) -> String {
    let mut merged: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    for (key, value) in explicit {
        merged.retain(|(k, _)| k != key);
        merged.push((key.clone(), value.clone()));
    }

    let path = match url.path() {
        "" => "/",
        p => p,
    };

    if merged.is_empty() {
        return path.to_string();
    }

    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(merged.iter())
        .finish();
    format!("{}?{}", path, query)
}

/// Serialize a complete HTTP/1.1 request frame.
pub fn encode_request(target: &TargetEndpoint, url: &Url, options: &RequestOptions) -> Vec<u8> {
    let mut head = String::with_capacity(256);

    head.push_str(&format!(
        "{} {} HTTP/1.1\r\n",
        options.method,
        request_target(url, &options.query)
    ));
    head.push_str(&format!("Host: {}\r\n", target.host_header()));
    head.push_str(&format!("Accept: {}\r\n", ACCEPT));
    head.push_str(&format!("Accept-Encoding: {}\r\n", ACCEPT_ENCODING));

    for (name, value) in &options.headers {
        head.push_str(&format!("{}: {}\r\n", name.to_ascii_lowercase(), value));
    }

    let (content_type, payload) = match (&options.form, &options.body) {
        (Some(form), _) => {
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(form.iter())
                .finish();
            (Some("application/x-www-form-urlencoded"), encoded.into_bytes())
        }
        (None, Some(RequestBody::Json(value))) => {
            (Some("application/json"), value.to_string().into_bytes())
        }
        (None, Some(RequestBody::Text(text))) => (None, text.clone().into_bytes()),
        (None, None) => (None, Vec::new()),
    };

    if let Some(content_type) = content_type {
        if !options.has_header("content-type") {
            head.push_str(&format!("Content-Type: {}\r\n", content_type));
        }
    }
    if !options.has_header("content-length") {
        head.push_str(&format!("Content-Length: {}\r\n", payload.len()));
    }
    head.push_str("\r\n");

    let mut frame = head.into_bytes();
    frame.extend_from_slice(&payload);
    frame
}
