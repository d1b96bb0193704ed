//! Inbound request/response types and attribute extraction helpers.
//!
//! The helpers are pure functions mapping a request/response pair to a flat
//! attribute mapping using OpenTelemetry-style semantic keys. They are
//! consumed by the span lifecycle, never redesigned by it.

use crate::context::TraceContext;
use crate::span::AttributeValue;
use std::collections::HashMap;

/// Inbound request, as handed to an entry handler.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Header lookup, case-insensitive on the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Response produced by an entry handler.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// Returns the path component of a URL, defaulting to `/`.
pub fn url_path(url: &str) -> &str {
    let rest = url
        .split_once("://")
        .map_or(url, |(_, rest)| rest);
    match rest.find('/') {
        Some(idx) => {
            let path = &rest[idx..];
            match path.find(['?', '#']) {
                Some(end) => &path[..end],
                None => path,
            }
        }
        None => "/",
    }
}

/// Flat attributes derivable from the inbound request.
pub fn request_attributes(req: &Request) -> Vec<(String, AttributeValue)> {
    let mut attrs = vec![
        (
            "http.request.method".to_string(),
            AttributeValue::from(req.method.as_str()),
        ),
        ("url.full".to_string(), AttributeValue::from(req.url.as_str())),
        (
            "url.path".to_string(),
            AttributeValue::from(url_path(&req.url)),
        ),
    ];
    if let Some(agent) = req.header("user-agent") {
        attrs.push((
            "user_agent.original".to_string(),
            AttributeValue::from(agent),
        ));
    }
    attrs
}

/// Flat attributes derivable from the response.
pub fn response_attributes(resp: &Response) -> Vec<(String, AttributeValue)> {
    vec![
        (
            "http.response.status_code".to_string(),
            AttributeValue::Int(i64::from(resp.status)),
        ),
        (
            "http.response.body.size".to_string(),
            AttributeValue::from(resp.body.len()),
        ),
    ]
}

/// Parses a W3C `traceparent` header value into a remote parent context.
///
/// Accepts the `version-traceid-spanid-flags` form and rejects anything
/// malformed or carrying all-zero identifiers.
pub fn parse_traceparent(value: &str) -> Option<TraceContext> {
    let mut parts = value.trim().split('-');
    let version = parts.next()?;
    let trace_hex = parts.next()?;
    let span_hex = parts.next()?;
    let _flags = parts.next()?;
    if version == "00" && parts.next().is_some() {
        // Future versions may append fields; version 00 must not.
        return None;
    }
    if version.len() != 2 || trace_hex.len() != 32 || span_hex.len() != 16 {
        return None;
    }
    let trace_id = u128::from_str_radix(trace_hex, 16).ok()?;
    let span_id = u64::from_str_radix(span_hex, 16).ok()?;
    if trace_id == 0 || span_id == 0 {
        return None;
    }
    Some(TraceContext { trace_id, span_id })
}
