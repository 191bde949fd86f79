//! Logical request representation
//!
//! A [`Request`] carries everything the dispatcher needs: method, escaped
//! path segments, unique-keyed query parameters, header overrides, the
//! already-encoded body, the caller's deadline, and the routing key.
//! Builders consume `self`; once handed to the dispatcher the request is
//! only ever read.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::time::Instant;

pub use reqwest::Method;

// Everything RFC 3986 forbids in a path segment, plus '%' so pre-encoded
// input is not double-interpreted.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'\\')
    .add(b'%');

const QUERY: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'#')
    .add(b'&')
    .add(b'=')
    .add(b'+')
    .add(b'%');

/// One logical request, immutable once dispatched.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    path: Vec<String>,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Caller deadline; expiry cancels the call, in flight or not.
    pub deadline: Option<Instant>,
    /// Database name used by keyed endpoint selection.
    pub routing_key: Option<String>,
}

impl Request {
    pub fn new<S: AsRef<str>>(method: Method, segments: impl IntoIterator<Item = S>) -> Self {
        Self {
            method,
            path: segments
                .into_iter()
                .map(|s| s.as_ref().to_string())
                .collect(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            deadline: None,
            routing_key: None,
        }
    }

    /// Set a query parameter. Keys are unique; setting an existing key
    /// replaces its value.
    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.query.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.query.push((key.to_string(), value)),
        }
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    /// Conditional revision check: the server refuses the operation with
    /// precondition-failed unless the stored revision matches.
    pub fn if_match(self, revision: &str) -> Self {
        self.header("if-match", format!("\"{revision}\""))
    }

    pub fn body_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.body = Some(bytes);
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn routing_key(mut self, key: impl Into<String>) -> Self {
        self.routing_key = Some(key.into());
        self
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Serialize the target URL against a base endpoint, escaping each path
    /// segment and query pair.
    pub fn url_on(&self, endpoint: &str) -> String {
        let mut url = String::with_capacity(endpoint.len() + 32);
        url.push_str(endpoint.trim_end_matches('/'));
        for segment in &self.path {
            url.push('/');
            url.push_str(&utf8_percent_encode(segment, SEGMENT).to_string());
        }
        for (i, (key, value)) in self.query.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str(&utf8_percent_encode(key, QUERY).to_string());
            url.push('=');
            url.push_str(&utf8_percent_encode(value, QUERY).to_string());
        }
        url
    }
}
