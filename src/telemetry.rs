//! Telemetry Module for payload capture
//!
//! Captured bodies are exported as span attributes. In Wasm, we emit one
//! structured log line per exchange that Envoy's access logging or an
//! external collector attaches to the trace.

use crate::config::CaptureMode;
use log::{info, warn};
use serde::Serialize;

/// Span attributes carrying the captured payloads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpanAttributes {
    #[serde(rename = "http.request.body", skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(rename = "http.response.body", skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    /// Set when the response body is exported still compressed (base64)
    #[serde(
        rename = "http.response.header.content_encoding",
        skip_serializing_if = "Option::is_none"
    )]
    pub response_content_encoding: Option<String>,
}

impl SpanAttributes {
    pub fn is_empty(&self) -> bool {
        self.request_body.is_none() && self.response_body.is_none()
    }
}

/// Capture event for one request/response exchange
#[derive(Debug, Clone, Serialize)]
pub struct CaptureEvent {
    /// Envoy context id
    pub context_id: u32,
    /// Layer the exchange was captured at
    pub mode: CaptureMode,
    /// Timestamp (seconds since epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_secs: Option<u64>,
    /// Request path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Response status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Request body hit `max_body_size`
    #[serde(skip_serializing_if = "is_false")]
    pub request_truncated: bool,
    /// Response body hit `max_body_size`
    #[serde(skip_serializing_if = "is_false")]
    pub response_truncated: bool,
    pub attributes: SpanAttributes,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl CaptureEvent {
    /// Create a new capture event
    pub fn new(context_id: u32, mode: CaptureMode) -> Self {
        Self {
            context_id,
            mode,
            timestamp_secs: None,
            path: None,
            status: None,
            request_truncated: false,
            response_truncated: false,
            attributes: SpanAttributes::default(),
        }
    }

    /// Set timestamp
    pub fn with_timestamp(mut self, secs: u64) -> Self {
        self.timestamp_secs = Some(secs);
        self
    }

    /// Set request path
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    /// Set response status
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the request body attribute. Empty bodies are not exported.
    pub fn with_request_body(mut self, body: &str, max_len: usize) -> Self {
        self.attributes.request_body = attribute_value(body, max_len);
        self
    }

    /// Set the response body attribute. Empty bodies are not exported.
    pub fn with_response_body(mut self, body: &str, max_len: usize) -> Self {
        self.attributes.response_body = attribute_value(body, max_len);
        self
    }

    /// Set the response content encoding attribute
    pub fn with_content_encoding(mut self, encoding: &str) -> Self {
        self.attributes.response_content_encoding = Some(encoding.to_string());
        self
    }

    /// Mark truncated bodies
    pub fn with_truncation(mut self, request: bool, response: bool) -> Self {
        self.request_truncated = request;
        self.response_truncated = response;
        self
    }

    /// Whether there is anything worth exporting
    pub fn has_payload(&self) -> bool {
        !self.attributes.is_empty()
    }

    /// Log the event
    pub fn emit(&self) {
        // Serialize to JSON for structured logging
        match serde_json::to_string(self) {
            Ok(json) => info!("[PAYLOAD-CAPTURE] {}", json),
            Err(e) => warn!("Failed to serialize capture event: {}", e),
        }
    }
}

fn attribute_value(body: &str, max_len: usize) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    Some(truncate_attribute(body, max_len).to_string())
}

/// Cut `value` to at most `max_len` bytes without splitting a character.
pub fn truncate_attribute(value: &str, max_len: usize) -> &str {
    if value.len() <= max_len {
        return value;
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
