//! Envoy proxy-wasm integration
//!
//! Contexts translate host callbacks into [`CaptureContext`] events and,
//! once the exchange is logged, turn the captured bodies into a
//! [`CaptureEvent`]. Capture never alters traffic: every callback returns
//! `Action::Continue`.

pub mod endpoint;
pub mod http;
pub mod tcp;

use crate::capture::{CaptureContext, CaptureState, Direction, Framing, HeaderSnapshot};
use crate::config::CaptureConfig;
use crate::scrub::SecretScrubber;
use crate::telemetry::CaptureEvent;
use endpoint::EndpointFilter;

/// Configuration plus the matchers built from it, shared by every context
/// of one root context.
pub struct CaptureSettings {
    config: CaptureConfig,
    endpoints: EndpointFilter,
    scrubber: SecretScrubber,
}

impl CaptureSettings {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            endpoints: EndpointFilter::new(&config.excluded_endpoints),
            scrubber: SecretScrubber::new(&config.secret_key_patterns, config.mask_all_bodies),
            config,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Pattern that excludes `path` from capture, if any
    pub fn excluded_by(&self, path: &str) -> Option<&str> {
        self.endpoints.excluded_by(path)
    }

    /// Fresh capture for one exchange
    pub fn new_capture(&self, framing: Framing) -> CaptureContext {
        CaptureContext::with_limit(framing, Some(self.config.max_body_size))
            .reassemble_all_chunks(self.config.reassemble_all_chunks)
    }

    /// Whether body bytes for `direction` should be recorded
    pub fn captures(&self, direction: Direction) -> bool {
        match direction {
            Direction::Request => self.config.capture_request_body,
            Direction::Response => self.config.capture_response_body,
        }
    }

    /// Whether every captured direction of `capture` was already handed out.
    /// A failed exchange still exports what it captured.
    pub fn already_exported(&self, capture: &CaptureContext) -> bool {
        [Direction::Request, Direction::Response]
            .into_iter()
            .filter(|&direction| self.captures(direction))
            .all(|direction| capture.state(direction) == CaptureState::Retrieved)
    }

    /// Retrieve both bodies from `capture` and build the event for them.
    pub fn build_event(&self, context_id: u32, capture: &CaptureContext) -> CaptureEvent {
        let max_len = self.config.max_attribute_length;
        let mut event = CaptureEvent::new(context_id, self.config.capture_mode).with_truncation(
            capture.is_truncated(Direction::Request),
            capture.is_truncated(Direction::Response),
        );

        if self.config.capture_request_body {
            if let Some(body) = capture.request_body() {
                let truncated = capture.is_truncated(Direction::Request);
                event = event.with_request_body(&self.scrubber.scrub(&body, truncated), max_len);
            }
        }

        if self.config.capture_response_body {
            if let Some(body) = capture.response_body() {
                let truncated = capture.is_truncated(Direction::Response);
                event = event.with_response_body(&self.scrubber.scrub(&body, truncated), max_len);
                if capture.is_gzipped() && event.attributes.response_body.is_some() {
                    event = event.with_content_encoding("gzip");
                }
            }
        }

        event
    }
}

/// Header list as delivered by Envoy, split into pseudo-headers and the
/// regular header snapshot.
#[derive(Debug, Default)]
pub struct HostHeaders {
    pub snapshot: HeaderSnapshot,
    /// `:path`
    pub path: Option<String>,
    /// `:status`
    pub status: Option<u16>,
}

impl HostHeaders {
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut headers = Self::default();
        for (name, value) in pairs {
            match name.as_str() {
                ":path" => headers.path = Some(value),
                ":status" => headers.status = value.trim().parse().ok(),
                _ if name.starts_with(':') => {}
                _ => headers.snapshot.insert(&name, &value),
            }
        }
        headers
    }
}
