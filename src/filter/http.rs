//! HTTP (L7) capture context
//!
//! Envoy has already parsed the exchange: headers arrive as pairs and bodies
//! arrive de-chunked, one buffer per callback. Bodies are captured as they
//! pass and exported from `on_log`.

use super::{CaptureSettings, HostHeaders};
use crate::capture::{CaptureContext, Direction, Framing};
use crate::telemetry::CaptureEvent;
use log::{debug, trace};
use proxy_wasm::traits::{Context, HttpContext};
use proxy_wasm::types::Action;
use std::rc::Rc;
use std::time::UNIX_EPOCH;

/// HTTP context for per-request capture
pub struct CaptureHttpContext {
    context_id: u32,
    settings: Rc<CaptureSettings>,
    capture: CaptureContext,
    path: Option<String>,
    status: Option<u16>,
    /// Request path matched an excluded endpoint
    excluded: bool,
}

impl CaptureHttpContext {
    pub fn new(context_id: u32, settings: Rc<CaptureSettings>) -> Self {
        let capture = settings.new_capture(Framing::Decoded);
        Self {
            context_id,
            settings,
            capture,
            path: None,
            status: None,
            excluded: false,
        }
    }

    fn on_request_headers(&mut self, headers: HostHeaders, end_of_stream: bool) {
        if let Some(path) = headers.path.as_deref() {
            if let Some(pattern) = self.settings.excluded_by(path) {
                debug!(
                    "[context_id={}] Skipping excluded endpoint {} (pattern '{}')",
                    self.context_id, path, pattern
                );
                self.excluded = true;
            }
        }
        self.path = headers.path;
        self.capture.on_request_headers(headers.snapshot);
        if end_of_stream {
            self.capture.on_stream_complete(Direction::Request);
        }
    }

    fn on_response_headers(&mut self, headers: HostHeaders, end_of_stream: bool) {
        if headers.status.is_some() {
            self.status = headers.status;
        }
        self.capture.on_headers_available(headers.snapshot);
        if end_of_stream {
            self.capture.on_stream_complete(Direction::Response);
        }
    }

    /// Whether the next body buffer for `direction` is worth fetching
    fn wants_body(&self, direction: Direction) -> bool {
        !self.excluded
            && self.settings.captures(direction)
            && !self.capture.is_truncated(direction)
    }

    fn on_body(&mut self, direction: Direction, chunk: &[u8], end_of_stream: bool) {
        trace!(
            "[context_id={}] {:?} body chunk: {} bytes, end_of_stream: {}",
            self.context_id,
            direction,
            chunk.len(),
            end_of_stream
        );
        self.capture.on_bytes(direction, chunk);
        if end_of_stream {
            self.capture.on_stream_complete(direction);
        }
    }

    /// Build the event for the finished exchange, at most once.
    fn finish(&mut self, timestamp_secs: Option<u64>) -> Option<CaptureEvent> {
        if self.excluded || self.settings.already_exported(&self.capture) {
            return None;
        }

        let mut event = self.settings.build_event(self.context_id, &self.capture);
        if let Some(path) = self.path.as_deref() {
            event = event.with_path(path);
        }
        if let Some(status) = self.status {
            event = event.with_status(status);
        }
        if let Some(secs) = timestamp_secs {
            event = event.with_timestamp(secs);
        }
        Some(event)
    }
}

impl Context for CaptureHttpContext {}

impl HttpContext for CaptureHttpContext {
    fn on_http_request_headers(&mut self, _num_headers: usize, end_of_stream: bool) -> Action {
        let headers = HostHeaders::from_pairs(self.get_http_request_headers());
        self.on_request_headers(headers, end_of_stream);
        Action::Continue
    }

    fn on_http_request_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        if self.wants_body(Direction::Request) {
            // Returning Continue releases each buffer, so this is only the new chunk
            let chunk = self.get_http_request_body(0, body_size).unwrap_or_default();
            self.on_body(Direction::Request, &chunk, end_of_stream);
        } else if end_of_stream {
            self.capture.on_stream_complete(Direction::Request);
        }
        Action::Continue
    }

    fn on_http_response_headers(&mut self, _num_headers: usize, end_of_stream: bool) -> Action {
        let headers = HostHeaders::from_pairs(self.get_http_response_headers());
        self.on_response_headers(headers, end_of_stream);
        Action::Continue
    }

    fn on_http_response_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        if self.wants_body(Direction::Response) {
            let chunk = self.get_http_response_body(0, body_size).unwrap_or_default();
            self.on_body(Direction::Response, &chunk, end_of_stream);
        } else if end_of_stream {
            self.capture.on_stream_complete(Direction::Response);
        }
        Action::Continue
    }

    fn on_http_response_trailers(&mut self, _num_trailers: usize) -> Action {
        let trailers = HostHeaders::from_pairs(self.get_http_response_trailers());
        self.on_response_headers(trailers, true);
        Action::Continue
    }

    fn on_log(&mut self) {
        let timestamp_secs = self
            .get_current_time()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs());

        match self.finish(timestamp_secs) {
            Some(event) if event.has_payload() => event.emit(),
            Some(_) => debug!("[context_id={}] No payload captured", self.context_id),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureConfig;

    fn headers(list: &[(&str, &str)]) -> HostHeaders {
        HostHeaders::from_pairs(
            list.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn context(config: CaptureConfig) -> CaptureHttpContext {
        CaptureHttpContext::new(1, Rc::new(CaptureSettings::new(config)))
    }

    #[test]
    fn test_exchange_produces_event() {
        let mut ctx = context(CaptureConfig::default());

        ctx.on_request_headers(
            headers(&[(":path", "/orders"), ("content-type", "application/json")]),
            false,
        );
        ctx.on_body(Direction::Request, b"{\"item\":", false);
        ctx.on_body(Direction::Request, b"42}", true);
        ctx.on_response_headers(headers(&[(":status", "201")]), false);
        ctx.on_body(Direction::Response, b"{\"id\":9}", true);

        let event = ctx.finish(Some(1_700_000_000)).unwrap();
        assert_eq!(event.path.as_deref(), Some("/orders"));
        assert_eq!(event.status, Some(201));
        assert_eq!(event.timestamp_secs, Some(1_700_000_000));
        assert_eq!(event.attributes.request_body.as_deref(), Some("{\"item\":42}"));
        assert_eq!(event.attributes.response_body.as_deref(), Some("{\"id\":9}"));

        // Bodies are handed out once
        assert!(ctx.finish(None).is_none());
    }

    #[test]
    fn test_excluded_endpoint() {
        let mut ctx = context(CaptureConfig::default());

        ctx.on_request_headers(headers(&[(":path", "/actuator/health")]), true);
        assert!(!ctx.wants_body(Direction::Response));
        assert!(ctx.finish(None).is_none());
    }

    #[test]
    fn test_trailers_do_not_change_flags() {
        let mut ctx = context(CaptureConfig::default());

        ctx.on_response_headers(headers(&[(":status", "200")]), false);
        ctx.on_body(Direction::Response, b"plain", false);
        ctx.on_response_headers(headers(&[("content-encoding", "gzip")]), true);

        let event = ctx.finish(None).unwrap();
        assert_eq!(event.attributes.response_body.as_deref(), Some("plain"));
        assert_eq!(event.attributes.response_content_encoding, None);
        assert_eq!(event.status, Some(200));
    }

    #[test]
    fn test_body_limit_stops_fetching() {
        let config = CaptureConfig {
            max_body_size: 4,
            ..Default::default()
        };
        let mut ctx = context(config);

        ctx.on_body(Direction::Request, b"abcdef", false);
        assert!(!ctx.wants_body(Direction::Request));

        let event = ctx.finish(None).unwrap();
        assert!(event.request_truncated);
        assert_eq!(event.attributes.request_body.as_deref(), Some("abcd"));
    }
}
