//! Network (L4) capture context
//!
//! The filter sees raw connection bytes. Downstream data is the request,
//! upstream data is the response; both are tracked as HTTP/1.x wire
//! messages. One exchange is captured per connection.

use super::CaptureSettings;
use crate::capture::{CaptureContext, Direction, Framing, RawMessage, RawProgress};
use crate::telemetry::CaptureEvent;
use log::{debug, trace};
use proxy_wasm::traits::{Context, StreamContext};
use proxy_wasm::types::{Action, PeerType};
use std::rc::Rc;
use std::time::UNIX_EPOCH;

/// Stream context for per-connection capture
pub struct CaptureStreamContext {
    context_id: u32,
    settings: Rc<CaptureSettings>,
    capture: CaptureContext,
    request: RawMessage,
    response: RawMessage,
    excluded: bool,
}

impl CaptureStreamContext {
    pub fn new(context_id: u32, settings: Rc<CaptureSettings>) -> Self {
        Self {
            context_id,
            capture: settings.new_capture(Framing::Wire),
            request: RawMessage::new(Direction::Request)
                .capture_body(settings.captures(Direction::Request)),
            response: RawMessage::new(Direction::Response)
                .capture_body(settings.captures(Direction::Response)),
            excluded: false,
            settings,
        }
    }

    fn on_data(&mut self, direction: Direction, data: &[u8], end_of_stream: bool) {
        if self.excluded {
            return;
        }
        trace!(
            "[context_id={}] {:?} data: {} bytes, end_of_stream: {}",
            self.context_id,
            direction,
            data.len(),
            end_of_stream
        );

        let message = match direction {
            Direction::Request => &mut self.request,
            Direction::Response => &mut self.response,
        };
        let before = message.progress();
        let after = message.feed(&mut self.capture, data);
        if end_of_stream {
            message.close(&mut self.capture);
        }

        if after == RawProgress::Abandoned && before != after {
            self.capture.on_stream_error();
        }
        if direction == Direction::Request && before == RawProgress::Headers && after != before {
            self.check_exclusion();
        }
    }

    fn check_exclusion(&mut self) {
        let target = match self.request.request_target() {
            Some(target) => target,
            None => return,
        };
        if let Some(pattern) = self.settings.excluded_by(target) {
            debug!(
                "[context_id={}] Skipping excluded endpoint {} (pattern '{}')",
                self.context_id, target, pattern
            );
            self.excluded = true;
        }
    }

    fn on_close(&mut self, direction: Direction) {
        let message = match direction {
            Direction::Request => &mut self.request,
            Direction::Response => &mut self.response,
        };
        message.close(&mut self.capture);
    }

    /// Build the event for the captured exchange, at most once.
    fn finish(&mut self, timestamp_secs: Option<u64>) -> Option<CaptureEvent> {
        if self.excluded || self.settings.already_exported(&self.capture) {
            return None;
        }
        if !self.capture.headers_seen() && self.request.start_line().is_none() {
            // Not HTTP, or closed before anything parsed
            return None;
        }

        let mut event = self.settings.build_event(self.context_id, &self.capture);
        if let Some(target) = self.request.request_target() {
            event = event.with_path(target);
        }
        if let Some(status) = self.response.status_code() {
            event = event.with_status(status);
        }
        if let Some(secs) = timestamp_secs {
            event = event.with_timestamp(secs);
        }
        Some(event)
    }
}

impl Context for CaptureStreamContext {}

impl StreamContext for CaptureStreamContext {
    fn on_downstream_data(&mut self, data_size: usize, end_of_stream: bool) -> Action {
        let data = match data_size {
            0 => Vec::new(),
            _ => self.get_downstream_data(0, data_size).unwrap_or_default(),
        };
        self.on_data(Direction::Request, &data, end_of_stream);
        Action::Continue
    }

    fn on_downstream_close(&mut self, _peer_type: PeerType) {
        self.on_close(Direction::Request);
    }

    fn on_upstream_data(&mut self, data_size: usize, end_of_stream: bool) -> Action {
        let data = match data_size {
            0 => Vec::new(),
            _ => self.get_upstream_data(0, data_size).unwrap_or_default(),
        };
        self.on_data(Direction::Response, &data, end_of_stream);
        Action::Continue
    }

    fn on_upstream_close(&mut self, _peer_type: PeerType) {
        self.on_close(Direction::Response);
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
    use crate::capture::raw::MAX_HEADER_BYTES;
    use crate::config::{CaptureConfig, CaptureMode};

    fn context() -> CaptureStreamContext {
        let config = CaptureConfig {
            capture_mode: CaptureMode::Tcp,
            ..Default::default()
        };
        CaptureStreamContext::new(5, Rc::new(CaptureSettings::new(config)))
    }

    #[test]
    fn test_connection_exchange() {
        let mut ctx = context();

        ctx.on_data(
            Direction::Request,
            b"POST /login HTTP/1.1\r\nContent-Length: 33\r\n\r\n",
            false,
        );
        ctx.on_data(Direction::Request, br#"{"user":"ann","password":"pw123"}"#, false);
        ctx.on_data(
            Direction::Response,
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n",
            false,
        );
        ctx.on_data(Direction::Response, b"b\r\n{\"ok\":true}\r\n0\r\n\r\n", false);

        let event = ctx.finish(None).unwrap();
        assert_eq!(event.mode, CaptureMode::Tcp);
        assert_eq!(event.path.as_deref(), Some("/login"));
        assert_eq!(event.status, Some(200));
        let request: serde_json::Value =
            serde_json::from_str(event.attributes.request_body.as_deref().unwrap()).unwrap();
        assert_eq!(request["user"], "ann");
        assert_eq!(request["password"], "****");
        assert_eq!(event.attributes.response_body.as_deref(), Some("{\"ok\":true}"));
        assert!(ctx.finish(None).is_none());
    }

    #[test]
    fn test_response_ends_at_close() {
        let mut ctx = context();

        ctx.on_data(Direction::Request, b"GET /report HTTP/1.0\r\n\r\n", false);
        ctx.on_data(Direction::Response, b"HTTP/1.0 200 OK\r\n\r\nline one\n", false);
        ctx.on_data(Direction::Response, b"line two\n", false);
        ctx.on_close(Direction::Response);

        let event = ctx.finish(None).unwrap();
        assert_eq!(event.attributes.request_body, None);
        assert_eq!(
            event.attributes.response_body.as_deref(),
            Some("line one\nline two\n")
        );
    }

    #[test]
    fn test_excluded_target() {
        let mut ctx = context();

        ctx.on_data(Direction::Request, b"GET /health HTTP/1.1\r\n\r\n", false);
        ctx.on_data(Direction::Response, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nUP", false);

        assert!(ctx.finish(None).is_none());
    }

    #[test]
    fn test_non_http_connection_not_reported() {
        let mut ctx = context();

        ctx.on_data(Direction::Request, &[0x16, 0x03, 0x01, 0x00], false);
        ctx.on_close(Direction::Request);

        assert!(ctx.finish(None).is_none());
    }

    #[test]
    fn test_disabled_direction_not_buffered() {
        let config = CaptureConfig {
            capture_mode: CaptureMode::Tcp,
            capture_request_body: false,
            ..Default::default()
        };
        let mut ctx = CaptureStreamContext::new(6, Rc::new(CaptureSettings::new(config)));

        ctx.on_data(
            Direction::Request,
            b"POST /upload HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello",
            false,
        );
        assert_eq!(ctx.request.progress(), RawProgress::Complete);
        assert_eq!(ctx.capture.captured_len(Direction::Request), 0);

        ctx.on_data(Direction::Response, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok", false);

        let event = ctx.finish(None).unwrap();
        assert_eq!(event.path.as_deref(), Some("/upload"));
        assert_eq!(event.attributes.request_body, None);
        assert_eq!(event.attributes.response_body.as_deref(), Some("ok"));
        assert!(ctx.finish(None).is_none());
    }

    #[test]
    fn test_failed_exchange_still_exported() {
        let mut ctx = context();

        ctx.on_data(
            Direction::Request,
            b"POST /orders HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc",
            false,
        );
        ctx.on_data(Direction::Response, b"HTTP/1.1 200 OK\r\nX-Big: ", false);
        ctx.on_data(Direction::Response, &vec![b'a'; MAX_HEADER_BYTES], false);
        assert!(ctx.capture.is_failed());

        let event = ctx.finish(None).unwrap();
        assert_eq!(event.attributes.request_body.as_deref(), Some("abc"));
        assert_eq!(event.attributes.response_body, None);
        assert!(ctx.finish(None).is_none());
    }
}
