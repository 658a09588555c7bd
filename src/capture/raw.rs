//! Raw HTTP/1.x message tracking
//!
//! Used when the filter sits below HTTP and only sees connection bytes. One
//! `RawMessage` follows one direction of one exchange: it finds the end of
//! the header block with a [`BoundaryScanner`], hands the parsed headers and
//! the body bytes to the [`CaptureContext`], and decides when the message is
//! complete.

use super::boundary::BoundaryScanner;
use super::chunked;
use super::context::{CaptureContext, Direction};
use super::headers::{parse_header_block, ProtocolFlags};
use log::debug;

/// Header bytes buffered before the direction gives up on a message
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Where a [`RawMessage`] stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawProgress {
    /// Still inside the header block
    Headers,
    /// Headers parsed, body bytes flowing
    Body,
    /// Message ended; later bytes are ignored
    Complete,
    /// Header block never ended within `MAX_HEADER_BYTES`
    Abandoned,
}

/// Body framing announced by the header block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    Length(usize),
    Chunked,
    /// Body runs until the connection closes
    UntilClose,
}

#[derive(Debug)]
pub struct RawMessage {
    direction: Direction,
    scanner: BoundaryScanner,
    header_bytes: Vec<u8>,
    start_line: Option<String>,
    framing: BodyFraming,
    body_len: usize,
    /// Last bytes of the body, to spot the end of a chunked stream
    tail: Vec<u8>,
    /// Push body bytes into the context; framing is tracked either way
    capture_body: bool,
    progress: RawProgress,
}

impl RawMessage {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            scanner: BoundaryScanner::new(),
            header_bytes: Vec::new(),
            start_line: None,
            framing: BodyFraming::UntilClose,
            body_len: 0,
            tail: Vec::with_capacity(4),
            capture_body: true,
            progress: RawProgress::Headers,
        }
    }

    /// Track the message without recording its body. Chunked bodies then
    /// complete at close.
    pub fn capture_body(mut self, enabled: bool) -> Self {
        self.capture_body = enabled;
        self
    }

    /// Feed the next bytes seen on the connection for this direction.
    pub fn feed(&mut self, ctx: &mut CaptureContext, chunk: &[u8]) -> RawProgress {
        match self.progress {
            RawProgress::Complete | RawProgress::Abandoned => return self.progress,
            RawProgress::Body => {
                self.on_body(ctx, chunk);
                return self.progress;
            }
            RawProgress::Headers => {}
        }

        // Traffic observed, headers not yet complete
        ctx.on_bytes(self.direction, &[]);

        let offset = match self.scanner.feed(chunk) {
            Some(offset) => offset.min(chunk.len()),
            None => {
                if self.header_bytes.len() + chunk.len() > MAX_HEADER_BYTES {
                    debug!(
                        "{:?}: header block exceeds {} bytes, not capturing",
                        self.direction, MAX_HEADER_BYTES
                    );
                    self.header_bytes = Vec::new();
                    self.progress = RawProgress::Abandoned;
                } else {
                    self.header_bytes.extend_from_slice(chunk);
                }
                return self.progress;
            }
        };

        let (head, body) = chunk.split_at(offset);
        self.header_bytes.extend_from_slice(head);
        let interim = self.on_header_block(ctx);

        if interim {
            // 1xx response: the real header block follows
            self.scanner = BoundaryScanner::new();
            return self.feed(ctx, body);
        }
        if self.progress == RawProgress::Body {
            self.on_body(ctx, body);
        }
        self.progress
    }

    /// The connection closed or half-closed for this direction.
    pub fn close(&mut self, ctx: &mut CaptureContext) -> RawProgress {
        match self.progress {
            RawProgress::Headers | RawProgress::Body => {
                if self.progress == RawProgress::Headers && !self.header_bytes.is_empty() {
                    debug!("{:?}: closed inside the header block", self.direction);
                }
                self.complete(ctx);
            }
            RawProgress::Complete | RawProgress::Abandoned => {}
        }
        self.progress
    }

    pub fn progress(&self) -> RawProgress {
        self.progress
    }

    /// Request line or status line, once the header block is parsed
    pub fn start_line(&self) -> Option<&str> {
        self.start_line.as_deref()
    }

    /// Request target from a request line (`GET /path HTTP/1.1`)
    pub fn request_target(&self) -> Option<&str> {
        match self.direction {
            Direction::Request => self.start_line()?.split(' ').nth(1),
            Direction::Response => None,
        }
    }

    /// Status code from a status line (`HTTP/1.1 200 OK`)
    pub fn status_code(&self) -> Option<u16> {
        match self.direction {
            Direction::Response => self.start_line()?.split(' ').nth(1)?.parse().ok(),
            Direction::Request => None,
        }
    }

    /// Parse the buffered header block. Returns `true` for an interim (1xx)
    /// response whose headers are not recorded.
    fn on_header_block(&mut self, ctx: &mut CaptureContext) -> bool {
        let block = std::mem::take(&mut self.header_bytes);
        let start_line = block
            .split(|&b| b == b'\r')
            .next()
            .map(|line| String::from_utf8_lossy(line).into_owned());
        self.start_line = start_line;

        let status = self.status_code();
        if matches!(status, Some(100..=199)) {
            debug!("{:?}: skipping interim response {:?}", self.direction, status);
            return true;
        }

        let headers = parse_header_block(&block);
        let flags = ProtocolFlags::from_headers(&headers);
        self.framing = if flags.chunked {
            BodyFraming::Chunked
        } else if let Some(len) = headers.content_length() {
            BodyFraming::Length(len)
        } else if self.direction == Direction::Request || matches!(status, Some(204 | 304)) {
            BodyFraming::Length(0)
        } else {
            BodyFraming::UntilClose
        };
        debug!(
            "{:?}: header block parsed, {} headers, framing {:?}",
            self.direction,
            headers.len(),
            self.framing
        );

        match self.direction {
            Direction::Request => ctx.on_request_headers(headers),
            Direction::Response => ctx.on_headers_available(headers),
        }

        if self.framing == BodyFraming::Length(0) {
            self.complete(ctx);
        } else {
            self.progress = RawProgress::Body;
        }
        false
    }

    fn on_body(&mut self, ctx: &mut CaptureContext, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        let take = match self.framing {
            BodyFraming::Length(total) => bytes.len().min(total.saturating_sub(self.body_len)),
            BodyFraming::Chunked | BodyFraming::UntilClose => bytes.len(),
        };
        if self.capture_body {
            ctx.on_bytes(self.direction, &bytes[..take]);
        }
        self.body_len += take;

        match self.framing {
            BodyFraming::Length(total) if self.body_len >= total => self.complete(ctx),
            BodyFraming::Chunked if self.capture_body => {
                self.update_tail(&bytes[..take]);
                // A truncated capture never parses as terminated; close ends it instead
                if self.tail.ends_with(b"\r\n\r\n")
                    && chunked::is_terminated(ctx.captured_bytes(self.direction))
                {
                    self.complete(ctx);
                }
            }
            _ => {}
        }
    }

    fn update_tail(&mut self, bytes: &[u8]) {
        self.tail.extend_from_slice(&bytes[bytes.len().saturating_sub(4)..]);
        let excess = self.tail.len().saturating_sub(4);
        self.tail.drain(..excess);
    }

    fn complete(&mut self, ctx: &mut CaptureContext) {
        self.progress = RawProgress::Complete;
        ctx.on_stream_complete(self.direction);
    }
}
