//! Per-operation capture context
//!
//! One `CaptureContext` exists per logical request/response pair. It owns
//! an [`Accumulator`] per direction, the response header snapshot and the
//! protocol flags derived from it, and hands each body out at most once.
//!
//! Direction lifecycle:
//!
//! ```text
//! Empty -> HeaderPending -> Accumulating -> Finalized -> Retrieved
//! ```
//!
//! Request and response move independently. Retrieval is allowed from any
//! state (best effort on timeout or cancellation); only the first retrieval
//! yields a value.

use super::accumulator::{decode, Accumulator};
use super::charset::encoding_from_content_type;
use super::chunked::{self, ChunkOutcome};
use super::headers::{HeaderSnapshot, ProtocolFlags};
use encoding_rs::{Encoding, UTF_8};
use log::{debug, trace};
use std::borrow::Cow;

/// Which half of the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Response,
}

/// How body bytes reach the context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Raw wire bytes; chunked bodies still carry their framing
    Wire,
    /// The host already removed the transfer coding
    Decoded,
}

/// Observable state of one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Nothing observed yet
    Empty,
    /// Traffic observed, header snapshot not yet available
    HeaderPending,
    /// Headers seen, body bytes accumulating
    Accumulating,
    /// Stream signalled completion
    Finalized,
    /// Body handed out
    Retrieved,
}

#[derive(Debug)]
struct DirectionCapture {
    accumulator: Accumulator,
    headers: Option<HeaderSnapshot>,
    encoding: &'static Encoding,
    complete: bool,
}

impl DirectionCapture {
    fn new(limit: Option<usize>) -> Self {
        Self {
            accumulator: limit.map_or_else(Accumulator::new, Accumulator::with_limit),
            headers: None,
            encoding: UTF_8,
            complete: false,
        }
    }

    fn state(&self) -> CaptureState {
        if self.accumulator.is_retrieved() {
            CaptureState::Retrieved
        } else if self.complete {
            CaptureState::Finalized
        } else if self.headers.is_some() {
            CaptureState::Accumulating
        } else if self.accumulator.has_started() {
            CaptureState::HeaderPending
        } else {
            CaptureState::Empty
        }
    }
}

/// Request/response capture for one logical operation.
#[derive(Debug)]
pub struct CaptureContext {
    framing: Framing,
    request: DirectionCapture,
    response: DirectionCapture,
    /// Derived from the first response header snapshot, then frozen
    flags: Option<ProtocolFlags>,
    reassemble_all_chunks: bool,
    failed: bool,
}

impl CaptureContext {
    /// Create a context with unbounded accumulators.
    pub fn new(framing: Framing) -> Self {
        Self::with_limit(framing, None)
    }

    /// Create a context whose accumulators keep at most `limit` bytes each.
    pub fn with_limit(framing: Framing, limit: Option<usize>) -> Self {
        Self {
            framing,
            request: DirectionCapture::new(limit),
            response: DirectionCapture::new(limit),
            flags: None,
            reassemble_all_chunks: false,
            failed: false,
        }
    }

    /// Reassemble every chunk of a chunked response instead of the first.
    pub fn reassemble_all_chunks(mut self, enabled: bool) -> Self {
        self.reassemble_all_chunks = enabled;
        self
    }

    fn side(&self, direction: Direction) -> &DirectionCapture {
        match direction {
            Direction::Request => &self.request,
            Direction::Response => &self.response,
        }
    }

    fn side_mut(&mut self, direction: Direction) -> &mut DirectionCapture {
        match direction {
            Direction::Request => &mut self.request,
            Direction::Response => &mut self.response,
        }
    }

    /// Record the request header snapshot (charset only; request bodies are
    /// never post-processed).
    pub fn on_request_headers(&mut self, headers: HeaderSnapshot) {
        self.request.encoding = encoding_from_content_type(headers.get("content-type"));
        self.request.headers = Some(headers);
    }

    /// Record the response header snapshot.
    ///
    /// The chunked/gzip flags are derived from the first snapshot only; later
    /// snapshots (e.g. trailers) merge into the stored headers but never
    /// change the flags.
    pub fn on_headers_available(&mut self, headers: HeaderSnapshot) {
        if self.flags.is_none() {
            let flags = ProtocolFlags::from_headers(&headers);
            debug!(
                "response headers available: chunked={}, gzip={}",
                flags.chunked, flags.gzipped
            );
            self.flags = Some(flags);
            self.response.encoding = encoding_from_content_type(headers.get("content-type"));
        }

        match self.response.headers.as_mut() {
            Some(existing) => {
                for (name, value) in headers.iter() {
                    existing.insert(name, value);
                }
            }
            None => self.response.headers = Some(headers),
        }
    }

    /// Append bytes read or written for `direction`.
    pub fn on_bytes(&mut self, direction: Direction, bytes: &[u8]) {
        trace!("{:?}: {} bytes", direction, bytes.len());
        self.side_mut(direction).accumulator.append(bytes);
    }

    /// The stream for `direction` reached EOF or was closed.
    pub fn on_stream_complete(&mut self, direction: Direction) {
        self.side_mut(direction).complete = true;
    }

    /// The operation failed; both bodies remain retrievable best effort.
    pub fn on_stream_error(&mut self) {
        self.failed = true;
    }

    /// Retrieve the request body, at most once.
    pub fn request_body(&self) -> Option<String> {
        let bytes = self.request.accumulator.finalize_bytes()?;
        Some(decode(&bytes, self.request.encoding))
    }

    /// Retrieve the response body, at most once.
    ///
    /// Chunked wire bodies are reassembled first; a chunk that has not fully
    /// arrived or cannot be parsed yields `None`. Gzip-flagged bodies are
    /// returned base64-encoded, still compressed.
    pub fn response_body(&self) -> Option<String> {
        let bytes = self.response.accumulator.finalize_bytes()?;
        let flags = self.flags.unwrap_or_default();

        let body: Cow<'_, [u8]> = if flags.chunked && self.framing == Framing::Wire {
            let outcome = if self.reassemble_all_chunks {
                chunked::all_chunks(&bytes)
            } else {
                chunked::first_chunk(&bytes)
            };
            match outcome {
                ChunkOutcome::Ready(payload) => payload,
                ChunkOutcome::NotReady => {
                    debug!("chunked response incomplete ({} bytes), dropping", bytes.len());
                    return None;
                }
                ChunkOutcome::Malformed(e) => {
                    debug!("chunked response malformed: {}", e);
                    return None;
                }
            }
        } else {
            Cow::Borrowed(&bytes)
        };

        if flags.gzipped {
            Some(base64::encode(&body))
        } else {
            Some(decode(&body, self.response.encoding))
        }
    }

    /// Retrieve the body for `direction`, at most once.
    pub fn take_body(&self, direction: Direction) -> Option<String> {
        match direction {
            Direction::Request => self.request_body(),
            Direction::Response => self.response_body(),
        }
    }

    pub fn state(&self, direction: Direction) -> CaptureState {
        self.side(direction).state()
    }

    pub fn headers(&self, direction: Direction) -> Option<&HeaderSnapshot> {
        self.side(direction).headers.as_ref()
    }

    pub fn headers_seen(&self) -> bool {
        self.flags.is_some()
    }

    pub fn is_chunked(&self) -> bool {
        self.flags.map_or(false, |f| f.chunked)
    }

    pub fn is_gzipped(&self) -> bool {
        self.flags.map_or(false, |f| f.gzipped)
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Bytes held for `direction` so far
    pub fn captured_len(&self, direction: Direction) -> usize {
        self.side(direction).accumulator.len()
    }

    /// Peek at the bytes held for `direction` without retrieving them.
    pub fn captured_bytes(&self, direction: Direction) -> &[u8] {
        self.side(direction).accumulator.peek()
    }

    /// Whether the body for `direction` hit the size limit
    pub fn is_truncated(&self, direction: Direction) -> bool {
        self.side(direction).accumulator.is_truncated()
    }

    /// Both bodies retrieved, or the operation failed
    pub fn is_disposable(&self) -> bool {
        self.failed
            || (self.request.state() == CaptureState::Retrieved
                && self.response.state() == CaptureState::Retrieved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn response_headers(pairs: &[(&str, &str)]) -> HeaderSnapshot {
        HeaderSnapshot::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_plain_exchange() {
        let mut ctx = CaptureContext::new(Framing::Wire);
        ctx.on_bytes(Direction::Request, b"{\"q\":");
        ctx.on_bytes(Direction::Request, b"1}");
        ctx.on_stream_complete(Direction::Request);

        ctx.on_headers_available(response_headers(&[("Content-Type", "application/json")]));
        ctx.on_bytes(Direction::Response, b"{\"ok\":true}");
        ctx.on_stream_complete(Direction::Response);

        assert_eq!(ctx.request_body().as_deref(), Some("{\"q\":1}"));
        assert_eq!(ctx.response_body().as_deref(), Some("{\"ok\":true}"));
        assert_eq!(ctx.request_body(), None);
        assert_eq!(ctx.response_body(), None);
        assert!(ctx.is_disposable());
    }

    #[test]
    fn test_state_machine() {
        let mut ctx = CaptureContext::new(Framing::Wire);
        assert_eq!(ctx.state(Direction::Response), CaptureState::Empty);

        ctx.on_bytes(Direction::Response, b"");
        assert_eq!(ctx.state(Direction::Response), CaptureState::HeaderPending);

        ctx.on_headers_available(response_headers(&[("Content-Length", "2")]));
        assert_eq!(ctx.state(Direction::Response), CaptureState::Accumulating);

        ctx.on_bytes(Direction::Response, b"hi");
        ctx.on_stream_complete(Direction::Response);
        assert_eq!(ctx.state(Direction::Response), CaptureState::Finalized);

        assert_eq!(ctx.response_body().as_deref(), Some("hi"));
        assert_eq!(ctx.state(Direction::Response), CaptureState::Retrieved);

        // Directions are independent
        assert_eq!(ctx.state(Direction::Request), CaptureState::Empty);
        assert!(!ctx.is_disposable());
    }

    #[test]
    fn test_chunked_response() {
        let mut ctx = CaptureContext::new(Framing::Wire);
        ctx.on_headers_available(response_headers(&[("Transfer-Encoding", "chunked")]));
        ctx.on_bytes(Direction::Response, b"5\r\nHel");
        ctx.on_bytes(Direction::Response, b"lo\r\n0\r\n\r\n");

        assert!(ctx.is_chunked());
        assert_eq!(ctx.response_body().as_deref(), Some("Hello"));
    }

    #[test]
    fn test_chunked_response_incomplete_is_none() {
        let mut ctx = CaptureContext::new(Framing::Wire);
        ctx.on_headers_available(response_headers(&[("Transfer-Encoding", "chunked")]));
        ctx.on_bytes(Direction::Response, b"5\r\nHel");

        assert_eq!(ctx.response_body(), None);
        // Consumed regardless; late data is not resurrected
        ctx.on_bytes(Direction::Response, b"lo\r\n0\r\n\r\n");
        assert_eq!(ctx.response_body(), None);
    }

    #[test]
    fn test_malformed_chunk_is_none() {
        let mut ctx = CaptureContext::new(Framing::Wire);
        ctx.on_headers_available(response_headers(&[("Transfer-Encoding", "chunked")]));
        ctx.on_bytes(Direction::Response, b"xyz\r\nHello\r\n");

        assert_eq!(ctx.response_body(), None);
    }

    #[test]
    fn test_all_chunks_option() {
        let mut ctx = CaptureContext::new(Framing::Wire).reassemble_all_chunks(true);
        ctx.on_headers_available(response_headers(&[("Transfer-Encoding", "chunked")]));
        ctx.on_bytes(Direction::Response, b"3\r\nfoo\r\n3\r\nbar\r\n0\r\n\r\n");

        assert_eq!(ctx.response_body().as_deref(), Some("foobar"));
    }

    #[test]
    fn test_decoded_framing_skips_reassembly() {
        let mut ctx = CaptureContext::new(Framing::Decoded);
        ctx.on_headers_available(response_headers(&[("Transfer-Encoding", "chunked")]));
        ctx.on_bytes(Direction::Response, b"already decoded");

        assert!(ctx.is_chunked());
        assert_eq!(ctx.response_body().as_deref(), Some("already decoded"));
    }

    #[test]
    fn test_gzip_chunk_passthrough_not_decompressed() {
        // gzip magic + arbitrary compressed bytes, not valid UTF-8
        let compressed: &[u8] = &[0x1f, 0x8b, 0x08, 0x00, 0xff, 0x00];
        let mut wire = b"6\r\n".to_vec();
        wire.extend_from_slice(compressed);
        wire.extend_from_slice(b"\r\n0\r\n\r\n");

        let mut ctx = CaptureContext::new(Framing::Wire);
        ctx.on_headers_available(response_headers(&[
            ("Transfer-Encoding", "chunked"),
            ("Content-Encoding", "gzip"),
        ]));
        ctx.on_bytes(Direction::Response, &wire);

        assert!(ctx.is_gzipped());
        // The still-compressed chunk bytes, base64 encoded
        assert_eq!(ctx.response_body().as_deref(), Some("H4sIAP8A"));
    }

    #[test]
    fn test_gzip_plain_body_base64() {
        let mut ctx = CaptureContext::new(Framing::Decoded);
        ctx.on_headers_available(response_headers(&[("Content-Encoding", "gzip")]));
        ctx.on_bytes(Direction::Response, &[0x1f, 0x8b]);

        assert_eq!(ctx.response_body().as_deref(), Some("H4s="));
    }

    #[test]
    fn test_flags_frozen_after_first_snapshot() {
        let mut ctx = CaptureContext::new(Framing::Wire);
        ctx.on_headers_available(response_headers(&[("Content-Type", "text/plain")]));
        ctx.on_headers_available(response_headers(&[
            ("Transfer-Encoding", "chunked"),
            ("Content-Encoding", "gzip"),
        ]));

        assert!(!ctx.is_chunked());
        assert!(!ctx.is_gzipped());
        let headers = ctx.headers(Direction::Response).unwrap();
        assert_eq!(headers.get("content-encoding"), Some("gzip"));
    }

    #[test]
    fn test_response_charset() {
        let mut ctx = CaptureContext::new(Framing::Decoded);
        ctx.on_headers_available(response_headers(&[(
            "Content-Type",
            "text/plain; charset=iso-8859-1",
        )]));
        ctx.on_bytes(Direction::Response, &[b'n', 0xE9]);

        assert_eq!(ctx.response_body().as_deref(), Some("né"));
    }

    #[test]
    fn test_error_allows_partial_retrieval() {
        let mut ctx = CaptureContext::new(Framing::Wire);
        ctx.on_bytes(Direction::Request, b"partial");
        ctx.on_stream_error();

        assert!(ctx.is_disposable());
        assert_eq!(ctx.request_body().as_deref(), Some("partial"));
        assert_eq!(ctx.response_body().as_deref(), Some(""));
    }

    #[test]
    fn test_body_limit() {
        let mut ctx = CaptureContext::with_limit(Framing::Decoded, Some(3));
        ctx.on_bytes(Direction::Request, b"abcdef");

        assert!(ctx.is_truncated(Direction::Request));
        assert_eq!(ctx.request_body().as_deref(), Some("abc"));
    }

    #[test]
    fn test_concurrent_retrieval_single_winner() {
        for _ in 0..32 {
            let mut ctx = CaptureContext::new(Framing::Wire);
            ctx.on_bytes(Direction::Response, b"done");
            let ctx = Arc::new(ctx);

            let winners: usize = std::thread::scope(|s| {
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        let ctx = Arc::clone(&ctx);
                        s.spawn(move || ctx.response_body())
                    })
                    .collect();
                handles
                    .into_iter()
                    .filter_map(|h| h.join().ok().flatten())
                    .count()
            });

            assert_eq!(winners, 1);
        }
    }
}
