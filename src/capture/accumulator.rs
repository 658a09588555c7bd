//! One-shot payload accumulator
//!
//! Collects the bytes of one direction of a logical operation as they flow
//! through a stream and hands them back exactly once.
//!
//! - Appends are single-writer (`&mut self`), in delivery order.
//! - `finalize` takes `&self` and is guarded by an atomic swap, so completion
//!   callbacks racing on different threads get the payload at most once.
//! - Once retrieved, the accumulator is inert: appends are ignored and every
//!   further `finalize` returns `None`.

use encoding_rs::{Encoding, UTF_8};
use std::sync::atomic::{AtomicBool, Ordering};

/// Growable byte buffer with append and one-shot finalize semantics.
#[derive(Debug, Default)]
pub struct Accumulator {
    /// Captured bytes (amortized doubling growth)
    buffer: Vec<u8>,
    /// Optional cap on captured bytes
    limit: Option<usize>,
    /// Set once any append has been observed, even a zero-length one
    has_started: bool,
    /// Bytes were dropped because of `limit`
    truncated: bool,
    /// At-most-once retrieval guard
    retrieved: AtomicBool,
}

impl Accumulator {
    /// Create an unbounded accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an accumulator that keeps at most `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Append a slice of captured bytes.
    pub fn append(&mut self, bytes: &[u8]) {
        if self.is_retrieved() {
            return;
        }
        self.has_started = true;

        let room = match self.limit {
            Some(limit) => limit.saturating_sub(self.buffer.len()),
            None => bytes.len(),
        };
        if bytes.len() > room {
            self.truncated = true;
        }
        self.buffer.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    /// Append `len` bytes of `buf` starting at `offset`.
    ///
    /// Mirrors the `(buffer, offset, length)` shape of stream callbacks. A window
    /// reaching past the end of `buf` is clamped; a negative-sized or fully
    /// out-of-range window appends nothing.
    pub fn append_range(&mut self, buf: &[u8], offset: usize, len: usize) {
        let start = offset.min(buf.len());
        let end = offset.saturating_add(len).min(buf.len());
        self.append(&buf[start..end]);
    }

    /// Append a single byte, as produced by byte-at-a-time reads.
    pub fn append_byte(&mut self, byte: u8) {
        self.append(&[byte]);
    }

    /// Append text from a character writer (stored as UTF-8).
    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    /// Return the captured payload decoded with `encoding`, exactly once.
    ///
    /// Malformed sequences are replaced rather than rejected, so decoding
    /// never fails. Returns `None` on every call after the first.
    pub fn finalize(&self, encoding: &'static Encoding) -> Option<String> {
        self.finalize_bytes().map(|bytes| decode(&bytes, encoding))
    }

    /// Like [`finalize`](Self::finalize) but returns the raw bytes.
    pub fn finalize_bytes(&self) -> Option<Vec<u8>> {
        if self.retrieved.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(self.buffer.clone())
    }

    /// Whether any append was ever observed
    pub fn has_started(&self) -> bool {
        self.has_started
    }

    /// Whether the payload has already been handed out
    pub fn is_retrieved(&self) -> bool {
        self.retrieved.load(Ordering::Acquire)
    }

    /// Whether bytes were dropped because of the configured limit
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Number of bytes currently held
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Borrow the bytes captured so far without consuming them.
    pub fn peek(&self) -> &[u8] {
        &self.buffer
    }
}

/// Decode `bytes` with `encoding`, falling back to lossy UTF-8 when the
/// encoding cannot represent the input.
pub fn decode(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors && encoding != UTF_8 {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    text.into_owned()
}
