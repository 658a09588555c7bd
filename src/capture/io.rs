//! Capturing stream decorators
//!
//! `CapturingReader` and `CapturingWriter` wrap a stream, own the
//! [`Accumulator`] for it and observe every call without altering the bytes
//! or results the caller sees. Decorators stacked on one logical operation
//! share a [`CallDepth`], so a read that passes through several of them is
//! captured once, by the outermost.

use super::accumulator::Accumulator;
use super::depth::CallDepth;
use encoding_rs::Encoding;
use std::io::{self, Read, Write};
use std::sync::Arc;

/// `Read` decorator that captures the bytes read through it.
#[derive(Debug)]
pub struct CapturingReader<R> {
    inner: R,
    accumulator: Accumulator,
    depth: Arc<CallDepth>,
    complete: bool,
}

impl<R: Read> CapturingReader<R> {
    pub fn new(inner: R, depth: Arc<CallDepth>) -> Self {
        Self::with_accumulator(inner, depth, Accumulator::new())
    }

    pub fn with_accumulator(inner: R, depth: Arc<CallDepth>, accumulator: Accumulator) -> Self {
        Self {
            inner,
            accumulator,
            depth,
            complete: false,
        }
    }

    /// Whether the inner reader reported EOF
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Payload captured so far, decoded, at most once.
    pub fn take_payload(&self, encoding: &'static Encoding) -> Option<String> {
        self.accumulator.finalize(encoding)
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CapturingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let scope = self.depth.scope();
        let result = self.inner.read(buf);
        if !scope.is_outermost() {
            return result;
        }

        match result {
            Ok(0) if !buf.is_empty() => self.complete = true,
            Ok(n) => self.accumulator.append_range(buf, 0, n),
            Err(_) => {}
        }
        result
    }
}

/// `Write` decorator that captures the bytes accepted by the inner writer.
#[derive(Debug)]
pub struct CapturingWriter<W> {
    inner: W,
    accumulator: Accumulator,
    depth: Arc<CallDepth>,
    closed: bool,
}

impl<W: Write> CapturingWriter<W> {
    pub fn new(inner: W, depth: Arc<CallDepth>) -> Self {
        Self::with_accumulator(inner, depth, Accumulator::new())
    }

    pub fn with_accumulator(inner: W, depth: Arc<CallDepth>, accumulator: Accumulator) -> Self {
        Self {
            inner,
            accumulator,
            depth,
            closed: false,
        }
    }

    /// Flush the inner writer and mark the stream as closed.
    pub fn close(&mut self) -> io::Result<()> {
        let result = self.flush();
        self.closed = true;
        result
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Payload captured so far, decoded, at most once.
    pub fn take_payload(&self, encoding: &'static Encoding) -> Option<String> {
        self.accumulator.finalize(encoding)
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CapturingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let scope = self.depth.scope();
        let result = self.inner.write(buf);
        if scope.is_outermost() && !self.closed {
            if let Ok(n) = result {
                self.accumulator.append_range(buf, 0, n);
            }
        }
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
