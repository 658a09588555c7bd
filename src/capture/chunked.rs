//! Chunked transfer-encoding reassembly
//!
//! A chunked body is a sequence of `<hex-size>[;ext]\r\n<bytes>\r\n` chunks
//! terminated by a zero-size chunk and an empty trailer line:
//!
//! ```text
//! 5\r\nHello\r\n0\r\n\r\n
//! ```
//!
//! Reassembly strips the framing and returns only the payload bytes. A
//! capture that has not yet received a full chunk is `NotReady`, never an
//! error.

use std::borrow::Cow;

/// Longest accepted chunk-size field (hex digits, a `u64` worth)
const MAX_SIZE_DIGITS: usize = 16;

/// Result of a reassembly attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome<'a> {
    /// Payload bytes with the chunk framing removed
    Ready(Cow<'a, [u8]>),
    /// Not enough bytes captured yet
    NotReady,
    /// Framing could not be parsed
    Malformed(ChunkError),
}

impl<'a> ChunkOutcome<'a> {
    /// The payload, if reassembly succeeded
    pub fn ready(self) -> Option<Cow<'a, [u8]>> {
        match self {
            ChunkOutcome::Ready(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ChunkOutcome::Ready(_))
    }
}

/// Chunk framing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkError {
    /// Size line is empty or contains non-hex characters
    InvalidSize,
    /// Size line is longer than any real chunk size
    SizeTooLong,
    /// Chunk data is not followed by CRLF
    MissingTerminator,
}

impl std::fmt::Display for ChunkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkError::InvalidSize => write!(f, "Invalid chunk size line"),
            ChunkError::SizeTooLong => write!(f, "Chunk size line too long"),
            ChunkError::MissingTerminator => write!(f, "Chunk data not terminated by CRLF"),
        }
    }
}

/// A parsed chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkHeader {
    /// Declared payload size
    size: usize,
    /// Offset of the first payload byte
    data_start: usize,
}

/// Parse the chunk-size line starting at `pos`.
///
/// `Ok(None)` means the line's CRLF has not arrived yet.
fn parse_header(buf: &[u8], pos: usize) -> Result<Option<ChunkHeader>, ChunkError> {
    let rest = buf.get(pos..).unwrap_or_default();
    let line_end = match rest.windows(2).position(|w| w == b"\r\n") {
        Some(end) => end,
        None if rest.len() > MAX_SIZE_DIGITS + 64 => return Err(ChunkError::SizeTooLong),
        None => return Ok(None),
    };

    let line = &rest[..line_end];
    // Chunk extensions are ignored
    let size_field = match line.iter().position(|&b| b == b';') {
        Some(semi) => &line[..semi],
        None => line,
    };
    let size_field = trim_ascii(size_field);

    if size_field.is_empty() || !size_field.iter().all(u8::is_ascii_hexdigit) {
        return Err(ChunkError::InvalidSize);
    }
    if size_field.len() > MAX_SIZE_DIGITS {
        return Err(ChunkError::SizeTooLong);
    }

    let size = size_field.iter().try_fold(0usize, |acc, &b| {
        let digit = (b as char).to_digit(16)? as usize;
        acc.checked_mul(16)?.checked_add(digit)
    });

    match size {
        Some(size) => Ok(Some(ChunkHeader {
            size,
            data_start: pos + line_end + 2,
        })),
        None => Err(ChunkError::SizeTooLong),
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |e| e + 1);
    &bytes[start..end]
}

/// Extract the payload of the first chunk in `buf`.
///
/// Only the leading chunk is returned; this covers the small JSON/text
/// payloads that make up nearly all captures. See [`all_chunks`] for full
/// reassembly.
pub fn first_chunk(buf: &[u8]) -> ChunkOutcome<'_> {
    let header = match parse_header(buf, 0) {
        Ok(Some(header)) => header,
        Ok(None) => return ChunkOutcome::NotReady,
        Err(e) => return ChunkOutcome::Malformed(e),
    };

    match header.data_start.checked_add(header.size) {
        Some(end) if end <= buf.len() => {
            ChunkOutcome::Ready(Cow::Borrowed(&buf[header.data_start..end]))
        }
        _ => ChunkOutcome::NotReady,
    }
}

/// Concatenate the payloads of every chunk up to the terminal zero-size chunk.
pub fn all_chunks(buf: &[u8]) -> ChunkOutcome<'static> {
    let mut payload = Vec::new();
    let mut pos = 0;

    loop {
        let header = match parse_header(buf, pos) {
            Ok(Some(header)) => header,
            Ok(None) => return ChunkOutcome::NotReady,
            Err(e) => return ChunkOutcome::Malformed(e),
        };

        if header.size == 0 {
            return ChunkOutcome::Ready(Cow::Owned(payload));
        }

        let end = match header.data_start.checked_add(header.size) {
            Some(end) if end <= buf.len() => end,
            _ => return ChunkOutcome::NotReady,
        };
        payload.extend_from_slice(&buf[header.data_start..end]);

        let rest = buf.get(end..).unwrap_or_default();
        if rest.starts_with(b"\r\n") {
            pos = end + 2;
        } else if rest.len() >= 2 {
            return ChunkOutcome::Malformed(ChunkError::MissingTerminator);
        } else {
            return ChunkOutcome::NotReady;
        }
    }
}

/// Whether `buf` holds a complete chunked body: every chunk plus the
/// terminal zero-size chunk and the blank line closing the trailers.
pub fn is_terminated(buf: &[u8]) -> bool {
    let mut pos = 0;

    loop {
        let header = match parse_header(buf, pos) {
            Ok(Some(header)) => header,
            _ => return false,
        };

        if header.size == 0 {
            // Skip trailer fields until the empty line
            let trailers = buf.get(header.data_start..).unwrap_or_default();
            return trailers.starts_with(b"\r\n")
                || trailers.windows(4).any(|w| w == b"\r\n\r\n");
        }

        pos = match header.data_start.checked_add(header.size) {
            Some(end) if buf.get(end..).map_or(false, |r| r.starts_with(b"\r\n")) => end + 2,
            _ => return false,
        };
    }
}
