//! Payload capture engine
//!
//! Host-independent core: accumulates the bytes of a request/response pair,
//! finds where headers end, undoes chunked framing and hands each body out
//! exactly once.
//!
//! Memory bounded by `max_body_size` per direction; no regex, no async.

pub mod accumulator;
pub mod boundary;
pub mod charset;
pub mod chunked;
pub mod context;
pub mod depth;
pub mod headers;
pub mod io;
pub mod raw;

pub use accumulator::Accumulator;
pub use boundary::{find_body_start, BoundaryScanner};
pub use charset::encoding_from_content_type;
pub use chunked::{ChunkError, ChunkOutcome};
pub use context::{CaptureContext, CaptureState, Direction, Framing};
pub use depth::{CallDepth, DepthScope};
pub use headers::{parse_header_block, HeaderSnapshot, ProtocolFlags};
pub use io::{CapturingReader, CapturingWriter};
pub use raw::{RawMessage, RawProgress};
