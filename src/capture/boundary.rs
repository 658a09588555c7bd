//! Header/body boundary detection
//!
//! An HTTP/1.x message starts with CRLF-terminated header lines followed by
//! an empty line. The body begins right after the first `\r\n\r\n`.
//!
//! The scan walks the buffer two bytes at a time where it can: a boundary
//! needs a `\r` at both `i` and `i + 2`, so any position that cannot hold
//! such a pair is skipped without a comparison.
//!
//! Boundary condition: a single window scan does not see a `\r\n\r\n` split
//! across two windows. Callers whose underlying buffer keeps earlier bytes
//! simply rescan the larger buffer; callers that only see each fill once use
//! [`BoundaryScanner`], which carries the last three bytes between fills.

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Bytes retained between fills: a boundary spans 4 bytes, so at most 3 of
/// them can sit in the previous fill.
const CARRY_LEN: usize = 3;

/// Locate the start of the body inside `buf[scan_start..scan_end]`.
///
/// Returns the absolute offset of the first body byte, or `None` if the
/// full `\r\n\r\n` sequence is not contained in the window. Bytes at or
/// beyond `scan_end` are never inspected.
pub fn find_body_start(buf: &[u8], scan_start: usize, scan_end: usize) -> Option<usize> {
    let window = &buf[..scan_end.min(buf.len())];
    let at = |idx: usize| window.get(idx).copied();

    let mut i = scan_start;
    while i + 1 < window.len() {
        if at(i) != Some(CR) {
            if at(i + 1) == Some(CR) {
                i += 1;
            } else {
                i += 2;
            }
            continue;
        }

        match at(i + 2) {
            // Boundary would need bytes past the window
            None => return None,
            Some(b) if b != CR => i += 3,
            Some(_) => {
                if at(i + 1) == Some(LF) && at(i + 3) == Some(LF) {
                    return Some(i + 4);
                }
                if at(i + 3).is_none() {
                    return None;
                }
                i += 1;
            }
        }
    }

    None
}

/// Boundary scanner for streams that hand out each fill only once.
#[derive(Debug, Default)]
pub struct BoundaryScanner {
    /// Trailing bytes of the previous fills
    carry: [u8; CARRY_LEN],
    /// Number of valid bytes in `carry`
    carry_len: usize,
    /// Total bytes fed so far
    consumed: usize,
    /// Absolute offset of the body start, once found
    body_start: Option<usize>,
}

impl BoundaryScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next fill.
    ///
    /// Returns the offset inside `chunk` where the body begins if the
    /// boundary completes in this fill. Once found, later fills return `None`.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<usize> {
        if self.body_start.is_some() || chunk.is_empty() {
            self.consumed += chunk.len();
            return None;
        }

        let found = self.scan_seam(chunk).or_else(|| find_body_start(chunk, 0, chunk.len()));
        self.update_carry(chunk);
        let fill_start = self.consumed;
        self.consumed += chunk.len();

        if let Some(offset) = found {
            self.body_start = Some(fill_start + offset);
        }
        found
    }

    /// Absolute offset (over all fed bytes) where the body begins
    pub fn body_start(&self) -> Option<usize> {
        self.body_start
    }

    pub fn is_found(&self) -> bool {
        self.body_start.is_some()
    }

    /// Total bytes fed so far
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Check for a boundary straddling the previous fill and this one.
    fn scan_seam(&self, chunk: &[u8]) -> Option<usize> {
        if self.carry_len == 0 {
            return None;
        }

        let head = &chunk[..chunk.len().min(CARRY_LEN)];
        let mut seam = [0u8; CARRY_LEN * 2];
        seam[..self.carry_len].copy_from_slice(&self.carry[..self.carry_len]);
        seam[self.carry_len..self.carry_len + head.len()].copy_from_slice(head);
        let seam_len = self.carry_len + head.len();

        // Only boundaries that start inside the carried bytes belong to the
        // seam; the rest are found by the regular scan of `chunk`.
        (0..self.carry_len)
            .find(|&start| seam[start..seam_len].starts_with(b"\r\n\r\n"))
            .map(|start| start + 4 - self.carry_len)
    }

    fn update_carry(&mut self, chunk: &[u8]) {
        if chunk.len() >= CARRY_LEN {
            self.carry.copy_from_slice(&chunk[chunk.len() - CARRY_LEN..]);
            self.carry_len = CARRY_LEN;
            return;
        }

        let keep = (CARRY_LEN - chunk.len()).min(self.carry_len);
        let mut next = [0u8; CARRY_LEN];
        next[..keep].copy_from_slice(&self.carry[self.carry_len - keep..self.carry_len]);
        next[keep..keep + chunk.len()].copy_from_slice(chunk);
        self.carry = next;
        self.carry_len = keep + chunk.len();
    }
}
