//! Header snapshots and the protocol flags derived from them

/// Ordered header list with case-insensitive, last-write-wins keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSnapshot {
    entries: Vec<(String, String)>,
}

impl HeaderSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from `(name, value)` pairs as delivered by the host.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut snapshot = Self::new();
        for (name, value) in pairs {
            snapshot.insert(name.as_ref(), value.as_ref());
        }
        snapshot
    }

    /// Insert a header, replacing any earlier value under the same name.
    pub fn insert(&mut self, name: &str, value: &str) {
        let value = value.trim().to_string();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.trim().to_string(), value)),
        }
    }

    /// Look up a header value (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Declared `Content-Length`, if present and numeric
    pub fn content_length(&self) -> Option<usize> {
        self.get("content-length")?.parse().ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Parse a raw HTTP/1.x header block (start line and header lines, with or
/// without the terminating blank line).
///
/// The start line is skipped. Lines without a colon and obsolete folded
/// continuation lines are ignored. Bytes are decoded as lossy UTF-8.
pub fn parse_header_block(block: &[u8]) -> HeaderSnapshot {
    let text = String::from_utf8_lossy(block);
    let mut snapshot = HeaderSnapshot::new();

    for line in text.split("\r\n").skip(1) {
        if line.is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if !name.is_empty() {
                snapshot.insert(name, value);
            }
        }
    }

    snapshot
}

/// Protocol flags that gate response post-processing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolFlags {
    /// `Transfer-Encoding: chunked`
    pub chunked: bool,
    /// `Content-Encoding: gzip`
    pub gzipped: bool,
}

impl ProtocolFlags {
    /// Derive flags from a header snapshot (case-insensitive exact match).
    pub fn from_headers(headers: &HeaderSnapshot) -> Self {
        let is = |name: &str, expected: &str| {
            headers
                .get(name)
                .map_or(false, |value| value.eq_ignore_ascii_case(expected))
        };

        Self {
            chunked: is("transfer-encoding", "chunked"),
            gzipped: is("content-encoding", "gzip"),
        }
    }
}
