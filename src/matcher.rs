//! Finite State Machine Substring Matching
//!
//! Do NOT use regex in Wasm - it's expensive and can OOM.
//! Endpoint exclusion and secret-key detection only need case-insensitive
//! "contains" checks, which this FSM does in O(1) per byte with constant
//! memory.

/// A case-insensitive substring to look for
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    /// Pattern as configured (for logging)
    pub name: String,
    /// Lowercased pattern bytes
    bytes: Vec<u8>,
}

impl Pattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            name: pattern.to_string(),
            bytes: pattern.to_ascii_lowercase().into_bytes(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Match progress of a single pattern
#[derive(Clone, Copy, Debug, Default)]
struct PatternState {
    /// Current position in pattern (0 = not matching)
    position: usize,
}

impl PatternState {
    /// Advance FSM by one byte - O(1) amortized
    fn advance(&mut self, byte: u8, pattern: &Pattern) {
        let byte = byte.to_ascii_lowercase();

        loop {
            if pattern.bytes.get(self.position) == Some(&byte) {
                self.position += 1;
                return;
            }
            if self.position == 0 {
                return;
            }
            // Fall back to the longest border of the matched prefix
            self.position = border(&pattern.bytes[..self.position]);
        }
    }

    fn is_match(&self, pattern: &Pattern) -> bool {
        self.position >= pattern.bytes.len()
    }
}

/// Length of the longest proper prefix of `prefix` that is also its suffix.
fn border(prefix: &[u8]) -> usize {
    (1..prefix.len())
        .rev()
        .find(|&len| prefix[..len] == prefix[prefix.len() - len..])
        .unwrap_or(0)
}

/// Multi-pattern matcher
#[derive(Clone, Debug, Default)]
pub struct PatternMatcher {
    patterns: Vec<Pattern>,
}

impl PatternMatcher {
    /// Build a matcher; empty patterns are dropped since they match everything.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| Pattern::new(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Find the first pattern contained in `text`.
    pub fn find(&self, text: &str) -> Option<&Pattern> {
        let mut states = vec![PatternState::default(); self.patterns.len()];

        for &byte in text.as_bytes() {
            for (state, pattern) in states.iter_mut().zip(&self.patterns) {
                state.advance(byte, pattern);
                if state.is_match(pattern) {
                    return Some(pattern);
                }
            }
        }

        None
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.find(text).is_some()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_match() {
        let matcher = PatternMatcher::new(["health"]);
        assert!(matcher.is_match("/api/health/live"));
        assert!(!matcher.is_match("/api/users"));
    }

    #[test]
    fn test_case_insensitive() {
        let matcher = PatternMatcher::new(["Token"]);
        assert!(matcher.is_match("x-amz-security-TOKEN"));
    }

    #[test]
    fn test_partial_match_restart() {
        let matcher = PatternMatcher::new(["test"]);
        assert!(matcher.is_match("tesxtest"));
        // Overlapping prefix needs the border fallback
        let matcher = PatternMatcher::new(["aab"]);
        assert!(matcher.is_match("aaab"));
    }

    #[test]
    fn test_first_pattern_reported() {
        let matcher = PatternMatcher::new(["/actuator", "/health"]);
        let found = matcher.find("/health").unwrap();
        assert_eq!(found.name, "/health");
    }

    #[test]
    fn test_empty_patterns_dropped() {
        let matcher = PatternMatcher::new(["", "pass"]);
        assert_eq!(matcher.pattern_count(), 1);
        assert!(!matcher.is_match("user"));
    }
}
