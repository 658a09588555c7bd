//! Endpoint exclusion
//!
//! Health checks and management endpoints are polled constantly and their
//! payloads are noise. Paths containing any configured pattern are skipped.

use crate::matcher::PatternMatcher;

pub struct EndpointFilter {
    matcher: PatternMatcher,
}

impl EndpointFilter {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            matcher: PatternMatcher::new(patterns),
        }
    }

    /// Pattern that excludes `path`, if any
    pub fn excluded_by(&self, path: &str) -> Option<&str> {
        self.matcher.find(path).map(|p| p.name.as_str())
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_by(path).is_some()
    }
}
