//! Secret masking for captured bodies
//!
//! Captured JSON bodies are walked and the values of keys that look like
//! secrets (`password`, `apiKey`, `x-amz-security-token`, ...) are replaced
//! with a fixed mask before they leave the filter. Bodies that are not JSON
//! pass through untouched. JSON that cannot be parsed (cut off by the size
//! limit or by first-chunk reassembly) cannot be checked, so it is masked
//! whole.

use crate::matcher::PatternMatcher;
use serde_json::Value;
use std::borrow::Cow;

/// Replacement for masked values
pub const SCRUBBED_VALUE: &str = "****";

pub struct SecretScrubber {
    keys: PatternMatcher,
    mask_all: bool,
}

impl SecretScrubber {
    /// `key_patterns` are case-insensitive substrings of secret key names.
    /// With `mask_all`, every body is replaced by the mask.
    pub fn new(key_patterns: &[String], mask_all: bool) -> Self {
        Self {
            keys: PatternMatcher::new(key_patterns),
            mask_all,
        }
    }

    /// Mask `body`. A `truncated` body is masked whole.
    pub fn scrub<'a>(&self, body: &'a str, truncated: bool) -> Cow<'a, str> {
        if self.mask_all {
            return Cow::Borrowed(SCRUBBED_VALUE);
        }
        if self.keys.pattern_count() == 0 {
            return Cow::Borrowed(body);
        }
        if truncated {
            return Cow::Borrowed(SCRUBBED_VALUE);
        }

        let mut value: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(_) if looks_like_json(body) => return Cow::Borrowed(SCRUBBED_VALUE),
            Err(_) => return Cow::Borrowed(body),
        };

        if self.mask(&mut value) {
            match serde_json::to_string(&value) {
                Ok(masked) => Cow::Owned(masked),
                // Never leak the unmasked body
                Err(_) => Cow::Borrowed(SCRUBBED_VALUE),
            }
        } else {
            Cow::Borrowed(body)
        }
    }

    /// Mask secret values in place; returns whether anything changed.
    fn mask(&self, value: &mut Value) -> bool {
        match value {
            Value::Object(map) => {
                let mut changed = false;
                for (key, entry) in map.iter_mut() {
                    if self.keys.is_match(key) {
                        *entry = Value::String(SCRUBBED_VALUE.to_string());
                        changed = true;
                    } else {
                        changed |= self.mask(entry);
                    }
                }
                changed
            }
            Value::Array(items) => items
                .iter_mut()
                .fold(false, |changed, item| self.mask(item) || changed),
            _ => false,
        }
    }
}

fn looks_like_json(body: &str) -> bool {
    matches!(body.trim_start().as_bytes().first(), Some(b'{' | b'['))
}
