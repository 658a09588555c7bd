//! Charset resolution from `Content-Type`

use encoding_rs::{Encoding, UTF_8};

/// Resolve the `charset` parameter of a `Content-Type` value.
///
/// `text/html; charset="ISO-8859-1"` resolves to windows-1252 (the WHATWG
/// mapping of that label). A missing, empty, or unknown charset resolves
/// to UTF-8, as do labels that map to the replacement encoding.
pub fn encoding_from_content_type(content_type: Option<&str>) -> &'static Encoding {
    content_type
        .and_then(charset_param)
        .and_then(|label| Encoding::for_label_no_replacement(label.as_bytes()))
        .unwrap_or(UTF_8)
}

fn charset_param(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .skip(1)
        .map(str::trim)
        .find_map(|param| {
            let (name, value) = param.split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("charset") {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some(value)
        })
}
