//! HTML escaping used by the transpiler and message composition

use std::borrow::Cow;

/// Escape `&`, `<` and `>` for use in element content
pub fn escape_text(text: &str) -> Cow<'_, str> {
    html_escape::encode_text(text)
}

/// Escape `&`, `<`, `>` and `"` for use inside a double-quoted attribute
pub fn escape_attribute(value: &str) -> Cow<'_, str> {
    html_escape::encode_double_quoted_attribute(value)
}
