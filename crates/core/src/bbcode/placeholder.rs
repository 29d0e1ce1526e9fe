//! Placeholder maps that shield fragments of the working string from later passes
//!
//! A token looks like `\u{E000}T12\u{E001}`: two private-use delimiters around a
//! namespace letter and an index. Input is stripped of the delimiters before any pass
//! runs, so a token in the working string always refers to an entry of a map.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::escape::escape_text;

pub const TOKEN_OPEN: char = '\u{E000}';
pub const TOKEN_CLOSE: char = '\u{E001}';

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\u{E000}([A-Z])([0-9]+)\u{E001}").unwrap());

/// Any `[TAG]`, `[/TAG]` or `[TAG=value]`. `[DISK FILE ID=..]` never matches because
/// of the spaces in its name.
static BRACKET_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[/?([A-Za-z]+)(?:=[^\]\r\n]*)?\]").unwrap());

/// Ordered mapping from synthetic token to the fragment it replaced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderMap {
    namespace: char,
    entries: Vec<String>,
}

impl PlaceholderMap {
    pub fn new(namespace: char) -> Self {
        debug_assert!(namespace.is_ascii_uppercase());
        Self {
            namespace,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record `fragment` and return the token that stands in for it
    pub fn insert(&mut self, fragment: impl Into<String>) -> String {
        let token = format!(
            "{TOKEN_OPEN}{}{}{TOKEN_CLOSE}",
            self.namespace,
            self.entries.len()
        );
        self.entries.push(fragment.into());
        token
    }

    /// Substitute every token of this map with its fragment, verbatim.
    ///
    /// A fragment may itself carry tokens of this map inserted before it; those are
    /// expanded too.
    pub fn restore(&self, text: &str) -> String {
        self.substitute(text, &|fragment| self.restore(fragment))
    }

    /// Like [`restore`](Self::restore) but with `&`, `<` and `>` in every fragment
    /// escaped on the way back in.
    pub fn restore_escaped(&self, text: &str) -> String {
        self.substitute(text, &|fragment| {
            self.restore_escaped(&escape_text(fragment))
        })
    }

    fn substitute(&self, text: &str, expand: &dyn Fn(&str) -> String) -> String {
        TOKEN
            .replace_all(text, |caps: &Captures| {
                let entry = caps[1]
                    .chars()
                    .next()
                    .filter(|namespace| *namespace == self.namespace)
                    .and_then(|_| caps[2].parse::<usize>().ok())
                    .and_then(|index| self.entries.get(index));
                match entry {
                    Some(fragment) => expand(fragment.as_str()),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// Remove the token delimiters from untrusted input
pub fn strip_token_delimiters(input: &str) -> String {
    input.replace([TOKEN_OPEN, TOKEN_CLOSE], "")
}

/// Replace every bracket tag with a token, except `[USER=..]` and `[/USER]` which the
/// mention pass still has to see.
pub fn protect_tags(input: &str, namespace: char) -> (String, PlaceholderMap) {
    let mut map = PlaceholderMap::new(namespace);
    let text = BRACKET_TAG
        .replace_all(input, |caps: &Captures| {
            if caps[1].eq_ignore_ascii_case("USER") {
                caps[0].to_string()
            } else {
                map.insert(&caps[0])
            }
        })
        .into_owned();
    (text, map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protect_and_restore() {
        let (text, map) = protect_tags("[B]bold[/B] and [COLOR=red]x[/COLOR]", 'T');

        assert_eq!(map.len(), 4);
        assert!(!text.contains('['));
        assert!(text.contains("bold"));
        assert_eq!(map.restore(&text), "[B]bold[/B] and [COLOR=red]x[/COLOR]");
    }

    #[test]
    fn test_protect_skips_user_mentions_and_file_tags() {
        let input = "[USER=5]Ann[/USER] [DISK FILE ID=42] [I]x[/I]";
        let (text, map) = protect_tags(input, 'T');

        assert!(text.starts_with("[USER=5]Ann[/USER] [DISK FILE ID=42] "));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_list_markers_are_not_tags() {
        let (text, map) = protect_tags("[*]a[*]b", 'T');
        assert_eq!(text, "[*]a[*]b");
        assert!(map.is_empty());
    }

    #[test]
    fn test_restore_escaped_escapes_fragments_only() {
        let (text, map) = protect_tags("a&b [URL=http://x/?a=1&b=2]", 'T');
        assert_eq!(
            map.restore_escaped(&text),
            "a&b [URL=http://x/?a=1&amp;b=2]"
        );
    }

    #[test]
    fn test_restore_ignores_other_namespaces() {
        let mut tags = PlaceholderMap::new('T');
        let mut anchors = PlaceholderMap::new('R');
        let text = format!("{} {}", tags.insert("[B]"), anchors.insert("<a>"));

        let restored = anchors.restore(&text);
        assert!(restored.ends_with(" <a>"));
        assert_eq!(tags.restore(&restored), "[B] <a>");
    }

    #[test]
    fn test_restore_expands_nested_tokens() {
        let mut map = PlaceholderMap::new('R');
        let inner = map.insert("<a href=\"f\">f</a>");
        let outer = map.insert(format!("label {inner}"));

        assert_eq!(map.restore(&outer), "label <a href=\"f\">f</a>");
    }

    #[test]
    fn test_strip_token_delimiters() {
        let sneaky = format!("{TOKEN_OPEN}T0{TOKEN_CLOSE}");
        assert_eq!(strip_token_delimiters(&sneaky), "T0");
    }
}
