//! Tag-safe truncation of chat HTML
//!
//! Length is counted in visible tokens: one character, or one entity reference such as
//! `&amp;` or `&#8230;`. Tags cost nothing. A cut never lands inside a tag or an entity,
//! and every element still open at the cut is closed after the ellipsis.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Appended where text was cut
pub const ELLIPSIS: char = '…';

/// Budget used for message bodies
pub const DEFAULT_MAX_LENGTH: usize = 300;

/// Elements that never get a closing tag
const VOID_ELEMENTS: [&str; 7] = ["br", "hr", "img", "input", "meta", "link", "source"];

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^<>]*>").unwrap());

static ENTITY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^&[A-Za-z0-9#]+;").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Truncation {
    pub text: String,
    pub truncated: bool,
}

/// Split a text run into visible tokens
fn tokens(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let len = match first {
            '&' => ENTITY.find(rest).map_or(1, |entity| entity.end()),
            _ => first.len_utf8(),
        };
        let (token, tail) = rest.split_at(len);
        rest = tail;
        Some(token)
    })
}

fn is_entity(token: &str) -> bool {
    token.len() > 1 && token.starts_with('&')
}

/// Number of visible tokens in `html`
pub fn visible_length(html: &str) -> usize {
    let mut cursor = 0;
    let mut length = 0;
    for tag in TAG.find_iter(html) {
        length += tokens(&html[cursor..tag.start()]).count();
        cursor = tag.end();
    }
    length + tokens(&html[cursor..]).count()
}

/// Leading name characters of a tag body (`a href=".."` -> `a`)
fn tag_name(body: &str) -> &str {
    let end = body
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(body.len());
    &body[..end]
}

struct Scanner {
    out: String,
    length: usize,
    max_length: usize,
    open: Vec<String>,
}

impl Scanner {
    /// Consume a text run; `false` once the budget is spent
    fn push_text(&mut self, text: &str) -> bool {
        for token in tokens(text) {
            if self.length < self.max_length {
                self.out.push_str(token);
                self.length += 1;
                continue;
            }
            // an entity glued to the last kept token stays with it
            if is_entity(token) {
                self.out.push_str(token);
            }
            return false;
        }
        true
    }

    fn push_tag(&mut self, tag: &str) {
        self.out.push_str(tag);

        let body = &tag[1..tag.len() - 1];
        if let Some(closing) = body.strip_prefix('/') {
            let name = tag_name(closing.trim_start());
            if self
                .open
                .last()
                .is_some_and(|top| top.eq_ignore_ascii_case(name))
            {
                self.open.pop();
            }
            return;
        }

        let name = tag_name(body);
        let void = VOID_ELEMENTS
            .iter()
            .any(|element| element.eq_ignore_ascii_case(name));
        if !name.is_empty() && !void && !body.ends_with('/') {
            self.open.push(name.to_string());
        }
    }

    fn finish(mut self) -> String {
        let mut text = self.out.trim_end().to_string();
        text.push(ELLIPSIS);
        while let Some(name) = self.open.pop() {
            text.push_str("</");
            text.push_str(&name);
            text.push('>');
        }
        text
    }
}

/// Truncate `html` to `max_length` visible tokens, reporting whether anything was cut
pub fn truncate_with_status(html: &str, max_length: usize) -> Truncation {
    if html.is_empty() || max_length == 0 {
        return Truncation {
            text: String::new(),
            truncated: !html.is_empty(),
        };
    }
    if visible_length(html) <= max_length {
        return Truncation {
            text: html.to_string(),
            truncated: false,
        };
    }

    let mut scanner = Scanner {
        out: String::with_capacity(html.len()),
        length: 0,
        max_length,
        open: Vec::new(),
    };
    let mut cursor = 0;
    for tag in TAG.find_iter(html) {
        if !scanner.push_text(&html[cursor..tag.start()]) {
            return Truncation {
                text: scanner.finish(),
                truncated: true,
            };
        }
        scanner.push_tag(tag.as_str());
        cursor = tag.end();
    }

    if scanner.push_text(&html[cursor..]) {
        Truncation {
            text: scanner.out,
            truncated: false,
        }
    } else {
        Truncation {
            text: scanner.finish(),
            truncated: true,
        }
    }
}

/// Truncate `html` to `max_length` visible tokens.
///
/// Input already within budget is returned unchanged. Otherwise the result ends with
/// [`ELLIPSIS`] followed by closing tags for every element left open at the cut.
pub fn truncate(html: &str, max_length: usize) -> String {
    truncate_with_status(html, max_length).text
}
