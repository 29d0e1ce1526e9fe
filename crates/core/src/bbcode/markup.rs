//! Bracket markup to HTML, once references are resolved and plain text is escaped
//!
//! Every tag is handled by one scan over its opening and closing tokens. Tokens are
//! paired with a stack, innermost first, so nesting depth never adds passes. Tokens
//! left without a partner stay in the text as written.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

static LIST: LazyLock<Regex> = LazyLock::new(|| tag_tokens("LIST", r"(?:=(?P<value>1))?"));
static PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| tag_tokens("P", ""));
static URL: LazyLock<Regex> =
    LazyLock::new(|| tag_tokens("URL", r"(?:=(?P<value>[^\]]*))?"));

static NEWLINE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^<>]*>").unwrap());
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<a\s").unwrap());

/// Paired tags rendered as a same-named element, in application order
static INLINE_ELEMENTS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        ("B", "b"),
        ("I", "i"),
        ("U", "u"),
        ("S", "s"),
        ("CODE", "code"),
        ("QUOTE", "blockquote"),
    ]
    .into_iter()
    .map(|(tag, element)| (tag_tokens(tag, ""), element))
    .collect()
});

/// Tags the target format has no element for; only their content survives
static UNSUPPORTED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        tag_tokens("IMG", ""),
        tag_tokens("COLOR", r"=[^\]]*"),
        tag_tokens("SIZE", r"=[^\]]*"),
    ]
});

/// Matches `[TAG{value}]` and `[/TAG]`. A `value` group, when the tag has one, is
/// handed to the renderer.
fn tag_tokens(tag: &str, value: &str) -> Regex {
    Regex::new(&format!(r"(?i)\[(?:(?P<close>/){tag}|{tag}{value})\]")).unwrap()
}

struct Token<'t> {
    span: Range<usize>,
    value: Option<&'t str>,
    closing: bool,
}

fn scan<'t>(text: &'t str, re: &Regex) -> Vec<Token<'t>> {
    re.captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(Token {
                span: whole.range(),
                value: caps.name("value").map(|value| value.as_str()),
                closing: caps.name("close").is_some(),
            })
        })
        .collect()
}

/// Whether each token found a partner. A closing token takes the nearest unclaimed
/// opening token before it.
fn paired(tokens: &[Token]) -> Vec<bool> {
    let mut paired = vec![false; tokens.len()];
    let mut open = Vec::new();
    for (index, token) in tokens.iter().enumerate() {
        if !token.closing {
            open.push(index);
        } else if let Some(opener) = open.pop() {
            paired[opener] = true;
            paired[index] = true;
        }
    }
    paired
}

/// Replace every paired token in place: openers with `open(value)`, closers with
/// `close`. Linear in the length of `text`.
fn replace_pairs<F>(text: &str, re: &Regex, open: F, close: &str) -> String
where
    F: Fn(Option<&str>) -> String,
{
    let tokens = scan(text, re);
    let paired = paired(&tokens);

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (token, paired) in tokens.iter().zip(paired) {
        out.push_str(&text[last..token.span.start]);
        match (paired, token.closing) {
            (false, _) => out.push_str(&text[token.span.clone()]),
            (true, false) => out.push_str(&open(token.value)),
            (true, true) => out.push_str(close),
        }
        last = token.span.end;
    }
    out.push_str(&text[last..]);
    out
}

fn innermost<'b>(
    stack: &'b mut [(Option<&str>, String)],
    out: &'b mut String,
) -> &'b mut String {
    match stack.last_mut() {
        Some((_, content)) => content,
        None => out,
    }
}

/// Replace every pair with `render(value, content)`, where `content` already has its
/// inner pairs rendered.
fn render_pairs<F>(text: &str, re: &Regex, render: F) -> String
where
    F: Fn(Option<&str>, &str) -> String,
{
    let tokens = scan(text, re);
    let paired = paired(&tokens);

    let mut stack: Vec<(Option<&str>, String)> = Vec::new();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (token, paired) in tokens.iter().zip(paired) {
        innermost(&mut stack, &mut out).push_str(&text[last..token.span.start]);
        last = token.span.end;
        match (paired, token.closing) {
            (false, _) => innermost(&mut stack, &mut out).push_str(&text[token.span.clone()]),
            (true, false) => stack.push((token.value, String::new())),
            (true, true) => {
                if let Some((value, content)) = stack.pop() {
                    let rendered = render(value, &content);
                    innermost(&mut stack, &mut out).push_str(&rendered);
                }
            }
        }
    }
    out.push_str(&text[last..]);
    out
}

fn list_items(body: &str) -> Vec<String> {
    body.split("[*]")
        .map(|item| {
            replace_pairs(item, &PARAGRAPH, |_| String::new(), "")
                .trim()
                .to_string()
        })
        .filter(|item| !item.is_empty())
        .collect()
}

fn list(value: Option<&str>, body: &str) -> String {
    let items = list_items(body);
    let lines: Vec<String> = match value {
        Some(_) => items
            .iter()
            .enumerate()
            .map(|(index, item)| format!("{}. {item}", index + 1))
            .collect(),
        None => items.iter().map(|item| format!("• {item}")).collect(),
    };
    lines.join("\n")
}

/// Lists and paragraphs. Runs before [`render_inline`] so inline tags inside list items
/// are still rendered afterwards.
pub fn render_blocks(text: &str) -> String {
    let text = render_pairs(text, &LIST, list);
    replace_pairs(&text, &PARAGRAPH, |_| String::new(), "\n")
}

fn element_pairs(text: &str, re: &Regex, element: &str) -> String {
    replace_pairs(text, re, |_| format!("<{element}>"), &format!("</{element}>"))
}

/// Bold, italic, underline, strike, links, code and quotes.
///
/// Link targets reach this pass with `&`, `<` and `>` already escaped.
pub fn render_inline(text: &str) -> String {
    let mut text = text.to_string();
    for (re, element) in INLINE_ELEMENTS.iter().take(4) {
        text = element_pairs(&text, re, element);
    }

    text = render_pairs(&text, &URL, link);

    for (re, element) in INLINE_ELEMENTS.iter().skip(4) {
        text = element_pairs(&text, re, element);
    }
    text
}

/// `[URL=href]text[/URL]` or `[URL]href[/URL]`. Content that already holds a link
/// (a resolved file or mention) is kept as it is, since links do not nest.
fn link(href: Option<&str>, content: &str) -> String {
    if LINK.is_match(content) {
        return content.to_string();
    }
    format!(
        "<a href=\"{}\">{content}</a>",
        href_attribute(href.unwrap_or(content))
    )
}

/// Markup rendered inside a link target is dropped, leaving its text
fn href_attribute(value: &str) -> String {
    MARKUP
        .replace_all(value, "")
        .trim()
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Drop `[IMG]`, `[COLOR=..]` and `[SIZE=..]`, keeping what they wrap
pub fn strip_unsupported(text: &str) -> String {
    UNSUPPORTED.iter().fold(text.to_string(), |text, re| {
        replace_pairs(&text, re, |_| String::new(), "")
    })
}


/// Unix newlines, at most one blank line in a row, no surrounding whitespace
pub fn normalize_whitespace(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    NEWLINE_RUN.replace_all(&text, "\n\n").trim().to_string()
}
