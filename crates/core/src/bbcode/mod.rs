//! BBCode to chat HTML
//!
//! Converts task and comment markup into the small HTML subset the bot API accepts:
//! `<b> <i> <u> <s> <a> <code> <blockquote>` and text. The conversion is a fixed
//! sequence of passes over the whole string:
//!
//! 1. protect bracket tags behind placeholder tokens (mentions excepted)
//! 2. resolve `[DISK FILE ID=..]` attachments
//! 3. resolve `[USER=..]..[/USER]` mentions
//! 4. escape `&`, `<`, `>` in the remaining text, then bring back resolved fragments
//! 5. bring back the protected tags, escaping any values they carry
//! 6. lists and paragraphs
//! 7. inline formatting, links, code and quotes
//! 8. drop tags with no HTML counterpart, keeping their content
//! 9. normalise newlines and trim
//!
//! Later passes rely on earlier ones: inline rendering only ever sees escaped text, and
//! nothing a lookup returned is escaped a second time.

pub mod markup;
pub mod placeholder;
pub mod references;

pub use references::{extract_references, ReferenceKind, ResourceReference};

use crate::diagnostics::DiagnosticSink;
use crate::escape::escape_text;
use crate::lookup::ResourceLookup;
use placeholder::{protect_tags, strip_token_delimiters, PlaceholderMap};

const TAG_NAMESPACE: char = 'T';
const RESOLVED_NAMESPACE: char = 'R';

/// Transpiles BBCode against a lookup and reports warnings to a sink
pub struct Transpiler<'a, L, S: ?Sized> {
    lookup: &'a L,
    sink: &'a S,
}

impl<'a, L, S> Transpiler<'a, L, S>
where
    L: ResourceLookup,
    S: DiagnosticSink + ?Sized,
{
    pub fn new(lookup: &'a L, sink: &'a S) -> Self {
        Self { lookup, sink }
    }

    /// Convert `bbcode` to HTML. `None` and empty input give an empty string.
    ///
    /// Never fails: lookup failures end up as bracketed text in the output and as
    /// diagnostics in the sink.
    pub async fn transpile(&self, bbcode: Option<&str>) -> String {
        let Some(bbcode) = bbcode.filter(|bbcode| !bbcode.is_empty()) else {
            return String::new();
        };

        let input = strip_token_delimiters(bbcode);
        let (text, tags) = protect_tags(&input, TAG_NAMESPACE);

        let mut resolved = PlaceholderMap::new(RESOLVED_NAMESPACE);
        let text = references::resolve_files(&text, self.lookup, self.sink, &mut resolved).await;
        let text = references::resolve_users(&text, self.lookup, self.sink, &mut resolved).await;

        let text = resolved.restore(&escape_text(&text));
        let text = tags.restore_escaped(&text);

        let text = markup::render_blocks(&text);
        let text = markup::render_inline(&text);
        let text = markup::strip_unsupported(&text);
        markup::normalize_whitespace(&text)
    }
}

/// Shorthand for `Transpiler::new(lookup, sink).transpile(bbcode)`
pub async fn transpile<L, S>(bbcode: Option<&str>, lookup: &L, sink: &S) -> String
where
    L: ResourceLookup,
    S: DiagnosticSink + ?Sized,
{
    Transpiler::new(lookup, sink).transpile(bbcode).await
}
