//! File attachments and user mentions embedded in BBCode
//!
//! Distinct references are resolved concurrently, then every occurrence is replaced by
//! a protected token keyed on the exact matched text. Resolved fragments go into the
//! caller's placeholder map so the escaping pass never touches them.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use futures::future::join_all;
use regex::{Captures, Regex};
use serde::Serialize;

use super::placeholder::PlaceholderMap;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::escape::{escape_attribute, escape_text};
use crate::lookup::{FileLookupResult, ResourceLookup, UserLookupResult};

static FILE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[DISK FILE ID=([^\]]*)\]").unwrap());

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());

static USER_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\[USER=([^\]]*)\](.*?)\[/USER\]").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    File,
    User,
}

/// A file or user reference as written in the markup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceReference {
    pub kind: ReferenceKind,
    pub id: u64,
    pub raw_match: String,
}

/// First digit run of a file tag value (`n123` -> 123)
fn file_id(value: &str) -> Option<u64> {
    DIGITS.find(value)?.as_str().parse().ok()
}

fn user_id(value: &str) -> Option<u64> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .map(|id| id as u64)
}

/// List the distinct, resolvable references of `bbcode` in order of first appearance.
///
/// Tags without a usable id are skipped.
pub fn extract_references(bbcode: &str) -> Vec<ResourceReference> {
    let mut seen = HashSet::new();
    let files = FILE_TAG.captures_iter(bbcode).filter_map(|caps| {
        Some(ResourceReference {
            kind: ReferenceKind::File,
            id: file_id(&caps[1])?,
            raw_match: caps[0].to_string(),
        })
    });
    let users = USER_MENTION.captures_iter(bbcode).filter_map(|caps| {
        Some(ResourceReference {
            kind: ReferenceKind::User,
            id: user_id(&caps[1])?,
            raw_match: caps[0].to_string(),
        })
    });

    let mut references: Vec<(usize, ResourceReference)> = Vec::new();
    for reference in files.chain(users) {
        if seen.insert(reference.raw_match.clone()) {
            let position = bbcode.find(&reference.raw_match).unwrap_or(usize::MAX);
            references.push((position, reference));
        }
    }
    references.sort_by_key(|(position, _)| *position);
    references.into_iter().map(|(_, reference)| reference).collect()
}

/// Render a file lookup outcome as HTML or bracketed error text
pub fn render_file(
    id: u64,
    result: FileLookupResult,
    sink: &(impl DiagnosticSink + ?Sized),
) -> String {
    match result {
        FileLookupResult::Found(file) => format!(
            "<a href=\"{}\">{}</a>",
            escape_attribute(&file.download_url),
            escape_text(&file.name)
        ),
        FileLookupResult::NotFound => {
            sink.emit(Diagnostic::FileNotFound { id });
            format!("[File {id} not found]")
        }
        FileLookupResult::Failed(error) => {
            sink.emit(Diagnostic::FileLookupFailed { id, error });
            format!("[Error loading file {id}]")
        }
    }
}

/// Render a user lookup outcome; an unknown user falls back to the mention label
pub fn render_user(
    id: u64,
    label: &str,
    result: UserLookupResult,
    sink: &(impl DiagnosticSink + ?Sized),
) -> String {
    match result {
        UserLookupResult::Link(link) => link,
        UserLookupResult::Unknown => {
            sink.emit(Diagnostic::UnknownUser { id });
            if label.trim().is_empty() {
                id.to_string()
            } else {
                escape_text(label).into_owned()
            }
        }
        UserLookupResult::Failed(error) => {
            sink.emit(Diagnostic::UserLookupFailed { id, error });
            format!("[Error loading user {id}]")
        }
    }
}

fn substitute(re: &Regex, text: &str, replacements: &HashMap<String, String>) -> String {
    if replacements.is_empty() {
        return text.to_string();
    }
    re.replace_all(text, |caps: &Captures| {
        replacements
            .get(&caps[0])
            .cloned()
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// Replace every `[DISK FILE ID=..]` tag with its resolved fragment.
///
/// Tags without digits stay untouched.
pub async fn resolve_files<L, S>(
    text: &str,
    lookup: &L,
    sink: &S,
    resolved: &mut PlaceholderMap,
) -> String
where
    L: ResourceLookup,
    S: DiagnosticSink + ?Sized,
{
    let mut seen = HashSet::new();
    let mut pending: Vec<(String, u64)> = Vec::new();
    for caps in FILE_TAG.captures_iter(text) {
        let raw = caps[0].to_string();
        if !seen.insert(raw.clone()) {
            continue;
        }
        match file_id(&caps[1]) {
            Some(id) => pending.push((raw, id)),
            None => sink.emit(Diagnostic::FileTagWithoutId { tag: raw }),
        }
    }

    let results = join_all(pending.iter().map(|(_, id)| lookup.lookup_file(*id))).await;

    let replacements: HashMap<String, String> = pending
        .into_iter()
        .zip(results)
        .map(|((raw, id), result)| {
            let token = resolved.insert(render_file(id, result, sink));
            (raw, token)
        })
        .collect();

    substitute(&FILE_TAG, text, &replacements)
}

/// Replace every `[USER=id]label[/USER]` span with its resolved fragment
pub async fn resolve_users<L, S>(
    text: &str,
    lookup: &L,
    sink: &S,
    resolved: &mut PlaceholderMap,
) -> String
where
    L: ResourceLookup,
    S: DiagnosticSink + ?Sized,
{
    let mut seen = HashSet::new();
    let mut replacements: HashMap<String, String> = HashMap::new();
    let mut pending: Vec<(String, u64, String)> = Vec::new();
    for caps in USER_MENTION.captures_iter(text) {
        let raw = caps[0].to_string();
        if !seen.insert(raw.clone()) {
            continue;
        }
        let label = caps[2].to_string();
        match user_id(&caps[1]) {
            Some(id) => pending.push((raw, id, label)),
            None => {
                sink.emit(Diagnostic::InvalidUserId {
                    raw: caps[1].to_string(),
                });
                let token = resolved.insert(escape_text(&label));
                replacements.insert(raw, token);
            }
        }
    }

    let results = join_all(pending.iter().map(|(_, id, _)| lookup.lookup_user_link(*id))).await;

    for ((raw, id, label), result) in pending.into_iter().zip(results) {
        let token = resolved.insert(render_user(id, &label, result, sink));
        replacements.insert(raw, token);
    }

    substitute(&USER_MENTION, text, &replacements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{Discard, Recorder};
    use crate::lookup::{FileRecord, LookupError};

    #[test]
    fn test_file_id_takes_first_digit_run() {
        assert_eq!(file_id("42"), Some(42));
        assert_eq!(file_id("n123"), Some(123));
        assert_eq!(file_id("n12x34"), Some(12));
        assert_eq!(file_id("abc"), None);
        assert_eq!(file_id(""), None);
    }

    #[test]
    fn test_user_id_must_be_positive() {
        assert_eq!(user_id(" 7 "), Some(7));
        assert_eq!(user_id("0"), None);
        assert_eq!(user_id("-3"), None);
        assert_eq!(user_id("seven"), None);
    }

    #[test]
    fn test_extract_references_dedupes_and_orders() {
        let bbcode = "[USER=3]Bob[/USER] sent [DISK FILE ID=n9] and [DISK FILE ID=n9], \
                      [USER=x]bad[/USER] [DISK FILE ID=none]";
        let references = extract_references(bbcode);

        assert_eq!(
            references,
            vec![
                ResourceReference {
                    kind: ReferenceKind::User,
                    id: 3,
                    raw_match: "[USER=3]Bob[/USER]".to_string(),
                },
                ResourceReference {
                    kind: ReferenceKind::File,
                    id: 9,
                    raw_match: "[DISK FILE ID=n9]".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_render_file_escapes_name_and_url() {
        let recorder = Recorder::new();
        let html = render_file(
            1,
            FileLookupResult::Found(FileRecord {
                name: "a<b>&c.txt".to_string(),
                download_url: "https://x/?id=1&t=\"q\"".to_string(),
            }),
            &recorder,
        );

        assert_eq!(
            html,
            "<a href=\"https://x/?id=1&amp;t=&quot;q&quot;\">a&lt;b&gt;&amp;c.txt</a>"
        );
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_render_file_failures() {
        let recorder = Recorder::new();
        assert_eq!(
            render_file(42, FileLookupResult::NotFound, &recorder),
            "[File 42 not found]"
        );
        assert_eq!(
            render_file(
                43,
                FileLookupResult::Failed(LookupError::Network("refused".to_string())),
                &recorder
            ),
            "[Error loading file 43]"
        );
        assert_eq!(recorder.take().len(), 2);
    }

    #[test]
    fn test_render_user_unknown_prefers_label() {
        let recorder = Recorder::new();
        assert_eq!(
            render_user(5, "Ann & Co", UserLookupResult::Unknown, &recorder),
            "Ann &amp; Co"
        );
        assert_eq!(render_user(5, "  ", UserLookupResult::Unknown, &recorder), "5");
        assert_eq!(
            recorder.take(),
            vec![
                Diagnostic::UnknownUser { id: 5 },
                Diagnostic::UnknownUser { id: 5 }
            ]
        );
    }

    #[test]
    fn test_render_user_link_is_used_verbatim() {
        let link = "<a href=\"https://portal/u/5/\">Ann</a>".to_string();
        assert_eq!(
            render_user(5, "x", UserLookupResult::Link(link.clone()), &Discard),
            link
        );
    }
}
