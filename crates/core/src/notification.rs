//! Bot messages for task events
//!
//! Three events reach the bot: a task was created, a task changed, a comment was
//! posted. Each becomes one HTML message headed by a link to the task. User labels are
//! resolved through the same [`ResourceLookup`] the transpiler uses, and bodies are
//! transpiled then truncated to the message budget.

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use futures::future::{join, join3, join_all};
use serde::{Deserialize, Serialize};

use crate::bbcode::Transpiler;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::escape::{escape_attribute, escape_text};
use crate::lookup::{ResourceLookup, UserLookupResult};
use crate::truncate::truncate;

pub const NOT_ASSIGNED: &str = "Not assigned";
pub const NO_DEADLINE: &str = "No deadline";
pub const UNRECOGNIZED_DEADLINE: &str = "Unrecognized date";

const SYSTEM_AUTHOR: &str = "System";
const NOTHING: &str = "—";
const ZERO_WIDTH_SPACE: &str = "\u{200B}";

/// Deadline layouts without an offset; read as UTC
const NAIVE_DEADLINE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%d.%m.%Y %H:%M:%S"];

/// Task events the bot announces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewComment,
    NewTask,
    UpdatedTask,
}

impl NotificationKind {
    pub fn heading(self) -> &'static str {
        match self {
            NotificationKind::NewComment => "Task comment",
            NotificationKind::NewTask => "New task",
            NotificationKind::UpdatedTask => "Task updated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: u64,
    pub title: String,
    pub url: String,
}

/// Task fields whose changes are announced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub responsible_ids: Vec<u64>,
}

/// A task as the message composer needs it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDetails {
    pub summary: TaskSummary,
    pub created_by: Option<u64>,
    pub snapshot: TaskSnapshot,
}

/// One changed field between two snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum TaskChange {
    Title {
        previous: String,
        current: String,
    },
    Description {
        previous: String,
        current: String,
    },
    Deadline {
        previous: Option<String>,
        current: Option<String>,
    },
    ResponsibleIds {
        previous: Vec<u64>,
        current: Vec<u64>,
    },
}

fn parse_deadline(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw).ok().or_else(|| {
        NAIVE_DEADLINE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| naive.and_utc().fixed_offset())
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Human-readable deadline, kept in the offset the portal reported it in
pub fn format_deadline(raw: Option<&str>) -> String {
    let Some(raw) = non_blank(raw) else {
        return NO_DEADLINE.to_string();
    };
    match parse_deadline(raw) {
        Some(date) => date.format("%-d %B %Y at %H:%M").to_string(),
        None => UNRECOGNIZED_DEADLINE.to_string(),
    }
}

/// Comparable form of a deadline: the UTC instant, or the raw text when unparseable
fn deadline_key(raw: Option<&str>) -> Option<String> {
    let raw = non_blank(raw)?;
    Some(match parse_deadline(raw) {
        Some(date) => date.with_timezone(&Utc).to_rfc3339(),
        None => raw.to_string(),
    })
}

fn sorted(ids: &[u64]) -> Vec<u64> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids
}

/// Changed fields, in message order. Titles compare trimmed, descriptions ignore
/// `\r\n` versus `\n`, deadlines compare as instants and responsible ids as sorted
/// lists.
pub fn diff_tasks(previous: &TaskSnapshot, current: &TaskSnapshot) -> Vec<TaskChange> {
    let mut changes = Vec::new();

    if previous.title.trim() != current.title.trim() {
        changes.push(TaskChange::Title {
            previous: previous.title.trim().to_string(),
            current: current.title.trim().to_string(),
        });
    }

    if previous.description.replace("\r\n", "\n") != current.description.replace("\r\n", "\n") {
        changes.push(TaskChange::Description {
            previous: previous.description.clone(),
            current: current.description.clone(),
        });
    }

    if deadline_key(previous.deadline.as_deref()) != deadline_key(current.deadline.as_deref()) {
        changes.push(TaskChange::Deadline {
            previous: previous.deadline.clone(),
            current: current.deadline.clone(),
        });
    }

    if sorted(&previous.responsible_ids) != sorted(&current.responsible_ids) {
        changes.push(TaskChange::ResponsibleIds {
            previous: previous.responsible_ids.clone(),
            current: current.responsible_ids.clone(),
        });
    }

    changes
}

/// Ids in first-seen order, duplicates dropped
pub fn unique_ids(ids: &[u64]) -> Vec<u64> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Bold link to the task; a blank title shows as `#id`
pub fn title_link(task: &TaskSummary) -> String {
    let title = match task.title.trim() {
        "" => format!("#{}", task.id),
        title => title.to_string(),
    };
    format!(
        "<b><a href=\"{}\">{}</a></b>",
        escape_attribute(&task.url),
        escape_text(&title)
    )
}

/// Comment body lines: the first gets an arrow, blank ones a zero-width space so chat
/// clients keep them.
pub fn format_comment(html: &str) -> String {
    html.split('\n')
        .enumerate()
        .map(|(index, line)| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                ZERO_WIDTH_SPACE.to_string()
            } else if index == 0 && !trimmed.starts_with('→') {
                format!("→ {line}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn or_dash(text: &str) -> &str {
    if text.trim().is_empty() {
        NOTHING
    } else {
        text
    }
}

fn heading(kind: NotificationKind) -> String {
    format!("<b>{}</b>", kind.heading())
}

/// Composes messages against a lookup and reports warnings to a sink
pub struct Notifier<'a, L, S: ?Sized> {
    lookup: &'a L,
    sink: &'a S,
    max_length: usize,
}

impl<'a, L, S> Notifier<'a, L, S>
where
    L: ResourceLookup,
    S: DiagnosticSink + ?Sized,
{
    pub fn new(lookup: &'a L, sink: &'a S, max_length: usize) -> Self {
        Self {
            lookup,
            sink,
            max_length,
        }
    }

    /// Profile link, else `fallback` escaped, else the bare id
    async fn user_label(&self, id: u64, fallback: Option<&str>) -> String {
        match self.lookup.lookup_user_link(id).await {
            UserLookupResult::Link(link) => return link,
            UserLookupResult::Unknown => self.sink.emit(Diagnostic::UnknownUser { id }),
            UserLookupResult::Failed(error) => {
                self.sink.emit(Diagnostic::UserLookupFailed { id, error })
            }
        }
        match non_blank(fallback) {
            Some(name) => escape_text(name).into_owned(),
            None => id.to_string(),
        }
    }

    async fn executors(&self, ids: &[u64]) -> String {
        let ids = unique_ids(ids);
        if ids.is_empty() {
            return NOT_ASSIGNED.to_string();
        }
        join_all(ids.iter().map(|id| self.user_label(*id, None)))
            .await
            .join(", ")
    }

    fn deadline(&self, raw: Option<&str>) -> String {
        if let Some(raw) = non_blank(raw).filter(|raw| parse_deadline(raw).is_none()) {
            self.sink.emit(Diagnostic::UnrecognizedDeadline {
                raw: raw.to_string(),
            });
        }
        format_deadline(raw)
    }

    async fn body(&self, bbcode: &str) -> String {
        let html = Transpiler::new(self.lookup, self.sink)
            .transpile(Some(bbcode))
            .await;
        truncate(&html, self.max_length)
    }

    /// Creator, responsible users, deadline and the description
    pub async fn new_task(&self, task: &TaskDetails) -> String {
        let snapshot = &task.snapshot;
        if snapshot.responsible_ids.is_empty() {
            self.sink.emit(Diagnostic::NoResponsible {
                task: task.summary.id,
            });
        }

        let creator = async {
            match task.created_by {
                Some(id) => self.user_label(id, None).await,
                None => NOTHING.to_string(),
            }
        };
        let (creator, executors, description) = join3(
            creator,
            self.executors(&snapshot.responsible_ids),
            self.body(&snapshot.description),
        )
        .await;

        [
            heading(NotificationKind::NewTask),
            format!("→ {}", title_link(&task.summary)),
            String::new(),
            format!("<b>Creator:</b> {creator}"),
            format!("<b>Responsible:</b> {executors}"),
            String::new(),
            format!("<b>Deadline:</b> {}", self.deadline(snapshot.deadline.as_deref())),
            String::new(),
            "<b>Description:</b>".to_string(),
            or_dash(&description).to_string(),
        ]
        .join("\n")
    }

    /// One `previous → current` line per changed field, the description last.
    /// `None` when nothing changed.
    pub async fn task_updated(&self, task: &TaskSummary, changes: &[TaskChange]) -> Option<String> {
        if changes.is_empty() {
            return None;
        }

        let mut lines = vec![
            heading(NotificationKind::UpdatedTask),
            format!("→ {}", title_link(task)),
            String::new(),
            "<b>Changed:</b>".to_string(),
        ];
        let mut description = None;
        for change in changes {
            match change {
                TaskChange::Title { previous, current } => lines.push(format!(
                    "<b>Title:</b> {} → {}",
                    escape_text(or_dash(previous)),
                    escape_text(or_dash(current))
                )),
                TaskChange::Deadline { previous, current } => lines.push(format!(
                    "<b>Deadline:</b> {} → {}",
                    self.deadline(previous.as_deref()),
                    self.deadline(current.as_deref())
                )),
                TaskChange::ResponsibleIds { previous, current } => {
                    let (previous, current) =
                        join(self.executors(previous), self.executors(current)).await;
                    lines.push(format!("<b>Responsible:</b> {previous} → {current}"));
                }
                TaskChange::Description { previous, current } => {
                    let (previous, current) = join(self.body(previous), self.body(current)).await;
                    description = Some(format!(
                        "<b>Description:</b> {} → {}",
                        or_dash(&previous),
                        or_dash(&current)
                    ));
                }
            }
        }

        if let Some(description) = description {
            lines.push(String::new());
            lines.push(description);
        }
        Some(lines.join("\n"))
    }

    /// The comment under its author. Without an author id the comment is attributed to
    /// `author_name`, or to the system.
    pub async fn comment(
        &self,
        task: &TaskSummary,
        author_id: Option<u64>,
        author_name: Option<&str>,
        bbcode: &str,
    ) -> String {
        let author = async {
            match (author_id, non_blank(author_name)) {
                (Some(id), name) => self.user_label(id, name).await,
                (None, Some(name)) => escape_text(name).into_owned(),
                (None, None) => SYSTEM_AUTHOR.to_string(),
            }
        };
        let (author, body) = join(author, self.body(bbcode)).await;

        [
            heading(NotificationKind::NewComment),
            format!("→ {}", title_link(task)),
            String::new(),
            format!("From {author}:"),
            format_comment(&body),
        ]
        .join("\n")
    }
}
