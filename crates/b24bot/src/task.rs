use std::path::{Path, PathBuf};

use b24bot_core::bitrix::{transform_task_details, BitrixComment};
use b24bot_core::diagnostics::{Diagnostic, Recorder};
use b24bot_core::lookup::{LookupError, ResourceLookup};
use b24bot_core::notification::{
    diff_tasks, NotificationKind, Notifier, TaskChange, TaskDetails, TaskSnapshot, TaskSummary,
};
use b24bot_core::truncate::DEFAULT_MAX_LENGTH;
use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::bitrix::{BitrixClient, BitrixConfig, ConnectionArgs};
use crate::prelude::{eprintln, println, *};

#[derive(Debug, clap::Args)]
pub struct TaskOptions {
    /// Task ID
    pub task_id: u64,

    /// Maximum number of visible characters in the message body
    #[arg(short = 'n', long, env = "B24BOT_MAX_LENGTH", default_value_t = DEFAULT_MAX_LENGTH)]
    pub max_length: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    #[clap(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Debug, clap::Args)]
pub struct UpdateOptions {
    /// Task ID
    pub task_id: u64,

    /// Earlier state of the task: the JSON printed by `task --json`, or just its
    /// `snapshot` object
    #[arg(short, long)]
    pub previous: PathBuf,

    /// Maximum number of visible characters in the message body
    #[arg(short = 'n', long, env = "B24BOT_MAX_LENGTH", default_value_t = DEFAULT_MAX_LENGTH)]
    pub max_length: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    #[clap(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Debug, clap::Args)]
pub struct CommentOptions {
    /// Task ID
    pub task_id: u64,

    /// Comment ID
    pub comment_id: u64,

    /// Maximum number of visible characters in the message body
    #[arg(short = 'n', long, env = "B24BOT_MAX_LENGTH", default_value_t = DEFAULT_MAX_LENGTH)]
    pub max_length: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    #[clap(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Debug, Serialize)]
pub struct MessageOutput {
    pub kind: NotificationKind,
    pub task: TaskSummary,
    /// `None` when an update changed nothing worth announcing
    pub message: Option<String>,
    pub changes: Vec<TaskChange>,
    pub snapshot: TaskSnapshot,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SavedSnapshot {
    Output { snapshot: TaskSnapshot },
    Bare(TaskSnapshot),
}

/// A lookup answer that must exist: failures become [`Error::Lookup`], absence
/// [`Error::NotFound`]
fn found<T>(
    result: std::result::Result<Option<T>, LookupError>,
    kind: &'static str,
    id: impl ToString,
) -> std::result::Result<T, Error> {
    result?.ok_or_else(|| Error::NotFound {
        kind,
        id: id.to_string(),
    })
}

fn parse_snapshot(json: &str) -> Result<TaskSnapshot> {
    let saved: SavedSnapshot =
        serde_json::from_str(json).context("Previous task state is not a task snapshot")?;
    Ok(match saved {
        SavedSnapshot::Output { snapshot } | SavedSnapshot::Bare(snapshot) => snapshot,
    })
}

fn read_snapshot(path: &Path) -> Result<TaskSnapshot> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_snapshot(&json)
}

fn output(
    kind: NotificationKind,
    details: TaskDetails,
    message: Option<String>,
    changes: Vec<TaskChange>,
    recorder: Recorder,
) -> MessageOutput {
    let diagnostics = recorder.take();
    for diagnostic in &diagnostics {
        log::warn!("task {}: {diagnostic}", details.summary.id);
    }

    MessageOutput {
        kind,
        task: details.summary,
        message,
        changes,
        snapshot: details.snapshot,
        diagnostics,
    }
}

/// Build the "new task" message for already fetched task details
pub async fn new_task_output<L: ResourceLookup>(
    lookup: &L,
    details: TaskDetails,
    max_length: usize,
) -> MessageOutput {
    let recorder = Recorder::new();
    let message = Notifier::new(lookup, &recorder, max_length)
        .new_task(&details)
        .await;
    output(
        NotificationKind::NewTask,
        details,
        Some(message),
        Vec::new(),
        recorder,
    )
}

/// Build the "task updated" message from the difference against `previous`
pub async fn update_output<L: ResourceLookup>(
    lookup: &L,
    details: TaskDetails,
    previous: &TaskSnapshot,
    max_length: usize,
) -> MessageOutput {
    let recorder = Recorder::new();
    let changes = diff_tasks(previous, &details.snapshot);
    let message = Notifier::new(lookup, &recorder, max_length)
        .task_updated(&details.summary, &changes)
        .await;
    if message.is_none() {
        log::info!("task {}: no changes to announce", details.summary.id);
    }
    output(
        NotificationKind::UpdatedTask,
        details,
        message,
        changes,
        recorder,
    )
}

/// Build the "new comment" message for an already fetched comment
pub async fn comment_output<L: ResourceLookup>(
    lookup: &L,
    details: TaskDetails,
    comment: &BitrixComment,
    max_length: usize,
) -> MessageOutput {
    let recorder = Recorder::new();
    let author_id = comment
        .author_id
        .as_deref()
        .and_then(|id| id.trim().parse().ok());
    let message = Notifier::new(lookup, &recorder, max_length)
        .comment(
            &details.summary,
            author_id,
            comment.author_name.as_deref(),
            comment.post_message.as_deref().unwrap_or_default(),
        )
        .await;
    output(
        NotificationKind::NewComment,
        details,
        Some(message),
        Vec::new(),
        recorder,
    )
}

async fn fetch_details(client: &BitrixClient, task_id: u64) -> Result<TaskDetails> {
    let task = found(client.fetch_task(task_id).await, "Task", task_id)?;
    let details =
        transform_task_details(&task, &client.config().portal_url).map_err(Error::from)?;
    Ok(details)
}

/// Fetch a task and build its "new task" message
pub async fn task_message_data(
    client: &BitrixClient,
    task_id: u64,
    max_length: usize,
) -> Result<MessageOutput> {
    let details = fetch_details(client, task_id).await?;
    Ok(new_task_output(client, details, max_length).await)
}

/// Fetch a task and build the message for its changes since `previous`
pub async fn update_message_data(
    client: &BitrixClient,
    task_id: u64,
    previous: &TaskSnapshot,
    max_length: usize,
) -> Result<MessageOutput> {
    let details = fetch_details(client, task_id).await?;
    Ok(update_output(client, details, previous, max_length).await)
}

/// Fetch a task comment and build its "new comment" message
pub async fn comment_message_data(
    client: &BitrixClient,
    task_id: u64,
    comment_id: u64,
    max_length: usize,
) -> Result<MessageOutput> {
    let (details, comment) = futures::future::join(
        fetch_details(client, task_id),
        client.fetch_comment(task_id, comment_id),
    )
    .await;

    let details = details?;
    let comment = found(comment, "Comment", format!("{task_id}/{comment_id}"))?;
    Ok(comment_output(client, details, &comment, max_length).await)
}

fn print_output(output: &MessageOutput, json: bool, global: &crate::Global) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(output)?);
        return Ok(());
    }

    if let Some(message) = &output.message {
        println!("{message}");
    }
    if global.verbose {
        eprintln!();
        eprintln!(
            "{} {}",
            output.kind.heading().bright_white().bold(),
            output.task.url.cyan()
        );
        if output.message.is_none() {
            eprintln!("{}", "Nothing changed".dimmed());
        }
        for diagnostic in &output.diagnostics {
            eprintln!("{} {}", "Warning:".yellow().bold(), diagnostic);
        }
    }
    Ok(())
}

pub async fn run_task(options: TaskOptions, global: crate::Global) -> Result<()> {
    let client = BitrixClient::new(BitrixConfig::load(&options.connection)?)?;
    if global.verbose {
        eprintln!("Fetching task {}", options.task_id);
    }

    let output = task_message_data(&client, options.task_id, options.max_length).await?;
    print_output(&output, options.json, &global)
}

pub async fn run_update(options: UpdateOptions, global: crate::Global) -> Result<()> {
    let previous = read_snapshot(&options.previous)?;
    let client = BitrixClient::new(BitrixConfig::load(&options.connection)?)?;
    if global.verbose {
        eprintln!("Fetching task {}", options.task_id);
    }

    let output =
        update_message_data(&client, options.task_id, &previous, options.max_length).await?;
    print_output(&output, options.json, &global)
}

pub async fn run_comment(options: CommentOptions, global: crate::Global) -> Result<()> {
    let client = BitrixClient::new(BitrixConfig::load(&options.connection)?)?;
    if global.verbose {
        eprintln!(
            "Fetching comment {} of task {}",
            options.comment_id, options.task_id
        );
    }

    let output = comment_message_data(
        &client,
        options.task_id,
        options.comment_id,
        options.max_length,
    )
    .await?;
    print_output(&output, options.json, &global)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::OfflineLookup;

    fn details() -> TaskDetails {
        TaskDetails {
            summary: TaskSummary {
                id: 7,
                title: "Release".to_string(),
                url: "https://b24/task/7/".to_string(),
            },
            created_by: Some(1),
            snapshot: TaskSnapshot {
                title: "Release".to_string(),
                description: "[B]Ship[/B] it".to_string(),
                deadline: None,
                responsible_ids: vec![3],
            },
        }
    }

    #[test]
    fn test_lookup_failure_is_a_typed_error() {
        let result: std::result::Result<Option<()>, LookupError> =
            Err(LookupError::Network("connection refused".to_string()));
        let error = found(result, "Task", 7).unwrap_err();

        assert!(matches!(error, Error::Lookup(LookupError::Network(_))));
        assert_eq!(
            error.to_string(),
            "Bitrix24 request failed: network error: connection refused"
        );
    }

    #[test]
    fn test_missing_entity_is_not_found() {
        let error = found(Ok(None::<()>), "Comment", "7/12").unwrap_err();
        assert!(matches!(error, Error::NotFound { kind: "Comment", .. }));
        assert_eq!(error.to_string(), "Comment 7/12 not found");
        assert_eq!(found(Ok(Some(5)), "Task", 1).unwrap(), 5);
    }

    #[test]
    fn test_parse_snapshot_accepts_saved_output() {
        let bare = r#"{ "title": "Release", "responsible_ids": [3] }"#;
        assert_eq!(parse_snapshot(bare).unwrap().responsible_ids, vec![3]);

        let saved = serde_json::json!({
            "kind": "new_task",
            "message": "<b>New task</b>",
            "snapshot": { "title": "Release", "deadline": "2024-05-01 10:00:00" }
        });
        let snapshot = parse_snapshot(&saved.to_string()).unwrap();
        assert_eq!(snapshot.deadline.as_deref(), Some("2024-05-01 10:00:00"));

        assert!(parse_snapshot("[1, 2]").is_err());
    }

    #[tokio::test]
    async fn test_new_task_output() {
        let output = new_task_output(&OfflineLookup, details(), 300).await;

        let message = output.message.unwrap();
        assert!(message.starts_with("<b>New task</b>\n→ "));
        assert!(message.contains("<b>Responsible:</b> 3\n"));
        assert!(message.ends_with("<b>Ship</b> it"));
        assert_eq!(output.snapshot, details().snapshot);
        assert_eq!(
            output.diagnostics,
            vec![
                Diagnostic::UnknownUser { id: 1 },
                Diagnostic::UnknownUser { id: 3 }
            ]
        );
    }

    #[tokio::test]
    async fn test_update_output_without_changes() {
        let previous = details().snapshot;
        let output = update_output(&OfflineLookup, details(), &previous, 300).await;

        assert_eq!(output.message, None);
        assert!(output.changes.is_empty());
    }

    #[tokio::test]
    async fn test_update_output_reports_title() {
        let mut previous = details().snapshot;
        previous.title = "Draft".to_string();
        let output = update_output(&OfflineLookup, details(), &previous, 300).await;

        assert_eq!(output.changes.len(), 1);
        assert!(output
            .message
            .unwrap()
            .ends_with("<b>Changed:</b>\n<b>Title:</b> Draft → Release"));
    }

    #[tokio::test]
    async fn test_comment_output_uses_author_name() {
        let comment: BitrixComment = serde_json::from_value(serde_json::json!({
            "ID": "12",
            "AUTHOR_ID": "5",
            "AUTHOR_NAME": "Ann",
            "POST_MESSAGE": "done\n\n\n[I]later[/I]"
        }))
        .unwrap();
        let output = comment_output(&OfflineLookup, details(), &comment, 300).await;

        assert!(output
            .message
            .unwrap()
            .ends_with("From Ann:\n→ done\n\u{200B}\n<i>later</i>"));
    }
}
