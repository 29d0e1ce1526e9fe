//! Transformation functions for Bitrix24 REST API responses
//!
//! Every REST method answers with the same envelope: `result` on success, `error` and
//! `error_description` on failure. Absent entities come back either as an
//! `ERROR_NOT_FOUND` error or as an empty `result`, depending on the method.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::escape::{escape_attribute, escape_text};
use crate::lookup::{FileLookupResult, FileRecord, LookupError, UserLookupResult};
use crate::notification::{TaskDetails, TaskSnapshot, TaskSummary};

const NOT_FOUND: &str = "ERROR_NOT_FOUND";

/// Response envelope shared by all REST methods
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct BitrixResponse {
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// `disk.file.get` result
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DiskFile {
    #[serde(rename = "ID")]
    pub id: serde_json::Value,
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "DOWNLOAD_URL")]
    pub download_url: String,
}

/// `user.get` result entry
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BitrixUser {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "NAME", default)]
    pub name: Option<String>,
    #[serde(rename = "LAST_NAME", default)]
    pub last_name: Option<String>,
    #[serde(rename = "LOGIN", default)]
    pub login: Option<String>,
}

/// `tasks.task.get` result
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TaskEnvelope {
    pub task: BitrixTask,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BitrixTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "createdBy", default)]
    pub created_by: Option<String>,
    #[serde(rename = "responsibleId", default)]
    pub responsible_id: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub creator: Option<TaskMember>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TaskMember {
    #[serde(default)]
    pub name: Option<String>,
}

/// `task.commentitem.get` result
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BitrixComment {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "AUTHOR_ID", default)]
    pub author_id: Option<String>,
    #[serde(rename = "AUTHOR_NAME", default)]
    pub author_name: Option<String>,
    #[serde(rename = "POST_MESSAGE", default)]
    pub post_message: Option<String>,
    #[serde(rename = "POST_DATE", default)]
    pub post_date: Option<String>,
}

/// Unwrap the envelope: `Ok(None)` when the entity does not exist
pub fn parse_envelope<T: DeserializeOwned>(
    response: BitrixResponse,
) -> Result<Option<T>, LookupError> {
    if let Some(code) = response.error {
        if code == NOT_FOUND {
            return Ok(None);
        }
        return Err(LookupError::Api {
            code,
            description: response.error_description.unwrap_or_default(),
        });
    }

    let empty = match &response.result {
        serde_json::Value::Null | serde_json::Value::Bool(false) => true,
        serde_json::Value::Array(items) => items.is_empty(),
        _ => false,
    };
    if empty {
        return Ok(None);
    }

    serde_json::from_value(response.result)
        .map(Some)
        .map_err(|e| LookupError::Decode(e.to_string()))
}

pub fn transform_file_response(response: BitrixResponse) -> FileLookupResult {
    match parse_envelope::<DiskFile>(response) {
        Ok(Some(file)) => FileLookupResult::Found(FileRecord {
            name: file.name,
            download_url: file.download_url,
        }),
        Ok(None) => FileLookupResult::NotFound,
        Err(error) => FileLookupResult::Failed(error),
    }
}

/// Profile page of a user on the portal
pub fn user_profile_url(portal_url: &str, user_id: u64) -> String {
    format!(
        "{}/company/personal/user/{user_id}/",
        portal_url.trim_end_matches('/')
    )
}

/// Task page on the portal, opened from a member's task list
pub fn task_url(portal_url: &str, member_id: u64, task_id: u64) -> String {
    format!(
        "{}/company/personal/user/{member_id}/tasks/task/view/{task_id}/",
        portal_url.trim_end_matches('/')
    )
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Display name of a user: first and last name, or the login when both are blank
pub fn user_display_name(user: &BitrixUser) -> Option<String> {
    let full_name = [user.name.as_deref(), user.last_name.as_deref()]
        .into_iter()
        .filter_map(non_blank)
        .collect::<Vec<_>>()
        .join(" ");
    if full_name.is_empty() {
        non_blank(user.login.as_deref()).map(str::to_string)
    } else {
        Some(full_name)
    }
}

/// Build the profile link for a `user.get` answer
pub fn transform_user_response(
    response: BitrixResponse,
    portal_url: &str,
    user_id: u64,
) -> UserLookupResult {
    let user = match parse_envelope::<Vec<BitrixUser>>(response) {
        Ok(users) => users.and_then(|users| users.into_iter().next()),
        Err(error) => return UserLookupResult::Failed(error),
    };

    match user.as_ref().and_then(user_display_name) {
        Some(name) => UserLookupResult::Link(format!(
            "<a href=\"{}\">{}</a>",
            escape_attribute(&user_profile_url(portal_url, user_id)),
            escape_text(&name)
        )),
        None => UserLookupResult::Unknown,
    }
}

fn parse_id(raw: Option<&str>) -> Option<u64> {
    raw?.trim().parse().ok()
}

/// Summary of a task for message headers
pub fn transform_task(task: &BitrixTask, portal_url: &str) -> Result<TaskSummary, LookupError> {
    let id = parse_id(Some(task.id.as_str()))
        .ok_or_else(|| LookupError::Decode(format!("invalid task id {:?}", task.id)))?;
    let member = parse_id(task.responsible_id.as_deref())
        .or_else(|| parse_id(task.created_by.as_deref()))
        .unwrap_or(0);

    Ok(TaskSummary {
        id,
        title: task.title.clone(),
        url: task_url(portal_url, member, id),
    })
}

/// Everything the task messages show, plus the fields tracked for change reports
pub fn transform_task_details(
    task: &BitrixTask,
    portal_url: &str,
) -> Result<TaskDetails, LookupError> {
    let summary = transform_task(task, portal_url)?;
    Ok(TaskDetails {
        created_by: parse_id(task.created_by.as_deref()),
        snapshot: TaskSnapshot {
            title: task.title.clone(),
            description: task.description.clone().unwrap_or_default(),
            deadline: non_blank(task.deadline.as_deref()).map(str::to_string),
            responsible_ids: parse_id(task.responsible_id.as_deref()).into_iter().collect(),
        },
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: serde_json::Value) -> BitrixResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_file_found() {
        let response = envelope(json!({
            "result": {
                "ID": "42",
                "NAME": "report.pdf",
                "DOWNLOAD_URL": "https://portal/disk/downloadFile/42/?&ncc=1"
            },
            "time": { "start": 1.0 }
        }));

        assert_eq!(
            transform_file_response(response),
            FileLookupResult::Found(FileRecord {
                name: "report.pdf".to_string(),
                download_url: "https://portal/disk/downloadFile/42/?&ncc=1".to_string(),
            })
        );
    }

    #[test]
    fn test_file_not_found_error_code() {
        let response = envelope(json!({
            "error": "ERROR_NOT_FOUND",
            "error_description": "Could not find entity with id '42'"
        }));
        assert_eq!(transform_file_response(response), FileLookupResult::NotFound);
    }

    #[test]
    fn test_file_empty_result() {
        assert_eq!(
            transform_file_response(envelope(json!({ "result": [] }))),
            FileLookupResult::NotFound
        );
        assert_eq!(
            transform_file_response(BitrixResponse::default()),
            FileLookupResult::NotFound
        );
    }

    #[test]
    fn test_file_api_error() {
        let response = envelope(json!({
            "error": "insufficient_scope",
            "error_description": "The request requires higher privileges"
        }));
        assert_eq!(
            transform_file_response(response),
            FileLookupResult::Failed(LookupError::Api {
                code: "insufficient_scope".to_string(),
                description: "The request requires higher privileges".to_string(),
            })
        );
    }

    #[test]
    fn test_file_malformed_result() {
        let result = transform_file_response(envelope(json!({ "result": { "ID": "1" } })));
        assert!(matches!(result, FileLookupResult::Failed(LookupError::Decode(_))));
    }

    #[test]
    fn test_user_link() {
        let response = envelope(json!({
            "result": [{ "ID": "5", "NAME": "Ann", "LAST_NAME": "O'Neil <QA>" }]
        }));

        assert_eq!(
            transform_user_response(response, "https://b24.example.com/", 5),
            UserLookupResult::Link(
                "<a href=\"https://b24.example.com/company/personal/user/5/\">Ann O'Neil &lt;QA&gt;</a>"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_user_falls_back_to_login() {
        let user = BitrixUser {
            id: "5".to_string(),
            name: Some(" ".to_string()),
            last_name: None,
            login: Some("ann".to_string()),
        };
        assert_eq!(user_display_name(&user), Some("ann".to_string()));
    }

    #[test]
    fn test_user_unknown() {
        let response = envelope(json!({ "result": [] }));
        assert_eq!(
            transform_user_response(response, "https://b24", 5),
            UserLookupResult::Unknown
        );

        let nameless = envelope(json!({ "result": [{ "ID": "5" }] }));
        assert_eq!(
            transform_user_response(nameless, "https://b24", 5),
            UserLookupResult::Unknown
        );
    }

    #[test]
    fn test_task_summary_url() {
        let task: TaskEnvelope = serde_json::from_value(json!({
            "task": {
                "id": "77",
                "title": "Fix login",
                "description": "[B]asap[/B]",
                "createdBy": "1",
                "responsibleId": "9",
                "creator": { "name": "Boss" }
            }
        }))
        .unwrap();

        let summary = transform_task(&task.task, "https://b24").unwrap();
        assert_eq!(summary.id, 77);
        assert_eq!(summary.title, "Fix login");
        assert_eq!(
            summary.url,
            "https://b24/company/personal/user/9/tasks/task/view/77/"
        );
    }

    #[test]
    fn test_task_details() {
        let task: TaskEnvelope = serde_json::from_value(json!({
            "task": {
                "id": "78",
                "title": "Ship it",
                "createdBy": "1",
                "responsibleId": "9",
                "deadline": "2024-05-01T10:00:00+03:00"
            }
        }))
        .unwrap();

        let details = transform_task_details(&task.task, "https://b24").unwrap();
        assert_eq!(details.created_by, Some(1));
        assert_eq!(
            details.snapshot,
            TaskSnapshot {
                title: "Ship it".to_string(),
                description: String::new(),
                deadline: Some("2024-05-01T10:00:00+03:00".to_string()),
                responsible_ids: vec![9],
            }
        );
        assert_eq!(details.summary.id, 78);
    }

    #[test]
    fn test_task_details_without_people_or_deadline() {
        let task: TaskEnvelope = serde_json::from_value(json!({
            "task": { "id": "79", "title": "Orphan", "responsibleId": "0x", "deadline": "" }
        }))
        .unwrap();

        let details = transform_task_details(&task.task, "https://b24").unwrap();
        assert_eq!(details.created_by, None);
        assert!(details.snapshot.responsible_ids.is_empty());
        assert_eq!(details.snapshot.deadline, None);
    }

    #[test]
    fn test_comment_payload() {
        let comment: BitrixComment = serde_json::from_value(json!({
            "ID": "301",
            "AUTHOR_ID": "5",
            "AUTHOR_NAME": "Ann",
            "POST_MESSAGE": "[USER=9]Bob[/USER], done",
            "POST_DATE": "2024-05-01T10:00:00+03:00"
        }))
        .unwrap();

        assert_eq!(comment.author_name.as_deref(), Some("Ann"));
        assert_eq!(
            comment.post_message.as_deref(),
            Some("[USER=9]Bob[/USER], done")
        );
    }
}
