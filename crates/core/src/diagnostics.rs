//! Warnings raised while transpiling and composing messages
//!
//! The core does not log. Every recoverable oddity is reported to a [`DiagnosticSink`]
//! supplied by the caller; the CLI forwards them to `log`, tests record them.

use std::fmt;
use std::sync::Mutex;

use serde::Serialize;

use crate::lookup::LookupError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A `[DISK FILE ID=...]` tag whose id has no digits; the tag is left as is
    FileTagWithoutId { tag: String },
    FileNotFound { id: u64 },
    FileLookupFailed { id: u64, error: LookupError },
    /// A `[USER=...]` id that is not a positive integer; the label is used instead
    InvalidUserId { raw: String },
    UnknownUser { id: u64 },
    UserLookupFailed { id: u64, error: LookupError },
    /// A task deadline no known date format matches; shown as unrecognized
    UnrecognizedDeadline { raw: String },
    NoResponsible { task: u64 },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::FileTagWithoutId { tag } => {
                write!(f, "file tag without a numeric id: {tag}")
            }
            Diagnostic::FileNotFound { id } => write!(f, "file {id} not found"),
            Diagnostic::FileLookupFailed { id, error } => {
                write!(f, "failed to load file {id}: {error}")
            }
            Diagnostic::InvalidUserId { raw } => write!(f, "invalid user id in mention: {raw:?}"),
            Diagnostic::UnknownUser { id } => write!(f, "user {id} could not be resolved"),
            Diagnostic::UserLookupFailed { id, error } => {
                write!(f, "failed to load user {id}: {error}")
            }
            Diagnostic::UnrecognizedDeadline { raw } => {
                write!(f, "unrecognized deadline: {raw:?}")
            }
            Diagnostic::NoResponsible { task } => write!(f, "task {task} has no responsible user"),
        }
    }
}

pub trait DiagnosticSink {
    fn emit(&self, diagnostic: Diagnostic);
}

impl<F> DiagnosticSink for F
where
    F: Fn(Diagnostic),
{
    fn emit(&self, diagnostic: Diagnostic) {
        self(diagnostic)
    }
}

/// Drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl DiagnosticSink for Discard {
    fn emit(&self, _diagnostic: Diagnostic) {}
}

/// Keeps every diagnostic in emission order
#[derive(Debug, Default)]
pub struct Recorder {
    entries: Mutex<Vec<Diagnostic>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the recorded diagnostics
    pub fn take(&self) -> Vec<Diagnostic> {
        match self.entries.lock() {
            Ok(mut entries) => std::mem::take(&mut *entries),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl DiagnosticSink for Recorder {
    fn emit(&self, diagnostic: Diagnostic) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(diagnostic),
            Err(poisoned) => poisoned.into_inner().push(diagnostic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_keeps_order_and_drains() {
        let recorder = Recorder::new();
        recorder.emit(Diagnostic::FileNotFound { id: 1 });
        recorder.emit(Diagnostic::UnknownUser { id: 2 });

        assert_eq!(
            recorder.take(),
            vec![
                Diagnostic::FileNotFound { id: 1 },
                Diagnostic::UnknownUser { id: 2 }
            ]
        );
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |d: Diagnostic| seen.lock().unwrap().push(d.to_string());
        sink.emit(Diagnostic::InvalidUserId {
            raw: "abc".to_string(),
        });

        assert_eq!(
            seen.into_inner().unwrap(),
            vec!["invalid user id in mention: \"abc\"".to_string()]
        );
    }

    #[test]
    fn test_display_includes_lookup_error() {
        let diagnostic = Diagnostic::FileLookupFailed {
            id: 7,
            error: LookupError::Network("timed out".to_string()),
        };
        assert_eq!(
            diagnostic.to_string(),
            "failed to load file 7: network error: timed out"
        );
    }
}
