//! Contracts for the collaborators the transpiler resolves references against
//!
//! The transpiler never talks to the network itself. It is handed something that
//! implements [`ResourceLookup`] and treats every answer, including failures, as data.

use std::future::Future;

use serde::{Deserialize, Serialize};

/// A file attachment as the transpiler needs it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    pub download_url: String,
}

/// Why a lookup could not produce an answer
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error {code}: {description}")]
    Api { code: String, description: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Outcome of resolving a `[DISK FILE ID=...]` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLookupResult {
    Found(FileRecord),
    NotFound,
    Failed(LookupError),
}

/// Outcome of resolving a `[USER=...]` mention
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookupResult {
    /// Anchor-ready HTML fragment for the user profile
    Link(String),
    /// The service answered but knows no such user
    Unknown,
    Failed(LookupError),
}

/// Resolves file and user references found in BBCode.
///
/// Implementations own their own timeouts and caching. Both methods are plain reads
/// and may be polled concurrently for distinct ids.
pub trait ResourceLookup {
    fn lookup_file(&self, id: u64) -> impl Future<Output = FileLookupResult> + Send;

    fn lookup_user_link(&self, id: u64) -> impl Future<Output = UserLookupResult> + Send;
}
