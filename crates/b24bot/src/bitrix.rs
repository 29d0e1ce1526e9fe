use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use b24bot_core::bitrix::{
    parse_envelope, transform_file_response, transform_user_response, BitrixComment,
    BitrixResponse, BitrixTask, TaskEnvelope,
};
use b24bot_core::lookup::{FileLookupResult, LookupError, ResourceLookup, UserLookupResult};
use reqwest::Url;

use crate::prelude::*;

/// Connection flags shared by every command that talks to Bitrix24
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConnectionArgs {
    /// Incoming webhook URL, e.g. https://example.bitrix24.com/rest/1/abc123/
    /// (falls back to BITRIX_WEBHOOK_URL)
    #[arg(long)]
    pub webhook_url: Option<String>,

    /// Request timeout in seconds (falls back to BITRIX_TIMEOUT, then 10)
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Bitrix24 configuration from environment variables and CLI overrides
#[derive(Debug, Clone, PartialEq)]
pub struct BitrixConfig {
    /// Webhook base, always ending with `/`
    pub webhook_url: String,
    /// Scheme and host of the portal, used to build profile and task links
    pub portal_url: String,
    pub timeout: Duration,
}

impl BitrixConfig {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

    pub fn new(webhook_url: &str, timeout_secs: u64) -> Result<Self, Error> {
        let mut webhook_url = webhook_url.trim().to_string();
        if !webhook_url.ends_with('/') {
            webhook_url.push('/');
        }

        let parsed = Url::parse(&webhook_url)
            .map_err(|e| Error::Config(format!("invalid webhook URL {webhook_url:?}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(Error::Config(format!(
                "webhook URL must be an http(s) URL with a host: {webhook_url:?}"
            )));
        }

        Ok(Self {
            portal_url: parsed.origin().ascii_serialization(),
            webhook_url,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Load configuration, CLI flags taking precedence over environment variables
    pub fn load(args: &ConnectionArgs) -> Result<Self, Error> {
        let webhook_url = match &args.webhook_url {
            Some(url) => url.clone(),
            None => std::env::var("BITRIX_WEBHOOK_URL").map_err(|_| {
                Error::Config("BITRIX_WEBHOOK_URL environment variable not set".to_string())
            })?,
        };
        let timeout = match args.timeout {
            Some(timeout) => timeout,
            None => parse_timeout(std::env::var("BITRIX_TIMEOUT").ok().as_deref())?,
        };
        Self::new(&webhook_url, timeout)
    }
}

fn parse_timeout(raw: Option<&str>) -> Result<u64, Error> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(BitrixConfig::DEFAULT_TIMEOUT_SECS),
        Some(raw) => raw.parse().map_err(|_| {
            Error::Config(format!(
                "BITRIX_TIMEOUT must be a number of seconds, got {raw:?}"
            ))
        }),
    }
}

/// Create an HTTP client with the configured request timeout
pub fn create_client(config: &BitrixConfig) -> Result<reqwest::Client> {
    use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(config.timeout)
        .build()
        .map_err(|e| eyre!("Failed to build HTTP client: {}", e))
}

/// Bitrix24 REST client, also the lookup the transpiler resolves references with.
///
/// Found and not-found answers are remembered for the life of the client; failures are
/// retried on the next lookup.
pub struct BitrixClient {
    http: reqwest::Client,
    config: BitrixConfig,
    files: Mutex<HashMap<u64, FileLookupResult>>,
    users: Mutex<HashMap<u64, UserLookupResult>>,
}

impl BitrixClient {
    pub fn new(config: BitrixConfig) -> Result<Self> {
        Ok(Self {
            http: create_client(&config)?,
            config,
            files: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &BitrixConfig {
        &self.config
    }

    /// Call a REST method and return its envelope.
    ///
    /// Bitrix24 answers errors with a 4xx status and an error envelope, so the body is
    /// decoded whatever the status.
    async fn call(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<BitrixResponse, LookupError> {
        let url = format!("{}{method}.json", self.config.webhook_url);
        log::debug!("GET {method} {params:?}");

        let response = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;

        match serde_json::from_str::<BitrixResponse>(&body) {
            Ok(envelope) => Ok(envelope),
            Err(_) if !status.is_success() => Err(LookupError::Api {
                code: status.as_u16().to_string(),
                description: body.chars().take(200).collect(),
            }),
            Err(e) => Err(LookupError::Decode(e.to_string())),
        }
    }

    pub async fn fetch_task(&self, task_id: u64) -> Result<Option<BitrixTask>, LookupError> {
        let envelope = self
            .call("tasks.task.get", &[("taskId", task_id.to_string())])
            .await?;
        Ok(parse_envelope::<TaskEnvelope>(envelope)?.map(|envelope| envelope.task))
    }

    pub async fn fetch_comment(
        &self,
        task_id: u64,
        comment_id: u64,
    ) -> Result<Option<BitrixComment>, LookupError> {
        let envelope = self
            .call(
                "task.commentitem.get",
                &[
                    ("TASKID", task_id.to_string()),
                    ("ITEMID", comment_id.to_string()),
                ],
            )
            .await?;
        parse_envelope(envelope)
    }

    fn cached<T: Clone>(cache: &Mutex<HashMap<u64, T>>, id: u64) -> Option<T> {
        cache.lock().ok()?.get(&id).cloned()
    }

    fn remember<T>(cache: &Mutex<HashMap<u64, T>>, id: u64, value: T) {
        if let Ok(mut cache) = cache.lock() {
            cache.insert(id, value);
        }
    }
}

impl ResourceLookup for BitrixClient {
    async fn lookup_file(&self, id: u64) -> FileLookupResult {
        if let Some(result) = Self::cached(&self.files, id) {
            return result;
        }

        let result = match self.call("disk.file.get", &[("id", id.to_string())]).await {
            Ok(envelope) => transform_file_response(envelope),
            Err(error) => FileLookupResult::Failed(error),
        };
        if !matches!(result, FileLookupResult::Failed(_)) {
            Self::remember(&self.files, id, result.clone());
        }
        result
    }

    async fn lookup_user_link(&self, id: u64) -> UserLookupResult {
        if let Some(result) = Self::cached(&self.users, id) {
            return result;
        }

        let result = match self.call("user.get", &[("ID", id.to_string())]).await {
            Ok(envelope) => transform_user_response(envelope, &self.config.portal_url, id),
            Err(error) => UserLookupResult::Failed(error),
        };
        if !matches!(result, UserLookupResult::Failed(_)) {
            Self::remember(&self.users, id, result.clone());
        }
        result
    }
}
