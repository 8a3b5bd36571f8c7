//! Flat-file data directory + JSON-RPC fetch utilities for NCL.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "ncl-storage";

pub const LEGACY_CAMPAIGNS_FILE: &str = "campaigns.json";
pub const COMPREHENSIVE_DIR: &str = "campaigns";
pub const DONATIONS_DIR: &str = "donations";
pub const NGO_SCORES_FILE: &str = "ngo-scores.json";
pub const WITHDRAWALS_FILE: &str = "withdrawals.json";
pub const SCORING_CONFIG_FILE: &str = "scoring.yaml";

const COMPREHENSIVE_PREFIX: &str = "campaign_";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid record id {0:?}")]
    InvalidId(String),
}

/// Validate an id before it is joined into a file path.
pub fn sanitize_id(id: &str) -> Result<&str, StorageError> {
    let trimmed = id.trim();
    let valid = !trimmed.is_empty()
        && trimmed.len() <= 128
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(trimmed)
    } else {
        Err(StorageError::InvalidId(id.to_string()))
    }
}

/// Layout of the JSON data directory (historically `mock/`).
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn legacy_campaigns_path(&self) -> PathBuf {
        self.root.join(LEGACY_CAMPAIGNS_FILE)
    }

    pub fn comprehensive_dir(&self) -> PathBuf {
        self.root.join(COMPREHENSIVE_DIR)
    }

    pub fn comprehensive_path(&self, id: &str) -> Result<PathBuf, StorageError> {
        let id = sanitize_id(id)?;
        Ok(self
            .comprehensive_dir()
            .join(format!("{COMPREHENSIVE_PREFIX}{id}.json")))
    }

    pub fn donations_path(&self, id: &str) -> Result<PathBuf, StorageError> {
        let id = sanitize_id(id)?;
        Ok(self.root.join(DONATIONS_DIR).join(format!("{id}.json")))
    }

    pub fn ngo_scores_path(&self) -> PathBuf {
        self.root.join(NGO_SCORES_FILE)
    }

    pub fn withdrawals_path(&self) -> PathBuf {
        self.root.join(WITHDRAWALS_FILE)
    }

    pub fn scoring_config_path(&self) -> PathBuf {
        self.root.join(SCORING_CONFIG_FILE)
    }

    /// Campaign ids that have a comprehensive file, sorted.
    pub async fn list_comprehensive_ids(&self) -> anyhow::Result<Vec<String>> {
        let dir = self.comprehensive_dir();
        if !fs::try_exists(&dir)
            .await
            .with_context(|| format!("checking {}", dir.display()))?
        {
            return Ok(vec![]);
        }

        let mut entries = fs::read_dir(&dir)
            .await
            .with_context(|| format!("reading {}", dir.display()))?;
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("listing {}", dir.display()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(id) = name
                .strip_prefix(COMPREHENSIVE_PREFIX)
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            if sanitize_id(id).is_ok() {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Read and decode a JSON file; a missing file is `None`, malformed content is an error.
pub async fn read_json_opt<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };
    if text.trim().is_empty() {
        return Ok(None);
    }
    let value = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(value))
}

/// Overwrite `path` with pretty JSON via a temp file and rename in the same directory.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serializing {}", path.display()))?;
    write_bytes_atomic(path, &bytes).await
}

pub async fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| format!("writing temp file {}", temp_path.display()));
    }

    match fs::rename(&temp_path, path).await {
        Ok(()) => {
            debug!(path = %path.display(), bytes = bytes.len(), "wrote json file");
            Ok(())
        }
        Err(err) => {
            let _ = fs::remove_file(&temp_path).await;
            Err(err).with_context(|| {
                format!(
                    "atomically renaming {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            concurrency: 8,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed rpc response: {0}")]
    Malformed(String),
}

/// Minimal JSON-RPC 2.0 client with bounded concurrency and retry/backoff.
#[derive(Debug)]
pub struct JsonRpcClient {
    client: reqwest::Client,
    endpoint: String,
    limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(endpoint: impl Into<String>, config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            limit: Arc::new(Semaphore::new(config.concurrency.max(1))),
            backoff: config.backoff,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the `result` member, which may be JSON `null`.
    pub async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, FetchError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("rpc_call", method, id);
        self.call_inner(id, method, params).instrument(span).await
    }

    async fn call_inner(
        &self,
        id: u64,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, FetchError> {
        let _permit = self
            .limit
            .acquire()
            .await
            .map_err(|_| FetchError::Malformed("rpc client shut down".into()))?;
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut attempt = 0;
        loop {
            match self.client.post(&self.endpoint).json(&body).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let value: serde_json::Value = resp.json().await?;
                        return decode_rpc_envelope(value);
                    }
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: self.endpoint.clone(),
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

pub fn decode_rpc_envelope(value: serde_json::Value) -> Result<serde_json::Value, FetchError> {
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        return Err(FetchError::Rpc {
            code: error.get("code").and_then(|c| c.as_i64()).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    match value {
        serde_json::Value::Object(mut map) => map
            .remove("result")
            .ok_or_else(|| FetchError::Malformed("missing result member".into())),
        other => Err(FetchError::Malformed(format!("expected object, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn hashing_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn ids_with_path_characters_are_rejected() {
        assert_eq!(sanitize_id(" camp-1_a ").unwrap(), "camp-1_a");
        assert!(sanitize_id("../etc/passwd").is_err());
        assert!(sanitize_id("a b").is_err());
        assert!(sanitize_id("").is_err());

        let data = DataDir::new("/data");
        assert_eq!(
            data.comprehensive_path("7").unwrap(),
            PathBuf::from("/data/campaigns/campaign_7.json")
        );
        assert_eq!(
            data.donations_path("7").unwrap(),
            PathBuf::from("/data/donations/7.json")
        );
    }

    #[tokio::test]
    async fn atomic_write_round_trips_and_leaves_no_temp_files() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested/sample.json");
        let sample = Sample {
            name: "alpha".into(),
            count: 3,
        };

        write_json_atomic(&path, &sample).await.expect("first write");
        let updated = Sample {
            name: "alpha".into(),
            count: 4,
        };
        write_json_atomic(&path, &updated).await.expect("overwrite");

        let read: Option<Sample> = read_json_opt(&path).await.expect("read");
        assert_eq!(read, Some(updated));

        let leftovers = std::fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn missing_file_is_none_and_malformed_names_the_path() {
        let dir = tempdir().expect("tempdir");
        let missing: Option<Sample> = read_json_opt(&dir.path().join("nope.json")).await.unwrap();
        assert!(missing.is_none());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        let err = read_json_opt::<Sample>(&bad).await.unwrap_err();
        assert!(format!("{err:#}").contains("bad.json"));
    }

    #[tokio::test]
    async fn comprehensive_ids_are_listed_from_file_names() {
        let dir = tempdir().expect("tempdir");
        let data = DataDir::new(dir.path());
        for id in ["b2", "a1"] {
            write_json_atomic(&data.comprehensive_path(id).unwrap(), &serde_json::json!({}))
                .await
                .unwrap();
        }
        std::fs::write(data.comprehensive_dir().join("notes.txt"), "x").unwrap();

        assert_eq!(data.list_comprehensive_ids().await.unwrap(), vec!["a1", "b2"]);
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn rpc_envelope_decoding() {
        let ok = decode_rpc_envelope(serde_json::json!({"jsonrpc":"2.0","id":1,"result":null})).unwrap();
        assert!(ok.is_null());

        let err = decode_rpc_envelope(serde_json::json!({
            "jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"header not found"}
        }))
        .unwrap_err();
        assert!(matches!(err, FetchError::Rpc { code: -32000, .. }));

        assert!(matches!(
            decode_rpc_envelope(serde_json::json!({"jsonrpc":"2.0","id":1})),
            Err(FetchError::Malformed(_))
        ));
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }
}
