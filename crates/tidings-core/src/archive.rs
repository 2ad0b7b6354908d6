//! Archive reader: fetches and parses the immutable blobs behind message groups.
//!
//! A blob is a YAML (or JSON) document:
//!
//! ```yaml
//! metadata:
//!   cardId: card-1
//!   fromDate: 2024-01-01T00:00:00Z
//!   toDate: 2024-01-02T00:00:00Z
//! messages:
//!   - id: m1
//!     content: hello
//!     creator: alice
//!     created: 2024-01-01T00:00:00Z
//! ```
//!
//! Messages may omit `cardId`; it is taken from the metadata.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::{CoreConfig, RetryPolicy};
use crate::error::{CoreError, Result};
use crate::models::{apply_patches, BlobId, CardId, Message, MessagesGroup};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMetadata {
    pub card_id: CardId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
}

/// A loaded blob: metadata plus its messages in ascending `created` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedArchive {
    pub metadata: ArchiveMetadata,
    pub messages: Vec<Message>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Empty body")]
    EmptyBody,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Raw blob transport. Every error is considered transient and retried.
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<String, FetchError>;
}

pub struct HttpBlobFetcher {
    client: reqwest::Client,
}

impl HttpBlobFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpBlobFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobFetcher for HttpBlobFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        if body.trim().is_empty() {
            return Err(FetchError::EmptyBody);
        }
        Ok(body)
    }
}

/// Substitute `:workspace` and `:blobId` into a location template.
pub fn archive_url(template: &str, workspace: &str, blob_id: &str) -> String {
    template
        .replace(":workspace", workspace)
        .replace(":blobId", blob_id)
}

#[derive(Deserialize)]
struct RawArchive {
    metadata: ArchiveMetadata,
    #[serde(default)]
    messages: Vec<serde_yaml::Value>,
}

/// Parse a blob body. YAML is a superset of the JSON the blobs are sometimes written in.
pub fn parse_archive(blob_id: &str, body: &str) -> Result<ParsedArchive> {
    let parse_error = |message: String| CoreError::ArchiveParse {
        blob_id: blob_id.to_string(),
        message,
    };

    let raw: RawArchive = serde_yaml::from_str(body).map_err(|e| parse_error(e.to_string()))?;
    let card_key = serde_yaml::Value::String("cardId".to_string());

    let mut messages = Vec::with_capacity(raw.messages.len());
    for mut value in raw.messages {
        if let serde_yaml::Value::Mapping(map) = &mut value {
            if !map.contains_key(&card_key) {
                map.insert(
                    card_key.clone(),
                    serde_yaml::Value::String(raw.metadata.card_id.clone()),
                );
            }
        }
        let message: Message =
            serde_yaml::from_value(value).map_err(|e| parse_error(e.to_string()))?;
        messages.push(message);
    }
    messages.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));

    Ok(ParsedArchive {
        metadata: raw.metadata,
        messages,
    })
}

/// Fetches group blobs over a [`BlobFetcher`] with bounded retries.
pub struct ArchiveReader<F: BlobFetcher = HttpBlobFetcher> {
    fetcher: F,
    url_template: String,
    workspace: String,
    retry: RetryPolicy,
}

impl ArchiveReader<HttpBlobFetcher> {
    pub fn new(config: &CoreConfig) -> Self {
        Self::with_fetcher(HttpBlobFetcher::new(), config)
    }
}

impl<F: BlobFetcher> ArchiveReader<F> {
    pub fn with_fetcher(fetcher: F, config: &CoreConfig) -> Self {
        Self {
            fetcher,
            url_template: config.archive_url_template.clone(),
            workspace: config.workspace.clone(),
            retry: config.archive_retry.clone(),
        }
    }

    /// Fetch and parse the blob behind `group`.
    ///
    /// Transport failures are retried up to the configured attempt budget; a
    /// body that fails to parse is returned as an error immediately.
    pub async fn load(&self, workspace: &str, group: &MessagesGroup) -> Result<ParsedArchive> {
        let url = archive_url(&self.url_template, workspace, &group.blob_id);
        let attempts = self.retry.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match self.fetcher.fetch(&url).await {
                Ok(body) => {
                    let archive = parse_archive(&group.blob_id, &body)?;
                    tracing::debug!(
                        blob_id = %group.blob_id,
                        messages = archive.messages.len(),
                        "archive loaded"
                    );
                    return Ok(archive);
                }
                Err(err) => {
                    tracing::warn!(
                        blob_id = %group.blob_id,
                        attempt = attempt + 1,
                        attempts,
                        "archive fetch failed: {}",
                        err
                    );
                    last_error = err.to_string();
                }
            }

            if attempt + 1 < attempts {
                let delay = self.retry.delay_after(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(CoreError::ArchiveFetch {
            url,
            attempts,
            message: last_error,
        })
    }
}

/// Where windowed queries get archived messages from.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    async fn load_group(&self, group: &MessagesGroup) -> Result<ParsedArchive>;
}

#[async_trait]
impl<F: BlobFetcher> ArchiveSource for ArchiveReader<F> {
    async fn load_group(&self, group: &MessagesGroup) -> Result<ParsedArchive> {
        self.load(&self.workspace, group).await
    }
}

/// Messages of a group as they read today: the blob's messages with the
/// group's later patches folded in. Removed messages are dropped.
pub async fn load_group_messages(
    source: &dyn ArchiveSource,
    group: &MessagesGroup,
) -> Result<Vec<Message>> {
    let archive = source.load_group(group).await?;
    if group.patches.is_empty() {
        return Ok(archive.messages);
    }
    Ok(archive
        .messages
        .into_iter()
        .filter_map(|message| apply_patches(message, &group.patches))
        .collect())
}

/// Archive held in memory, keyed by blob id.
#[derive(Default)]
pub struct StaticArchive {
    blobs: RwLock<HashMap<BlobId, ParsedArchive>>,
    loads: AtomicUsize,
    failing: AtomicBool,
}

impl StaticArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, blob_id: impl Into<BlobId>, archive: ParsedArchive) {
        self.blobs.write().insert(blob_id.into(), archive);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArchiveSource for StaticArchive {
    async fn load_group(&self, group: &MessagesGroup) -> Result<ParsedArchive> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::ArchiveFetch {
                url: group.blob_id.clone(),
                attempts: 1,
                message: "archive unavailable".to_string(),
            });
        }
        self.blobs
            .read()
            .get(&group.blob_id)
            .cloned()
            .ok_or_else(|| CoreError::ArchiveFetch {
                url: group.blob_id.clone(),
                attempts: 1,
                message: "blob not found".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    const BLOB: &str = r#"
metadata:
  cardId: card-1
  fromDate: 2024-01-01T00:00:00Z
  toDate: 2024-01-01T00:00:02Z
messages:
  - id: m2
    content: second
    creator: bob
    created: 2024-01-01T00:00:02Z
  - id: m1
    content: first
    creator: alice
    created: 2024-01-01T00:00:01Z
    reactions:
      - reaction: "👍"
        creator: bob
        created: 2024-01-01T00:00:05Z
"#;

    struct ScriptedFetcher {
        responses: Mutex<VecDeque<std::result::Result<String, FetchError>>>,
        urls: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<std::result::Result<String, FetchError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                urls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BlobFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> std::result::Result<String, FetchError> {
            self.urls.lock().push(url.to_string());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or(Err(FetchError::EmptyBody))
        }
    }

    fn group() -> MessagesGroup {
        MessagesGroup {
            card_id: "card-1".to_string(),
            blob_id: "blob-1".to_string(),
            from_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            to_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 2).unwrap(),
            count: 2,
            patches: Vec::new(),
        }
    }

    fn config(attempts: u32) -> CoreConfig {
        CoreConfig::new("ws")
            .with_archive_url_template("https://files/:workspace/:blobId")
            .with_archive_retry(RetryPolicy::immediate(attempts))
    }

    #[test]
    fn test_archive_url_substitution() {
        assert_eq!(
            archive_url("https://x/:workspace/blob/:blobId?v=1", "ws", "b1"),
            "https://x/ws/blob/b1?v=1"
        );
    }

    #[test]
    fn test_parse_orders_messages_and_fills_card() {
        let archive = parse_archive("blob-1", BLOB).unwrap();
        let ids: Vec<_> = archive.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert!(archive.messages.iter().all(|m| m.card_id == "card-1"));
        assert_eq!(archive.messages[0].reactions.len(), 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_archive("blob-1", "messages: [").unwrap_err();
        assert!(matches!(err, CoreError::ArchiveParse { .. }));
    }

    #[tokio::test]
    async fn test_load_retries_transient_failures() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchError::Status(503)),
            Err(FetchError::Transport("reset".to_string())),
            Ok(BLOB.to_string()),
        ]);
        let reader = ArchiveReader::with_fetcher(fetcher, &config(5));

        let archive = reader.load("ws", &group()).await.unwrap();
        assert_eq!(archive.messages.len(), 2);

        let urls = reader.fetcher.urls.lock();
        assert_eq!(urls.len(), 3);
        assert_eq!(urls[0], "https://files/ws/blob-1");
    }

    #[tokio::test]
    async fn test_load_gives_up_after_budget() {
        let fetcher = ScriptedFetcher::new(
            (0..10).map(|_| Err(FetchError::Status(500))).collect(),
        );
        let reader = ArchiveReader::with_fetcher(fetcher, &config(5));

        let err = reader.load("ws", &group()).await.unwrap_err();
        match err {
            CoreError::ArchiveFetch { attempts, .. } => assert_eq!(attempts, 5),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(reader.fetcher.urls.lock().len(), 5);
    }

    #[tokio::test]
    async fn test_group_patches_are_folded_in() {
        use crate::models::{Patch, PatchData};

        let archive = StaticArchive::new();
        archive.insert("blob-1", parse_archive("blob-1", BLOB).unwrap());

        let mut group = group();
        let later = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        group.patches = vec![
            Patch::new(
                "card-1",
                "m1",
                PatchData::Update {
                    content: Some("edited".to_string()),
                    extra: None,
                    message_type: None,
                },
                "alice",
                later,
            ),
            Patch::new("card-1", "m2", PatchData::Remove, "bob", later),
        ];

        let messages = load_group_messages(&archive, &group).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "edited");
        assert_eq!(messages[0].edited, Some(later));
        assert_eq!(archive.loads(), 1);
    }

    #[tokio::test]
    async fn test_parse_error_is_not_retried() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok("not: [valid".to_string()),
            Ok(BLOB.to_string()),
        ]);
        let reader = ArchiveReader::with_fetcher(fetcher, &config(5));

        assert!(reader.load_group(&group()).await.is_err());
        assert_eq!(reader.fetcher.urls.lock().len(), 1);
    }
}
