use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BlobId, CardId, MessageId, SocialId};
use crate::cache::Keyed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    #[default]
    Message,
    Activity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub reaction: String,
    pub creator: SocialId,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedFile {
    pub blob_id: BlobId,
    pub mime_type: String,
    pub file_name: String,
    pub size: u64,
    pub creator: SocialId,
    pub created: DateTime<Utc>,
}

/// Summary of the reply thread hanging off a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub thread_id: CardId,
    pub thread_type: String,
    pub replies_count: u32,
    pub last_reply: Option<DateTime<Utc>>,
    /// Time of the newest patch that moved `replies_count`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counted_at: Option<DateTime<Utc>>,
    /// Creators of the counter patches stamped `counted_at`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub counted_by: Vec<SocialId>,
}

impl ThreadSummary {
    /// Whether a counter patch from `creator` at `created` is already in `replies_count`.
    ///
    /// Older patches never reach this check: they are rejected as stale.
    pub fn has_counted(&self, creator: &str, created: DateTime<Utc>) -> bool {
        self.counted_at == Some(created) && self.counted_by.iter().any(|c| c == creator)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub card_id: CardId,
    #[serde(default, rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
    pub creator: SocialId,
    pub created: DateTime<Utc>,
    /// Set when the content was replaced by an update patch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<DateTime<Utc>>,
    /// Timestamp of the newest patch applied to this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub files: Vec<AttachedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadSummary>,
}

impl Message {
    pub fn new(
        id: impl Into<MessageId>,
        card_id: impl Into<CardId>,
        content: impl Into<String>,
        creator: impl Into<SocialId>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            card_id: card_id.into(),
            message_type: MessageType::Message,
            content: content.into(),
            extra: None,
            creator: creator.into(),
            created,
            edited: None,
            modified: None,
            reactions: Vec::new(),
            files: Vec::new(),
            thread: None,
        }
    }

    /// Time of the last change recorded on this message.
    pub fn last_mutation(&self) -> DateTime<Utc> {
        self.modified.unwrap_or(self.created)
    }

    pub fn has_reaction(&self, reaction: &str, creator: &str) -> bool {
        self.reactions
            .iter()
            .any(|r| r.reaction == reaction && r.creator == creator)
    }

    pub fn has_file(&self, blob_id: &str) -> bool {
        self.files.iter().any(|f| f.blob_id == blob_id)
    }
}

impl Keyed for Message {
    type Key = MessageId;

    fn key(&self) -> MessageId {
        self.id.clone()
    }
}
