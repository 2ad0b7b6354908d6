use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::Message;
use super::{AccountId, BlobId, CardId, ContextId, MessageId, NotificationId};
use crate::cache::Keyed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationType {
    #[default]
    Message,
    Reaction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub context_id: ContextId,
    pub card_id: CardId,
    pub account: AccountId,
    #[serde(default, rename = "type")]
    pub notification_type: NotificationType,
    pub read: bool,
    pub message_id: MessageId,
    pub message_created: DateTime<Utc>,
    /// Archive blob holding the message, when it has already been rolled into a group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_id: Option<BlobId>,
    pub created: DateTime<Utc>,
    /// Denormalized copy of the message, present when the query asked for it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

impl Keyed for Notification {
    type Key = NotificationId;

    fn key(&self) -> NotificationId {
        self.id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationContext {
    pub id: ContextId,
    pub card_id: CardId,
    pub account: AccountId,
    pub last_update: DateTime<Utc>,
    pub last_view: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_notify: Option<DateTime<Utc>>,
    /// Attached notifications, present when the query asked for them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<Vec<Notification>>,
}

impl NotificationContext {
    pub fn notification_count(&self) -> usize {
        self.notifications.as_ref().map_or(0, Vec::len)
    }
}

impl Keyed for NotificationContext {
    type Key = ContextId;

    fn key(&self) -> ContextId {
        self.id.clone()
    }
}
