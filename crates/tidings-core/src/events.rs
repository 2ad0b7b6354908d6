use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    AccountId, CardId, Collaborator, ContextId, Label, LabelId, Message, MessagesGroup,
    Notification, NotificationContext, NotificationId, Patch,
};

/// Mutation events produced by the write path and broadcast to live queries.
///
/// Every variant carries the identity fields a query needs to decide whether
/// the event concerns it, so matching never requires a store round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LiveEvent {
    // ===== Messages =====
    MessageCreated {
        message: Message,
    },
    /// Also carries removals, as a `PatchData::Remove` patch.
    #[serde(rename_all = "camelCase")]
    PatchApplied {
        card_id: CardId,
        patch: Patch,
    },
    MessagesGroupCreated {
        group: MessagesGroup,
    },

    // ===== Notifications =====
    NotificationCreated {
        notification: Notification,
    },
    #[serde(rename_all = "camelCase")]
    NotificationsRemoved {
        context_id: ContextId,
        account: AccountId,
        ids: Vec<NotificationId>,
    },
    /// Read state change. `ids: None` targets every notification of the
    /// context created at or before `until` (or all of them without `until`).
    #[serde(rename_all = "camelCase")]
    NotificationUpdated {
        context_id: ContextId,
        account: AccountId,
        #[serde(default)]
        ids: Option<Vec<NotificationId>>,
        #[serde(default)]
        until: Option<DateTime<Utc>>,
        read: bool,
    },

    // ===== Notification contexts =====
    NotificationContextCreated {
        context: NotificationContext,
    },
    #[serde(rename_all = "camelCase")]
    NotificationContextUpdated {
        context_id: ContextId,
        account: AccountId,
        #[serde(default)]
        last_update: Option<DateTime<Utc>>,
        #[serde(default)]
        last_view: Option<DateTime<Utc>>,
        #[serde(default)]
        last_notify: Option<DateTime<Utc>>,
    },
    #[serde(rename_all = "camelCase")]
    NotificationContextRemoved {
        context_id: ContextId,
        account: AccountId,
    },

    // ===== Labels & collaborators =====
    LabelCreated {
        label: Label,
    },
    #[serde(rename_all = "camelCase")]
    LabelRemoved {
        label_id: LabelId,
        card_id: CardId,
        account: AccountId,
    },
    #[serde(rename_all = "camelCase")]
    CollaboratorsAdded {
        card_id: CardId,
        card_type: String,
        accounts: Vec<AccountId>,
    },
    #[serde(rename_all = "camelCase")]
    CollaboratorsRemoved {
        card_id: CardId,
        accounts: Vec<AccountId>,
    },

    // ===== Cards =====
    #[serde(rename_all = "camelCase")]
    CardRemoved {
        card_id: CardId,
    },
    #[serde(rename_all = "camelCase")]
    CardTypeUpdated {
        card_id: CardId,
        card_type: String,
    },
}

impl LiveEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageCreated { .. } => "message_created",
            Self::PatchApplied { .. } => "patch_applied",
            Self::MessagesGroupCreated { .. } => "messages_group_created",
            Self::NotificationCreated { .. } => "notification_created",
            Self::NotificationsRemoved { .. } => "notifications_removed",
            Self::NotificationUpdated { .. } => "notification_updated",
            Self::NotificationContextCreated { .. } => "notification_context_created",
            Self::NotificationContextUpdated { .. } => "notification_context_updated",
            Self::NotificationContextRemoved { .. } => "notification_context_removed",
            Self::LabelCreated { .. } => "label_created",
            Self::LabelRemoved { .. } => "label_removed",
            Self::CollaboratorsAdded { .. } => "collaborators_added",
            Self::CollaboratorsRemoved { .. } => "collaborators_removed",
            Self::CardRemoved { .. } => "card_removed",
            Self::CardTypeUpdated { .. } => "card_type_updated",
        }
    }
}
