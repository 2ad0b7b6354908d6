//! Storage find contract consumed by the live queries.

pub mod memory;
pub mod params;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Collaborator, Label, Message, MessagesGroup, Notification, NotificationContext,
};

pub use memory::InMemoryStore;
pub use params::{
    DateRange, FindCollaboratorsParams, FindGroupsParams, FindLabelsParams, FindMessagesParams,
    FindNotificationContextsParams, FindNotificationsParams, GroupOrderBy, NotificationsOptions,
    SortOrder,
};

/// The hot relational store. Implementations return items already filtered,
/// ordered and limited according to the params.
///
/// Notifications come back without their `message`; hydration happens in the
/// query layer.
#[async_trait]
pub trait HotStore: Send + Sync {
    async fn find_messages(&self, params: &FindMessagesParams) -> Result<Vec<Message>>;

    async fn find_groups(&self, params: &FindGroupsParams) -> Result<Vec<MessagesGroup>>;

    async fn find_notifications(
        &self,
        params: &FindNotificationsParams,
    ) -> Result<Vec<Notification>>;

    async fn find_notification_contexts(
        &self,
        params: &FindNotificationContextsParams,
    ) -> Result<Vec<NotificationContext>>;

    async fn find_labels(&self, params: &FindLabelsParams) -> Result<Vec<Label>>;

    async fn find_collaborators(
        &self,
        params: &FindCollaboratorsParams,
    ) -> Result<Vec<Collaborator>>;
}
