//! In-memory `HotStore` used by tests and the replay tool.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::params::{
    FindCollaboratorsParams, FindGroupsParams, FindLabelsParams, FindMessagesParams,
    FindNotificationContextsParams, FindNotificationsParams, GroupOrderBy,
};
use super::HotStore;
use crate::error::{CoreError, Result};
use crate::models::{
    Collaborator, Label, Message, MessagesGroup, Notification, NotificationContext,
};

#[derive(Default)]
struct StoreData {
    messages: Vec<Message>,
    groups: Vec<MessagesGroup>,
    notifications: Vec<Notification>,
    contexts: Vec<NotificationContext>,
    labels: Vec<Label>,
    collaborators: Vec<Collaborator>,
}

#[derive(Default)]
pub struct InMemoryStore {
    data: RwLock<StoreData>,
    find_calls: AtomicUsize,
    failing: AtomicBool,
}

fn take_limit<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of find calls served so far, failed ones included.
    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    /// Make every subsequent find fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn begin_find(&self) -> Result<()> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::store("store unavailable"));
        }
        Ok(())
    }

    // ===== Mutations =====

    pub fn insert_message(&self, message: Message) {
        let mut data = self.data.write();
        data.messages.retain(|m| m.id != message.id);
        data.messages.push(message);
    }

    pub fn remove_message(&self, id: &str) {
        self.data.write().messages.retain(|m| m.id != id);
    }

    pub fn insert_group(&self, group: MessagesGroup) {
        let mut data = self.data.write();
        data.groups.retain(|g| g.blob_id != group.blob_id);
        data.groups.push(group);
    }

    pub fn insert_notification(&self, notification: Notification) {
        let mut data = self.data.write();
        data.notifications.retain(|n| n.id != notification.id);
        data.notifications.push(notification);
    }

    pub fn remove_notification(&self, id: &str) {
        self.data.write().notifications.retain(|n| n.id != id);
    }

    pub fn set_notification_read(&self, id: &str, read: bool) {
        let mut data = self.data.write();
        if let Some(notification) = data.notifications.iter_mut().find(|n| n.id == id) {
            notification.read = read;
        }
    }

    /// Stored contexts never carry notifications; they are attached per query.
    pub fn insert_context(&self, mut context: NotificationContext) {
        context.notifications = None;
        let mut data = self.data.write();
        data.contexts.retain(|c| c.id != context.id);
        data.contexts.push(context);
    }

    pub fn remove_context(&self, id: &str) {
        let mut data = self.data.write();
        data.contexts.retain(|c| c.id != id);
        data.notifications.retain(|n| n.context_id != id);
    }

    pub fn insert_label(&self, label: Label) {
        self.data.write().labels.push(label);
    }

    pub fn remove_label(&self, label_id: &str, card_id: &str, account: &str) {
        self.data.write().labels.retain(|l| {
            !(l.label_id == label_id && l.card_id == card_id && l.account == account)
        });
    }

    pub fn insert_collaborator(&self, collaborator: Collaborator) {
        self.data.write().collaborators.push(collaborator);
    }

    pub fn remove_collaborator(&self, card_id: &str, account: &str) {
        self.data
            .write()
            .collaborators
            .retain(|c| !(c.card_id == card_id && c.account == account));
    }
}

#[async_trait]
impl HotStore for InMemoryStore {
    async fn find_messages(&self, params: &FindMessagesParams) -> Result<Vec<Message>> {
        self.begin_find()?;
        let data = self.data.read();
        let mut found: Vec<Message> = data
            .messages
            .iter()
            .filter(|m| params.matches(m))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            params
                .order
                .apply(a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)))
        });
        Ok(take_limit(found, params.limit))
    }

    async fn find_groups(&self, params: &FindGroupsParams) -> Result<Vec<MessagesGroup>> {
        self.begin_find()?;
        let data = self.data.read();
        let mut found: Vec<MessagesGroup> = data
            .groups
            .iter()
            .filter(|g| params.matches(g))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            let ordering = match params.order_by {
                GroupOrderBy::FromDate => a.from_date.cmp(&b.from_date),
                GroupOrderBy::ToDate => a.to_date.cmp(&b.to_date),
            };
            params.order.apply(ordering)
        });
        Ok(take_limit(found, params.limit))
    }

    async fn find_notifications(
        &self,
        params: &FindNotificationsParams,
    ) -> Result<Vec<Notification>> {
        self.begin_find()?;
        let data = self.data.read();
        let mut found: Vec<Notification> = data
            .notifications
            .iter()
            .filter(|n| params.matches(n))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            params
                .order
                .apply(a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)))
        });
        Ok(take_limit(found, params.limit))
    }

    async fn find_notification_contexts(
        &self,
        params: &FindNotificationContextsParams,
    ) -> Result<Vec<NotificationContext>> {
        self.begin_find()?;
        let data = self.data.read();
        let mut found: Vec<NotificationContext> = data
            .contexts
            .iter()
            .filter(|c| params.matches_fields(c))
            .map(|c| {
                let mut context = c.clone();
                if let Some(options) = &params.notifications {
                    let mut attached: Vec<Notification> = data
                        .notifications
                        .iter()
                        .filter(|n| n.context_id == context.id && options.matches(n))
                        .cloned()
                        .collect();
                    attached.sort_by(|a, b| options.compare(a, b));
                    context.notifications = Some(take_limit(attached, options.limit));
                }
                context
            })
            .filter(|c| params.matches(c))
            .collect();
        found.sort_by(|a, b| {
            params
                .order
                .apply(a.last_update.cmp(&b.last_update).then_with(|| a.id.cmp(&b.id)))
        });
        Ok(take_limit(found, params.limit))
    }

    async fn find_labels(&self, params: &FindLabelsParams) -> Result<Vec<Label>> {
        self.begin_find()?;
        let data = self.data.read();
        let mut found: Vec<Label> = data
            .labels
            .iter()
            .filter(|l| params.matches(l))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created.cmp(&b.created));
        Ok(take_limit(found, params.limit))
    }

    async fn find_collaborators(
        &self,
        params: &FindCollaboratorsParams,
    ) -> Result<Vec<Collaborator>> {
        self.begin_find()?;
        let data = self.data.read();
        let found: Vec<Collaborator> = data
            .collaborators
            .iter()
            .filter(|c| params.matches(c))
            .cloned()
            .collect();
        Ok(take_limit(found, params.limit))
    }
}
