//! Find parameters for every entity, shared by the store and the live queries.
//!
//! Each params type carries a `matches` predicate mirroring its store-side
//! filter, so an incoming event can be checked against a query without a
//! round trip.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    AccountId, BlobId, CardId, Collaborator, ContextId, Label, LabelId, Message, MessageId,
    Notification, NotificationContext, NotificationId, NotificationType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    /// Apply this order to an ascending comparison.
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Ascending => ordering,
            Self::Descending => ordering.reverse(),
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

/// Range filter on a timestamp. All present bounds must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub less: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub less_or_equal: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greater: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greater_or_equal: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn before(date: DateTime<Utc>) -> Self {
        Self {
            less: Some(date),
            ..Self::default()
        }
    }

    pub fn after(date: DateTime<Utc>) -> Self {
        Self {
            greater: Some(date),
            ..Self::default()
        }
    }

    pub fn at_or_before(date: DateTime<Utc>) -> Self {
        Self {
            less_or_equal: Some(date),
            ..Self::default()
        }
    }

    pub fn at_or_after(date: DateTime<Utc>) -> Self {
        Self {
            greater_or_equal: Some(date),
            ..Self::default()
        }
    }

    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        self.less.map_or(true, |d| date < d)
            && self.less_or_equal.map_or(true, |d| date <= d)
            && self.greater.map_or(true, |d| date > d)
            && self.greater_or_equal.map_or(true, |d| date >= d)
    }

    pub fn has_lower_bound(&self) -> bool {
        self.greater.is_some() || self.greater_or_equal.is_some()
    }

    pub fn has_upper_bound(&self) -> bool {
        self.less.is_some() || self.less_or_equal.is_some()
    }

    /// Combine two ranges keeping the tighter bound on each side.
    pub fn intersect(&self, other: &DateRange) -> DateRange {
        fn tighter(
            a: Option<DateTime<Utc>>,
            b: Option<DateTime<Utc>>,
            pick: fn(DateTime<Utc>, DateTime<Utc>) -> DateTime<Utc>,
        ) -> Option<DateTime<Utc>> {
            match (a, b) {
                (Some(a), Some(b)) => Some(pick(a, b)),
                (a, b) => a.or(b),
            }
        }

        DateRange {
            less: tighter(self.less, other.less, std::cmp::min),
            less_or_equal: tighter(self.less_or_equal, other.less_or_equal, std::cmp::min),
            greater: tighter(self.greater, other.greater, std::cmp::max),
            greater_or_equal: tighter(
                self.greater_or_equal,
                other.greater_or_equal,
                std::cmp::max,
            ),
        }
    }

    /// Whether any date inside `from..=to` could satisfy this range.
    pub fn overlaps(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.less.map_or(true, |d| from < d)
            && self.less_or_equal.map_or(true, |d| from <= d)
            && self.greater.map_or(true, |d| to > d)
            && self.greater_or_equal.map_or(true, |d| to >= d)
    }
}

fn range_contains(range: &Option<DateRange>, date: DateTime<Utc>) -> bool {
    range.as_ref().map_or(true, |r| r.contains(date))
}

fn field_matches<T: PartialEq + ?Sized>(filter: Option<&T>, value: &T) -> bool {
    filter.map_or(true, |f| f == value)
}

// ===== Messages =====

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindMessagesParams {
    #[serde(default)]
    pub id: Option<MessageId>,
    #[serde(default)]
    pub card_id: Option<CardId>,
    #[serde(default)]
    pub created: Option<DateRange>,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl FindMessagesParams {
    pub fn for_card(card_id: impl Into<CardId>) -> Self {
        Self {
            card_id: Some(card_id.into()),
            ..Self::default()
        }
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_created(mut self, created: DateRange) -> Self {
        self.created = Some(created);
        self
    }

    pub fn matches(&self, message: &Message) -> bool {
        field_matches(self.id.as_deref(), message.id.as_str())
            && field_matches(self.card_id.as_deref(), message.card_id.as_str())
            && range_contains(&self.created, message.created)
    }
}

// ===== Groups =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupOrderBy {
    #[default]
    FromDate,
    ToDate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindGroupsParams {
    pub card_id: CardId,
    #[serde(default)]
    pub blob_id: Option<BlobId>,
    #[serde(default)]
    pub from_date: Option<DateRange>,
    #[serde(default)]
    pub to_date: Option<DateRange>,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub order_by: GroupOrderBy,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl FindGroupsParams {
    pub fn for_card(card_id: impl Into<CardId>) -> Self {
        Self {
            card_id: card_id.into(),
            ..Self::default()
        }
    }

    pub fn matches(&self, group: &crate::models::MessagesGroup) -> bool {
        self.card_id == group.card_id
            && field_matches(self.blob_id.as_deref(), group.blob_id.as_str())
            && range_contains(&self.from_date, group.from_date)
            && range_contains(&self.to_date, group.to_date)
    }
}

// ===== Notifications =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindNotificationsParams {
    #[serde(default)]
    pub id: Option<NotificationId>,
    #[serde(default)]
    pub context_id: Option<ContextId>,
    #[serde(default)]
    pub account: Option<AccountId>,
    #[serde(default)]
    pub card_id: Option<CardId>,
    #[serde(default, rename = "type")]
    pub notification_type: Option<NotificationType>,
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default)]
    pub created: Option<DateRange>,
    #[serde(default = "descending")]
    pub order: SortOrder,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Hydrate each notification's message
    #[serde(default)]
    pub message: bool,
}

fn descending() -> SortOrder {
    SortOrder::Descending
}

impl Default for FindNotificationsParams {
    fn default() -> Self {
        Self {
            id: None,
            context_id: None,
            account: None,
            card_id: None,
            notification_type: None,
            read: None,
            created: None,
            order: SortOrder::Descending,
            limit: None,
            message: false,
        }
    }
}

impl FindNotificationsParams {
    pub fn for_account(account: impl Into<AccountId>) -> Self {
        Self {
            account: Some(account.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, notification: &Notification) -> bool {
        field_matches(self.id.as_deref(), notification.id.as_str())
            && field_matches(self.context_id.as_deref(), notification.context_id.as_str())
            && field_matches(self.account.as_deref(), notification.account.as_str())
            && field_matches(self.card_id.as_deref(), notification.card_id.as_str())
            && field_matches(
                self.notification_type.as_ref(),
                &notification.notification_type,
            )
            && field_matches(self.read.as_ref(), &notification.read)
            && range_contains(&self.created, notification.created)
    }
}

/// Which notifications to attach to each returned context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsOptions {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default = "descending")]
    pub order: SortOrder,
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default, rename = "type")]
    pub notification_type: Option<NotificationType>,
    /// Hydrate each attached notification's message
    #[serde(default)]
    pub message: bool,
}

impl Default for NotificationsOptions {
    fn default() -> Self {
        Self {
            limit: None,
            order: SortOrder::Descending,
            read: None,
            notification_type: None,
            message: false,
        }
    }
}

impl NotificationsOptions {
    pub fn matches(&self, notification: &Notification) -> bool {
        field_matches(self.read.as_ref(), &notification.read)
            && field_matches(
                self.notification_type.as_ref(),
                &notification.notification_type,
            )
    }

    /// A read/type filter makes contexts without any matching notification invisible.
    pub fn requires_notifications(&self) -> bool {
        self.read.is_some() || self.notification_type.is_some()
    }

    pub fn compare(&self, a: &Notification, b: &Notification) -> Ordering {
        self.order
            .apply(a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindNotificationContextsParams {
    #[serde(default)]
    pub id: Option<ContextId>,
    #[serde(default)]
    pub card_id: Option<CardId>,
    #[serde(default)]
    pub account: Option<AccountId>,
    #[serde(default)]
    pub last_update: Option<DateRange>,
    #[serde(default = "descending")]
    pub order: SortOrder,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub notifications: Option<NotificationsOptions>,
}

impl Default for FindNotificationContextsParams {
    fn default() -> Self {
        Self {
            id: None,
            card_id: None,
            account: None,
            last_update: None,
            order: SortOrder::Descending,
            limit: None,
            notifications: None,
        }
    }
}

impl FindNotificationContextsParams {
    pub fn for_account(account: impl Into<AccountId>) -> Self {
        Self {
            account: Some(account.into()),
            ..Self::default()
        }
    }

    /// Field filters only, ignoring attached notifications.
    pub fn matches_fields(&self, context: &NotificationContext) -> bool {
        field_matches(self.id.as_deref(), context.id.as_str())
            && field_matches(self.card_id.as_deref(), context.card_id.as_str())
            && field_matches(self.account.as_deref(), context.account.as_str())
            && range_contains(&self.last_update, context.last_update)
    }

    pub fn matches(&self, context: &NotificationContext) -> bool {
        if !self.matches_fields(context) {
            return false;
        }
        match &self.notifications {
            Some(options) if options.requires_notifications() => {
                context.notification_count() > 0
            }
            _ => true,
        }
    }
}

// ===== Labels & collaborators =====

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindLabelsParams {
    #[serde(default)]
    pub label_id: Option<LabelId>,
    #[serde(default)]
    pub card_id: Option<CardId>,
    #[serde(default)]
    pub card_type: Option<String>,
    #[serde(default)]
    pub account: Option<AccountId>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl FindLabelsParams {
    pub fn matches(&self, label: &Label) -> bool {
        field_matches(self.label_id.as_deref(), label.label_id.as_str())
            && field_matches(self.card_id.as_deref(), label.card_id.as_str())
            && field_matches(self.card_type.as_deref(), label.card_type.as_str())
            && field_matches(self.account.as_deref(), label.account.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindCollaboratorsParams {
    #[serde(default)]
    pub card_id: Option<CardId>,
    #[serde(default)]
    pub account: Option<AccountId>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl FindCollaboratorsParams {
    pub fn matches(&self, collaborator: &Collaborator) -> bool {
        field_matches(self.card_id.as_deref(), collaborator.card_id.as_str())
            && field_matches(self.account.as_deref(), collaborator.account.as_str())
    }
}
