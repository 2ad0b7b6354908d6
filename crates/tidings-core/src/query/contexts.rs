//! Notification-context window, ordered by `last_update`.
//!
//! When the query asks for attached notifications, each context carries the
//! list selected by its [`NotificationsOptions`]. Under a read or type filter
//! a context with an empty list no longer belongs to the result.

#![deny(clippy::wildcard_enum_match_arm)]

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::hydrate::{hydrate, patch_hydrated};
use super::live::{Query, QueryEngine};
use super::paging::{self, Direction};
use super::QueryContext;
use crate::cache::OrderedResultCache;
use crate::error::Result;
use crate::events::LiveEvent;
use crate::models::{ContextId, Notification, NotificationContext, NotificationId, Patch};
use crate::store::{FindNotificationContextsParams, NotificationsOptions, SortOrder};

pub type ContextsQuery = Query<ContextWindow>;

type Cache = OrderedResultCache<NotificationContext>;

pub struct ContextWindow {
    ctx: QueryContext,
    params: FindNotificationContextsParams,
    limit: usize,
}

impl ContextWindow {
    pub fn new(ctx: QueryContext, params: FindNotificationContextsParams) -> Self {
        let limit = params.limit.unwrap_or(ctx.config.default_limit).max(1);
        Self { ctx, params, limit }
    }

    fn options(&self) -> Option<&NotificationsOptions> {
        self.params.notifications.as_ref()
    }

    fn start(&self) -> Direction {
        paging::initial_direction(self.params.order, self.params.last_update.as_ref())
    }

    fn compare(&self, a: &NotificationContext, b: &NotificationContext) -> Ordering {
        self.params
            .order
            .apply(a.last_update.cmp(&b.last_update).then_with(|| a.id.cmp(&b.id)))
    }

    fn at_live_edge(&self, cache: &Cache) -> bool {
        match self.params.order {
            SortOrder::Ascending => cache.is_tail(),
            SortOrder::Descending => cache.is_head(),
        }
    }

    async fn hydrate_lists(&self, contexts: &mut [NotificationContext]) {
        if !self.options().map_or(false, |o| o.message) {
            return;
        }
        for context in contexts.iter_mut() {
            if let Some(list) = context.notifications.as_mut() {
                hydrate(&self.ctx, list).await;
            }
        }
    }

    async fn fetch_page(
        &self,
        cache: &Cache,
        direction: Direction,
    ) -> Result<(Vec<NotificationContext>, bool)> {
        let chrono = direction.chrono(self.params.order);
        let edge = paging::edge(cache, direction).map(|c| (c.last_update, c.id.as_str()));
        let found = paging::fetch_past(
            chrono,
            edge,
            paging::lookahead(self.limit),
            |c: &NotificationContext| (c.last_update, c.id.as_str()),
            |range, limit| {
                let mut params = self.params.clone();
                params.order = chrono.order();
                params.limit = Some(limit);
                params.last_update = paging::narrow(self.params.last_update.as_ref(), range);
                async move { self.ctx.store.find_notification_contexts(&params).await }
            },
        )
        .await?;

        let (mut page, boundary) = paging::trim_lookahead(found, self.limit);
        self.hydrate_lists(&mut page).await;
        Ok((page, boundary))
    }

    /// Load one context with its notification list as the query would see it.
    async fn fetch_context(&self, id: &str) -> Result<Option<NotificationContext>> {
        let mut params = self.params.clone();
        params.id = Some(id.to_string());
        params.limit = Some(1);

        let mut found = self.ctx.store.find_notification_contexts(&params).await?;
        self.hydrate_lists(&mut found).await;
        Ok(found.into_iter().next())
    }

    async fn reinit(&self, cache: &mut Cache) {
        let direction = self.start();
        let mut fresh = OrderedResultCache::new();
        paging::mark_start(&mut fresh, direction);

        match self.fetch_page(&fresh, direction).await {
            Ok((page, boundary)) => {
                paging::extend(&mut fresh, direction, page, boundary);
                tracing::debug!(
                    account = ?self.params.account,
                    items = fresh.len(),
                    "context window reinitialized"
                );
                *cache = fresh;
            }
            Err(e) => {
                tracing::error!(account = ?self.params.account, "context reinit failed: {}", e);
            }
        }
    }

    async fn settle_shrink(&self, cache: &mut Cache, len_before: usize) {
        if paging::needs_reinit(
            len_before,
            cache.len(),
            self.limit,
            cache.is_head(),
            cache.is_tail(),
        ) {
            self.reinit(cache).await;
        }
    }

    async fn remove_context(&self, cache: &mut Cache, id: &ContextId) -> bool {
        let len_before = cache.len();
        if cache.delete(id).is_none() {
            return false;
        }
        self.settle_shrink(cache, len_before).await;
        true
    }

    /// Replace a cached context with a fresh copy from the store, or drop it
    /// when it no longer matches.
    async fn refetch_context(&self, cache: &mut Cache, id: &ContextId) -> bool {
        match self.fetch_context(id).await {
            Ok(Some(context)) => cache.update(context),
            Ok(None) => self.remove_context(cache, id).await,
            Err(e) => {
                tracing::warn!(context_id = %id, "context refetch failed: {}", e);
                false
            }
        }
    }

    fn account_matches(&self, account: &str) -> bool {
        self.params.account.as_deref().map_or(true, |a| a == account)
    }

    /// Rewrite the notification list of a cached context, then settle whether
    /// the context still belongs to the window.
    async fn edit_list<F>(&self, cache: &mut Cache, id: &ContextId, edit: F) -> bool
    where
        F: FnOnce(&mut Vec<Notification>) -> bool + Send,
    {
        let Some(options) = self.options() else {
            return false;
        };
        let Some(current) = cache.get(id) else {
            return false;
        };
        let mut next = current.clone();
        let list = next.notifications.get_or_insert_with(Vec::new);
        let was_full = options.limit.map_or(false, |l| list.len() >= l);
        if !edit(&mut *list) {
            return false;
        }

        if options.requires_notifications() && list.is_empty() {
            return self.remove_context(cache, id).await;
        }
        let now_short = options.limit.map_or(false, |l| list.len() < l);
        if was_full && now_short {
            // More notifications may exist beyond the trimmed list.
            return self.refetch_context(cache, id).await;
        }
        cache.update(next)
    }

    // ===== Events =====

    fn on_context_created(&self, cache: &mut Cache, context: &NotificationContext) -> bool {
        if !self.params.matches_fields(context) || !self.at_live_edge(cache) {
            return false;
        }
        let mut item = context.clone();
        if self.options().is_some() && item.notifications.is_none() {
            item.notifications = Some(Vec::new());
        }
        if !self.params.matches(&item) {
            return false;
        }
        match self.params.order {
            SortOrder::Ascending => cache.push(item),
            SortOrder::Descending => cache.unshift(item),
        }
    }

    async fn on_context_updated(
        &self,
        cache: &mut Cache,
        id: &ContextId,
        last_update: Option<DateTime<Utc>>,
        last_view: Option<DateTime<Utc>>,
        last_notify: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(current) = cache.get(id) else {
            // A context bumped to the live edge from outside the window.
            if last_update.is_none() || !self.at_live_edge(cache) {
                return false;
            }
            return match self.fetch_context(id).await {
                Ok(Some(context)) if self.params.matches(&context) => {
                    cache.push(context);
                    cache.sort_by(|a, b| self.compare(a, b));
                    true
                }
                Ok(Some(_)) | Ok(None) => false,
                Err(e) => {
                    tracing::warn!(context_id = %id, "context fetch failed: {}", e);
                    false
                }
            };
        };

        let mut next = current.clone();
        if let Some(last_view) = last_view {
            next.last_view = last_view;
        }
        if let Some(last_notify) = last_notify {
            next.last_notify = Some(last_notify);
        }
        let moved = last_update.map_or(false, |u| u != next.last_update);
        if let Some(last_update) = last_update {
            next.last_update = last_update;
        }

        if !self.params.matches_fields(&next) {
            return self.remove_context(cache, id).await;
        }
        let changed = cache.update(next);
        if moved {
            cache.sort_by(|a, b| self.compare(a, b));
        }
        changed
    }

    async fn on_notification_created(
        &self,
        cache: &mut Cache,
        notification: &Notification,
    ) -> bool {
        let Some(options) = self.options() else {
            return false;
        };
        if !options.matches(notification) || !cache.contains(&notification.context_id) {
            return false;
        }

        let mut batch = vec![notification.clone()];
        if options.message {
            hydrate(&self.ctx, &mut batch).await;
        }
        let limit = options.limit;
        let sorting = options.clone();
        self.edit_list(cache, &notification.context_id, move |list| {
            if list.iter().any(|n| n.id == notification.id) {
                return false;
            }
            list.extend(batch);
            list.sort_by(|a, b| sorting.compare(a, b));
            if let Some(limit) = limit {
                list.truncate(limit);
            }
            true
        })
        .await
    }

    async fn on_notifications_removed(
        &self,
        cache: &mut Cache,
        context_id: &ContextId,
        ids: &[NotificationId],
    ) -> bool {
        self.edit_list(cache, context_id, |list| {
            let before = list.len();
            list.retain(|n| !ids.contains(&n.id));
            list.len() != before
        })
        .await
    }

    async fn on_read_changed(
        &self,
        cache: &mut Cache,
        context_id: &ContextId,
        ids: Option<&[NotificationId]>,
        until: Option<DateTime<Utc>>,
        read: bool,
    ) -> bool {
        let Some(options) = self.options() else {
            return false;
        };
        let targeted = move |n: &Notification| {
            ids.map_or(true, |ids| ids.contains(&n.id)) && until.map_or(true, |u| n.created <= u)
        };

        if !cache.contains(context_id) {
            // Newly matching notifications can make an unseen context visible.
            if options.read == Some(read) {
                self.reinit(cache).await;
                return true;
            }
            return false;
        }

        match options.read {
            Some(wanted) if wanted != read => {
                self.edit_list(cache, context_id, |list| {
                    let before = list.len();
                    list.retain(|n| !targeted(n));
                    list.len() != before
                })
                .await
            }
            Some(_) => self.refetch_context(cache, context_id).await,
            None => {
                self.edit_list(cache, context_id, |list| {
                    let mut changed = false;
                    for n in list.iter_mut().filter(|n| targeted(n) && n.read != read) {
                        n.read = read;
                        changed = true;
                    }
                    changed
                })
                .await
            }
        }
    }

    fn on_patch(&self, cache: &mut Cache, patch: &Patch) -> bool {
        if !self.options().map_or(false, |o| o.message) {
            return false;
        }
        let patched: Vec<NotificationContext> = cache
            .iter()
            .filter_map(|context| {
                let mut next = context.clone();
                let list = next.notifications.as_mut()?;
                let mut changed = false;
                for notification in list.iter_mut() {
                    changed |= patch_hydrated(notification, patch);
                }
                changed.then_some(next)
            })
            .collect();
        let changed = !patched.is_empty();
        for next in patched {
            cache.update(next);
        }
        changed
    }

    async fn on_card_removed(&self, cache: &mut Cache, card_id: &str) -> bool {
        let len_before = cache.len();
        let removed = cache.retain(|c| c.card_id != card_id);
        if removed.is_empty() {
            return false;
        }
        self.settle_shrink(cache, len_before).await;
        true
    }
}

#[async_trait]
impl QueryEngine for ContextWindow {
    type Item = NotificationContext;
    type State = Cache;

    fn name(&self) -> &'static str {
        "contexts"
    }

    async fn initial(&self) -> Cache {
        let direction = self.start();
        let mut cache = OrderedResultCache::new();
        paging::mark_start(&mut cache, direction);

        match self.load_page(&mut cache, direction).await {
            Ok(()) => cache,
            Err(e) => {
                tracing::error!(account = ?self.params.account, "initial context fetch failed: {}", e);
                let mut closed = OrderedResultCache::new();
                closed.set_head(true);
                closed.set_tail(true);
                closed
            }
        }
    }

    fn cache(state: &Cache) -> &Cache {
        state
    }

    async fn load_page(&self, state: &mut Cache, direction: Direction) -> Result<()> {
        let (page, boundary) = self.fetch_page(state, direction).await?;
        let added = paging::extend(state, direction, page, boundary);
        tracing::debug!(?direction, added, boundary, "context page loaded");
        Ok(())
    }

    async fn apply_event(&self, state: &mut Cache, event: &LiveEvent) -> bool {
        match event {
            LiveEvent::NotificationContextCreated { context } => {
                self.on_context_created(state, context)
            }
            LiveEvent::NotificationContextUpdated {
                context_id,
                account,
                last_update,
                last_view,
                last_notify,
            } => {
                if !self.account_matches(account) {
                    return false;
                }
                self.on_context_updated(state, context_id, *last_update, *last_view, *last_notify)
                    .await
            }
            LiveEvent::NotificationContextRemoved {
                context_id,
                account,
            } => {
                if !self.account_matches(account) {
                    return false;
                }
                self.remove_context(state, context_id).await
            }
            LiveEvent::NotificationCreated { notification } => {
                if !self.account_matches(&notification.account) {
                    return false;
                }
                self.on_notification_created(state, notification).await
            }
            LiveEvent::NotificationsRemoved {
                context_id,
                account,
                ids,
            } => {
                if !self.account_matches(account) {
                    return false;
                }
                self.on_notifications_removed(state, context_id, ids).await
            }
            LiveEvent::NotificationUpdated {
                context_id,
                account,
                ids,
                until,
                read,
            } => {
                if !self.account_matches(account) {
                    return false;
                }
                self.on_read_changed(state, context_id, ids.as_deref(), *until, *read)
                    .await
            }
            LiveEvent::PatchApplied { patch, .. } => self.on_patch(state, patch),
            LiveEvent::CardRemoved { card_id } => self.on_card_removed(state, card_id).await,
            LiveEvent::MessageCreated { .. }
            | LiveEvent::MessagesGroupCreated { .. }
            | LiveEvent::LabelCreated { .. }
            | LiveEvent::LabelRemoved { .. }
            | LiveEvent::CollaboratorsAdded { .. }
            | LiveEvent::CollaboratorsRemoved { .. }
            | LiveEvent::CardTypeUpdated { .. } => false,
        }
    }
}
