//! Notification window, sourced from the hot store only.

#![deny(clippy::wildcard_enum_match_arm)]

use async_trait::async_trait;

use super::hydrate::{hydrate, patch_hydrated};
use super::live::{Query, QueryEngine};
use super::paging::{self, Direction};
use super::QueryContext;
use crate::cache::OrderedResultCache;
use crate::error::Result;
use crate::events::LiveEvent;
use crate::models::{Notification, NotificationId, Patch};
use crate::store::{FindNotificationsParams, SortOrder};

pub type NotificationsQuery = Query<NotificationWindow>;

pub struct NotificationWindow {
    ctx: QueryContext,
    params: FindNotificationsParams,
    limit: usize,
}

impl NotificationWindow {
    pub fn new(ctx: QueryContext, params: FindNotificationsParams) -> Self {
        let limit = params.limit.unwrap_or(ctx.config.default_limit).max(1);
        Self { ctx, params, limit }
    }

    fn start(&self) -> Direction {
        paging::initial_direction(self.params.order, self.params.created.as_ref())
    }

    /// Fetch one page and one extra item past the cache edge. Returns the page
    /// and whether it hit the boundary.
    async fn fetch_page(
        &self,
        cache: &OrderedResultCache<Notification>,
        direction: Direction,
    ) -> Result<(Vec<Notification>, bool)> {
        let chrono = direction.chrono(self.params.order);
        let edge = paging::edge(cache, direction).map(|n| (n.created, n.id.as_str()));
        let found = paging::fetch_past(
            chrono,
            edge,
            paging::lookahead(self.limit),
            |n: &Notification| (n.created, n.id.as_str()),
            |range, limit| {
                let mut params = self.params.clone();
                params.order = chrono.order();
                params.limit = Some(limit);
                params.created = paging::narrow(self.params.created.as_ref(), range);
                async move { self.ctx.store.find_notifications(&params).await }
            },
        )
        .await?;

        let (mut page, boundary) = paging::trim_lookahead(found, self.limit);
        if self.params.message {
            hydrate(&self.ctx, &mut page).await;
        }
        Ok((page, boundary))
    }

    /// Rebuild the window from scratch. On failure the current state is kept.
    async fn reinit(&self, cache: &mut OrderedResultCache<Notification>) {
        let direction = self.start();
        let mut fresh = OrderedResultCache::new();
        paging::mark_start(&mut fresh, direction);

        match self.fetch_page(&fresh, direction).await {
            Ok((page, boundary)) => {
                paging::extend(&mut fresh, direction, page, boundary);
                tracing::debug!(
                    account = ?self.params.account,
                    items = fresh.len(),
                    "notification window reinitialized"
                );
                *cache = fresh;
            }
            Err(e) => {
                tracing::error!(account = ?self.params.account, "notification reinit failed: {}", e);
            }
        }
    }

    async fn settle_shrink(&self, cache: &mut OrderedResultCache<Notification>, len_before: usize) {
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

    fn concerns(&self, context_id: &str, account: &str) -> bool {
        self.params.account.as_deref().map_or(true, |a| a == account)
            && self
                .params
                .context_id
                .as_deref()
                .map_or(true, |c| c == context_id)
    }

    // ===== Events =====

    async fn on_created(
        &self,
        cache: &mut OrderedResultCache<Notification>,
        notification: &Notification,
    ) -> bool {
        if !self.params.matches(notification) || cache.contains(&notification.id) {
            return false;
        }
        let live_edge = match self.params.order {
            SortOrder::Ascending => cache.is_tail(),
            SortOrder::Descending => cache.is_head(),
        };
        if !live_edge {
            return false;
        }

        let mut batch = vec![notification.clone()];
        if self.params.message {
            hydrate(&self.ctx, &mut batch).await;
        }
        let Some(item) = batch.pop() else {
            return false;
        };
        match self.params.order {
            SortOrder::Ascending => cache.push(item),
            SortOrder::Descending => cache.unshift(item),
        }
    }

    async fn on_removed(
        &self,
        cache: &mut OrderedResultCache<Notification>,
        ids: &[NotificationId],
    ) -> bool {
        let len_before = cache.len();
        let removed = ids.iter().filter(|id| cache.delete(id).is_some()).count();
        if removed == 0 {
            return false;
        }
        self.settle_shrink(cache, len_before).await;
        true
    }

    async fn on_read_changed(
        &self,
        cache: &mut OrderedResultCache<Notification>,
        context_id: &str,
        ids: Option<&[NotificationId]>,
        until: Option<chrono::DateTime<chrono::Utc>>,
        read: bool,
    ) -> bool {
        let targeted = |n: &Notification| {
            n.context_id == context_id
                && ids.map_or(true, |ids| ids.contains(&n.id))
                && until.map_or(true, |u| n.created <= u)
        };

        let flipped: Vec<Notification> = cache
            .iter()
            .filter(|n| targeted(n) && n.read != read)
            .map(|n| Notification {
                read,
                ..n.clone()
            })
            .collect();
        let mut changed = !flipped.is_empty();
        for next in flipped {
            cache.update(next);
        }

        match self.params.read {
            Some(wanted) if wanted != read => {
                let len_before = cache.len();
                let removed = cache.retain(|n| !(targeted(n) && n.read == read));
                if !removed.is_empty() {
                    self.settle_shrink(cache, len_before).await;
                    changed = true;
                }
            }
            Some(_) => {
                // Newly matching notifications outside the window cannot be placed locally.
                let unseen = ids.map_or(true, |ids| ids.iter().any(|id| !cache.contains(id)));
                if unseen {
                    self.reinit(cache).await;
                    changed = true;
                }
            }
            None => {}
        }
        changed
    }

    fn on_patch(&self, cache: &mut OrderedResultCache<Notification>, patch: &Patch) -> bool {
        if !self.params.message {
            return false;
        }
        let patched: Vec<Notification> = cache
            .iter()
            .filter(|n| n.message_id == patch.message_id)
            .filter_map(|n| {
                let mut next = n.clone();
                patch_hydrated(&mut next, patch).then_some(next)
            })
            .collect();
        let changed = !patched.is_empty();
        for next in patched {
            cache.update(next);
        }
        changed
    }

    async fn drop_where<F>(&self, cache: &mut OrderedResultCache<Notification>, doomed: F) -> bool
    where
        F: Fn(&Notification) -> bool + Send,
    {
        let len_before = cache.len();
        let removed = cache.retain(|n| !doomed(n));
        if removed.is_empty() {
            return false;
        }
        self.settle_shrink(cache, len_before).await;
        true
    }
}

#[async_trait]
impl QueryEngine for NotificationWindow {
    type Item = Notification;
    type State = OrderedResultCache<Notification>;

    fn name(&self) -> &'static str {
        "notifications"
    }

    async fn initial(&self) -> Self::State {
        let direction = self.start();
        let mut cache = OrderedResultCache::new();
        paging::mark_start(&mut cache, direction);

        match self.load_page(&mut cache, direction).await {
            Ok(()) => cache,
            Err(e) => {
                tracing::error!(
                    account = ?self.params.account,
                    "initial notification fetch failed: {}",
                    e
                );
                let mut closed = OrderedResultCache::new();
                closed.set_head(true);
                closed.set_tail(true);
                closed
            }
        }
    }

    fn cache(state: &Self::State) -> &OrderedResultCache<Notification> {
        state
    }

    async fn load_page(&self, state: &mut Self::State, direction: Direction) -> Result<()> {
        let (page, boundary) = self.fetch_page(state, direction).await?;
        let added = paging::extend(state, direction, page, boundary);
        tracing::debug!(?direction, added, boundary, "notification page loaded");
        Ok(())
    }

    async fn apply_event(&self, state: &mut Self::State, event: &LiveEvent) -> bool {
        match event {
            LiveEvent::NotificationCreated { notification } => {
                self.on_created(state, notification).await
            }
            LiveEvent::NotificationsRemoved {
                context_id,
                account,
                ids,
            } => {
                if !self.concerns(context_id, account) {
                    return false;
                }
                self.on_removed(state, ids).await
            }
            LiveEvent::NotificationUpdated {
                context_id,
                account,
                ids,
                until,
                read,
            } => {
                if !self.concerns(context_id, account) {
                    return false;
                }
                self.on_read_changed(state, context_id, ids.as_deref(), *until, *read)
                    .await
            }
            LiveEvent::NotificationContextRemoved {
                context_id,
                account,
            } => {
                if !self.concerns(context_id, account) {
                    return false;
                }
                self.drop_where(state, |n| n.context_id == *context_id).await
            }
            LiveEvent::CardRemoved { card_id } => {
                self.drop_where(state, |n| n.card_id == *card_id).await
            }
            LiveEvent::PatchApplied { patch, .. } => self.on_patch(state, patch),
            LiveEvent::MessageCreated { .. }
            | LiveEvent::MessagesGroupCreated { .. }
            | LiveEvent::NotificationContextCreated { .. }
            | LiveEvent::NotificationContextUpdated { .. }
            | LiveEvent::LabelCreated { .. }
            | LiveEvent::LabelRemoved { .. }
            | LiveEvent::CollaboratorsAdded { .. }
            | LiveEvent::CollaboratorsRemoved { .. }
            | LiveEvent::CardTypeUpdated { .. } => false,
        }
    }
}
