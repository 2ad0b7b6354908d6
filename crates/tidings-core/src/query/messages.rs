//! Message window: pages across the hot store and archived groups.
//!
//! Archived groups always hold older messages than the hot store, so a page
//! moving toward newer messages drains the archive tier before asking the
//! hot store, and a page moving toward older messages does the reverse.
//! Group descriptors are listed in batches, and a blob is only loaded when
//! its messages are needed to fill a page. Leftovers from a loaded blob wait
//! in a per-direction buffer for the next page.

#![deny(clippy::wildcard_enum_match_arm)]

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::live::{Query, QueryEngine};
use super::paging::{self, Chrono, Cursor, Direction};
use super::QueryContext;
use crate::archive::load_group_messages;
use crate::cache::OrderedResultCache;
use crate::error::Result;
use crate::events::LiveEvent;
use crate::models::{apply_patch, Message, MessagesGroup, Patch, PatchOutcome};
use crate::store::{FindGroupsParams, FindMessagesParams, GroupOrderBy, SortOrder};

pub type MessagesQuery = Query<MessageWindow>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Archive,
    Hot,
}

fn tier_order(chrono: Chrono) -> [Origin; 2] {
    match chrono {
        Chrono::Newer => [Origin::Archive, Origin::Hot],
        Chrono::Older => [Origin::Hot, Origin::Archive],
    }
}

/// Pagination progress in one chronological direction.
#[derive(Debug, Clone)]
struct Tier {
    /// Loaded archive messages not yet in the window, nearest first
    archive_buffer: VecDeque<Message>,
    /// Listed groups whose blobs have not been loaded, nearest first
    groups: VecDeque<MessagesGroup>,
    /// Far date of the last listed group
    group_cursor: Option<DateTime<Utc>>,
    has_more_groups: bool,
    has_more_hot: bool,
}

impl Tier {
    fn new(archived: bool) -> Self {
        Self {
            archive_buffer: VecDeque::new(),
            groups: VecDeque::new(),
            group_cursor: None,
            has_more_groups: archived,
            has_more_hot: true,
        }
    }

    fn close(&mut self) {
        self.archive_buffer.clear();
        self.groups.clear();
        self.has_more_groups = false;
        self.has_more_hot = false;
    }
}

pub struct MessageState {
    cache: OrderedResultCache<Message>,
    /// Indexed by `Chrono::index`
    tiers: [Tier; 2],
}

impl MessageState {
    fn new(archived: bool) -> Self {
        Self {
            cache: OrderedResultCache::new(),
            tiers: [Tier::new(archived), Tier::new(archived)],
        }
    }

    fn closed() -> Self {
        let mut state = Self::new(false);
        state.cache.set_head(true);
        state.cache.set_tail(true);
        state
    }
}

pub struct MessageWindow {
    ctx: QueryContext,
    params: FindMessagesParams,
    limit: usize,
}

impl MessageWindow {
    pub fn new(ctx: QueryContext, params: FindMessagesParams) -> Self {
        let limit = params.limit.unwrap_or(ctx.config.default_limit).max(1);
        Self { ctx, params, limit }
    }

    pub fn params(&self) -> &FindMessagesParams {
        &self.params
    }

    /// Only card-scoped windows walk the archive; groups are listed per card.
    fn archived(&self) -> bool {
        self.params.card_id.is_some()
    }

    async fn top_up_from_hot(
        &self,
        tier: &mut Tier,
        chrono: Chrono,
        cursor: Option<&Cursor>,
        merged: &mut Vec<(Message, Origin)>,
        lookahead: usize,
    ) -> Result<()> {
        if !tier.has_more_hot {
            return Ok(());
        }
        let needed = lookahead - merged.len();
        let found = paging::fetch_past(
            chrono,
            paging::position(cursor),
            needed,
            |m: &Message| (m.created, m.id.as_str()),
            |range, limit| {
                let mut params = self.params.clone().with_order(chrono.order()).with_limit(limit);
                params.created = paging::narrow(self.params.created.as_ref(), range);
                async move { self.ctx.store.find_messages(&params).await }
            },
        )
        .await?;

        tier.has_more_hot = found.len() >= needed;
        merged.extend(found.into_iter().map(|m| (m, Origin::Hot)));
        Ok(())
    }

    async fn top_up_from_archive(
        &self,
        tier: &mut Tier,
        chrono: Chrono,
        edge: Option<&Cursor>,
        merged: &mut Vec<(Message, Origin)>,
        lookahead: usize,
    ) -> Result<()> {
        let Some(card_id) = self.params.card_id.as_deref() else {
            return Ok(());
        };

        loop {
            while merged.len() < lookahead {
                let Some(message) = tier.archive_buffer.pop_front() else {
                    break;
                };
                merged.push((message, Origin::Archive));
            }
            if merged.len() >= lookahead {
                return Ok(());
            }

            if let Some(group) = tier.groups.pop_front() {
                let cursor = merged.last().map(|(m, _)| (m.created, m.id.as_str()));
                let cursor = cursor.or_else(|| paging::position(edge));
                let mut fresh: Vec<Message> = load_group_messages(self.ctx.archive.as_ref(), &group)
                    .await?
                    .into_iter()
                    .filter(|m| self.params.matches(m))
                    .filter(|m| {
                        cursor.map_or(true, |c| chrono.is_past((m.created, m.id.as_str()), c))
                    })
                    .collect();
                fresh.sort_by(|a, b| {
                    chrono
                        .order()
                        .apply(a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)))
                });
                tracing::debug!(
                    blob_id = %group.blob_id,
                    loaded = fresh.len(),
                    "archive group buffered"
                );
                tier.archive_buffer.extend(fresh);
                continue;
            }

            if !tier.has_more_groups {
                return Ok(());
            }
            self.list_groups(card_id, tier, chrono, edge.map(|(date, _)| *date))
                .await?;
        }
    }

    /// List the next batch of group descriptors past the tier's cursor.
    async fn list_groups(
        &self,
        card_id: &str,
        tier: &mut Tier,
        chrono: Chrono,
        edge: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let page_size = self.ctx.config.group_page_size;
        let cursor = tier.group_cursor.or(edge);
        let mut params = FindGroupsParams {
            order: chrono.order(),
            limit: Some(page_size),
            ..FindGroupsParams::for_card(card_id)
        };
        match chrono {
            Chrono::Older => {
                params.order_by = GroupOrderBy::FromDate;
                params.from_date = cursor.map(|c| chrono.beyond(c));
            }
            Chrono::Newer => {
                params.order_by = GroupOrderBy::ToDate;
                params.to_date = cursor.map(|c| chrono.beyond(c));
            }
        }

        let groups = self.ctx.store.find_groups(&params).await?;
        tier.has_more_groups = groups.len() >= page_size;
        if let Some(last) = groups.last() {
            tier.group_cursor = Some(match chrono {
                Chrono::Older => last.from_date,
                Chrono::Newer => last.to_date,
            });
        }

        let range = self.params.created.as_ref();
        tier.groups.extend(
            groups
                .into_iter()
                .filter(|g| range.map_or(true, |r| r.overlaps(g.from_date, g.to_date))),
        );
        Ok(())
    }

    // ===== Events =====

    fn on_created(&self, state: &mut MessageState, message: &Message) -> bool {
        if !self.params.matches(message) {
            return false;
        }
        match self.params.order {
            SortOrder::Ascending if state.cache.is_tail() => state.cache.push(message.clone()),
            SortOrder::Descending if state.cache.is_head() => {
                state.cache.unshift(message.clone())
            }
            SortOrder::Ascending | SortOrder::Descending => false,
        }
    }

    fn on_patch(&self, state: &mut MessageState, card_id: &str, patch: &Patch) -> bool {
        if self.params.card_id.as_deref().map_or(false, |c| c != card_id) {
            return false;
        }

        // Buffered archive copies are kept current for later pages.
        for tier in state.tiers.iter_mut() {
            let mut removed = false;
            for buffered in tier.archive_buffer.iter_mut() {
                match apply_patch(buffered, patch) {
                    PatchOutcome::Updated(next) => *buffered = next,
                    PatchOutcome::Removed => removed = true,
                    PatchOutcome::Unchanged => {}
                }
            }
            if removed {
                tier.archive_buffer.retain(|m| m.id != patch.message_id);
            }
        }

        let Some(current) = state.cache.get(&patch.message_id) else {
            return false;
        };
        match apply_patch(current, patch) {
            PatchOutcome::Updated(next) => state.cache.update(next),
            PatchOutcome::Removed => state.cache.delete(&patch.message_id).is_some(),
            PatchOutcome::Unchanged => false,
        }
    }

    /// Hot messages rolled up into a new group leave the hot store. A tier
    /// that already finished listing would never see the group, so it is
    /// queued directly on every side of the window it reaches past.
    fn on_group_created(&self, state: &mut MessageState, group: &MessagesGroup) -> bool {
        if self.params.card_id.as_deref() != Some(group.card_id.as_str()) {
            return false;
        }
        if let Some(range) = &self.params.created {
            if !range.overlaps(group.from_date, group.to_date) {
                return false;
            }
        }

        let oldest = state.cache.iter().map(|m| m.created).min();
        let newest = state.cache.iter().map(|m| m.created).max();
        for chrono in [Chrono::Older, Chrono::Newer] {
            let reaches_past = match chrono {
                Chrono::Older => oldest.map_or(true, |edge| group.from_date <= edge),
                Chrono::Newer => newest.map_or(true, |edge| group.to_date >= edge),
            };
            let tier = &mut state.tiers[chrono.index()];
            // A tier still listing reaches the group through its cursor
            if !reaches_past
                || tier.has_more_groups
                || tier.groups.iter().any(|g| g.blob_id == group.blob_id)
            {
                continue;
            }
            let at = match chrono {
                Chrono::Older => tier.groups.partition_point(|g| g.from_date >= group.from_date),
                Chrono::Newer => tier.groups.partition_point(|g| g.to_date <= group.to_date),
            };
            tier.groups.insert(at, group.clone());
            tracing::debug!(blob_id = %group.blob_id, ?chrono, "new group queued");
        }
        false
    }

    fn on_card_removed(&self, state: &mut MessageState, card_id: &str) -> bool {
        let removed = state.cache.retain(|m| m.card_id != card_id);
        for tier in state.tiers.iter_mut() {
            tier.archive_buffer.retain(|m| m.card_id != card_id);
        }

        if self.params.card_id.as_deref() != Some(card_id) {
            return !removed.is_empty();
        }
        let reopened = !state.cache.is_head() || !state.cache.is_tail();
        for tier in state.tiers.iter_mut() {
            tier.close();
        }
        state.cache.set_head(true);
        state.cache.set_tail(true);
        !removed.is_empty() || reopened
    }
}

#[async_trait]
impl QueryEngine for MessageWindow {
    type Item = Message;
    type State = MessageState;

    fn name(&self) -> &'static str {
        "messages"
    }

    async fn initial(&self) -> MessageState {
        let direction = paging::initial_direction(self.params.order, self.params.created.as_ref());
        let mut state = MessageState::new(self.archived());
        paging::mark_start(&mut state.cache, direction);

        match self.load_page(&mut state, direction).await {
            Ok(()) => state,
            Err(e) => {
                tracing::error!(card_id = ?self.params.card_id, "initial message fetch failed: {}", e);
                MessageState::closed()
            }
        }
    }

    fn cache(state: &MessageState) -> &OrderedResultCache<Message> {
        &state.cache
    }

    async fn load_page(&self, state: &mut MessageState, direction: Direction) -> Result<()> {
        let chrono = direction.chrono(self.params.order);
        let edge: Option<Cursor> =
            paging::edge(&state.cache, direction).map(|m| (m.created, m.id.clone()));
        let lookahead = paging::lookahead(self.limit);

        // Work on a copy so a failed fetch leaves the buffers as they were.
        let mut tier = state.tiers[chrono.index()].clone();
        let mut merged: Vec<(Message, Origin)> = Vec::with_capacity(lookahead);

        for origin in tier_order(chrono) {
            if merged.len() >= lookahead {
                break;
            }
            match origin {
                Origin::Archive => {
                    let edge = edge.as_ref();
                    self.top_up_from_archive(&mut tier, chrono, edge, &mut merged, lookahead)
                        .await?
                }
                Origin::Hot => {
                    let cursor = merged
                        .last()
                        .map(|(m, _)| (m.created, m.id.clone()))
                        .or_else(|| edge.clone());
                    let cursor = cursor.as_ref();
                    self.top_up_from_hot(&mut tier, chrono, cursor, &mut merged, lookahead)
                        .await?
                }
            }
        }

        let boundary = merged.len() < lookahead;
        if merged.len() > self.limit {
            let excess = merged.split_off(self.limit);
            // Hot items are found again from the new edge; archive items would not be.
            // Archive leftovers return to this direction's buffer rather than the
            // opposite one: they lie past the new edge on this side.
            for (message, origin) in excess.into_iter().rev() {
                match origin {
                    Origin::Archive => tier.archive_buffer.push_front(message),
                    Origin::Hot => {}
                }
            }
        }

        let page: Vec<Message> = merged.into_iter().map(|(m, _)| m).collect();
        let added = paging::extend(&mut state.cache, direction, page, boundary);
        state.tiers[chrono.index()] = tier;

        tracing::debug!(
            card_id = ?self.params.card_id,
            ?direction,
            added,
            boundary,
            "message page loaded"
        );
        Ok(())
    }

    async fn apply_event(&self, state: &mut MessageState, event: &LiveEvent) -> bool {
        match event {
            LiveEvent::MessageCreated { message } => self.on_created(state, message),
            LiveEvent::PatchApplied { card_id, patch } => self.on_patch(state, card_id, patch),
            LiveEvent::CardRemoved { card_id } => self.on_card_removed(state, card_id),
            LiveEvent::MessagesGroupCreated { group } => self.on_group_created(state, group),
            LiveEvent::NotificationCreated { .. }
            | LiveEvent::NotificationsRemoved { .. }
            | LiveEvent::NotificationUpdated { .. }
            | LiveEvent::NotificationContextCreated { .. }
            | LiveEvent::NotificationContextUpdated { .. }
            | LiveEvent::NotificationContextRemoved { .. }
            | LiveEvent::LabelCreated { .. }
            | LiveEvent::LabelRemoved { .. }
            | LiveEvent::CollaboratorsAdded { .. }
            | LiveEvent::CollaboratorsRemoved { .. }
            | LiveEvent::CardTypeUpdated { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveMetadata, ParsedArchive, StaticArchive};
    use crate::config::CoreConfig;
    use crate::models::PatchData;
    use crate::query::Window;
    use crate::store::{DateRange, InMemoryStore};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn message(id: &str, secs: i64) -> Message {
        Message::new(id, "c1", format!("body {}", id), "alice", at(secs))
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        archive: Arc<StaticArchive>,
        ctx: QueryContext,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let archive = Arc::new(StaticArchive::new());
            let ctx = QueryContext::new(
                store.clone(),
                archive.clone(),
                CoreConfig::default().with_group_page_size(2),
            );
            Self {
                store,
                archive,
                ctx,
            }
        }

        fn group(&self, blob_id: &str, messages: Vec<Message>) {
            let from_date = messages.iter().map(|m| m.created).min().unwrap();
            let to_date = messages.iter().map(|m| m.created).max().unwrap();
            self.store.insert_group(MessagesGroup {
                card_id: "c1".to_string(),
                blob_id: blob_id.to_string(),
                from_date,
                to_date,
                count: messages.len(),
                patches: Vec::new(),
            });
            self.archive.insert(
                blob_id,
                ParsedArchive {
                    metadata: ArchiveMetadata {
                        card_id: "c1".to_string(),
                        title: None,
                        from_date,
                        to_date,
                    },
                    messages,
                },
            );
        }

        fn hot(&self, messages: Vec<Message>) {
            for m in messages {
                self.store.insert_message(m);
            }
        }

        fn query(&self, params: FindMessagesParams) -> Arc<MessagesQuery> {
            Query::create(1, MessageWindow::new(self.ctx.clone(), params))
        }
    }

    fn ids(window: &Window<Message>) -> Vec<&str> {
        window.items().iter().map(|m| m.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_ascending_walks_archive_then_hot() {
        let fx = Fixture::new();
        fx.group("b1", vec![message("m1", 1), message("m2", 2)]);
        fx.hot(vec![message("m3", 3), message("m4", 4)]);

        let query = fx.query(FindMessagesParams::for_card("c1").with_limit(2));
        let window = query.window().await;
        assert_eq!(ids(&window), vec!["m1", "m2"]);
        assert!(window.is_head());
        assert!(!window.is_tail());

        window.load_next_page().await;
        let window = query.window().await;
        assert_eq!(ids(&window), vec!["m1", "m2", "m3", "m4"]);
        assert!(window.is_tail());
    }

    #[tokio::test]
    async fn test_descending_walks_hot_then_archive() {
        let fx = Fixture::new();
        fx.group("b1", vec![message("m1", 1), message("m2", 2)]);
        fx.group("b2", vec![message("m3", 3), message("m4", 4)]);
        fx.hot(vec![message("m5", 5)]);

        let params = FindMessagesParams::for_card("c1")
            .with_order(SortOrder::Descending)
            .with_limit(2);
        let query = fx.query(params);

        let window = query.window().await;
        assert_eq!(ids(&window), vec!["m5", "m4"]);
        assert!(window.is_head());

        query.load_next_page().await;
        query.load_next_page().await;
        let window = query.window().await;
        assert_eq!(ids(&window), vec!["m5", "m4", "m3", "m2", "m1"]);
        assert!(window.is_tail());
        assert_eq!(fx.archive.loads(), 2);
    }

    #[tokio::test]
    async fn test_blob_leftovers_serve_later_pages() {
        let fx = Fixture::new();
        fx.group(
            "b1",
            (1..=5).map(|i| message(&format!("m{}", i), i)).collect(),
        );

        let query = fx.query(FindMessagesParams::for_card("c1").with_limit(2));
        query.window().await;
        query.load_next_page().await;
        query.load_next_page().await;

        let window = query.window().await;
        assert_eq!(window.len(), 5);
        assert!(window.is_tail());
        assert_eq!(fx.archive.loads(), 1);
    }

    #[tokio::test]
    async fn test_groups_outside_range_are_not_loaded() {
        let fx = Fixture::new();
        fx.group("b1", vec![message("m1", 1), message("m2", 2)]);
        fx.group("b2", vec![message("m3", 3), message("m4", 4)]);

        let params = FindMessagesParams::for_card("c1")
            .with_created(DateRange::after(at(2)))
            .with_limit(5);
        let window = fx.query(params).window().await;
        assert_eq!(ids(&window), vec!["m3", "m4"]);
        assert!(window.is_head() && window.is_tail());
        assert_eq!(fx.archive.loads(), 1);
    }

    #[tokio::test]
    async fn test_inclusive_lower_bound_starts_from_newest() {
        let fx = Fixture::new();
        fx.hot((1..=4).map(|i| message(&format!("m{}", i), i)).collect());

        let params = FindMessagesParams::for_card("c1")
            .with_created(DateRange {
                greater_or_equal: Some(at(2)),
                ..DateRange::default()
            })
            .with_limit(2);
        let query = fx.query(params);
        let window = query.window().await;
        assert_eq!(ids(&window), vec!["m3", "m4"]);
        assert!(window.is_tail());
        assert!(!window.is_head());

        window.load_prev_page().await;
        let window = query.window().await;
        assert_eq!(ids(&window), vec!["m2", "m3", "m4"]);
        assert!(window.is_head());
    }

    #[tokio::test]
    async fn test_upper_bound_pages_forward_to_the_bound() {
        let fx = Fixture::new();
        fx.hot((1..=4).map(|i| message(&format!("m{}", i), i)).collect());

        let params = FindMessagesParams::for_card("c1")
            .with_created(DateRange::before(at(4)))
            .with_limit(2);
        let query = fx.query(params);
        let window = query.window().await;
        assert_eq!(ids(&window), vec!["m1", "m2"]);
        assert!(window.is_head());

        window.load_next_page().await;
        let window = query.window().await;
        assert_eq!(ids(&window), vec!["m1", "m2", "m3"]);
        assert!(window.is_tail());
    }

    #[tokio::test]
    async fn test_messages_sharing_a_timestamp_page_without_loss() {
        let fx = Fixture::new();
        fx.hot(["a", "b", "c", "d", "e"].iter().map(|id| message(id, 1)).collect());

        let query = fx.query(FindMessagesParams::for_card("c1").with_limit(2));
        assert_eq!(ids(&query.window().await), vec!["a", "b"]);

        query.load_next_page().await;
        let window = query.window().await;
        assert_eq!(ids(&window), vec!["a", "b", "c", "d"]);
        assert!(!window.is_tail());

        query.load_next_page().await;
        let window = query.window().await;
        assert_eq!(ids(&window), vec!["a", "b", "c", "d", "e"]);
        assert!(window.is_tail());
    }

    #[tokio::test]
    async fn test_descending_messages_sharing_a_timestamp() {
        let fx = Fixture::new();
        fx.hot(["a", "b", "c", "d"].iter().map(|id| message(id, 1)).collect());

        let params = FindMessagesParams::for_card("c1")
            .with_order(SortOrder::Descending)
            .with_limit(2);
        let query = fx.query(params);
        assert_eq!(ids(&query.window().await), vec!["d", "c"]);

        query.load_next_page().await;
        let window = query.window().await;
        assert_eq!(ids(&window), vec!["d", "c", "b", "a"]);
        assert!(window.is_tail());
    }

    #[tokio::test]
    async fn test_group_created_between_pages_is_walked() {
        let fx = Fixture::new();
        fx.hot((1..=4).map(|i| message(&format!("m{}", i), i)).collect());

        let query = fx.query(FindMessagesParams::for_card("c1").with_limit(2));
        let window = query.window().await;
        assert_eq!(ids(&window), vec!["m1", "m2"]);
        assert!(!window.is_tail());

        // m3 and m4 leave the hot store for a new archive group
        fx.store.remove_message("m3");
        fx.store.remove_message("m4");
        fx.group("b1", vec![message("m3", 3), message("m4", 4)]);
        let group = MessagesGroup {
            card_id: "c1".to_string(),
            blob_id: "b1".to_string(),
            from_date: at(3),
            to_date: at(4),
            count: 2,
            patches: Vec::new(),
        };
        query
            .on_event(&LiveEvent::MessagesGroupCreated { group })
            .await;

        query.load_next_page().await;
        let window = query.window().await;
        assert_eq!(ids(&window), vec!["m1", "m2", "m3", "m4"]);
        assert!(window.is_tail());
        assert_eq!(fx.archive.loads(), 1);
    }

    #[tokio::test]
    async fn test_group_for_other_card_is_ignored() {
        let fx = Fixture::new();
        fx.hot(vec![message("m1", 1)]);
        let query = fx.query(FindMessagesParams::for_card("c1").with_limit(2));
        query.window().await;

        let group = MessagesGroup {
            card_id: "c2".to_string(),
            blob_id: "x".to_string(),
            from_date: at(5),
            to_date: at(6),
            count: 1,
            patches: Vec::new(),
        };
        query
            .on_event(&LiveEvent::MessagesGroupCreated { group })
            .await;
        assert_eq!(ids(&query.window().await), vec!["m1"]);
        assert_eq!(fx.archive.loads(), 0);
    }

    #[tokio::test]
    async fn test_created_only_at_live_edge() {
        let fx = Fixture::new();
        fx.hot((1..=3).map(|i| message(&format!("m{}", i), i)).collect());

        let query = fx.query(FindMessagesParams::for_card("c1").with_limit(2));
        query.window().await;

        // Not at the tail yet: the new message is past the window.
        query
            .on_event(&LiveEvent::MessageCreated {
                message: message("m9", 9),
            })
            .await;
        assert_eq!(query.window().await.len(), 2);

        query.load_next_page().await;
        query
            .on_event(&LiveEvent::MessageCreated {
                message: message("m10", 10),
            })
            .await;
        let window = query.window().await;
        assert_eq!(window.items().last().map(|m| m.id.as_str()), Some("m10"));
    }

    #[tokio::test]
    async fn test_created_for_other_card_is_silent() {
        let fx = Fixture::new();
        let query = fx.query(FindMessagesParams::for_card("c1"));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let sink = calls.clone();
        query.set_callback(Arc::new(move |_: Window<Message>| {
            sink.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));
        query.refresh().await;

        let mut other = message("x1", 1);
        other.card_id = "c2".to_string();
        query
            .on_event(&LiveEvent::MessageCreated { message: other })
            .await;

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(query.window().await.is_empty());
    }

    #[tokio::test]
    async fn test_patches_update_and_remove() {
        let fx = Fixture::new();
        fx.hot(vec![message("m1", 1), message("m2", 2)]);
        let query = fx.query(FindMessagesParams::for_card("c1"));
        query.window().await;

        let edit = Patch::new(
            "c1",
            "m1",
            PatchData::Update {
                content: Some("edited".to_string()),
                extra: None,
                message_type: None,
            },
            "alice",
            at(10),
        );
        query
            .on_event(&LiveEvent::PatchApplied {
                card_id: "c1".to_string(),
                patch: edit,
            })
            .await;

        let stale = Patch::new(
            "c1",
            "m1",
            PatchData::Update {
                content: Some("stale".to_string()),
                extra: None,
                message_type: None,
            },
            "alice",
            at(5),
        );
        query
            .on_event(&LiveEvent::PatchApplied {
                card_id: "c1".to_string(),
                patch: stale,
            })
            .await;

        let remove = Patch::new("c1", "m2", PatchData::Remove, "alice", at(11));
        query
            .on_event(&LiveEvent::PatchApplied {
                card_id: "c1".to_string(),
                patch: remove,
            })
            .await;

        let window = query.window().await;
        assert_eq!(ids(&window), vec!["m1"]);
        assert_eq!(window.items()[0].content, "edited");
    }

    #[tokio::test]
    async fn test_initial_failure_closes_window() {
        let fx = Fixture::new();
        fx.store.set_failing(true);
        let window = fx.query(FindMessagesParams::for_card("c1")).window().await;
        assert!(window.is_empty());
        assert!(!window.has_next_page());
        assert!(!window.has_prev_page());
    }

    #[tokio::test]
    async fn test_archive_failure_keeps_page() {
        let fx = Fixture::new();
        fx.group("b1", vec![message("m1", 1), message("m2", 2)]);
        fx.hot(vec![message("m3", 3), message("m4", 4), message("m5", 5)]);

        let params = FindMessagesParams::for_card("c1")
            .with_order(SortOrder::Descending)
            .with_limit(2);
        let query = fx.query(params);
        assert_eq!(ids(&query.window().await), vec!["m5", "m4"]);

        fx.archive.set_failing(true);
        query.load_next_page().await;
        let window = query.window().await;
        assert_eq!(ids(&window), vec!["m5", "m4"]);
        assert!(window.has_next_page());

        fx.archive.set_failing(false);
        query.load_next_page().await;
        assert_eq!(ids(&query.window().await), vec!["m5", "m4", "m3", "m2"]);
    }
}
