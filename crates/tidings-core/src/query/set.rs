//! Unpaginated set queries for labels and collaborators.
//!
//! The whole matching set is held, optionally capped at a limit. Events are
//! turned into a [`SetDelta`] by the source and applied generically; when a
//! capped set shrinks below its limit while more items are known to match,
//! the set is fetched again.

#![deny(clippy::wildcard_enum_match_arm)]

use async_trait::async_trait;

use super::live::{Query, QueryEngine};
use super::paging::{self, Direction};
use super::QueryContext;
use crate::cache::{Keyed, OrderedResultCache};
use crate::error::Result;
use crate::events::LiveEvent;
use crate::models::{Collaborator, Label};
use crate::store::{FindCollaboratorsParams, FindLabelsParams};

pub type SetQuery<S> = Query<SetWindow<S>>;
pub type LabelsQuery = SetQuery<LabelsSource>;
pub type CollaboratorsQuery = SetQuery<CollaboratorsSource>;

/// What an event means for a set.
pub enum SetDelta<T: Keyed> {
    Ignore,
    /// Candidates to add; non-matching ones are dropped.
    Insert(Vec<T>),
    Remove(Vec<T::Key>),
    RemoveIf(Box<dyn Fn(&T) -> bool + Send + Sync>),
    /// Rewrite items in place (`None` leaves an item alone), then re-apply the filter.
    Modify(Box<dyn Fn(&T) -> Option<T> + Send + Sync>),
    /// Local information is not enough; fetch the set again.
    Refetch,
}

#[async_trait]
pub trait SetSource: Send + Sync + 'static {
    type Item: Keyed + Clone + Send + Sync + 'static;
    type Params: Clone + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn limit(&self, params: &Self::Params) -> Option<usize>;

    fn matches(&self, params: &Self::Params, item: &Self::Item) -> bool;

    /// Fetch up to `limit` matching items, all of them when `None`.
    async fn fetch(
        &self,
        ctx: &QueryContext,
        params: &Self::Params,
        limit: Option<usize>,
    ) -> Result<Vec<Self::Item>>;

    fn delta(&self, params: &Self::Params, event: &LiveEvent) -> SetDelta<Self::Item>;
}

pub struct SetState<T: Keyed> {
    cache: OrderedResultCache<T>,
    /// More items match than the cap lets through
    has_more: bool,
}

impl<T: Keyed> SetState<T> {
    fn closed() -> Self {
        let mut cache = OrderedResultCache::new();
        cache.set_head(true);
        cache.set_tail(true);
        Self {
            cache,
            has_more: false,
        }
    }
}

pub struct SetWindow<S: SetSource> {
    ctx: QueryContext,
    source: S,
    params: S::Params,
}

impl<S: SetSource> SetWindow<S> {
    pub fn new(ctx: QueryContext, source: S, params: S::Params) -> Self {
        Self {
            ctx,
            source,
            params,
        }
    }

    fn limit(&self) -> Option<usize> {
        self.source.limit(&self.params)
    }

    async fn fetch(&self) -> Result<SetState<S::Item>> {
        let limit = self.limit();
        let mut items = self
            .source
            .fetch(&self.ctx, &self.params, limit.map(paging::lookahead))
            .await?;
        let has_more = limit.map_or(false, |l| items.len() > l);
        if let Some(limit) = limit {
            items.truncate(limit);
        }

        let mut state = SetState::closed();
        state.cache.append(items);
        state.has_more = has_more;
        Ok(state)
    }

    async fn refetch(&self, state: &mut SetState<S::Item>) -> bool {
        match self.fetch().await {
            Ok(fresh) => {
                *state = fresh;
                true
            }
            Err(e) => {
                tracing::error!(query = self.source.name(), "set refetch failed: {}", e);
                false
            }
        }
    }

    /// Refill a capped set that lost items while more are known to exist.
    async fn refill(&self, state: &mut SetState<S::Item>) {
        let short = self.limit().map_or(false, |l| state.cache.len() < l);
        if short && state.has_more {
            self.refetch(state).await;
        }
    }

    fn insert(&self, state: &mut SetState<S::Item>, items: Vec<S::Item>) -> bool {
        let mut added = 0;
        for item in items {
            if self.source.matches(&self.params, &item) && state.cache.push(item) {
                added += 1;
            }
        }
        if let Some(limit) = self.limit() {
            while state.cache.len() > limit {
                state.cache.pop();
                state.has_more = true;
            }
        }
        added > 0
    }
}

#[async_trait]
impl<S: SetSource> QueryEngine for SetWindow<S> {
    type Item = S::Item;
    type State = SetState<S::Item>;

    fn name(&self) -> &'static str {
        self.source.name()
    }

    async fn initial(&self) -> Self::State {
        match self.fetch().await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(query = self.source.name(), "initial set fetch failed: {}", e);
                SetState::closed()
            }
        }
    }

    fn cache(state: &Self::State) -> &OrderedResultCache<S::Item> {
        &state.cache
    }

    /// Sets are complete at both ends; the driver never asks for a page.
    async fn load_page(&self, _state: &mut Self::State, _direction: Direction) -> Result<()> {
        Ok(())
    }

    async fn apply_event(&self, state: &mut Self::State, event: &LiveEvent) -> bool {
        match self.source.delta(&self.params, event) {
            SetDelta::Ignore => false,
            SetDelta::Insert(items) => self.insert(state, items),
            SetDelta::Remove(keys) => {
                let removed = keys
                    .iter()
                    .filter(|key| state.cache.delete(key).is_some())
                    .count();
                if removed == 0 {
                    return false;
                }
                self.refill(state).await;
                true
            }
            SetDelta::RemoveIf(doomed) => {
                if state.cache.retain(|item| !doomed(item)).is_empty() {
                    return false;
                }
                self.refill(state).await;
                true
            }
            SetDelta::Modify(rewrite) => {
                let rewritten: Vec<S::Item> = state.cache.iter().filter_map(|i| rewrite(i)).collect();
                let mut changed = !rewritten.is_empty();
                for item in rewritten {
                    state.cache.update(item);
                }
                let dropped = state
                    .cache
                    .retain(|item| self.source.matches(&self.params, item));
                if !dropped.is_empty() {
                    self.refill(state).await;
                    changed = true;
                }
                changed
            }
            SetDelta::Refetch => self.refetch(state).await,
        }
    }
}

// ===== Labels =====

pub struct LabelsSource;

#[async_trait]
impl SetSource for LabelsSource {
    type Item = Label;
    type Params = FindLabelsParams;

    fn name(&self) -> &'static str {
        "labels"
    }

    fn limit(&self, params: &FindLabelsParams) -> Option<usize> {
        params.limit
    }

    fn matches(&self, params: &FindLabelsParams, label: &Label) -> bool {
        params.matches(label)
    }

    async fn fetch(
        &self,
        ctx: &QueryContext,
        params: &FindLabelsParams,
        limit: Option<usize>,
    ) -> Result<Vec<Label>> {
        let params = FindLabelsParams {
            limit,
            ..params.clone()
        };
        ctx.store.find_labels(&params).await
    }

    fn delta(&self, params: &FindLabelsParams, event: &LiveEvent) -> SetDelta<Label> {
        match event {
            LiveEvent::LabelCreated { label } => SetDelta::Insert(vec![label.clone()]),
            LiveEvent::LabelRemoved {
                label_id,
                card_id,
                account,
            } => SetDelta::Remove(vec![(label_id.clone(), card_id.clone(), account.clone())]),
            LiveEvent::CardRemoved { card_id } => {
                let card_id = card_id.clone();
                SetDelta::RemoveIf(Box::new(move |label| label.card_id == card_id))
            }
            LiveEvent::CardTypeUpdated { card_id, card_type } => {
                if params.card_id.as_deref().map_or(false, |c| c != card_id) {
                    return SetDelta::Ignore;
                }
                // Labels of this card may start matching; they are not held locally.
                if params.card_type.as_deref() == Some(card_type.as_str()) {
                    return SetDelta::Refetch;
                }
                let card_id = card_id.clone();
                let card_type = card_type.clone();
                SetDelta::Modify(Box::new(move |label| {
                    (label.card_id == card_id).then(|| Label {
                        card_type: card_type.clone(),
                        ..label.clone()
                    })
                }))
            }
            LiveEvent::MessageCreated { .. }
            | LiveEvent::PatchApplied { .. }
            | LiveEvent::MessagesGroupCreated { .. }
            | LiveEvent::NotificationCreated { .. }
            | LiveEvent::NotificationsRemoved { .. }
            | LiveEvent::NotificationUpdated { .. }
            | LiveEvent::NotificationContextCreated { .. }
            | LiveEvent::NotificationContextUpdated { .. }
            | LiveEvent::NotificationContextRemoved { .. }
            | LiveEvent::CollaboratorsAdded { .. }
            | LiveEvent::CollaboratorsRemoved { .. } => SetDelta::Ignore,
        }
    }
}

// ===== Collaborators =====

pub struct CollaboratorsSource;

#[async_trait]
impl SetSource for CollaboratorsSource {
    type Item = Collaborator;
    type Params = FindCollaboratorsParams;

    fn name(&self) -> &'static str {
        "collaborators"
    }

    fn limit(&self, params: &FindCollaboratorsParams) -> Option<usize> {
        params.limit
    }

    fn matches(&self, params: &FindCollaboratorsParams, collaborator: &Collaborator) -> bool {
        params.matches(collaborator)
    }

    async fn fetch(
        &self,
        ctx: &QueryContext,
        params: &FindCollaboratorsParams,
        limit: Option<usize>,
    ) -> Result<Vec<Collaborator>> {
        let params = FindCollaboratorsParams {
            limit,
            ..params.clone()
        };
        ctx.store.find_collaborators(&params).await
    }

    fn delta(&self, _params: &FindCollaboratorsParams, event: &LiveEvent) -> SetDelta<Collaborator> {
        match event {
            LiveEvent::CollaboratorsAdded {
                card_id,
                card_type,
                accounts,
            } => SetDelta::Insert(
                accounts
                    .iter()
                    .map(|account| Collaborator {
                        account: account.clone(),
                        card_id: card_id.clone(),
                        card_type: card_type.clone(),
                    })
                    .collect(),
            ),
            LiveEvent::CollaboratorsRemoved { card_id, accounts } => SetDelta::Remove(
                accounts
                    .iter()
                    .map(|account| (card_id.clone(), account.clone()))
                    .collect(),
            ),
            LiveEvent::CardRemoved { card_id } => {
                let card_id = card_id.clone();
                SetDelta::RemoveIf(Box::new(move |c| c.card_id == card_id))
            }
            LiveEvent::CardTypeUpdated { card_id, card_type } => {
                let card_id = card_id.clone();
                let card_type = card_type.clone();
                SetDelta::Modify(Box::new(move |c| {
                    (c.card_id == card_id).then(|| Collaborator {
                        card_type: card_type.clone(),
                        ..c.clone()
                    })
                }))
            }
            LiveEvent::MessageCreated { .. }
            | LiveEvent::PatchApplied { .. }
            | LiveEvent::MessagesGroupCreated { .. }
            | LiveEvent::NotificationCreated { .. }
            | LiveEvent::NotificationsRemoved { .. }
            | LiveEvent::NotificationUpdated { .. }
            | LiveEvent::NotificationContextCreated { .. }
            | LiveEvent::NotificationContextUpdated { .. }
            | LiveEvent::NotificationContextRemoved { .. }
            | LiveEvent::LabelCreated { .. }
            | LiveEvent::LabelRemoved { .. } => SetDelta::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::StaticArchive;
    use crate::config::CoreConfig;
    use crate::query::Window;
    use crate::store::InMemoryStore;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn label(label_id: &str, card_id: &str, secs: i64) -> Label {
        Label {
            label_id: label_id.to_string(),
            card_id: card_id.to_string(),
            card_type: "task".to_string(),
            account: "acc".to_string(),
            created: at(secs),
        }
    }

    fn setup() -> (Arc<InMemoryStore>, QueryContext) {
        let store = Arc::new(InMemoryStore::new());
        let ctx = QueryContext::new(
            store.clone(),
            Arc::new(StaticArchive::new()),
            CoreConfig::default(),
        );
        (store, ctx)
    }

    fn labels(ctx: &QueryContext, params: FindLabelsParams) -> Arc<LabelsQuery> {
        Query::create(1, SetWindow::new(ctx.clone(), LabelsSource, params))
    }

    fn label_ids(window: &Window<Label>) -> Vec<String> {
        window.items().iter().map(|l| l.label_id.clone()).collect()
    }

    #[tokio::test]
    async fn test_capped_set_trims_and_refills() {
        let (store, ctx) = setup();
        for i in 1..=3 {
            store.insert_label(label(&format!("l{}", i), "c1", i));
        }
        let params = FindLabelsParams {
            limit: Some(2),
            ..FindLabelsParams::default()
        };
        let query = labels(&ctx, params);

        let window = query.window().await;
        assert_eq!(label_ids(&window), vec!["l1", "l2"]);
        assert!(!window.has_next_page());
        assert!(!window.has_prev_page());

        store.remove_label("l1", "c1", "acc");
        query
            .on_event(&LiveEvent::LabelRemoved {
                label_id: "l1".to_string(),
                card_id: "c1".to_string(),
                account: "acc".to_string(),
            })
            .await;
        assert_eq!(label_ids(&query.window().await), vec!["l2", "l3"]);

        store.insert_label(label("l4", "c1", 4));
        query
            .on_event(&LiveEvent::LabelCreated {
                label: label("l4", "c1", 4),
            })
            .await;
        assert_eq!(label_ids(&query.window().await), vec!["l2", "l3"]);
    }

    #[tokio::test]
    async fn test_uncapped_set_follows_events() {
        let (store, ctx) = setup();
        store.insert_label(label("l1", "c1", 1));
        let params = FindLabelsParams {
            card_id: Some("c1".to_string()),
            ..FindLabelsParams::default()
        };
        let query = labels(&ctx, params);
        query.window().await;

        query
            .on_event(&LiveEvent::LabelCreated {
                label: label("l2", "c2", 2),
            })
            .await;
        query
            .on_event(&LiveEvent::LabelCreated {
                label: label("l3", "c1", 3),
            })
            .await;
        assert_eq!(label_ids(&query.window().await), vec!["l1", "l3"]);

        let calls = store.find_calls();
        query
            .on_event(&LiveEvent::CardRemoved {
                card_id: "c1".to_string(),
            })
            .await;
        assert!(query.window().await.is_empty());
        assert_eq!(store.find_calls(), calls);
    }

    #[tokio::test]
    async fn test_card_type_change_reapplies_filter() {
        let (store, ctx) = setup();
        store.insert_label(label("l1", "c1", 1));
        let params = FindLabelsParams {
            card_type: Some("task".to_string()),
            ..FindLabelsParams::default()
        };
        let query = labels(&ctx, params);
        assert_eq!(query.window().await.len(), 1);

        query
            .on_event(&LiveEvent::CardTypeUpdated {
                card_id: "c1".to_string(),
                card_type: "bug".to_string(),
            })
            .await;
        assert!(query.window().await.is_empty());
    }

    #[tokio::test]
    async fn test_collaborators_added_and_removed() {
        let (store, ctx) = setup();
        store.insert_collaborator(Collaborator {
            account: "alice".to_string(),
            card_id: "c1".to_string(),
            card_type: "task".to_string(),
        });
        let params = FindCollaboratorsParams {
            card_id: Some("c1".to_string()),
            ..FindCollaboratorsParams::default()
        };
        let query: Arc<CollaboratorsQuery> =
            Query::create(2, SetWindow::new(ctx, CollaboratorsSource, params));
        assert_eq!(query.window().await.len(), 1);

        query
            .on_event(&LiveEvent::CollaboratorsAdded {
                card_id: "c1".to_string(),
                card_type: "task".to_string(),
                accounts: vec!["bob".to_string(), "alice".to_string()],
            })
            .await;
        query
            .on_event(&LiveEvent::CollaboratorsRemoved {
                card_id: "c1".to_string(),
                accounts: vec!["alice".to_string()],
            })
            .await;

        let window = query.window().await;
        let accounts: Vec<&str> = window.items().iter().map(|c| c.account.as_str()).collect();
        assert_eq!(accounts, vec!["bob"]);
    }

    #[tokio::test]
    async fn test_initial_failure_yields_empty_set() {
        let (store, ctx) = setup();
        store.set_failing(true);
        let window = labels(&ctx, FindLabelsParams::default()).window().await;
        assert!(window.is_empty());
        assert!(!window.has_next_page());
    }
}
