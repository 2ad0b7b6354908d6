//! The shared driver behind every live query.
//!
//! A [`Query`] owns the lock around its state, settles the initial fetch,
//! suppresses duplicate page requests and publishes windows. What the state
//! is and how pages and events change it is up to its [`QueryEngine`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;

use super::paging::{self, Direction};
use super::settle::Settle;
use super::window::{Callback, Pager, Publisher, Window};
use super::{LiveQuery, QueryId};
use crate::cache::{Keyed, OrderedResultCache};
use crate::error::Result;
use crate::events::LiveEvent;

#[async_trait]
pub trait QueryEngine: Send + Sync + 'static {
    type Item: Keyed + Clone + Send + Sync + 'static;
    type State: Send + 'static;

    /// Label used in logs.
    fn name(&self) -> &'static str;

    /// First fetch. A failure is logged and yields an empty, closed state.
    async fn initial(&self) -> Self::State;

    fn cache(state: &Self::State) -> &OrderedResultCache<Self::Item>;

    /// Extend the window by one page. On error the state must be left as it was.
    async fn load_page(&self, state: &mut Self::State, direction: Direction) -> Result<()>;

    /// Apply an event. Returns whether the visible result changed.
    async fn apply_event(&self, state: &mut Self::State, event: &LiveEvent) -> bool;
}

pub struct Query<E: QueryEngine> {
    id: QueryId,
    engine: Arc<E>,
    state: tokio::sync::Mutex<Settle<E::State>>,
    publisher: Publisher<E::Item>,
    loading: [AtomicBool; 2],
    me: Weak<Self>,
}

impl<E: QueryEngine> Query<E> {
    /// Start the initial fetch and return the handle right away. The fetch
    /// resolves the first time any entry point settles the state.
    pub fn create(id: QueryId, engine: E) -> Arc<Self> {
        let engine = Arc::new(engine);
        let initial = {
            let engine = engine.clone();
            async move { engine.initial().await }
        };

        Arc::new_cyclic(|me| Self {
            id,
            engine,
            state: tokio::sync::Mutex::new(Settle::pending(initial)),
            publisher: Publisher::new(),
            loading: [AtomicBool::new(false), AtomicBool::new(false)],
            me: me.clone(),
        })
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn set_callback(&self, callback: Callback<E::Item>) {
        self.publisher.set_callback(callback);
    }

    pub fn remove_callback(&self) {
        self.publisher.remove_callback();
    }

    pub fn is_closed(&self) -> bool {
        self.publisher.is_closed()
    }

    /// Last published window, without waiting on in-flight work.
    pub fn latest_window(&self) -> Option<Window<E::Item>> {
        self.publisher.latest()
    }

    /// Current window, after any pending fetch has resolved.
    pub async fn window(&self) -> Window<E::Item> {
        let mut guard = self.state.lock().await;
        let state = guard.settle().await;
        self.snapshot(state)
    }

    /// Settle and push the current window to the callback.
    pub async fn refresh(&self) {
        let window = self.window().await;
        self.publisher.publish(window);
    }

    pub async fn load_next_page(&self) {
        self.load_page(Direction::Next).await;
    }

    pub async fn load_prev_page(&self) {
        self.load_page(Direction::Prev).await;
    }

    async fn load_page(&self, direction: Direction) {
        if self.is_closed() {
            return;
        }
        let Some(loading) = LoadingGuard::acquire(&self.loading[direction.index()]) else {
            tracing::debug!(query_id = self.id, ?direction, "page already loading");
            return;
        };

        let window = {
            let mut guard = self.state.lock().await;
            let state = guard.settle().await;
            if paging::at_boundary(E::cache(state), direction) {
                None
            } else {
                match self.engine.load_page(state, direction).await {
                    Ok(()) => Some(self.snapshot(state)),
                    Err(e) => {
                        tracing::error!(
                            query_id = self.id,
                            query = self.engine.name(),
                            ?direction,
                            "page fetch failed: {}",
                            e
                        );
                        None
                    }
                }
            }
        };
        drop(loading);

        if let Some(window) = window {
            self.publisher.publish(window);
        }
    }

    pub async fn on_event(&self, event: &LiveEvent) {
        if self.is_closed() {
            return;
        }
        let window = {
            let mut guard = self.state.lock().await;
            let state = guard.settle().await;
            if self.engine.apply_event(state, event).await {
                Some(self.snapshot(state))
            } else {
                tracing::trace!(query_id = self.id, kind = event.kind(), "event ignored");
                None
            }
        };

        if let Some(window) = window {
            self.publisher.publish(window);
        }
    }

    /// Stop delivering windows. The state is released with the last handle.
    pub async fn unsubscribe(&self) {
        self.publisher.close();
        tracing::debug!(query_id = self.id, query = self.engine.name(), "unsubscribed");
    }

    fn snapshot(&self, state: &E::State) -> Window<E::Item> {
        let cache = E::cache(state);
        let pager: Weak<dyn Pager> = self.me.clone();
        Window::new(cache.copy(), cache.is_head(), cache.is_tail(), Some(pager))
    }
}

/// Holds a direction's loading flag and clears it when dropped, including when
/// the page load future is abandoned partway.
struct LoadingGuard<'a>(&'a AtomicBool);

impl<'a> LoadingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl<E: QueryEngine> Pager for Query<E> {
    async fn next_page(&self) {
        self.load_page(Direction::Next).await;
    }

    async fn prev_page(&self) {
        self.load_page(Direction::Prev).await;
    }
}

#[async_trait]
impl<E: QueryEngine> LiveQuery for Query<E> {
    fn id(&self) -> QueryId {
        self.id
    }

    async fn on_event(&self, event: &LiveEvent) {
        Query::on_event(self, event).await;
    }

    async fn unsubscribe(&self) {
        Query::unsubscribe(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq)]
    struct Num(u32);

    impl Keyed for Num {
        type Key = u32;

        fn key(&self) -> u32 {
            self.0
        }
    }

    /// Counts up from 1 in pages of two; the tail is 6.
    struct Counter {
        pages: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl QueryEngine for Counter {
        type Item = Num;
        type State = OrderedResultCache<Num>;

        fn name(&self) -> &'static str {
            "counter"
        }

        async fn initial(&self) -> Self::State {
            let mut cache = OrderedResultCache::from_items(vec![Num(1), Num(2)]);
            cache.set_head(true);
            cache
        }

        fn cache(state: &Self::State) -> &OrderedResultCache<Num> {
            state
        }

        async fn load_page(&self, state: &mut Self::State, direction: Direction) -> Result<()> {
            self.pages.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(CoreError::store("down"));
            }
            tokio::task::yield_now().await;
            let last = state.last().map_or(0, |n| n.0);
            let page: Vec<Num> = (last + 1..=(last + 2).min(6)).map(Num).collect();
            paging::extend(state, direction, page, last + 2 >= 6);
            Ok(())
        }

        async fn apply_event(&self, _state: &mut Self::State, _event: &LiveEvent) -> bool {
            false
        }
    }

    fn counter() -> Arc<Query<Counter>> {
        Query::create(
            7,
            Counter {
                pages: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            },
        )
    }

    #[tokio::test]
    async fn test_pages_until_tail() {
        let query = counter();
        let delivered = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = delivered.clone();
        query.set_callback(Arc::new(move |w: Window<Num>| sink.lock().push(w.len())));

        query.refresh().await;
        let window = query.window().await;
        assert!(window.has_next_page());
        window.load_next_page().await;
        query.load_next_page().await;
        query.load_next_page().await;

        assert_eq!(*delivered.lock(), vec![2, 4, 6]);
        assert_eq!(query.engine.pages.load(Ordering::SeqCst), 2);
        assert!(!query.window().await.has_next_page());
    }

    #[tokio::test]
    async fn test_failed_page_keeps_window() {
        let query = counter();
        query.engine.fail.store(true, Ordering::SeqCst);
        query.load_next_page().await;
        assert_eq!(query.window().await.len(), 2);

        query.engine.fail.store(false, Ordering::SeqCst);
        query.load_next_page().await;
        assert_eq!(query.window().await.len(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_page_requests_collapse() {
        let query = counter();
        query.refresh().await;
        futures::join!(query.load_next_page(), query.load_next_page());
        assert_eq!(query.engine.pages.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let query = counter();
        let delivered = Arc::new(AtomicUsize::new(0));
        let sink = delivered.clone();
        query.set_callback(Arc::new(move |_: Window<Num>| {
            sink.fetch_add(1, Ordering::SeqCst);
        }));
        query.unsubscribe().await;
        query.refresh().await;
        query.load_next_page().await;
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert!(query.latest_window().is_none());
    }

    #[tokio::test]
    async fn test_abandoned_page_load_does_not_block_later_loads() {
        let query = counter();
        query.refresh().await;
        {
            let _held = query.state.lock().await;
            let waited = tokio::time::timeout(
                std::time::Duration::from_millis(5),
                query.load_next_page(),
            )
            .await;
            assert!(waited.is_err());
        }

        query.load_next_page().await;
        assert_eq!(query.window().await.len(), 4);
        assert_eq!(query.engine.pages.load(Ordering::SeqCst), 1);
    }
}
