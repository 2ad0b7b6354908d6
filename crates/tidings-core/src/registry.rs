//! Session-scoped bookkeeping of live queries.
//!
//! The boundary layer owns one [`QueryRegistry`], opens a session per
//! connected observer and fans every inbound [`LiveEvent`] out to the queries
//! it holds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;

use crate::events::LiveEvent;
use crate::query::{
    Callback, CollaboratorsQuery, CollaboratorsSource, ContextWindow, ContextsQuery, LabelsQuery,
    LabelsSource, LiveQuery, MessageWindow, MessagesQuery, NotificationWindow, NotificationsQuery,
    Query, QueryContext, QueryEngine, QueryId, SetWindow,
};
use crate::store::{
    FindCollaboratorsParams, FindLabelsParams, FindMessagesParams, FindNotificationContextsParams,
    FindNotificationsParams,
};

pub type SessionId = String;

type Session = HashMap<QueryId, Arc<dyn LiveQuery>>;

pub struct QueryRegistry {
    ctx: QueryContext,
    sessions: Mutex<HashMap<SessionId, Session>>,
    next_id: AtomicU64,
}

impl QueryRegistry {
    pub fn new(ctx: QueryContext) -> Self {
        Self {
            ctx,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn context(&self) -> &QueryContext {
        &self.ctx
    }

    /// Open a session. Opening a known session keeps its queries.
    pub fn create_session(&self, session: &str) {
        self.sessions.lock().entry(session.to_string()).or_default();
        tracing::debug!(session, "session opened");
    }

    /// Drop every query of the session and stop their deliveries.
    pub async fn close_session(&self, session: &str) {
        let queries = self.sessions.lock().remove(session);
        let Some(queries) = queries else {
            return;
        };
        let count = queries.len();
        join_all(queries.values().map(|query| query.unsubscribe())).await;
        tracing::debug!(session, count, "session closed");
    }

    /// Drop one query. Returns false when the session does not hold it.
    pub async fn unsubscribe(&self, session: &str, query_id: QueryId) -> bool {
        let query = self
            .sessions
            .lock()
            .get_mut(session)
            .and_then(|queries| queries.remove(&query_id));
        match query {
            Some(query) => {
                query.unsubscribe().await;
                true
            }
            None => false,
        }
    }

    /// Close every session.
    pub async fn close(&self) {
        let sessions: Vec<Session> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        join_all(
            sessions
                .iter()
                .flat_map(|queries| queries.values())
                .map(|query| query.unsubscribe()),
        )
        .await;
        tracing::info!(sessions = sessions.len(), "query registry closed");
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn query_count(&self) -> usize {
        self.sessions.lock().values().map(HashMap::len).sum()
    }

    /// Deliver an event to every live query.
    pub async fn broadcast(&self, event: &LiveEvent) {
        let queries: Vec<Arc<dyn LiveQuery>> = self
            .sessions
            .lock()
            .values()
            .flat_map(|queries| queries.values().cloned())
            .collect();
        tracing::debug!(kind = event.kind(), queries = queries.len(), "broadcasting event");
        join_all(queries.iter().map(|query| query.on_event(event))).await;
    }

    pub async fn subscribe_messages(
        &self,
        session: &str,
        params: FindMessagesParams,
        callback: Callback<crate::models::Message>,
    ) -> Arc<MessagesQuery> {
        let engine = MessageWindow::new(self.ctx.clone(), params);
        self.register(session, engine, callback).await
    }

    pub async fn subscribe_notifications(
        &self,
        session: &str,
        params: FindNotificationsParams,
        callback: Callback<crate::models::Notification>,
    ) -> Arc<NotificationsQuery> {
        let engine = NotificationWindow::new(self.ctx.clone(), params);
        self.register(session, engine, callback).await
    }

    pub async fn subscribe_contexts(
        &self,
        session: &str,
        params: FindNotificationContextsParams,
        callback: Callback<crate::models::NotificationContext>,
    ) -> Arc<ContextsQuery> {
        let engine = ContextWindow::new(self.ctx.clone(), params);
        self.register(session, engine, callback).await
    }

    pub async fn subscribe_labels(
        &self,
        session: &str,
        params: FindLabelsParams,
        callback: Callback<crate::models::Label>,
    ) -> Arc<LabelsQuery> {
        let engine = SetWindow::new(self.ctx.clone(), LabelsSource, params);
        self.register(session, engine, callback).await
    }

    pub async fn subscribe_collaborators(
        &self,
        session: &str,
        params: FindCollaboratorsParams,
        callback: Callback<crate::models::Collaborator>,
    ) -> Arc<CollaboratorsQuery> {
        let engine = SetWindow::new(self.ctx.clone(), CollaboratorsSource, params);
        self.register(session, engine, callback).await
    }

    /// Create the query, file it under the session and publish its first window.
    async fn register<E: QueryEngine>(
        &self,
        session: &str,
        engine: E,
        callback: Callback<E::Item>,
    ) -> Arc<Query<E>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let query = Query::create(id, engine);
        query.set_callback(callback);

        let live: Arc<dyn LiveQuery> = query.clone();
        self.sessions
            .lock()
            .entry(session.to_string())
            .or_default()
            .insert(id, live);
        tracing::debug!(session, query_id = id, "query registered");

        query.refresh().await;
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::StaticArchive;
    use crate::config::CoreConfig;
    use crate::models::{Label, Message};
    use crate::query::Window;
    use crate::store::InMemoryStore;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::AtomicUsize;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn registry() -> (Arc<InMemoryStore>, QueryRegistry) {
        let store = Arc::new(InMemoryStore::new());
        let ctx = QueryContext::new(
            store.clone(),
            Arc::new(StaticArchive::new()),
            CoreConfig::default(),
        );
        (store, QueryRegistry::new(ctx))
    }

    fn counting<T: 'static>() -> (Arc<AtomicUsize>, Callback<T>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let callback: Callback<T> = Arc::new(move |_window: Window<T>| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    fn created(id: &str, card: &str, secs: i64) -> LiveEvent {
        LiveEvent::MessageCreated {
            message: Message::new(id, card, "hi", "alice", at(secs)),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_matching_queries() {
        let (store, registry) = registry();
        store.insert_message(Message::new("m1", "c1", "hello", "alice", at(1)));
        registry.create_session("s1");

        let (count, callback) = counting();
        let query = registry
            .subscribe_messages("s1", FindMessagesParams::for_card("c1"), callback)
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.query_count(), 1);

        registry.broadcast(&created("m2", "c1", 2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(query.window().await.len(), 2);

        registry.broadcast(&created("x1", "c2", 3)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_session_stops_delivery() {
        let (_store, registry) = registry();
        let (count, callback) = counting();
        registry
            .subscribe_messages("s1", FindMessagesParams::for_card("c1"), callback)
            .await;
        let (other, callback) = counting();
        registry
            .subscribe_messages("s2", FindMessagesParams::for_card("c1"), callback)
            .await;
        assert_eq!(registry.session_count(), 2);

        registry.close_session("s1").await;
        registry.broadcast(&created("m1", "c1", 1)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 2);
        assert_eq!(registry.query_count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_single_query() {
        let (_store, registry) = registry();
        let (_count, callback) = counting::<Label>();
        let query = registry
            .subscribe_labels("s1", FindLabelsParams::default(), callback)
            .await;

        assert!(!registry.unsubscribe("s2", query.id()).await);
        assert!(registry.unsubscribe("s1", query.id()).await);
        assert!(query.is_closed());
        assert_eq!(registry.query_count(), 0);
        assert_eq!(registry.session_count(), 1);
    }

    #[tokio::test]
    async fn test_close_drops_everything() {
        let (_store, registry) = registry();
        let (_a, callback) = counting();
        let first = registry
            .subscribe_messages("s1", FindMessagesParams::for_card("c1"), callback)
            .await;
        let (_b, callback) = counting();
        registry
            .subscribe_labels("s2", FindLabelsParams::default(), callback)
            .await;

        registry.close().await;
        assert_eq!(registry.session_count(), 0);
        assert!(first.is_closed());
    }
}
