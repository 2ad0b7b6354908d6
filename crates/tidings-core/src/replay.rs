//! Offline replay of a message window from a JSON fixture.
//!
//! A fixture seeds an in-memory store and archive, names the query params and
//! lists events to feed the window after it has been paged to both ends.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::archive::{ArchiveMetadata, ParsedArchive, StaticArchive};
use crate::config::CoreConfig;
use crate::events::LiveEvent;
use crate::models::{Message, MessagesGroup};
use crate::query::{MessageWindow, Query, QueryContext, Window};
use crate::store::{FindMessagesParams, InMemoryStore};

/// Pages loaded per direction before giving up on reaching a boundary.
const MAX_PAGES: usize = 1000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    pub params: FindMessagesParams,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub archives: Vec<FixtureArchive>,
    #[serde(default)]
    pub events: Vec<LiveEvent>,
    #[serde(default)]
    pub group_page_size: Option<usize>,
}

/// A group descriptor together with the messages its blob holds.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureArchive {
    pub group: MessagesGroup,
    pub messages: Vec<Message>,
}

impl Fixture {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing fixture {}", path.display()))
    }
}

/// Every window the query delivered, in order.
pub async fn replay(fixture: &Fixture) -> Vec<Window<Message>> {
    let store = Arc::new(InMemoryStore::new());
    let archive = Arc::new(StaticArchive::new());
    for message in &fixture.messages {
        store.insert_message(message.clone());
    }
    for entry in &fixture.archives {
        store.insert_group(entry.group.clone());
        archive.insert(
            entry.group.blob_id.clone(),
            ParsedArchive {
                metadata: ArchiveMetadata {
                    card_id: entry.group.card_id.clone(),
                    title: None,
                    from_date: entry.group.from_date,
                    to_date: entry.group.to_date,
                },
                messages: entry.messages.clone(),
            },
        );
    }

    let mut config = CoreConfig::default();
    if let Some(size) = fixture.group_page_size {
        config = config.with_group_page_size(size);
    }
    let ctx = QueryContext::new(store.clone(), archive, config);

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let query = Query::create(1, MessageWindow::new(ctx, fixture.params.clone()));
    {
        let delivered = delivered.clone();
        query.set_callback(Arc::new(move |window: Window<Message>| {
            delivered.lock().push(window);
        }));
    }
    query.refresh().await;

    for _ in 0..MAX_PAGES {
        if !query.window().await.has_next_page() {
            break;
        }
        query.load_next_page().await;
    }
    for _ in 0..MAX_PAGES {
        if !query.window().await.has_prev_page() {
            break;
        }
        query.load_prev_page().await;
    }

    for event in &fixture.events {
        // Keep the store in step so later page loads see the same data
        match event {
            LiveEvent::MessageCreated { message } => store.insert_message(message.clone()),
            LiveEvent::MessagesGroupCreated { group } => store.insert_group(group.clone()),
            _ => {}
        }
        tracing::debug!(kind = event.kind(), "replaying event");
        query.on_event(event).await;
    }

    query.unsubscribe().await;
    let windows = delivered.lock().clone();
    windows
}

/// One line per window: boundary flags and item ids.
pub fn describe(window: &Window<Message>) -> String {
    let ids: Vec<&str> = window.items().iter().map(|m| m.id.as_str()).collect();
    format!(
        "head={} tail={} [{}]",
        window.is_head(),
        window.is_tail(),
        ids.join(", ")
    )
}
