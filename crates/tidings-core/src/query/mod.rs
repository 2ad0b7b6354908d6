//! Live queries: windowed message, notification and context queries, plus
//! unpaginated label and collaborator sets.

pub mod contexts;
mod hydrate;
pub mod live;
pub mod messages;
pub mod notifications;
mod paging;
pub mod set;
mod settle;
pub mod window;

use std::sync::Arc;

use async_trait::async_trait;

use crate::archive::ArchiveSource;
use crate::config::CoreConfig;
use crate::events::LiveEvent;
use crate::store::HotStore;

pub use contexts::{ContextWindow, ContextsQuery};
pub use live::{Query, QueryEngine};
pub use messages::{MessageWindow, MessagesQuery};
pub use notifications::{NotificationWindow, NotificationsQuery};
pub use paging::Direction;
pub use set::{
    CollaboratorsQuery, CollaboratorsSource, LabelsQuery, LabelsSource, SetDelta, SetQuery,
    SetSource, SetWindow,
};
pub use window::{Callback, Pager, Window};

pub type QueryId = u64;

/// Collaborators every query reads from.
#[derive(Clone)]
pub struct QueryContext {
    pub store: Arc<dyn HotStore>,
    pub archive: Arc<dyn ArchiveSource>,
    pub config: Arc<CoreConfig>,
}

impl QueryContext {
    pub fn new(
        store: Arc<dyn HotStore>,
        archive: Arc<dyn ArchiveSource>,
        config: CoreConfig,
    ) -> Self {
        Self {
            store,
            archive,
            config: Arc::new(config),
        }
    }
}

/// Type-erased view of a live query, as held by the registry.
#[async_trait]
pub trait LiveQuery: Send + Sync {
    fn id(&self) -> QueryId;

    async fn on_event(&self, event: &LiveEvent);

    async fn unsubscribe(&self);
}
