//! Live queries over cards, messages and notifications.
//!
//! Queries hold a window of a result set, page through hot storage and
//! archived message groups, and keep themselves current from broadcast
//! mutation events.

pub mod archive;
pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod models;
pub mod query;
pub mod registry;
pub mod replay;
pub mod store;
pub mod tracing_setup;

// Re-export the types boundary code reaches for most
pub use archive::{ArchiveReader, ArchiveSource, StaticArchive};
pub use cache::{Keyed, OrderedResultCache};
pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use events::LiveEvent;
pub use query::{QueryContext, Window};
pub use registry::{QueryRegistry, SessionId};
pub use store::{HotStore, InMemoryStore};
