//! Snapshot handle delivered to observers.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;

/// Pagination entry points of the query that produced a [`Window`].
#[async_trait]
pub trait Pager: Send + Sync {
    async fn next_page(&self);

    async fn prev_page(&self);
}

pub type Callback<T> = Arc<dyn Fn(Window<T>) + Send + Sync>;

/// Immutable copy of a query's current result.
///
/// Page triggers go back to the owning query; the fresh result arrives through
/// the query's callback, not through this value.
#[derive(Clone)]
pub struct Window<T> {
    items: Vec<T>,
    at_head: bool,
    at_tail: bool,
    pager: Option<Weak<dyn Pager>>,
}

impl<T> Window<T> {
    pub fn new(items: Vec<T>, at_head: bool, at_tail: bool, pager: Option<Weak<dyn Pager>>) -> Self {
        Self {
            items,
            at_head,
            at_tail,
            pager,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_head(&self) -> bool {
        self.at_head
    }

    pub fn is_tail(&self) -> bool {
        self.at_tail
    }

    pub fn has_next_page(&self) -> bool {
        !self.at_tail
    }

    pub fn has_prev_page(&self) -> bool {
        !self.at_head
    }

    pub async fn load_next_page(&self) {
        if self.at_tail {
            return;
        }
        if let Some(pager) = self.pager() {
            pager.next_page().await;
        }
    }

    pub async fn load_prev_page(&self) {
        if self.at_head {
            return;
        }
        if let Some(pager) = self.pager() {
            pager.prev_page().await;
        }
    }

    fn pager(&self) -> Option<Arc<dyn Pager>> {
        self.pager.as_ref().and_then(Weak::upgrade)
    }
}

impl<T: fmt::Debug> fmt::Debug for Window<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("items", &self.items)
            .field("at_head", &self.at_head)
            .field("at_tail", &self.at_tail)
            .finish()
    }
}

/// Callback slot plus the last window handed out.
pub(crate) struct Publisher<T> {
    callback: Mutex<Option<Callback<T>>>,
    latest: Mutex<Option<Window<T>>>,
    closed: AtomicBool,
}

impl<T: Clone> Publisher<T> {
    pub(crate) fn new() -> Self {
        Self {
            callback: Mutex::new(None),
            latest: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_callback(&self, callback: Callback<T>) {
        *self.callback.lock() = Some(callback);
    }

    pub(crate) fn remove_callback(&self) {
        *self.callback.lock() = None;
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.remove_callback();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn latest(&self) -> Option<Window<T>> {
        self.latest.lock().clone()
    }

    /// Record the window and hand it to the callback. Nothing is delivered after close.
    pub(crate) fn publish(&self, window: Window<T>) {
        if self.is_closed() {
            return;
        }
        *self.latest.lock() = Some(window.clone());
        // Clone out so the callback runs without holding the slot lock.
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(window);
        }
    }
}
