use std::future::Future;

use futures::future::BoxFuture;

/// Query state that is either still being fetched or available.
///
/// Every entry point of a query calls [`Settle::settle`] before reading or
/// mutating the state, so work arriving while the initial fetch is in flight
/// queues behind it. The pending future stays in place until it completes, so
/// a caller that stops waiting leaves it for the next one to finish.
pub(crate) struct Settle<S> {
    value: Option<S>,
    pending: BoxFuture<'static, S>,
}

impl<S> Settle<S> {
    pub(crate) fn pending<F>(future: F) -> Self
    where
        F: Future<Output = S> + Send + 'static,
    {
        Self {
            value: None,
            pending: Box::pin(future),
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    /// Resolve the pending future if it has not completed yet and return the state.
    pub(crate) async fn settle(&mut self) -> &mut S {
        let Self { value, pending } = self;
        match *value {
            Some(ref mut ready) => ready,
            None => value.insert(pending.await),
        }
    }
}
