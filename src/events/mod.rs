//! Multi-subscriber notifications fired by managers and voice clients.
//!
//! Each notification source owns a [`Subscribers`] list. Firing a list with
//! no subscribers does nothing. When a notification fires, *every* handler is
//! run in registration order, even if an earlier one fails: any failures are
//! collected and raised together as an [`AggregateError`] once all handlers
//! have finished.

mod error;

pub use self::error::AggregateError;

use crate::error::BoxError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::{fmt, sync::Arc};

/// Trait to handle a notification of type `E`.
///
/// This is implemented for any `Fn(&E) -> Result<(), BoxError>` closure,
/// for handlers which have no need to await.
#[async_trait]
pub trait Handler<E>: Send + Sync {
    /// Respond to one notification.
    async fn act(&self, event: &E) -> Result<(), BoxError>;
}

#[async_trait]
impl<E, F> Handler<E> for F
where
    E: Send + Sync + 'static,
    F: Fn(&E) -> Result<(), BoxError> + Send + Sync,
{
    async fn act(&self, event: &E) -> Result<(), BoxError> {
        (self)(event)
    }
}

/// An ordered list of handlers for one kind of notification.
pub struct Subscribers<E> {
    handlers: RwLock<Vec<Arc<dyn Handler<E>>>>,
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<E> fmt::Debug for Subscribers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}

impl<E: Send + Sync + 'static> Subscribers<E> {
    /// Creates an empty subscriber list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler to the end of this list.
    pub fn add<H: Handler<E> + 'static>(&self, handler: H) {
        self.handlers.write().push(Arc::new(handler));
    }

    /// Removes all handlers from this list.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Runs every registered handler against `event`.
    ///
    /// Handlers added while this call is in progress are not run for `event`.
    pub async fn invoke(&self, event: &E) -> Result<(), AggregateError> {
        let handlers = self.handlers.read().clone();
        let mut errors = Vec::new();

        for handler in handlers {
            if let Err(e) = handler.act(event).await {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AggregateError::new(errors))
        }
    }
}
