//! Subscription handles and their teardown lists.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identity of a subscription instance.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Teardown = Box<dyn FnOnce() + Send>;

struct SubscriptionInner {
    id: SubscriptionId,
    // Written only while `teardowns` is locked.
    closed: AtomicBool,
    teardowns: Mutex<Vec<Teardown>>,
}

/// Disposable handle returned by `subscribe`.
///
/// Clones share the same underlying subscription. Teardown callbacks run
/// exactly once, in registration order, when the subscription finalizes.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    /// Creates an open subscription.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(false)
    }

    /// Creates a subscription that is already finalized.
    #[must_use]
    pub fn closed() -> Self {
        Self::with_state(true)
    }

    fn with_state(closed: bool) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                id: SubscriptionId::new(),
                closed: AtomicBool::new(closed),
                teardowns: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The identity of this subscription.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.inner.id
    }

    /// Whether the subscription has been released, completed or errored.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Registers a teardown callback.
    ///
    /// If the subscription is already finalized the callback runs immediately.
    pub fn add<F>(&self, teardown: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut teardowns = self
                .inner
                .teardowns
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !self.inner.closed.load(Ordering::Acquire) {
                teardowns.push(Box::new(teardown));
                return;
            }
        }
        teardown();
    }

    /// Releases the subscription and runs its teardown callbacks.
    ///
    /// Idempotent: only the first call has any effect.
    pub fn unsubscribe(&self) {
        let drained = {
            let mut teardowns = self
                .inner
                .teardowns
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *teardowns)
        };
        for teardown in drained {
            teardown();
        }
    }

    /// Alias for [`Subscription::unsubscribe`].
    pub fn release(&self) {
        self.unsubscribe();
    }

    /// Returns true if both handles refer to the same subscription.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Subscription {}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
