//! Per-type subscribe slot.
//!
//! Every `Observable` dispatches its subscribe call through the slot of its
//! `StreamType`. The slot holds the current implementation; instrumentation
//! layers wrap it by installing a decorator that delegates to the previous
//! occupant.

use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use super::subscription::Subscription;

/// A single type-erased subscribe invocation.
///
/// Invoking it runs the observable's producer against its subscriber and
/// yields the resulting subscription.
pub struct SubscribeCall<'a> {
    producer: &'a mut dyn FnMut() -> Subscription,
}

impl<'a> SubscribeCall<'a> {
    /// Wraps a producer closure.
    pub fn new(producer: &'a mut dyn FnMut() -> Subscription) -> Self {
        Self { producer }
    }

    /// Runs the underlying subscribe.
    pub fn invoke(self) -> Subscription {
        (self.producer)()
    }
}

impl fmt::Debug for SubscribeCall<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeCall").finish_non_exhaustive()
    }
}

/// A subscribe implementation installed in a `StreamType` slot.
pub trait SubscribeImpl: Send + Sync {
    /// Performs the subscribe call and returns the subscription it produced.
    fn subscribe(&self, call: SubscribeCall<'_>) -> Subscription;

    /// The implementation this layer forwards to once it has become a pure
    /// pass-through. The slot skips such layers when it restores or wraps.
    fn bypass(&self) -> Option<Arc<dyn SubscribeImpl>> {
        None
    }
}

impl<F> SubscribeImpl for F
where
    F: Fn(SubscribeCall<'_>) -> Subscription + Send + Sync,
{
    fn subscribe(&self, call: SubscribeCall<'_>) -> Subscription {
        self(call)
    }
}

/// The stock implementation: runs the producer, nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseSubscribe;

impl SubscribeImpl for BaseSubscribe {
    fn subscribe(&self, call: SubscribeCall<'_>) -> Subscription {
        call.invoke()
    }
}

/// Returns true if both handles point at the same installed implementation.
#[must_use]
pub fn same_impl(a: &Arc<dyn SubscribeImpl>, b: &Arc<dyn SubscribeImpl>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Follows pass-through layers down to the first one that does work.
fn collapse(mut imp: Arc<dyn SubscribeImpl>) -> Arc<dyn SubscribeImpl> {
    while let Some(next) = imp.bypass() {
        imp = next;
    }
    imp
}

/// A reactive stream type and its shared subscribe slot.
pub struct StreamType {
    name: String,
    slot: RwLock<Option<Arc<dyn SubscribeImpl>>>,
}

impl StreamType {
    /// Creates a stream type with the stock subscribe implementation.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            slot: RwLock::new(Some(Arc::new(BaseSubscribe))),
        })
    }

    /// Creates a stream type whose slot is empty.
    ///
    /// Subscribing still works (the producer runs directly), but the type
    /// cannot be intercepted.
    #[must_use]
    pub fn without_subscribe(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            slot: RwLock::new(None),
        })
    }

    /// The process-wide stream type used by `Observable::new`.
    #[must_use]
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<StreamType>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Self::new("Observable")))
    }

    /// The type's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The currently installed implementation, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<dyn SubscribeImpl>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns true if `imp` is the implementation currently installed.
    #[must_use]
    pub fn is_current(&self, imp: &Arc<dyn SubscribeImpl>) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|cur| same_impl(cur, imp))
    }

    /// Replaces the slot contents, returning the previous occupant.
    pub fn replace(&self, imp: Option<Arc<dyn SubscribeImpl>>) -> Option<Arc<dyn SubscribeImpl>> {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, imp)
    }

    /// Atomically wraps the current implementation.
    ///
    /// `wrap` receives the current occupant, with pass-through layers
    /// skipped, and returns its replacement. Returns `(original, installed)`,
    /// or `None` if the slot is empty.
    pub fn wrap_with<F>(&self, wrap: F) -> Option<(Arc<dyn SubscribeImpl>, Arc<dyn SubscribeImpl>)>
    where
        F: FnOnce(Arc<dyn SubscribeImpl>) -> Arc<dyn SubscribeImpl>,
    {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        let original = collapse(slot.as_ref().map(Arc::clone)?);
        let installed = wrap(Arc::clone(&original));
        *slot = Some(Arc::clone(&installed));
        Some((original, installed))
    }

    /// Restores `original` only if `expected` is still installed.
    ///
    /// Pass-through layers under `original` are dropped from the chain.
    /// Returns true if the slot was restored.
    pub fn restore_if_current(
        &self,
        expected: &Arc<dyn SubscribeImpl>,
        original: Arc<dyn SubscribeImpl>,
    ) -> bool {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(cur) if same_impl(cur, expected) => {
                *slot = Some(collapse(original));
                true
            }
            _ => false,
        }
    }

    /// Dispatches a subscribe call through the slot.
    ///
    /// The slot lock is released before the implementation runs, so producers
    /// may subscribe again or reconfigure the slot.
    pub fn dispatch(&self, call: SubscribeCall<'_>) -> Subscription {
        match self.current() {
            Some(imp) => imp.subscribe(call),
            None => call.invoke(),
        }
    }
}

impl fmt::Debug for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamType")
            .field("name", &self.name)
            .field("has_subscribe", &self.current().is_some())
            .finish()
    }
}
