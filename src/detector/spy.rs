//! Spy handles: the toggles that switch tracking on.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{Context, WithContext};

/// Unique identifier for a spy.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpyId(Uuid);

impl SpyId {
    /// Create a new random spy id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SpyId {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a spy tracks subscriptions.
#[derive(Debug, Clone)]
pub enum SpyScope {
    /// Every subscribe call in the process.
    Global,
    /// Only subscribe calls made inside this context's subtree.
    Scoped(Context),
}

#[derive(Debug)]
pub(crate) struct SpyState {
    id: SpyId,
    enabled: AtomicBool,
    scope: SpyScope,
}

impl SpyState {
    pub(crate) fn new(scope: SpyScope) -> Self {
        Self {
            id: SpyId::new(),
            enabled: AtomicBool::new(true),
            scope,
        }
    }

    pub(crate) fn id(&self) -> SpyId {
        self.id
    }

    pub(crate) fn is_enabled(&self) -> bool {
        if !self.enabled.load(Ordering::Acquire) {
            return false;
        }
        match &self.scope {
            SpyScope::Global => true,
            SpyScope::Scoped(ctx) => Context::current().is_within(ctx),
        }
    }
}

type Teardown = Box<dyn FnOnce() + Send>;

/// An active spy on a detector.
///
/// Dropping the handle disables it; explicit [`SpyHandle::disable`] and drop
/// leave the detector in the same state.
pub struct SpyHandle {
    state: Arc<SpyState>,
    teardown: Mutex<Option<Teardown>>,
}

impl SpyHandle {
    pub(crate) fn new(state: Arc<SpyState>, teardown: Teardown) -> Self {
        Self {
            state,
            teardown: Mutex::new(Some(teardown)),
        }
    }

    /// This spy's id.
    #[must_use]
    pub fn id(&self) -> SpyId {
        self.state.id
    }

    /// Whether the spy tracks a subscribe call made right now, from here.
    ///
    /// A scoped spy additionally requires the caller to be inside its context.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    /// The spy's scope.
    #[must_use]
    pub fn scope(&self) -> &SpyScope {
        &self.state.scope
    }

    /// The forked context of a scoped spy.
    #[must_use]
    pub fn context(&self) -> Option<&Context> {
        match &self.state.scope {
            SpyScope::Global => None,
            SpyScope::Scoped(ctx) => Some(ctx),
        }
    }

    /// Runs `f` inside the spy's context (directly, for a global spy).
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.context() {
            Some(ctx) => ctx.run(f),
            None => f(),
        }
    }

    /// Wraps `fut` so it is polled inside the spy's context.
    ///
    /// A global spy has no context of its own; the caller's current context
    /// is used instead.
    pub fn run_async<F: Future>(&self, fut: F) -> WithContext<F> {
        self.context()
            .cloned()
            .unwrap_or_else(Context::current)
            .run_async(fut)
    }

    /// Stops tracking and deregisters from the detector.
    ///
    /// Idempotent: teardown runs only on the first call.
    pub fn disable(&self) {
        let teardown = self
            .teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.state.enabled.store(false, Ordering::Release);
        if let Some(teardown) = teardown {
            teardown();
        }
    }
}

impl Drop for SpyHandle {
    fn drop(&mut self) {
        self.disable();
    }
}

impl fmt::Debug for SpyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpyHandle")
            .field("id", &self.state.id)
            .field("enabled", &self.state.enabled.load(Ordering::Acquire))
            .field("scope", &self.state.scope)
            .finish()
    }
}
