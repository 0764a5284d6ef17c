//! Ambient execution contexts.
//!
//! A context is a node in a parent-linked tree. The current context is kept in
//! a task-local slot: `Context::run` pushes it for the dynamic extent of a
//! closure, and `Context::run_async` re-enters it around every poll of a
//! future, so interleaved tasks on one thread each observe their own context.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, OnceLock};
use std::task::{Context as TaskContext, Poll};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on parent-chain hops walked by a membership check.
pub const MAX_PARENT_HOPS: usize = 1000;

/// Stable identifier for a context.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Create a new random context id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct ContextNode {
    id: ContextId,
    name: String,
    parent: Option<Context>,
}

/// A node in the ambient context tree.
#[derive(Clone)]
pub struct Context {
    node: Arc<ContextNode>,
}

thread_local! {
    static CURRENT: RefCell<Vec<Context>> = const { RefCell::new(Vec::new()) };
}

impl Context {
    fn with_parent(name: impl Into<String>, parent: Option<Context>) -> Self {
        Self {
            node: Arc::new(ContextNode {
                id: ContextId::new(),
                name: name.into(),
                parent,
            }),
        }
    }

    /// The process-wide root context.
    #[must_use]
    pub fn root() -> Self {
        static ROOT: OnceLock<Context> = OnceLock::new();
        ROOT.get_or_init(|| Self::with_parent("root", None)).clone()
    }

    /// A new parentless context, unrelated to the root tree.
    #[must_use]
    pub fn detached(name: impl Into<String>) -> Self {
        Self::with_parent(name, None)
    }

    /// The context the calling code is running in.
    ///
    /// Falls back to [`Context::root`] outside any `run` extent.
    #[must_use]
    pub fn current() -> Self {
        CURRENT
            .with(|stack| stack.borrow().last().cloned())
            .unwrap_or_else(Self::root)
    }

    /// Creates a named child of this context.
    #[must_use]
    pub fn fork(&self, name: impl Into<String>) -> Self {
        Self::with_parent(name, Some(self.clone()))
    }

    /// This context's id.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.node.id
    }

    /// This context's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// The forking context, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Context> {
        self.node.parent.as_ref()
    }

    /// Makes this context current until the guard is dropped.
    #[must_use]
    pub fn enter(&self) -> EnterGuard {
        CURRENT.with(|stack| stack.borrow_mut().push(self.clone()));
        EnterGuard {
            id: self.id(),
            _not_send: PhantomData,
        }
    }

    /// Runs `f` with this context current.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter();
        f()
    }

    /// Wraps `fut` so that this context is current whenever it is polled.
    pub fn run_async<F: Future>(&self, fut: F) -> WithContext<F> {
        WithContext {
            context: self.clone(),
            inner: Box::pin(fut),
        }
    }

    /// Returns true if `ancestor` is this context or one of its ancestors.
    #[must_use]
    pub fn is_within(&self, ancestor: &Context) -> bool {
        chain_contains(self.clone(), ancestor, |c| c.parent().cloned())
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.node.id == other.node.id
    }
}

impl Eq for Context {}

impl Hash for Context {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.id.hash(state);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.node.id)
            .field("name", &self.node.name)
            .field("parent", &self.node.parent.as_ref().map(Context::id))
            .finish()
    }
}

/// Restores the previous current context on drop.
#[derive(Debug)]
pub struct EnterGuard {
    id: ContextId,
    _not_send: PhantomData<Rc<()>>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|c| c.id() == self.id) {
                stack.remove(pos);
            }
        });
    }
}

/// Future returned by [`Context::run_async`].
pub struct WithContext<F> {
    context: Context,
    inner: Pin<Box<F>>,
}

impl<F> WithContext<F> {
    /// The context entered on each poll.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }
}

impl<F: Future> Future for WithContext<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _guard = this.context.enter();
        this.inner.as_mut().poll(cx)
    }
}

impl<F> fmt::Debug for WithContext<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WithContext")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Walks the parent chain from `start` looking for `target`.
///
/// A missing parent ends the walk. Revisiting a node (a cycle) or exceeding
/// [`MAX_PARENT_HOPS`] hops also ends it, reporting false.
pub fn chain_contains<K, F>(start: K, target: &K, mut parent_of: F) -> bool
where
    K: Eq + Hash + Clone,
    F: FnMut(&K) -> Option<K>,
{
    let mut visited = HashSet::new();
    let mut current = start;
    let mut hops = 0usize;
    loop {
        if current == *target {
            return true;
        }
        if !visited.insert(current.clone()) {
            return false;
        }
        if hops == MAX_PARENT_HOPS {
            return false;
        }
        hops += 1;
        match parent_of(&current) {
            Some(parent) => current = parent,
            None => return false,
        }
    }
}
