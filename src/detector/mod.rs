//! The subscription leak detector.
//!
//! A `LeakDetector` wraps the subscribe slot of one `StreamType` while at
//! least one of its spies is active. Each subscribe call made while a spy is
//! enabled is assigned a sequence number and recorded, together with a stack
//! trace, until the resulting subscription finalizes. A `Snapshot` of what is
//! still open can then be asserted empty.
//!
//! ```rust,ignore
//! use subleak::{LeakDetector, Observable, StreamType};
//!
//! let ty = StreamType::new("Observable");
//! let detector = LeakDetector::for_stream_type(&ty);
//!
//! let spy = detector.spy()?;
//! let sub = Observable::<u32>::never().with_stream_type(&ty).subscribe(|_| {});
//! spy.disable();
//!
//! assert_eq!(detector.snapshot().len(), 1);
//! sub.unsubscribe();
//! detector.snapshot().assert_empty_or_report()?;
//! ```

/// Interception patch ownership.
pub mod controller;
/// Live subscription registry.
pub mod registry;
/// Snapshots and leak reports.
pub mod snapshot;
/// Spy handles.
pub mod spy;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::capture::{widen_stack_trace_limit, BacktraceCapture, StackCapture};
use crate::config::DetectorConfig;
use crate::context::Context;
use crate::error::LeakResult;
use crate::stream::{StreamType, SubscribeCall, SubscribeImpl, Subscription};

use controller::InterceptionController;
use registry::SubscriptionRegistry;
use spy::{SpyHandle, SpyId, SpyScope, SpyState};

pub use registry::SubscriptionRecord;
pub use snapshot::{LeakEntry, Snapshot};

struct DetectorInner {
    config: DetectorConfig,
    capture: Arc<dyn StackCapture>,
    time: AtomicU64,
    registry: SubscriptionRegistry,
    spies: Mutex<Vec<Arc<SpyState>>>,
    controller: InterceptionController,
}

impl DetectorInner {
    fn spies(&self) -> MutexGuard<'_, Vec<Arc<SpyState>>> {
        self.spies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn any_spy_enabled(&self) -> bool {
        self.spies().iter().any(|spy| spy.is_enabled())
    }

    fn capture_trace(&self) -> Option<String> {
        if !self.config.capture_stacks {
            return None;
        }
        let _limit = widen_stack_trace_limit(self.config.stack_depth);
        self.capture.capture()
    }

    /// Records a subscription produced while the patch was installed.
    fn track(self: &Arc<Self>, subscription: &Subscription) {
        if !self.any_spy_enabled() {
            return;
        }

        let seq = self.time.fetch_add(1, Ordering::SeqCst);
        let trace = self.capture_trace();
        let has_trace = trace.is_some();
        let id = subscription.id();
        let created = self.registry.record(id, seq, trace);
        tracing::trace!(
            detector = %self.config.name,
            subscription = %id,
            seq,
            has_trace,
            created,
            "tracked subscribe call"
        );

        if created {
            // Fires immediately if the subscription already finalized.
            let weak = Arc::downgrade(self);
            subscription.add(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.registry.remove(id);
                }
            });
        }
    }

    fn enable(self: &Arc<Self>, scope: SpyScope) -> LeakResult<SpyHandle> {
        let mut spies = self.spies();
        let weak = Arc::downgrade(self);
        self.controller.ensure_patched(|original, retired| {
            let wrapper: Arc<dyn SubscribeImpl> = Arc::new(TrackingSubscribe {
                original,
                retired,
                detector: weak,
            });
            wrapper
        })?;

        let state = Arc::new(SpyState::new(scope));
        spies.push(Arc::clone(&state));
        let active = spies.len();
        drop(spies);

        let id = state.id();
        tracing::debug!(detector = %self.config.name, spy = ?id, active, "spy enabled");

        let weak = Arc::downgrade(self);
        Ok(SpyHandle::new(
            state,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.release(id);
                }
            }),
        ))
    }

    fn release(&self, id: SpyId) {
        let mut spies = self.spies();
        spies.retain(|spy| spy.id() != id);
        let active = spies.len();
        if active == 0 {
            self.controller.try_unpatch();
        }
        drop(spies);
        tracing::debug!(detector = %self.config.name, spy = ?id, active, "spy disabled");
    }
}

impl Drop for DetectorInner {
    fn drop(&mut self) {
        self.controller.try_unpatch();
    }
}

/// The wrapper placed in the target's subscribe slot.
struct TrackingSubscribe {
    original: Arc<dyn SubscribeImpl>,
    retired: Arc<AtomicBool>,
    detector: Weak<DetectorInner>,
}

impl SubscribeImpl for TrackingSubscribe {
    fn subscribe(&self, call: SubscribeCall<'_>) -> Subscription {
        let subscription = self.original.subscribe(call);
        if self.retired.load(Ordering::Acquire) {
            return subscription;
        }
        if let Some(detector) = self.detector.upgrade() {
            detector.track(&subscription);
        }
        subscription
    }

    fn bypass(&self) -> Option<Arc<dyn SubscribeImpl>> {
        self.retired
            .load(Ordering::Acquire)
            .then(|| Arc::clone(&self.original))
    }
}

/// Builder for [`LeakDetector`].
#[derive(Debug, Default)]
pub struct DetectorBuilder {
    stream_type: Option<Arc<StreamType>>,
    config: Option<DetectorConfig>,
    capture: Option<Arc<dyn StackCapture>>,
}

impl DetectorBuilder {
    /// Creates a builder targeting the process-wide stream type.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stream type to intercept.
    #[must_use]
    pub fn stream_type(mut self, stream_type: &Arc<StreamType>) -> Self {
        self.stream_type = Some(Arc::clone(stream_type));
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: DetectorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the stack-capture strategy.
    #[must_use]
    pub fn capture(mut self, capture: Arc<dyn StackCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Builds the detector. Nothing is patched until a spy is enabled.
    #[must_use]
    pub fn build(self) -> LeakDetector {
        let target = self.stream_type.unwrap_or_else(StreamType::global);
        LeakDetector {
            inner: Arc::new(DetectorInner {
                config: self.config.unwrap_or_default(),
                capture: self
                    .capture
                    .unwrap_or_else(|| Arc::new(BacktraceCapture) as Arc<dyn StackCapture>),
                time: AtomicU64::new(0),
                registry: SubscriptionRegistry::default(),
                spies: Mutex::new(Vec::new()),
                controller: InterceptionController::new(target),
            }),
        }
    }
}

/// Detects subscriptions that outlive a test.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct LeakDetector {
    inner: Arc<DetectorInner>,
}

impl LeakDetector {
    /// Detector on the process-wide stream type with default configuration.
    #[must_use]
    pub fn new() -> Self {
        DetectorBuilder::new().build()
    }

    /// Detector on the given stream type with default configuration.
    #[must_use]
    pub fn for_stream_type(stream_type: &Arc<StreamType>) -> Self {
        DetectorBuilder::new().stream_type(stream_type).build()
    }

    /// Starts building a detector.
    #[must_use]
    pub fn builder() -> DetectorBuilder {
        DetectorBuilder::new()
    }

    /// Enables a global spy: every subscribe on the target type is tracked.
    ///
    /// # Errors
    ///
    /// `LeakError::Configuration` if the target type cannot be intercepted.
    pub fn spy(&self) -> LeakResult<SpyHandle> {
        self.inner.enable(SpyScope::Global)
    }

    /// Enables a scoped spy on a context forked from the current one.
    ///
    /// Only subscribe calls made inside that context (see
    /// [`SpyHandle::run`]) are tracked.
    ///
    /// # Errors
    ///
    /// `LeakError::Configuration` if the target type cannot be intercepted.
    pub fn scoped_spy(&self) -> LeakResult<SpyHandle> {
        let name = format!("{}-spy", self.inner.config.name);
        self.scoped_spy_named(name)
    }

    /// Like [`LeakDetector::scoped_spy`] with an explicit context name.
    ///
    /// # Errors
    ///
    /// `LeakError::Configuration` if the target type cannot be intercepted.
    pub fn scoped_spy_named(&self, name: impl Into<String>) -> LeakResult<SpyHandle> {
        let ctx = Context::current().fork(name);
        self.inner.enable(SpyScope::Scoped(ctx))
    }

    /// Copies the open subscriptions.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.inner.config.name.clone(), self.inner.registry.entries())
    }

    /// Runs `body` under a global spy, then asserts nothing it subscribed is still open.
    ///
    /// # Errors
    ///
    /// `LeakError::Configuration` if the target cannot be intercepted,
    /// `LeakError::LeakDetected` if subscriptions remain open.
    pub fn check<R>(&self, body: impl FnOnce() -> R) -> LeakResult<R> {
        let spy = self.spy()?;
        let out = body();
        spy.disable();
        self.snapshot().assert_empty_or_report()?;
        Ok(out)
    }

    /// Runs `body` inside a scoped spy, then asserts nothing it subscribed is still open.
    ///
    /// # Errors
    ///
    /// As [`LeakDetector::check`].
    pub fn check_scoped<R>(&self, body: impl FnOnce() -> R) -> LeakResult<R> {
        let spy = self.scoped_spy()?;
        let out = spy.run(body);
        spy.disable();
        self.snapshot().assert_empty_or_report()?;
        Ok(out)
    }

    /// Number of active spies.
    #[must_use]
    pub fn active_spies(&self) -> usize {
        self.inner.spies().len()
    }

    /// Whether the interception layer is installed.
    #[must_use]
    pub fn is_patched(&self) -> bool {
        self.inner.controller.is_patched()
    }

    /// Number of tracked subscribe calls so far.
    #[must_use]
    pub fn time(&self) -> u64 {
        self.inner.time.load(Ordering::SeqCst)
    }

    /// Number of subscriptions currently open in the live registry.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// The intercepted stream type.
    #[must_use]
    pub fn stream_type(&self) -> &Arc<StreamType> {
        self.inner.controller.target()
    }

    /// The detector's configuration.
    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.inner.config
    }
}

impl Default for LeakDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LeakDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeakDetector")
            .field("name", &self.inner.config.name)
            .field("stream_type", &self.stream_type().name())
            .field("active_spies", &self.active_spies())
            .field("open", &self.open_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::capture::{stack_trace_limit, NoCapture};
    use crate::stream::{Observable, Subject};

    fn detector(ty: &Arc<StreamType>) -> LeakDetector {
        LeakDetector::builder()
            .stream_type(ty)
            .capture(Arc::new(NoCapture))
            .build()
    }

    #[test]
    fn patch_follows_active_spy_count() {
        let ty = StreamType::new("T");
        let d = detector(&ty);
        assert!(!d.is_patched());

        let a = d.spy().unwrap();
        let b = d.scoped_spy().unwrap();
        assert!(d.is_patched());
        assert_eq!(d.active_spies(), 2);

        a.disable();
        assert!(d.is_patched());
        drop(b);
        assert!(!d.is_patched());
        assert_eq!(d.active_spies(), 0);
    }

    #[test]
    fn untouched_when_no_spy_enabled() {
        let ty = StreamType::new("T");
        let d = detector(&ty);
        let spy = d.scoped_spy().unwrap();

        // Outside the spy's context: patched but nothing enabled.
        let sub = Observable::<u8>::never().with_stream_type(&ty).subscribe(|_| {});
        assert_eq!(d.time(), 0);
        assert_eq!(d.open_count(), 0);

        spy.disable();
        sub.unsubscribe();
    }

    #[test]
    fn sequence_numbers_are_strictly_increasing() {
        let ty = StreamType::new("T");
        let d = detector(&ty);
        let subject = Subject::<u8>::on(&ty);

        let spy = d.spy().unwrap();
        let _s: Vec<_> = (0..4).map(|_| subject.subscribe(|_| {})).collect();
        spy.disable();

        let seqs: Vec<u64> = d
            .snapshot()
            .iter()
            .flat_map(|e| e.record.sequence().iter().copied())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert_eq!(d.time(), 4);
    }

    #[test]
    fn untracked_calls_when_capture_unavailable() {
        let ty = StreamType::new("T");
        let d = detector(&ty);
        let spy = d.spy().unwrap();
        let _sub = Observable::<u8>::never().with_stream_type(&ty).subscribe(|_| {});
        spy.disable();

        let snap = d.snapshot();
        let record = &snap.iter().next().unwrap().record;
        assert_eq!(record.call_count(), 1);
        assert_eq!(record.untracked(), 1);
        assert!(record.traces().is_empty());
    }

    #[test]
    fn capture_disabled_by_config_counts_untracked() {
        let ty = StreamType::new("T");
        let d = LeakDetector::builder()
            .stream_type(&ty)
            .config(DetectorConfig {
                capture_stacks: false,
                ..DetectorConfig::default()
            })
            .build();

        let spy = d.spy().unwrap();
        let _sub = Observable::<u8>::never().with_stream_type(&ty).subscribe(|_| {});
        spy.disable();

        assert_eq!(d.snapshot().iter().next().unwrap().record.untracked(), 1);
    }

    #[test]
    fn stack_limit_is_restored_after_tracking() {
        let ty = StreamType::new("T");
        let d = LeakDetector::for_stream_type(&ty);
        let before = stack_trace_limit();

        let spy = d.spy().unwrap();
        let sub = Observable::<u8>::never().with_stream_type(&ty).subscribe(|_| {});
        spy.disable();

        assert_eq!(stack_trace_limit(), before);
        sub.unsubscribe();
    }

    #[test]
    fn dropping_detector_restores_original() {
        let ty = StreamType::new("T");
        let base = ty.current().unwrap();
        let d = detector(&ty);
        let spy = d.spy().unwrap();
        assert!(!ty.is_current(&base));

        // The spy outlives the detector's last public handle.
        drop(d);
        assert!(ty.is_current(&base));

        let sub = Observable::<u8>::never().with_stream_type(&ty).subscribe(|_| {});
        sub.unsubscribe();
        drop(spy);
    }
}
