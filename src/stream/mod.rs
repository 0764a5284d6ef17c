//! Minimal reactive-stream layer.
//!
//! Observables here dispatch every subscribe through the slot of their
//! `StreamType`, which is what the leak detector wraps. The layer honours the
//! usual subscription protocol: teardown callbacks run exactly once, callbacks
//! added after finalization run immediately, and release is idempotent.

/// Observable, observer and subscriber types.
pub mod observable;
/// Per-type subscribe slot.
pub mod slot;
/// Multicast subject.
pub mod subject;
/// Disposable subscription handles.
pub mod subscription;

pub use observable::{FnObserver, Observable, Observer, Subscriber};
pub use slot::{BaseSubscribe, StreamType, SubscribeCall, SubscribeImpl};
pub use subject::Subject;
pub use subscription::{Subscription, SubscriptionId};
