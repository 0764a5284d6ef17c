//! Cold observables, observers and subscribers.
//!
//! Subscribing dispatches through the observable's `StreamType` slot, so an
//! installed detector sees every call.

use std::fmt;
use std::sync::Arc;

use crate::error::StreamError;

use super::slot::{StreamType, SubscribeCall};
use super::subscription::Subscription;

/// Receives values, errors and completion from an observable.
pub trait Observer<T>: Send + Sync {
    /// Called for each emitted value.
    fn next(&self, value: T);

    /// Called once if the stream fails.
    fn error(&self, _err: StreamError) {}

    /// Called once if the stream completes.
    fn complete(&self) {}
}

type NextFn<T> = Box<dyn Fn(T) + Send + Sync>;
type ErrorFn = Box<dyn Fn(StreamError) + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;

/// Observer assembled from closures.
pub struct FnObserver<T> {
    next: NextFn<T>,
    error: Option<ErrorFn>,
    complete: Option<CompleteFn>,
}

impl<T> FnObserver<T> {
    /// Observer that forwards values to `next` and ignores termination.
    pub fn new<F>(next: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            next: Box::new(next),
            error: None,
            complete: None,
        }
    }

    /// Adds an error callback.
    #[must_use]
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(StreamError) + Send + Sync + 'static,
    {
        self.error = Some(Box::new(f));
        self
    }

    /// Adds a completion callback.
    #[must_use]
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.complete = Some(Box::new(f));
        self
    }
}

impl<T> Observer<T> for FnObserver<T> {
    fn next(&self, value: T) {
        (self.next)(value);
    }

    fn error(&self, err: StreamError) {
        if let Some(f) = &self.error {
            f(err);
        }
    }

    fn complete(&self) {
        if let Some(f) = &self.complete {
            f();
        }
    }
}

/// The producer-facing side of a subscription.
///
/// Terminal notifications close the shared subscription, which runs its
/// teardown callbacks.
pub struct Subscriber<T> {
    observer: Arc<dyn Observer<T>>,
    subscription: Subscription,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            observer: Arc::clone(&self.observer),
            subscription: self.subscription.clone(),
        }
    }
}

impl<T> Subscriber<T> {
    /// Creates a subscriber with a fresh subscription.
    #[must_use]
    pub fn new(observer: Arc<dyn Observer<T>>) -> Self {
        Self::with_subscription(observer, Subscription::new())
    }

    /// Creates a subscriber that shares an existing subscription.
    #[must_use]
    pub fn with_subscription(observer: Arc<dyn Observer<T>>, subscription: Subscription) -> Self {
        Self {
            observer,
            subscription,
        }
    }

    /// Delivers a value unless the subscription is closed.
    pub fn next(&self, value: T) {
        if !self.subscription.is_closed() {
            self.observer.next(value);
        }
    }

    /// Delivers an error and finalizes the subscription.
    pub fn error(&self, err: StreamError) {
        if self.subscription.is_closed() {
            return;
        }
        self.observer.error(err);
        self.subscription.unsubscribe();
    }

    /// Delivers completion and finalizes the subscription.
    pub fn complete(&self) {
        if self.subscription.is_closed() {
            return;
        }
        self.observer.complete();
        self.subscription.unsubscribe();
    }

    /// Whether the subscription is finalized.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.subscription.is_closed()
    }

    /// Registers teardown logic on the subscription.
    pub fn add<F>(&self, teardown: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.subscription.add(teardown);
    }

    /// The subscription this subscriber feeds.
    #[must_use]
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

type Producer<T> = dyn Fn(&Subscriber<T>) + Send + Sync;

/// A cold reactive stream.
///
/// Subscribing runs the producer once per subscription, routed through the
/// subscribe slot of the observable's `StreamType`.
pub struct Observable<T> {
    stream_type: Arc<StreamType>,
    producer: Arc<Producer<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            stream_type: Arc::clone(&self.stream_type),
            producer: Arc::clone(&self.producer),
        }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("stream_type", &self.stream_type.name())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Observable<T> {
    /// Creates an observable of the process-wide stream type.
    pub fn new<F>(producer: F) -> Self
    where
        F: Fn(&Subscriber<T>) + Send + Sync + 'static,
    {
        Self::on(&StreamType::global(), producer)
    }

    /// Creates an observable of the given stream type.
    pub fn on<F>(stream_type: &Arc<StreamType>, producer: F) -> Self
    where
        F: Fn(&Subscriber<T>) + Send + Sync + 'static,
    {
        Self {
            stream_type: Arc::clone(stream_type),
            producer: Arc::new(producer),
        }
    }

    /// Rebinds this observable to another stream type.
    #[must_use]
    pub fn with_stream_type(mut self, stream_type: &Arc<StreamType>) -> Self {
        self.stream_type = Arc::clone(stream_type);
        self
    }

    /// The stream type this observable dispatches through.
    #[must_use]
    pub fn stream_type(&self) -> &Arc<StreamType> {
        &self.stream_type
    }

    /// Never emits and never terminates.
    #[must_use]
    pub fn never() -> Self {
        Self::new(|_| {})
    }

    /// Completes immediately without emitting.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Subscriber::complete)
    }

    /// Fails immediately with `err`.
    #[must_use]
    pub fn throw(err: StreamError) -> Self {
        Self::new(move |s| s.error(err.clone()))
    }

    /// Subscribes with a value callback.
    pub fn subscribe<F>(&self, next: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_observer(FnObserver::new(next))
    }

    /// Subscribes with a full observer.
    pub fn subscribe_observer<O>(&self, observer: O) -> Subscription
    where
        O: Observer<T> + 'static,
    {
        self.subscribe_with(Subscriber::new(Arc::new(observer)))
    }

    /// Subscribes an existing subscriber.
    ///
    /// The returned subscription is the subscriber's own, so operators that
    /// forward their downstream subscriber yield the same instance again.
    pub fn subscribe_with(&self, subscriber: Subscriber<T>) -> Subscription {
        let mut run = || {
            (self.producer)(&subscriber);
            subscriber.subscription().clone()
        };
        self.stream_type.dispatch(SubscribeCall::new(&mut run))
    }

    /// Transforms each value with `f`.
    pub fn map<U, F>(&self, f: F) -> Observable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        Observable::on(&self.stream_type, move |downstream: &Subscriber<U>| {
            let upstream = Subscriber::with_subscription(
                Arc::new(MapObserver {
                    downstream: downstream.clone(),
                    f: Arc::clone(&f),
                }),
                downstream.subscription().clone(),
            );
            source.subscribe_with(upstream);
        })
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    /// Emits each value synchronously, then completes.
    #[must_use]
    pub fn of(values: Vec<T>) -> Self {
        Self::new(move |s| {
            for v in &values {
                if s.is_closed() {
                    return;
                }
                s.next(v.clone());
            }
            s.complete();
        })
    }
}

struct MapObserver<U, F> {
    downstream: Subscriber<U>,
    f: Arc<F>,
}

impl<T, U, F> Observer<T> for MapObserver<U, F>
where
    U: Send,
    F: Fn(T) -> U + Send + Sync,
{
    fn next(&self, value: T) {
        self.downstream.next((self.f)(value));
    }

    fn error(&self, err: StreamError) {
        self.downstream.error(err);
    }

    fn complete(&self) {
        self.downstream.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[test]
    fn of_emits_then_completes_synchronously() {
        let ty = StreamType::new("T");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(AtomicBool::new(false));

        let s = Arc::clone(&seen);
        let d = Arc::clone(&done);
        let sub = Observable::of(vec![1, 2, 3])
            .with_stream_type(&ty)
            .subscribe_observer(
                FnObserver::new(move |v| s.lock().unwrap().push(v))
                    .on_complete(move || d.store(true, Ordering::SeqCst)),
            );

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert!(done.load(Ordering::SeqCst));
        assert!(sub.is_closed());
    }

    #[test]
    fn never_stays_open_until_released() {
        let sub = Observable::<u8>::never().subscribe(|_| {});
        assert!(!sub.is_closed());
        sub.unsubscribe();
        assert!(sub.is_closed());
    }

    #[test]
    fn throw_delivers_error_and_closes() {
        let got = Arc::new(Mutex::new(None));
        let g = Arc::clone(&got);
        let sub = Observable::<u8>::throw(StreamError::new("bad"))
            .subscribe_observer(FnObserver::new(|_| {}).on_error(move |e| {
                *g.lock().unwrap() = Some(e);
            }));

        assert!(sub.is_closed());
        assert_eq!(got.lock().unwrap().as_ref().map(StreamError::message), Some("bad"));
    }

    #[test]
    fn map_transforms_and_shares_subscription() {
        let ty = StreamType::new("T");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);

        let sub = Observable::of(vec![1, 2])
            .with_stream_type(&ty)
            .map(|v| v * 10)
            .subscribe(move |v| s.lock().unwrap().push(v));

        assert_eq!(*seen.lock().unwrap(), vec![10, 20]);
        assert!(sub.is_closed());
    }

    #[test]
    fn producer_teardown_runs_on_release() {
        let released = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&released);
        let obs = Observable::<u8>::new(move |s| {
            let r = Arc::clone(&r);
            s.add(move || r.store(true, Ordering::SeqCst));
        });

        let sub = obs.subscribe(|_| {});
        assert!(!released.load(Ordering::SeqCst));
        sub.unsubscribe();
        assert!(released.load(Ordering::SeqCst));
    }
}
