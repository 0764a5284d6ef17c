//! Multicast subject.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::StreamError;

use super::observable::{Observable, Subscriber};
use super::slot::StreamType;
use super::subscription::Subscription;

#[derive(Debug, Clone)]
enum Stop {
    Completed,
    Errored(StreamError),
}

struct SubjectState<T> {
    observers: Vec<Subscriber<T>>,
    stopped: Option<Stop>,
}

fn lock<T>(state: &Mutex<SubjectState<T>>) -> MutexGuard<'_, SubjectState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A hot stream that multicasts to every current subscriber.
///
/// Subscriptions stay open until released or until the subject terminates.
pub struct Subject<T> {
    state: Arc<Mutex<SubjectState<T>>>,
    stream_type: Arc<StreamType>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            stream_type: Arc::clone(&self.stream_type),
        }
    }
}

impl<T: Clone + Send + 'static> Subject<T> {
    /// Creates a subject of the process-wide stream type.
    #[must_use]
    pub fn new() -> Self {
        Self::on(&StreamType::global())
    }

    /// Creates a subject of the given stream type.
    #[must_use]
    pub fn on(stream_type: &Arc<StreamType>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SubjectState {
                observers: Vec::new(),
                stopped: None,
            })),
            stream_type: Arc::clone(stream_type),
        }
    }

    /// Observable view; each subscribe registers a new observer.
    #[must_use]
    pub fn as_observable(&self) -> Observable<T> {
        let state = Arc::clone(&self.state);
        Observable::on(&self.stream_type, move |subscriber: &Subscriber<T>| {
            let stopped = {
                let mut guard = lock(&state);
                if guard.stopped.is_none() {
                    guard.observers.push(subscriber.clone());
                }
                guard.stopped.clone()
            };

            match stopped {
                Some(Stop::Completed) => subscriber.complete(),
                Some(Stop::Errored(err)) => subscriber.error(err),
                None => {
                    let weak: Weak<Mutex<SubjectState<T>>> = Arc::downgrade(&state);
                    let id = subscriber.subscription().id();
                    subscriber.add(move || {
                        if let Some(state) = weak.upgrade() {
                            lock(&state)
                                .observers
                                .retain(|s| s.subscription().id() != id);
                        }
                    });
                }
            }
        })
    }

    /// Shorthand for `as_observable().subscribe(next)`.
    pub fn subscribe<F>(&self, next: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.as_observable().subscribe(next)
    }

    /// Emits a value to every current subscriber.
    pub fn next(&self, value: T) {
        let observers = lock(&self.state).observers.clone();
        for observer in observers {
            observer.next(value.clone());
        }
    }

    /// Completes every current and future subscriber.
    pub fn complete(&self) {
        for observer in self.stop(Stop::Completed) {
            observer.complete();
        }
    }

    /// Fails every current and future subscriber.
    pub fn error(&self, err: StreamError) {
        for observer in self.stop(Stop::Errored(err.clone())) {
            observer.error(err.clone());
        }
    }

    fn stop(&self, stop: Stop) -> Vec<Subscriber<T>> {
        let mut guard = lock(&self.state);
        if guard.stopped.is_some() {
            return Vec::new();
        }
        guard.stopped = Some(stop);
        std::mem::take(&mut guard.observers)
    }

    /// Number of subscribers currently attached.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        lock(&self.state).observers.len()
    }
}

impl<T: Clone + Send + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multicasts_until_released() {
        let subject = Subject::<i32>::on(&StreamType::new("T"));
        let a = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::new(Mutex::new(Vec::new()));

        let ac = Arc::clone(&a);
        let sa = subject.subscribe(move |v| ac.lock().unwrap().push(v));
        let bc = Arc::clone(&b);
        let _sb = subject.subscribe(move |v| bc.lock().unwrap().push(v));
        assert_eq!(subject.observer_count(), 2);

        subject.next(1);
        sa.unsubscribe();
        assert_eq!(subject.observer_count(), 1);
        subject.next(2);

        assert_eq!(*a.lock().unwrap(), vec![1]);
        assert_eq!(*b.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn complete_closes_all_subscriptions() {
        let subject = Subject::<i32>::on(&StreamType::new("T"));
        let s1 = subject.subscribe(|_| {});
        let s2 = subject.subscribe(|_| {});

        subject.complete();
        assert!(s1.is_closed());
        assert!(s2.is_closed());
        assert_eq!(subject.observer_count(), 0);

        let late = subject.subscribe(|_| {});
        assert!(late.is_closed());
    }

    #[test]
    fn error_reaches_late_subscribers() {
        let subject = Subject::<i32>::on(&StreamType::new("T"));
        subject.error(StreamError::new("gone"));

        let late = subject.subscribe(|_| {});
        assert!(late.is_closed());
        assert_eq!(subject.observer_count(), 0);
    }
}
