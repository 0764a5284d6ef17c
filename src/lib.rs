//! # subleak - subscription leak detection for reactive streams
//!
//! subleak asserts that no subscription created during a test body survives
//! past the test's scope. It wraps the subscribe entry point of a stream type
//! while a spy is active, records every subscription produced under the spy
//! together with a stack trace, and forgets it again when the subscription
//! completes, errors or is released.
//!
//! ## Core Concepts
//!
//! - **StreamType**: the shared subscribe slot every `Observable` dispatches through
//! - **Spy**: a toggle that turns tracking on; global, or scoped to an ambient `Context`
//! - **Registry**: open subscriptions with their sequence numbers and stack traces
//! - **Snapshot**: an immutable copy of the registry that can be asserted empty
//!
//! ## Usage
//!
//! ```rust,ignore
//! use subleak::{LeakDetector, Observable, StreamType};
//!
//! let ty = StreamType::new("Observable");
//! let detector = LeakDetector::for_stream_type(&ty);
//!
//! detector.check_scoped(|| {
//!     let sub = Observable::of(vec![1, 2, 3]).with_stream_type(&ty).subscribe(|_| {});
//!     assert!(sub.is_closed());
//! })?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod capture;
pub mod config;
pub mod context;
pub mod detector;
pub mod error;
pub mod stream;

// Re-export primary types at crate root for convenience
pub use capture::{BacktraceCapture, NoCapture, StackCapture};
pub use config::DetectorConfig;
pub use context::{Context, ContextId};
pub use detector::spy::{SpyHandle, SpyId, SpyScope};
pub use detector::{DetectorBuilder, LeakDetector, LeakEntry, Snapshot, SubscriptionRecord};
pub use error::{LeakError, LeakResult, StreamError};
pub use stream::{
    FnObserver, Observable, Observer, StreamType, Subject, SubscribeCall, SubscribeImpl,
    Subscriber, Subscription, SubscriptionId,
};
