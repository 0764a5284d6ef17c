//! Installs and removes a detector's interception layer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{LeakError, LeakResult};
use crate::stream::{StreamType, SubscribeImpl};

/// The wrapper a controller installed and the implementation it replaced.
struct InterceptionPatch {
    original: Arc<dyn SubscribeImpl>,
    installed: Arc<dyn SubscribeImpl>,
    retired: Arc<AtomicBool>,
}

/// Owns at most one installed patch on the target stream type.
pub(crate) struct InterceptionController {
    target: Arc<StreamType>,
    patch: Mutex<Option<InterceptionPatch>>,
}

impl InterceptionController {
    pub(crate) fn new(target: Arc<StreamType>) -> Self {
        Self {
            target,
            patch: Mutex::new(None),
        }
    }

    pub(crate) fn target(&self) -> &Arc<StreamType> {
        &self.target
    }

    pub(crate) fn is_patched(&self) -> bool {
        self.patch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Installs the wrapper built by `make_wrapper` unless already patched.
    ///
    /// `make_wrapper` receives the implementation being replaced and the
    /// retirement flag the wrapper must honour.
    pub(crate) fn ensure_patched<F>(&self, make_wrapper: F) -> LeakResult<()>
    where
        F: FnOnce(Arc<dyn SubscribeImpl>, Arc<AtomicBool>) -> Arc<dyn SubscribeImpl>,
    {
        let mut patch = self.patch.lock().unwrap_or_else(PoisonError::into_inner);
        if patch.is_some() {
            return Ok(());
        }

        let retired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&retired);
        let (original, installed) = self
            .target
            .wrap_with(|original| make_wrapper(original, flag))
            .ok_or_else(|| {
                LeakError::configuration(self.target.name(), "no subscribe implementation installed")
            })?;

        tracing::debug!(stream_type = %self.target.name(), "subscribe interception installed");
        *patch = Some(InterceptionPatch {
            original,
            installed,
            retired,
        });
        Ok(())
    }

    /// Removes the patch, restoring the original only if our wrapper is still on top.
    ///
    /// When another layer was installed over ours, the slot is left alone and
    /// our wrapper is retired to a pass-through. Returns true if restored.
    pub(crate) fn try_unpatch(&self) -> bool {
        let Some(patch) = self
            .patch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };

        patch.retired.store(true, Ordering::Release);
        let restored = self
            .target
            .restore_if_current(&patch.installed, patch.original);
        if restored {
            tracing::debug!(stream_type = %self.target.name(), "subscribe interception removed");
        } else {
            tracing::debug!(
                stream_type = %self.target.name(),
                "subscribe interception covered by a later layer; restore skipped"
            );
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::stream::{BaseSubscribe, SubscribeCall, Subscription};

    fn passthrough(original: Arc<dyn SubscribeImpl>, _retired: Arc<AtomicBool>) -> Arc<dyn SubscribeImpl> {
        Arc::new(move |call: SubscribeCall<'_>| original.subscribe(call))
    }

    #[test]
    fn ensure_patched_installs_once() {
        let ty = StreamType::new("T");
        let before = ty.current().unwrap();
        let controller = InterceptionController::new(Arc::clone(&ty));

        controller.ensure_patched(passthrough).unwrap();
        let installed = ty.current().unwrap();
        assert!(!ty.is_current(&before));

        controller.ensure_patched(passthrough).unwrap();
        assert!(ty.is_current(&installed));
        assert!(controller.is_patched());

        assert!(controller.try_unpatch());
        assert!(ty.is_current(&before));
        assert!(!controller.is_patched());
        assert!(!controller.try_unpatch());
    }

    #[test]
    fn missing_subscribe_is_a_configuration_error() {
        let ty = StreamType::without_subscribe("Bare");
        let controller = InterceptionController::new(ty);

        let err = controller.ensure_patched(passthrough).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("Bare"));
        assert!(!controller.is_patched());
    }

    #[test]
    fn unpatch_skips_when_covered_and_retires_wrapper() {
        let ty = StreamType::new("T");
        let controller = InterceptionController::new(Arc::clone(&ty));
        let mut flag = None;
        controller
            .ensure_patched(|original, retired| {
                flag = Some(Arc::clone(&retired));
                passthrough(original, retired)
            })
            .unwrap();

        let later: Arc<dyn SubscribeImpl> = Arc::new(BaseSubscribe);
        ty.replace(Some(Arc::clone(&later)));

        assert!(!controller.try_unpatch());
        assert!(ty.is_current(&later));
        assert!(flag.unwrap().load(Ordering::Acquire));

        let mut producer = Subscription::new;
        let sub = ty.dispatch(SubscribeCall::new(&mut producer));
        assert!(!sub.is_closed());
    }
}
