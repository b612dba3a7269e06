use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type CancelCallback = Box<dyn FnOnce() + Send + 'static>;

struct CancellableInner {
    cancelled: AtomicBool,
    callback: Mutex<Option<CancelCallback>>,
}

/// One-way cancellation latch shared between an operation and whoever may cancel it.
///
/// Holds a single callback, invoked exactly once on the thread that performs the
/// transition to cancelled.
#[derive(Clone)]
pub struct Cancellable {
    inner: Arc<CancellableInner>,
}

impl Default for Cancellable {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellableInner {
                cancelled: AtomicBool::new(false),
                callback: Mutex::new(None),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Installs the cancellation callback, replacing any previous one. If the
    /// token is already cancelled the callback runs immediately.
    pub fn connect<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut slot = self.inner.callback.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.is_cancelled() {
                *slot = Some(Box::new(callback));
                return;
            }
        }
        callback();
    }

    pub fn disconnect(&self) {
        self.inner
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Latches the token. Only the first call runs the callback.
    pub fn cancel(&self) {
        let callback = {
            let mut slot = self.inner.callback.lock().unwrap_or_else(PoisonError::into_inner);
            if self.inner.cancelled.swap(true, Ordering::AcqRel) {
                return;
            }
            slot.take()
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn same_token(&self, other: &Cancellable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Cancellable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancellable")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
