use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one connected handler; unique across every signal in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

/// Ordered list of handlers for one notification.
///
/// `emit` calls handlers outside the list lock, in connection order, on the
/// emitting thread; handlers may connect, disconnect or emit again.
pub struct Signal<T: ?Sized> {
    handlers: Mutex<Vec<(HandlerId, Handler<T>)>>,
}

impl<T: ?Sized> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Signal<T> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn connect<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = HandlerId(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Returns false when `id` was not connected here.
    pub fn disconnect(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in snapshot {
            handler(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_handlers_in_order() {
        let signal: Signal<u32> = Signal::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3u32 {
            let s = seen.clone();
            signal.connect(move |v: &u32| s.lock().unwrap().push((tag, *v)));
        }
        signal.emit(&7);
        assert_eq!(*seen.lock().unwrap(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn test_disconnect() {
        let signal: Signal<()> = Signal::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = signal.connect(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(signal.disconnect(id));
        assert!(!signal.disconnect(id));
        signal.emit(&());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(signal.handler_count(), 0);
    }

    #[test]
    fn test_handler_may_disconnect_itself() {
        let signal: Arc<Signal<()>> = Arc::new(Signal::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));

        let sig = Arc::downgrade(&signal);
        let h = hits.clone();
        let s = slot.clone();
        let id = signal.connect(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            if let (Some(sig), Some(id)) = (sig.upgrade(), *s.lock().unwrap()) {
                sig.disconnect(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        signal.emit(&());
        signal.emit(&());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
