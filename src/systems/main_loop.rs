//! Single-threaded dispatch loop owned by the UI thread.
//!
//! Any thread may attach a source; callbacks only ever run on the thread that
//! drives the loop through [`MainContext::iteration`] and friends. A source fires
//! at most once. A callback that may race with [`Source::destroy`] from another
//! thread must re-check [`Source::is_destroyed`] under its own lock.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

pub type SourceFunc = Box<dyn FnOnce(&Source) + Send + 'static>;

/// Upper bound for a single wait in `run_until`, so predicates that change
/// without a new source being attached are still observed.
const POLL_SLICE: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

struct SourceInner {
    id: SourceId,
    ready_at: Instant,
    destroyed: AtomicBool,
    context: Weak<ContextInner>,
}

/// Handle to a scheduled callback.
#[derive(Clone)]
pub struct Source {
    inner: Arc<SourceInner>,
}

impl Source {
    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    pub fn ready_at(&self) -> Instant {
        self.inner.ready_at
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Prevents the callback from running if it has not been dispatched yet.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(context) = self.inner.context.upgrade() {
            let mut state = lock(&context.state);
            state.pending.remove(&(self.inner.ready_at, self.inner.id.0));
        }
    }
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.inner.id)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

struct Pending {
    source: Source,
    callback: SourceFunc,
}

#[derive(Default)]
struct ContextState {
    next_id: u64,
    pending: BTreeMap<(Instant, u64), Pending>,
}

struct ContextInner {
    state: Mutex<ContextState>,
    wakeup: Condvar,
}

#[derive(Clone)]
pub struct MainContext {
    inner: Arc<ContextInner>,
}

static DEFAULT_CONTEXT: Lazy<MainContext> = Lazy::new(MainContext::new);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for MainContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MainContext {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                state: Mutex::new(ContextState::default()),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// The process-wide context driven by the host UI thread.
    pub fn default_context() -> MainContext {
        DEFAULT_CONTEXT.clone()
    }

    pub fn idle_add<F>(&self, callback: F) -> Source
    where
        F: FnOnce(&Source) + Send + 'static,
    {
        self.attach(Duration::ZERO, Box::new(callback))
    }

    pub fn timeout_add<F>(&self, delay: Duration, callback: F) -> Source
    where
        F: FnOnce(&Source) + Send + 'static,
    {
        self.attach(delay, Box::new(callback))
    }

    fn attach(&self, delay: Duration, callback: SourceFunc) -> Source {
        let source = {
            let mut state = lock(&self.inner.state);
            state.next_id += 1;
            let id = state.next_id;
            let source = Source {
                inner: Arc::new(SourceInner {
                    id: SourceId(id),
                    ready_at: Instant::now() + delay,
                    destroyed: AtomicBool::new(false),
                    context: Arc::downgrade(&self.inner),
                }),
            };
            state.pending.insert(
                (source.inner.ready_at, id),
                Pending { source: source.clone(), callback },
            );
            source
        };
        self.inner.wakeup.notify_all();
        source
    }

    /// True when at least one source is ready to be dispatched.
    pub fn pending(&self) -> bool {
        let state = lock(&self.inner.state);
        state
            .pending
            .keys()
            .next()
            .map(|(ready_at, _)| *ready_at <= Instant::now())
            .unwrap_or(false)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.inner.state).pending.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        lock(&self.inner.state).pending.keys().next().map(|(ready_at, _)| *ready_at)
    }

    fn take_due(state: &mut ContextState, now: Instant) -> Vec<Pending> {
        let due_keys: Vec<(Instant, u64)> = state
            .pending
            .keys()
            .take_while(|(ready_at, _)| *ready_at <= now)
            .copied()
            .collect();
        due_keys
            .into_iter()
            .filter_map(|key| state.pending.remove(&key))
            .collect()
    }

    /// Dispatches everything that is due. When `may_block` is set and nothing is
    /// due, waits for the next deadline or a newly attached source first.
    /// Returns whether any callback ran.
    pub fn iteration(&self, may_block: bool) -> bool {
        let due = {
            let mut state = lock(&self.inner.state);
            loop {
                let now = Instant::now();
                let due = Self::take_due(&mut state, now);
                if !due.is_empty() || !may_block {
                    break due;
                }
                let next = state.pending.keys().next().map(|(ready_at, _)| *ready_at);
                state = match next {
                    Some(ready_at) => {
                        let timeout = ready_at.saturating_duration_since(now);
                        self.inner
                            .wakeup
                            .wait_timeout(state, timeout)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0
                    }
                    None => self
                        .inner
                        .wakeup
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner),
                };
            }
        };

        let mut dispatched = false;
        for pending in due {
            if pending.source.is_destroyed() {
                continue;
            }
            dispatched = true;
            (pending.callback)(&pending.source);
        }
        dispatched
    }

    /// Runs iterations until nothing is due right now.
    pub fn dispatch_pending(&self) -> usize {
        let mut rounds = 0;
        while self.iteration(false) {
            rounds += 1;
        }
        rounds
    }

    fn wait_until(&self, limit: Instant) {
        let state = lock(&self.inner.state);
        let now = Instant::now();
        if now >= limit {
            return;
        }
        let wake_at = match state.pending.keys().next() {
            Some((ready_at, _)) if *ready_at <= now => return,
            Some((ready_at, _)) => (*ready_at).min(limit),
            None => limit,
        };
        let _ = self
            .inner
            .wakeup
            .wait_timeout(state, wake_at.saturating_duration_since(now))
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Drives the loop on the calling thread for `duration`.
    pub fn run_for(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            self.dispatch_pending();
            if Instant::now() >= deadline {
                break;
            }
            self.wait_until(deadline);
        }
    }

    /// Drives the loop until `done` returns true or `timeout` elapses.
    pub fn run_until<P>(&self, mut done: P, timeout: Duration) -> bool
    where
        P: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.dispatch_pending();
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.wait_until(deadline.min(now + POLL_SLICE));
        }
    }
}
