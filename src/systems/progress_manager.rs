//! Registry of every live [`ProgressInfo`] plus the set of UI surfaces
//! currently displaying them.

use log::{debug, warn};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::models::ProgressConfig;
use crate::systems::main_loop::MainContext;
use crate::systems::progress_info::ProgressInfo;
use crate::systems::signals::{HandlerId, Signal};

static SINGLETON: Lazy<Mutex<Weak<ManagerInner>>> = Lazy::new(|| Mutex::new(Weak::new()));
static NEXT_VIEWER_ID: AtomicU64 = AtomicU64::new(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ViewerInner {
    id: u64,
    managers: Mutex<Vec<Weak<ManagerInner>>>,
}

impl Drop for ViewerInner {
    fn drop(&mut self) {
        let managers = std::mem::take(self.managers.get_mut().unwrap_or_else(PoisonError::into_inner));
        for manager in managers.iter().filter_map(Weak::upgrade) {
            ProgressInfoManager { inner: manager }.forget_viewer(self.id);
        }
    }
}

/// Identity of a UI surface showing operations. Clones share the identity;
/// dropping the last clone removes it from every manager it was added to.
#[derive(Clone)]
pub struct Viewer {
    inner: Arc<ViewerInner>,
}

impl Default for Viewer {
    fn default() -> Self {
        Self::new()
    }
}

impl Viewer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ViewerInner {
                id: NEXT_VIEWER_ID.fetch_add(1, Ordering::Relaxed),
                managers: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl PartialEq for Viewer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Viewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Viewer").field("id", &self.inner.id).finish()
    }
}

#[derive(Default)]
struct ManagerState {
    infos: Vec<ProgressInfo>,
    viewers: Vec<(u64, Weak<ViewerInner>)>,
}

struct ManagerInner {
    state: Mutex<ManagerState>,
    context: MainContext,
    config: ProgressConfig,
    new_progress_info: Signal<ProgressInfo>,
    has_viewers_changed: Signal<ProgressInfoManager>,
}

/// Shared handle to a registry. The registry keeps every info it is given
/// alive for as long as the registry itself lives.
#[derive(Clone)]
pub struct ProgressInfoManager {
    inner: Arc<ManagerInner>,
}

impl PartialEq for ProgressInfoManager {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ProgressInfoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("ProgressInfoManager")
            .field("infos", &state.infos.len())
            .field("viewers", &state.viewers.len())
            .finish()
    }
}

impl ProgressInfoManager {
    pub fn new(context: MainContext) -> Self {
        Self::with_config(context, ProgressConfig::default())
    }

    pub fn with_config(context: MainContext, config: ProgressConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                state: Mutex::new(ManagerState::default()),
                context,
                config,
                new_progress_info: Signal::new(),
                has_viewers_changed: Signal::new(),
            }),
        }
    }

    /// Returns the process-wide manager, creating it on the default context if
    /// no handle to it is alive.
    pub fn dup_singleton() -> Self {
        let mut slot = lock(&SINGLETON);
        if let Some(inner) = slot.upgrade() {
            return Self { inner };
        }
        let manager = Self::new(MainContext::default_context());
        *slot = Arc::downgrade(&manager.inner);
        manager
    }

    /// Forgets the process-wide manager so the next `dup_singleton` builds a
    /// fresh one. Existing handles keep working.
    pub fn reset_singleton() {
        *lock(&SINGLETON) = Weak::new();
    }

    pub fn context(&self) -> MainContext {
        self.inner.context.clone()
    }

    pub fn config(&self) -> ProgressConfig {
        self.inner.config.clone()
    }

    /// Registers `info` and announces it synchronously. Registering the same
    /// info twice is ignored.
    pub fn add_new_info(&self, info: &ProgressInfo) {
        {
            let mut state = lock(&self.inner.state);
            if state.infos.iter().any(|known| known.ptr_eq(info)) {
                warn!("Adding two times the same progress info object to the manager");
                return;
            }
            state.infos.push(info.clone());
        }
        self.inner.new_progress_info.emit(info);
    }

    pub fn get_all_infos(&self) -> Vec<ProgressInfo> {
        lock(&self.inner.state).infos.clone()
    }

    pub fn remove_finished_or_cancelled_infos(&self) {
        let removed: Vec<ProgressInfo> = {
            let mut state = lock(&self.inner.state);
            let (done, live): (Vec<_>, Vec<_>) = state
                .infos
                .drain(..)
                .partition(|info| info.get_is_finished() || info.get_is_cancelled());
            state.infos = live;
            done
        };
        if !removed.is_empty() {
            debug!("Removed {} finished or cancelled operations", removed.len());
        }
        // Last references may go here; drop them with no lock held.
        drop(removed);
    }

    pub fn are_all_infos_finished_or_cancelled(&self) -> bool {
        lock(&self.inner.state)
            .infos
            .iter()
            .all(|info| info.get_is_finished() || info.get_is_cancelled())
    }

    pub fn add_viewer(&self, viewer: &Viewer) {
        let became_watched = {
            let mut state = lock(&self.inner.state);
            if state.viewers.iter().any(|(id, _)| *id == viewer.inner.id) {
                return;
            }
            state.viewers.push((viewer.inner.id, Arc::downgrade(&viewer.inner)));
            state.viewers.len() == 1
        };

        {
            let mut managers = lock(&viewer.inner.managers);
            managers.retain(|m| m.strong_count() > 0);
            if !managers.iter().any(|m| m.as_ptr() == Arc::as_ptr(&self.inner)) {
                managers.push(Arc::downgrade(&self.inner));
            }
        }

        if became_watched {
            self.inner.has_viewers_changed.emit(self);
        }
    }

    pub fn remove_viewer(&self, viewer: &Viewer) {
        lock(&viewer.inner.managers).retain(|m| m.as_ptr() != Arc::as_ptr(&self.inner));
        self.forget_viewer(viewer.inner.id);
    }

    fn forget_viewer(&self, viewer_id: u64) {
        let became_unwatched = {
            let mut state = lock(&self.inner.state);
            let before = state.viewers.len();
            state.viewers.retain(|(id, _)| *id != viewer_id);
            before > 0 && state.viewers.is_empty()
        };
        if became_unwatched {
            self.inner.has_viewers_changed.emit(self);
        }
    }

    pub fn has_viewers(&self) -> bool {
        !lock(&self.inner.state).viewers.is_empty()
    }

    /// Handlers run synchronously inside `add_new_info`.
    pub fn connect_new_progress_info<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ProgressInfo) + Send + Sync + 'static,
    {
        self.inner.new_progress_info.connect(handler)
    }

    pub fn connect_has_viewers_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ProgressInfoManager) + Send + Sync + 'static,
    {
        self.inner.has_viewers_changed.connect(handler)
    }

    pub fn disconnect(&self, id: HandlerId) -> bool {
        self.inner.new_progress_info.disconnect(id) || self.inner.has_viewers_changed.disconnect(id)
    }
}
