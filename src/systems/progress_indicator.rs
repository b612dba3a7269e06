//! Headless model of the toolbar operations button.
//!
//! Tracks which operations are worth showing, when the button is revealed,
//! when it asks for attention, when finished operations are cleared out, and
//! when a completion notification goes to the host.

use log::{debug, info};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::models::ProgressConfig;
use crate::systems::main_loop::Source;
use crate::systems::progress_info::{ProgressInfo, ProgressSignal};
use crate::systems::progress_manager::{ProgressInfoManager, Viewer};
use crate::systems::signals::HandlerId;

/// Host side of "operation complete" notifications.
pub trait NotificationSink: Send + Sync {
    fn show_operation_notification(&self, status: &str, destination: &Path, was_quick: bool);
}

/// Sink that only logs.
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn show_operation_notification(&self, status: &str, destination: &Path, was_quick: bool) {
        info!("{} ({}){}", status, destination.display(), if was_quick { "" } else { " *" });
    }
}

/// Operations whose estimated total time does not exceed `minimum_secs` are not surfaced.
pub fn should_show_progress_info(info: &ProgressInfo, minimum_secs: f64) -> bool {
    info.get_total_elapsed_time() + info.get_remaining_time() > minimum_secs
}

#[derive(Debug, Clone, Copy)]
enum Timer {
    StartCheck,
    RemoveFinished,
    Attention,
}

#[derive(Default)]
struct IndicatorState {
    reveal: bool,
    needs_attention: bool,
    popover_visible: bool,
    model: Vec<ProgressInfo>,
    start_check: Option<Source>,
    remove_finished: Option<Source>,
    attention: Option<Source>,
}

impl IndicatorState {
    fn slot(&mut self, timer: Timer) -> &mut Option<Source> {
        match timer {
            Timer::StartCheck => &mut self.start_check,
            Timer::RemoveFinished => &mut self.remove_finished,
            Timer::Attention => &mut self.attention,
        }
    }
}

struct IndicatorInner {
    state: Mutex<IndicatorState>,
    manager: ProgressInfoManager,
    config: ProgressConfig,
    viewer: Viewer,
    sink: Arc<dyn NotificationSink>,
    manager_handlers: Mutex<Vec<HandlerId>>,
}

impl Drop for IndicatorInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for timer in [Timer::StartCheck, Timer::RemoveFinished, Timer::Attention] {
            if let Some(source) = state.slot(timer).take() {
                source.destroy();
            }
        }
        let handlers = self.manager_handlers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for id in handlers.drain(..) {
            self.manager.disconnect(id);
        }
    }
}

pub struct ProgressIndicator {
    inner: Arc<IndicatorInner>,
}

impl ProgressIndicator {
    pub fn new(manager: &ProgressInfoManager, sink: Arc<dyn NotificationSink>) -> Self {
        let indicator = ProgressIndicator {
            inner: Arc::new(IndicatorInner {
                state: Mutex::new(IndicatorState::default()),
                manager: manager.clone(),
                config: manager.config(),
                viewer: Viewer::new(),
                sink,
                manager_handlers: Mutex::new(Vec::new()),
            }),
        };

        let weak = Arc::downgrade(&indicator.inner);
        let on_new = manager.connect_new_progress_info(move |info| {
            if let Some(inner) = weak.upgrade() {
                ProgressIndicator { inner }.watch(info);
            }
        });
        let weak = Arc::downgrade(&indicator.inner);
        let on_viewers = manager.connect_has_viewers_changed(move |manager| {
            if let Some(inner) = weak.upgrade() {
                ProgressIndicator { inner }.on_has_viewers_changed(manager);
            }
        });
        indicator.lock_handlers().extend([on_new, on_viewers]);

        for info in manager.get_all_infos() {
            indicator.watch(&info);
        }
        indicator.update_operations();
        indicator
    }

    fn lock(&self) -> MutexGuard<'_, IndicatorState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handlers(&self) -> MutexGuard<'_, Vec<HandlerId>> {
        self.inner.manager_handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn minimum_secs(&self) -> f64 {
        self.inner.config.operation_minimum_time_secs
    }

    fn watch(&self, info: &ProgressInfo) {
        let weak = Arc::downgrade(&self.inner);
        info.connect(ProgressSignal::Started, move |_| {
            if let Some(inner) = weak.upgrade() {
                ProgressIndicator { inner }.schedule(Timer::StartCheck);
            }
        });
        let weak = Arc::downgrade(&self.inner);
        info.connect(ProgressSignal::Finished, move |info| {
            if let Some(inner) = weak.upgrade() {
                ProgressIndicator { inner }.on_finished(info);
            }
        });
        let weak = Arc::downgrade(&self.inner);
        info.connect(ProgressSignal::Cancelled, move |_| {
            if let Some(inner) = weak.upgrade() {
                ProgressIndicator { inner }.on_cancelled();
            }
        });
    }

    pub fn is_revealed(&self) -> bool {
        self.lock().reveal
    }

    pub fn needs_attention(&self) -> bool {
        self.lock().needs_attention
    }

    pub fn is_popover_visible(&self) -> bool {
        self.lock().popover_visible
    }

    /// Operations currently listed by the button, in registration order.
    pub fn visible_infos(&self) -> Vec<ProgressInfo> {
        self.lock().model.clone()
    }

    pub fn set_popover_visible(&self, visible: bool) {
        self.lock().popover_visible = visible;
        if visible {
            self.unschedule(Timer::RemoveFinished);
            self.inner.manager.add_viewer(&self.inner.viewer);
        } else {
            self.inner.manager.remove_viewer(&self.inner.viewer);
        }
    }

    fn filtered_infos(&self) -> Vec<ProgressInfo> {
        let minimum = self.minimum_secs();
        self.inner
            .manager
            .get_all_infos()
            .into_iter()
            .filter(|info| should_show_progress_info(info, minimum))
            .collect()
    }

    fn should_hide(&self) -> bool {
        self.filtered_infos()
            .iter()
            .all(|info| info.get_is_cancelled() || info.get_is_finished())
    }

    fn update_operations(&self) {
        let filtered = self.filtered_infos();
        let reveal = !filtered.is_empty();
        let newly_revealed = {
            let mut state = self.lock();
            state.model = filtered;
            let newly_revealed = reveal && !state.reveal;
            if newly_revealed {
                state.reveal = true;
            }
            newly_revealed
        };
        if newly_revealed {
            debug!("Revealing operations button");
            self.raise_attention();
        }
    }

    fn raise_attention(&self) {
        self.unschedule(Timer::Attention);
        self.lock().needs_attention = true;
        self.schedule(Timer::Attention);
    }

    fn delay(&self, timer: Timer) -> Duration {
        match timer {
            Timer::StartCheck => self.inner.config.start_check_interval(),
            Timer::RemoveFinished => self.inner.config.remove_finished_timeout(),
            Timer::Attention => self.inner.config.attention_timeout(),
        }
    }

    fn schedule(&self, timer: Timer) {
        let mut state = self.lock();
        if state.slot(timer).is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let source = self
            .inner
            .manager
            .context()
            .timeout_add(self.delay(timer), move |source| {
                if let Some(inner) = weak.upgrade() {
                    ProgressIndicator { inner }.on_timeout(timer, source);
                }
            });
        *state.slot(timer) = Some(source);
    }

    fn unschedule(&self, timer: Timer) {
        let source = self.lock().slot(timer).take();
        if let Some(source) = source {
            source.destroy();
        }
    }

    fn on_timeout(&self, timer: Timer, source: &Source) {
        {
            let mut state = self.lock();
            let slot = state.slot(timer);
            if slot.as_ref() != Some(source) {
                return;
            }
            *slot = None;
        }
        match timer {
            Timer::StartCheck => self.on_start_check(),
            Timer::RemoveFinished => self.on_remove_finished(),
            Timer::Attention => self.lock().needs_attention = false,
        }
    }

    fn on_start_check(&self) {
        self.update_operations();

        // Estimates settle over time; keep checking while something unfinished
        // is still filtered out.
        let all = self.inner.manager.get_all_infos();
        let filtered = self.filtered_infos();
        if !self.inner.manager.are_all_infos_finished_or_cancelled() && all.len() != filtered.len() {
            self.schedule(Timer::StartCheck);
        }
    }

    fn on_remove_finished(&self) {
        self.inner.manager.remove_finished_or_cancelled_infos();
        if self.should_hide() {
            let mut state = self.lock();
            state.reveal = false;
            state.model.clear();
        } else {
            self.update_operations();
        }
    }

    fn on_cancelled(&self) {
        if !self.inner.manager.has_viewers() {
            self.schedule(Timer::RemoveFinished);
        }
    }

    fn on_finished(&self, info: &ProgressInfo) {
        if !self.inner.manager.has_viewers() {
            self.schedule(Timer::RemoveFinished);
        }

        // Operations without a destination (trash, delete) get no completion notification.
        let destination = match info.get_destination() {
            Some(destination) => destination,
            None => return,
        };
        // Only notify when nothing is watching.
        if self.is_popover_visible() || self.inner.manager.has_viewers() {
            return;
        }

        let was_quick = info.get_total_elapsed_time() <= self.minimum_secs();
        if !was_quick {
            self.raise_attention();
        }
        self.inner
            .sink
            .show_operation_notification(&info.get_status(), &destination, was_quick);
    }

    fn on_has_viewers_changed(&self, manager: &ProgressInfoManager) {
        if manager.has_viewers() {
            self.unschedule(Timer::RemoveFinished);
            return;
        }
        if manager.are_all_infos_finished_or_cancelled() {
            self.unschedule(Timer::RemoveFinished);
            self.schedule(Timer::RemoveFinished);
        }
    }
}
