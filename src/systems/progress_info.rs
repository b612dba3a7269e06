//! Status and progress of one long-running file operation.
//!
//! Every mutator may be called from any thread. Observers are never called from
//! inside a mutator: mutations mark what changed and arm a single source on the
//! owning [`MainContext`], which later emits the signals on the loop thread.
//! Status, details and progress updates are coalesced over a short delay;
//! start, finish and cancel are delivered at the next idle.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::models::ProgressSnapshot;
use crate::systems::cancellable::Cancellable;
use crate::systems::main_loop::{MainContext, Source};
use crate::systems::progress_manager::ProgressInfoManager;
use crate::systems::signals::{HandlerId, Signal};
use crate::utils::timer::ProgressTimer;

/// Placeholder for a status or details line that was never set.
pub const PREPARING: &str = "Preparing";
/// Details line written when the operation is cancelled.
pub const CANCELLED: &str = "Cancelled";

pub const ICON_CANCELLED: &str = "file-operation-cancelled-symbolic";
pub const ICON_FINISHED: &str = "file-operation-finished-symbolic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressSignal {
    Started,
    Changed,
    ProgressChanged,
    Finished,
    Cancelled,
}

/// Reasons accumulated since the scheduled source was armed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct PendingSignals {
    start: bool,
    changed: bool,
    progress: bool,
    finish: bool,
    cancel: bool,
}

struct ScheduledSource {
    source: Source,
    is_now: bool,
}

struct InfoState {
    status: Option<String>,
    details: Option<String>,
    progress: f64,
    last_emitted_progress: f64,
    remaining_time: f64,
    elapsed_time: f64,
    activity_mode: bool,
    started: bool,
    finished: bool,
    paused: bool,
    timer: ProgressTimer,
    scheduled: Option<ScheduledSource>,
    pending: PendingSignals,
    destination: Option<PathBuf>,
}

#[derive(Default)]
struct InfoSignals {
    started: Signal<ProgressInfo>,
    changed: Signal<ProgressInfo>,
    progress_changed: Signal<ProgressInfo>,
    finished: Signal<ProgressInfo>,
    cancelled: Signal<ProgressInfo>,
}

impl InfoSignals {
    fn get(&self, signal: ProgressSignal) -> &Signal<ProgressInfo> {
        match signal {
            ProgressSignal::Started => &self.started,
            ProgressSignal::Changed => &self.changed,
            ProgressSignal::ProgressChanged => &self.progress_changed,
            ProgressSignal::Finished => &self.finished,
            ProgressSignal::Cancelled => &self.cancelled,
        }
    }
}

struct InfoInner {
    state: Mutex<InfoState>,
    cancellable: Cancellable,
    signals: InfoSignals,
    context: MainContext,
    signal_delay: Duration,
    progress_threshold: f64,
}

impl Drop for InfoInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(scheduled) = state.scheduled.take() {
            scheduled.source.destroy();
        }
        self.cancellable.disconnect();
    }
}

/// Shared handle; clones refer to the same operation.
///
/// Handlers receive the info as an argument and should not capture a clone of
/// it, otherwise the info keeps itself alive.
#[derive(Clone)]
pub struct ProgressInfo {
    inner: Arc<InfoInner>,
}

impl PartialEq for ProgressInfo {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ProgressInfo {}

impl std::fmt::Debug for ProgressInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ProgressInfo")
            .field("status", &state.status)
            .field("details", &state.details)
            .field("progress", &state.progress)
            .field("started", &state.started)
            .field("finished", &state.finished)
            .field("cancelled", &self.inner.cancellable.is_cancelled())
            .finish()
    }
}

impl ProgressInfo {
    /// Creates an info registered with the process-wide manager.
    /// Call on the thread that drives the main loop.
    pub fn new() -> Self {
        let manager = ProgressInfoManager::dup_singleton();
        Self::new_in(&manager)
    }

    /// Creates an info registered with `manager`, delivering on its context.
    pub fn new_in(manager: &ProgressInfoManager) -> Self {
        let config = manager.config();
        let info = ProgressInfo {
            inner: Arc::new(InfoInner {
                state: Mutex::new(InfoState {
                    status: None,
                    details: None,
                    progress: 0.0,
                    last_emitted_progress: 0.0,
                    remaining_time: 0.0,
                    elapsed_time: 0.0,
                    activity_mode: false,
                    started: false,
                    finished: false,
                    paused: false,
                    timer: ProgressTimer::new(),
                    scheduled: None,
                    pending: PendingSignals::default(),
                    destination: None,
                }),
                cancellable: Cancellable::new(),
                signals: InfoSignals::default(),
                context: manager.context(),
                signal_delay: config.signal_delay(),
                progress_threshold: config.progress_threshold,
            }),
        };

        let weak = Arc::downgrade(&info.inner);
        info.inner.cancellable.connect(move || {
            if let Some(inner) = weak.upgrade() {
                ProgressInfo { inner }.on_cancelled();
            }
        });

        manager.add_new_info(&info);
        info
    }

    pub fn ptr_eq(&self, other: &ProgressInfo) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> MutexGuard<'_, InfoState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect<F>(&self, signal: ProgressSignal, handler: F) -> HandlerId
    where
        F: Fn(&ProgressInfo) + Send + Sync + 'static,
    {
        self.inner.signals.get(signal).connect(handler)
    }

    pub fn disconnect(&self, id: HandlerId) -> bool {
        [
            ProgressSignal::Started,
            ProgressSignal::Changed,
            ProgressSignal::ProgressChanged,
            ProgressSignal::Finished,
            ProgressSignal::Cancelled,
        ]
        .iter()
        .any(|signal| self.inner.signals.get(*signal).disconnect(id))
    }

    // Called with the state lock held. A pending "now" source is never replaced
    // by a delayed one; a pending delayed source is replaced by a "now" one.
    fn queue_idle(&self, state: &mut InfoState, now: bool) {
        let needs_source = match &state.scheduled {
            None => true,
            Some(scheduled) => now && !scheduled.is_now,
        };
        if !needs_source {
            return;
        }

        if let Some(previous) = state.scheduled.take() {
            previous.source.destroy();
        }

        let weak = Arc::downgrade(&self.inner);
        let callback = move |source: &Source| {
            // The upgraded handle keeps the info alive while its signals run.
            if let Some(inner) = weak.upgrade() {
                ProgressInfo { inner }.idle_callback(source);
            }
        };
        let source = if now {
            self.inner.context.idle_add(callback)
        } else {
            self.inner.context.timeout_add(self.inner.signal_delay, callback)
        };
        state.scheduled = Some(ScheduledSource { source, is_now: now });
    }

    fn idle_callback(&self, source: &Source) {
        let pending = {
            let mut state = self.lock();

            // The source may have been replaced or destroyed on another thread
            // after it was picked for dispatch.
            if source.is_destroyed() {
                return;
            }
            match &state.scheduled {
                Some(scheduled) if scheduled.source == *source => {}
                _ => return,
            }
            state.scheduled = None;
            std::mem::take(&mut state.pending)
        };

        let signals = &self.inner.signals;
        if pending.start {
            signals.started.emit(self);
        }
        if pending.changed {
            signals.changed.emit(self);
        }
        if pending.progress {
            signals.progress_changed.emit(self);
        }
        if pending.finish {
            signals.finished.emit(self);
        }
        if pending.cancel {
            signals.cancelled.emit(self);
        }
    }

    fn sync_clock(&self, state: &mut InfoState) {
        let should_run = state.started
            && !state.paused
            && !state.finished
            && !self.inner.cancellable.is_cancelled();
        if should_run {
            state.timer.resume();
        } else {
            state.timer.stop();
        }
    }

    /// Status, details and progress are frozen once cancelled or finished.
    fn accepts_updates(&self, state: &InfoState) -> bool {
        !state.finished && !self.inner.cancellable.is_cancelled()
    }

    fn on_cancelled(&self) {
        let mut state = self.lock();
        if !state.finished {
            self.store_details(&mut state, CANCELLED.to_string());
        }
        state.pending.cancel = true;
        state.timer.stop();
        self.queue_idle(&mut state, true);
    }

    pub fn get_status(&self) -> String {
        self.lock().status.clone().unwrap_or_else(|| PREPARING.to_string())
    }

    pub fn get_details(&self) -> String {
        self.lock().details.clone().unwrap_or_else(|| PREPARING.to_string())
    }

    /// Fraction in `[0, 1]`, or `-1.0` while in activity mode.
    pub fn get_progress(&self) -> f64 {
        let state = self.lock();
        if state.activity_mode {
            -1.0
        } else {
            state.progress
        }
    }

    /// The stored fraction, without the activity-mode sentinel.
    pub fn raw_progress(&self) -> f64 {
        self.lock().progress
    }

    pub fn is_activity_mode(&self) -> bool {
        self.lock().activity_mode
    }

    fn store_status(&self, state: &mut InfoState, status: String) {
        state.status = Some(status);
        state.pending.changed = true;
        self.queue_idle(state, false);
    }

    fn store_details(&self, state: &mut InfoState, details: String) {
        state.details = Some(details);
        state.pending.changed = true;
        self.queue_idle(state, false);
    }

    pub fn set_status(&self, status: &str) {
        let mut state = self.lock();
        if state.status.as_deref() != Some(status) && self.accepts_updates(&state) {
            self.store_status(&mut state, status.to_string());
        }
    }

    pub fn take_status(&self, status: String) {
        let mut state = self.lock();
        if state.status.as_deref() != Some(status.as_str()) && self.accepts_updates(&state) {
            self.store_status(&mut state, status);
        }
    }

    pub fn set_details(&self, details: &str) {
        let mut state = self.lock();
        if state.details.as_deref() != Some(details) && self.accepts_updates(&state) {
            self.store_details(&mut state, details.to_string());
        }
    }

    pub fn take_details(&self, details: String) {
        let mut state = self.lock();
        if state.details.as_deref() != Some(details.as_str()) && self.accepts_updates(&state) {
            self.store_details(&mut state, details);
        }
    }

    /// Switches to indeterminate progress; always notifies.
    pub fn pulse_progress(&self) {
        let mut state = self.lock();
        if state.finished {
            return;
        }
        state.activity_mode = true;
        state.progress = 0.0;
        state.last_emitted_progress = 0.0;
        state.pending.progress = true;
        self.queue_idle(&mut state, false);
    }

    /// Stores `current / total` clamped to `[0, 1]`; a non-positive `total` counts as done.
    /// Notifies when leaving activity mode or when the fraction moved by at least
    /// the threshold since the last notified value.
    pub fn set_progress(&self, current: f64, total: f64) {
        let fraction = if total <= 0.0 {
            1.0
        } else {
            let fraction = current / total;
            if fraction.is_nan() {
                0.0
            } else {
                fraction.clamp(0.0, 1.0)
            }
        };

        let mut state = self.lock();
        if !self.accepts_updates(&state) {
            return;
        }

        let notify = state.activity_mode
            || (fraction - state.last_emitted_progress).abs() >= self.inner.progress_threshold;
        state.activity_mode = false;
        state.progress = fraction;
        if notify {
            state.last_emitted_progress = fraction;
            state.pending.progress = true;
            self.queue_idle(&mut state, false);
        }
    }

    pub fn start(&self) {
        let mut state = self.lock();
        if !state.started {
            state.started = true;
            state.timer.reset();
            self.sync_clock(&mut state);

            state.pending.start = true;
            self.queue_idle(&mut state, true);
        }
    }

    pub fn finish(&self) {
        let mut state = self.lock();
        if !state.finished {
            state.finished = true;
            state.timer.stop();

            state.pending.finish = true;
            self.queue_idle(&mut state, true);
        }
    }

    pub fn pause(&self) {
        let mut state = self.lock();
        if !state.paused {
            state.paused = true;
            state.timer.stop();
        }
    }

    pub fn resume(&self) {
        let mut state = self.lock();
        if state.paused {
            state.paused = false;
            self.sync_clock(&mut state);
        }
    }

    pub fn cancel(&self) {
        self.get_cancellable().cancel();
    }

    pub fn get_cancellable(&self) -> Cancellable {
        self.inner.cancellable.clone()
    }

    pub fn get_is_started(&self) -> bool {
        self.lock().started
    }

    pub fn get_is_finished(&self) -> bool {
        self.lock().finished
    }

    pub fn get_is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn get_is_cancelled(&self) -> bool {
        self.inner.cancellable.is_cancelled()
    }

    pub fn icon_name(&self) -> Option<&'static str> {
        if self.get_is_cancelled() {
            Some(ICON_CANCELLED)
        } else if self.get_is_finished() {
            Some(ICON_FINISHED)
        } else {
            None
        }
    }

    pub fn set_remaining_time(&self, seconds: f64) {
        self.lock().remaining_time = seconds;
    }

    pub fn get_remaining_time(&self) -> f64 {
        self.lock().remaining_time
    }

    pub fn set_elapsed_time(&self, seconds: f64) {
        self.lock().elapsed_time = seconds;
    }

    pub fn get_elapsed_time(&self) -> f64 {
        self.lock().elapsed_time
    }

    /// Wall-clock seconds spent running since `start`, excluding pauses.
    pub fn get_total_elapsed_time(&self) -> f64 {
        self.lock().timer.elapsed_secs()
    }

    pub fn set_destination(&self, destination: &Path) {
        self.lock().destination = Some(destination.to_path_buf());
    }

    pub fn get_destination(&self) -> Option<PathBuf> {
        self.lock().destination.clone()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let cancelled = self.get_is_cancelled();
        let state = self.lock();
        let icon_name = if cancelled {
            Some(ICON_CANCELLED.to_string())
        } else if state.finished {
            Some(ICON_FINISHED.to_string())
        } else {
            None
        };
        ProgressSnapshot {
            status: state.status.clone().unwrap_or_else(|| PREPARING.to_string()),
            details: state.details.clone().unwrap_or_else(|| PREPARING.to_string()),
            progress: if state.activity_mode { None } else { Some(state.progress) },
            remaining_time: state.remaining_time,
            elapsed_time: state.elapsed_time,
            total_elapsed_time: state.timer.elapsed_secs(),
            started: state.started,
            finished: state.finished,
            paused: state.paused,
            cancelled,
            icon_name,
            destination: state.destination.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl Default for ProgressInfo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProgressConfig;
    use std::thread;

    fn fixture_with_delay(delay_ms: u64) -> (MainContext, ProgressInfoManager) {
        let context = MainContext::new();
        let config = ProgressConfig {
            signal_delay_ms: delay_ms,
            ..ProgressConfig::default()
        };
        let manager = ProgressInfoManager::with_config(context.clone(), config);
        (context, manager)
    }

    fn fixture() -> (MainContext, ProgressInfoManager) {
        fixture_with_delay(0)
    }

    fn record(info: &ProgressInfo) -> Arc<Mutex<Vec<ProgressSignal>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for signal in [
            ProgressSignal::Started,
            ProgressSignal::Changed,
            ProgressSignal::ProgressChanged,
            ProgressSignal::Finished,
            ProgressSignal::Cancelled,
        ] {
            let s = seen.clone();
            info.connect(signal, move |_| s.lock().unwrap().push(signal));
        }
        seen
    }

    fn count(seen: &Arc<Mutex<Vec<ProgressSignal>>>, signal: ProgressSignal) -> usize {
        seen.lock().unwrap().iter().filter(|s| **s == signal).count()
    }

    #[test]
    fn test_defaults() {
        let (_context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);

        assert_eq!(info.get_status(), PREPARING);
        assert_eq!(info.get_details(), PREPARING);
        assert_eq!(info.get_progress(), 0.0);
        assert!(!info.get_is_started());
        assert!(!info.get_is_finished());
        assert!(!info.get_is_paused());
        assert!(!info.get_is_cancelled());
        assert_eq!(info.get_total_elapsed_time(), 0.0);
        assert_eq!(info.icon_name(), None);
        assert_eq!(info.get_destination(), None);
    }

    #[test]
    fn test_start_and_finish_notify_once() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        let seen = record(&info);

        info.start();
        info.start();
        context.dispatch_pending();
        info.start();
        context.dispatch_pending();

        info.finish();
        info.finish();
        context.dispatch_pending();
        info.finish();
        context.dispatch_pending();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ProgressSignal::Started, ProgressSignal::Finished]
        );
    }

    #[test]
    fn test_cancel_latches_status_details_and_progress() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        let seen = record(&info);

        info.start();
        info.set_status("Copying files");
        info.set_details("a.txt");
        info.set_progress(1.0, 2.0);
        context.dispatch_pending();

        info.cancel();
        info.set_status("X");
        info.set_details("X");
        info.take_status("Y".to_string());
        info.take_details("Y".to_string());
        info.set_progress(2.0, 2.0);
        context.dispatch_pending();

        assert!(info.get_is_cancelled());
        assert_eq!(info.get_status(), "Copying files");
        assert_eq!(info.get_details(), CANCELLED);
        assert_eq!(info.get_progress(), 0.5);
        assert_eq!(count(&seen, ProgressSignal::Cancelled), 1);
        assert_eq!(info.icon_name(), Some(ICON_CANCELLED));
    }

    #[test]
    fn test_cancel_before_start_keeps_placeholder_status() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        let seen = record(&info);

        info.cancel();
        info.set_status("ignored");
        context.dispatch_pending();

        assert_eq!(info.get_status(), PREPARING);
        assert_eq!(info.get_details(), CANCELLED);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ProgressSignal::Changed, ProgressSignal::Cancelled]
        );
    }

    #[test]
    fn test_cancel_from_shared_token() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        let seen = record(&info);

        let token = info.get_cancellable();
        thread::spawn(move || token.cancel()).join().unwrap();
        context.dispatch_pending();

        assert!(info.get_is_cancelled());
        assert_eq!(count(&seen, ProgressSignal::Cancelled), 1);
    }

    #[test]
    fn test_finish_freezes_status_details_and_progress() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);

        info.start();
        info.set_status("Done");
        info.set_details("4 / 4");
        info.set_progress(1.0, 1.0);
        info.finish();
        context.dispatch_pending();
        let seen = record(&info);

        info.set_status("late");
        info.take_status("late".to_string());
        info.set_details("late");
        info.take_details("late".to_string());
        info.set_progress(0.0, 1.0);
        info.pulse_progress();
        context.dispatch_pending();

        assert_eq!(info.get_status(), "Done");
        assert_eq!(info.get_details(), "4 / 4");
        assert_eq!(info.get_progress(), 1.0);
        assert!(!info.is_activity_mode());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancel_after_finish_keeps_details() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);

        info.start();
        info.set_details("Done");
        info.finish();
        info.cancel();
        context.dispatch_pending();

        assert!(info.get_is_cancelled());
        assert_eq!(info.get_details(), "Done");
    }

    #[test]
    fn test_finish_after_cancel_still_notifies() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        let seen = record(&info);

        info.start();
        info.cancel();
        context.dispatch_pending();
        info.finish();
        context.dispatch_pending();

        assert!(info.get_is_finished());
        assert!(info.get_is_cancelled());
        assert_eq!(count(&seen, ProgressSignal::Finished), 1);
        assert_eq!(info.icon_name(), Some(ICON_CANCELLED));
    }

    #[test]
    fn test_progress_is_clamped() {
        let (_context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);

        info.set_progress(5.0, 4.0);
        assert_eq!(info.get_progress(), 1.0);
        info.set_progress(-1.0, 4.0);
        assert_eq!(info.get_progress(), 0.0);
        info.set_progress(3.0, 0.0);
        assert_eq!(info.get_progress(), 1.0);
        info.set_progress(1.0, 3.0);
        assert!((info.get_progress() - 1.0 / 3.0).abs() < 1e-12);
        info.set_progress(3.0, -2.0);
        assert_eq!(info.get_progress(), 1.0);
        info.set_progress(1.0, 1000.0);
        assert_eq!(info.get_progress(), 0.001);
    }

    #[test]
    fn test_progress_hysteresis() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        let seen = record(&info);

        for current in [0.0, 1.0, 2.0, 4.0] {
            info.set_progress(current, 1000.0);
            context.dispatch_pending();
        }
        assert_eq!(count(&seen, ProgressSignal::ProgressChanged), 0);

        info.set_progress(5.0, 1000.0);
        context.dispatch_pending();
        assert_eq!(count(&seen, ProgressSignal::ProgressChanged), 1);

        info.set_progress(9.0, 1000.0);
        context.dispatch_pending();
        assert_eq!(count(&seen, ProgressSignal::ProgressChanged), 1);

        info.set_progress(250.0, 1000.0);
        context.dispatch_pending();
        assert_eq!(count(&seen, ProgressSignal::ProgressChanged), 2);
    }

    #[test]
    fn test_leaving_activity_mode_always_notifies() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        let seen = record(&info);

        info.pulse_progress();
        context.dispatch_pending();
        assert_eq!(info.get_progress(), -1.0);
        assert!(info.is_activity_mode());
        assert_eq!(count(&seen, ProgressSignal::ProgressChanged), 1);

        info.set_progress(0.0, 10.0);
        context.dispatch_pending();
        assert!(!info.is_activity_mode());
        assert_eq!(info.get_progress(), 0.0);
        assert_eq!(count(&seen, ProgressSignal::ProgressChanged), 2);
    }

    #[test]
    fn test_every_pulse_notifies() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        let seen = record(&info);

        for _ in 0..3 {
            info.pulse_progress();
            context.dispatch_pending();
        }
        assert_eq!(count(&seen, ProgressSignal::ProgressChanged), 3);
        assert_eq!(info.raw_progress(), 0.0);
    }

    #[test]
    fn test_status_and_details_fold_into_one_changed() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        let seen = record(&info);

        info.set_status("Copying");
        info.set_details("1 / 3");
        info.take_details("2 / 3".to_string());
        context.dispatch_pending();
        assert_eq!(*seen.lock().unwrap(), vec![ProgressSignal::Changed]);

        info.set_status("Copying");
        context.dispatch_pending();
        assert_eq!(count(&seen, ProgressSignal::Changed), 1);
        assert_eq!(info.get_details(), "2 / 3");
    }

    #[test]
    fn test_signal_order_within_one_window() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        let seen = record(&info);

        info.finish();
        info.set_progress(1.0, 2.0);
        info.set_status("Done");
        info.start();
        info.cancel();
        context.dispatch_pending();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ProgressSignal::Started,
                ProgressSignal::Changed,
                ProgressSignal::ProgressChanged,
                ProgressSignal::Finished,
                ProgressSignal::Cancelled,
            ]
        );
    }

    #[test]
    fn test_updates_are_coalesced_over_the_delay() {
        let (context, manager) = fixture_with_delay(100);
        let info = ProgressInfo::new_in(&manager);
        let seen = record(&info);

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let info = info.clone();
                thread::spawn(move || {
                    for step in 0..50 {
                        info.take_status(format!("worker {} step {}", worker, step));
                        info.set_progress(step as f64, 50.0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(context.dispatch_pending(), 0);
        assert_eq!(context.pending_count(), 1);

        context.run_for(Duration::from_millis(250));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ProgressSignal::Changed, ProgressSignal::ProgressChanged]
        );
    }

    #[test]
    fn test_state_transition_escalates_pending_delay() {
        let (context, manager) = fixture_with_delay(10_000);
        let info = ProgressInfo::new_in(&manager);
        let seen = record(&info);

        info.set_status("Copying");
        context.dispatch_pending();
        assert!(seen.lock().unwrap().is_empty());

        info.finish();
        assert_eq!(context.pending_count(), 1);
        context.dispatch_pending();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ProgressSignal::Changed, ProgressSignal::Finished]
        );

        info.set_details("after");
        context.dispatch_pending();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_delayed_request_never_postpones_an_immediate_one() {
        let (context, manager) = fixture_with_delay(10_000);
        let info = ProgressInfo::new_in(&manager);
        let seen = record(&info);

        info.start();
        info.set_status("Copying");
        info.pulse_progress();
        context.dispatch_pending();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ProgressSignal::Started,
                ProgressSignal::Changed,
                ProgressSignal::ProgressChanged
            ]
        );
    }

    #[test]
    fn test_mutations_from_workers_are_delivered_on_loop_thread() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        let loop_thread = thread::current().id();
        let delivered_on = Arc::new(Mutex::new(Vec::new()));
        let d = delivered_on.clone();
        info.connect(ProgressSignal::Finished, move |_| {
            d.lock().unwrap().push(thread::current().id());
        });

        let worker = info.clone();
        thread::spawn(move || {
            worker.start();
            worker.set_progress(1.0, 1.0);
            worker.finish();
        })
        .join()
        .unwrap();

        assert!(context.run_until(|| !delivered_on.lock().unwrap().is_empty(), Duration::from_secs(1)));
        assert_eq!(*delivered_on.lock().unwrap(), vec![loop_thread]);
    }

    #[test]
    fn test_handlers_may_mutate_reentrantly() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        let seen = record(&info);
        info.connect(ProgressSignal::Started, |info| {
            info.set_status("Started from handler");
            info.finish();
        });

        info.start();
        context.dispatch_pending();
        context.dispatch_pending();

        assert_eq!(info.get_status(), "Started from handler");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ProgressSignal::Started, ProgressSignal::Changed, ProgressSignal::Finished]
        );
    }

    #[test]
    fn test_last_reference_dropped_inside_handler() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        let holder = Arc::new(Mutex::new(Some(info.clone())));
        let seen = record(&info);

        let h = holder.clone();
        info.connect(ProgressSignal::Finished, move |_| {
            h.lock().unwrap().take();
        });

        info.finish();
        info.cancel();
        manager.remove_finished_or_cancelled_infos();
        drop(info);

        context.dispatch_pending();
        assert!(holder.lock().unwrap().is_none());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ProgressSignal::Changed, ProgressSignal::Finished, ProgressSignal::Cancelled]
        );
    }

    #[test]
    fn test_dropping_info_destroys_pending_source() {
        let (context, manager) = fixture_with_delay(10_000);
        let info = ProgressInfo::new_in(&manager);

        info.set_status("Copying");
        info.finish();
        assert_eq!(context.pending_count(), 1);

        manager.remove_finished_or_cancelled_infos();
        drop(info);
        assert_eq!(context.pending_count(), 0);
        assert_eq!(context.dispatch_pending(), 0);
    }

    #[test]
    fn test_elapsed_time_follows_pause_and_finish() {
        let (_context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        let nap = || thread::sleep(Duration::from_millis(15));

        nap();
        assert_eq!(info.get_total_elapsed_time(), 0.0);

        info.start();
        nap();
        let first = info.get_total_elapsed_time();
        nap();
        let second = info.get_total_elapsed_time();
        assert!(second > first);

        info.pause();
        info.pause();
        let paused = info.get_total_elapsed_time();
        nap();
        assert_eq!(info.get_total_elapsed_time(), paused);
        assert!(info.get_is_paused());

        info.resume();
        nap();
        assert!(info.get_total_elapsed_time() > paused);

        info.finish();
        let finished = info.get_total_elapsed_time();
        info.pause();
        info.resume();
        nap();
        assert_eq!(info.get_total_elapsed_time(), finished);
    }

    #[test]
    fn test_cancel_freezes_elapsed_time() {
        let (_context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);

        info.start();
        thread::sleep(Duration::from_millis(10));
        info.cancel();
        let frozen = info.get_total_elapsed_time();
        info.pause();
        info.resume();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(info.get_total_elapsed_time(), frozen);
    }

    #[test]
    fn test_start_while_paused_keeps_clock_stopped() {
        let (_context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);

        info.pause();
        info.start();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(info.get_total_elapsed_time(), 0.0);

        info.resume();
        thread::sleep(Duration::from_millis(10));
        assert!(info.get_total_elapsed_time() > 0.0);
    }

    #[test]
    fn test_copy_scenario() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        let seen = record(&info);

        info.start();
        info.set_progress(1.0, 4.0);
        assert!((info.get_progress() - 0.25).abs() < 1e-12);
        assert!(!info.is_activity_mode());
        context.dispatch_pending();

        info.set_progress(2.0, 4.0);
        assert_eq!(info.get_progress(), 0.5);
        context.dispatch_pending();
        assert_eq!(count(&seen, ProgressSignal::ProgressChanged), 2);

        info.pulse_progress();
        assert!(info.is_activity_mode());
        assert_eq!(info.get_progress(), -1.0);

        info.finish();
        context.dispatch_pending();
        assert!(info.get_is_finished());
        assert_eq!(info.icon_name(), Some(ICON_FINISHED));
        let frozen = info.get_total_elapsed_time();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(info.get_total_elapsed_time(), frozen);
    }

    #[test]
    fn test_time_estimates_and_destination() {
        let (_context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);

        info.set_remaining_time(12.5);
        info.set_elapsed_time(3.25);
        info.set_destination(Path::new("/tmp/target"));

        assert_eq!(info.get_remaining_time(), 12.5);
        assert_eq!(info.get_elapsed_time(), 3.25);
        assert_eq!(info.get_destination(), Some(PathBuf::from("/tmp/target")));
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let (_context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        info.start();
        info.set_status("Moving");
        info.set_progress(3.0, 4.0);

        let snapshot = info.snapshot();
        assert_eq!(snapshot.status, "Moving");
        assert_eq!(snapshot.details, PREPARING);
        assert_eq!(snapshot.progress, Some(0.75));
        assert_eq!(snapshot.percent(), Some(75));
        assert!(snapshot.started);
        assert!(snapshot.is_active());

        info.pulse_progress();
        assert_eq!(info.snapshot().progress, None);
    }

    #[test]
    fn test_disconnect_handler() {
        let (context, manager) = fixture();
        let info = ProgressInfo::new_in(&manager);
        let seen = Arc::new(Mutex::new(0));
        let s = seen.clone();
        let id = info.connect(ProgressSignal::Started, move |_| *s.lock().unwrap() += 1);

        assert!(info.disconnect(id));
        assert!(!info.disconnect(id));
        info.start();
        context.dispatch_pending();
        assert_eq!(*seen.lock().unwrap(), 0);
    }
}
