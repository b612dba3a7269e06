use std::time::{Duration, Instant};

/// Wall clock that can be stopped and continued, accumulating only running time.
#[derive(Debug, Clone, Default)]
pub struct ProgressTimer {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl ProgressTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the accumulated time and starts counting.
    pub fn start(&mut self) {
        self.accumulated = Duration::ZERO;
        self.running_since = Some(Instant::now());
    }

    /// Clears the accumulated time and leaves the clock stopped.
    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        self.running_since = None;
    }

    pub fn stop(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    /// Continues counting after `stop`, keeping what was accumulated.
    pub fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        match self.running_since {
            Some(since) => self.accumulated + since.elapsed(),
            None => self.accumulated,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_new_timer_is_idle() {
        let timer = ProgressTimer::new();
        assert!(!timer.is_running());
        assert_eq!(timer.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_stop_freezes_and_resume_accumulates() {
        let mut timer = ProgressTimer::new();
        timer.start();
        sleep(Duration::from_millis(10));
        timer.stop();
        let frozen = timer.elapsed();
        assert!(frozen >= Duration::from_millis(10));

        sleep(Duration::from_millis(10));
        assert_eq!(timer.elapsed(), frozen);

        timer.resume();
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed() >= frozen + Duration::from_millis(10));
    }

    #[test]
    fn test_start_resets() {
        let mut timer = ProgressTimer::new();
        timer.start();
        sleep(Duration::from_millis(20));
        timer.stop();
        timer.start();
        assert!(timer.elapsed() < Duration::from_millis(20));
    }
}
