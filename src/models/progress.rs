use serde::Serialize;
use std::path::PathBuf;

/// Point-in-time copy of one operation's progress, for hosts that forward it elsewhere.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ProgressSnapshot {
    pub status: String,
    pub details: String,
    /// Stored fraction; `None` while in activity mode.
    pub progress: Option<f64>,
    pub remaining_time: f64,
    pub elapsed_time: f64,
    pub total_elapsed_time: f64,
    pub started: bool,
    pub finished: bool,
    pub paused: bool,
    pub cancelled: bool,
    pub icon_name: Option<String>,
    pub destination: Option<PathBuf>,
    pub timestamp: i64,
}

impl ProgressSnapshot {
    pub fn is_active(&self) -> bool {
        !self.finished && !self.cancelled
    }

    pub fn percent(&self) -> Option<u8> {
        self.progress.map(|p| (p * 100.0).round().clamp(0.0, 100.0) as u8)
    }
}
