use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use crate::models::CommandError;

/// Tunables shared by the progress core, the indicator and the file operation workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProgressConfig {
    /// Coalescing delay for status/details/progress notifications.
    pub signal_delay_ms: u64,
    /// Minimum change in the progress fraction that is worth a notification.
    pub progress_threshold: f64,
    /// Operations estimated to take less than this are not surfaced in a resident UI.
    pub operation_minimum_time_secs: f64,
    pub remove_finished_timeout_secs: u64,
    pub attention_timeout_ms: u64,
    /// Seconds of transfer after which remaining time estimates are published.
    pub approximate_rate_secs: u64,
    /// Seconds of transfer after which the rate is shown in the details line.
    pub reliable_rate_secs: u64,
    pub report_interval_ms: u64,
    pub max_finished_records: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            signal_delay_ms: 100,
            progress_threshold: 0.005,
            operation_minimum_time_secs: 2.0,
            remove_finished_timeout_secs: 3,
            attention_timeout_ms: 2000,
            approximate_rate_secs: 1,
            reliable_rate_secs: 8,
            report_interval_ms: 100,
            max_finished_records: 50,
        }
    }
}

impl ProgressConfig {
    pub fn signal_delay(&self) -> Duration {
        Duration::from_millis(self.signal_delay_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn remove_finished_timeout(&self) -> Duration {
        Duration::from_secs(self.remove_finished_timeout_secs)
    }

    pub fn attention_timeout(&self) -> Duration {
        Duration::from_millis(self.attention_timeout_ms)
    }

    /// A little more than the time needed for a first estimate, so the estimate is settled.
    pub fn start_check_interval(&self) -> Duration {
        Duration::from_millis(self.approximate_rate_secs * 1000 + 500)
    }
}

pub struct ConfigManager(pub Mutex<ProgressConfig>);

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    pub fn new() -> Self {
        Self(Mutex::new(ProgressConfig::default()))
    }

    pub fn get(&self) -> ProgressConfig {
        self.0.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn set(&self, config: ProgressConfig) -> Result<(), CommandError> {
        let mut current = self.0.lock().map_err(|_| CommandError::ConfigError("Failed to lock config".to_string()))?;
        *current = config;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), CommandError> {
        let config = self.0.lock().map_err(|_| CommandError::ConfigError("Failed to lock config".to_string()))?;
        Self::save_config(path, &config)
    }

    pub fn save_config(path: &Path, config: &ProgressConfig) -> Result<(), CommandError> {
        if let Some(config_dir) = path.parent() {
            if !config_dir.as_os_str().is_empty() && !config_dir.exists() {
                fs::create_dir_all(config_dir)?;
            }
        }

        let json = serde_json::to_string_pretty(config)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Loads `path` if it exists; a missing file keeps the current values.
    pub fn load(&self, path: &Path) -> Result<(), CommandError> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let loaded_config: ProgressConfig = serde_json::from_str(&content)?;

            let mut config = self.0.lock().map_err(|_| CommandError::ConfigError("Failed to lock config".to_string()))?;
            *config = loaded_config;
        }
        Ok(())
    }
}
