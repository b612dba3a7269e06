pub mod models;
pub mod systems;
pub mod utils;

pub use models::{CommandError, ConfigManager, ProgressConfig, ProgressSnapshot, Result};
pub use systems::{
    Cancellable, FileOpType, FileOperationManager, MainContext, ProgressIndicator, ProgressInfo,
    ProgressInfoManager, ProgressSignal, Viewer,
};

/// Installs the process logger. `RUST_LOG` overrides the default `info` filter.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
