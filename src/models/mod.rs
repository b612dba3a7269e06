pub mod config;
pub mod error;
pub mod progress;

pub use error::CommandError;
pub type Result<T> = std::result::Result<T, CommandError>;

pub use config::{ConfigManager, ProgressConfig};
pub use progress::ProgressSnapshot;
