pub mod cancellable;
pub mod file_ops;
pub mod main_loop;
pub mod progress_indicator;
pub mod progress_info;
pub mod progress_manager;
pub mod signals;

pub use cancellable::Cancellable;
pub use file_ops::{FileOpType, FileOperation, FileOperationManager};
pub use main_loop::{MainContext, Source, SourceId};
pub use progress_indicator::{should_show_progress_info, LogNotificationSink, NotificationSink, ProgressIndicator};
pub use progress_info::{ProgressInfo, ProgressSignal};
pub use progress_manager::{ProgressInfoManager, Viewer};
pub use signals::{HandlerId, Signal};
