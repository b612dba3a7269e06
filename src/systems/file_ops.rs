use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::models::{CommandError, ProgressConfig, ProgressSnapshot, Result};
use crate::systems::progress_info::ProgressInfo;
use crate::systems::progress_manager::ProgressInfoManager;
use crate::utils::format::{format_bytes_left, format_count, format_files_left, format_size, format_time, plural};

const COPY_BUFFER_SIZE: usize = 512 * 1024;
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileOpType {
    Copy,
    Move,
    Delete,
    Trash, // Move to the desktop trash
}

impl FileOpType {
    fn has_destination(self) -> bool {
        matches!(self, FileOpType::Copy | FileOpType::Move)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOperation {
    pub id: String,
    pub op_type: FileOpType,
    pub sources: Vec<PathBuf>,
    pub destination: Option<PathBuf>, // None for Delete/Trash
    pub created_at: i64,
    #[serde(skip)]
    pub progress: ProgressInfo,
}

impl FileOperation {
    pub fn new(op_type: FileOpType, sources: Vec<PathBuf>, destination: Option<PathBuf>, progress: ProgressInfo) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            op_type,
            sources,
            destination,
            created_at: chrono::Utc::now().timestamp_millis(),
            progress,
        }
    }
}

/// Totals discovered while scanning the sources.
#[derive(Debug, Default)]
struct SourceInfo {
    num_files: u64,
    num_bytes: u64,
    first_name: String,
}

/// What has been done so far, plus report throttling state.
#[derive(Debug, Default)]
struct TransferInfo {
    num_files: u64,
    num_bytes: u64,
    last_report: Option<Instant>,
    last_reported_files_left: Option<u64>,
}

impl TransferInfo {
    /// The last report (no files left) is never throttled.
    fn should_report(&mut self, files_left: u64, interval: Duration) -> bool {
        if let Some(last) = self.last_report {
            if last.elapsed() < interval && files_left > 0 {
                return false;
            }
        }
        self.last_report = Some(Instant::now());
        true
    }
}

enum CopyEntry {
    Dir { dest: PathBuf },
    File { src: PathBuf, dest: PathBuf },
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Blocks while the operation is paused. Returns false once it is cancelled.
fn wait_while_paused(info: &ProgressInfo) -> bool {
    while info.get_is_paused() {
        if info.get_is_cancelled() {
            return false;
        }
        thread::sleep(PAUSE_POLL_INTERVAL);
    }
    !info.get_is_cancelled()
}

fn is_same_path(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// First free name of the form "a (copy).txt", "a (copy 2).txt", ... inside `target_dir`.
fn duplicate_path(target_dir: &Path, src: &Path) -> PathBuf {
    let (stem, ext) = if src.is_dir() {
        (display_name(src), None)
    } else {
        let stem = src
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| display_name(src));
        (stem, src.extension().map(|e| e.to_string_lossy().into_owned()))
    };

    let mut n = 1u32;
    loop {
        let suffix = if n == 1 { "copy".to_string() } else { format!("copy {}", n) };
        let name = match &ext {
            Some(ext) => format!("{} ({}).{}", stem, suffix, ext),
            None => format!("{} ({})", stem, suffix),
        };
        let candidate = target_dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn publish_estimates(info: &ProgressInfo, config: &ProgressConfig, elapsed: f64, remaining: Option<f64>) {
    if elapsed > config.approximate_rate_secs as f64 {
        if let Some(remaining) = remaining {
            info.set_remaining_time(remaining);
        }
        info.set_elapsed_time(elapsed);
    }
}

fn report_preparing(op: &FileOperation, source: &SourceInfo) {
    let verb = match op.op_type {
        FileOpType::Copy => "copy",
        FileOpType::Move => "move",
        FileOpType::Delete => "delete",
        FileOpType::Trash => "trash",
    };
    op.progress.take_status(format!(
        "Preparing to {} {} {}",
        verb,
        source.num_files,
        plural(source.num_files, "file", "files")
    ));
    if op.op_type.has_destination() {
        op.progress.take_details(format_size(source.num_bytes));
    }
    op.progress.pulse_progress();
}

fn report_removal_progress(op: &FileOperation, config: &ProgressConfig, source: &SourceInfo, transfer: &mut TransferInfo) {
    let info = &op.progress;
    let files_left = source.num_files.saturating_sub(transfer.num_files);
    if !transfer.should_report(files_left, config.report_interval()) {
        return;
    }

    let (doing, done) = match op.op_type {
        FileOpType::Trash => ("Trashing", "Trashed"),
        _ => ("Deleting", "Deleted"),
    };
    let verb = if files_left == 0 { done } else { doing };
    let status = if source.num_files == 1 {
        format!("{} “{}”", verb, source.first_name)
    } else {
        format!("{} {} {}", verb, source.num_files, plural(source.num_files, "file", "files"))
    };
    info.take_status(status);

    let elapsed = info.get_total_elapsed_time();
    let rate = if elapsed > 0.0 { transfer.num_files as f64 / elapsed } else { 0.0 };
    let remaining = if rate > 0.0 { Some(files_left as f64 / rate) } else { None };
    let current = if files_left > 0 { transfer.num_files + 1 } else { transfer.num_files };

    let details = match remaining {
        Some(remaining) if files_left > 0 && elapsed >= config.reliable_rate_secs as f64 => {
            format_files_left(current, source.num_files, remaining as i64, rate)
        }
        _ => format_count(current, source.num_files),
    };
    info.take_details(details);

    publish_estimates(info, config, elapsed, remaining);
    info.set_progress(transfer.num_files as f64, source.num_files as f64);
}

fn report_copy_progress(
    op: &FileOperation,
    config: &ProgressConfig,
    source: &SourceInfo,
    transfer: &mut TransferInfo,
    is_move: bool,
) {
    let info = &op.progress;
    let files_left = source.num_files.saturating_sub(transfer.num_files);
    if !transfer.should_report(files_left, config.report_interval()) {
        return;
    }

    // Status only changes with the file count.
    if transfer.last_reported_files_left != Some(files_left) || files_left == 0 {
        transfer.last_reported_files_left = Some(files_left);

        let verb = match (is_move, files_left > 0) {
            (true, true) => "Moving",
            (true, false) => "Moved",
            (false, true) => "Copying",
            (false, false) => "Copied",
        };
        let dest_name = op.destination.as_deref().map(display_name).unwrap_or_default();
        let status = if source.num_files == 1 {
            format!("{} “{}” to “{}”", verb, source.first_name, dest_name)
        } else {
            format!(
                "{} {} {} to “{}”",
                verb,
                source.num_files,
                plural(source.num_files, "file", "files"),
                dest_name
            )
        };
        info.take_status(status);
    }

    let total_size = source.num_bytes.max(transfer.num_bytes);
    let elapsed = info.get_total_elapsed_time();
    let rate = if elapsed > 0.0 { transfer.num_bytes as f64 / elapsed } else { 0.0 };
    let remaining = if rate > 0.0 {
        Some((total_size - transfer.num_bytes) as f64 / rate)
    } else {
        None
    };
    let current = if files_left > 0 { transfer.num_files + 1 } else { transfer.num_files };

    let details = match remaining {
        Some(remaining) if files_left > 0 && elapsed >= config.reliable_rate_secs as f64 => {
            if source.num_files == 1 {
                format_bytes_left(transfer.num_bytes, total_size, remaining as i64, rate)
            } else {
                format!(
                    "{} / {} \u{2014} {} left ({}/sec)",
                    current,
                    source.num_files,
                    format_time(remaining as i64),
                    format_size(rate as u64)
                )
            }
        }
        _ if source.num_files == 1 => format!("{} / {}", format_size(transfer.num_bytes), format_size(total_size)),
        _ => format_count(current, source.num_files),
    };
    info.take_details(details);

    publish_estimates(info, config, elapsed, remaining);
    info.set_progress(transfer.num_bytes as f64, total_size as f64);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs copy, move, delete and trash operations on worker threads, each
/// reporting through its own [`ProgressInfo`].
pub struct FileOperationManager {
    progress_manager: ProgressInfoManager,
    config: ProgressConfig,
    operations: Mutex<OperationTable>,
    workers: Mutex<HashMap<String, JoinHandle<()>>>,
}

/// Records keyed by id, each tagged with its queue order.
#[derive(Default)]
struct OperationTable {
    next_seq: u64,
    ops: HashMap<String, (u64, Arc<FileOperation>)>,
}

impl OperationTable {
    fn insert(&mut self, op: Arc<FileOperation>) {
        self.next_seq += 1;
        self.ops.insert(op.id.clone(), (self.next_seq, op));
    }

    fn get(&self, id: &str) -> Option<&Arc<FileOperation>> {
        self.ops.get(id).map(|(_, op)| op)
    }

    // Drops the oldest finished records so one more fits under `max`.
    fn cleanup_finished(&mut self, max: usize) -> Vec<String> {
        if self.ops.len() < max {
            return Vec::new();
        }
        let mut finished: Vec<(u64, String)> = self
            .ops
            .values()
            .filter(|(_, op)| op.progress.get_is_finished())
            .map(|(seq, op)| (*seq, op.id.clone()))
            .collect();
        finished.sort();

        let excess = self.ops.len() + 1 - max;
        let removed: Vec<String> = finished.into_iter().take(excess).map(|(_, id)| id).collect();
        for id in &removed {
            self.ops.remove(id);
        }
        removed
    }
}

impl FileOperationManager {
    pub fn new(progress_manager: ProgressInfoManager) -> Self {
        let config = progress_manager.config();
        Self {
            progress_manager,
            config,
            operations: Mutex::new(OperationTable::default()),
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn progress_manager(&self) -> &ProgressInfoManager {
        &self.progress_manager
    }

    /// Must be called on the thread that owns the progress manager.
    pub fn queue_operation(&self, op_type: FileOpType, sources: Vec<PathBuf>, destination: Option<PathBuf>) -> Result<String> {
        if sources.is_empty() {
            return Err(CommandError::Other("No source items provided".to_string()));
        }
        let destination = if op_type.has_destination() {
            Some(destination.ok_or_else(|| CommandError::PathError("No destination provided for copy/move".to_string()))?)
        } else {
            None
        };

        let info = ProgressInfo::new_in(&self.progress_manager);
        // Delete and trash have no folder worth opening afterwards.
        if let Some(dest) = &destination {
            info.set_destination(dest);
        }

        let op = Arc::new(FileOperation::new(op_type, sources, destination, info));
        let op_id = op.id.clone();

        let removed = {
            let mut ops = lock(&self.operations);
            let removed = ops.cleanup_finished(self.config.max_finished_records);
            ops.insert(op.clone());
            removed
        };

        let progress = op.progress.clone();
        let config = self.config.clone();
        let spawned = thread::Builder::new()
            .name(format!("file-op-{}", &op_id[..8]))
            .spawn(move || Self::execute_operation(&op, &config));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => return Err(self.abandon_operation(&op_id, &progress, e.into())),
        };

        let mut workers = lock(&self.workers);
        for id in removed {
            workers.remove(&id);
        }
        workers.insert(op_id.clone(), handle);

        info!("Queued {:?} operation {}", op_type, op_id);
        Ok(op_id)
    }

    /// Drops a record whose worker never ran, finishing its info so consumers can retire it.
    fn abandon_operation(&self, id: &str, progress: &ProgressInfo, error: CommandError) -> CommandError {
        warn!("Failed to start operation {}: {}", id, error);
        lock(&self.operations).ops.remove(id);
        progress.take_details(error.to_string());
        progress.finish();
        error
    }

    fn execute_operation(op: &FileOperation, config: &ProgressConfig) {
        let result = match op.op_type {
            FileOpType::Copy => Self::perform_copy(op, config, false),
            FileOpType::Move => Self::perform_copy(op, config, true),
            FileOpType::Delete => Self::perform_delete(op, config),
            FileOpType::Trash => Self::perform_trash(op, config),
        };

        match result {
            Ok(()) if op.progress.get_is_cancelled() => info!("Operation {} cancelled", op.id),
            Ok(()) => info!("Operation {} completed", op.id),
            Err(e) => {
                warn!("Operation {} failed: {}", op.id, e);
                op.progress.take_details(e.to_string());
            }
        }
        op.progress.finish();
    }

    fn scan_copy_sources(op: &FileOperation, sources: &[PathBuf], target_dir: &Path, source: &mut SourceInfo) -> Result<Vec<CopyEntry>> {
        let mut entries = Vec::new();

        for src in sources {
            if op.progress.get_is_cancelled() {
                break;
            }
            if !src.exists() {
                return Err(CommandError::NotFound(src.display().to_string()));
            }
            let file_name = src
                .file_name()
                .ok_or_else(|| CommandError::PathError(format!("Invalid source name: {}", src.display())))?;
            let mut dest_root = target_dir.join(file_name);
            if is_same_path(src, &dest_root) {
                dest_root = duplicate_path(target_dir, src);
                debug!("Duplicating {} as {}", src.display(), dest_root.display());
            }

            if src.is_dir() {
                if target_dir.starts_with(src) {
                    return Err(CommandError::PathError(format!(
                        "Cannot copy “{}” into itself",
                        display_name(src)
                    )));
                }
                for entry in WalkDir::new(src) {
                    let entry = entry?;
                    let relative = entry
                        .path()
                        .strip_prefix(src)
                        .map_err(|e| CommandError::PathError(e.to_string()))?;
                    let dest = dest_root.join(relative);
                    if entry.file_type().is_dir() {
                        entries.push(CopyEntry::Dir { dest });
                    } else {
                        source.num_files += 1;
                        source.num_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
                        entries.push(CopyEntry::File { src: entry.path().to_path_buf(), dest });
                    }
                }
            } else {
                source.num_files += 1;
                source.num_bytes += fs::metadata(src).map(|m| m.len()).unwrap_or(0);
                entries.push(CopyEntry::File { src: src.clone(), dest: dest_root });
            }
            report_preparing(op, source);
        }

        Ok(entries)
    }

    fn perform_copy(op: &FileOperation, config: &ProgressConfig, is_move: bool) -> Result<()> {
        let info = &op.progress;
        let target_dir = op
            .destination
            .clone()
            .ok_or_else(|| CommandError::PathError("No destination provided for copy/move".to_string()))?;
        if !target_dir.is_dir() {
            return Err(CommandError::NotFound(target_dir.display().to_string()));
        }

        let mut source = SourceInfo {
            first_name: op.sources.first().map(|p| display_name(p)).unwrap_or_default(),
            ..SourceInfo::default()
        };
        let mut transfer = TransferInfo::default();

        // A rename is enough when source and target share a volume.
        let mut sources_to_copy = Vec::new();
        if is_move {
            for src in &op.sources {
                let Some(file_name) = src.file_name() else {
                    sources_to_copy.push(src.clone());
                    continue;
                };
                let dest = target_dir.join(file_name);
                if is_same_path(src, &dest) {
                    debug!("Already in place: {}", src.display());
                    source.num_files += 1;
                    transfer.num_files += 1;
                } else if !dest.exists() && fs::rename(src, &dest).is_ok() {
                    debug!("Fast-moved: {} to {}", src.display(), dest.display());
                    source.num_files += 1;
                    transfer.num_files += 1;
                } else {
                    sources_to_copy.push(src.clone());
                }
            }
        } else {
            sources_to_copy = op.sources.clone();
        }

        let entries = Self::scan_copy_sources(op, &sources_to_copy, &target_dir, &mut source)?;
        if info.get_is_cancelled() {
            return Ok(());
        }

        info.start();
        report_copy_progress(op, config, &source, &mut transfer, is_move);

        for entry in entries {
            if !wait_while_paused(info) {
                return Ok(());
            }
            match entry {
                CopyEntry::Dir { dest } => fs::create_dir_all(&dest)?,
                CopyEntry::File { src, dest } => {
                    if let Some(parent) = dest.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    if !Self::copy_file(op, config, &src, &dest, &source, &mut transfer, is_move)? {
                        return Ok(());
                    }
                    if is_move {
                        fs::remove_file(&src)?;
                    }
                    transfer.num_files += 1;
                    report_copy_progress(op, config, &source, &mut transfer, is_move);
                }
            }
        }

        if is_move {
            for src in sources_to_copy.iter().filter(|src| src.is_dir()) {
                fs::remove_dir_all(src)?;
            }
        }

        Ok(())
    }

    /// Returns false when the copy was interrupted by cancellation; the partial file is removed.
    fn copy_file(
        op: &FileOperation,
        config: &ProgressConfig,
        src: &Path,
        dest: &Path,
        source: &SourceInfo,
        transfer: &mut TransferInfo,
        is_move: bool,
    ) -> Result<bool> {
        let mut file_in = File::open(src)?;
        let mut file_out = File::create(dest)?;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

        loop {
            if !wait_while_paused(&op.progress) {
                drop(file_out);
                let _ = fs::remove_file(dest);
                return Ok(false);
            }

            let n = match file_in.read(&mut buffer)? {
                0 => break,
                n => n,
            };
            file_out.write_all(&buffer[..n])?;
            transfer.num_bytes += n as u64;
            report_copy_progress(op, config, source, transfer, is_move);
        }

        Ok(true)
    }

    fn perform_delete(op: &FileOperation, config: &ProgressConfig) -> Result<()> {
        let info = &op.progress;
        let mut source = SourceInfo {
            first_name: op.sources.first().map(|p| display_name(p)).unwrap_or_default(),
            ..SourceInfo::default()
        };

        // Children come before their directory so directories are empty when reached.
        let mut entries = Vec::new();
        for src in &op.sources {
            if info.get_is_cancelled() {
                return Ok(());
            }
            for entry in WalkDir::new(src).contents_first(true) {
                let entry = entry?;
                entries.push((entry.path().to_path_buf(), entry.file_type().is_dir()));
            }
            source.num_files = entries.len() as u64;
            report_preparing(op, &source);
        }

        info.start();
        let mut transfer = TransferInfo::default();
        report_removal_progress(op, config, &source, &mut transfer);

        for (path, is_dir) in entries {
            if !wait_while_paused(info) {
                return Ok(());
            }
            let res = if is_dir { fs::remove_dir(&path) } else { fs::remove_file(&path) };
            if let Err(e) = res {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(CommandError::IoError(format!("{}: {}", path.display(), e)));
                }
            }
            transfer.num_files += 1;
            report_removal_progress(op, config, &source, &mut transfer);
        }

        Ok(())
    }

    fn perform_trash(op: &FileOperation, config: &ProgressConfig) -> Result<()> {
        let info = &op.progress;
        let mut source = SourceInfo {
            first_name: op.sources.first().map(|p| display_name(p)).unwrap_or_default(),
            ..SourceInfo::default()
        };

        // Items go to the trash whole, so only the top level is counted.
        for src in &op.sources {
            if info.get_is_cancelled() {
                return Ok(());
            }
            if !src.exists() {
                return Err(CommandError::NotFound(src.display().to_string()));
            }
            source.num_files += 1;
            report_preparing(op, &source);
        }

        info.start();
        let mut transfer = TransferInfo::default();
        report_removal_progress(op, config, &source, &mut transfer);

        for src in &op.sources {
            if !wait_while_paused(info) {
                return Ok(());
            }
            if !src.exists() {
                return Err(CommandError::NotFound(src.display().to_string()));
            }
            trash::delete(src)?;
            transfer.num_files += 1;
            report_removal_progress(op, config, &source, &mut transfer);
        }

        Ok(())
    }

    pub fn get_operation(&self, id: &str) -> Option<ProgressSnapshot> {
        lock(&self.operations).get(id).map(|op| op.progress.snapshot())
    }

    pub fn progress_info(&self, id: &str) -> Option<ProgressInfo> {
        lock(&self.operations).get(id).map(|op| op.progress.clone())
    }

    pub fn operation_count(&self) -> usize {
        lock(&self.operations).ops.len()
    }

    pub fn cancel_operation(&self, id: &str) -> bool {
        match self.progress_info(id) {
            Some(info) => {
                info.cancel();
                true
            }
            None => false,
        }
    }

    pub fn pause_operation(&self, id: &str) -> bool {
        match self.progress_info(id) {
            Some(info) => {
                info.pause();
                true
            }
            None => false,
        }
    }

    pub fn resume_operation(&self, id: &str) -> bool {
        match self.progress_info(id) {
            Some(info) => {
                info.resume();
                true
            }
            None => false,
        }
    }

    /// Blocks until the worker of `id` has exited.
    pub fn wait(&self, id: &str) -> Result<()> {
        let handle = lock(&self.workers)
            .remove(id)
            .ok_or_else(|| CommandError::NotFound(format!("No running operation {}", id)))?;
        handle
            .join()
            .map_err(|_| CommandError::Other(format!("Worker for operation {} panicked", id)))
    }
}
