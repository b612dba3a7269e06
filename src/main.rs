use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fileops_progress::systems::LogNotificationSink;
use fileops_progress::{
    init_logging, CommandError, ConfigManager, FileOpType, FileOperationManager, MainContext,
    ProgressIndicator, ProgressInfo, ProgressInfoManager, ProgressSignal, Result,
};

const USAGE: &str = "usage: fileops-progress [--json] [--config FILE] <copy|move|delete|trash> SOURCE... [--to DEST]";

struct Args {
    json: bool,
    config: Option<PathBuf>,
    op_type: FileOpType,
    sources: Vec<PathBuf>,
    destination: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut json = false;
    let mut config = None;
    let mut op_type = None;
    let mut sources = Vec::new();
    let mut destination = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => json = true,
            "--config" => config = Some(PathBuf::from(args.next().ok_or(USAGE)?)),
            "--to" => destination = Some(PathBuf::from(args.next().ok_or(USAGE)?)),
            "copy" if op_type.is_none() => op_type = Some(FileOpType::Copy),
            "move" if op_type.is_none() => op_type = Some(FileOpType::Move),
            "delete" if op_type.is_none() => op_type = Some(FileOpType::Delete),
            "trash" if op_type.is_none() => op_type = Some(FileOpType::Trash),
            _ if op_type.is_some() => sources.push(PathBuf::from(&arg)),
            _ => return Err(CommandError::Other(USAGE.to_string())),
        }
    }

    Ok(Args {
        json,
        config,
        op_type: op_type.ok_or(USAGE)?,
        sources,
        destination,
    })
}

fn print_info(info: &ProgressInfo, json: bool) {
    if json {
        match serde_json::to_string(&info.snapshot()) {
            Ok(line) => println!("{}", line),
            Err(e) => log::error!("Failed to serialize progress: {}", e),
        }
        return;
    }
    match info.get_progress() {
        p if p < 0.0 => println!("[ .... ] {} | {}", info.get_status(), info.get_details()),
        p => println!("[{:>5.1}%] {} | {}", p * 100.0, info.get_status(), info.get_details()),
    }
}

fn run() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;

    let config_manager = ConfigManager::new();
    if let Some(path) = &args.config {
        config_manager.load(path)?;
    }

    let context = MainContext::default_context();
    let manager = ProgressInfoManager::with_config(context.clone(), config_manager.get());
    let _indicator = ProgressIndicator::new(&manager, Arc::new(LogNotificationSink));
    let operations = FileOperationManager::new(manager.clone());

    let id = operations.queue_operation(args.op_type, args.sources, args.destination)?;
    let info = operations
        .progress_info(&id)
        .ok_or_else(|| CommandError::NotFound(id.clone()))?;

    let json = args.json;
    for signal in [ProgressSignal::Changed, ProgressSignal::ProgressChanged] {
        info.connect(signal, move |info| print_info(info, json));
    }
    let done = Arc::new(AtomicBool::new(false));
    let d = done.clone();
    info.connect(ProgressSignal::Finished, move |info| {
        print_info(info, json);
        d.store(true, Ordering::SeqCst);
    });

    while !context.run_until(|| done.load(Ordering::SeqCst), Duration::from_secs(1)) {}
    operations.wait(&id)?;
    Ok(())
}

fn main() -> ExitCode {
    init_logging();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
