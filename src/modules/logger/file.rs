use crate::modules::logger::{parse_log_level, LocalTimer};
use crate::modules::settings::cli::SETTINGS;
use crate::modules::settings::dir::DATA_DIR_MANAGER;
use std::sync::OnceLock;
use tracing::dispatcher::SetGlobalDefaultError;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;

pub static LOG_WORKER_GUARD: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

pub fn setup_file_logger() -> Result<(), SetGlobalDefaultError> {
    let level = parse_log_level(&SETTINGS.rollup_log_level);
    let with_ansi = SETTINGS.rollup_ansi_logs;

    let (server_nonb, server_guard) = match server_log_writer() {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!(
                "Failed to open log directory {:?}: {}",
                DATA_DIR_MANAGER.log_dir, e
            );
            std::process::exit(1);
        }
    };
    let _ = LOG_WORKER_GUARD.set(vec![server_guard]);

    let server_layer = fmt::layer()
        .with_timer(LocalTimer)
        .with_ansi(with_ansi)
        .with_level(true)
        .with_writer(server_nonb)
        .with_target(true);

    let subscriber = tracing_subscriber::registry()
        .with(LevelFilter::from_level(level))
        .with(server_layer);

    tracing::subscriber::set_global_default(subscriber)
}

fn server_log_writer(
) -> Result<(NonBlocking, WorkerGuard), tracing_appender::rolling::InitError> {
    let rolling = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("server")
        .max_log_files(SETTINGS.rollup_max_server_log_files)
        .build(DATA_DIR_MANAGER.log_dir.clone())?;
    Ok(tracing_appender::non_blocking(rolling))
}
