use mimalloc::MiMalloc;
use modules::{
    common::signal::{SignalManager, SIGNAL_MANAGER},
    context::Initialize,
    database::manager::DatabaseManager,
    error::RollupResult,
    ingest::task::LogIngestor,
    kpi::engine::KpiEngine,
    logger,
    settings::{cli::SETTINGS, dir::DataDirManager},
    tasks::PeriodicTasks,
};
use tracing::info;

mod modules;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

static LOGO: &str = r#"
  _          _                 _ _             
 | | ___ __ (_)      _ __ ___ | | |_   _ _ __  
 | |/ / '_ \| |_____| '__/ _ \| | | | | | '_ \ 
 |   <| |_) | |_____| | | (_) | | | |_| | |_) |
 |_|\_\ .__/|_|     |_|  \___/|_|_|\__,_| .__/ 
      |_|                               |_|    
"#;

#[tokio::main]
async fn main() -> RollupResult<()> {
    logger::initialize_logging();
    info!("{}", LOGO);
    info!("Starting kpi-rollup");
    info!("Version:  {}", rollup_version!());
    info!("Git:      [{}]", env!("GIT_HASH"));

    // Subscribe before any task can observe the signal.
    let mut shutdown = SIGNAL_MANAGER.subscribe();
    if let Err(error) = initialize().await {
        eprintln!("{:?}", error);
        return Err(error);
    }

    let _ = shutdown.recv().await;
    info!("kpi-rollup stopped");
    Ok(())
}

/// Validate settings, open storage, catch up aggregates, then start the periodic tasks.
async fn initialize() -> RollupResult<()> {
    SETTINGS.validate()?;
    SignalManager::initialize().await?;
    DataDirManager::initialize().await?;
    DatabaseManager::initialize().await?;
    KpiEngine::initialize().await?;
    LogIngestor::initialize().await?;
    PeriodicTasks::start_background_tasks();
    Ok(())
}
