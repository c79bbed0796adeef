use std::sync::LazyLock;

use crate::modules::{
    context::Initialize, error::RollupResult, utils::shutdown::shutdown_signal,
};
use tokio::sync::broadcast;
use tracing::info;

pub static SIGNAL_MANAGER: LazyLock<SignalManager> = LazyLock::new(SignalManager::new);

pub struct SignalManager {
    sender: broadcast::Sender<()>,
}

impl SignalManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        SignalManager { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Broadcasts shutdown to every subscriber; periodic tasks stop on receipt.
    pub fn trigger(&self) {
        let _ = self.sender.send(());
    }
}

impl Initialize for SignalManager {
    async fn initialize() -> RollupResult<()> {
        tokio::spawn({
            async move {
                shutdown_signal().await;
                info!("Shutdown signal received, stopping background tasks");
                SIGNAL_MANAGER.trigger();
            }
        });
        Ok(())
    }
}
