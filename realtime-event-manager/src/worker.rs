//! Background worker thread owning the tokio runtime
//!
//! The realtime manager needs a runtime for its connection worker. The
//! blocking facade spawns a thread with a single-threaded runtime, creates the
//! manager there and hands a clone back. Operations that must be awaited are
//! sent to the worker as commands.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use realtime_stream::{ChannelProvider, ManagerConfig, ManagerError, RealtimeManager};
use tokio::sync::mpsc;

/// Commands sent from the blocking facade to the background worker
#[derive(Debug)]
pub(crate) enum Command {
    /// Wait until every pending delivery has reached its consumer
    Flush { reply: std_mpsc::SyncSender<bool> },
    /// Drop all subscriptions and listeners and release the channel
    Cleanup { reply: std_mpsc::SyncSender<()> },
    /// Stop the worker
    Shutdown,
}

/// Spawn the worker and wait until the manager is running on it.
pub(crate) fn spawn_event_worker(
    config: ManagerConfig,
    provider: Arc<dyn ChannelProvider>,
    command_rx: mpsc::UnboundedReceiver<Command>,
) -> crate::Result<(RealtimeManager, JoinHandle<()>)> {
    let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);

    let handle = thread::Builder::new()
        .name("realtime-event-worker".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!("Failed to create tokio runtime for event worker: {}", e);
                    let _ = ready_tx.send(Err(ManagerError::NoRuntime(e.to_string())));
                    return;
                }
            };

            rt.block_on(async move {
                let manager = match RealtimeManager::new(config, provider) {
                    Ok(manager) => manager,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if ready_tx.send(Ok(manager.clone())).is_err() {
                    return;
                }
                run_command_loop(manager, command_rx).await;
            });
        })
        .map_err(|e| crate::EventManagerError::WorkerStart(e.to_string()))?;

    let manager = ready_rx
        .recv()
        .map_err(|_| crate::EventManagerError::WorkerStart("worker exited during startup".to_string()))??;

    Ok((manager, handle))
}

async fn run_command_loop(manager: RealtimeManager, mut command_rx: mpsc::UnboundedReceiver<Command>) {
    tracing::info!("Event worker started");

    while let Some(command) = command_rx.recv().await {
        match command {
            Command::Flush { reply } => {
                let flushed = manager.flush().await.is_ok();
                let _ = reply.send(flushed);
            }
            Command::Cleanup { reply } => {
                manager.cleanup().await;
                let _ = reply.send(());
            }
            Command::Shutdown => {
                tracing::info!("Worker received shutdown command");
                break;
            }
        }
    }

    manager.cleanup().await;
    tracing::info!("Event worker shut down");
}
