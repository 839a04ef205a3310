//! Background consumption of the transaction update stream
//!
//! One long-lived task per monitor: it suspends awaiting the next update,
//! feeds each event through the manager's reconciliation, and acknowledges
//! definitive purchases with the platform. A bad event never terminates the
//! loop; the feed contract is per-event, not batch.

use crate::{manager::Ack, PurchaseManager, TransactionStream};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Supervised consumer of the platform transaction stream
///
/// Owns the background task's lifecycle: started once, cancelled exactly
/// once via [`TransactionMonitor::shutdown`], aborted on drop as a backstop.
pub struct TransactionMonitor {
    manager: Arc<PurchaseManager>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionMonitor {
    /// Spawn the reconciliation loop and mark the manager started
    pub fn start<S>(manager: Arc<PurchaseManager>, mut stream: S) -> Self
    where
        S: TransactionStream + 'static,
    {
        manager.mark_started();

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task_manager = Arc::clone(&manager);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    update = stream.next_update() => {
                        let Some(update) = update else {
                            tracing::debug!("transaction stream ended");
                            break;
                        };
                        match task_manager.process_update(update) {
                            Ok(Ack::Finish(transaction_id)) => {
                                if let Err(e) = stream.acknowledge(&transaction_id).await {
                                    tracing::warn!(
                                        "failed to acknowledge transaction {}: {}",
                                        transaction_id,
                                        e
                                    );
                                }
                            }
                            Ok(Ack::Skip) => {}
                            Err(e) => {
                                tracing::warn!("transaction update rejected: {}", e);
                            }
                        }
                    }
                }
            }
        });

        Self {
            manager,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Cancel the background task and wait for it to finish
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = {
            let mut slot = self.handle.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        let slot = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn manager(&self) -> &Arc<PurchaseManager> {
        &self.manager
    }
}

impl Drop for TransactionMonitor {
    fn drop(&mut self) {
        let mut slot = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}
