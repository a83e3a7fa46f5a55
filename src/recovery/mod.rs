//! Recovery triggers.
//!
//! After the coordinator has moved a dead node's work it tells every alive
//! node to re-scan what it now owns. Peers are reached through a
//! [`RecoveryNotifier`]; the coordinator's own node through [`LocalRecovery`].

pub mod http;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;
use crate::membership::NodeAddress;

pub use http::HttpRecoveryNotifier;

#[async_trait]
pub trait RecoveryNotifier: Send + Sync {
    /// Delivers a recovery trigger to the node at `node`.
    async fn notify(&self, node: &NodeAddress) -> Result<()>;
}

#[async_trait]
pub trait LocalRecovery: Send + Sync {
    /// Recovery trigger for this process.
    async fn trigger_self(&self) -> Result<()>;
}

/// [`LocalRecovery`] that publishes a generation counter. Whatever re-scans
/// assigned work on this node subscribes and wakes on every bump.
#[derive(Debug)]
pub struct RecoverySignal {
    generation: AtomicU64,
    tx: watch::Sender<u64>,
}

impl Default for RecoverySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoverySignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            generation: AtomicU64::new(0),
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalRecovery for RecoverySignal {
    async fn trigger_self(&self) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        // No subscribers is fine; the counter still records the trigger.
        self.tx.send_replace(generation);
        tracing::info!(generation, "Local recovery triggered");
        Ok(())
    }
}
