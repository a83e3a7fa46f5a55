use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, Mutex, MutexGuard};

use crate::membership::NodeAddress;

/// Unbounded FIFO of dead-node reports.
///
/// The receiver sits behind an async mutex that the recovery worker holds for
/// its whole lifetime, so at most one worker drains the queue at a time.
#[derive(Debug)]
pub(super) struct IntakeQueue {
    tx: mpsc::UnboundedSender<NodeAddress>,
    rx: Mutex<mpsc::UnboundedReceiver<NodeAddress>>,
    pending: AtomicUsize,
}

impl IntakeQueue {
    pub(super) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            pending: AtomicUsize::new(0),
        }
    }

    /// Queues `node` without blocking. Returns false if the queue is closed.
    pub(super) fn push(&self, node: NodeAddress) -> bool {
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.tx.send(node) {
            Ok(()) => true,
            Err(e) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                tracing::error!(node = %e.0, "Intake queue closed, node-down report lost");
                false
            }
        }
    }

    pub(super) async fn lock_receiver(&self) -> MutexGuard<'_, mpsc::UnboundedReceiver<NodeAddress>> {
        self.rx.lock().await
    }

    pub(super) fn mark_dequeued(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    pub(super) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}
