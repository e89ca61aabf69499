//! SignalBus - realtime fan-out of signal envelopes.
//!
//! Planning and dispatch publish signals here; observers subscribe and fold
//! them into the merged runtime feed.

use async_trait::async_trait;
use tokio::sync::broadcast;

use mesh_core::types::SignalEnvelope;

use crate::StreamError;

/// Async publish/subscribe interface for signals.
#[async_trait]
pub trait SignalBus: Send + Sync {
    /// Publish a signal to all active subscribers.
    async fn publish(&self, signal: SignalEnvelope) -> Result<(), StreamError>;

    /// Subscribe to signals published from now on.
    fn subscribe(&self) -> SignalSubscription;
}

/// Receiving half of a bus subscription.
pub struct SignalSubscription {
    rx: broadcast::Receiver<SignalEnvelope>,
}

impl SignalSubscription {
    /// Next signal; `Ok(None)` once the bus is gone.
    pub async fn recv(&mut self) -> Result<Option<SignalEnvelope>, StreamError> {
        match self.rx.recv().await {
            Ok(signal) => Ok(Some(signal)),
            Err(broadcast::error::RecvError::Closed) => Ok(None),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Err(StreamError::Lagged(skipped)),
        }
    }

    /// Drain whatever is buffered without waiting.
    pub fn drain(&mut self) -> Result<Vec<SignalEnvelope>, StreamError> {
        let mut drained = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(signal) => drained.push(signal),
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return Ok(drained),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    return Err(StreamError::Lagged(skipped))
                }
            }
        }
    }
}

/// In-process SignalBus based on tokio broadcast channels.
pub struct BroadcastSignalBus {
    tx: broadcast::Sender<SignalEnvelope>,
    capacity: usize,
}

impl BroadcastSignalBus {
    /// Create a new broadcast bus with channel capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for BroadcastSignalBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl SignalBus for BroadcastSignalBus {
    async fn publish(&self, signal: SignalEnvelope) -> Result<(), StreamError> {
        // No receivers is fine; signals are fire-and-forget.
        match self.tx.send(signal) {
            Ok(receivers) => {
                tracing::trace!(receivers, "signal published");
                Ok(())
            }
            Err(broadcast::error::SendError(signal)) => {
                tracing::trace!(signal_id = %signal.id, "signal dropped: no subscribers");
                Ok(())
            }
        }
    }

    fn subscribe(&self) -> SignalSubscription {
        SignalSubscription {
            rx: self.tx.subscribe(),
        }
    }
}
