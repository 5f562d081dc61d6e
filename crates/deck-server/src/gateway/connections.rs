//! The live-connection set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Capacity of each session's outbound queue.
pub const OUTBOUND_QUEUE: usize = 64;

/// Registered sessions, keyed by connection id, each with an outbound text queue.
#[derive(Clone, Default)]
pub struct LiveConnections {
    senders: Arc<RwLock<HashMap<u64, mpsc::Sender<String>>>>,
    next_id: Arc<AtomicU64>,
}

impl LiveConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Returns its id and the receiving end of its queue.
    pub async fn register(&self) -> (u64, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        self.senders.write().await.insert(id, tx);
        (id, rx)
    }

    pub async fn unregister(&self, id: u64) -> bool {
        self.senders.write().await.remove(&id).is_some()
    }

    pub async fn count(&self) -> usize {
        self.senders.read().await.len()
    }

    /// Removes `id` from the set when the returned guard is dropped, including during an unwind.
    pub fn guard(&self, id: u64) -> Registration {
        Registration {
            connections: self.clone(),
            id,
        }
    }

    /// Queue `text` for every session except `sender`.
    ///
    /// Peers whose queue is closed are dropped from the set. A peer whose
    /// queue is full misses this message but stays registered. Returns the
    /// number of peers the message was queued for.
    pub async fn broadcast_except(&self, sender: u64, text: &str) -> usize {
        let mut senders = self.senders.write().await;
        let mut stale = Vec::new();
        let mut delivered = 0;

        for (id, tx) in senders.iter() {
            if *id == sender {
                continue;
            }
            match tx.try_send(text.to_string()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(conn_id = *id, "outbound queue full, skipping broadcast for peer");
                }
                Err(TrySendError::Closed(_)) => stale.push(*id),
            }
        }

        for id in stale {
            debug!(conn_id = id, "dropping unreachable peer from live set");
            senders.remove(&id);
        }
        delivered
    }
}

/// Live-set membership of one session. Unregisters on drop.
pub struct Registration {
    connections: LiveConnections,
    id: u64,
}

impl Registration {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let id = self.id;
        if let Ok(mut senders) = self.connections.senders.try_write() {
            senders.remove(&id);
            return;
        }
        // Lock is contended: finish the removal on the runtime.
        let connections = self.connections.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    connections.unregister(id).await;
                });
            }
            Err(_) => warn!(conn_id = id, "no runtime to unregister session"),
        }
    }
}
