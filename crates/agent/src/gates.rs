//! Per-thread turn serialization.
//!
//! Two turns for the same thread must never interleave their appends.
//! Turns for distinct threads run concurrently without coordination.
//! A second turn arriving for a busy thread queues behind the in-flight
//! one; tokio's mutex hands the gate to waiters in arrival order.

use sqlsage_core::message::ThreadId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type GateMap = HashMap<ThreadId, Arc<Mutex<()>>>;

/// One gate per thread id. Clones share the same gate map.
#[derive(Clone, Default)]
pub struct ThreadGates {
    inner: Arc<Mutex<GateMap>>,
}

impl ThreadGates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the gate for a thread, waiting behind any in-flight turn.
    ///
    /// The returned guard holds the gate until dropped. Gates with no
    /// holder and no waiters are pruned on the way in.
    pub async fn acquire(&self, thread_id: &ThreadId) -> OwnedMutexGuard<()> {
        let gate = {
            let mut map = self.inner.lock().await;
            map.retain(|_, gate| Arc::strong_count(gate) > 1);
            map.entry(thread_id.clone()).or_default().clone()
        };
        gate.lock_owned().await
    }

    #[cfg(test)]
    async fn gate_count(&self) -> usize {
        self.inner.lock().await.len()
    }
}
