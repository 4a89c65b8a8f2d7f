//! Pending-request bookkeeping.
//!
//! Each registered id owns a single-use reply slot. Whoever removes the entry
//! first (a reply, the deadline, or a teardown) is the only one that can fill
//! it; every later attempt finds nothing and reports `false`.

use crate::mcp::error::McpError;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};

pub type Reply = Result<Value, McpError>;

#[derive(Default)]
struct Inner {
    pending: HashMap<i64, oneshot::Sender<Reply>>,
    closed: Option<McpError>,
}

#[derive(Default)]
pub struct CorrelationTable {
    inner: Mutex<Inner>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` and returns the receiving end of its reply slot.
    ///
    /// Fails once the table has been cleared, with the error it was cleared with.
    pub async fn register(&self, id: i64) -> Result<oneshot::Receiver<Reply>, McpError> {
        let mut inner = self.inner.lock().await;
        if let Some(error) = &inner.closed {
            return Err(error.clone());
        }
        if inner.pending.contains_key(&id) {
            return Err(McpError::Protocol(format!("Request id {id} is already pending.")));
        }
        let (tx, rx) = oneshot::channel();
        inner.pending.insert(id, tx);
        Ok(rx)
    }

    /// Delivers `reply` to the caller waiting on `id`. Returns false when no
    /// entry exists, which is a no-op rather than an error.
    pub async fn resolve(&self, id: i64, reply: Reply) -> bool {
        let Some(tx) = self.inner.lock().await.pending.remove(&id) else {
            return false;
        };
        // The waiter may have gone away; the entry is still consumed.
        let _ = tx.send(reply);
        true
    }

    /// Abandons `id` without delivering anything.
    pub async fn expire(&self, id: i64) -> bool {
        self.inner.lock().await.pending.remove(&id).is_some()
    }

    /// Fails every pending entry with `error` and refuses new registrations.
    /// Returns how many entries were drained.
    pub async fn clear(&self, error: McpError) -> usize {
        let mut inner = self.inner.lock().await;
        if inner.closed.is_none() {
            inner.closed = Some(error.clone());
        }
        let drained: Vec<_> = inner.pending.drain().collect();
        drop(inner);

        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed.is_some()
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
