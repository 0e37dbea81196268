//! In-memory conversation store, useful for testing and ephemeral runs.

use async_trait::async_trait;
use sqlsage_core::error::StoreError;
use sqlsage_core::message::{Message, ThreadId};
use sqlsage_core::store::ConversationStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A store that keeps thread histories in process memory.
/// Nothing survives a restart.
pub struct MemoryStore {
    threads: Arc<RwLock<HashMap<String, Vec<Message>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            threads: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of known threads.
    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, thread_id: &ThreadId, message: &Message) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        threads
            .entry(thread_id.as_str().to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn history(&self, thread_id: &ThreadId) -> Result<Vec<Message>, StoreError> {
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id.as_str()).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlsage_core::message::Role;

    #[tokio::test]
    async fn append_and_read_back() {
        let store = MemoryStore::new();
        let thread = ThreadId::from("t1");

        store.append(&thread, &Message::user("first")).await.unwrap();
        store
            .append(&thread, &Message::assistant("second"))
            .await
            .unwrap();

        let history = store.history(&thread).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn unknown_thread_is_empty() {
        let store = MemoryStore::new();
        assert!(store
            .history(&ThreadId::from("ghost"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn threads_do_not_leak_into_each_other() {
        let store = MemoryStore::new();
        store
            .append(&ThreadId::from("a"), &Message::user("only for a"))
            .await
            .unwrap();

        assert_eq!(store.history(&ThreadId::from("a")).await.unwrap().len(), 1);
        assert!(store
            .history(&ThreadId::from("b"))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.thread_count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let thread = ThreadId::from("busy");

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let thread = thread.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append(&thread, &Message::user(format!("m{i}")))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.history(&thread).await.unwrap().len(), 8);
    }
}
