//! Conversation store implementations for SqlSage.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use sqlsage_core::error::StoreError;
use sqlsage_core::store::ConversationStore;
use std::sync::Arc;

/// Open the store backend named in configuration.
pub async fn open_store(
    backend: &str,
    path: &str,
) -> Result<Arc<dyn ConversationStore>, StoreError> {
    match backend {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "sqlite")]
        "sqlite" => Ok(Arc::new(SqliteStore::new(path).await?)),
        other => Err(StoreError::Connection(format!(
            "unknown store backend: {other}"
        ))),
    }
}
