//! Deduplicating record store.
//!
//! Records are keyed by the provider's message id: writing the same message
//! twice updates the existing record instead of adding a second one, which is
//! what makes re-running a sync safe.

use async_trait::async_trait;
use jobmail_types::{ExtractionResult, Message, StoredEmailRecord, SyncCheckpoint};
use uuid::Uuid;

use crate::error::StoreError;

mod memory;
mod postgres;

pub use memory::{MemoryStore, StoreOp};
pub use postgres::PgEmailStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Same message and extraction were already stored; nothing written
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted {
    pub id: Uuid,
    pub outcome: UpsertOutcome,
}

#[async_trait]
pub trait EmailStore: Send + Sync {
    /// Insert the record for `message`, or overwrite the one already stored
    /// under the same message id.
    async fn upsert(
        &self,
        mailbox: &str,
        message: &Message,
        extraction: &ExtractionResult,
    ) -> Result<Upserted, StoreError>;

    /// Update only the read flag. Returns false when the message is unknown.
    async fn mark_read_state(&self, message_id: &str, is_unread: bool) -> Result<bool, StoreError>;

    /// Hard delete. Deleting an unknown id is not an error; returns whether a
    /// record was removed.
    async fn delete(&self, message_id: &str) -> Result<bool, StoreError>;

    /// Records received within the last `days_back` days, newest first.
    async fn list_since(
        &self,
        days_back: u32,
        limit: usize,
    ) -> Result<Vec<StoredEmailRecord>, StoreError>;

    async fn count_records(&self, mailbox: &str) -> Result<i64, StoreError>;

    async fn get_record(&self, message_id: &str) -> Result<Option<StoredEmailRecord>, StoreError>;

    /// All records of a thread, oldest first.
    async fn list_thread(&self, thread_id: &str) -> Result<Vec<StoredEmailRecord>, StoreError>;

    async fn get_checkpoint(&self, mailbox: &str) -> Result<Option<SyncCheckpoint>, StoreError>;

    async fn set_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<(), StoreError>;
}

/// True when the stored record already holds exactly this message and extraction
fn is_unchanged(
    existing: &StoredEmailRecord,
    mailbox: &str,
    message: &Message,
    extraction: &ExtractionResult,
) -> bool {
    existing.mailbox == mailbox && existing.message == *message && existing.extraction == *extraction
}
