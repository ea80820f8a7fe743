use async_trait::async_trait;
use chrono::{Duration, Utc};
use jobmail_types::{ExtractionResult, Message, StoredEmailRecord, SyncCheckpoint};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{is_unchanged, EmailStore, UpsertOutcome, Upserted};
use crate::error::StoreError;

/// Store operations that can be made to fail on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Upsert,
    MarkReadState,
    Delete,
    List,
    Count,
    GetCheckpoint,
    SetCheckpoint,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, StoredEmailRecord>,
    checkpoints: HashMap<String, SyncCheckpoint>,
}

/// In-process store with the same semantics as the Postgres one
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    failing: RwLock<HashSet<StoreOp>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later call of `op` returns `StoreError::Unavailable` until cleared
    pub async fn fail_operation(&self, op: StoreOp) {
        self.failing.write().await.insert(op);
    }

    pub async fn clear_failures(&self) {
        self.failing.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn check(&self, op: StoreOp) -> Result<(), StoreError> {
        if self.failing.read().await.contains(&op) {
            return Err(StoreError::Unavailable(format!("{:?} failed", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl EmailStore for MemoryStore {
    async fn upsert(
        &self,
        mailbox: &str,
        message: &Message,
        extraction: &ExtractionResult,
    ) -> Result<Upserted, StoreError> {
        self.check(StoreOp::Upsert).await?;
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        match inner.records.get_mut(&message.id) {
            Some(existing) if is_unchanged(existing, mailbox, message, extraction) => Ok(Upserted {
                id: existing.id,
                outcome: UpsertOutcome::Unchanged,
            }),
            Some(existing) => {
                existing.mailbox = mailbox.to_string();
                existing.message = message.clone();
                existing.extraction = extraction.clone();
                existing.updated_at = now;
                Ok(Upserted {
                    id: existing.id,
                    outcome: UpsertOutcome::Updated,
                })
            }
            None => {
                let id = Uuid::new_v4();
                inner.records.insert(
                    message.id.clone(),
                    StoredEmailRecord {
                        id,
                        mailbox: mailbox.to_string(),
                        message: message.clone(),
                        extraction: extraction.clone(),
                        stored_at: now,
                        updated_at: now,
                    },
                );
                Ok(Upserted {
                    id,
                    outcome: UpsertOutcome::Inserted,
                })
            }
        }
    }

    async fn mark_read_state(&self, message_id: &str, is_unread: bool) -> Result<bool, StoreError> {
        self.check(StoreOp::MarkReadState).await?;
        let mut inner = self.inner.write().await;
        match inner.records.get_mut(message_id) {
            Some(record) => {
                record.message.is_unread = is_unread;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, message_id: &str) -> Result<bool, StoreError> {
        self.check(StoreOp::Delete).await?;
        Ok(self.inner.write().await.records.remove(message_id).is_some())
    }

    async fn list_since(
        &self,
        days_back: u32,
        limit: usize,
    ) -> Result<Vec<StoredEmailRecord>, StoreError> {
        self.check(StoreOp::List).await?;
        let since = Utc::now() - Duration::days(i64::from(days_back));
        let inner = self.inner.read().await;

        let mut records: Vec<StoredEmailRecord> = inner
            .records
            .values()
            .filter(|r| r.message.received_at >= since)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.message
                .received_at
                .cmp(&a.message.received_at)
                .then_with(|| a.message.id.cmp(&b.message.id))
        });
        records.truncate(limit);
        Ok(records)
    }

    async fn count_records(&self, mailbox: &str) -> Result<i64, StoreError> {
        self.check(StoreOp::Count).await?;
        let inner = self.inner.read().await;
        Ok(inner.records.values().filter(|r| r.mailbox == mailbox).count() as i64)
    }

    async fn get_record(&self, message_id: &str) -> Result<Option<StoredEmailRecord>, StoreError> {
        self.check(StoreOp::List).await?;
        Ok(self.inner.read().await.records.get(message_id).cloned())
    }

    async fn list_thread(&self, thread_id: &str) -> Result<Vec<StoredEmailRecord>, StoreError> {
        self.check(StoreOp::List).await?;
        let inner = self.inner.read().await;
        let mut records: Vec<StoredEmailRecord> = inner
            .records
            .values()
            .filter(|r| r.message.thread_id == thread_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.message
                .received_at
                .cmp(&b.message.received_at)
                .then_with(|| a.message.id.cmp(&b.message.id))
        });
        Ok(records)
    }

    async fn get_checkpoint(&self, mailbox: &str) -> Result<Option<SyncCheckpoint>, StoreError> {
        self.check(StoreOp::GetCheckpoint).await?;
        Ok(self.inner.read().await.checkpoints.get(mailbox).cloned())
    }

    async fn set_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<(), StoreError> {
        self.check(StoreOp::SetCheckpoint).await?;
        self.inner
            .write()
            .await
            .checkpoints
            .insert(checkpoint.mailbox.clone(), checkpoint.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmail_types::{JobCategory, Sender};

    fn message(id: &str, thread: &str, hours_ago: i64) -> Message {
        Message {
            id: id.to_string(),
            thread_id: thread.to_string(),
            subject: format!("Subject {}", id),
            sender: Sender::new(None, "jobs@techcorp.com"),
            recipient: "me@example.com".to_string(),
            received_at: Utc::now() - Duration::hours(hours_ago),
            body_text: String::new(),
            snippet: String::new(),
            is_unread: true,
            labels: vec!["INBOX".to_string()],
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let msg = message("m1", "t1", 1);
        let extraction = ExtractionResult::unclassified();

        let first = store.upsert("me", &msg, &extraction).await.unwrap();
        let second = store.upsert("me", &msg, &extraction).await.unwrap();

        assert_eq!(first.outcome, UpsertOutcome::Inserted);
        assert_eq!(second.outcome, UpsertOutcome::Unchanged);
        assert_eq!(first.id, second.id);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_changed_extraction() {
        let store = MemoryStore::new();
        let msg = message("m1", "t1", 1);
        let first = store
            .upsert("me", &msg, &ExtractionResult::unclassified())
            .await
            .unwrap();

        let mut extraction = ExtractionResult::unclassified();
        extraction.is_job_related = true;
        extraction.category = JobCategory::Rejection;
        let second = store.upsert("me", &msg, &extraction).await.unwrap();

        assert_eq!(second.outcome, UpsertOutcome::Updated);
        assert_eq!(second.id, first.id);
        let stored = store.get_record("m1").await.unwrap().unwrap();
        assert_eq!(stored.extraction.category, JobCategory::Rejection);
    }

    #[tokio::test]
    async fn test_delete_unknown_is_noop() {
        let store = MemoryStore::new();
        assert!(!store.delete("missing").await.unwrap());
        assert!(!store.mark_read_state("missing", false).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_since_orders_and_filters() {
        let store = MemoryStore::new();
        let extraction = ExtractionResult::unclassified();
        store.upsert("me", &message("old", "t", 24 * 40), &extraction).await.unwrap();
        store.upsert("me", &message("a", "t", 5), &extraction).await.unwrap();
        store.upsert("me", &message("b", "t", 1), &extraction).await.unwrap();

        let recent = store.list_since(30, 10).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|r| r.message.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let thread = store.list_thread("t").await.unwrap();
        let ids: Vec<&str> = thread.iter().map(|r| r.message.id.as_str()).collect();
        assert_eq!(ids, vec!["old", "a", "b"]);

        assert_eq!(store.list_since(30, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.fail_operation(StoreOp::Upsert).await;
        let result = store
            .upsert("me", &message("m1", "t1", 1), &ExtractionResult::unclassified())
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        store.clear_failures().await;
        assert!(store
            .upsert("me", &message("m1", "t1", 1), &ExtractionResult::unclassified())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_checkpoint_round_trip() {
        let store = MemoryStore::new();
        assert!(store.get_checkpoint("me").await.unwrap().is_none());

        let mut checkpoint = SyncCheckpoint::new("me");
        checkpoint.token = Some("100".to_string());
        store.set_checkpoint(&checkpoint).await.unwrap();

        assert_eq!(store.get_checkpoint("me").await.unwrap(), Some(checkpoint));
    }
}
