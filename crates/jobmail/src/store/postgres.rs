use async_trait::async_trait;
use chrono::{Duration, Utc};
use jobmail_types::{ExtractionResult, Message, StoredEmailRecord, SyncCheckpoint};
use uuid::Uuid;

use super::{is_unchanged, EmailStore, UpsertOutcome, Upserted};
use crate::db::{email_records, sync_checkpoints, DbPool};
use crate::error::StoreError;
use crate::models::{CheckpointRow, EmailRecordChanges, NewEmailRecord};

/// Postgres-backed store; one pooled connection per operation
#[derive(Clone)]
pub struct PgEmailStore {
    pool: DbPool,
}

impl PgEmailStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailStore for PgEmailStore {
    async fn upsert(
        &self,
        mailbox: &str,
        message: &Message,
        extraction: &ExtractionResult,
    ) -> Result<Upserted, StoreError> {
        let mut conn = self.pool.get().await?;

        let existing = match email_records::get_by_message_id(&mut conn, &message.id).await? {
            Some(row) => Some(StoredEmailRecord::try_from(row)?),
            None => None,
        };

        if let Some(record) = &existing {
            if is_unchanged(record, mailbox, message, extraction) {
                return Ok(Upserted {
                    id: record.id,
                    outcome: UpsertOutcome::Unchanged,
                });
            }
        }

        let now = Utc::now();
        let new_record = NewEmailRecord {
            id: Uuid::new_v4(),
            message_id: message.id.clone(),
            stored_at: now,
            values: EmailRecordChanges::new(mailbox, message, extraction, now),
        };
        let id = email_records::upsert(&mut conn, &new_record).await?;

        let outcome = if existing.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        };
        tracing::trace!("Upserted {} as {} ({:?})", message.id, id, outcome);

        Ok(Upserted { id, outcome })
    }

    async fn mark_read_state(&self, message_id: &str, is_unread: bool) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows = email_records::set_unread(&mut conn, message_id, is_unread).await?;
        Ok(rows > 0)
    }

    async fn delete(&self, message_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows = email_records::delete_by_message_id(&mut conn, message_id).await?;
        Ok(rows > 0)
    }

    async fn list_since(
        &self,
        days_back: u32,
        limit: usize,
    ) -> Result<Vec<StoredEmailRecord>, StoreError> {
        let mut conn = self.pool.get().await?;
        let since = Utc::now() - Duration::days(i64::from(days_back));
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        email_records::list_received_since(&mut conn, since, limit)
            .await?
            .into_iter()
            .map(StoredEmailRecord::try_from)
            .collect()
    }

    async fn count_records(&self, mailbox: &str) -> Result<i64, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(email_records::count_by_mailbox(&mut conn, mailbox).await?)
    }

    async fn get_record(&self, message_id: &str) -> Result<Option<StoredEmailRecord>, StoreError> {
        let mut conn = self.pool.get().await?;
        email_records::get_by_message_id(&mut conn, message_id)
            .await?
            .map(StoredEmailRecord::try_from)
            .transpose()
    }

    async fn list_thread(&self, thread_id: &str) -> Result<Vec<StoredEmailRecord>, StoreError> {
        let mut conn = self.pool.get().await?;
        email_records::list_by_thread(&mut conn, thread_id)
            .await?
            .into_iter()
            .map(StoredEmailRecord::try_from)
            .collect()
    }

    async fn get_checkpoint(&self, mailbox: &str) -> Result<Option<SyncCheckpoint>, StoreError> {
        let mut conn = self.pool.get().await?;
        sync_checkpoints::get(&mut conn, mailbox)
            .await?
            .map(SyncCheckpoint::try_from)
            .transpose()
    }

    async fn set_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        sync_checkpoints::upsert(&mut conn, &CheckpointRow::from(checkpoint)).await?;
        Ok(())
    }
}
