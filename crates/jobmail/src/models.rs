// Database models for Diesel
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use jobmail_types::{
    ExtractionResult, ExtractionSource, JobCategory, JsonText, KeyDates, Message, Sender,
    StoredEmailRecord, SyncCheckpoint, SyncStatus,
};
use uuid::Uuid;

use crate::error::StoreError;

/// Database representation of email_records.
/// Labels and key dates are JSON stored as TEXT.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::email_records)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct EmailRecordRow {
    pub id: Uuid,
    pub message_id: String,
    pub mailbox: String,
    pub thread_id: String,
    pub subject: String,
    pub sender_name: Option<String>,
    pub sender_address: String,
    pub recipient: String,
    pub received_at: DateTime<Utc>,
    pub body_text: String,
    pub snippet: String,
    pub is_unread: bool,
    pub labels: JsonText<Vec<String>>,
    pub is_job_related: bool,
    pub category: String,
    pub company: Option<String>,
    pub position: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub key_dates: JsonText<KeyDates>,
    pub action_required: Option<String>,
    pub confidence: f32,
    pub summary: String,
    pub extraction_source: String,
    pub stored_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<EmailRecordRow> for StoredEmailRecord {
    type Error = StoreError;

    fn try_from(row: EmailRecordRow) -> Result<Self, Self::Error> {
        let category = JobCategory::from_str(&row.category).ok_or_else(|| StoreError::Corrupt {
            id: row.message_id.clone(),
            reason: format!("unknown category '{}'", row.category),
        })?;
        let source = ExtractionSource::from_str(&row.extraction_source).ok_or_else(|| {
            StoreError::Corrupt {
                id: row.message_id.clone(),
                reason: format!("unknown extraction source '{}'", row.extraction_source),
            }
        })?;

        Ok(StoredEmailRecord {
            id: row.id,
            mailbox: row.mailbox,
            message: Message {
                id: row.message_id,
                thread_id: row.thread_id,
                subject: row.subject,
                sender: Sender {
                    name: row.sender_name,
                    address: row.sender_address,
                },
                recipient: row.recipient,
                received_at: row.received_at,
                body_text: row.body_text,
                snippet: row.snippet,
                is_unread: row.is_unread,
                labels: row.labels.into_inner(),
            },
            extraction: ExtractionResult {
                is_job_related: row.is_job_related,
                category,
                company: row.company,
                position: row.position,
                contact_name: row.contact_name,
                contact_email: row.contact_email,
                key_dates: row.key_dates.into_inner(),
                action_required: row.action_required,
                confidence: row.confidence,
                summary: row.summary,
                source,
            },
            stored_at: row.stored_at,
            updated_at: row.updated_at,
        })
    }
}

/// Column values written on both insert and conflict-update.
/// `id`, `message_id` and `stored_at` are fixed at first insert.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::email_records)]
#[diesel(treat_none_as_null = true)]
pub struct EmailRecordChanges {
    pub mailbox: String,
    pub thread_id: String,
    pub subject: String,
    pub sender_name: Option<String>,
    pub sender_address: String,
    pub recipient: String,
    pub received_at: DateTime<Utc>,
    pub body_text: String,
    pub snippet: String,
    pub is_unread: bool,
    pub labels: JsonText<Vec<String>>,
    pub is_job_related: bool,
    pub category: String,
    pub company: Option<String>,
    pub position: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub key_dates: JsonText<KeyDates>,
    pub action_required: Option<String>,
    pub confidence: f32,
    pub summary: String,
    pub extraction_source: String,
    pub updated_at: DateTime<Utc>,
}

impl EmailRecordChanges {
    pub fn new(
        mailbox: &str,
        message: &Message,
        extraction: &ExtractionResult,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            mailbox: mailbox.to_string(),
            thread_id: message.thread_id.clone(),
            subject: message.subject.clone(),
            sender_name: message.sender.name.clone(),
            sender_address: message.sender.address.clone(),
            recipient: message.recipient.clone(),
            received_at: message.received_at,
            body_text: message.body_text.clone(),
            snippet: message.snippet.clone(),
            is_unread: message.is_unread,
            labels: JsonText(message.labels.clone()),
            is_job_related: extraction.is_job_related,
            category: extraction.category.as_str().to_string(),
            company: extraction.company.clone(),
            position: extraction.position.clone(),
            contact_name: extraction.contact_name.clone(),
            contact_email: extraction.contact_email.clone(),
            key_dates: JsonText(extraction.key_dates.clone()),
            action_required: extraction.action_required.clone(),
            confidence: extraction.confidence,
            summary: extraction.summary.clone(),
            extraction_source: extraction.source.as_str().to_string(),
            updated_at: now,
        }
    }
}

/// Insertable struct for new email records
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::email_records)]
pub struct NewEmailRecord {
    pub id: Uuid,
    pub message_id: String,
    pub stored_at: DateTime<Utc>,
    #[diesel(embed)]
    pub values: EmailRecordChanges,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::sync_checkpoints)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(primary_key(mailbox))]
#[diesel(treat_none_as_null = true)]
pub struct CheckpointRow {
    pub mailbox: String,
    pub token: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub status: String,
    pub processed: i64,
    pub new_items: i64,
    pub updated: i64,
    pub deleted: i64,
    pub last_error: Option<String>,
}

impl From<&SyncCheckpoint> for CheckpointRow {
    fn from(checkpoint: &SyncCheckpoint) -> Self {
        CheckpointRow {
            mailbox: checkpoint.mailbox.clone(),
            token: checkpoint.token.clone(),
            last_sync_at: checkpoint.last_sync_at,
            status: checkpoint.status.as_str().to_string(),
            processed: checkpoint.processed,
            new_items: checkpoint.new_items,
            updated: checkpoint.updated,
            deleted: checkpoint.deleted,
            last_error: checkpoint.last_error.clone(),
        }
    }
}

impl TryFrom<CheckpointRow> for SyncCheckpoint {
    type Error = StoreError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        let status = SyncStatus::from_str(&row.status).ok_or_else(|| StoreError::Corrupt {
            id: row.mailbox.clone(),
            reason: format!("unknown sync status '{}'", row.status),
        })?;

        Ok(SyncCheckpoint {
            mailbox: row.mailbox,
            token: row.token,
            last_sync_at: row.last_sync_at,
            status,
            processed: row.processed,
            new_items: row.new_items,
            updated: row.updated,
            deleted: row.deleted,
            last_error: row.last_error,
        })
    }
}
