//! Mail source adapters.
//!
//! A `MailSource` is read and modify-label only: it can list, fetch, diff
//! against a checkpoint, and mark messages read. It never sends mail and never
//! retries; retries belong to the sync orchestrator. Adapters bound each
//! provider request with their own timeout, since a single batch call may
//! issue hundreds of them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobmail_types::Message;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use crate::error::SourceError;

mod gmail;
pub mod text;

pub use gmail::GmailSource;

/// Read flag change for a message that already exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadStateChange {
    pub id: String,
    pub is_unread: bool,
}

/// Everything that changed since a checkpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MailDelta {
    pub added: Vec<Message>,
    pub updated: Vec<ReadStateChange>,
    pub deleted: Vec<String>,
    pub next_token: String,
}

impl MailDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

#[async_trait]
pub trait MailSource: Send + Sync {
    /// Mailbox identity checkpoints are keyed by
    fn identity(&self) -> &str;

    /// Newest-first window fetch, optionally bounded by a start time
    async fn list_recent(
        &self,
        since: Option<DateTime<Utc>>,
        max_results: u32,
    ) -> Result<Vec<Message>, SourceError>;

    async fn get_message(&self, id: &str) -> Result<Message, SourceError>;

    /// Current mailbox state token
    async fn get_checkpoint(&self) -> Result<String, SourceError>;

    /// Changes since `token`. An expired token yields `SourceError::CheckpointStale`.
    async fn sync_since(&self, token: &str) -> Result<MailDelta, SourceError>;

    /// Clear the unread flag on a message
    async fn mark_read(&self, id: &str) -> Result<(), SourceError>;
}

/// One entry from a provider change log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added(String),
    Deleted(String),
    ReadState { id: String, is_unread: bool },
}

/// Collapses a change log into the sets a delta reports.
///
/// Ids are reported once each, in first-seen order. A deletion wins over
/// everything else for the same id; a read change for a message that is also
/// being added is dropped because the fetched copy already carries its flag.
#[derive(Debug, Default)]
pub struct ChangeLog {
    added: Vec<String>,
    deleted: Vec<String>,
    read_order: Vec<String>,
    read_state: HashMap<String, bool>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: Change) {
        match change {
            Change::Added(id) => {
                if !self.added.contains(&id) {
                    self.added.push(id);
                }
            }
            Change::Deleted(id) => {
                if !self.deleted.contains(&id) {
                    self.deleted.push(id);
                }
            }
            Change::ReadState { id, is_unread } => {
                if self.read_state.insert(id.clone(), is_unread).is_none() {
                    self.read_order.push(id);
                }
            }
        }
    }

    /// Ids to fetch, then read changes, then deletions
    pub fn finish(self) -> (Vec<String>, Vec<ReadStateChange>, Vec<String>) {
        let deleted: HashSet<&String> = self.deleted.iter().collect();
        let added: Vec<String> = self
            .added
            .iter()
            .filter(|id| !deleted.contains(id))
            .cloned()
            .collect();
        let added_set: HashSet<&String> = added.iter().collect();

        let updated = self
            .read_order
            .iter()
            .filter(|id| !deleted.contains(id) && !added_set.contains(id))
            .map(|id| ReadStateChange {
                id: id.clone(),
                is_unread: self.read_state[id],
            })
            .collect();

        (added, updated, self.deleted)
    }
}

/// Bound one provider request
pub(crate) async fn within<F: Future>(
    limit: Duration,
    operation: &str,
    request: F,
) -> Result<F::Output, SourceError> {
    tokio::time::timeout(limit, request).await.map_err(|_| {
        SourceError::unavailable(format!("{} timed out after {:?}", operation, limit))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_within_bounds_a_single_request() {
        let fast = within(Duration::from_millis(200), "get message", async { 7 }).await;
        assert_eq!(fast.unwrap(), 7);

        let slow = within(
            Duration::from_millis(10),
            "get message",
            tokio::time::sleep(Duration::from_millis(500)),
        )
        .await;
        let err = slow.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("get message timed out"));
    }

    #[test]
    fn test_added_then_deleted_is_only_deleted() {
        let mut log = ChangeLog::new();
        log.push(Change::Added("m1".to_string()));
        log.push(Change::Added("m2".to_string()));
        log.push(Change::Deleted("m1".to_string()));

        let (added, updated, deleted) = log.finish();
        assert_eq!(added, vec!["m2"]);
        assert!(updated.is_empty());
        assert_eq!(deleted, vec!["m1"]);
    }

    #[test]
    fn test_duplicates_collapse_and_last_read_state_wins() {
        let mut log = ChangeLog::new();
        log.push(Change::Added("m1".to_string()));
        log.push(Change::Added("m1".to_string()));
        log.push(Change::ReadState {
            id: "m7".to_string(),
            is_unread: false,
        });
        log.push(Change::ReadState {
            id: "m7".to_string(),
            is_unread: true,
        });
        log.push(Change::ReadState {
            id: "m1".to_string(),
            is_unread: false,
        });

        let (added, updated, deleted) = log.finish();
        assert_eq!(added, vec!["m1"]);
        assert_eq!(
            updated,
            vec![ReadStateChange {
                id: "m7".to_string(),
                is_unread: true
            }]
        );
        assert!(deleted.is_empty());
    }
}
