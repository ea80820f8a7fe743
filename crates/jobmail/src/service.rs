//! Entry point used by the CLI and the poller.

use chrono::Utc;
use futures::future::join_all;
use jobmail_types::{DashboardData, StoredEmailRecord, SyncReport, SyncStatusResponse};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::dashboard::{aggregate_capped, DashboardConfig};
use crate::error::StoreError;
use crate::store::EmailStore;
use crate::sync::SyncOrchestrator;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Unknown mailbox: {0}")]
    UnknownMailbox(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct JobMailService {
    orchestrators: BTreeMap<String, Arc<SyncOrchestrator>>,
    store: Arc<dyn EmailStore>,
    dashboard: DashboardConfig,
}

impl JobMailService {
    pub fn new(store: Arc<dyn EmailStore>, dashboard: DashboardConfig) -> Self {
        Self {
            orchestrators: BTreeMap::new(),
            store,
            dashboard,
        }
    }

    /// Register a mailbox. A second orchestrator for the same identity
    /// replaces the first.
    pub fn add_mailbox(&mut self, orchestrator: SyncOrchestrator) {
        self.orchestrators
            .insert(orchestrator.mailbox().to_string(), Arc::new(orchestrator));
    }

    pub fn mailboxes(&self) -> impl Iterator<Item = &str> {
        self.orchestrators.keys().map(String::as_str)
    }

    fn orchestrator(&self, mailbox: &str) -> Result<&Arc<SyncOrchestrator>, ServiceError> {
        self.orchestrators
            .get(mailbox)
            .ok_or_else(|| ServiceError::UnknownMailbox(mailbox.to_string()))
    }

    pub async fn sync(&self, mailbox: &str, force_full: bool) -> Result<SyncReport, ServiceError> {
        Ok(self.orchestrator(mailbox)?.run(force_full).await)
    }

    /// Sync every mailbox; mailboxes run concurrently
    pub async fn sync_all(&self, force_full: bool) -> Vec<SyncReport> {
        join_all(self.orchestrators.values().map(|o| o.run(force_full))).await
    }

    /// Aggregate the stored records. Omitted bounds come from the config.
    pub async fn dashboard(
        &self,
        days_back: Option<u32>,
        limit: Option<usize>,
    ) -> Result<DashboardData, ServiceError> {
        let records = self
            .store
            .list_since(
                days_back.unwrap_or(self.dashboard.days_back),
                limit.unwrap_or(self.dashboard.limit),
            )
            .await?;
        Ok(aggregate_capped(
            &records,
            Utc::now(),
            self.dashboard.max_activities,
        ))
    }

    pub async fn thread(&self, thread_id: &str) -> Result<Vec<StoredEmailRecord>, ServiceError> {
        Ok(self.store.list_thread(thread_id).await?)
    }

    pub async fn status(&self, mailbox: &str) -> Result<SyncStatusResponse, ServiceError> {
        Ok(self.orchestrator(mailbox)?.status().await?)
    }

    pub async fn status_all(&self) -> Result<Vec<SyncStatusResponse>, ServiceError> {
        let mut statuses = Vec::with_capacity(self.orchestrators.len());
        for orchestrator in self.orchestrators.values() {
            statuses.push(orchestrator.status().await?);
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::extraction::{extract_with_rules, ExtractionConfig, ExtractionEngine};
    use crate::mail::{MailDelta, MailSource};
    use crate::store::MemoryStore;
    use crate::sync::SyncConfig;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use jobmail_types::{JobCategory, Message, Sender, SyncPhase};
    use tokio_test::assert_ok;

    /// Fixed inbox that never changes
    struct StaticSource {
        identity: String,
        messages: Vec<Message>,
    }

    #[async_trait]
    impl MailSource for StaticSource {
        fn identity(&self) -> &str {
            &self.identity
        }

        async fn list_recent(
            &self,
            _since: Option<DateTime<Utc>>,
            _max_results: u32,
        ) -> Result<Vec<Message>, SourceError> {
            Ok(self.messages.clone())
        }

        async fn get_message(&self, id: &str) -> Result<Message, SourceError> {
            self.messages
                .iter()
                .find(|m| m.id == id)
                .cloned()
                .ok_or_else(|| SourceError::NotFound(id.to_string()))
        }

        async fn get_checkpoint(&self) -> Result<String, SourceError> {
            Ok("1".to_string())
        }

        async fn sync_since(&self, _token: &str) -> Result<MailDelta, SourceError> {
            Ok(MailDelta {
                next_token: "1".to_string(),
                ..Default::default()
            })
        }

        async fn mark_read(&self, _id: &str) -> Result<(), SourceError> {
            Ok(())
        }
    }

    fn message(id: &str, thread: &str, subject: &str, hours_ago: i64) -> Message {
        Message {
            id: id.to_string(),
            thread_id: thread.to_string(),
            subject: subject.to_string(),
            sender: Sender::new(None, "jobs@acme.com"),
            recipient: "me@example.com".to_string(),
            received_at: Utc::now() - Duration::hours(hours_ago),
            body_text: subject.to_string(),
            snippet: String::new(),
            is_unread: true,
            labels: vec!["INBOX".to_string()],
        }
    }

    fn service(store: &Arc<MemoryStore>, identities: &[&str]) -> JobMailService {
        let mut service = JobMailService::new(store.clone(), DashboardConfig::default());
        for identity in identities {
            let source = StaticSource {
                identity: identity.to_string(),
                messages: vec![message(
                    &format!("{}-1", identity),
                    "t1",
                    "Unfortunately we will not be moving forward",
                    1,
                )],
            };
            service.add_mailbox(SyncOrchestrator::new(
                Arc::new(source),
                ExtractionEngine::rules_only(ExtractionConfig::default()),
                store.clone(),
                SyncConfig::default(),
            ));
        }
        service
    }

    #[tokio::test]
    async fn test_unknown_mailbox_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store, &["a@example.com"]);

        let err = service.sync("b@example.com", false).await.unwrap_err();
        assert!(matches!(err, ServiceError::UnknownMailbox(_)));
        assert!(service.status("b@example.com").await.is_err());
    }

    #[tokio::test]
    async fn test_sync_all_covers_every_mailbox() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store, &["a@example.com", "b@example.com"]);

        let reports = service.sync_all(false).await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.success));
        assert_eq!(store.len().await, 2);

        let statuses = service.status_all().await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.phase == SyncPhase::Idle));
        assert_eq!(statuses[0].mailbox, "a@example.com");
    }

    #[tokio::test]
    async fn test_dashboard_and_thread_read_the_store() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store, &[]);

        let first = message("m1", "t1", "Thank you for applying to Acme", 5);
        let reply = message("m2", "t1", "Interview invitation from Acme", 2);
        let old = message("m3", "t2", "Unfortunately we went with others", 24 * 40);
        for m in [&first, &reply, &old] {
            assert_ok!(
                store
                    .upsert("me@example.com", m, &extract_with_rules(m))
                    .await
            );
        }

        let thread = service.thread("t1").await.unwrap();
        let ids: Vec<&str> = thread.iter().map(|r| r.message.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);

        let dashboard = service.dashboard(None, None).await.unwrap();
        // The 40 day old record is outside the default window
        assert_eq!(dashboard.summary_stats.total, 2);
        assert_eq!(dashboard.activities[0].message.id, "m2");
        assert_eq!(
            dashboard.summary_stats.by_category.get(&JobCategory::Interview),
            Some(&1)
        );

        let wide = service.dashboard(Some(60), Some(10)).await.unwrap();
        assert_eq!(wide.summary_stats.total, 3);
    }
}
