//! Sync orchestration.
//!
//! One `SyncOrchestrator` per mailbox. A run decides between a full window
//! fetch and an incremental diff against the stored checkpoint, pushes every
//! message through extraction into the store, and only then advances the
//! checkpoint. A run that fails part way leaves the previous token in place,
//! so the next run re-reads the same changes and converges.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use jobmail_types::{
    Message, SyncCheckpoint, SyncMethod, SyncPhase, SyncReport, SyncStatus, SyncStatusResponse,
    TokenUsage,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

use crate::config::env_parse;
use crate::error::{SourceError, StoreError, SyncError};
use crate::extraction::{Extraction, ExtractionEngine};
use crate::mail::MailSource;
use crate::store::{EmailStore, UpsertOutcome};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Below this many stored records a full sync is run even with a checkpoint
    pub min_baseline_records: i64,
    pub full_sync_days_back: u32,
    pub full_sync_max_results: u32,
    /// Extra attempts for a retryable source failure
    pub source_retries: u32,
    /// Limit on single-request source calls. Batch calls (`list_recent`,
    /// `sync_since`) are bounded per request inside the adapter instead.
    pub source_timeout: Duration,
    pub retry_base_delay: Duration,
    pub extraction_concurrency: usize,
    /// Clear the unread flag on job-related messages after storing them
    pub mark_as_read: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_baseline_records: 5,
            full_sync_days_back: 30,
            full_sync_max_results: 100,
            source_retries: 3,
            source_timeout: Duration::from_secs(30),
            retry_base_delay: Duration::from_millis(500),
            extraction_concurrency: 4,
            mark_as_read: false,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_baseline_records: env_parse(
                "SYNC_MIN_BASELINE_RECORDS",
                defaults.min_baseline_records,
            ),
            full_sync_days_back: env_parse("SYNC_FULL_DAYS_BACK", defaults.full_sync_days_back),
            full_sync_max_results: env_parse(
                "SYNC_FULL_MAX_RESULTS",
                defaults.full_sync_max_results,
            ),
            source_retries: env_parse("SYNC_SOURCE_RETRIES", defaults.source_retries),
            source_timeout: Duration::from_secs(env_parse(
                "SYNC_SOURCE_TIMEOUT_SECS",
                defaults.source_timeout.as_secs(),
            )),
            retry_base_delay: Duration::from_millis(env_parse(
                "SYNC_RETRY_BASE_MS",
                defaults.retry_base_delay.as_millis() as u64,
            )),
            extraction_concurrency: env_parse(
                "SYNC_EXTRACTION_CONCURRENCY",
                defaults.extraction_concurrency,
            )
            .max(1),
            mark_as_read: env_parse("SYNC_MARK_AS_READ", defaults.mark_as_read),
        }
    }
}

/// How a run will proceed, decided from the stored checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
enum Plan {
    Full,
    Incremental(String),
}

fn plan(
    force_full: bool,
    checkpoint: &SyncCheckpoint,
    stored_records: i64,
    min_baseline: i64,
) -> Plan {
    match &checkpoint.token {
        Some(token) if !force_full && stored_records >= min_baseline => {
            Plan::Incremental(token.clone())
        }
        _ => Plan::Full,
    }
}

/// Counters accumulated while a run progresses
#[derive(Debug, Default)]
struct RunStats {
    method: Option<SyncMethod>,
    processed: i64,
    new_items: i64,
    updated: i64,
    deleted: i64,
    llm_calls: u64,
    fallback_extractions: u64,
    tokens: TokenUsage,
}

impl RunStats {
    fn record_extraction(&mut self, extraction: &Extraction) {
        if extraction.llm_called {
            self.llm_calls += 1;
            if extraction.result.source == jobmail_types::ExtractionSource::Rules {
                self.fallback_extractions += 1;
            }
        }
        self.tokens += extraction.usage;
    }
}

pub struct SyncOrchestrator {
    source: Arc<dyn MailSource>,
    engine: ExtractionEngine,
    store: Arc<dyn EmailStore>,
    config: SyncConfig,
    run_lock: Mutex<()>,
    phase: RwLock<SyncPhase>,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn MailSource>,
        engine: ExtractionEngine,
        store: Arc<dyn EmailStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            engine,
            store,
            config,
            run_lock: Mutex::new(()),
            phase: RwLock::new(SyncPhase::Idle),
        }
    }

    pub fn mailbox(&self) -> &str {
        self.source.identity()
    }

    pub async fn phase(&self) -> SyncPhase {
        *self.phase.read().await
    }

    pub async fn status(&self) -> Result<SyncStatusResponse, StoreError> {
        let mailbox = self.mailbox();
        Ok(SyncStatusResponse {
            mailbox: mailbox.to_string(),
            phase: self.phase().await,
            checkpoint: self.store.get_checkpoint(mailbox).await?,
            stored_records: self.store.count_records(mailbox).await?,
        })
    }

    /// Run one sync. Concurrent calls for the same mailbox queue up behind
    /// each other. Failures are reported in the returned `SyncReport`.
    pub async fn run(&self, force_full: bool) -> SyncReport {
        let _guard = self.run_lock.lock().await;
        let started = Instant::now();
        let mailbox = self.mailbox().to_string();
        let mut stats = RunStats::default();

        let outcome = self.run_locked(&mailbox, force_full, &mut stats).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (success, message, error_kind) = match outcome {
            Ok(()) => {
                let message = format!(
                    "{} sync: {} processed, {} new, {} updated, {} deleted",
                    stats.method.map(|m| m.as_str()).unwrap_or("unknown"),
                    stats.processed,
                    stats.new_items,
                    stats.updated,
                    stats.deleted
                );
                tracing::info!("{}: {} in {}ms", mailbox, message, duration_ms);
                (true, message, None)
            }
            Err(e) => {
                self.enter(&mailbox, SyncPhase::Failed).await;
                tracing::error!("{}: sync failed: {}", mailbox, e);
                (false, e.to_string(), Some(e.kind()))
            }
        };
        self.enter(&mailbox, SyncPhase::Idle).await;

        SyncReport {
            mailbox,
            success,
            message,
            sync_method: stats.method,
            processed: stats.processed,
            new_items: stats.new_items,
            updated: stats.updated,
            deleted: stats.deleted,
            llm_calls: stats.llm_calls,
            fallback_extractions: stats.fallback_extractions,
            tokens: stats.tokens,
            duration_ms,
            error_kind,
        }
    }

    async fn run_locked(
        &self,
        mailbox: &str,
        force_full: bool,
        stats: &mut RunStats,
    ) -> Result<(), SyncError> {
        self.enter(mailbox, SyncPhase::Deciding).await;

        let previous = self
            .store
            .get_checkpoint(mailbox)
            .await?
            .unwrap_or_else(|| SyncCheckpoint::new(mailbox));

        let mut running = previous.clone();
        running.status = SyncStatus::Running;
        running.last_error = None;
        self.store.set_checkpoint(&running).await?;

        match self.sync_body(mailbox, force_full, &previous, stats).await {
            Ok(token) => {
                self.enter(mailbox, SyncPhase::RecordingCheckpoint).await;
                let completed = SyncCheckpoint {
                    mailbox: mailbox.to_string(),
                    token: Some(token),
                    last_sync_at: Some(Utc::now()),
                    status: SyncStatus::Completed,
                    processed: stats.processed,
                    new_items: stats.new_items,
                    updated: stats.updated,
                    deleted: stats.deleted,
                    last_error: None,
                };
                self.store.set_checkpoint(&completed).await?;
                Ok(())
            }
            Err(e) => {
                let failed = SyncCheckpoint {
                    status: SyncStatus::Failed,
                    last_error: Some(e.to_string()),
                    ..previous
                };
                if let Err(store_err) = self.store.set_checkpoint(&failed).await {
                    tracing::warn!("{}: could not record failed run: {}", mailbox, store_err);
                }
                Err(e)
            }
        }
    }

    /// Fetch and store, returning the token to advance to
    async fn sync_body(
        &self,
        mailbox: &str,
        force_full: bool,
        checkpoint: &SyncCheckpoint,
        stats: &mut RunStats,
    ) -> Result<String, SyncError> {
        let stored = self.store.count_records(mailbox).await?;

        match plan(force_full, checkpoint, stored, self.config.min_baseline_records) {
            Plan::Full => {
                stats.method = Some(SyncMethod::Full);
                self.full_sync(mailbox, stats).await
            }
            Plan::Incremental(token) => {
                stats.method = Some(SyncMethod::Incremental);
                match self.incremental_sync(mailbox, &token, stats).await {
                    Err(SyncError::CheckpointStale(stale)) => {
                        tracing::warn!(
                            "{}: checkpoint {} expired, falling back to full sync",
                            mailbox,
                            stale
                        );
                        *stats = RunStats {
                            method: Some(SyncMethod::FullAfterStaleCheckpoint),
                            ..Default::default()
                        };
                        self.full_sync(mailbox, stats).await
                    }
                    other => other,
                }
            }
        }
    }

    async fn full_sync(&self, mailbox: &str, stats: &mut RunStats) -> Result<String, SyncError> {
        self.enter(mailbox, SyncPhase::FullSync).await;

        let source = &*self.source;
        let since = Utc::now() - chrono::Duration::days(i64::from(self.config.full_sync_days_back));
        let max_results = self.config.full_sync_max_results;

        let messages = self
            .call_source("list_recent", None, move || {
                source.list_recent(Some(since), max_results)
            })
            .await?;
        // Taken right after the fetch: anything arriving later shows up in
        // the next incremental run instead of being lost
        let token = self
            .call_source("get_checkpoint", Some(self.config.source_timeout), move || {
                source.get_checkpoint()
            })
            .await?;

        tracing::info!("{}: full sync fetched {} messages", mailbox, messages.len());
        self.ingest(mailbox, &messages, stats).await?;
        Ok(token)
    }

    async fn incremental_sync(
        &self,
        mailbox: &str,
        token: &str,
        stats: &mut RunStats,
    ) -> Result<String, SyncError> {
        self.enter(mailbox, SyncPhase::IncrementalSync).await;

        let source = &*self.source;
        let delta = self
            .call_source("sync_since", None, move || source.sync_since(token))
            .await?;

        tracing::debug!(
            "{}: delta since {}: {} added, {} updated, {} deleted",
            mailbox,
            token,
            delta.added.len(),
            delta.updated.len(),
            delta.deleted.len()
        );

        self.ingest(mailbox, &delta.added, stats).await?;

        for change in &delta.updated {
            if self
                .store
                .mark_read_state(&change.id, change.is_unread)
                .await?
            {
                stats.updated += 1;
            }
        }

        for id in &delta.deleted {
            if self.store.delete(id).await? {
                stats.deleted += 1;
            } else {
                tracing::debug!("{}: delete of unknown message {} ignored", mailbox, id);
            }
        }

        Ok(delta.next_token)
    }

    /// Extract with bounded concurrency, then upsert in fetch order
    async fn ingest(
        &self,
        mailbox: &str,
        messages: &[Message],
        stats: &mut RunStats,
    ) -> Result<(), SyncError> {
        let engine = &self.engine;
        let extractions: Vec<Extraction> = stream::iter(messages)
            .map(|message| engine.extract(message))
            .buffered(self.config.extraction_concurrency.max(1))
            .collect()
            .await;

        for (message, extraction) in messages.iter().zip(extractions) {
            stats.record_extraction(&extraction);

            let upserted = self
                .store
                .upsert(mailbox, message, &extraction.result)
                .await?;
            match upserted.outcome {
                UpsertOutcome::Inserted => stats.new_items += 1,
                UpsertOutcome::Updated => stats.updated += 1,
                UpsertOutcome::Unchanged => {}
            }
            stats.processed += 1;

            tracing::debug!(
                "{}: {} -> {} ({:?})",
                mailbox,
                message.id,
                extraction.result.category,
                upserted.outcome
            );

            if self.config.mark_as_read && extraction.result.is_job_related && message.is_unread {
                self.mark_read(mailbox, message).await;
            }
        }
        Ok(())
    }

    /// Best effort: a failure is logged and the run carries on
    async fn mark_read(&self, mailbox: &str, message: &Message) {
        let source = &*self.source;
        let id = message.id.as_str();
        let limit = Some(self.config.source_timeout);
        match self.call_source("mark_read", limit, move || source.mark_read(id)).await {
            Ok(()) => {
                if let Err(e) = self.store.mark_read_state(id, false).await {
                    tracing::warn!("{}: could not record read state of {}: {}", mailbox, id, e);
                }
            }
            Err(e) => tracing::warn!("{}: could not mark {} as read: {}", mailbox, id, e),
        }
    }

    /// Source call retried with exponential backoff while the failure is
    /// retryable. `limit` bounds one attempt; pass `None` for batch calls,
    /// whose duration grows with the mailbox.
    async fn call_source<T, F, Fut>(
        &self,
        operation: &str,
        limit: Option<Duration>,
        call: F,
    ) -> Result<T, SourceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = match limit {
                Some(limit) => match tokio::time::timeout(limit, call()).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::unavailable(format!(
                        "{} timed out after {:?}",
                        operation, limit
                    ))),
                },
                None => call().await,
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.config.source_retries => {
                    let delay = self
                        .config
                        .retry_base_delay
                        .saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    tracing::warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation,
                        attempt,
                        self.config.source_retries + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn enter(&self, mailbox: &str, next: SyncPhase) {
        let mut phase = self.phase.write().await;
        tracing::debug!("{}: {} -> {}", mailbox, phase.as_str(), next.as_str());
        *phase = next;
    }
}
