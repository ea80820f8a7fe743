//! Background sync loop.
//!
//! Runs every mailbox on a fixed interval, skipping any mailbox that was
//! synced more recently than the rate limit allows.

use jobmail_types::SyncReport;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::env_parse;
use crate::service::JobMailService;

/// `tokio::time::interval` rejects a zero period
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// How often to run a cycle (default: 5 minutes)
    pub poll_interval: Duration,
    /// Minimum seconds between syncs of one mailbox
    pub rate_limit_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            rate_limit_secs: 60,
        }
    }
}

impl PollerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: Duration::from_secs(env_parse(
                "POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            ))
            .max(MIN_POLL_INTERVAL),
            rate_limit_secs: env_parse("POLL_RATE_LIMIT_SECS", defaults.rate_limit_secs),
        }
    }
}

/// Tracks the last sync time for each mailbox
#[derive(Debug, Default)]
struct RateLimiter {
    last_poll: HashMap<String, Instant>,
}

impl RateLimiter {
    fn can_poll(&self, mailbox: &str, rate_limit_secs: u64) -> bool {
        match self.last_poll.get(mailbox) {
            Some(last) => last.elapsed().as_secs() >= rate_limit_secs,
            None => true,
        }
    }

    fn record_poll(&mut self, mailbox: &str) {
        self.last_poll.insert(mailbox.to_string(), Instant::now());
    }
}

/// Poll until the task is dropped
pub async fn run(service: Arc<JobMailService>, config: PollerConfig) {
    tracing::info!(
        "Starting sync poller (interval: {:?}, rate limit: {}s)",
        config.poll_interval,
        config.rate_limit_secs
    );

    let mut rate_limiter = RateLimiter::default();
    let mut interval = tokio::time::interval(config.poll_interval.max(MIN_POLL_INTERVAL));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        run_cycle(&service, &config, &mut rate_limiter).await;
    }
}

async fn run_cycle(
    service: &JobMailService,
    config: &PollerConfig,
    rate_limiter: &mut RateLimiter,
) -> Vec<SyncReport> {
    let mailboxes: Vec<String> = service.mailboxes().map(str::to_string).collect();
    if mailboxes.is_empty() {
        tracing::debug!("No mailboxes configured");
        return Vec::new();
    }

    let mut reports = Vec::new();
    for mailbox in mailboxes {
        if !rate_limiter.can_poll(&mailbox, config.rate_limit_secs) {
            tracing::debug!("Skipping {} (rate limited)", mailbox);
            continue;
        }

        match service.sync(&mailbox, false).await {
            Ok(report) => {
                if report.success {
                    if report.new_items > 0 || report.deleted > 0 {
                        tracing::info!(
                            "{}: {} new, {} updated, {} deleted",
                            mailbox,
                            report.new_items,
                            report.updated,
                            report.deleted
                        );
                    }
                } else {
                    tracing::error!("Failed to sync {}: {}", mailbox, report.message);
                }
                reports.push(report);
            }
            Err(e) => tracing::error!("Failed to sync {}: {}", mailbox, e),
        }

        rate_limiter.record_poll(&mailbox);
    }
    reports
}
