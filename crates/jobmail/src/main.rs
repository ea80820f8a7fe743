use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use jobmail::config::AppConfig;
use jobmail::extraction::ExtractionEngine;
use jobmail::mail::GmailSource;
use jobmail::store::PgEmailStore;
use jobmail::sync::SyncOrchestrator;
use jobmail::{db, llm, poller, JobMailService};
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jobmail")]
#[command(about = "Track a job search from your inbox")]
#[command(
    long_about = "Syncs configured Gmail accounts, extracts job-search facts from each \
    message, and reports a dashboard of what needs attention.\n\n\
    Configuration is read from the environment and from a .env file. All \
    output is JSON on stdout; logs go to stderr (RUST_LOG controls the level)."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync one mailbox, or every configured mailbox
    Sync {
        /// Mailbox identity as listed in GMAIL_ACCOUNTS
        #[arg(short, long, value_name = "EMAIL")]
        mailbox: Option<String>,

        /// Ignore the stored checkpoint and re-read the full window
        #[arg(long)]
        full: bool,
    },

    /// Keep syncing every mailbox on an interval until interrupted
    Poll,

    /// Aggregate stored records into attention items, upcoming interviews
    /// and quick updates
    Dashboard {
        /// Only consider mail received in the last N days
        #[arg(long, value_name = "DAYS")]
        days_back: Option<u32>,

        /// Max records to read
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show every stored record of a conversation, oldest first
    Thread {
        #[arg(value_name = "THREAD_ID")]
        thread_id: String,
    },

    /// Show checkpoint and phase per mailbox
    Status {
        #[arg(short, long, value_name = "EMAIL")]
        mailbox: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let service = Arc::new(build_service(&config).await?);

    match cli.command {
        Commands::Sync { mailbox, full } => {
            let reports = match mailbox {
                Some(mailbox) => vec![service.sync(&mailbox, full).await?],
                None => service.sync_all(full).await,
            };
            print_json(&reports)?;

            let failed = reports.iter().filter(|r| !r.success).count();
            if failed > 0 {
                bail!("{} of {} syncs failed", failed, reports.len());
            }
        }
        Commands::Poll => {
            tokio::select! {
                _ = poller::run(service.clone(), config.poller.clone()) => {}
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for ctrl-c")?;
                    tracing::info!("Shutting down poller");
                }
            }
        }
        Commands::Dashboard { days_back, limit } => {
            print_json(&service.dashboard(days_back, limit).await?)?;
        }
        Commands::Thread { thread_id } => {
            print_json(&service.thread(&thread_id).await?)?;
        }
        Commands::Status { mailbox } => match mailbox {
            Some(mailbox) => print_json(&service.status(&mailbox).await?)?,
            None => print_json(&service.status_all().await?)?,
        },
    }

    Ok(())
}

async fn build_service(config: &AppConfig) -> anyhow::Result<JobMailService> {
    let pool = db::establish_connection_pool(&config.database)
        .context("Failed to create database pool")?;
    let store = Arc::new(PgEmailStore::new(pool));

    let backend = match &config.llm {
        Some(llm_config) => Some(llm::build_backend(llm_config)?),
        None => {
            tracing::info!("No LLM configured, extracting with rules only");
            None
        }
    };
    let engine = ExtractionEngine::new(backend, config.extraction.clone());

    let mut service = JobMailService::new(store.clone(), config.dashboard.clone());
    if let Some(credentials) = &config.gmail.credentials {
        for account in &config.gmail.accounts {
            let source = GmailSource::connect(credentials, account, config.sync.source_timeout)
                .await
                .with_context(|| format!("Failed to connect Gmail account {}", account.identity))?;
            service.add_mailbox(SyncOrchestrator::new(
                Arc::new(source),
                engine.clone(),
                store.clone(),
                config.sync.clone(),
            ));
        }
    }

    if service.mailboxes().next().is_none() {
        tracing::warn!("No mailboxes configured; set GMAIL_ACCOUNTS to sync mail");
    }
    Ok(service)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}
