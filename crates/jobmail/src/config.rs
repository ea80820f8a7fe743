//! Process configuration, read from the environment (and `.env` via dotenvy).
//!
//! Each component owns its own config struct with a `Default` and a
//! `from_env` constructor; `AppConfig` gathers them for the binary.

use anyhow::{Context, Result};
use std::env;
use std::fmt::Display;
use std::str::FromStr;

use crate::dashboard::DashboardConfig;
use crate::extraction::ExtractionConfig;
use crate::llm::LlmConfig;
use crate::poller::PollerConfig;
use crate::sync::SyncConfig;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    /// Connect over rustls (hosted Postgres); disable for a local socket/dev database
    pub tls: bool,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            tls: env_parse("DATABASE_TLS", true),
        })
    }
}

/// OAuth client used for every Gmail account
#[derive(Debug, Clone)]
pub struct GoogleCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// A mailbox to sync: its identity and the refresh token granted for it
#[derive(Clone)]
pub struct GmailAccount {
    pub identity: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for GmailAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmailAccount")
            .field("identity", &self.identity)
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub credentials: Option<GoogleCredentials>,
    pub accounts: Vec<GmailAccount>,
}

impl GmailConfig {
    pub fn from_env() -> Result<Self> {
        let accounts = env::var("GMAIL_ACCOUNTS")
            .map(|raw| parse_accounts(&raw))
            .unwrap_or_else(|_| Ok(Vec::new()))?;

        let credentials = if accounts.is_empty() {
            None
        } else {
            Some(GoogleCredentials {
                client_id: env::var("GOOGLE_CLIENT_ID")
                    .context("GOOGLE_CLIENT_ID must be set when GMAIL_ACCOUNTS is set")?,
                client_secret: env::var("GOOGLE_CLIENT_SECRET")
                    .context("GOOGLE_CLIENT_SECRET must be set when GMAIL_ACCOUNTS is set")?,
            })
        };

        Ok(Self {
            credentials,
            accounts,
        })
    }
}

/// Parse `identity=refresh_token` pairs separated by commas
fn parse_accounts(raw: &str) -> Result<Vec<GmailAccount>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (identity, token) = entry
                .split_once('=')
                .with_context(|| format!("GMAIL_ACCOUNTS entry '{}' must be identity=refresh_token", mask(entry)))?;
            let identity = identity.trim();
            let token = token.trim();
            if identity.is_empty() || token.is_empty() {
                anyhow::bail!("GMAIL_ACCOUNTS entry for '{}' is incomplete", identity);
            }
            Ok(GmailAccount {
                identity: identity.to_string(),
                refresh_token: token.to_string(),
            })
        })
        .collect()
}

fn mask(entry: &str) -> String {
    entry.chars().take(6).chain("…".chars()).collect()
}

/// Everything the binary needs
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub gmail: GmailConfig,
    pub llm: Option<LlmConfig>,
    pub extraction: ExtractionConfig,
    pub sync: SyncConfig,
    pub poller: PollerConfig,
    pub dashboard: DashboardConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            gmail: GmailConfig::from_env()?,
            llm: LlmConfig::from_env()?,
            extraction: ExtractionConfig::from_env(),
            sync: SyncConfig::from_env(),
            poller: PollerConfig::from_env(),
            dashboard: DashboardConfig::from_env(),
        })
    }
}

/// Read and parse an optional variable, falling back to `default` when it is
/// missing or malformed.
pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Ignoring invalid {}={:?}: {}", key, raw, e);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accounts() {
        let accounts = parse_accounts("me@gmail.com=1//abc, work@example.com = 1//def ,").unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].identity, "me@gmail.com");
        assert_eq!(accounts[1].refresh_token, "1//def");
    }

    #[test]
    fn test_parse_accounts_rejects_missing_token() {
        assert!(parse_accounts("me@gmail.com").is_err());
        assert!(parse_accounts("me@gmail.com=").is_err());
    }

    #[test]
    fn test_account_debug_hides_token() {
        let account = GmailAccount {
            identity: "me@gmail.com".to_string(),
            refresh_token: "secret-token".to_string(),
        };
        let printed = format!("{:?}", account);
        assert!(printed.contains("me@gmail.com"));
        assert!(!printed.contains("secret-token"));
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("JOBMAIL_TEST_ENV_PARSE", "not-a-number");
        assert_eq!(env_parse("JOBMAIL_TEST_ENV_PARSE", 7u32), 7);
        std::env::set_var("JOBMAIL_TEST_ENV_PARSE", " 12 ");
        assert_eq!(env_parse("JOBMAIL_TEST_ENV_PARSE", 7u32), 12);
        std::env::remove_var("JOBMAIL_TEST_ENV_PARSE");
        assert_eq!(env_parse("JOBMAIL_TEST_ENV_PARSE", 7u32), 7);
    }
}
