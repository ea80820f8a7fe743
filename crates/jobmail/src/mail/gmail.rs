//! Gmail API mail source.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use google_gmail1::api::{Message as GmailMessage, MessagePart, ModifyMessageRequest};
use google_gmail1::hyper_rustls::HttpsConnector;
use google_gmail1::Gmail;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use jobmail_types::{Message, Sender};
use std::time::Duration;

use super::text::render_body;
use super::{within, Change, ChangeLog, MailDelta, MailSource};
use crate::config::{GmailAccount, GoogleCredentials};
use crate::error::SourceError;

const UNREAD: &str = "UNREAD";
const INBOX: &str = "INBOX";
const PAGE_SIZE: u32 = 500;

/// Mail source backed by one Gmail account
pub struct GmailSource {
    hub: Gmail<HttpsConnector<HttpConnector>>,
    identity: String,
    /// Limit on each API request; batch calls make many of these
    request_timeout: Duration,
}

impl GmailSource {
    /// Build a client that refreshes its access token from the account's
    /// stored refresh token
    pub async fn connect(
        credentials: &GoogleCredentials,
        account: &GmailAccount,
        request_timeout: Duration,
    ) -> Result<Self> {
        // yup_oauth2 re-exported by google_gmail1 to avoid a version mismatch
        let secret = google_gmail1::yup_oauth2::authorized_user::AuthorizedUserSecret {
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            refresh_token: account.refresh_token.clone(),
            key_type: "authorized_user".to_string(),
        };

        let auth = google_gmail1::yup_oauth2::AuthorizedUserAuthenticator::builder(secret)
            .build()
            .await
            .context("Failed to build authenticator from refresh token")?;

        let connector = google_gmail1::hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .context("Failed to load native TLS roots")?
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(connector);
        let hub = Gmail::new(client, auth);

        Ok(Self {
            hub,
            identity: account.identity.clone(),
            request_timeout,
        })
    }

    async fn list_ids(
        &self,
        since: Option<DateTime<Utc>>,
        max_results: u32,
    ) -> Result<Vec<String>, SourceError> {
        let query = since.map(|since| format!("after:{}", since.timestamp()));
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        while (ids.len() as u32) < max_results {
            let remaining = max_results - ids.len() as u32;
            let mut call = self
                .hub
                .users()
                .messages_list("me")
                .add_label_ids(INBOX)
                .max_results(remaining.min(PAGE_SIZE));
            if let Some(query) = &query {
                call = call.q(query);
            }
            if let Some(token) = &page_token {
                call = call.page_token(token);
            }

            let (_, response) = within(self.request_timeout, "list messages", call.doit())
                .await?
                .map_err(|e| classify_error("list messages", e))?;

            ids.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id),
            );

            match response.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        ids.truncate(max_results as usize);
        Ok(ids)
    }

    async fn collect_history(&self, token: &str) -> Result<(ChangeLog, Option<String>), SourceError> {
        let start: u64 = token.parse().map_err(|_| SourceError::CheckpointStale {
            token: token.to_string(),
        })?;

        let mut log = ChangeLog::new();
        let mut next_token = None;
        let mut page_token: Option<String> = None;

        loop {
            let mut call = self
                .hub
                .users()
                .history_list("me")
                .start_history_id(start)
                .label_id(INBOX)
                .add_history_types("messageAdded")
                .add_history_types("messageDeleted")
                .add_history_types("labelAdded")
                .add_history_types("labelRemoved")
                .max_results(PAGE_SIZE);
            if let Some(page) = &page_token {
                call = call.page_token(page);
            }

            let (_, response) = within(self.request_timeout, "list history", call.doit())
                .await?
                .map_err(|e| {
                    if http_status(&e) == Some(404) {
                        SourceError::CheckpointStale {
                            token: token.to_string(),
                        }
                    } else {
                        classify_error("list history", e)
                    }
                })?;

            for record in response.history.unwrap_or_default() {
                for added in record.messages_added.unwrap_or_default() {
                    if let Some(id) = added.message.and_then(|m| m.id) {
                        log.push(Change::Added(id));
                    }
                }
                for deleted in record.messages_deleted.unwrap_or_default() {
                    if let Some(id) = deleted.message.and_then(|m| m.id) {
                        log.push(Change::Deleted(id));
                    }
                }
                for labeled in record.labels_added.unwrap_or_default() {
                    if touches_unread(labeled.label_ids.as_deref()) {
                        if let Some(id) = labeled.message.and_then(|m| m.id) {
                            log.push(Change::ReadState { id, is_unread: true });
                        }
                    }
                }
                for unlabeled in record.labels_removed.unwrap_or_default() {
                    if touches_unread(unlabeled.label_ids.as_deref()) {
                        if let Some(id) = unlabeled.message.and_then(|m| m.id) {
                            log.push(Change::ReadState { id, is_unread: false });
                        }
                    }
                }
            }

            if let Some(history_id) = response.history_id {
                next_token = Some(history_id.to_string());
            }

            match response.next_page_token {
                Some(page) if !page.is_empty() => page_token = Some(page),
                _ => break,
            }
        }

        Ok((log, next_token))
    }
}

#[async_trait]
impl MailSource for GmailSource {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn list_recent(
        &self,
        since: Option<DateTime<Utc>>,
        max_results: u32,
    ) -> Result<Vec<Message>, SourceError> {
        let ids = self.list_ids(since, max_results).await?;
        let mut messages = Vec::with_capacity(ids.len());

        for id in ids {
            match self.get_message(&id).await {
                Ok(message) => messages.push(message),
                Err(SourceError::NotFound(_)) => {
                    tracing::debug!("Message {} vanished between list and fetch", id);
                }
                Err(e) => return Err(e),
            }
        }

        messages.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(messages)
    }

    async fn get_message(&self, id: &str) -> Result<Message, SourceError> {
        let request = self.hub.users().messages_get("me", id).format("full").doit();
        let (_, message) = within(self.request_timeout, "get message", request)
            .await?
            .map_err(|e| {
                if http_status(&e) == Some(404) {
                    SourceError::NotFound(id.to_string())
                } else {
                    classify_error("get message", e)
                }
            })?;

        Ok(parse_message(message))
    }

    async fn get_checkpoint(&self) -> Result<String, SourceError> {
        let request = self.hub.users().get_profile("me").doit();
        let (_, profile) = within(self.request_timeout, "get profile", request)
            .await?
            .map_err(|e| classify_error("get profile", e))?;

        profile
            .history_id
            .map(|id| id.to_string())
            .ok_or_else(|| SourceError::unavailable("No history id in profile"))
    }

    async fn sync_since(&self, token: &str) -> Result<MailDelta, SourceError> {
        let (log, next_token) = self.collect_history(token).await?;
        let next_token = match next_token {
            Some(next) => next,
            None => self.get_checkpoint().await?,
        };

        let (added_ids, updated, mut deleted) = log.finish();
        let mut added = Vec::with_capacity(added_ids.len());
        for id in added_ids {
            match self.get_message(&id).await {
                Ok(message) => added.push(message),
                // Added and removed again inside the window without a delete record
                Err(SourceError::NotFound(id)) => {
                    tracing::debug!("Added message {} is gone; treating as deleted", id);
                    deleted.push(id);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(MailDelta {
            added,
            updated,
            deleted,
            next_token,
        })
    }

    async fn mark_read(&self, id: &str) -> Result<(), SourceError> {
        let request = ModifyMessageRequest {
            remove_label_ids: Some(vec![UNREAD.to_string()]),
            add_label_ids: None,
        };

        let call = self.hub.users().messages_modify(request, "me", id).doit();
        within(self.request_timeout, "mark read", call)
            .await?
            .map_err(|e| classify_error("mark read", e))?;

        tracing::debug!("Marked message {} read", id);
        Ok(())
    }
}

fn touches_unread(labels: Option<&[String]>) -> bool {
    labels.is_some_and(|labels| labels.iter().any(|l| l == UNREAD))
}

/// HTTP status of a failed API call, when the provider returned one
fn http_status(err: &google_gmail1::Error) -> Option<u16> {
    match err {
        google_gmail1::Error::BadRequest(value) => value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|c| c.as_u64())
            .and_then(|c| u16::try_from(c).ok()),
        google_gmail1::Error::Failure(response) => Some(response.status().as_u16()),
        _ => None,
    }
}

fn classify_error(action: &str, err: google_gmail1::Error) -> SourceError {
    match http_status(&err) {
        Some(status) => SourceError::unavailable(format!("Failed to {} (HTTP {}): {}", action, status, err)),
        None => SourceError::unavailable(format!("Failed to {}: {}", action, err)),
    }
}

fn parse_message(message: GmailMessage) -> Message {
    let id = message.id.clone().unwrap_or_default();
    let thread_id = message.thread_id.clone().unwrap_or_default();
    let snippet = message.snippet.clone().unwrap_or_default();
    let labels = message.label_ids.clone().unwrap_or_default();

    let mut subject = String::new();
    let mut from = String::new();
    let mut to = String::new();
    let mut date_header = None;

    if let Some(headers) = message.payload.as_ref().and_then(|p| p.headers.as_ref()) {
        for header in headers {
            let value = header.value.clone().unwrap_or_default();
            match header.name.as_deref().map(str::to_ascii_lowercase).as_deref() {
                Some("subject") => subject = value,
                Some("from") => from = value,
                Some("to") => to = value,
                Some("date") => date_header = parse_date(&value),
                _ => {}
            }
        }
    }

    let received_at = message
        .internal_date
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .or(date_header)
        .unwrap_or_else(Utc::now);

    let (text_plain, text_html) = extract_bodies(&message);
    let body_text = render_body(text_plain.as_deref(), text_html.as_deref());

    let recipient = to
        .split(',')
        .map(str::trim)
        .find(|addr| !addr.is_empty())
        .map(|addr| parse_sender(addr).address)
        .unwrap_or_default();

    Message {
        id,
        thread_id,
        subject,
        sender: parse_sender(&from),
        recipient,
        received_at,
        body_text,
        snippet,
        is_unread: labels.iter().any(|l| l == UNREAD),
        labels,
    }
}

fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(date_str.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a header like `"John Doe" <john@example.com>`
pub(crate) fn parse_sender(from: &str) -> Sender {
    let from = from.trim();

    if let (Some(start), Some(end)) = (from.rfind('<'), from.rfind('>')) {
        if start < end {
            let address = from[start + 1..end].trim().to_string();
            let name = from[..start].trim().trim_matches('"').trim();
            return Sender {
                name: (!name.is_empty()).then(|| name.to_string()),
                address,
            };
        }
    }

    Sender {
        name: None,
        address: from.to_string(),
    }
}

fn extract_bodies(message: &GmailMessage) -> (Option<String>, Option<String>) {
    let payload = match message.payload.as_ref() {
        Some(p) => p,
        None => return (None, None),
    };

    let mut text_body = None;
    let mut html_body = None;

    if let Some(decoded) = part_text(payload) {
        match payload.mime_type.as_deref() {
            Some("text/html") => html_body = Some(decoded),
            _ => text_body = Some(decoded),
        }
    }

    if let Some(parts) = &payload.parts {
        extract_bodies_from_parts(parts, &mut text_body, &mut html_body);
    }

    (text_body, html_body)
}

fn extract_bodies_from_parts(
    parts: &[MessagePart],
    text_body: &mut Option<String>,
    html_body: &mut Option<String>,
) {
    for part in parts {
        match part.mime_type.as_deref() {
            Some("text/plain") if text_body.is_none() => *text_body = part_text(part),
            Some("text/html") if html_body.is_none() => *html_body = part_text(part),
            Some(mime) if mime.starts_with("multipart/") => {
                if let Some(nested) = &part.parts {
                    extract_bodies_from_parts(nested, text_body, html_body);
                }
            }
            _ => {}
        }
    }
}

fn part_text(part: &MessagePart) -> Option<String> {
    let data = part.body.as_ref()?.data.as_ref()?;
    // Bodies are already base64-decoded by the client
    Some(String::from_utf8_lossy(data).into_owned())
}
