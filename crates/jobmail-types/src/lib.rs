use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;
use uuid::Uuid;

#[cfg(feature = "diesel")]
mod json_column;

#[cfg(feature = "diesel")]
pub use json_column::JsonText;

// ============================================================================
// Mail
// ============================================================================

/// Sender of a message, split from a `"Name" <address>` header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Sender {
    pub name: Option<String>,
    pub address: String,
}

impl Sender {
    pub fn new(name: Option<&str>, address: &str) -> Self {
        Self {
            name: name.map(str::to_string),
            address: address.to_string(),
        }
    }

    /// Lowercased domain part of the address, if it has one
    pub fn domain(&self) -> Option<String> {
        let (_, domain) = self.address.rsplit_once('@')?;
        let domain = domain.trim().trim_end_matches('>').to_lowercase();
        if domain.is_empty() {
            None
        } else {
            Some(domain)
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// A message as fetched from the mail source. Never mutated after fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub sender: Sender,
    pub recipient: String,
    pub received_at: DateTime<Utc>,
    pub body_text: String,
    pub snippet: String,
    pub is_unread: bool,
    pub labels: Vec<String>,
}

// ============================================================================
// Extraction
// ============================================================================

/// Job-search category of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCategory {
    Interview,
    Rejection,
    RecruiterOutreach,
    Offer,
    JobAlert,
    Other,
}

impl JobCategory {
    pub const ALL: [JobCategory; 6] = [
        JobCategory::Interview,
        JobCategory::Rejection,
        JobCategory::RecruiterOutreach,
        JobCategory::Offer,
        JobCategory::JobAlert,
        JobCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobCategory::Interview => "interview",
            JobCategory::Rejection => "rejection",
            JobCategory::RecruiterOutreach => "recruiter_outreach",
            JobCategory::Offer => "offer",
            JobCategory::JobAlert => "job_alert",
            JobCategory::Other => "other",
        }
    }

    /// Strict parse of a known spelling (case-insensitive, `-`/`_`/space interchangeable)
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();

        match normalized.as_str() {
            "interview" | "interview_invitation" => Some(JobCategory::Interview),
            "rejection" | "rejected" => Some(JobCategory::Rejection),
            "recruiter_outreach" | "recruiter" | "outreach" => Some(JobCategory::RecruiterOutreach),
            "offer" | "job_offer" => Some(JobCategory::Offer),
            "job_alert" | "alert" => Some(JobCategory::JobAlert),
            "other" => Some(JobCategory::Other),
            _ => None,
        }
    }

    /// Lenient parse: anything unrecognized becomes `Other`
    pub fn from_label(s: &str) -> Self {
        Self::from_str(s).unwrap_or(JobCategory::Other)
    }

    /// Categories that usually ask the candidate to do something
    pub fn needs_attention(&self) -> bool {
        matches!(self, JobCategory::Interview | JobCategory::Offer)
    }
}

impl std::fmt::Display for JobCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dates mentioned in a message, kept as the text the extractor found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KeyDates {
    pub interview_date: Option<String>,
    pub interview_time: Option<String>,
    pub deadline: Option<String>,
}

impl KeyDates {
    pub fn is_empty(&self) -> bool {
        self.interview_date.is_none() && self.interview_time.is_none() && self.deadline.is_none()
    }
}

/// Which stage produced an extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Model,
    Rules,
    Default,
}

impl ExtractionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionSource::Model => "model",
            ExtractionSource::Rules => "rules",
            ExtractionSource::Default => "default",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "model" => Some(ExtractionSource::Model),
            "rules" => Some(ExtractionSource::Rules),
            "default" => Some(ExtractionSource::Default),
            _ => None,
        }
    }
}

/// Structured job-search facts derived from exactly one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub is_job_related: bool,
    pub category: JobCategory,
    pub company: Option<String>,
    pub position: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub key_dates: KeyDates,
    pub action_required: Option<String>,
    pub confidence: f32,
    pub summary: String,
    pub source: ExtractionSource,
}

impl ExtractionResult {
    /// Minimal non-job result used when nothing better is available
    pub fn unclassified() -> Self {
        Self {
            is_job_related: false,
            category: JobCategory::Other,
            company: None,
            position: None,
            contact_name: None,
            contact_email: None,
            key_dates: KeyDates::default(),
            action_required: None,
            confidence: 0.0,
            summary: String::new(),
            source: ExtractionSource::Default,
        }
    }

    /// Enforce the result invariants: confidence in [0, 1], `Other` when unrelated,
    /// and blank strings collapsed to `None`.
    pub fn normalized(mut self) -> Self {
        self.confidence = if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence.clamp(0.0, 1.0)
        };
        if !self.is_job_related {
            self.category = JobCategory::Other;
        }
        self.company = non_blank(self.company);
        self.position = non_blank(self.position);
        self.contact_name = non_blank(self.contact_name);
        self.contact_email = non_blank(self.contact_email);
        self.action_required = non_blank(self.action_required);
        self.key_dates.interview_date = non_blank(self.key_dates.interview_date);
        self.key_dates.interview_time = non_blank(self.key_dates.interview_time);
        self.key_dates.deadline = non_blank(self.key_dates.deadline);
        self.summary = self.summary.trim().to_string();
        self
    }

    /// True when `action_required` names something still to do
    pub fn has_unresolved_action(&self) -> bool {
        match self.action_required.as_deref().map(str::trim) {
            None | Some("") => false,
            Some(action) => !matches!(
                action.to_lowercase().as_str(),
                "none" | "n/a" | "na" | "no" | "null" | "no action required" | "done"
            ),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null") && !v.eq_ignore_ascii_case("unknown"))
}

/// Token accounting reported by the language model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

// ============================================================================
// Storage
// ============================================================================

/// A message joined with its extraction, unique per message id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEmailRecord {
    pub id: Uuid,
    pub mailbox: String,
    pub message: Message,
    pub extraction: ExtractionResult,
    pub stored_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    NeverSynced,
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::NeverSynced => "never_synced",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "never_synced" => Some(SyncStatus::NeverSynced),
            "running" => Some(SyncStatus::Running),
            "completed" => Some(SyncStatus::Completed),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

/// Resume point and last-run bookkeeping for one mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub mailbox: String,
    pub token: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub processed: i64,
    pub new_items: i64,
    pub updated: i64,
    pub deleted: i64,
    pub last_error: Option<String>,
}

impl SyncCheckpoint {
    pub fn new(mailbox: impl Into<String>) -> Self {
        Self {
            mailbox: mailbox.into(),
            token: None,
            last_sync_at: None,
            status: SyncStatus::NeverSynced,
            processed: 0,
            new_items: 0,
            updated: 0,
            deleted: 0,
            last_error: None,
        }
    }
}

// ============================================================================
// Sync runs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMethod {
    Full,
    Incremental,
    FullAfterStaleCheckpoint,
}

impl SyncMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMethod::Full => "full",
            SyncMethod::Incremental => "incremental",
            SyncMethod::FullAfterStaleCheckpoint => "full_after_stale_checkpoint",
        }
    }
}

/// Phase of the sync state machine for one mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Deciding,
    FullSync,
    IncrementalSync,
    RecordingCheckpoint,
    Failed,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Deciding => "deciding",
            SyncPhase::FullSync => "full_sync",
            SyncPhase::IncrementalSync => "incremental_sync",
            SyncPhase::RecordingCheckpoint => "recording_checkpoint",
            SyncPhase::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    SourceUnavailable,
    CheckpointStale,
    StoreFailure,
}

/// Outcome of one sync run, always returned (never an `Err`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub mailbox: String,
    pub success: bool,
    pub message: String,
    pub sync_method: Option<SyncMethod>,
    pub processed: i64,
    pub new_items: i64,
    pub updated: i64,
    pub deleted: i64,
    pub llm_calls: u64,
    pub fallback_extractions: u64,
    pub tokens: TokenUsage,
    pub duration_ms: u64,
    pub error_kind: Option<SyncErrorKind>,
}

/// Current state of sync for one mailbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatusResponse {
    pub mailbox: String,
    pub phase: SyncPhase,
    pub checkpoint: Option<SyncCheckpoint>,
    pub stored_records: i64,
}

// ============================================================================
// Dashboard
// ============================================================================

/// An interview with a start time that could be parsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingEvent {
    pub starts_at: DateTime<Utc>,
    pub record: StoredEmailRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SummaryStats {
    pub total: usize,
    pub job_related: usize,
    pub unread: usize,
    pub attention: usize,
    pub upcoming: usize,
    pub by_category: BTreeMap<JobCategory, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DashboardData {
    pub activities: Vec<StoredEmailRecord>,
    pub attention_items: Vec<StoredEmailRecord>,
    pub upcoming_events: Vec<UpcomingEvent>,
    pub quick_updates: Vec<StoredEmailRecord>,
    pub summary_stats: SummaryStats,
}
