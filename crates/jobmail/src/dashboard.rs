//! Dashboard aggregation.
//!
//! `aggregate` is a pure function of its input: the same records and `now`
//! always yield the same buckets. Non-job records only count toward the total.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use jobmail_types::{
    DashboardData, KeyDates, StoredEmailRecord, SummaryStats, UpcomingEvent,
};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::config::env_parse;

pub const DEFAULT_MAX_ACTIVITIES: usize = 50;

/// Time assumed for an interview date given without a time
const DEFAULT_EVENT_TIME: (u32, u32) = (9, 0);

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Window of records read from the store
    pub days_back: u32,
    /// Max records read from the store
    pub limit: usize,
    pub max_activities: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            days_back: 30,
            limit: 500,
            max_activities: DEFAULT_MAX_ACTIVITIES,
        }
    }
}

impl DashboardConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            days_back: env_parse("DASHBOARD_DAYS_BACK", defaults.days_back),
            limit: env_parse("DASHBOARD_LIMIT", defaults.limit),
            max_activities: env_parse("DASHBOARD_MAX_ACTIVITIES", defaults.max_activities),
        }
    }
}

pub fn aggregate(records: &[StoredEmailRecord], now: DateTime<Utc>) -> DashboardData {
    aggregate_capped(records, now, DEFAULT_MAX_ACTIVITIES)
}

pub fn aggregate_capped(
    records: &[StoredEmailRecord],
    now: DateTime<Utc>,
    max_activities: usize,
) -> DashboardData {
    let mut job: Vec<&StoredEmailRecord> = records
        .iter()
        .filter(|r| r.extraction.is_job_related)
        .collect();
    job.sort_by(|a, b| newest_first(a, b));

    let attention_items: Vec<StoredEmailRecord> = job
        .iter()
        .filter(|r| r.extraction.category.needs_attention() && r.extraction.has_unresolved_action())
        .map(|r| (*r).clone())
        .collect();

    let mut upcoming_events: Vec<UpcomingEvent> = job
        .iter()
        .filter_map(|r| {
            let starts_at = event_start(&r.extraction.key_dates, r.message.received_at)?;
            (starts_at > now).then(|| UpcomingEvent {
                starts_at,
                record: (*r).clone(),
            })
        })
        .collect();
    upcoming_events.sort_by(|a, b| {
        a.starts_at
            .cmp(&b.starts_at)
            .then_with(|| a.record.message.id.cmp(&b.record.message.id))
    });

    let bucketed: HashSet<&str> = attention_items
        .iter()
        .map(|r| r.message.id.as_str())
        .chain(upcoming_events.iter().map(|e| e.record.message.id.as_str()))
        .collect();

    let quick_updates: Vec<StoredEmailRecord> = job
        .iter()
        .filter(|r| !bucketed.contains(r.message.id.as_str()))
        .map(|r| (*r).clone())
        .collect();

    let mut summary_stats = SummaryStats {
        total: records.len(),
        job_related: job.len(),
        unread: job.iter().filter(|r| r.message.is_unread).count(),
        attention: attention_items.len(),
        upcoming: upcoming_events.len(),
        ..Default::default()
    };
    for record in &job {
        *summary_stats
            .by_category
            .entry(record.extraction.category)
            .or_insert(0) += 1;
    }

    let activities = job
        .iter()
        .take(max_activities)
        .map(|r| (*r).clone())
        .collect();

    DashboardData {
        activities,
        attention_items,
        upcoming_events,
        quick_updates,
        summary_stats,
    }
}

fn newest_first(a: &StoredEmailRecord, b: &StoredEmailRecord) -> Ordering {
    b.message
        .received_at
        .cmp(&a.message.received_at)
        .then_with(|| a.message.id.cmp(&b.message.id))
}

/// Interview start, resolving relative dates against when the mail arrived.
/// Times without a zone are taken as UTC.
pub fn event_start(dates: &KeyDates, received_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let date = parse_date(dates.interview_date.as_deref()?, received_at.date_naive())?;
    let time = dates
        .interview_time
        .as_deref()
        .and_then(parse_time)
        .or_else(|| NaiveTime::from_hms_opt(DEFAULT_EVENT_TIME.0, DEFAULT_EVENT_TIME.1, 0))?;
    Some(date.and_time(time).and_utc())
}

const DATED_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y", "%B %d %Y", "%b %d %Y", "%d %B %Y", "%d %b %Y",
];

const YEARLESS_FORMATS: &[&str] = &["%m/%d", "%B %d", "%b %d", "%d %B", "%d %b"];

/// Parse the date phrasings extractors produce
pub fn parse_date(raw: &str, reference: NaiveDate) -> Option<NaiveDate> {
    let lowered = raw.trim().to_lowercase().replace([',', '.'], " ");
    let words: Vec<&str> = lowered.split_whitespace().map(strip_ordinal).collect();

    match words.as_slice() {
        [] => return None,
        ["today"] => return Some(reference),
        ["tomorrow"] => return reference.succ_opt(),
        [day] => {
            if let Some(weekday) = parse_weekday(day) {
                return Some(next_weekday(reference, weekday, false));
            }
        }
        ["this", day] => return parse_weekday(day).map(|w| next_weekday(reference, w, false)),
        ["next", day] => return parse_weekday(day).map(|w| next_weekday(reference, w, true)),
        _ => {}
    }

    // "Tuesday October 21" carries a redundant weekday
    let words: &[&str] = match words.as_slice() {
        [first, rest @ ..] if parse_weekday(first).is_some() && !rest.is_empty() => rest,
        all => all,
    };
    let text = words.join(" ");

    if let Some(date) = DATED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&text, fmt).ok())
    {
        return Some(date);
    }

    let with_year = format!("{} {}", text, reference.year());
    YEARLESS_FORMATS.iter().find_map(|fmt| {
        let date = NaiveDate::parse_from_str(&with_year, &format!("{} %Y", fmt)).ok()?;
        if date < reference {
            date.with_year(reference.year() + 1)
        } else {
            Some(date)
        }
    })
}

/// Parse `2 PM`, `2:30 p.m.` or `14:00`
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let normalized: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| *c != '.' && !c.is_whitespace())
        .collect();

    let (clock, pm) = if let Some(clock) = normalized.strip_suffix("am") {
        (clock, Some(false))
    } else if let Some(clock) = normalized.strip_suffix("pm") {
        (clock, Some(true))
    } else {
        (normalized.as_str(), None)
    };

    let (h, m) = clock.split_once(':').unwrap_or((clock, "00"));
    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(h) || h.len() > 2 || !all_digits(m) || m.len() != 2 {
        return None;
    }

    let mut hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    if let Some(pm) = pm {
        if hour == 0 || hour > 12 {
            return None;
        }
        match (pm, hour) {
            (false, 12) => hour = 0,
            (true, h) if h < 12 => hour += 12,
            _ => {}
        }
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn strip_ordinal(word: &str) -> &str {
    for suffix in ["st", "nd", "rd", "th"] {
        if let Some(number) = word.strip_suffix(suffix) {
            if !number.is_empty() && number.chars().all(|c| c.is_ascii_digit()) {
                return number;
            }
        }
    }
    word
}

fn parse_weekday(word: &str) -> Option<Weekday> {
    match word {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

/// First `weekday` after `from`; `skip_week` pushes a same-week match one
/// week further ("next Tuesday" said on a Monday means tomorrow, said on a
/// Tuesday means a week out)
fn next_weekday(from: NaiveDate, weekday: Weekday, skip_week: bool) -> NaiveDate {
    let ahead = (7 + weekday.num_days_from_monday() as i64
        - from.weekday().num_days_from_monday() as i64)
        % 7;
    let ahead = match (ahead, skip_week) {
        (0, true) => 7,
        (days, _) => days,
    };
    from + Duration::days(ahead)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobmail_types::{ExtractionResult, ExtractionSource, JobCategory, Message, Sender};
    use uuid::Uuid;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn record(
        id: &str,
        received_at: DateTime<Utc>,
        category: JobCategory,
        related: bool,
    ) -> StoredEmailRecord {
        let mut extraction = ExtractionResult::unclassified();
        extraction.is_job_related = related;
        extraction.category = if related { category } else { JobCategory::Other };
        extraction.source = ExtractionSource::Rules;

        StoredEmailRecord {
            id: Uuid::new_v4(),
            mailbox: "me@example.com".to_string(),
            message: Message {
                id: id.to_string(),
                thread_id: format!("thread-{}", id),
                subject: format!("Subject {}", id),
                sender: Sender::new(None, "hiring@techcorp.com"),
                recipient: "me@example.com".to_string(),
                received_at,
                body_text: String::new(),
                snippet: String::new(),
                is_unread: true,
                labels: vec![],
            },
            extraction,
            stored_at: received_at,
            updated_at: received_at,
        }
    }

    fn sample(now: DateTime<Utc>) -> Vec<StoredEmailRecord> {
        // Monday 2026-10-19
        let mut interview = record("interview", at(2026, 10, 19, 8), JobCategory::Interview, true);
        interview.extraction.action_required = Some("Confirm a time".to_string());
        interview.extraction.key_dates.interview_date = Some("next Tuesday".to_string());
        interview.extraction.key_dates.interview_time = Some("2 PM".to_string());

        let mut past = record("past", at(2026, 10, 1, 8), JobCategory::Interview, true);
        past.extraction.key_dates.interview_date = Some("2026-10-02".to_string());

        let mut offer_done = record("offer", at(2026, 10, 18, 8), JobCategory::Offer, true);
        offer_done.extraction.action_required = Some("None".to_string());

        vec![
            record("newsletter", now, JobCategory::Other, false),
            record("rejection", at(2026, 10, 17, 8), JobCategory::Rejection, true),
            interview,
            past,
            offer_done,
        ]
    }

    #[test]
    fn test_buckets() {
        let now = at(2026, 10, 19, 12);
        let data = aggregate(&sample(now), now);

        let ids = |records: &[StoredEmailRecord]| -> Vec<String> {
            records.iter().map(|r| r.message.id.clone()).collect()
        };

        assert_eq!(ids(&data.attention_items), vec!["interview"]);
        assert_eq!(data.upcoming_events.len(), 1);
        assert_eq!(data.upcoming_events[0].record.message.id, "interview");
        assert_eq!(data.upcoming_events[0].starts_at, at(2026, 10, 20, 14));
        assert_eq!(ids(&data.quick_updates), vec!["offer", "rejection", "past"]);
        assert_eq!(ids(&data.activities), vec!["interview", "offer", "rejection", "past"]);

        assert_eq!(data.summary_stats.total, 5);
        assert_eq!(data.summary_stats.job_related, 4);
        assert_eq!(data.summary_stats.attention, 1);
        assert_eq!(data.summary_stats.upcoming, 1);
        assert_eq!(data.summary_stats.by_category[&JobCategory::Interview], 2);
        assert!(!data.summary_stats.by_category.contains_key(&JobCategory::Other));
    }

    #[test]
    fn test_aggregate_is_pure() {
        let now = at(2026, 10, 19, 12);
        let records = sample(now);
        let before = records.clone();

        assert_eq!(aggregate(&records, now), aggregate(&records, now));
        assert_eq!(records, before);
    }

    #[test]
    fn test_non_job_records_never_bucketed() {
        let now = at(2026, 10, 19, 12);
        let mut unrelated = record("spam", at(2026, 10, 19, 9), JobCategory::Other, false);
        unrelated.extraction.action_required = Some("Buy now".to_string());
        unrelated.extraction.key_dates.interview_date = Some("tomorrow".to_string());

        let data = aggregate(&[unrelated], now);
        assert!(data.activities.is_empty());
        assert!(data.attention_items.is_empty());
        assert!(data.upcoming_events.is_empty());
        assert!(data.quick_updates.is_empty());
        assert_eq!(data.summary_stats.total, 1);
    }

    #[test]
    fn test_activities_capped() {
        let now = at(2026, 10, 19, 12);
        let records: Vec<StoredEmailRecord> = (0..10)
            .map(|i| record(&format!("r{}", i), at(2026, 10, 10, i), JobCategory::JobAlert, true))
            .collect();

        let data = aggregate_capped(&records, now, 3);
        assert_eq!(data.activities.len(), 3);
        assert_eq!(data.activities[0].message.id, "r9");
        assert_eq!(data.quick_updates.len(), 10);
    }

    #[test]
    fn test_parse_date_phrasings() {
        let monday = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d);

        assert_eq!(parse_date("2026-11-03", monday), date(2026, 11, 3));
        assert_eq!(parse_date("10/21/2026", monday), date(2026, 10, 21));
        assert_eq!(parse_date("October 21st, 2026", monday), date(2026, 10, 21));
        assert_eq!(parse_date("Tuesday, Oct. 21", monday), date(2026, 10, 21));
        assert_eq!(parse_date("Jan 5", monday), date(2027, 1, 5));
        assert_eq!(parse_date("tomorrow", monday), date(2026, 10, 20));
        assert_eq!(parse_date("Tuesday", monday), date(2026, 10, 20));
        assert_eq!(parse_date("next Monday", monday), date(2026, 10, 26));
        assert_eq!(parse_date("this Monday", monday), date(2026, 10, 19));
        assert_eq!(parse_date("sometime soon", monday), None);
    }

    #[test]
    fn test_parse_time_phrasings() {
        let time = |h, m| NaiveTime::from_hms_opt(h, m, 0);
        assert_eq!(parse_time("2 PM"), time(14, 0));
        assert_eq!(parse_time("2:30 p.m."), time(14, 30));
        assert_eq!(parse_time("12am"), time(0, 0));
        assert_eq!(parse_time("14:00"), time(14, 0));
        assert_eq!(parse_time("13 pm"), None);
        assert_eq!(parse_time("noonish"), None);
    }
}
