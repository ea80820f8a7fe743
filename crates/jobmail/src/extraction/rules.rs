//! Deterministic rule pass.
//!
//! One ordered table of (pattern, category) rules, evaluated first-match over
//! subject and body. Company, position and dates come from a handful of regexes.

use jobmail_types::{ExtractionResult, ExtractionSource, JobCategory, KeyDates, Message};
use regex::Regex;
use std::sync::LazyLock;

use super::scoring::rules_confidence;
use crate::mail::text::truncate_chars;

/// Body prefix the rules look at
const MAX_SCAN_CHARS: usize = 8000;

/// Ordered: the first matching rule decides the category
static CATEGORY_RULES: LazyLock<Vec<(Regex, JobCategory)>> = LazyLock::new(|| {
    [
        (
            r"(?i)\bunfortunately\b|not (?:be )?moving forward|decided to (?:move|proceed|go) forward with other|move forward with other candidates|pursue other candidates|regret to inform|no longer (?:being )?considered|position has been filled|will not be (?:moving|proceeding)",
            JobCategory::Rejection,
        ),
        (
            r"(?i)\boffer letter\b|pleased to (?:extend|offer you)|(?:job|formal|verbal) offer\b|extend (?:you )?an offer|compensation package",
            JobCategory::Offer,
        ),
        (
            r"(?i)\binterview|schedule (?:a|an|some) (?:call|time|chat|meeting)|phone screen|technical screen|your availability|onsite visit",
            JobCategory::Interview,
        ),
        (
            r"(?i)\brecruiter\b|came across your (?:profile|resume|background)|(?:exciting|new) (?:role|opportunity)|would you be (?:open|interested)|open to (?:new|exploring) opportunities|reaching out about",
            JobCategory::RecruiterOutreach,
        ),
        (
            r"(?i)\bjob alert|jobs? (?:for|matching) you|new jobs\b|recommended jobs|jobs you may be interested in|similar jobs",
            JobCategory::JobAlert,
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, category)| compile(pattern).map(|re| (re, category)))
    .collect()
});

/// A category keyword only counts next to one of these; "unfortunately" alone
/// is not a rejection
static JOB_CONTEXT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"(?i)\bappl(?:y|ied|ying|ication)|\bcandida(?:te|cy)|\bposition\b|\broles?\b|\bopenings?\b|\brecruit|\bhiring\b|\binterview|\bresum[eé]|\bcv\b|\bjobs?\b|\bcareers?\b|\btalent\b|offer letter|extend (?:you )?an offer|compensation package")
});

/// Job-related but not one of the categories above
static APPLICATION_SIGNAL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"(?i)thank you for (?:applying|your application|your interest)|application (?:has been )?received|we (?:have )?received your application|your application (?:for|to)")
});

static SUBJECT_COMPANY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // "Thank you for your interest in Headspace"
        r"(?i:thank you for (?:your (?:interest|application) (?:in|to|at|with)|applying (?:to|at|with)))\s+(?P<company>[^,.!?:;\n]+)",
        // "Acme - Software Engineer Position"
        r"^\s*(?P<company>[A-Z][\w&.' ]*?)\s+[-–|]\s+.+?\b(?i:position|role|opening)\b",
        // "Interview Invitation - Software Engineer at TechCorp"
        r"\bat\s+(?P<company>[A-Z][\w&.'-]*(?:\s+[A-Z][\w&.'-]*)*)",
    ]
    .into_iter()
    .filter_map(compile)
    .collect()
});

static POSITION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Subject "... - Software Engineer at TechCorp"
        r"[-–|]\s+(?P<position>[A-Z][\w/&+.' ]*?)\s+at\s+[A-Z]",
        // Subject "Acme - Software Engineer Position"
        r"[-–|]\s+(?P<position>[\w/&+.' ]+?)\s+(?i:position|role)\b",
        // Body "for the Data Analyst position"
        r"(?i:for|as)\s+(?i:the|a|an|our)\s+(?P<position>[A-Z][\w/&+.' -]*?)\s+(?i:position|role|opening)\b",
    ]
    .into_iter()
    .filter_map(compile)
    .collect()
});

static INTERVIEW_DATE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"(?i)\b(?P<date>(?:next |this )?(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday)(?:,? (?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.? \d{1,2}(?:st|nd|rd|th)?)?|(?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.? \d{1,2}(?:st|nd|rd|th)?(?:,? \d{4})?|\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}(?:/\d{2,4})?|tomorrow)\b")
});

static INTERVIEW_TIME: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"(?i)\b(?P<time>\d{1,2}(?::\d{2})?\s*(?:am|pm|a\.m\.|p\.m\.)|\d{1,2}:\d{2})")
});

static DEADLINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"(?i)\b(?:by|before|no later than|deadline(?: is|:)?)\s+(?P<deadline>(?:end of day )?(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday|(?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.? \d{1,2}(?:st|nd|rd|th)?(?:,? \d{4})?|\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}(?:/\d{2,4})?))")
});

/// Domains that never name the hiring company: freemail, bulk mailers and
/// job boards. ATS vendors are listed separately.
const DOMAIN_DENYLIST: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "yahoo.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "icloud.com",
    "aol.com",
    "proton.me",
    "protonmail.com",
    "sendgrid.net",
    "mailchimp.com",
    "mcsv.net",
    "mailgun.org",
    "amazonses.com",
    "sparkpostmail.com",
    "mandrillapp.com",
    "hubspotemail.net",
    "linkedin.com",
    "indeed.com",
    "indeedemail.com",
    "glassdoor.com",
    "ziprecruiter.com",
    "wellfound.com",
    "dice.com",
    "hired.com",
];

/// Applicant tracking systems: mail from these is job context on its own
const ATS_DOMAINS: &[&str] = &[
    "greenhouse.io",
    "greenhouse-mail.io",
    "lever.co",
    "myworkday.com",
    "myworkdayjobs.com",
    "smartrecruiters.com",
    "icims.com",
    "ashbyhq.com",
    "jobvite.com",
    "bamboohr.com",
    "taleo.net",
    "successfactors.com",
    "workablemail.com",
];

/// Second-level labels that sit under a country code (`co.uk`, `com.au`)
const SECOND_LEVEL_SUFFIXES: &[&str] = &["co", "com", "org", "net", "ac", "gov", "edu"];

const NO_REPLY_MARKERS: &[&str] = &["noreply", "no-reply", "donotreply", "do-not-reply", "notifications"];

const TEAM_NAME_MARKERS: &[&str] = &[
    "team", "careers", "recruiting", "talent", "hiring", "jobs", "notifications", "hr",
];

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!("Invalid extraction pattern {:?}: {}", pattern, e);
            None
        }
    }
}

/// Classify a message without a model
pub fn extract_with_rules(message: &Message) -> ExtractionResult {
    let body = truncate_chars(&message.body_text, MAX_SCAN_CHARS);
    let text = format!("{}\n{}", message.subject, body);

    let in_context = JOB_CONTEXT.as_ref().is_some_and(|re| re.is_match(&text))
        || message.sender.domain().is_some_and(|d| is_ats_domain(&d));
    let category = classify(&text).filter(|_| in_context);
    let is_job_related = category.is_some()
        || APPLICATION_SIGNAL
            .as_ref()
            .is_some_and(|re| re.is_match(&text));
    let category = category.unwrap_or(JobCategory::Other);

    let mut result = ExtractionResult {
        is_job_related,
        category,
        company: None,
        position: None,
        contact_name: None,
        contact_email: None,
        key_dates: KeyDates::default(),
        action_required: None,
        confidence: 0.0,
        summary: String::new(),
        source: ExtractionSource::Rules,
    };

    if is_job_related {
        result.company = company_from_subject(&message.subject).or_else(|| {
            message
                .sender
                .domain()
                .and_then(|domain| company_from_domain(&domain))
        });
        result.position = position_from(&message.subject).or_else(|| position_from(body));
        (result.contact_name, result.contact_email) = contact_from(message);
        result.key_dates = key_dates_from(&text, category);
        result.action_required = match category {
            JobCategory::Interview => Some("Reply to schedule the interview".to_string()),
            JobCategory::Offer => Some("Review and respond to the offer".to_string()),
            _ => None,
        };
    }

    result.summary = summarize(&result);
    let mut result = result.normalized();
    result.confidence = rules_confidence(&result);
    result
}

fn domain_in(domain: &str, list: &[&str]) -> bool {
    list.iter()
        .any(|d| domain == *d || domain.ends_with(&format!(".{}", d)))
}

fn is_ats_domain(domain: &str) -> bool {
    domain_in(&domain.trim().to_lowercase(), ATS_DOMAINS)
}

/// First category whose pattern matches. Keywords only; callers decide
/// whether the text is about a job search at all.
pub fn classify(text: &str) -> Option<JobCategory> {
    CATEGORY_RULES
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, category)| *category)
}

pub fn company_from_subject(subject: &str) -> Option<String> {
    SUBJECT_COMPANY_PATTERNS.iter().find_map(|re| {
        re.captures(subject)
            .and_then(|caps| caps.name("company"))
            .and_then(|m| clean_name(m.as_str()))
    })
}

/// Registrable label of the sender's domain, unless the domain is a relay
pub fn company_from_domain(domain: &str) -> Option<String> {
    let domain = domain.trim().trim_end_matches('.').to_lowercase();
    if domain_in(&domain, DOMAIN_DENYLIST) || domain_in(&domain, ATS_DOMAINS) {
        return None;
    }

    let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
    let label = match labels.as_slice() {
        [.., name, second, tld] if tld.len() == 2 && SECOND_LEVEL_SUFFIXES.contains(second) => {
            *name
        }
        [.., name, _tld] => *name,
        _ => return None,
    };

    let mut chars = label.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}

fn position_from(text: &str) -> Option<String> {
    POSITION_PATTERNS.iter().find_map(|re| {
        re.captures(text)
            .and_then(|caps| caps.name("position"))
            .and_then(|m| clean_name(m.as_str()))
    })
}

fn contact_from(message: &Message) -> (Option<String>, Option<String>) {
    let address = message.sender.address.to_lowercase();
    if address.is_empty() || NO_REPLY_MARKERS.iter().any(|m| address.contains(m)) {
        return (None, None);
    }

    let name = message.sender.name.as_ref().filter(|name| {
        let lower = name.to_lowercase();
        !lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| TEAM_NAME_MARKERS.contains(&word))
    });

    (name.cloned(), Some(message.sender.address.clone()))
}

fn key_dates_from(text: &str, category: JobCategory) -> KeyDates {
    let mut dates = KeyDates::default();
    if category == JobCategory::Interview {
        dates.interview_date = capture(&INTERVIEW_DATE, text, "date");
        dates.interview_time = capture(&INTERVIEW_TIME, text, "time");
    }
    if matches!(category, JobCategory::Offer | JobCategory::Interview) {
        dates.deadline = capture(&DEADLINE, text, "deadline");
    }
    dates
}

fn capture(re: &Option<Regex>, text: &str, group: &str) -> Option<String> {
    re.as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.name(group).map(|m| m.as_str().trim().to_string()))
}

fn clean_name(raw: &str) -> Option<String> {
    let name = raw
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .trim_start_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());

    let lower = name.to_lowercase();
    let generic = matches!(lower.as_str(), "" | "the" | "our" | "us" | "this" | "your" | "a" | "an");
    if generic || name.chars().count() > 60 {
        None
    } else {
        Some(name.to_string())
    }
}

fn summarize(result: &ExtractionResult) -> String {
    let at = result
        .company
        .as_deref()
        .map(|c| format!(" from {}", c))
        .unwrap_or_default();
    let role = result
        .position
        .as_deref()
        .map(|p| format!(" for {}", p))
        .unwrap_or_default();

    if !result.is_job_related {
        return "Not related to the job search.".to_string();
    }

    match result.category {
        JobCategory::Interview => format!("Interview request{}{}.", at, role),
        JobCategory::Rejection => format!("Application declined{}{}.", at, role),
        JobCategory::RecruiterOutreach => format!("Recruiter outreach{}{}.", at, role),
        JobCategory::Offer => format!("Job offer{}{}.", at, role),
        JobCategory::JobAlert => format!("Job alert{}.", at),
        JobCategory::Other => format!("Job search update{}{}.", at, role),
    }
}
