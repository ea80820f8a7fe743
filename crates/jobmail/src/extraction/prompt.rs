//! Prompt template and output schema for model extraction

use jobmail_types::Message;
use serde_json::{json, Value};

use crate::mail::text::truncate_chars;

pub const SYSTEM_PROMPT: &str = "You analyze emails for a person who is looking for a job. \
Answer with a single JSON object and nothing else.";

const INSTRUCTIONS: &str = r#"Decide whether this email is part of the recipient's job search and extract the facts below.

Fields:
- is_job_related: true for messages from employers, recruiters, applicant tracking systems or job boards about roles the recipient applied to or could apply to
- category: one of "interview", "rejection", "recruiter_outreach", "offer", "job_alert", "other"
- company: the hiring company (not the job board or mail service), or null
- position: the job title, or null
- contact_name, contact_email: a person the recipient can reply to, or null
- key_dates: {"interview_date", "interview_time", "deadline"} as written in the email, or null
- action_required: what the recipient needs to do next, or null
- summary: one sentence describing the email"#;

/// Render the user prompt for one message
pub fn render_prompt(message: &Message, max_body_chars: usize) -> String {
    let body = truncate_chars(message.body_text.trim(), max_body_chars);

    let mut prompt = String::with_capacity(INSTRUCTIONS.len() + body.len() + 256);
    prompt.push_str(INSTRUCTIONS);
    prompt.push_str("\n\n");
    prompt.push_str(&format!("Subject: {}\n", message.subject));
    prompt.push_str(&format!("From: {}\n", message.sender));
    prompt.push_str("Body:\n---\n");
    prompt.push_str(body);
    prompt.push_str("\n---\n");
    prompt
}

/// JSON schema for strict structured output.
/// Every property is required; optional values are nullable.
pub fn extraction_schema() -> Value {
    let nullable = json!({ "type": ["string", "null"] });

    json!({
        "type": "object",
        "additionalProperties": false,
        "required": [
            "is_job_related", "category", "company", "position", "contact_name",
            "contact_email", "key_dates", "action_required", "summary"
        ],
        "properties": {
            "is_job_related": { "type": "boolean" },
            "category": {
                "type": "string",
                "enum": ["interview", "rejection", "recruiter_outreach", "offer", "job_alert", "other"]
            },
            "company": nullable,
            "position": nullable,
            "contact_name": nullable,
            "contact_email": nullable,
            "key_dates": {
                "type": "object",
                "additionalProperties": false,
                "required": ["interview_date", "interview_time", "deadline"],
                "properties": {
                    "interview_date": nullable,
                    "interview_time": nullable,
                    "deadline": nullable
                }
            },
            "action_required": nullable,
            "summary": { "type": "string" }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobmail_types::Sender;

    fn message(body: &str) -> Message {
        Message {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            subject: "Interview Invitation".to_string(),
            sender: Sender::new(Some("Hiring"), "hiring@techcorp.com"),
            recipient: "me@example.com".to_string(),
            received_at: Utc::now(),
            body_text: body.to_string(),
            snippet: String::new(),
            is_unread: true,
            labels: vec![],
        }
    }

    #[test]
    fn test_prompt_embeds_headers_and_body() {
        let prompt = render_prompt(&message("Let's talk Tuesday."), 4000);
        assert!(prompt.contains("Subject: Interview Invitation"));
        assert!(prompt.contains("From: Hiring <hiring@techcorp.com>"));
        assert!(prompt.contains("Let's talk Tuesday."));
    }

    #[test]
    fn test_prompt_truncates_body() {
        let body = "é".repeat(50);
        let prompt = render_prompt(&message(&body), 10);
        assert!(prompt.contains(&"é".repeat(10)));
        assert!(!prompt.contains(&"é".repeat(11)));
    }

    #[test]
    fn test_schema_requires_every_property() {
        let schema = extraction_schema();
        let required = schema["required"].as_array().unwrap().len();
        let properties = schema["properties"].as_object().unwrap().len();
        assert_eq!(required, properties);
    }
}
