//! Parse model output into an extraction result

use jobmail_types::{ExtractionResult, ExtractionSource, JobCategory, KeyDates};
use serde_json::{Map, Value};

/// Parse a completion into an unscored, normalized result.
///
/// Requires `is_job_related`, `category` and `summary`; everything else is
/// optional and read leniently.
pub fn parse_model_output(response: &str) -> Result<ExtractionResult, String> {
    let json_str = locate_json_object(strip_json_fences(response))
        .ok_or_else(|| "No JSON object in response".to_string())?;

    let json: Value =
        serde_json::from_str(json_str).map_err(|e| format!("JSON parse error: {}", e))?;
    let obj = json
        .as_object()
        .ok_or_else(|| "Expected a JSON object".to_string())?;

    let is_job_related = obj
        .get("is_job_related")
        .and_then(as_bool)
        .ok_or_else(|| "Missing or invalid 'is_job_related'".to_string())?;

    let category = obj
        .get("category")
        .and_then(Value::as_str)
        .map(JobCategory::from_label)
        .ok_or_else(|| "Missing or invalid 'category'".to_string())?;

    let summary = obj
        .get("summary")
        .and_then(Value::as_str)
        .ok_or_else(|| "Missing or invalid 'summary'".to_string())?
        .to_string();

    let key_dates = match obj.get("key_dates") {
        Some(Value::Object(dates)) => KeyDates {
            interview_date: string_field(dates, "interview_date"),
            interview_time: string_field(dates, "interview_time"),
            deadline: string_field(dates, "deadline"),
        },
        // Some models flatten the dates onto the top level
        _ => KeyDates {
            interview_date: string_field(obj, "interview_date"),
            interview_time: string_field(obj, "interview_time"),
            deadline: string_field(obj, "deadline"),
        },
    };

    Ok(ExtractionResult {
        is_job_related,
        category,
        company: string_field(obj, "company"),
        position: string_field(obj, "position"),
        contact_name: string_field(obj, "contact_name"),
        contact_email: string_field(obj, "contact_email"),
        key_dates,
        action_required: string_field(obj, "action_required"),
        confidence: 0.0,
        summary,
        source: ExtractionSource::Model,
    }
    .normalized())
}

/// Remove a surrounding markdown code fence, if any
pub fn strip_json_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string (`json`) on the opening line
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

/// Slice of the first balanced `{...}` object in `text`
pub fn locate_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let response = r#"{
            "is_job_related": true,
            "category": "interview",
            "company": "TechCorp",
            "position": "Software Engineer",
            "contact_name": null,
            "contact_email": "hiring@techcorp.com",
            "key_dates": {"interview_date": "next Tuesday", "interview_time": "2 PM", "deadline": null},
            "action_required": "Confirm availability",
            "summary": "TechCorp invites you to a technical interview."
        }"#;

        let result = parse_model_output(response).unwrap();
        assert!(result.is_job_related);
        assert_eq!(result.category, JobCategory::Interview);
        assert_eq!(result.company.as_deref(), Some("TechCorp"));
        assert_eq!(result.contact_name, None);
        assert_eq!(result.key_dates.interview_time.as_deref(), Some("2 PM"));
        assert_eq!(result.source, ExtractionSource::Model);
    }

    #[test]
    fn test_parse_fenced_json_with_chatter() {
        let response = "```json\n{\"is_job_related\": \"yes\", \"category\": \"Job-Alert\", \"summary\": \"New roles {for you}\"}\n```";
        let result = parse_model_output(response).unwrap();
        assert_eq!(result.category, JobCategory::JobAlert);
        assert_eq!(result.summary, "New roles {for you}");

        let chatty = "Sure! Here it is: {\"is_job_related\": false, \"category\": \"other\", \"summary\": \"Newsletter.\"} Hope that helps.";
        assert!(!parse_model_output(chatty).unwrap().is_job_related);
    }

    #[test]
    fn test_unknown_category_becomes_other() {
        let response = r#"{"is_job_related": true, "category": "networking", "summary": "Coffee chat"}"#;
        assert_eq!(parse_model_output(response).unwrap().category, JobCategory::Other);
    }

    #[test]
    fn test_missing_required_fields_rejected() {
        assert!(parse_model_output(r#"{"category": "offer", "summary": "x"}"#).is_err());
        assert!(parse_model_output(r#"{"is_job_related": true, "summary": "x"}"#).is_err());
        assert!(parse_model_output(r#"{"is_job_related": true, "category": "offer"}"#).is_err());
        assert!(parse_model_output("I cannot help with that.").is_err());
        assert!(parse_model_output("{\"is_job_related\": tru").is_err());
    }

    #[test]
    fn test_flattened_dates_accepted() {
        let response = r#"{"is_job_related": true, "category": "interview", "summary": "s", "interview_date": "2026-11-03"}"#;
        let result = parse_model_output(response).unwrap();
        assert_eq!(result.key_dates.interview_date.as_deref(), Some("2026-11-03"));
    }

    #[test]
    fn test_locate_ignores_braces_in_strings() {
        let text = r#"prefix {"a": "}{", "b": {"c": 1}} suffix"#;
        assert_eq!(locate_json_object(text), Some(r#"{"a": "}{", "b": {"c": 1}}"#));
        assert_eq!(locate_json_object("{ unclosed"), None);
    }
}
