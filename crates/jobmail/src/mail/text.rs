//! Body text helpers shared by mail adapters.

/// Render an HTML body as plain text
pub fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 100)
        .map(|text| collapse_blank_lines(&text))
        .unwrap_or_default()
}

/// Pick the plain-text part when present, converting HTML otherwise
pub fn render_body(text_plain: Option<&str>, text_html: Option<&str>) -> String {
    match (text_plain, text_html) {
        (Some(plain), _) if !plain.trim().is_empty() => plain.trim().to_string(),
        (_, Some(html)) => html_to_text(html),
        _ => String::new(),
    }
}

/// Longest prefix of `text` with at most `max_chars` chars
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_preferred() {
        assert_eq!(render_body(Some(" hello "), Some("<p>other</p>")), "hello");
    }

    #[test]
    fn test_html_fallback_strips_tags() {
        let text = render_body(None, Some("<html><body><p>We'd like to <b>interview</b> you</p></body></html>"));
        assert!(text.contains("interview"));
        assert!(!text.contains("<b>"));
    }

    #[test]
    fn test_blank_plain_part_falls_back_to_html() {
        let text = render_body(Some("   "), Some("<div>Offer letter</div>"));
        assert!(text.contains("Offer letter"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }
}
