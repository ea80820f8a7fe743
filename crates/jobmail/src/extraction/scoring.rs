//! Confidence scoring.
//!
//! Both stages add a fixed weight per corroborating signal. Rule results are
//! capped below model results so consumers can tell them apart.

use jobmail_types::{ExtractionResult, JobCategory};

pub const MODEL_CAP: f32 = 1.0;
pub const RULES_CAP: f32 = 0.7;

const SIGNAL_WEIGHT: f32 = 0.2;
const RULES_DETAIL_WEIGHT: f32 = 0.1;

/// Signals present in a result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signals {
    pub related: bool,
    pub company: bool,
    pub categorized: bool,
    pub summary: bool,
    pub details: bool,
}

impl Signals {
    pub fn of(result: &ExtractionResult) -> Self {
        Self {
            related: result.is_job_related,
            company: result.company.is_some(),
            categorized: result.category != JobCategory::Other,
            summary: result.summary.split_whitespace().count() >= 3,
            details: result.position.is_some()
                || result.contact_email.is_some()
                || !result.key_dates.is_empty(),
        }
    }
}

pub fn model_confidence(result: &ExtractionResult) -> f32 {
    let s = Signals::of(result);
    let score = [s.related, s.company, s.categorized, s.summary, s.details]
        .iter()
        .filter(|present| **present)
        .count() as f32
        * SIGNAL_WEIGHT;
    score.min(MODEL_CAP)
}

/// Rule summaries are templated, so they earn nothing
pub fn rules_confidence(result: &ExtractionResult) -> f32 {
    let s = Signals::of(result);
    let mut score = 0.0;
    if s.related {
        score += SIGNAL_WEIGHT;
    }
    if s.company {
        score += SIGNAL_WEIGHT;
    }
    if s.categorized {
        score += SIGNAL_WEIGHT;
    }
    if s.details {
        score += RULES_DETAIL_WEIGHT;
    }
    score.min(RULES_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmail_types::KeyDates;

    fn full_result() -> ExtractionResult {
        ExtractionResult {
            is_job_related: true,
            category: JobCategory::Offer,
            company: Some("Acme".to_string()),
            position: Some("Engineer".to_string()),
            contact_name: None,
            contact_email: None,
            key_dates: KeyDates::default(),
            action_required: None,
            confidence: 0.0,
            summary: "Acme sent an offer.".to_string(),
            source: jobmail_types::ExtractionSource::Model,
        }
    }

    #[test]
    fn test_model_confidence_all_signals() {
        assert!((model_confidence(&full_result()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_more_signals_score_higher() {
        let mut result = full_result();
        let full = model_confidence(&result);
        result.company = None;
        let fewer = model_confidence(&result);
        assert!(fewer < full);

        let rules_full = rules_confidence(&full_result());
        assert!(rules_confidence(&result) < rules_full);
    }

    #[test]
    fn test_rules_capped_below_model() {
        let result = full_result();
        assert!(rules_confidence(&result) <= RULES_CAP);
        assert!(rules_confidence(&result) < model_confidence(&result));
    }

    #[test]
    fn test_unclassified_scores_zero() {
        let result = ExtractionResult::unclassified();
        assert_eq!(model_confidence(&result), 0.0);
        assert_eq!(rules_confidence(&result), 0.0);
    }
}
