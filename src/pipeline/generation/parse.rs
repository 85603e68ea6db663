use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::GenerationError;
use crate::models::{AssessmentAnalysis, Insight, Recommendation};

pub const REQUIRED_RISK_SCORES: [&str; 3] = ["overall_risk", "fall_risk", "hospitalization_risk"];
pub const REQUIRED_QUALITY_INDICATORS: [&str; 3] =
    ["data_completeness", "assessment_accuracy", "timeliness"];

/// Pull the JSON payload out of generator output. Accepts bare JSON or a
/// ```json fenced block surrounded by prose.
pub fn extract_json(response: &str) -> Result<serde_json::Value, GenerationError> {
    let trimmed = response.trim();
    let body = match trimmed.find("```json") {
        Some(start) => {
            let content_start = start + 7;
            let end = trimmed[content_start..]
                .find("```")
                .ok_or_else(|| GenerationError::Malformed("Unclosed JSON block".into()))?;
            trimmed[content_start..content_start + end].trim()
        }
        None => trimmed,
    };
    serde_json::from_str(body).map_err(|e| GenerationError::Malformed(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VisitSummaryDraft {
    pub summary: String,
    pub recommendations: Vec<String>,
}

pub fn parse_visit_summary(response: &str) -> Result<VisitSummaryDraft, GenerationError> {
    let draft: VisitSummaryDraft = serde_json::from_value(extract_json(response)?)
        .map_err(|e| GenerationError::Malformed(format!("visit summary: {e}")))?;
    if draft.summary.trim().is_empty() {
        return Err(GenerationError::Malformed("visit summary: empty summary".into()));
    }
    Ok(draft)
}

/// Structured note data must be a JSON object.
pub fn parse_structured_note(response: &str) -> Result<serde_json::Value, GenerationError> {
    let value = extract_json(response)?;
    if !value.is_object() {
        return Err(GenerationError::Malformed("structured note must be an object".into()));
    }
    Ok(value)
}

#[derive(Deserialize)]
struct RawAnalysis {
    risk_scores: BTreeMap<String, f64>,
    insights: Vec<Insight>,
    recommendations: Vec<Recommendation>,
    quality_indicators: BTreeMap<String, f64>,
    confidence_score: f64,
}

/// Validate an assessment analysis: required risk scores and quality
/// indicators in [0, 100], confidence in [0, 1].
pub fn parse_assessment_analysis(
    response: &str,
    analyzed_at: DateTime<Utc>,
) -> Result<AssessmentAnalysis, GenerationError> {
    let raw: RawAnalysis = serde_json::from_value(extract_json(response)?)
        .map_err(|e| GenerationError::Malformed(format!("assessment analysis: {e}")))?;

    check_percentages("risk_scores", &raw.risk_scores, &REQUIRED_RISK_SCORES)?;
    check_percentages(
        "quality_indicators",
        &raw.quality_indicators,
        &REQUIRED_QUALITY_INDICATORS,
    )?;
    if !(0.0..=1.0).contains(&raw.confidence_score) {
        return Err(GenerationError::Malformed(format!(
            "confidence_score {} outside [0, 1]",
            raw.confidence_score
        )));
    }

    Ok(AssessmentAnalysis {
        risk_scores: raw.risk_scores,
        insights: raw.insights,
        recommendations: raw.recommendations,
        quality_indicators: raw.quality_indicators,
        confidence_score: raw.confidence_score,
        analyzed_at,
    })
}

fn check_percentages(
    field: &str,
    values: &BTreeMap<String, f64>,
    required: &[&str],
) -> Result<(), GenerationError> {
    for key in required {
        if !values.contains_key(*key) {
            return Err(GenerationError::Malformed(format!("{field}.{key} missing")));
        }
    }
    for (key, value) in values {
        if !(0.0..=100.0).contains(value) {
            return Err(GenerationError::Malformed(format!(
                "{field}.{key} = {value} outside [0, 100]"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"{
        "risk_scores": {"overall_risk": 65, "fall_risk": 75, "hospitalization_risk": 45},
        "insights": [{"text": "High fall risk"}],
        "recommendations": [{"action": "Install grab bars", "priority": "high"}],
        "quality_indicators": {"data_completeness": 90, "assessment_accuracy": 85, "timeliness": 100},
        "confidence_score": 0.87
    }"#;

    #[test]
    fn fenced_json_is_extracted() {
        let text = "Here you go:\n```json\n{\"summary\": \"ok\", \"recommendations\": []}\n```\nThanks";
        let draft = parse_visit_summary(text).unwrap();
        assert_eq!(draft.summary, "ok");
    }

    #[test]
    fn valid_analysis_parses() {
        let analysis = parse_assessment_analysis(GOOD, Utc::now()).unwrap();
        assert_eq!(analysis.risk_scores["fall_risk"], 75.0);
        assert_eq!(analysis.recommendations[0].priority, "high");
    }

    #[test]
    fn out_of_range_risk_is_malformed() {
        let bad = GOOD.replace("\"fall_risk\": 75", "\"fall_risk\": 175");
        assert!(matches!(
            parse_assessment_analysis(&bad, Utc::now()),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[test]
    fn missing_indicator_is_malformed() {
        let bad = GOOD.replace("\"timeliness\": 100", "\"speed\": 100");
        assert!(parse_assessment_analysis(&bad, Utc::now()).is_err());
    }

    #[test]
    fn confidence_above_one_is_malformed() {
        let bad = GOOD.replace("0.87", "1.5");
        assert!(parse_assessment_analysis(&bad, Utc::now()).is_err());
    }

    #[test]
    fn summary_requires_recommendation_list() {
        assert!(parse_visit_summary(r#"{"summary": "x", "recommendations": "none"}"#).is_err());
        assert!(parse_visit_summary("not json").is_err());
    }

    #[test]
    fn structured_note_must_be_object() {
        assert!(parse_structured_note("[1, 2]").is_err());
        assert!(parse_structured_note(r#"{"note": "x"}"#).is_ok());
    }
}
