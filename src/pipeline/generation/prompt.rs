use serde_json::Value;

use super::ContentKind;

pub const CLINICAL_SYSTEM_PROMPT: &str = r#"
You are a documentation assistant for a home health agency. You draft clinical
text for review by licensed clinicians. Use only the facts present in the
context you are given. Never invent vital signs, medications or diagnoses.
When a JSON format is requested, output ONLY that JSON in a ```json``` block.
"#;

pub const MESSAGE_SYSTEM_PROMPT: &str = r#"
You draft short, professional care-coordination messages between members of a
home health care team. Write plain text, no markdown. Mention only facts from
the context. Sign with the sender's name.
"#;

pub fn system_prompt(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Message => MESSAGE_SYSTEM_PROMPT,
        _ => CLINICAL_SYSTEM_PROMPT,
    }
}

/// Build the user prompt for a kind of content. The context is embedded as
/// pretty JSON between tags so the model can distinguish it from instructions.
pub fn build_prompt(kind: ContentKind, context: &Value) -> String {
    let context_json = serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string());
    let instructions = match kind {
        ContentKind::VisitSummary => {
            r#"Summarize the home visit above. The summary_type field selects the register:
"brief" is two or three sentences, "detailed" covers assessment and plan,
"physician" is written for the attending physician.

```json
{
  "summary": "text",
  "recommendations": ["short action", "short action"]
}
```"#
        }
        ContentKind::TranscriptNote => {
            r#"Convert the voice transcript above into a structured visit note. Use a JSON
object whose keys are note sections (for example "subjective", "objective",
"assessment", "plan"). Omit sections the transcript does not cover."#
        }
        ContentKind::AssessmentAnalysis => {
            r#"Analyze the OASIS assessment above. Scores are ordinal; higher means more
impairment. All risk scores and quality indicators are percentages 0-100,
confidence_score is 0-1.

```json
{
  "risk_scores": {"overall_risk": 0, "fall_risk": 0, "hospitalization_risk": 0},
  "insights": [{"text": "finding"}],
  "recommendations": [{"action": "intervention", "priority": "high | medium | low"}],
  "quality_indicators": {"data_completeness": 0, "assessment_accuracy": 0, "timeliness": 0},
  "confidence_score": 0.0
}
```"#
        }
        ContentKind::Message => {
            r#"Draft the message described above. If template_content is present, fill it in
rather than writing from scratch. Follow custom_prompt when given."#
        }
    };

    format!("<context kind=\"{}\">\n{context_json}\n</context>\n\n{instructions}", kind.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prompt_embeds_context() {
        let prompt = build_prompt(ContentKind::VisitSummary, &json!({"patient_name": "Ann Lee"}));
        assert!(prompt.contains("<context kind=\"visit_summary\">"));
        assert!(prompt.contains("Ann Lee"));
        assert!(prompt.contains("\"recommendations\""));
    }

    #[test]
    fn analysis_prompt_lists_required_keys() {
        let prompt = build_prompt(ContentKind::AssessmentAnalysis, &json!({}));
        for key in crate::pipeline::generation::REQUIRED_RISK_SCORES {
            assert!(prompt.contains(key), "missing {key}");
        }
    }

    #[test]
    fn messages_get_their_own_system_prompt() {
        assert_eq!(system_prompt(ContentKind::Message), MESSAGE_SYSTEM_PROMPT);
        assert_eq!(system_prompt(ContentKind::TranscriptNote), CLINICAL_SYSTEM_PROMPT);
    }
}
