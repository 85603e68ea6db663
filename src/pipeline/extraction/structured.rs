//! Category-shaped projections of extracted text.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::models::FileCategory;

/// Characters of text kept in the general summary.
const SUMMARY_CHARS: usize = 200;

static LAB_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    compile(&[
        ("glucose", r"(?i)\bglucose[:\s]*(\d+(?:\.\d+)?)"),
        ("hemoglobin", r"(?i)\b(?:hemoglobin|hgb|hb)[:\s]*(\d+(?:\.\d+)?)"),
        ("cholesterol", r"(?i)\bcholesterol[:\s]*(\d+(?:\.\d+)?)"),
        ("blood_pressure", r"(?i)\bbp[:\s]*(\d+/\d+)"),
        ("heart_rate", r"(?i)\bhr[:\s]*(\d+)"),
    ])
});

static VITAL_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    compile(&[
        ("blood_pressure", r"(?i)\bbp[:\s]*(\d+/\d+)"),
        ("heart_rate", r"(?i)\bhr[:\s]*(\d+)"),
        ("temperature", r"(?i)\btemp(?:erature)?[:\s]*(\d+(?:\.\d+)?)"),
        ("respiratory_rate", r"(?i)\brr[:\s]*(\d+)"),
        ("oxygen_saturation", r"(?i)\b(?:o2|spo2)[:\s]*(\d+)%?"),
    ])
});

static INSURANCE_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    compile(&[
        ("policy_number", r"(?i)\bpolicy(?:\s+(?:number|no\.?))?[:\s#]*([A-Za-z0-9-]*\d[A-Za-z0-9-]*)"),
        ("group_number", r"(?i)\bgroup(?:\s+(?:number|no\.?))?[:\s#]*([A-Za-z0-9-]*\d[A-Za-z0-9-]*)"),
        ("member_id", r"(?i)\bmember(?:\s+id)?[:\s#]*([A-Za-z0-9-]*\d[A-Za-z0-9-]*)"),
    ])
});

static MEDICATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z][a-z-]+)\s+(\d+(?:\.\d+)?)\s*(mg|mcg|g|ml|units?)\b(?:\s+(daily|bid|tid|qid|qhs|prn|weekly))?")
        .unwrap()
});

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d").unwrap());
static DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b").unwrap());

fn compile(patterns: &[(&'static str, &str)]) -> Vec<(&'static str, Regex)> {
    patterns
        .iter()
        .map(|(key, pattern)| (*key, Regex::new(pattern).unwrap()))
        .collect()
}

fn first_matches(patterns: &[(&'static str, Regex)], text: &str) -> Value {
    let mut out = Map::new();
    for (key, re) in patterns {
        if let Some(caps) = re.captures(text) {
            out.insert((*key).to_string(), json!(&caps[1]));
        }
    }
    Value::Object(out)
}

/// Project extracted text into the shape its category calls for.
pub fn project(category: FileCategory, text: &str) -> Value {
    match category {
        FileCategory::LabResults => first_matches(&LAB_PATTERNS, text),
        FileCategory::Forms => first_matches(&VITAL_PATTERNS, text),
        FileCategory::Insurance => first_matches(&INSURANCE_PATTERNS, text),
        FileCategory::Prescriptions => medications(text),
        FileCategory::Imaging | FileCategory::Other => general(text),
    }
}

fn medications(text: &str) -> Value {
    let medications: Vec<Value> = MEDICATION
        .captures_iter(text)
        .map(|caps| {
            json!({
                "name": &caps[1],
                "dose": &caps[2],
                "unit": caps[3].to_lowercase(),
                "frequency": caps.get(4).map_or("as directed".to_string(), |m| m.as_str().to_lowercase()),
            })
        })
        .collect();
    json!({ "medications": medications })
}

fn general(text: &str) -> Value {
    let summary = if text.chars().count() > SUMMARY_CHARS {
        let cut: String = text.chars().take(SUMMARY_CHARS).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    };
    json!({
        "word_count": text.split_whitespace().count(),
        "contains_numbers": NUMBER.is_match(text),
        "contains_dates": DATE.is_match(text),
        "summary": summary,
    })
}
