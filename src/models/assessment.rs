use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{AssessmentType, Discipline};

/// Ordinal functional-status items. Each is optional until scored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionalScores {
    pub grooming: Option<i32>,
    pub dressing_upper: Option<i32>,
    pub dressing_lower: Option<i32>,
    pub bathing: Option<i32>,
    pub toileting: Option<i32>,
    pub transferring: Option<i32>,
    pub ambulation: Option<i32>,
    pub feeding: Option<i32>,
    pub cognitive_functioning: Option<i32>,
    pub vision: Option<i32>,
    pub hearing: Option<i32>,
}

impl FunctionalScores {
    /// `(field, value, inclusive maximum)` for every item.
    pub fn items(&self) -> [(&'static str, Option<i32>, i32); 11] {
        [
            ("grooming", self.grooming, 3),
            ("dressing_upper", self.dressing_upper, 3),
            ("dressing_lower", self.dressing_lower, 3),
            ("bathing", self.bathing, 3),
            ("toileting", self.toileting, 3),
            ("transferring", self.transferring, 3),
            ("ambulation", self.ambulation, 3),
            ("feeding", self.feeding, 3),
            ("cognitive_functioning", self.cognitive_functioning, 4),
            ("vision", self.vision, 2),
            ("hearing", self.hearing, 3),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: String,
    pub priority: String,
}

/// Validated output of an assessment analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentAnalysis {
    pub risk_scores: BTreeMap<String, f64>,
    pub insights: Vec<Insight>,
    pub recommendations: Vec<Recommendation>,
    pub quality_indicators: BTreeMap<String, f64>,
    pub confidence_score: f64,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OasisAssessment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub clinician_id: Uuid,
    pub assessment_type: AssessmentType,
    pub assessment_date: NaiveDate,
    pub zip_code: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<String>,
    pub race_ethnicity: Option<String>,
    pub prior_functioning_adl: serde_json::Value,
    pub prior_functioning_iadl: serde_json::Value,
    pub primary_diagnosis: Option<String>,
    pub other_diagnoses: Option<String>,
    #[serde(flatten)]
    pub scores: FunctionalScores,
    pub complete_data: serde_json::Value,
    pub analysis: Option<AssessmentAnalysis>,
    pub is_completed: bool,
    pub submitted_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OasisAssessment {
    /// Completed and submitted assessments have a frozen form payload.
    pub fn is_locked(&self) -> bool {
        self.is_completed && self.submitted_date.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssessmentView {
    #[serde(flatten)]
    pub assessment: OasisAssessment,
    pub patient_name: String,
    pub clinician_name: String,
    pub completion_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OasisTemplate {
    pub id: Uuid,
    pub name: String,
    pub assessment_type: AssessmentType,
    pub discipline: Discipline,
    pub template_structure: serde_json::Value,
    pub version: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
