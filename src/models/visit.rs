use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{Discipline, NoteType, VisitStatus, VisitType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub clinician_id: Uuid,
    pub visit_type: VisitType,
    pub status: VisitStatus,
    pub scheduled_date: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub chief_complaint: Option<String>,
    pub vital_signs: serde_json::Value,
    pub assessment: Option<String>,
    pub plan: Option<String>,
    pub ai_summary: Option<String>,
    pub ai_recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Visit {
    /// Minutes between start and end, once both are recorded.
    pub fn duration_minutes(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_minutes()),
            _ => None,
        }
    }
}

/// Visit projection with names resolved and duration derived.
#[derive(Debug, Clone, Serialize)]
pub struct VisitView {
    #[serde(flatten)]
    pub visit: Visit,
    pub patient_name: String,
    pub clinician_name: String,
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitNote {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub note_type: NoteType,
    pub title: Option<String>,
    pub content: String,
    pub structured_data: serde_json::Value,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentationTemplate {
    pub id: Uuid,
    pub name: String,
    pub discipline: Discipline,
    pub template_data: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
