//! OASIS assessments: form capture, submission, generated analysis, bulk
//! operations and aggregate reporting.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::access::{can_view, scope_query, Actor, Resource, ResourceKind};
use crate::db::repository::{self, Joined};
use crate::error::{CareError, FieldErrors};
use crate::models::*;
use crate::patients::visible_patient;
use crate::pipeline::generation::{parse_assessment_analysis, ContentGenerator, ContentKind};

/// Score fields of a write. `null` clears an item; absent leaves it alone on
/// partial updates.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScoreInput {
    #[serde(default, deserialize_with = "nullable")]
    pub grooming: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub dressing_upper: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub dressing_lower: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub bathing: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub toileting: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub transferring: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub ambulation: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub feeding: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub cognitive_functioning: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub vision: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub hearing: Option<Option<i32>>,
}

impl ScoreInput {
    fn apply(self, scores: &mut FunctionalScores, partial: bool) {
        let set = |slot: &mut Option<i32>, value: Option<Option<i32>>| match value {
            Some(v) => *slot = v,
            None if !partial => *slot = None,
            None => {}
        };
        set(&mut scores.grooming, self.grooming);
        set(&mut scores.dressing_upper, self.dressing_upper);
        set(&mut scores.dressing_lower, self.dressing_lower);
        set(&mut scores.bathing, self.bathing);
        set(&mut scores.toileting, self.toileting);
        set(&mut scores.transferring, self.transferring);
        set(&mut scores.ambulation, self.ambulation);
        set(&mut scores.feeding, self.feeding);
        set(&mut scores.cognitive_functioning, self.cognitive_functioning);
        set(&mut scores.vision, self.vision);
        set(&mut scores.hearing, self.hearing);
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssessmentInput {
    pub patient_id: Option<Uuid>,
    pub assessment_type: Option<String>,
    pub assessment_date: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub zip_code: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub birth_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub gender: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub race_ethnicity: Option<Option<String>>,
    pub prior_functioning_adl: Option<Value>,
    pub prior_functioning_iadl: Option<Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub primary_diagnosis: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub other_diagnoses: Option<Option<String>>,
    #[serde(flatten)]
    pub scores: ScoreInput,
    pub complete_data: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkCreateRequest {
    #[serde(default)]
    pub patient_ids: Vec<Uuid>,
    pub assessment_type: Option<String>,
    pub template_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkSubmitRequest {
    #[serde(default)]
    pub assessment_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkResult {
    pub count: usize,
    pub assessment_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub assessment_id: Uuid,
    pub completion_percentage: f64,
    pub missing_fields: Vec<&'static str>,
    pub is_completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelinePatient {
    pub id: Uuid,
    pub name: String,
    pub date_of_birth: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub id: Uuid,
    pub assessment_type: AssessmentType,
    pub assessment_date: NaiveDate,
    pub is_completed: bool,
    pub clinician: String,
    pub primary_diagnosis: Option<String>,
    pub scores: FunctionalScores,
    pub risk_scores: Option<BTreeMap<String, f64>>,
    pub completion_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Timeline {
    pub patient: TimelinePatient,
    pub assessments: Vec<TimelineEntry>,
    pub total_assessments: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RiskStratification {
    pub low_risk: usize,
    pub moderate_risk: usize,
    pub high_risk: usize,
    pub not_analyzed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityMeasures {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_assessments: usize,
    pub completed_assessments: usize,
    pub completion_rate: f64,
    pub by_type: BTreeMap<&'static str, usize>,
    pub average_items_scored: f64,
    pub average_item_scores: BTreeMap<&'static str, f64>,
    pub risk_stratification: RiskStratification,
}

// ═══════════════════════════════════════════════════════════
// Derived values
// ═══════════════════════════════════════════════════════════

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Answered share of `complete_data.sections[].questions[]`, in percent.
/// A question counts as answered when its `answer` is present and not null.
pub fn completion_percentage(complete_data: &Value) -> f64 {
    let questions = complete_data
        .get("sections")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|s| s.get("questions").and_then(Value::as_array))
        .flatten();
    let (mut total, mut answered) = (0usize, 0usize);
    for q in questions {
        total += 1;
        if q.get("answer").is_some_and(|a| !a.is_null()) {
            answered += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        round2(answered as f64 / total as f64 * 100.0)
    }
}

/// Fields that must be filled before submission.
pub fn missing_fields(a: &OasisAssessment) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if a.primary_diagnosis.as_deref().map_or(true, |d| d.trim().is_empty()) {
        missing.push("primary_diagnosis");
    }
    missing
}

pub fn to_view(joined: Joined<OasisAssessment>) -> AssessmentView {
    AssessmentView {
        completion_percentage: completion_percentage(&joined.record.complete_data),
        assessment: joined.record,
        patient_name: joined.patient_name,
        clinician_name: joined.user_name,
    }
}

fn is_visible(actor: &Actor, joined: &Joined<OasisAssessment>) -> bool {
    can_view(
        actor,
        ResourceKind::Assessment,
        Resource::Record {
            patient_physician: joined.patient_physician,
            clinician: Some(joined.record.clinician_id),
        },
    )
}

fn visible_assessment(conn: &Connection, actor: &Actor, id: &Uuid) -> Result<Joined<OasisAssessment>, CareError> {
    repository::get_assessment(conn, id)?
        .filter(|j| is_visible(actor, j))
        .ok_or_else(|| CareError::not_found("assessment", id))
}

/// Patient check for new assessments: visible and active.
fn assessable_patient(conn: &Connection, actor: &Actor, id: &Uuid) -> Result<Patient, String> {
    match repository::get_patient(conn, id) {
        Ok(Some(p)) if !p.is_active => Err("Cannot create an assessment for an inactive patient.".into()),
        Ok(Some(_)) => visible_patient(conn, actor, id)
            .map_err(|_| "Patient not found or not accessible.".to_string()),
        Ok(None) => Err("Patient not found or not accessible.".into()),
        Err(e) => Err(e.to_string()),
    }
}

// ═══════════════════════════════════════════════════════════
// CRUD
// ═══════════════════════════════════════════════════════════

pub fn create(
    conn: &Connection,
    actor: &Actor,
    input: AssessmentInput,
    now: DateTime<Utc>,
) -> Result<AssessmentView, CareError> {
    let today = now.date_naive();
    let mut errors = FieldErrors::new();
    match input.patient_id {
        Some(pid) => {
            if let Err(msg) = assessable_patient(conn, actor, &pid) {
                errors.add("patient_id", msg);
            }
        }
        None => errors.add("patient_id", "This field is required."),
    }
    let mut assessment = repository::new_assessment(
        input.patient_id.unwrap_or_default(),
        actor.id,
        AssessmentType::StartOfCare,
        today,
        now,
    );
    apply_input(&mut assessment, input, false, today, errors)?;
    repository::insert_assessment(conn, &assessment)?;
    tracing::info!(assessment_id = %assessment.id, kind = %assessment.assessment_type, "Assessment created");
    get(conn, actor, &assessment.id)
}

pub fn list(
    conn: &Connection,
    actor: &Actor,
    filter: &AssessmentFilter,
    page: &Page,
) -> Result<Paged<AssessmentView>, CareError> {
    let scope = scope_query(actor, ResourceKind::Assessment);
    let paged = repository::list_assessments(conn, &scope, filter, page)?;
    Ok(Paged {
        count: paged.count,
        results: paged.results.into_iter().map(to_view).collect(),
    })
}

/// Pending (`completed = false`) or completed assessments.
pub fn list_by_completion(
    conn: &Connection,
    actor: &Actor,
    completed: bool,
    page: &Page,
) -> Result<Paged<AssessmentView>, CareError> {
    let filter = AssessmentFilter {
        is_completed: Some(completed),
        ..Default::default()
    };
    list(conn, actor, &filter, page)
}

pub fn get(conn: &Connection, actor: &Actor, id: &Uuid) -> Result<AssessmentView, CareError> {
    visible_assessment(conn, actor, id).map(to_view)
}

/// Full or partial update. The form payload of a submitted assessment is
/// frozen; its other fields remain editable.
pub fn update(
    conn: &Connection,
    actor: &Actor,
    id: &Uuid,
    input: AssessmentInput,
    partial: bool,
    now: DateTime<Utc>,
) -> Result<AssessmentView, CareError> {
    let mut assessment = visible_assessment(conn, actor, id)?.record;
    let mut errors = FieldErrors::new();
    if assessment.is_locked() && input.complete_data.is_some() {
        errors.add("complete_data", "Cannot modify completed assessment data");
    }
    if input.patient_id.is_some_and(|p| p != assessment.patient_id) {
        errors.add("patient_id", "An assessment cannot be moved to another patient.");
    }
    apply_input(&mut assessment, input, partial, now.date_naive(), errors)?;
    assessment.updated_at = now;
    repository::update_assessment(conn, &assessment)?;
    get(conn, actor, id)
}

pub fn delete(conn: &Connection, actor: &Actor, id: &Uuid) -> Result<(), CareError> {
    visible_assessment(conn, actor, id)?;
    repository::delete_assessment(conn, id)?;
    Ok(())
}

fn parse_date(errors: &mut FieldErrors, field: &str, raw: &str) -> Option<NaiveDate> {
    let parsed = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok();
    errors.check(parsed.is_some(), field, "Enter a valid date (YYYY-MM-DD).");
    parsed
}

fn apply_input(
    a: &mut OasisAssessment,
    input: AssessmentInput,
    partial: bool,
    today: NaiveDate,
    mut errors: FieldErrors,
) -> Result<(), CareError> {
    let assessment_type = match input.assessment_type.as_deref() {
        Some(raw) => {
            let parsed = raw.trim().parse::<AssessmentType>().ok();
            errors.check(parsed.is_some(), "assessment_type", format!("\"{raw}\" is not a valid choice."));
            parsed
        }
        None => {
            if !partial {
                errors.add("assessment_type", "This field is required.");
            }
            None
        }
    };
    let assessment_date = input
        .assessment_date
        .as_deref()
        .and_then(|raw| parse_date(&mut errors, "assessment_date", raw));
    if assessment_date.is_some_and(|d| d > today) {
        errors.add("assessment_date", "Assessment date cannot be in the future.");
    }
    let birth_date = match input.birth_date {
        Some(Some(raw)) => parse_date(&mut errors, "birth_date", &raw).map(Some),
        Some(None) => Some(None),
        None if !partial => Some(None),
        None => None,
    };
    for (field, value) in [
        ("prior_functioning_adl", &input.prior_functioning_adl),
        ("prior_functioning_iadl", &input.prior_functioning_iadl),
        ("complete_data", &input.complete_data),
    ] {
        if let Some(v) = value {
            errors.check(v.is_object(), field, "Must be a JSON object.");
        }
    }

    let mut scores = a.scores.clone();
    input.scores.apply(&mut scores, partial);
    for (item, value, max) in scores.items() {
        if let Some(v) = value {
            errors.check((0..=max).contains(&v), item, format!("Ensure this value is between 0 and {max}."));
        }
    }
    errors.finish()?;

    if let Some(v) = assessment_type {
        a.assessment_type = v;
    }
    if let Some(v) = assessment_date {
        a.assessment_date = v;
    }
    if let Some(v) = birth_date {
        a.birth_date = v;
    }
    a.scores = scores;

    let set = |slot: &mut Option<String>, value: Option<Option<String>>| match value {
        Some(v) => *slot = v.filter(|s| !s.trim().is_empty()),
        None if !partial => *slot = None,
        None => {}
    };
    set(&mut a.zip_code, input.zip_code);
    set(&mut a.gender, input.gender);
    set(&mut a.race_ethnicity, input.race_ethnicity);
    set(&mut a.primary_diagnosis, input.primary_diagnosis);
    set(&mut a.other_diagnoses, input.other_diagnoses);

    let set_json = |slot: &mut Value, value: Option<Value>| match value {
        Some(v) => *slot = v,
        None if !partial => *slot = json!({}),
        None => {}
    };
    set_json(&mut a.prior_functioning_adl, input.prior_functioning_adl);
    set_json(&mut a.prior_functioning_iadl, input.prior_functioning_iadl);
    // A locked form keeps its payload even on a full update.
    if !a.is_locked() || input.complete_data.is_some() {
        set_json(&mut a.complete_data, input.complete_data);
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Submission and analysis
// ═══════════════════════════════════════════════════════════

pub fn submit(conn: &Connection, actor: &Actor, id: &Uuid, now: DateTime<Utc>) -> Result<AssessmentView, CareError> {
    let assessment = visible_assessment(conn, actor, id)?.record;
    if assessment.submitted_date.is_some() {
        return Err(CareError::conflict("assessment", "submitted", "submit"));
    }
    let missing = missing_fields(&assessment);
    if !missing.is_empty() {
        let mut errors = FieldErrors::new();
        for field in missing {
            errors.add("missing_fields", field);
        }
        return Err(CareError::Validation(errors));
    }
    if !repository::mark_assessment_submitted(conn, id, now)? {
        return Err(CareError::conflict("assessment", "submitted", "submit"));
    }
    tracing::info!(assessment_id = %id, "Assessment submitted");
    get(conn, actor, id)
}

pub fn completion(conn: &Connection, actor: &Actor, id: &Uuid) -> Result<Completion, CareError> {
    let a = visible_assessment(conn, actor, id)?.record;
    Ok(Completion {
        assessment_id: a.id,
        completion_percentage: completion_percentage(&a.complete_data),
        missing_fields: missing_fields(&a),
        is_completed: a.is_completed,
    })
}

/// Run the generator over the assessment and store the validated analysis.
pub fn analyze(
    conn: &Connection,
    generator: &dyn ContentGenerator,
    actor: &Actor,
    id: &Uuid,
    now: DateTime<Utc>,
) -> Result<AssessmentView, CareError> {
    let joined = visible_assessment(conn, actor, id)?;
    let a = &joined.record;
    let scores: serde_json::Map<String, Value> = a
        .scores
        .items()
        .iter()
        .filter_map(|(item, value, _)| value.map(|v| (item.to_string(), json!(v))))
        .collect();
    let context = json!({
        "patient_name": joined.patient_name,
        "assessment_type": a.assessment_type,
        "assessment_date": a.assessment_date.to_string(),
        "primary_diagnosis": a.primary_diagnosis,
        "other_diagnoses": a.other_diagnoses,
        "scores": scores,
        "completion_percentage": completion_percentage(&a.complete_data),
        "days_since_assessment": (now.date_naive() - a.assessment_date).num_days(),
    });

    let response = generator.generate(ContentKind::AssessmentAnalysis, &context)?;
    let analysis = parse_assessment_analysis(&response, now)?;
    repository::set_assessment_analysis(conn, id, &analysis)?;
    get(conn, actor, id)
}

// ═══════════════════════════════════════════════════════════
// Bulk operations
// ═══════════════════════════════════════════════════════════

/// One blank assessment per patient, all or nothing. Per-patient problems are
/// reported under the patient id.
pub fn bulk_create(
    conn: &mut Connection,
    actor: &Actor,
    request: BulkCreateRequest,
    now: DateTime<Utc>,
) -> Result<BulkResult, CareError> {
    let mut errors = FieldErrors::new();
    if request.patient_ids.is_empty() {
        errors.add("patient_ids", "This field is required.");
    }
    let assessment_type = match request.assessment_type.as_deref() {
        Some(raw) => {
            let parsed = raw.parse::<AssessmentType>().ok();
            errors.check(parsed.is_some(), "assessment_type", format!("\"{raw}\" is not a valid choice."));
            parsed
        }
        None => {
            errors.add("assessment_type", "This field is required.");
            None
        }
    };
    let form = match request.template_id {
        Some(tid) => match repository::get_oasis_template(conn, &tid)? {
            Some(t) if t.is_active => Some(t.template_structure),
            _ => {
                errors.add("template_id", "Template not found.");
                None
            }
        },
        None => None,
    };
    for pid in &request.patient_ids {
        if let Err(msg) = assessable_patient(conn, actor, pid) {
            errors.add(&pid.to_string(), msg);
        }
    }
    errors.finish()?;
    let Some(assessment_type) = assessment_type else {
        return Err(CareError::invalid("assessment_type", "This field is required."));
    };

    let tx = conn.transaction()?;
    let mut ids = Vec::with_capacity(request.patient_ids.len());
    for pid in &request.patient_ids {
        let mut a = repository::new_assessment(*pid, actor.id, assessment_type, now.date_naive(), now);
        if let Some(form) = &form {
            a.complete_data = form.clone();
        }
        repository::insert_assessment(&tx, &a)?;
        ids.push(a.id);
    }
    tx.commit()?;
    tracing::info!(count = ids.len(), "Assessments bulk-created");
    Ok(BulkResult {
        count: ids.len(),
        assessment_ids: ids,
    })
}

/// Submit every listed assessment, all or nothing. Problems are reported
/// under each assessment id.
pub fn bulk_submit(
    conn: &mut Connection,
    actor: &Actor,
    request: BulkSubmitRequest,
    now: DateTime<Utc>,
) -> Result<BulkResult, CareError> {
    let mut seen = BTreeSet::new();
    let mut assessment_ids = request.assessment_ids;
    assessment_ids.retain(|id| seen.insert(*id));

    let mut errors = FieldErrors::new();
    if assessment_ids.is_empty() {
        errors.add("assessment_ids", "This field is required.");
    }
    for id in &assessment_ids {
        let key = id.to_string();
        match visible_assessment(conn, actor, id) {
            Ok(j) if j.record.submitted_date.is_some() => errors.add(&key, "Assessment already submitted."),
            Ok(j) => {
                let missing = missing_fields(&j.record);
                if !missing.is_empty() {
                    errors.add(&key, format!("Missing fields: {}", missing.join(", ")));
                }
            }
            Err(CareError::NotFound { .. }) => errors.add(&key, "Assessment not found."),
            Err(e) => return Err(e),
        }
    }
    errors.finish()?;

    let tx = conn.transaction()?;
    for id in &assessment_ids {
        if !repository::mark_assessment_submitted(&tx, id, now)? {
            return Err(CareError::conflict("assessment", "submitted", "submit"));
        }
    }
    tx.commit()?;
    Ok(BulkResult {
        count: assessment_ids.len(),
        assessment_ids,
    })
}

// ═══════════════════════════════════════════════════════════
// Reporting
// ═══════════════════════════════════════════════════════════

pub fn timeline(conn: &Connection, actor: &Actor, patient_id: &Uuid) -> Result<Timeline, CareError> {
    let patient = visible_patient(conn, actor, patient_id)?;
    let filter = AssessmentFilter {
        patient_id: Some(*patient_id),
        ..Default::default()
    };
    let scope = scope_query(actor, ResourceKind::Assessment);
    let assessments: Vec<TimelineEntry> = repository::all_assessments(conn, &scope, &filter)?
        .into_iter()
        .map(|j| {
            let a = j.record;
            TimelineEntry {
                id: a.id,
                assessment_type: a.assessment_type,
                assessment_date: a.assessment_date,
                is_completed: a.is_completed,
                clinician: j.user_name,
                completion_percentage: completion_percentage(&a.complete_data),
                primary_diagnosis: a.primary_diagnosis,
                scores: a.scores,
                risk_scores: a.analysis.map(|an| an.risk_scores),
            }
        })
        .collect();
    Ok(Timeline {
        patient: TimelinePatient {
            id: patient.id,
            name: patient.full_name(),
            date_of_birth: patient.date_of_birth,
        },
        total_assessments: assessments.len(),
        assessments,
    })
}

/// Aggregates over assessments dated within `[start, end]`. The range
/// defaults to the current calendar year up to today.
pub fn quality_measures(
    conn: &Connection,
    actor: &Actor,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<QualityMeasures, CareError> {
    let start_date = start
        .or_else(|| NaiveDate::from_ymd_opt(today.year(), 1, 1))
        .unwrap_or(today);
    let end_date = end.unwrap_or(today);
    if start_date > end_date {
        return Err(CareError::invalid("start_date", "start_date must not be after end_date."));
    }

    let filter = AssessmentFilter {
        date_from: Some(start_date),
        date_to: Some(end_date),
        ..Default::default()
    };
    let scope = scope_query(actor, ResourceKind::Assessment);
    let rows = repository::all_assessments(conn, &scope, &filter)?;

    let total = rows.len();
    let completed = rows.iter().filter(|j| j.record.is_completed).count();
    let mut by_type: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut item_sums: BTreeMap<&'static str, (f64, usize)> = BTreeMap::new();
    let mut scored_items = 0usize;
    let mut risk = RiskStratification::default();

    for j in &rows {
        let a = &j.record;
        *by_type.entry(a.assessment_type.as_str()).or_default() += 1;
        for (item, value, _) in a.scores.items() {
            if let Some(v) = value {
                scored_items += 1;
                let entry = item_sums.entry(item).or_default();
                entry.0 += f64::from(v);
                entry.1 += 1;
            }
        }
        match a
            .analysis
            .as_ref()
            .and_then(|an| an.risk_scores.get("hospitalization_risk"))
        {
            Some(r) if *r < 40.0 => risk.low_risk += 1,
            Some(r) if *r < 70.0 => risk.moderate_risk += 1,
            Some(_) => risk.high_risk += 1,
            None => risk.not_analyzed += 1,
        }
    }

    let ratio = |n: usize| if total == 0 { 0.0 } else { n as f64 / total as f64 };
    Ok(QualityMeasures {
        start_date,
        end_date,
        total_assessments: total,
        completed_assessments: completed,
        completion_rate: round2(ratio(completed) * 100.0),
        by_type,
        average_items_scored: round2(ratio(scored_items)),
        average_item_scores: item_sums
            .into_iter()
            .map(|(item, (sum, n))| (item, round2(sum / n as f64)))
            .collect(),
        risk_stratification: risk,
    })
}

// ── Templates ───────────────────────────────────────────────

pub fn templates(
    conn: &Connection,
    assessment_type: Option<&str>,
    discipline: Option<&str>,
) -> Result<Vec<OasisTemplate>, CareError> {
    let mut errors = FieldErrors::new();
    let assessment_type = assessment_type.and_then(|raw| {
        let parsed = raw.parse::<AssessmentType>().ok();
        errors.check(parsed.is_some(), "assessment_type", format!("\"{raw}\" is not a valid choice."));
        parsed
    });
    let discipline = discipline.and_then(|raw| {
        let parsed = raw.parse::<Discipline>().ok();
        errors.check(parsed.is_some(), "discipline", format!("\"{raw}\" is not a valid choice."));
        parsed
    });
    errors.finish()?;
    let filter = OasisTemplateFilter {
        assessment_type,
        discipline,
    };
    Ok(repository::list_oasis_templates(conn, &filter)?)
}

pub fn template(conn: &Connection, id: &Uuid) -> Result<OasisTemplate, CareError> {
    repository::get_oasis_template(conn, id)?
        .filter(|t| t.is_active)
        .ok_or_else(|| CareError::not_found("oasis template", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::fixtures::{make_patient, make_user};
    use crate::db::sqlite::open_memory_database;
    use crate::pipeline::generation::{MockGenerator, TemplateGenerator};

    fn actor(user: &User) -> Actor {
        Actor::new(user.id, user.role)
    }

    fn input(patient_id: Uuid) -> AssessmentInput {
        AssessmentInput {
            patient_id: Some(patient_id),
            assessment_type: Some("SOC".into()),
            ..Default::default()
        }
    }

    fn form(answers: &[Option<&str>]) -> Value {
        let questions: Vec<Value> = answers
            .iter()
            .enumerate()
            .map(|(i, a)| match a {
                Some(a) => json!({"id": format!("Q{i}"), "answer": a}),
                None => json!({"id": format!("Q{i}")}),
            })
            .collect();
        json!({"sections": [{"id": "S1", "questions": questions}]})
    }

    #[test]
    fn completion_percentage_counts_answers() {
        assert_eq!(completion_percentage(&json!({})), 0.0);
        assert_eq!(completion_percentage(&form(&[Some("yes"), None, None])), 33.33);
        assert_eq!(completion_percentage(&form(&[Some("a"), Some("b")])), 100.0);
        let with_null = json!({"sections": [{"questions": [{"answer": null}, {"answer": 0}]}]});
        assert_eq!(completion_percentage(&with_null), 50.0);
    }

    #[test]
    fn create_defaults_date_and_validates_scores() {
        let conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "O1", None);
        let now = Utc::now();
        let view = create(&conn, &actor(&nurse), input(patient.id), now).unwrap();
        assert_eq!(view.assessment.assessment_date, now.date_naive());
        assert_eq!(view.assessment.clinician_id, nurse.id);

        let mut bad = input(patient.id);
        bad.scores.cognitive_functioning = Some(Some(5));
        bad.scores.vision = Some(Some(2));
        bad.assessment_date = Some((now.date_naive() + chrono::Duration::days(2)).to_string());
        let Err(CareError::Validation(errors)) = create(&conn, &actor(&nurse), bad, now) else {
            panic!("expected validation error");
        };
        assert!(errors.contains("cognitive_functioning"));
        assert!(errors.contains("assessment_date"));
        assert!(!errors.contains("vision"));
    }

    #[test]
    fn inactive_patient_is_rejected_on_patient_id() {
        let conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let mut patient = make_patient(&conn, "O2", None);
        patient.is_active = false;
        repository::update_patient(&conn, &patient).unwrap();

        let err = create(&conn, &actor(&nurse), input(patient.id), Utc::now()).unwrap_err();
        let CareError::Validation(errors) = err else { panic!("expected validation error") };
        assert!(errors.get("patient_id").unwrap()[0].contains("inactive"));
    }

    #[test]
    fn submit_requires_diagnosis_then_locks_form() {
        let conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "O3", None);
        let a = actor(&nurse);
        let id = create(&conn, &a, input(patient.id), Utc::now()).unwrap().assessment.id;

        let Err(CareError::Validation(errors)) = submit(&conn, &a, &id, Utc::now()) else {
            panic!("expected missing fields");
        };
        assert_eq!(errors.get("missing_fields").unwrap(), ["primary_diagnosis".to_string()]);

        let patch = AssessmentInput {
            primary_diagnosis: Some(Some("CHF".into())),
            ..Default::default()
        };
        update(&conn, &a, &id, patch, true, Utc::now()).unwrap();
        let submitted = submit(&conn, &a, &id, Utc::now()).unwrap();
        assert!(submitted.assessment.is_completed && submitted.assessment.submitted_date.is_some());
        assert!(matches!(submit(&conn, &a, &id, Utc::now()), Err(CareError::StateConflict { .. })));

        let touch_form = AssessmentInput {
            complete_data: Some(form(&[Some("x")])),
            ..Default::default()
        };
        let err = update(&conn, &a, &id, touch_form, true, Utc::now()).unwrap_err();
        assert!(matches!(err, CareError::Validation(ref e) if e.contains("complete_data")));

        let other_field = AssessmentInput {
            other_diagnoses: Some(Some("Diabetes".into())),
            ..Default::default()
        };
        let updated = update(&conn, &a, &id, other_field, true, Utc::now()).unwrap();
        assert_eq!(updated.assessment.other_diagnoses.as_deref(), Some("Diabetes"));
    }

    #[test]
    fn analyze_stores_validated_output_only() {
        let conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "O4", None);
        let a = actor(&nurse);
        let mut with_scores = input(patient.id);
        with_scores.scores.ambulation = Some(Some(3));
        with_scores.scores.transferring = Some(Some(2));
        let id = create(&conn, &a, with_scores, Utc::now()).unwrap().assessment.id;

        let bad = MockGenerator::new(r#"{"risk_scores": {"overall_risk": 150}}"#);
        assert!(matches!(analyze(&conn, &bad, &a, &id, Utc::now()), Err(CareError::Generation(_))));
        assert!(get(&conn, &a, &id).unwrap().assessment.analysis.is_none());

        let view = analyze(&conn, &TemplateGenerator, &a, &id, Utc::now()).unwrap();
        let analysis = view.assessment.analysis.unwrap();
        assert!(analysis.risk_scores["fall_risk"] > 50.0);
        assert!((0.0..=1.0).contains(&analysis.confidence_score));
    }

    #[test]
    fn bulk_create_is_all_or_nothing() {
        let mut conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let p1 = make_patient(&conn, "B1", None);
        let p2 = make_patient(&conn, "B2", None);
        let a = actor(&nurse);
        let missing = Uuid::new_v4();

        let request = BulkCreateRequest {
            patient_ids: vec![p1.id, missing],
            assessment_type: Some("RECERT".into()),
            template_id: None,
        };
        let Err(CareError::Validation(errors)) = bulk_create(&mut conn, &a, request, Utc::now()) else {
            panic!("expected validation error");
        };
        assert!(errors.contains(&missing.to_string()));
        assert_eq!(list(&conn, &a, &AssessmentFilter::default(), &Page::default()).unwrap().count, 0);

        let template_id = templates(&conn, Some("SOC"), Some("SN")).unwrap()[0].id;
        let request = BulkCreateRequest {
            patient_ids: vec![p1.id, p2.id],
            assessment_type: Some("SOC".into()),
            template_id: Some(template_id),
        };
        let created = bulk_create(&mut conn, &a, request, Utc::now()).unwrap();
        assert_eq!(created.count, 2);
        let first = get(&conn, &a, &created.assessment_ids[0]).unwrap();
        assert!(first.assessment.complete_data.get("sections").is_some());
        assert_eq!(first.completion_percentage, 0.0);
    }

    #[test]
    fn bulk_submit_reports_per_id_errors() {
        let mut conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "B3", None);
        let a = actor(&nurse);
        let mut ready = input(patient.id);
        ready.primary_diagnosis = Some(Some("COPD".into()));
        let ok_id = create(&conn, &a, ready, Utc::now()).unwrap().assessment.id;
        let bad_id = create(&conn, &a, input(patient.id), Utc::now()).unwrap().assessment.id;

        let request = BulkSubmitRequest {
            assessment_ids: vec![ok_id, bad_id],
        };
        let Err(CareError::Validation(errors)) = bulk_submit(&mut conn, &a, request, Utc::now()) else {
            panic!("expected validation error");
        };
        assert!(errors.contains(&bad_id.to_string()));
        assert!(!errors.contains(&ok_id.to_string()));
        assert!(!get(&conn, &a, &ok_id).unwrap().assessment.is_completed);

        let done = bulk_submit(&mut conn, &a, BulkSubmitRequest { assessment_ids: vec![ok_id] }, Utc::now()).unwrap();
        assert_eq!(done.count, 1);
        let pending = list_by_completion(&conn, &a, false, &Page::default()).unwrap();
        let completed = list_by_completion(&conn, &a, true, &Page::default()).unwrap();
        assert_eq!((pending.count, completed.count), (1, 1));
    }

    #[test]
    fn bulk_submit_ignores_repeated_ids() {
        let mut conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "B4", None);
        let a = actor(&nurse);
        let mut ready = input(patient.id);
        ready.primary_diagnosis = Some(Some("CHF".into()));
        let id = create(&conn, &a, ready, Utc::now()).unwrap().assessment.id;

        let request = BulkSubmitRequest {
            assessment_ids: vec![id, id, id],
        };
        let done = bulk_submit(&mut conn, &a, request, Utc::now()).unwrap();
        assert_eq!(done.count, 1);
        assert_eq!(done.assessment_ids, vec![id]);
        assert!(get(&conn, &a, &id).unwrap().assessment.is_completed);
    }

    #[test]
    fn timeline_and_quality_measures() {
        let conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "T1", None);
        let a = actor(&nurse);
        let today = Utc::now().date_naive();

        let mut early = input(patient.id);
        early.assessment_date = Some((today - chrono::Duration::days(3)).to_string());
        early.scores.grooming = Some(Some(2));
        early.primary_diagnosis = Some(Some("CHF".into()));
        let first = create(&conn, &a, early, Utc::now()).unwrap().assessment.id;
        submit(&conn, &a, &first, Utc::now()).unwrap();
        let mut later = input(patient.id);
        later.assessment_type = Some("FU".into());
        later.scores.grooming = Some(Some(1));
        create(&conn, &a, later, Utc::now()).unwrap();

        let timeline = timeline(&conn, &a, &patient.id).unwrap();
        assert_eq!(timeline.total_assessments, 2);
        assert_eq!(timeline.assessments[0].id, first);

        let measures = quality_measures(&conn, &a, Some(today - chrono::Duration::days(7)), None, today).unwrap();
        assert_eq!(measures.total_assessments, 2);
        assert_eq!(measures.completion_rate, 50.0);
        assert_eq!(measures.by_type["SOC"], 1);
        assert_eq!(measures.average_item_scores["grooming"], 1.5);
        assert_eq!(measures.risk_stratification.not_analyzed, 2);
        assert!(quality_measures(&conn, &a, Some(today), Some(today - chrono::Duration::days(1)), today).is_err());
    }

    #[test]
    fn physician_scope_hides_unassigned_assessments() {
        let conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let doc = make_user(&conn, "doc", Role::Physician);
        let patient = make_patient(&conn, "S1", None);
        let id = create(&conn, &actor(&nurse), input(patient.id), Utc::now()).unwrap().assessment.id;
        assert!(matches!(get(&conn, &actor(&doc), &id), Err(CareError::NotFound { .. })));
        let therapist = make_user(&conn, "pt", Role::PhysicalTherapist);
        assert!(get(&conn, &actor(&therapist), &id).is_ok());
    }
}
