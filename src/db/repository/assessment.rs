use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use super::{count_rows, Joined, ScopeTarget, SqlFilter};
use crate::access::Scope;
use crate::db::{
    decode_date, decode_json, decode_json_as, decode_opt_timestamp, decode_opt_uuid,
    decode_timestamp, decode_uuid, encode_timestamp, DatabaseError,
};
use crate::models::*;

const ASSESSMENT_SELECT: &str = "SELECT a.id, a.patient_id, a.clinician_id, a.assessment_type,
     a.assessment_date, a.zip_code, a.birth_date, a.gender, a.race_ethnicity,
     a.prior_functioning_adl, a.prior_functioning_iadl, a.primary_diagnosis, a.other_diagnoses,
     a.grooming, a.dressing_upper, a.dressing_lower, a.bathing, a.toileting, a.transferring,
     a.ambulation, a.feeding, a.cognitive_functioning, a.vision, a.hearing,
     a.complete_data, a.risk_scores, a.ai_insights, a.recommendations, a.quality_indicators,
     a.confidence_score, a.analyzed_at, a.is_completed, a.submitted_date, a.created_at,
     a.updated_at,
     p.first_name || ' ' || p.last_name, p.assigned_physician,
     TRIM(u.first_name || ' ' || u.last_name)";

const ASSESSMENT_FROM: &str = "FROM oasis_assessments a
     JOIN patients p ON p.id = a.patient_id
     JOIN users u ON u.id = a.clinician_id";

pub fn insert_assessment(conn: &Connection, a: &OasisAssessment) -> Result<(), DatabaseError> {
    let s = &a.scores;
    conn.execute(
        "INSERT INTO oasis_assessments (id, patient_id, clinician_id, assessment_type,
         assessment_date, zip_code, birth_date, gender, race_ethnicity, prior_functioning_adl,
         prior_functioning_iadl, primary_diagnosis, other_diagnoses, grooming, dressing_upper,
         dressing_lower, bathing, toileting, transferring, ambulation, feeding,
         cognitive_functioning, vision, hearing, complete_data, is_completed, submitted_date,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29)",
        params![
            a.id.to_string(),
            a.patient_id.to_string(),
            a.clinician_id.to_string(),
            a.assessment_type.as_str(),
            a.assessment_date.to_string(),
            a.zip_code,
            a.birth_date.map(|d| d.to_string()),
            a.gender,
            a.race_ethnicity,
            a.prior_functioning_adl.to_string(),
            a.prior_functioning_iadl.to_string(),
            a.primary_diagnosis,
            a.other_diagnoses,
            s.grooming,
            s.dressing_upper,
            s.dressing_lower,
            s.bathing,
            s.toileting,
            s.transferring,
            s.ambulation,
            s.feeding,
            s.cognitive_functioning,
            s.vision,
            s.hearing,
            a.complete_data.to_string(),
            a.is_completed as i32,
            a.submitted_date.as_ref().map(encode_timestamp),
            encode_timestamp(&a.created_at),
            encode_timestamp(&a.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_assessment(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<Joined<OasisAssessment>>, DatabaseError> {
    let sql = format!("{ASSESSMENT_SELECT} {ASSESSMENT_FROM} WHERE a.id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params![id.to_string()], assessment_row_from_rusqlite);
    match result {
        Ok(row) => Ok(Some(assessment_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Scoped, filtered, paged assessments, newest assessment date first.
pub fn list_assessments(
    conn: &Connection,
    scope: &Scope,
    filter: &AssessmentFilter,
    page: &Page,
) -> Result<Paged<Joined<OasisAssessment>>, DatabaseError> {
    let f = assessment_filter(scope, filter);
    let count = count_rows(conn, ASSESSMENT_FROM, &f)?;
    let sql = f.paged(
        &format!("{ASSESSMENT_SELECT} {ASSESSMENT_FROM}"),
        "a.assessment_date DESC, a.created_at DESC",
        page.limit(),
        page.offset(),
    );
    let results = query_assessments(conn, &sql, &f)?;
    Ok(Paged { count, results })
}

/// Every assessment matching the filter, oldest first. Used for timelines
/// and quality measures, which aggregate over the whole range.
pub fn all_assessments(
    conn: &Connection,
    scope: &Scope,
    filter: &AssessmentFilter,
) -> Result<Vec<Joined<OasisAssessment>>, DatabaseError> {
    let f = assessment_filter(scope, filter);
    let sql = format!(
        "{ASSESSMENT_SELECT} {ASSESSMENT_FROM}{} ORDER BY a.assessment_date, a.created_at",
        f.sql()
    );
    query_assessments(conn, &sql, &f)
}

fn assessment_filter(scope: &Scope, filter: &AssessmentFilter) -> SqlFilter {
    let mut f = SqlFilter::new();
    f.scope(scope, ScopeTarget::Records { clinician: Some("a.clinician_id") });
    if let Some(patient_id) = filter.patient_id {
        f.and_eq("a.patient_id", patient_id.to_string());
    }
    if let Some(kind) = filter.assessment_type {
        f.and_eq("a.assessment_type", kind.as_str());
    }
    if let Some(done) = filter.is_completed {
        f.and_eq("a.is_completed", done as i32);
    }
    if let Some(from) = filter.date_from {
        f.and("a.assessment_date", ">=", from.to_string());
    }
    if let Some(to) = filter.date_to {
        f.and("a.assessment_date", "<=", to.to_string());
    }
    f
}

fn query_assessments(
    conn: &Connection,
    sql: &str,
    f: &SqlFilter,
) -> Result<Vec<Joined<OasisAssessment>>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(f.params().as_slice(), |row| Ok(assessment_row_from_rusqlite(row)))?;
    let mut results = Vec::new();
    for row in rows {
        results.push(assessment_from_row(row??)?);
    }
    Ok(results)
}

pub fn latest_assessment_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Option<Joined<OasisAssessment>>, DatabaseError> {
    let sql = format!(
        "{ASSESSMENT_SELECT} {ASSESSMENT_FROM} WHERE a.patient_id = ?1
         ORDER BY a.assessment_date DESC, a.created_at DESC LIMIT 1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params![patient_id.to_string()], assessment_row_from_rusqlite);
    match result {
        Ok(row) => Ok(Some(assessment_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write every user-editable column. Analysis and submission state are untouched.
pub fn update_assessment(conn: &Connection, a: &OasisAssessment) -> Result<(), DatabaseError> {
    let s = &a.scores;
    let changed = conn.execute(
        "UPDATE oasis_assessments SET assessment_type = ?2, assessment_date = ?3, zip_code = ?4,
         birth_date = ?5, gender = ?6, race_ethnicity = ?7, prior_functioning_adl = ?8,
         prior_functioning_iadl = ?9, primary_diagnosis = ?10, other_diagnoses = ?11,
         grooming = ?12, dressing_upper = ?13, dressing_lower = ?14, bathing = ?15,
         toileting = ?16, transferring = ?17, ambulation = ?18, feeding = ?19,
         cognitive_functioning = ?20, vision = ?21, hearing = ?22, complete_data = ?23,
         updated_at = ?24
         WHERE id = ?1",
        params![
            a.id.to_string(),
            a.assessment_type.as_str(),
            a.assessment_date.to_string(),
            a.zip_code,
            a.birth_date.map(|d| d.to_string()),
            a.gender,
            a.race_ethnicity,
            a.prior_functioning_adl.to_string(),
            a.prior_functioning_iadl.to_string(),
            a.primary_diagnosis,
            a.other_diagnoses,
            s.grooming,
            s.dressing_upper,
            s.dressing_lower,
            s.bathing,
            s.toileting,
            s.transferring,
            s.ambulation,
            s.feeding,
            s.cognitive_functioning,
            s.vision,
            s.hearing,
            a.complete_data.to_string(),
            encode_timestamp(&a.updated_at),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "OasisAssessment".into(),
            id: a.id.to_string(),
        });
    }
    Ok(())
}

pub fn set_assessment_analysis(
    conn: &Connection,
    id: &Uuid,
    analysis: &AssessmentAnalysis,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE oasis_assessments SET risk_scores = ?2, ai_insights = ?3, recommendations = ?4,
         quality_indicators = ?5, confidence_score = ?6, analyzed_at = ?7, updated_at = ?7
         WHERE id = ?1",
        params![
            id.to_string(),
            to_json(&analysis.risk_scores),
            to_json(&analysis.insights),
            to_json(&analysis.recommendations),
            to_json(&analysis.quality_indicators),
            analysis.confidence_score,
            encode_timestamp(&analysis.analyzed_at),
        ],
    )?;
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".into())
}

/// Mark completed and submitted. Returns `false` if it was already submitted.
pub fn mark_assessment_submitted(
    conn: &Connection,
    id: &Uuid,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE oasis_assessments SET is_completed = 1, submitted_date = ?2, updated_at = ?2
         WHERE id = ?1 AND submitted_date IS NULL",
        params![id.to_string(), encode_timestamp(&now)],
    )?;
    Ok(changed == 1)
}

pub fn delete_assessment(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM oasis_assessments WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(deleted > 0)
}

// ── Row mapping ─────────────────────────────────────────────

struct AssessmentRow {
    id: String,
    patient_id: String,
    clinician_id: String,
    assessment_type: String,
    assessment_date: String,
    zip_code: Option<String>,
    birth_date: Option<String>,
    gender: Option<String>,
    race_ethnicity: Option<String>,
    prior_functioning_adl: String,
    prior_functioning_iadl: String,
    primary_diagnosis: Option<String>,
    other_diagnoses: Option<String>,
    scores: [Option<i32>; 11],
    complete_data: String,
    risk_scores: Option<String>,
    ai_insights: Option<String>,
    recommendations: Option<String>,
    quality_indicators: Option<String>,
    confidence_score: Option<f64>,
    analyzed_at: Option<String>,
    is_completed: i32,
    submitted_date: Option<String>,
    created_at: String,
    updated_at: String,
    patient_name: String,
    patient_physician: Option<String>,
    clinician_name: String,
}

fn assessment_row_from_rusqlite(row: &Row<'_>) -> Result<AssessmentRow, rusqlite::Error> {
    let mut scores = [None; 11];
    for (i, slot) in scores.iter_mut().enumerate() {
        *slot = row.get(13 + i)?;
    }
    Ok(AssessmentRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        clinician_id: row.get(2)?,
        assessment_type: row.get(3)?,
        assessment_date: row.get(4)?,
        zip_code: row.get(5)?,
        birth_date: row.get(6)?,
        gender: row.get(7)?,
        race_ethnicity: row.get(8)?,
        prior_functioning_adl: row.get(9)?,
        prior_functioning_iadl: row.get(10)?,
        primary_diagnosis: row.get(11)?,
        other_diagnoses: row.get(12)?,
        scores,
        complete_data: row.get(24)?,
        risk_scores: row.get(25)?,
        ai_insights: row.get(26)?,
        recommendations: row.get(27)?,
        quality_indicators: row.get(28)?,
        confidence_score: row.get(29)?,
        analyzed_at: row.get(30)?,
        is_completed: row.get(31)?,
        submitted_date: row.get(32)?,
        created_at: row.get(33)?,
        updated_at: row.get(34)?,
        patient_name: row.get(35)?,
        patient_physician: row.get(36)?,
        clinician_name: row.get(37)?,
    })
}

fn assessment_from_row(row: AssessmentRow) -> Result<Joined<OasisAssessment>, DatabaseError> {
    let [grooming, dressing_upper, dressing_lower, bathing, toileting, transferring, ambulation, feeding, cognitive_functioning, vision, hearing] =
        row.scores;

    let analysis = match (row.analyzed_at, row.confidence_score) {
        (Some(analyzed_at), Some(confidence_score)) => Some(AssessmentAnalysis {
            risk_scores: decode_json_as(
                "oasis_assessments.risk_scores",
                row.risk_scores.as_deref().unwrap_or("{}"),
            )?,
            insights: decode_json_as(
                "oasis_assessments.ai_insights",
                row.ai_insights.as_deref().unwrap_or("[]"),
            )?,
            recommendations: decode_json_as(
                "oasis_assessments.recommendations",
                row.recommendations.as_deref().unwrap_or("[]"),
            )?,
            quality_indicators: decode_json_as(
                "oasis_assessments.quality_indicators",
                row.quality_indicators.as_deref().unwrap_or("{}"),
            )?,
            confidence_score,
            analyzed_at: decode_timestamp("oasis_assessments.analyzed_at", &analyzed_at)?,
        }),
        _ => None,
    };

    let assessment = OasisAssessment {
        id: decode_uuid("oasis_assessments.id", &row.id)?,
        patient_id: decode_uuid("oasis_assessments.patient_id", &row.patient_id)?,
        clinician_id: decode_uuid("oasis_assessments.clinician_id", &row.clinician_id)?,
        assessment_type: AssessmentType::from_str(&row.assessment_type)?,
        assessment_date: decode_date("oasis_assessments.assessment_date", &row.assessment_date)?,
        zip_code: row.zip_code,
        birth_date: row
            .birth_date
            .map(|d| decode_date("oasis_assessments.birth_date", &d))
            .transpose()?,
        gender: row.gender,
        race_ethnicity: row.race_ethnicity,
        prior_functioning_adl: decode_json(
            "oasis_assessments.prior_functioning_adl",
            &row.prior_functioning_adl,
        )?,
        prior_functioning_iadl: decode_json(
            "oasis_assessments.prior_functioning_iadl",
            &row.prior_functioning_iadl,
        )?,
        primary_diagnosis: row.primary_diagnosis,
        other_diagnoses: row.other_diagnoses,
        scores: FunctionalScores {
            grooming,
            dressing_upper,
            dressing_lower,
            bathing,
            toileting,
            transferring,
            ambulation,
            feeding,
            cognitive_functioning,
            vision,
            hearing,
        },
        complete_data: decode_json("oasis_assessments.complete_data", &row.complete_data)?,
        analysis,
        is_completed: row.is_completed != 0,
        submitted_date: decode_opt_timestamp("oasis_assessments.submitted_date", row.submitted_date)?,
        created_at: decode_timestamp("oasis_assessments.created_at", &row.created_at)?,
        updated_at: decode_timestamp("oasis_assessments.updated_at", &row.updated_at)?,
    };

    Ok(Joined {
        record: assessment,
        patient_name: row.patient_name,
        patient_physician: decode_opt_uuid("patients.assigned_physician", row.patient_physician)?,
        user_name: row.clinician_name,
    })
}

/// Blank assessment for `patient_id`, used as the base of creates.
pub fn new_assessment(
    patient_id: Uuid,
    clinician_id: Uuid,
    assessment_type: AssessmentType,
    assessment_date: NaiveDate,
    now: DateTime<Utc>,
) -> OasisAssessment {
    OasisAssessment {
        id: Uuid::new_v4(),
        patient_id,
        clinician_id,
        assessment_type,
        assessment_date,
        zip_code: None,
        birth_date: None,
        gender: None,
        race_ethnicity: None,
        prior_functioning_adl: serde_json::json!({}),
        prior_functioning_iadl: serde_json::json!({}),
        primary_diagnosis: None,
        other_diagnoses: None,
        scores: FunctionalScores::default(),
        complete_data: serde_json::json!({}),
        analysis: None,
        is_completed: false,
        submitted_date: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::patient::tests::make_patient;
    use crate::db::repository::user::tests::make_user;
    use crate::db::sqlite::open_memory_database;
    use std::collections::BTreeMap;

    #[test]
    fn insert_get_with_scores_and_analysis() {
        let conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "OA1", None);
        let today = Utc::now().date_naive();
        let mut a = new_assessment(patient.id, nurse.id, AssessmentType::StartOfCare, today, Utc::now());
        a.scores.cognitive_functioning = Some(4);
        a.scores.vision = Some(2);
        insert_assessment(&conn, &a).unwrap();

        let analysis = AssessmentAnalysis {
            risk_scores: BTreeMap::from([("overall_risk".to_string(), 40.0)]),
            insights: vec![Insight { text: "Stable".into() }],
            recommendations: vec![],
            quality_indicators: BTreeMap::new(),
            confidence_score: 0.8,
            analyzed_at: Utc::now(),
        };
        set_assessment_analysis(&conn, &a.id, &analysis).unwrap();

        let stored = get_assessment(&conn, &a.id).unwrap().unwrap().record;
        assert_eq!(stored.scores.cognitive_functioning, Some(4));
        assert_eq!(stored.analysis.unwrap().insights[0].text, "Stable");
    }

    #[test]
    fn out_of_range_score_violates_check() {
        let conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "OA2", None);
        let mut a = new_assessment(
            patient.id,
            nurse.id,
            AssessmentType::StartOfCare,
            Utc::now().date_naive(),
            Utc::now(),
        );
        a.scores.vision = Some(3);
        assert!(insert_assessment(&conn, &a).is_err());
    }

    #[test]
    fn submit_is_one_shot() {
        let conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "OA3", None);
        let a = new_assessment(
            patient.id,
            nurse.id,
            AssessmentType::Discharge,
            Utc::now().date_naive(),
            Utc::now(),
        );
        insert_assessment(&conn, &a).unwrap();
        assert!(mark_assessment_submitted(&conn, &a.id, Utc::now()).unwrap());
        assert!(!mark_assessment_submitted(&conn, &a.id, Utc::now()).unwrap());

        let done = AssessmentFilter {
            is_completed: Some(true),
            ..Default::default()
        };
        let listed = list_assessments(&conn, &Scope::All, &done, &Page::default()).unwrap();
        assert_eq!(listed.count, 1);
        assert!(listed.results[0].record.is_locked());
    }
}
