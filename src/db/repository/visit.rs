use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use super::{count_rows, Joined, ScopeTarget, SqlFilter};
use crate::access::Scope;
use crate::db::{
    decode_json, decode_json_as, decode_opt_timestamp, decode_opt_uuid, decode_timestamp,
    decode_uuid, encode_timestamp, DatabaseError,
};
use crate::models::*;

const VISIT_SELECT: &str = "SELECT v.id, v.patient_id, v.clinician_id, v.visit_type, v.status,
     v.scheduled_date, v.start_time, v.end_time, v.chief_complaint, v.vital_signs, v.assessment,
     v.plan, v.ai_summary, v.ai_recommendations, v.created_at, v.updated_at,
     p.first_name || ' ' || p.last_name, p.assigned_physician,
     TRIM(u.first_name || ' ' || u.last_name)";

const VISIT_FROM: &str = "FROM visits v
     JOIN patients p ON p.id = v.patient_id
     JOIN users u ON u.id = v.clinician_id";

pub fn insert_visit(conn: &Connection, visit: &Visit) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO visits (id, patient_id, clinician_id, visit_type, status, scheduled_date,
         start_time, end_time, chief_complaint, vital_signs, assessment, plan, ai_summary,
         ai_recommendations, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            visit.id.to_string(),
            visit.patient_id.to_string(),
            visit.clinician_id.to_string(),
            visit.visit_type.as_str(),
            visit.status.as_str(),
            encode_timestamp(&visit.scheduled_date),
            visit.start_time.as_ref().map(encode_timestamp),
            visit.end_time.as_ref().map(encode_timestamp),
            visit.chief_complaint,
            visit.vital_signs.to_string(),
            visit.assessment,
            visit.plan,
            visit.ai_summary,
            serde_json::to_string(&visit.ai_recommendations).unwrap_or_else(|_| "[]".into()),
            encode_timestamp(&visit.created_at),
            encode_timestamp(&visit.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_visit(conn: &Connection, id: &Uuid) -> Result<Option<Joined<Visit>>, DatabaseError> {
    let sql = format!("{VISIT_SELECT} {VISIT_FROM} WHERE v.id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params![id.to_string()], visit_row_from_rusqlite);
    match result {
        Ok(row) => Ok(Some(visit_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Scoped, filtered, paged visits, most recently scheduled first.
pub fn list_visits(
    conn: &Connection,
    scope: &Scope,
    filter: &VisitFilter,
    page: &Page,
) -> Result<Paged<Joined<Visit>>, DatabaseError> {
    let mut f = SqlFilter::new();
    f.scope(scope, ScopeTarget::Records { clinician: Some("v.clinician_id") });
    if let Some(patient_id) = filter.patient_id {
        f.and_eq("v.patient_id", patient_id.to_string());
    }
    if let Some(status) = filter.status {
        f.and_eq("v.status", status.as_str());
    }
    if let Some(visit_type) = filter.visit_type {
        f.and_eq("v.visit_type", visit_type.as_str());
    }
    if let Some(from) = filter.date_from {
        f.and("substr(v.scheduled_date, 1, 10)", ">=", from.to_string());
    }
    if let Some(to) = filter.date_to {
        f.and("substr(v.scheduled_date, 1, 10)", "<=", to.to_string());
    }

    let count = count_rows(conn, VISIT_FROM, &f)?;
    let sql = f.paged(
        &format!("{VISIT_SELECT} {VISIT_FROM}"),
        "v.scheduled_date DESC, v.id",
        page.limit(),
        page.offset(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(f.params().as_slice(), |row| Ok(visit_row_from_rusqlite(row)))?;

    let mut results = Vec::new();
    for row in rows {
        results.push(visit_from_row(row??)?);
    }
    Ok(Paged { count, results })
}

/// Most recent visit of a patient, regardless of status.
pub fn latest_visit_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Option<Joined<Visit>>, DatabaseError> {
    let sql = format!(
        "{VISIT_SELECT} {VISIT_FROM} WHERE v.patient_id = ?1
         ORDER BY v.scheduled_date DESC LIMIT 1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params![patient_id.to_string()], visit_row_from_rusqlite);
    match result {
        Ok(row) => Ok(Some(visit_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Update the user-editable fields. Status and generated fields are untouched.
pub fn update_visit(conn: &Connection, visit: &Visit) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE visits SET visit_type = ?2, scheduled_date = ?3, chief_complaint = ?4,
         vital_signs = ?5, assessment = ?6, plan = ?7, updated_at = ?8
         WHERE id = ?1",
        params![
            visit.id.to_string(),
            visit.visit_type.as_str(),
            encode_timestamp(&visit.scheduled_date),
            visit.chief_complaint,
            visit.vital_signs.to_string(),
            visit.assessment,
            visit.plan,
            encode_timestamp(&visit.updated_at),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Visit".into(),
            id: visit.id.to_string(),
        });
    }
    Ok(())
}

/// Which timestamp column a transition stamps.
#[derive(Debug, Clone, Copy)]
pub enum TransitionStamp {
    None,
    StartTime,
    EndTime,
}

/// Compare-and-set the visit status. Returns `false` when the row was not in
/// `from`, leaving it unchanged.
pub fn transition_visit(
    conn: &Connection,
    id: &Uuid,
    from: VisitStatus,
    to: VisitStatus,
    stamp: TransitionStamp,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let set_stamp = match stamp {
        TransitionStamp::None => "",
        TransitionStamp::StartTime => ", start_time = ?4",
        TransitionStamp::EndTime => ", end_time = ?4",
    };
    let sql = format!(
        "UPDATE visits SET status = ?3, updated_at = ?4{set_stamp}
         WHERE id = ?1 AND status = ?2"
    );
    let changed = conn.execute(
        &sql,
        params![id.to_string(), from.as_str(), to.as_str(), encode_timestamp(&now)],
    )?;
    Ok(changed == 1)
}

pub fn set_visit_summary(
    conn: &Connection,
    id: &Uuid,
    summary: &str,
    recommendations: &[String],
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE visits SET ai_summary = ?2, ai_recommendations = ?3, updated_at = ?4 WHERE id = ?1",
        params![
            id.to_string(),
            summary,
            serde_json::to_string(recommendations).unwrap_or_else(|_| "[]".into()),
            encode_timestamp(&now),
        ],
    )?;
    Ok(())
}

pub fn delete_visit(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let deleted = conn.execute("DELETE FROM visits WHERE id = ?1", params![id.to_string()])?;
    Ok(deleted > 0)
}

// ── Notes ───────────────────────────────────────────────────

pub fn insert_visit_note(conn: &Connection, note: &VisitNote) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO visit_notes (id, visit_id, note_type, title, content, structured_data,
         created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            note.id.to_string(),
            note.visit_id.to_string(),
            note.note_type.as_str(),
            note.title,
            note.content,
            note.structured_data.to_string(),
            note.created_by.to_string(),
            encode_timestamp(&note.created_at),
        ],
    )?;
    Ok(())
}

/// Notes of a visit, oldest first.
pub fn get_visit_notes(conn: &Connection, visit_id: &Uuid) -> Result<Vec<VisitNote>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, visit_id, note_type, title, content, structured_data, created_by, created_at
         FROM visit_notes WHERE visit_id = ?1 ORDER BY created_at, id",
    )?;
    let rows = stmt.query_map(params![visit_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
        ))
    })?;

    let mut notes = Vec::new();
    for row in rows {
        let (id, visit_id, note_type, title, content, structured, created_by, created_at) = row?;
        notes.push(VisitNote {
            id: decode_uuid("visit_notes.id", &id)?,
            visit_id: decode_uuid("visit_notes.visit_id", &visit_id)?,
            note_type: NoteType::from_str(&note_type)?,
            title,
            content,
            structured_data: decode_json("visit_notes.structured_data", &structured)?,
            created_by: decode_uuid("visit_notes.created_by", &created_by)?,
            created_at: decode_timestamp("visit_notes.created_at", &created_at)?,
        });
    }
    Ok(notes)
}

// ── Row mapping ─────────────────────────────────────────────

struct VisitRow {
    id: String,
    patient_id: String,
    clinician_id: String,
    visit_type: String,
    status: String,
    scheduled_date: String,
    start_time: Option<String>,
    end_time: Option<String>,
    chief_complaint: Option<String>,
    vital_signs: String,
    assessment: Option<String>,
    plan: Option<String>,
    ai_summary: Option<String>,
    ai_recommendations: String,
    created_at: String,
    updated_at: String,
    patient_name: String,
    patient_physician: Option<String>,
    clinician_name: String,
}

fn visit_row_from_rusqlite(row: &Row<'_>) -> Result<VisitRow, rusqlite::Error> {
    Ok(VisitRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        clinician_id: row.get(2)?,
        visit_type: row.get(3)?,
        status: row.get(4)?,
        scheduled_date: row.get(5)?,
        start_time: row.get(6)?,
        end_time: row.get(7)?,
        chief_complaint: row.get(8)?,
        vital_signs: row.get(9)?,
        assessment: row.get(10)?,
        plan: row.get(11)?,
        ai_summary: row.get(12)?,
        ai_recommendations: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
        patient_name: row.get(16)?,
        patient_physician: row.get(17)?,
        clinician_name: row.get(18)?,
    })
}

fn visit_from_row(row: VisitRow) -> Result<Joined<Visit>, DatabaseError> {
    let visit = Visit {
        id: decode_uuid("visits.id", &row.id)?,
        patient_id: decode_uuid("visits.patient_id", &row.patient_id)?,
        clinician_id: decode_uuid("visits.clinician_id", &row.clinician_id)?,
        visit_type: VisitType::from_str(&row.visit_type)?,
        status: VisitStatus::from_str(&row.status)?,
        scheduled_date: decode_timestamp("visits.scheduled_date", &row.scheduled_date)?,
        start_time: decode_opt_timestamp("visits.start_time", row.start_time)?,
        end_time: decode_opt_timestamp("visits.end_time", row.end_time)?,
        chief_complaint: row.chief_complaint,
        vital_signs: decode_json("visits.vital_signs", &row.vital_signs)?,
        assessment: row.assessment,
        plan: row.plan,
        ai_summary: row.ai_summary,
        ai_recommendations: decode_json_as("visits.ai_recommendations", &row.ai_recommendations)?,
        created_at: decode_timestamp("visits.created_at", &row.created_at)?,
        updated_at: decode_timestamp("visits.updated_at", &row.updated_at)?,
    };
    Ok(Joined {
        record: visit,
        patient_name: row.patient_name,
        patient_physician: decode_opt_uuid("patients.assigned_physician", row.patient_physician)?,
        user_name: row.clinician_name,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::repository::patient::tests::make_patient;
    use crate::db::repository::user::tests::make_user;
    use crate::db::sqlite::open_memory_database;

    pub(crate) fn make_visit(conn: &Connection, patient_id: Uuid, clinician_id: Uuid) -> Visit {
        let now = Utc::now();
        let visit = Visit {
            id: Uuid::new_v4(),
            patient_id,
            clinician_id,
            visit_type: VisitType::SkilledNursing,
            status: VisitStatus::Scheduled,
            scheduled_date: now,
            start_time: None,
            end_time: None,
            chief_complaint: Some("Shortness of breath".into()),
            vital_signs: serde_json::json!({}),
            assessment: None,
            plan: None,
            ai_summary: None,
            ai_recommendations: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        insert_visit(conn, &visit).unwrap();
        visit
    }

    #[test]
    fn transition_only_from_expected_state() {
        let conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "V1", None);
        let visit = make_visit(&conn, patient.id, nurse.id);
        let now = Utc::now();

        assert!(transition_visit(
            &conn,
            &visit.id,
            VisitStatus::Scheduled,
            VisitStatus::InProgress,
            TransitionStamp::StartTime,
            now
        )
        .unwrap());
        assert!(!transition_visit(
            &conn,
            &visit.id,
            VisitStatus::Scheduled,
            VisitStatus::InProgress,
            TransitionStamp::StartTime,
            now
        )
        .unwrap());

        let stored = get_visit(&conn, &visit.id).unwrap().unwrap();
        assert_eq!(stored.record.status, VisitStatus::InProgress);
        assert!(stored.record.start_time.is_some());
        assert_eq!(stored.user_name, "NURSE Tester");
    }

    #[test]
    fn own_records_scope_filters_by_clinician() {
        let conn = open_memory_database().unwrap();
        let a = make_user(&conn, "a", Role::Nurse);
        let b = make_user(&conn, "b", Role::Nurse);
        let patient = make_patient(&conn, "V2", None);
        make_visit(&conn, patient.id, a.id);
        make_visit(&conn, patient.id, b.id);

        let page = Page::default();
        let mine = list_visits(&conn, &Scope::OwnRecords(a.id), &VisitFilter::default(), &page).unwrap();
        assert_eq!(mine.count, 1);
        assert_eq!(mine.results[0].record.clinician_id, a.id);
        let all = list_visits(&conn, &Scope::All, &VisitFilter::default(), &page).unwrap();
        assert_eq!(all.count, 2);
    }

    #[test]
    fn notes_listed_in_creation_order() {
        let conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "V3", None);
        let visit = make_visit(&conn, patient.id, nurse.id);
        for (i, title) in ["first", "second"].iter().enumerate() {
            insert_visit_note(
                &conn,
                &VisitNote {
                    id: Uuid::new_v4(),
                    visit_id: visit.id,
                    note_type: NoteType::Unstructured,
                    title: Some((*title).into()),
                    content: "text".into(),
                    structured_data: serde_json::json!({}),
                    created_by: nurse.id,
                    created_at: Utc::now() + chrono::Duration::seconds(i as i64),
                },
            )
            .unwrap();
        }
        let notes = get_visit_notes(&conn, &visit.id).unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].title.as_deref(), Some("first"));
    }
}
