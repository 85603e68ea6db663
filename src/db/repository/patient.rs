use std::str::FromStr;

use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use super::{count_rows, ScopeTarget, SqlFilter};
use crate::access::Scope;
use crate::db::{
    decode_date, decode_opt_uuid, decode_timestamp, decode_uuid, encode_timestamp, DatabaseError,
};
use crate::models::*;

pub(crate) const PATIENT_COLUMNS: &str = "p.id, p.mrn, p.first_name, p.last_name, p.date_of_birth,
     p.gender, p.phone, p.email, p.address, p.emergency_contact_name, p.emergency_contact_phone,
     p.primary_diagnosis, p.secondary_diagnoses, p.allergies, p.medications,
     p.insurance_provider, p.insurance_id, p.assigned_physician, p.is_active, p.created_by,
     p.created_at, p.updated_at";

/// Insert a patient. A duplicate MRN surfaces as a unique violation.
pub fn insert_patient(conn: &Connection, patient: &Patient) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patients (id, mrn, first_name, last_name, date_of_birth, gender, phone, email,
         address, emergency_contact_name, emergency_contact_phone, primary_diagnosis,
         secondary_diagnoses, allergies, medications, insurance_provider, insurance_id,
         assigned_physician, is_active, created_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21, ?22)",
        params![
            patient.id.to_string(),
            patient.mrn,
            patient.first_name,
            patient.last_name,
            patient.date_of_birth.to_string(),
            patient.gender.as_str(),
            patient.phone,
            patient.email,
            patient.address,
            patient.emergency_contact_name,
            patient.emergency_contact_phone,
            patient.primary_diagnosis,
            patient.secondary_diagnoses,
            patient.allergies,
            patient.medications,
            patient.insurance_provider,
            patient.insurance_id,
            patient.assigned_physician.map(|id| id.to_string()),
            patient.is_active as i32,
            patient.created_by.map(|id| id.to_string()),
            encode_timestamp(&patient.created_at),
            encode_timestamp(&patient.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_patient(conn: &Connection, id: &Uuid) -> Result<Option<Patient>, DatabaseError> {
    let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients p WHERE p.id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params![id.to_string()], patient_row_from_rusqlite);
    match result {
        Ok(row) => Ok(Some(patient_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn mrn_exists(conn: &Connection, mrn: &str, excluding: Option<&Uuid>) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM patients WHERE mrn = ?1 AND id IS NOT ?2",
        params![mrn, excluding.map(|id| id.to_string())],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Scoped, filtered, paged patient list ordered by last name, first name.
pub fn list_patients(
    conn: &Connection,
    scope: &Scope,
    filter: &PatientFilter,
    page: &Page,
) -> Result<Paged<Patient>, DatabaseError> {
    let mut f = SqlFilter::new();
    f.scope(scope, ScopeTarget::Patients);
    if let Some(gender) = filter.gender {
        f.and_eq("p.gender", gender.as_str());
    }
    if let Some(physician) = filter.assigned_physician {
        f.and_eq("p.assigned_physician", physician.to_string());
    }
    if let Some(from) = filter.dob_from {
        f.and("p.date_of_birth", ">=", from.to_string());
    }
    if let Some(to) = filter.dob_to {
        f.and("p.date_of_birth", "<=", to.to_string());
    }
    if let Some(search) = &filter.search {
        f.and_contains_any(&["p.first_name", "p.last_name", "p.mrn"], search);
    }

    let from = "FROM patients p";
    let count = count_rows(conn, from, &f)?;
    let sql = f.paged(
        &format!("SELECT {PATIENT_COLUMNS} {from}"),
        "p.last_name, p.first_name, p.id",
        page.limit(),
        page.offset(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(f.params().as_slice(), |row| Ok(patient_row_from_rusqlite(row)))?;

    let mut results = Vec::new();
    for row in rows {
        results.push(patient_from_row(row??)?);
    }
    Ok(Paged { count, results })
}

pub fn update_patient(conn: &Connection, patient: &Patient) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE patients SET mrn = ?2, first_name = ?3, last_name = ?4, date_of_birth = ?5,
         gender = ?6, phone = ?7, email = ?8, address = ?9, emergency_contact_name = ?10,
         emergency_contact_phone = ?11, primary_diagnosis = ?12, secondary_diagnoses = ?13,
         allergies = ?14, medications = ?15, insurance_provider = ?16, insurance_id = ?17,
         assigned_physician = ?18, is_active = ?19, updated_at = ?20
         WHERE id = ?1",
        params![
            patient.id.to_string(),
            patient.mrn,
            patient.first_name,
            patient.last_name,
            patient.date_of_birth.to_string(),
            patient.gender.as_str(),
            patient.phone,
            patient.email,
            patient.address,
            patient.emergency_contact_name,
            patient.emergency_contact_phone,
            patient.primary_diagnosis,
            patient.secondary_diagnoses,
            patient.allergies,
            patient.medications,
            patient.insurance_provider,
            patient.insurance_id,
            patient.assigned_physician.map(|id| id.to_string()),
            patient.is_active as i32,
            encode_timestamp(&patient.updated_at),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Patient".into(),
            id: patient.id.to_string(),
        });
    }
    Ok(())
}

/// Hard-delete a patient and every dependent row in one transaction.
/// Returns the stored blob names of the patient's files so the caller can
/// remove them from the file store.
pub fn delete_patient_cascade(conn: &mut Connection, id: &Uuid) -> Result<Vec<String>, DatabaseError> {
    let tx = conn.transaction()?;
    let id_str = id.to_string();

    let stored_names = {
        let mut stmt = tx.prepare("SELECT stored_name FROM uploaded_files WHERE patient_id = ?1")?;
        let names = stmt
            .query_map(params![id_str], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        names
    };
    let count_of = |table: &str| -> Result<i64, rusqlite::Error> {
        tx.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE patient_id = ?1"),
            params![id_str],
            |row| row.get(0),
        )
    };
    let visits = count_of("visits")?;
    let assessments = count_of("oasis_assessments")?;
    let threads = count_of("communication_threads")?;

    let deleted = tx.execute("DELETE FROM patients WHERE id = ?1", params![id_str])?;
    if deleted == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Patient".into(),
            id: id_str,
        });
    }
    tx.commit()?;

    tracing::info!(
        patient_id = %id,
        visits,
        assessments,
        threads,
        files = stored_names.len(),
        "Patient deleted with dependents"
    );
    Ok(stored_names)
}

/// Per-patient record counts for the history summary.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PatientRecordCounts {
    pub visits: i64,
    pub assessments: i64,
    pub files: i64,
    pub threads: i64,
}

pub fn count_patient_records(conn: &Connection, id: &Uuid) -> Result<PatientRecordCounts, DatabaseError> {
    let counts = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM visits WHERE patient_id = ?1),
            (SELECT COUNT(*) FROM oasis_assessments WHERE patient_id = ?1),
            (SELECT COUNT(*) FROM uploaded_files WHERE patient_id = ?1),
            (SELECT COUNT(*) FROM communication_threads WHERE patient_id = ?1)",
        params![id.to_string()],
        |row| {
            Ok(PatientRecordCounts {
                visits: row.get(0)?,
                assessments: row.get(1)?,
                files: row.get(2)?,
                threads: row.get(3)?,
            })
        },
    )?;
    Ok(counts)
}

// ── Row mapping ─────────────────────────────────────────────

pub(crate) struct PatientRow {
    id: String,
    mrn: String,
    first_name: String,
    last_name: String,
    date_of_birth: String,
    gender: String,
    phone: Option<String>,
    email: Option<String>,
    address: Option<String>,
    emergency_contact_name: Option<String>,
    emergency_contact_phone: Option<String>,
    primary_diagnosis: Option<String>,
    secondary_diagnoses: Option<String>,
    allergies: Option<String>,
    medications: Option<String>,
    insurance_provider: Option<String>,
    insurance_id: Option<String>,
    assigned_physician: Option<String>,
    is_active: i32,
    created_by: Option<String>,
    created_at: String,
    updated_at: String,
}

pub(crate) fn patient_row_from_rusqlite(row: &Row<'_>) -> Result<PatientRow, rusqlite::Error> {
    Ok(PatientRow {
        id: row.get(0)?,
        mrn: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        date_of_birth: row.get(4)?,
        gender: row.get(5)?,
        phone: row.get(6)?,
        email: row.get(7)?,
        address: row.get(8)?,
        emergency_contact_name: row.get(9)?,
        emergency_contact_phone: row.get(10)?,
        primary_diagnosis: row.get(11)?,
        secondary_diagnoses: row.get(12)?,
        allergies: row.get(13)?,
        medications: row.get(14)?,
        insurance_provider: row.get(15)?,
        insurance_id: row.get(16)?,
        assigned_physician: row.get(17)?,
        is_active: row.get(18)?,
        created_by: row.get(19)?,
        created_at: row.get(20)?,
        updated_at: row.get(21)?,
    })
}

pub(crate) fn patient_from_row(row: PatientRow) -> Result<Patient, DatabaseError> {
    Ok(Patient {
        id: decode_uuid("patients.id", &row.id)?,
        mrn: row.mrn,
        first_name: row.first_name,
        last_name: row.last_name,
        date_of_birth: decode_date("patients.date_of_birth", &row.date_of_birth)?,
        gender: Gender::from_str(&row.gender)?,
        phone: row.phone,
        email: row.email,
        address: row.address,
        emergency_contact_name: row.emergency_contact_name,
        emergency_contact_phone: row.emergency_contact_phone,
        primary_diagnosis: row.primary_diagnosis,
        secondary_diagnoses: row.secondary_diagnoses,
        allergies: row.allergies,
        medications: row.medications,
        insurance_provider: row.insurance_provider,
        insurance_id: row.insurance_id,
        assigned_physician: decode_opt_uuid("patients.assigned_physician", row.assigned_physician)?,
        is_active: row.is_active != 0,
        created_by: decode_opt_uuid("patients.created_by", row.created_by)?,
        created_at: decode_timestamp("patients.created_at", &row.created_at)?,
        updated_at: decode_timestamp("patients.updated_at", &row.updated_at)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::repository::user::tests::make_user;
    use crate::db::sqlite::open_memory_database;
    use chrono::{NaiveDate, Utc};

    pub(crate) fn make_patient(conn: &Connection, mrn: &str, physician: Option<Uuid>) -> Patient {
        let now = Utc::now();
        let patient = Patient {
            id: Uuid::new_v4(),
            mrn: mrn.into(),
            first_name: "Ann".into(),
            last_name: format!("Lee-{mrn}"),
            date_of_birth: NaiveDate::from_ymd_opt(1950, 5, 17).unwrap(),
            gender: Gender::Female,
            phone: None,
            email: None,
            address: None,
            emergency_contact_name: None,
            emergency_contact_phone: None,
            primary_diagnosis: Some("CHF".into()),
            secondary_diagnoses: None,
            allergies: None,
            medications: None,
            insurance_provider: None,
            insurance_id: None,
            assigned_physician: physician,
            is_active: true,
            created_by: None,
            created_at: now,
            updated_at: now,
        };
        insert_patient(conn, &patient).unwrap();
        patient
    }

    #[test]
    fn duplicate_mrn_rejected_by_storage() {
        let conn = open_memory_database().unwrap();
        let first = make_patient(&conn, "MRN001", None);
        let mut dup = first.clone();
        dup.id = Uuid::new_v4();
        let err = insert_patient(&conn, &dup).unwrap_err();
        assert!(err.is_unique_violation());
        assert!(mrn_exists(&conn, "MRN001", None).unwrap());
        assert!(!mrn_exists(&conn, "MRN001", Some(&first.id)).unwrap());
    }

    #[test]
    fn physician_scope_limits_list() {
        let conn = open_memory_database().unwrap();
        let doc = make_user(&conn, "doc", Role::Physician);
        make_patient(&conn, "A1", Some(doc.id));
        make_patient(&conn, "B1", None);
        let mut inactive = make_patient(&conn, "C1", Some(doc.id));
        inactive.is_active = false;
        update_patient(&conn, &inactive).unwrap();

        let page = Page::default();
        let all = list_patients(&conn, &Scope::ActivePatients, &PatientFilter::default(), &page).unwrap();
        assert_eq!(all.count, 2);

        let mine = list_patients(
            &conn,
            &Scope::AssignedPatients(doc.id),
            &PatientFilter::default(),
            &page,
        )
        .unwrap();
        assert_eq!(mine.count, 1);
        assert_eq!(mine.results[0].mrn, "A1");
    }

    #[test]
    fn search_matches_mrn_substring() {
        let conn = open_memory_database().unwrap();
        make_patient(&conn, "XYZ-77", None);
        make_patient(&conn, "ABC-11", None);
        let filter = PatientFilter {
            search: Some("yz-7".into()),
            ..Default::default()
        };
        let found = list_patients(&conn, &Scope::All, &filter, &Page::default()).unwrap();
        assert_eq!(found.count, 1);
    }

    #[test]
    fn cascade_delete_removes_children() {
        let mut conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "DEL1", None);
        conn.execute(
            "INSERT INTO visits (id, patient_id, clinician_id, visit_type, scheduled_date, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'SN', '2024-01-01T09:00:00.000000Z', '2024-01-01T00:00:00.000000Z', '2024-01-01T00:00:00.000000Z')",
            params![Uuid::new_v4().to_string(), patient.id.to_string(), nurse.id.to_string()],
        )
        .unwrap();

        let names = delete_patient_cascade(&mut conn, &patient.id).unwrap();
        assert!(names.is_empty());
        let visits: i64 = conn
            .query_row("SELECT COUNT(*) FROM visits", [], |r| r.get(0))
            .unwrap();
        assert_eq!(visits, 0);
        assert!(get_patient(&conn, &patient.id).unwrap().is_none());
    }
}
