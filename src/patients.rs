//! Patient registry: validated CRUD, role-scoped listing and search, and
//! per-patient projections of the other record families.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::{can_view, scope_query, AccessPolicy, Actor, Resource, ResourceKind};
use crate::db::repository::{self, PatientRecordCounts};
use crate::error::{CareError, FieldErrors};
use crate::models::*;
use crate::storage::FileStore;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientInput {
    pub mrn: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub emergency_contact_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub emergency_contact_phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub primary_diagnosis: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub secondary_diagnoses: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub allergies: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub medications: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub insurance_provider: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub insurance_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub assigned_physician: Option<Option<Uuid>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientSearch {
    pub query: Option<String>,
    pub gender: Option<Gender>,
    pub age_min: Option<u32>,
    pub age_max: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientHistory {
    pub patient: PatientView,
    pub counts: PatientRecordCounts,
    pub latest_visit: Option<VisitView>,
    pub latest_assessment: Option<AssessmentView>,
}

// ═══════════════════════════════════════════════════════════
// Visibility
// ═══════════════════════════════════════════════════════════

fn patient_resource(patient: &Patient) -> Resource<'static> {
    Resource::Patient {
        assigned_physician: patient.assigned_physician,
        is_active: patient.is_active,
    }
}

/// Fetch a patient the actor may see. Absent and out-of-scope look the same.
pub fn visible_patient(conn: &Connection, actor: &Actor, id: &Uuid) -> Result<Patient, CareError> {
    repository::get_patient(conn, id)?
        .filter(|p| can_view(actor, ResourceKind::Patient, patient_resource(p)))
        .ok_or_else(|| CareError::not_found("patient", id))
}

/// Patient reference on a new child record. An invisible patient is a
/// validation error on `patient_id` rather than a 404.
pub fn patient_for_record(conn: &Connection, actor: &Actor, id: &Uuid) -> Result<Patient, CareError> {
    visible_patient(conn, actor, id).map_err(|e| match e {
        CareError::NotFound { .. } => CareError::invalid("patient_id", "Patient not found or not accessible."),
        other => other,
    })
}

// ═══════════════════════════════════════════════════════════
// CRUD
// ═══════════════════════════════════════════════════════════

pub fn create(
    conn: &Connection,
    actor: &Actor,
    input: PatientInput,
    now: DateTime<Utc>,
) -> Result<PatientView, CareError> {
    let today = now.date_naive();
    let mut patient = Patient {
        id: Uuid::new_v4(),
        mrn: String::new(),
        first_name: String::new(),
        last_name: String::new(),
        date_of_birth: today,
        gender: Gender::Other,
        phone: None,
        email: None,
        address: None,
        emergency_contact_name: None,
        emergency_contact_phone: None,
        primary_diagnosis: None,
        secondary_diagnoses: None,
        allergies: None,
        medications: None,
        insurance_provider: None,
        insurance_id: None,
        assigned_physician: None,
        is_active: true,
        created_by: Some(actor.id),
        created_at: now,
        updated_at: now,
    };
    apply_input(conn, &mut patient, input, false, today)?;
    repository::insert_patient(conn, &patient).map_err(mrn_conflict)?;
    tracing::info!(patient_id = %patient.id, actor = %actor.id, "Patient created");
    Ok(patient.view(today))
}

pub fn list(
    conn: &Connection,
    actor: &Actor,
    filter: &PatientFilter,
    page: &Page,
    today: NaiveDate,
) -> Result<Paged<PatientView>, CareError> {
    let scope = scope_query(actor, ResourceKind::Patient);
    let paged = repository::list_patients(conn, &scope, filter, page)?;
    Ok(Paged {
        count: paged.count,
        results: paged.results.into_iter().map(|p| p.view(today)).collect(),
    })
}

/// Substring, gender and age-range search. Age bounds become a date-of-birth
/// range so the filter runs in SQL.
pub fn search(
    conn: &Connection,
    actor: &Actor,
    search: &PatientSearch,
    page: &Page,
    today: NaiveDate,
) -> Result<Paged<PatientView>, CareError> {
    let mut errors = FieldErrors::new();
    for (field, age) in [("age_min", search.age_min), ("age_max", search.age_max)] {
        errors.check(
            age.map_or(true, |a| a <= MAX_AGE_YEARS),
            field,
            format!("Ensure this value is less than or equal to {MAX_AGE_YEARS}."),
        );
    }
    if let (Some(min), Some(max)) = (search.age_min, search.age_max) {
        errors.check(min <= max, "age_min", "age_min cannot exceed age_max.");
    }
    errors.finish()?;
    let (dob_from, dob_to) = dob_range_for_ages(today, search.age_min, search.age_max);
    let filter = PatientFilter {
        search: search.query.clone().filter(|q| !q.trim().is_empty()),
        gender: search.gender,
        assigned_physician: None,
        dob_from,
        dob_to,
    };
    list(conn, actor, &filter, page, today)
}

pub fn get(conn: &Connection, actor: &Actor, id: &Uuid, today: NaiveDate) -> Result<PatientView, CareError> {
    Ok(visible_patient(conn, actor, id)?.view(today))
}

/// Full (`partial = false`) or partial update.
pub fn update(
    conn: &Connection,
    policy: &AccessPolicy,
    actor: &Actor,
    id: &Uuid,
    input: PatientInput,
    partial: bool,
    now: DateTime<Utc>,
) -> Result<PatientView, CareError> {
    let mut patient = visible_patient(conn, actor, id)?;
    check_mutation(policy, actor, &patient)?;
    apply_input(conn, &mut patient, input, partial, now.date_naive())?;
    patient.updated_at = now;
    repository::update_patient(conn, &patient).map_err(mrn_conflict)?;
    Ok(patient.view(now.date_naive()))
}

/// Hard delete with every dependent record and stored file.
pub fn delete(
    conn: &mut Connection,
    store: &FileStore,
    policy: &AccessPolicy,
    actor: &Actor,
    id: &Uuid,
) -> Result<(), CareError> {
    let patient = visible_patient(conn, actor, id)?;
    check_mutation(policy, actor, &patient)?;
    let stored_names = repository::delete_patient_cascade(conn, id)?;
    store.remove_all(&stored_names);
    tracing::info!(patient_id = %id, actor = %actor.id, "Patient deleted");
    Ok(())
}

fn check_mutation(policy: &AccessPolicy, actor: &Actor, patient: &Patient) -> Result<(), CareError> {
    if policy.can_mutate_patient(actor, patient.created_by, patient.assigned_physician) {
        Ok(())
    } else {
        Err(CareError::Forbidden(
            "Only the creator, the assigned physician or an administrator may change this patient".into(),
        ))
    }
}

fn mrn_conflict(e: crate::db::DatabaseError) -> CareError {
    if e.is_unique_violation() {
        CareError::invalid("mrn", "Patient with this MRN already exists.")
    } else {
        e.into()
    }
}

// ── Validation ──────────────────────────────────────────────

/// Validate `input` and write it onto `patient`. Nothing is written when any
/// field is invalid. With `partial`, absent fields keep their value; without
/// it, required fields must be present and absent optional fields are cleared.
fn apply_input(
    conn: &Connection,
    patient: &mut Patient,
    input: PatientInput,
    partial: bool,
    today: NaiveDate,
) -> Result<(), CareError> {
    let mut errors = FieldErrors::new();

    let mrn = required_text(&mut errors, input.mrn, "mrn", partial);
    if let Some(mrn) = &mrn {
        if mrn.chars().count() > MRN_MAX_LEN {
            errors.add("mrn", format!("Ensure this field has no more than {MRN_MAX_LEN} characters."));
        } else if repository::mrn_exists(conn, mrn, Some(&patient.id))? {
            errors.add("mrn", "Patient with this MRN already exists.");
        }
    }
    let first_name = required_text(&mut errors, input.first_name, "first_name", partial);
    let last_name = required_text(&mut errors, input.last_name, "last_name", partial);

    let date_of_birth = required_text(&mut errors, input.date_of_birth, "date_of_birth", partial)
        .and_then(|raw| match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            Ok(dob) if dob > today => {
                errors.add("date_of_birth", "Date of birth cannot be in the future.");
                None
            }
            Ok(dob) => Some(dob),
            Err(_) => {
                errors.add("date_of_birth", "Enter a valid date (YYYY-MM-DD).");
                None
            }
        });

    let gender = required_text(&mut errors, input.gender, "gender", partial).and_then(|raw| {
        let parsed = raw.parse::<Gender>().ok();
        errors.check(parsed.is_some(), "gender", format!("\"{raw}\" is not a valid choice."));
        parsed
    });

    let physician = match input.assigned_physician {
        Some(Some(user_id)) => {
            let ok = repository::get_user(conn, &user_id)?
                .is_some_and(|u| u.role == Role::Physician);
            errors.check(
                ok,
                "assigned_physician",
                "Assigned physician must be an existing user with the physician role.",
            );
            Some(Some(user_id))
        }
        other => other,
    };
    errors.finish()?;

    if let Some(v) = mrn {
        patient.mrn = v;
    }
    if let Some(v) = first_name {
        patient.first_name = v;
    }
    if let Some(v) = last_name {
        patient.last_name = v;
    }
    if let Some(v) = date_of_birth {
        patient.date_of_birth = v;
    }
    if let Some(v) = gender {
        patient.gender = v;
    }

    let set = |slot: &mut Option<String>, value: Option<Option<String>>| match value {
        Some(v) => *slot = v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        None if !partial => *slot = None,
        None => {}
    };
    set(&mut patient.phone, input.phone);
    set(&mut patient.email, input.email);
    set(&mut patient.address, input.address);
    set(&mut patient.emergency_contact_name, input.emergency_contact_name);
    set(&mut patient.emergency_contact_phone, input.emergency_contact_phone);
    set(&mut patient.primary_diagnosis, input.primary_diagnosis);
    set(&mut patient.secondary_diagnoses, input.secondary_diagnoses);
    set(&mut patient.allergies, input.allergies);
    set(&mut patient.medications, input.medications);
    set(&mut patient.insurance_provider, input.insurance_provider);
    set(&mut patient.insurance_id, input.insurance_id);

    match physician {
        Some(v) => patient.assigned_physician = v,
        None if !partial => patient.assigned_physician = None,
        None => {}
    }
    if let Some(active) = input.is_active {
        patient.is_active = active;
    }
    Ok(())
}

/// Trimmed non-blank value. Missing is only an error for full writes; blank
/// is always an error.
fn required_text(errors: &mut FieldErrors, value: Option<String>, field: &str, partial: bool) -> Option<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Some(v),
        Some(_) => {
            errors.add(field, "This field may not be blank.");
            None
        }
        None => {
            if !partial {
                errors.add(field, "This field is required.");
            }
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Per-patient projections
// ═══════════════════════════════════════════════════════════

pub fn visits(conn: &Connection, actor: &Actor, id: &Uuid, page: &Page) -> Result<Paged<VisitView>, CareError> {
    visible_patient(conn, actor, id)?;
    let filter = VisitFilter {
        patient_id: Some(*id),
        ..Default::default()
    };
    crate::visits::list(conn, actor, &filter, page)
}

pub fn assessments(
    conn: &Connection,
    actor: &Actor,
    id: &Uuid,
    page: &Page,
) -> Result<Paged<AssessmentView>, CareError> {
    visible_patient(conn, actor, id)?;
    let filter = AssessmentFilter {
        patient_id: Some(*id),
        ..Default::default()
    };
    crate::oasis::list(conn, actor, &filter, page)
}

pub fn files(conn: &Connection, actor: &Actor, id: &Uuid, page: &Page) -> Result<Paged<FileView>, CareError> {
    visible_patient(conn, actor, id)?;
    let filter = FileFilter {
        patient_id: Some(*id),
        ..Default::default()
    };
    crate::intake::list(conn, actor, &filter, page)
}

pub fn threads(
    conn: &Connection,
    actor: &Actor,
    id: &Uuid,
    page: &Page,
) -> Result<Paged<ThreadSummary>, CareError> {
    visible_patient(conn, actor, id)?;
    let filter = ThreadFilter {
        patient_id: Some(*id),
        ..Default::default()
    };
    crate::communication::list_threads(conn, actor, &filter, page)
}

/// Record counts plus the most recent visit and assessment the actor may see.
pub fn history(conn: &Connection, actor: &Actor, id: &Uuid, today: NaiveDate) -> Result<PatientHistory, CareError> {
    let patient = visible_patient(conn, actor, id)?;
    let counts = repository::count_patient_records(conn, id)?;

    let latest_visit = repository::latest_visit_for_patient(conn, id)?
        .filter(|j| {
            can_view(
                actor,
                ResourceKind::Visit,
                Resource::Record {
                    patient_physician: j.patient_physician,
                    clinician: Some(j.record.clinician_id),
                },
            )
        })
        .map(crate::visits::to_view);
    let latest_assessment = repository::latest_assessment_for_patient(conn, id)?
        .filter(|j| {
            can_view(
                actor,
                ResourceKind::Assessment,
                Resource::Record {
                    patient_physician: j.patient_physician,
                    clinician: Some(j.record.clinician_id),
                },
            )
        })
        .map(crate::oasis::to_view);

    Ok(PatientHistory {
        patient: patient.view(today),
        counts,
        latest_visit,
        latest_assessment,
    })
}
