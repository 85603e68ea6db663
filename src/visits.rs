//! Visit log: scheduling, the visit lifecycle, notes and generated summaries.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::access::{can_view, scope_query, Actor, Resource, ResourceKind};
use crate::db::repository::{self, Joined, TransitionStamp};
use crate::error::{CareError, FieldErrors};
use crate::models::*;
use crate::patients::patient_for_record;
use crate::pipeline::generation::{parse_structured_note, parse_visit_summary, ContentGenerator, ContentKind};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisitInput {
    pub patient_id: Option<Uuid>,
    pub visit_type: Option<String>,
    pub scheduled_date: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub chief_complaint: Option<Option<String>>,
    pub vital_signs: Option<Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub assessment: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub plan: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoteInput {
    pub note_type: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub structured_data: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryRequest {
    pub include_notes: Option<bool>,
    pub include_vitals: Option<bool>,
    pub summary_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisitTypeInfo {
    pub value: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisitReference {
    pub visit_types: Vec<VisitTypeInfo>,
    pub disciplines: Vec<&'static str>,
    pub statuses: Vec<&'static str>,
}

/// A lifecycle action and the single state it may start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitAction {
    Start,
    End,
    Cancel,
    NoShow,
}

impl VisitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Cancel => "cancel",
            Self::NoShow => "no_show",
        }
    }

    fn rule(&self) -> (VisitStatus, VisitStatus, TransitionStamp) {
        match self {
            Self::Start => (VisitStatus::Scheduled, VisitStatus::InProgress, TransitionStamp::StartTime),
            Self::End => (VisitStatus::InProgress, VisitStatus::Completed, TransitionStamp::EndTime),
            Self::Cancel => (VisitStatus::Scheduled, VisitStatus::Cancelled, TransitionStamp::None),
            Self::NoShow => (VisitStatus::Scheduled, VisitStatus::NoShow, TransitionStamp::None),
        }
    }
}

pub fn to_view(joined: Joined<Visit>) -> VisitView {
    VisitView {
        duration_minutes: joined.record.duration_minutes(),
        visit: joined.record,
        patient_name: joined.patient_name,
        clinician_name: joined.user_name,
    }
}

fn visible_visit(conn: &Connection, actor: &Actor, id: &Uuid) -> Result<Joined<Visit>, CareError> {
    repository::get_visit(conn, id)?
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
        .ok_or_else(|| CareError::not_found("visit", id))
}

// ═══════════════════════════════════════════════════════════
// CRUD
// ═══════════════════════════════════════════════════════════

pub fn create(conn: &Connection, actor: &Actor, input: VisitInput, now: DateTime<Utc>) -> Result<VisitView, CareError> {
    let mut errors = FieldErrors::new();
    if input.patient_id.is_none() {
        errors.add("patient_id", "This field is required.");
    }
    let mut visit = Visit {
        id: Uuid::new_v4(),
        patient_id: input.patient_id.unwrap_or_default(),
        clinician_id: actor.id,
        visit_type: VisitType::SkilledNursing,
        status: VisitStatus::Scheduled,
        scheduled_date: now,
        start_time: None,
        end_time: None,
        chief_complaint: None,
        vital_signs: json!({}),
        assessment: None,
        plan: None,
        ai_summary: None,
        ai_recommendations: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    apply_input(&mut visit, input, false, errors)?;
    patient_for_record(conn, actor, &visit.patient_id)?;

    repository::insert_visit(conn, &visit)?;
    tracing::info!(visit_id = %visit.id, patient_id = %visit.patient_id, "Visit scheduled");
    get(conn, actor, &visit.id)
}

pub fn list(conn: &Connection, actor: &Actor, filter: &VisitFilter, page: &Page) -> Result<Paged<VisitView>, CareError> {
    let scope = scope_query(actor, ResourceKind::Visit);
    let paged = repository::list_visits(conn, &scope, filter, page)?;
    Ok(Paged {
        count: paged.count,
        results: paged.results.into_iter().map(to_view).collect(),
    })
}

pub fn get(conn: &Connection, actor: &Actor, id: &Uuid) -> Result<VisitView, CareError> {
    visible_visit(conn, actor, id).map(to_view)
}

/// Edit the documentation fields. Status and generated fields never change here.
pub fn update(
    conn: &Connection,
    actor: &Actor,
    id: &Uuid,
    input: VisitInput,
    partial: bool,
    now: DateTime<Utc>,
) -> Result<VisitView, CareError> {
    let mut visit = visible_visit(conn, actor, id)?.record;
    let mut errors = FieldErrors::new();
    if input.patient_id.is_some_and(|p| p != visit.patient_id) {
        errors.add("patient_id", "A visit cannot be moved to another patient.");
    }
    apply_input(&mut visit, input, partial, errors)?;
    visit.updated_at = now;
    repository::update_visit(conn, &visit)?;
    get(conn, actor, id)
}

pub fn delete(conn: &Connection, actor: &Actor, id: &Uuid) -> Result<(), CareError> {
    visible_visit(conn, actor, id)?;
    repository::delete_visit(conn, id)?;
    Ok(())
}

fn apply_input(visit: &mut Visit, input: VisitInput, partial: bool, mut errors: FieldErrors) -> Result<(), CareError> {
    let visit_type = match input.visit_type.as_deref().map(str::trim) {
        Some(raw) => {
            let parsed = raw.parse::<VisitType>().ok();
            errors.check(parsed.is_some(), "visit_type", format!("\"{raw}\" is not a valid choice."));
            parsed
        }
        None => {
            if !partial {
                errors.add("visit_type", "This field is required.");
            }
            None
        }
    };
    let scheduled_date = match input.scheduled_date.as_deref() {
        Some(raw) => {
            let parsed = parse_datetime(raw);
            errors.check(parsed.is_some(), "scheduled_date", "Enter a valid date/time.");
            parsed
        }
        None => {
            if !partial {
                errors.add("scheduled_date", "This field is required.");
            }
            None
        }
    };
    if let Some(vitals) = &input.vital_signs {
        errors.check(vitals.is_object(), "vital_signs", "Vital signs must be a JSON object.");
    }
    errors.finish()?;

    if let Some(v) = visit_type {
        visit.visit_type = v;
    }
    if let Some(v) = scheduled_date {
        visit.scheduled_date = v;
    }
    match input.vital_signs {
        Some(v) => visit.vital_signs = v,
        None if !partial => visit.vital_signs = json!({}),
        None => {}
    }
    let set = |slot: &mut Option<String>, value: Option<Option<String>>| match value {
        Some(v) => *slot = v.filter(|s| !s.trim().is_empty()),
        None if !partial => *slot = None,
        None => {}
    };
    set(&mut visit.chief_complaint, input.chief_complaint);
    set(&mut visit.assessment, input.assessment);
    set(&mut visit.plan, input.plan);
    Ok(())
}

/// RFC 3339 timestamp, or a bare date taken as midnight UTC.
fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        })
}

// ═══════════════════════════════════════════════════════════
// Lifecycle
// ═══════════════════════════════════════════════════════════

/// Apply a lifecycle action. The status write is a compare-and-set, so a
/// visit not in the action's source state is reported as a conflict and left
/// untouched.
///
/// When `summarizer` is given, a successfully ended visit gets a brief summary.
/// A failing summarizer does not undo the transition.
pub fn transition(
    conn: &Connection,
    actor: &Actor,
    id: &Uuid,
    action: VisitAction,
    summarizer: Option<&dyn ContentGenerator>,
    now: DateTime<Utc>,
) -> Result<VisitView, CareError> {
    let current = visible_visit(conn, actor, id)?;
    let (from, to, stamp) = action.rule();
    if current.record.status != from
        || !repository::transition_visit(conn, id, from, to, stamp, now)?
    {
        let status = repository::get_visit(conn, id)?
            .map(|j| j.record.status)
            .unwrap_or(current.record.status);
        return Err(CareError::conflict("visit", status, action.as_str()));
    }
    tracing::info!(visit_id = %id, from = %from, to = %to, "Visit transitioned");

    if let (VisitAction::End, Some(generator)) = (action, summarizer) {
        if let Err(e) = generate_summary(conn, generator, actor, id, &SummaryRequest::default(), now) {
            tracing::warn!(visit_id = %id, error = %e, "Automatic visit summary failed");
        }
    }
    get(conn, actor, id)
}

// ═══════════════════════════════════════════════════════════
// Notes
// ═══════════════════════════════════════════════════════════

fn require_open(visit: &Visit, attempted: &str) -> Result<(), CareError> {
    if visit.status.is_terminal() {
        Err(CareError::conflict("visit", visit.status, attempted))
    } else {
        Ok(())
    }
}

pub fn add_note(
    conn: &Connection,
    actor: &Actor,
    visit_id: &Uuid,
    input: NoteInput,
    now: DateTime<Utc>,
) -> Result<VisitNote, CareError> {
    let visit = visible_visit(conn, actor, visit_id)?.record;

    let mut errors = FieldErrors::new();
    let note_type = match input.note_type.as_deref() {
        Some(raw) => {
            let parsed = raw.parse::<NoteType>().ok();
            errors.check(parsed.is_some(), "note_type", format!("\"{raw}\" is not a valid choice."));
            parsed
        }
        None => Some(NoteType::Unstructured),
    };
    errors.require(input.content.as_deref(), "content");
    if let Some(data) = &input.structured_data {
        errors.check(data.is_object(), "structured_data", "Structured data must be a JSON object.");
    }
    errors.finish()?;
    require_open(&visit, "add_note")?;

    let note = VisitNote {
        id: Uuid::new_v4(),
        visit_id: *visit_id,
        note_type: note_type.unwrap_or(NoteType::Unstructured),
        title: input.title.filter(|t| !t.trim().is_empty()),
        content: input.content.unwrap_or_default(),
        structured_data: input.structured_data.unwrap_or_else(|| json!({})),
        created_by: actor.id,
        created_at: now,
    };
    repository::insert_visit_note(conn, &note)?;
    Ok(note)
}

pub fn list_notes(conn: &Connection, actor: &Actor, visit_id: &Uuid) -> Result<Vec<VisitNote>, CareError> {
    visible_visit(conn, actor, visit_id)?;
    Ok(repository::get_visit_notes(conn, visit_id)?)
}

// ═══════════════════════════════════════════════════════════
// Generated content
// ═══════════════════════════════════════════════════════════

/// Generate and store `ai_summary`/`ai_recommendations`. The generator output
/// is validated before anything is written.
pub fn generate_summary(
    conn: &Connection,
    generator: &dyn ContentGenerator,
    actor: &Actor,
    id: &Uuid,
    request: &SummaryRequest,
    now: DateTime<Utc>,
) -> Result<VisitView, CareError> {
    let joined = visible_visit(conn, actor, id)?;
    let summary_type = match request.summary_type.as_deref() {
        Some(raw) => raw
            .parse::<SummaryType>()
            .map_err(|_| CareError::invalid("summary_type", format!("\"{raw}\" is not a valid choice.")))?,
        None => SummaryType::Brief,
    };

    let visit = &joined.record;
    let mut context = json!({
        "patient_name": joined.patient_name,
        "clinician_name": joined.user_name,
        "visit_type": visit.visit_type.label(),
        "scheduled_date": visit.scheduled_date.date_naive().to_string(),
        "chief_complaint": visit.chief_complaint,
        "assessment": visit.assessment,
        "plan": visit.plan,
        "summary_type": summary_type.as_str(),
    });
    if request.include_vitals.unwrap_or(true) {
        context["vital_signs"] = visit.vital_signs.clone();
    }
    if request.include_notes.unwrap_or(true) {
        let notes: Vec<Value> = repository::get_visit_notes(conn, id)?
            .into_iter()
            .map(|n| json!({ "note_type": n.note_type, "title": n.title, "content": n.content }))
            .collect();
        context["notes"] = Value::Array(notes);
    }

    let response = generator.generate(ContentKind::VisitSummary, &context)?;
    let draft = parse_visit_summary(&response)?;
    repository::set_visit_summary(conn, id, &draft.summary, &draft.recommendations, now)?;
    get(conn, actor, id)
}

/// Turn a voice transcript into a `voice_transcript` note whose structured
/// data is the generator's output.
pub fn transcribe(
    conn: &Connection,
    generator: &dyn ContentGenerator,
    actor: &Actor,
    visit_id: &Uuid,
    transcript: Option<&str>,
    now: DateTime<Utc>,
) -> Result<VisitNote, CareError> {
    let joined = visible_visit(conn, actor, visit_id)?;
    let transcript = transcript
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CareError::invalid("transcript", "This field is required."))?;
    require_open(&joined.record, "transcribe")?;

    let context = json!({
        "transcript": transcript,
        "visit_type": joined.record.visit_type.label(),
        "patient_name": joined.patient_name,
    });
    let structured = parse_structured_note(&generator.generate(ContentKind::TranscriptNote, &context)?)?;
    let content = structured
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or(transcript)
        .to_string();

    let note = VisitNote {
        id: Uuid::new_v4(),
        visit_id: *visit_id,
        note_type: NoteType::VoiceTranscript,
        title: Some("Voice transcript".into()),
        content,
        structured_data: structured,
        created_by: actor.id,
        created_at: now,
    };
    repository::insert_visit_note(conn, &note)?;
    Ok(note)
}

// ── Reference data ──────────────────────────────────────────

pub fn reference() -> VisitReference {
    VisitReference {
        visit_types: VisitType::ALL
            .iter()
            .map(|t| VisitTypeInfo { value: t.as_str(), label: t.label() })
            .collect(),
        disciplines: Discipline::ALL.iter().map(Discipline::as_str).collect(),
        statuses: VisitStatus::ALL.iter().map(VisitStatus::as_str).collect(),
    }
}

pub fn documentation_templates(
    conn: &Connection,
    discipline: Option<&str>,
) -> Result<Vec<DocumentationTemplate>, CareError> {
    let discipline = discipline
        .map(|raw| {
            raw.parse::<Discipline>()
                .map_err(|_| CareError::invalid("discipline", format!("\"{raw}\" is not a valid choice.")))
        })
        .transpose()?;
    Ok(repository::list_documentation_templates(conn, discipline)?)
}

pub fn documentation_template(conn: &Connection, id: &Uuid) -> Result<DocumentationTemplate, CareError> {
    repository::get_documentation_template(conn, id)?.ok_or_else(|| CareError::not_found("documentation template", id))
}
