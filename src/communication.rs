//! Care-team messaging: patient-scoped threads, messages, read tracking and
//! generated drafts.
//!
//! Threads are visible to their participants only. Posting records the
//! sender as a reader of their own message.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::access::{can_view, scope_query, Actor, Resource, ResourceKind};
use crate::db::repository::{self, CommunicationStats};
use crate::error::{CareError, FieldErrors};
use crate::models::*;
use crate::patients::{patient_for_record, visible_patient};
use crate::pipeline::generation::{ContentGenerator, ContentKind};

pub const SUBJECT_MAX_LEN: usize = 200;
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadInput {
    pub patient_id: Option<Uuid>,
    pub subject: Option<String>,
    #[serde(default)]
    pub participant_ids: Vec<Uuid>,
    #[serde(default)]
    pub is_urgent: bool,
    pub initial_message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageInput {
    pub content: Option<String>,
    pub message_type: Option<String>,
    #[serde(default)]
    pub attached_files: Vec<Uuid>,
    #[serde(default)]
    pub referenced_visits: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest {
    pub message_type: Option<String>,
    pub template_id: Option<Uuid>,
    #[serde(default)]
    pub context_data: serde_json::Map<String, Value>,
    pub custom_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub subject: String,
    pub created_at: DateTime<Utc>,
    pub is_urgent: bool,
    pub is_closed: bool,
    pub message_count: i64,
    pub last_activity: DateTime<Utc>,
    pub participants: Vec<UserRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientCommunicationHistory {
    pub patient_id: Uuid,
    pub patient_name: String,
    pub communication_history: Vec<HistoryEntry>,
    pub total_threads: usize,
}

/// A thread the actor participates in.
struct ScopedThread {
    thread: CommunicationThread,
    patient_name: String,
    participants: Vec<Uuid>,
}

fn participant_thread(conn: &Connection, actor: &Actor, id: &Uuid) -> Result<ScopedThread, CareError> {
    let (thread, patient_name) = repository::get_thread(conn, id)?.ok_or_else(|| CareError::not_found("thread", id))?;
    let participants = repository::get_thread_participants(conn, id)?;
    if !can_view(actor, ResourceKind::Thread, Resource::Thread { participants: &participants }) {
        return Err(CareError::not_found("thread", id));
    }
    Ok(ScopedThread {
        thread,
        patient_name,
        participants,
    })
}

fn user_refs(conn: &Connection, ids: &[Uuid]) -> Result<Vec<UserRef>, CareError> {
    Ok(repository::get_users(conn, ids)?.iter().map(UserRef::from).collect())
}

fn actor_name(conn: &Connection, actor: &Actor) -> Result<String, CareError> {
    Ok(repository::get_user(conn, &actor.id)?
        .map(|u| u.full_name())
        .unwrap_or_default())
}

/// First 100 characters, with "..." appended when cut.
pub fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_CHARS {
        let cut: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        content.to_string()
    }
}

fn parse_message_type(errors: &mut FieldErrors, raw: Option<&str>) -> MessageType {
    match raw {
        Some(raw) => {
            let parsed = raw.parse::<MessageType>().ok();
            errors.check(parsed.is_some(), "message_type", format!("\"{raw}\" is not a valid choice."));
            parsed.unwrap_or(MessageType::General)
        }
        None => MessageType::General,
    }
}

/// Insert a message and record its sender as a reader.
fn store_message(conn: &Connection, message: &Message) -> Result<(), CareError> {
    repository::insert_message(conn, message)?;
    repository::mark_message_read(conn, &message.id, &message.sender_id, message.created_at)?;
    repository::touch_thread(conn, &message.thread_id, message.created_at)?;
    Ok(())
}

fn plain_message(thread_id: Uuid, sender: Uuid, message_type: MessageType, content: String, now: DateTime<Utc>) -> Message {
    Message {
        id: Uuid::new_v4(),
        thread_id,
        sender_id: sender,
        message_type,
        content,
        is_ai_generated: false,
        ai_template_used: None,
        attached_files: Vec::new(),
        referenced_visits: Vec::new(),
        created_at: now,
    }
}

fn message_view(conn: &Connection, message: Message, sender_name: String) -> Result<MessageView, CareError> {
    let read_by = repository::get_message_readers(conn, &message.id)?;
    Ok(MessageView {
        message,
        sender_name,
        read_by,
    })
}

// ═══════════════════════════════════════════════════════════
// Threads
// ═══════════════════════════════════════════════════════════

/// Open a thread. The creator is always a participant.
pub fn create_thread(
    conn: &mut Connection,
    actor: &Actor,
    input: ThreadInput,
    now: DateTime<Utc>,
) -> Result<ThreadSummary, CareError> {
    let mut errors = FieldErrors::new();
    match input.patient_id {
        Some(pid) => match patient_for_record(conn, actor, &pid) {
            Ok(_) => {}
            Err(CareError::Validation(e)) => {
                for msg in e.get("patient_id").unwrap_or_default() {
                    errors.add("patient_id", msg.clone());
                }
            }
            Err(other) => return Err(other),
        },
        None => errors.add("patient_id", "This field is required."),
    }
    let subject = input.subject.as_deref().map(str::trim).unwrap_or_default().to_string();
    if subject.is_empty() {
        errors.add("subject", "This field is required.");
    } else if subject.chars().count() > SUBJECT_MAX_LEN {
        errors.add("subject", format!("Ensure this field has no more than {SUBJECT_MAX_LEN} characters."));
    }

    let mut participants: Vec<Uuid> = input.participant_ids.clone();
    participants.push(actor.id);
    let participants: Vec<Uuid> = participants.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
    let known: BTreeSet<Uuid> = repository::get_users(conn, &participants)?.into_iter().map(|u| u.id).collect();
    let unknown: Vec<String> = participants
        .iter()
        .filter(|id| !known.contains(id))
        .map(Uuid::to_string)
        .collect();
    if !unknown.is_empty() {
        errors.add("participant_ids", format!("Unknown user ids: {}", unknown.join(", ")));
    }
    errors.finish()?;

    let thread = CommunicationThread {
        id: Uuid::new_v4(),
        patient_id: input.patient_id.unwrap_or_default(),
        subject,
        created_by: actor.id,
        is_urgent: input.is_urgent,
        is_closed: false,
        created_at: now,
        updated_at: now,
    };
    let tx = conn.transaction()?;
    repository::insert_thread(&tx, &thread)?;
    repository::add_thread_participants(&tx, &thread.id, &participants)?;
    if let Some(content) = input.initial_message.filter(|c| !c.trim().is_empty()) {
        store_message(&tx, &plain_message(thread.id, actor.id, MessageType::General, content, now))?;
    }
    tx.commit()?;

    tracing::info!(thread_id = %thread.id, participants = participants.len(), "Thread created");
    summarize(conn, actor, &thread.id)
}

fn summary_of(conn: &Connection, actor: &Actor, scoped: ScopedThread) -> Result<ThreadSummary, CareError> {
    let id = scoped.thread.id;
    let (unread_count, message_count) = repository::thread_message_counts(conn, &id, &actor.id)?;
    let last_message = repository::last_thread_message(conn, &id)?.map(|(m, sender_name)| MessagePreview {
        id: m.id,
        sender_name,
        content: preview(&m.content),
        created_at: m.created_at,
    });
    Ok(ThreadSummary {
        participants: user_refs(conn, &scoped.participants)?,
        thread: scoped.thread,
        patient_name: scoped.patient_name,
        unread_count,
        message_count,
        last_message,
    })
}

fn summarize(conn: &Connection, actor: &Actor, id: &Uuid) -> Result<ThreadSummary, CareError> {
    let scoped = participant_thread(conn, actor, id)?;
    summary_of(conn, actor, scoped)
}

pub fn list_threads(
    conn: &Connection,
    actor: &Actor,
    filter: &ThreadFilter,
    page: &Page,
) -> Result<Paged<ThreadSummary>, CareError> {
    let scope = scope_query(actor, ResourceKind::Thread);
    let paged = repository::list_threads(conn, &scope, filter, page)?;
    let mut results = Vec::with_capacity(paged.results.len());
    for (thread, patient_name) in paged.results {
        let participants = repository::get_thread_participants(conn, &thread.id)?;
        results.push(summary_of(
            conn,
            actor,
            ScopedThread {
                thread,
                patient_name,
                participants,
            },
        )?);
    }
    Ok(Paged {
        count: paged.count,
        results,
    })
}

/// Thread with all messages. Every message is marked read for the actor in
/// the same transaction that reads them.
pub fn get_thread(conn: &mut Connection, actor: &Actor, id: &Uuid, now: DateTime<Utc>) -> Result<ThreadDetail, CareError> {
    let tx = conn.transaction()?;
    let scoped = participant_thread(&tx, actor, id)?;
    repository::mark_thread_read(&tx, id, &actor.id, now)?;
    let mut readers = repository::get_thread_read_status(&tx, id)?;
    let messages = repository::get_thread_messages(&tx, id)?
        .into_iter()
        .map(|(message, sender_name)| MessageView {
            read_by: readers.remove(&message.id).unwrap_or_default(),
            message,
            sender_name,
        })
        .collect();
    let participants = user_refs(&tx, &scoped.participants)?;
    tx.commit()?;

    Ok(ThreadDetail {
        thread: scoped.thread,
        patient_name: scoped.patient_name,
        participants,
        messages,
    })
}

pub fn set_urgent(
    conn: &Connection,
    actor: &Actor,
    id: &Uuid,
    urgent: bool,
    now: DateTime<Utc>,
) -> Result<ThreadSummary, CareError> {
    participant_thread(conn, actor, id)?;
    repository::set_thread_urgent(conn, id, urgent, now)?;
    summarize(conn, actor, id)
}

/// Close the thread for good and leave a note saying who closed it.
pub fn close(conn: &mut Connection, actor: &Actor, id: &Uuid, now: DateTime<Utc>) -> Result<ThreadSummary, CareError> {
    let scoped = participant_thread(conn, actor, id)?;
    if scoped.thread.is_closed {
        return Err(CareError::conflict("thread", "closed", "close"));
    }
    let name = actor_name(conn, actor)?;

    let tx = conn.transaction()?;
    if !repository::close_thread(&tx, id, now)? {
        return Err(CareError::conflict("thread", "closed", "close"));
    }
    let note = plain_message(*id, actor.id, MessageType::General, format!("Thread closed by {name}"), now);
    store_message(&tx, &note)?;
    tx.commit()?;
    tracing::info!(thread_id = %id, "Thread closed");
    summarize(conn, actor, id)
}

/// Add participants and announce them. All ids must name existing users.
pub fn add_participants(
    conn: &mut Connection,
    actor: &Actor,
    id: &Uuid,
    user_ids: &[Uuid],
    now: DateTime<Utc>,
) -> Result<Vec<UserRef>, CareError> {
    participant_thread(conn, actor, id)?;
    if user_ids.is_empty() {
        return Err(CareError::invalid("participant_ids", "This field is required."));
    }
    let users = repository::get_users(conn, user_ids)?;
    let known: BTreeSet<Uuid> = users.iter().map(|u| u.id).collect();
    let unknown: Vec<String> = user_ids
        .iter()
        .filter(|id| !known.contains(id))
        .map(Uuid::to_string)
        .collect();
    if !unknown.is_empty() {
        return Err(CareError::invalid(
            "participant_ids",
            format!("Unknown user ids: {}", unknown.join(", ")),
        ));
    }

    let names: Vec<String> = users.iter().map(User::full_name).collect();
    let tx = conn.transaction()?;
    repository::add_thread_participants(&tx, id, user_ids)?;
    let note = plain_message(
        *id,
        actor.id,
        MessageType::General,
        format!("Added participants: {}", names.join(", ")),
        now,
    );
    store_message(&tx, &note)?;
    tx.commit()?;
    Ok(users.iter().map(UserRef::from).collect())
}

pub fn remove_participant(conn: &Connection, actor: &Actor, id: &Uuid, user_id: &Uuid) -> Result<(), CareError> {
    participant_thread(conn, actor, id)?;
    if !repository::remove_thread_participant(conn, id, user_id)? {
        return Err(CareError::not_found("participant", user_id));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Messages
// ═══════════════════════════════════════════════════════════

pub fn post_message(
    conn: &mut Connection,
    actor: &Actor,
    thread_id: &Uuid,
    input: MessageInput,
    now: DateTime<Utc>,
) -> Result<MessageView, CareError> {
    let scoped = participant_thread(conn, actor, thread_id)?;
    let mut errors = FieldErrors::new();
    errors.require(input.content.as_deref(), "content");
    let message_type = parse_message_type(&mut errors, input.message_type.as_deref());
    errors.finish()?;
    if scoped.thread.is_closed {
        return Err(CareError::conflict("thread", "closed", "post"));
    }

    let mut message = plain_message(*thread_id, actor.id, message_type, input.content.unwrap_or_default(), now);
    message.attached_files = input.attached_files;
    message.referenced_visits = input.referenced_visits;

    let tx = conn.transaction()?;
    store_message(&tx, &message)?;
    tx.commit()?;
    let sender_name = actor_name(conn, actor)?;
    message_view(conn, message, sender_name)
}

/// Draft a message with the content generator and post it. Nothing is stored
/// when generation fails.
pub fn generate_message(
    conn: &mut Connection,
    generator: &dyn ContentGenerator,
    actor: &Actor,
    thread_id: &Uuid,
    request: GenerateRequest,
    now: DateTime<Utc>,
) -> Result<MessageView, CareError> {
    let scoped = participant_thread(conn, actor, thread_id)?;
    let mut errors = FieldErrors::new();
    let message_type = parse_message_type(&mut errors, request.message_type.as_deref());
    let template = match request.template_id {
        Some(tid) => {
            let found = repository::get_message_template(conn, &tid)?.filter(|t| t.is_active);
            errors.check(found.is_some(), "template_id", "Template not found.");
            found
        }
        None => None,
    };
    errors.finish()?;
    if scoped.thread.is_closed {
        return Err(CareError::conflict("thread", "closed", "post"));
    }

    let sender_name = actor_name(conn, actor)?;
    let context = json!({
        "patient_name": scoped.patient_name,
        "sender_name": sender_name,
        "subject": scoped.thread.subject,
        "message_type": message_type,
        "template_content": template.as_ref().map(|t| t.template_content.clone()),
        "context_data": request.context_data,
        "custom_prompt": request.custom_prompt,
    });
    let content = generator.generate(ContentKind::Message, &context)?;
    if content.trim().is_empty() {
        return Err(crate::pipeline::generation::GenerationError::Malformed("empty message".into()).into());
    }

    let mut message = plain_message(*thread_id, actor.id, message_type, content, now);
    message.is_ai_generated = true;
    message.ai_template_used = Some(match request.template_id {
        Some(tid) => format!("template_{tid}"),
        None => "custom_generation".into(),
    });

    let tx = conn.transaction()?;
    store_message(&tx, &message)?;
    tx.commit()?;
    message_view(conn, message, sender_name)
}

pub fn list_messages(
    conn: &Connection,
    actor: &Actor,
    filter: &MessageFilter,
    page: &Page,
) -> Result<Paged<MessageView>, CareError> {
    let paged = repository::list_messages(conn, &actor.id, filter, page)?;
    let mut results = Vec::with_capacity(paged.results.len());
    for (message, sender_name) in paged.results {
        results.push(message_view(conn, message, sender_name)?);
    }
    Ok(Paged {
        count: paged.count,
        results,
    })
}

pub fn get_message(conn: &Connection, actor: &Actor, id: &Uuid) -> Result<MessageView, CareError> {
    let (message, sender_name) = repository::get_message(conn, id)?.ok_or_else(|| CareError::not_found("message", id))?;
    participant_thread(conn, actor, &message.thread_id).map_err(|_| CareError::not_found("message", id))?;
    message_view(conn, message, sender_name)
}

// ── Reference and reporting ─────────────────────────────────

pub fn templates(conn: &Connection, message_type: Option<&str>) -> Result<Vec<MessageTemplate>, CareError> {
    let kind = message_type
        .map(|raw| {
            raw.parse::<MessageType>()
                .map_err(|_| CareError::invalid("message_type", format!("\"{raw}\" is not a valid choice.")))
        })
        .transpose()?;
    Ok(repository::list_message_templates(conn, kind)?)
}

pub fn stats(conn: &Connection, actor: &Actor) -> Result<CommunicationStats, CareError> {
    Ok(repository::communication_stats(conn, &actor.id)?)
}

/// Every thread about a patient that the actor participates in.
pub fn patient_history(
    conn: &Connection,
    actor: &Actor,
    patient_id: &Uuid,
) -> Result<PatientCommunicationHistory, CareError> {
    let patient = visible_patient(conn, actor, patient_id)?;
    let scope = scope_query(actor, ResourceKind::Thread);
    let filter = ThreadFilter {
        patient_id: Some(*patient_id),
        ..Default::default()
    };
    let all = Page {
        page: Some(1),
        page_size: Some(MAX_PAGE_SIZE),
    };
    let mut history = Vec::new();
    for (thread, _) in repository::list_threads(conn, &scope, &filter, &all)?.results {
        let participants = repository::get_thread_participants(conn, &thread.id)?;
        let (_, message_count) = repository::thread_message_counts(conn, &thread.id, &actor.id)?;
        history.push(HistoryEntry {
            id: thread.id,
            subject: thread.subject,
            created_at: thread.created_at,
            is_urgent: thread.is_urgent,
            is_closed: thread.is_closed,
            message_count,
            last_activity: thread.updated_at,
            participants: user_refs(conn, &participants)?,
        });
    }
    Ok(PatientCommunicationHistory {
        patient_id: patient.id,
        patient_name: patient.full_name(),
        total_threads: history.len(),
        communication_history: history,
    })
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

    fn thread_input(patient_id: Uuid, participants: Vec<Uuid>) -> ThreadInput {
        ThreadInput {
            patient_id: Some(patient_id),
            subject: Some("Wound care follow-up".into()),
            participant_ids: participants,
            ..Default::default()
        }
    }

    fn say(content: &str) -> MessageInput {
        MessageInput {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    #[test]
    fn creator_joins_participants() {
        let mut conn = open_memory_database().unwrap();
        let creator = make_user(&conn, "creator", Role::Nurse);
        let a = make_user(&conn, "alpha", Role::Physician);
        let b = make_user(&conn, "beta", Role::SocialWorker);
        let patient = make_patient(&conn, "C1", None);

        let summary = create_thread(&mut conn, &actor(&creator), thread_input(patient.id, vec![a.id, b.id]), Utc::now()).unwrap();
        let ids: BTreeSet<Uuid> = summary.participants.iter().map(|p| p.id).collect();
        assert_eq!(ids, BTreeSet::from([a.id, b.id, creator.id]));
    }

    #[test]
    fn unknown_participant_rejected() {
        let mut conn = open_memory_database().unwrap();
        let creator = make_user(&conn, "creator", Role::Nurse);
        let patient = make_patient(&conn, "C2", None);
        let err = create_thread(&mut conn, &actor(&creator), thread_input(patient.id, vec![Uuid::new_v4()]), Utc::now())
            .unwrap_err();
        assert!(matches!(err, CareError::Validation(ref e) if e.contains("participant_ids")));
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM communication_threads", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn reading_thread_clears_unread_for_both_sides() {
        let mut conn = open_memory_database().unwrap();
        let u1 = make_user(&conn, "u1", Role::Nurse);
        let u2 = make_user(&conn, "u2", Role::Physician);
        let patient = make_patient(&conn, "C3", None);
        let thread = create_thread(&mut conn, &actor(&u1), thread_input(patient.id, vec![u2.id]), Utc::now())
            .unwrap()
            .thread;

        let posted = post_message(&mut conn, &actor(&u2), &thread.id, say("Vitals stable"), Utc::now()).unwrap();
        assert_eq!(posted.read_by, vec![u2.id]);

        let before = list_threads(&conn, &actor(&u1), &ThreadFilter::default(), &Page::default()).unwrap();
        assert_eq!(before.results[0].unread_count, 1);

        let detail = get_thread(&mut conn, &actor(&u1), &thread.id, Utc::now()).unwrap();
        assert_eq!(detail.messages.len(), 1);
        assert!(detail.messages[0].read_by.contains(&u1.id));
        // Second read is idempotent.
        get_thread(&mut conn, &actor(&u1), &thread.id, Utc::now()).unwrap();

        for user in [&u1, &u2] {
            let list = list_threads(&conn, &actor(user), &ThreadFilter::default(), &Page::default()).unwrap();
            assert_eq!(list.results[0].unread_count, 0);
        }
    }

    #[test]
    fn non_participants_see_nothing() {
        let mut conn = open_memory_database().unwrap();
        let u1 = make_user(&conn, "u1", Role::Nurse);
        let admin = make_user(&conn, "admin", Role::Admin);
        let patient = make_patient(&conn, "C4", None);
        let thread = create_thread(&mut conn, &actor(&u1), thread_input(patient.id, vec![]), Utc::now())
            .unwrap()
            .thread;

        let err = post_message(&mut conn, &actor(&admin), &thread.id, say("hi"), Utc::now()).unwrap_err();
        assert!(matches!(err, CareError::NotFound { .. }));
        let list = list_threads(&conn, &actor(&admin), &ThreadFilter::default(), &Page::default()).unwrap();
        assert_eq!(list.count, 0);
    }

    #[test]
    fn closing_appends_note_and_blocks_posts() {
        let mut conn = open_memory_database().unwrap();
        let u1 = make_user(&conn, "u1", Role::Nurse);
        let patient = make_patient(&conn, "C5", None);
        let thread = create_thread(&mut conn, &actor(&u1), thread_input(patient.id, vec![]), Utc::now())
            .unwrap()
            .thread;

        let closed = close(&mut conn, &actor(&u1), &thread.id, Utc::now()).unwrap();
        assert!(closed.thread.is_closed);
        assert_eq!(closed.last_message.unwrap().content, "Thread closed by U1 Tester");

        let err = post_message(&mut conn, &actor(&u1), &thread.id, say("late"), Utc::now()).unwrap_err();
        assert!(matches!(err, CareError::StateConflict { ref current, .. } if current == "closed"));
        assert!(matches!(close(&mut conn, &actor(&u1), &thread.id, Utc::now()), Err(CareError::StateConflict { .. })));
    }

    #[test]
    fn participants_added_and_removed() {
        let mut conn = open_memory_database().unwrap();
        let u1 = make_user(&conn, "u1", Role::Nurse);
        let u2 = make_user(&conn, "u2", Role::PhysicalTherapist);
        let patient = make_patient(&conn, "C6", None);
        let thread = create_thread(&mut conn, &actor(&u1), thread_input(patient.id, vec![]), Utc::now())
            .unwrap()
            .thread;

        assert!(add_participants(&mut conn, &actor(&u1), &thread.id, &[Uuid::new_v4()], Utc::now()).is_err());
        let added = add_participants(&mut conn, &actor(&u1), &thread.id, &[u2.id], Utc::now()).unwrap();
        assert_eq!(added[0].id, u2.id);
        let summary = summarize(&conn, &actor(&u2), &thread.id).unwrap();
        assert_eq!(summary.last_message.unwrap().content, "Added participants: U2 Tester");

        remove_participant(&conn, &actor(&u1), &thread.id, &u2.id).unwrap();
        assert!(matches!(summarize(&conn, &actor(&u2), &thread.id), Err(CareError::NotFound { .. })));
        assert!(remove_participant(&conn, &actor(&u1), &thread.id, &u2.id).is_err());
    }

    #[test]
    fn last_message_is_truncated() {
        let mut conn = open_memory_database().unwrap();
        let u1 = make_user(&conn, "u1", Role::Nurse);
        let patient = make_patient(&conn, "C7", None);
        let mut input = thread_input(patient.id, vec![]);
        input.initial_message = Some("x".repeat(150));
        let summary = create_thread(&mut conn, &actor(&u1), input, Utc::now()).unwrap();
        let last = summary.last_message.unwrap().content;
        assert_eq!(last.chars().count(), 103);
        assert!(last.ends_with("..."));
        assert_eq!(summary.unread_count, 0);
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn generated_messages_record_origin() {
        let mut conn = open_memory_database().unwrap();
        let u1 = make_user(&conn, "u1", Role::Nurse);
        let patient = make_patient(&conn, "C8", None);
        let thread = create_thread(&mut conn, &actor(&u1), thread_input(patient.id, vec![]), Utc::now())
            .unwrap()
            .thread;

        let request = GenerateRequest {
            message_type: Some("urgent_alert".into()),
            ..Default::default()
        };
        let view = generate_message(&mut conn, &TemplateGenerator, &actor(&u1), &thread.id, request, Utc::now()).unwrap();
        assert!(view.message.is_ai_generated);
        assert_eq!(view.message.ai_template_used.as_deref(), Some("custom_generation"));
        assert!(view.message.content.starts_with("URGENT ALERT"));

        let template = templates(&conn, Some("physician_update")).unwrap().remove(0);
        let request = GenerateRequest {
            message_type: Some("physician_update".into()),
            template_id: Some(template.id),
            ..Default::default()
        };
        let view = generate_message(&mut conn, &TemplateGenerator, &actor(&u1), &thread.id, request, Utc::now()).unwrap();
        assert_eq!(view.message.ai_template_used, Some(format!("template_{}", template.id)));

        let failing = MockGenerator::failing("offline");
        let before = list_messages(&conn, &actor(&u1), &MessageFilter::default(), &Page::default()).unwrap().count;
        let err = generate_message(&mut conn, &failing, &actor(&u1), &thread.id, GenerateRequest::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, CareError::Generation(_)));
        let after = list_messages(&conn, &actor(&u1), &MessageFilter::default(), &Page::default()).unwrap().count;
        assert_eq!(before, after);
    }

    #[test]
    fn stats_and_patient_history() {
        let mut conn = open_memory_database().unwrap();
        let u1 = make_user(&conn, "u1", Role::Nurse);
        let u2 = make_user(&conn, "u2", Role::Physician);
        let patient = make_patient(&conn, "C9", None);
        let thread = create_thread(&mut conn, &actor(&u1), thread_input(patient.id, vec![u2.id]), Utc::now())
            .unwrap()
            .thread;
        set_urgent(&conn, &actor(&u1), &thread.id, true, Utc::now()).unwrap();
        post_message(&mut conn, &actor(&u2), &thread.id, say("Please call"), Utc::now()).unwrap();

        let stats = stats(&conn, &actor(&u1)).unwrap();
        assert_eq!(stats.total_threads, 1);
        assert_eq!(stats.urgent_threads, 1);
        assert_eq!(stats.unread_messages, 1);
        assert_eq!(stats.messages_by_type["general"], 1);

        let history = patient_history(&conn, &actor(&u1), &patient.id).unwrap();
        assert_eq!(history.total_threads, 1);
        assert_eq!(history.communication_history[0].message_count, 1);

        let message_id = list_messages(&conn, &actor(&u1), &MessageFilter::default(), &Page::default())
            .unwrap()
            .results[0]
            .message
            .id;
        assert!(get_message(&conn, &actor(&u1), &message_id).is_ok());
        let outsider = make_user(&conn, "out", Role::Nurse);
        assert!(matches!(get_message(&conn, &actor(&outsider), &message_id), Err(CareError::NotFound { .. })));
    }
}
